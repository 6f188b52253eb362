//! Binary entry point: wakes once (from power-on or deep-sleep reset),
//! drives `psn_core::run_wake` against real hardware, and acts on the
//! returned [`psn_core::WakeAction`] — the only place in the firmware
//! allowed to call `Power::enter_deep_sleep`, per the orchestrator's own
//! doc comment. ESP-IDF patches and `EspLogger` come up first, then
//! `Peripherals::take()` once and pins get handed to each driver.

use anyhow::Result;
use esp_idf_hal::adc::{config::Config as AdcConfig, AdcChannelDriver, AdcDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::prelude::*;
use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use psn_core::capabilities::{ConfigStore, SerialIo};
use psn_core::config::Configuration;
use psn_core::{run_wake, service_repl_byte, WakeAction};

mod clock_ds3231;
mod config_store;
mod mqtt_transport;
mod persistent_store;
mod power_esp;
mod sensors_esp;
mod serial_repl_esp;
mod version;

use clock_ds3231::Ds3231Clock;
use config_store::NvsConfigStore;
use mqtt_transport::MqttTransport;
use power_esp::EspPower;
use sensors_esp::EspSensors;
use serial_repl_esp::EspSerial;

#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    log::info!("psn-firmware {}", version::full_version());

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mac = read_mac();

    let mut config_store = NvsConfigStore::new(nvs.clone());
    let config = config_store.load().unwrap_or_else(|_| empty_config());

    let i2c_config = I2cConfig::new().baudrate(400.kHz().into());
    let i2c_rtc = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio8,
        peripherals.pins.gpio9,
        &i2c_config,
    )?;
    let mut clock = Ds3231Clock::new(i2c_rtc);

    let i2c_sensor_config = I2cConfig::new().baudrate(400.kHz().into());
    let i2c_sensor = I2cDriver::new(
        peripherals.i2c1,
        peripherals.pins.gpio17,
        peripherals.pins.gpio18,
        &i2c_sensor_config,
    )?;

    let adc_config = AdcConfig::default();
    let adc = AdcDriver::new(peripherals.adc1, &adc_config)?;
    let battery_channel = AdcChannelDriver::new(peripherals.pins.gpio4)?;
    let mut sensor = EspSensors::new(i2c_sensor, adc, battery_channel);

    let uart_config = UartConfig::new().baudrate(Hertz(115_200));
    let uart = UartDriver::new(
        peripherals.uart0,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        Option::<esp_idf_hal::gpio::AnyIOPin>::None,
        Option::<esp_idf_hal::gpio::AnyIOPin>::None,
        &uart_config,
    )?;
    let mut serial = EspSerial::new(uart);

    let mut transport = MqttTransport::new(
        peripherals.modem,
        sys_loop,
        nvs,
        config.network_ssid.clone(),
        config.network_password.clone(),
        config.server_address.clone(),
        config.server_port,
    )?;

    let mut power = EspPower::new();

    let action = persistent_store::with_state(|state| {
        run_wake(
            state,
            mac.as_str(),
            &mut clock,
            &mut sensor,
            &mut config_store,
            &mut transport,
            &mut power,
            &mut serial,
        )
    });

    match action {
        WakeAction::SleepIndefinitely => {
            log::warn!("entering terminal sleep, no wake source armed");
            power.enter_deep_sleep();
        }
        WakeAction::SleepUntilAlarm { next_alarm_epoch_s } => {
            log::info!("sleeping until alarm at {next_alarm_epoch_s}");
            power.arm_gpio_wake();
            power.enter_deep_sleep();
        }
        WakeAction::StayAwakeForProvisioning => {
            log::info!("provisioning session open");
            let mut assembler = psn_core::repl::LineAssembler::default();
            loop {
                if let Some(byte) = serial.read_byte() {
                    service_repl_byte(&mut assembler, byte, mac.as_str(), &mut clock, &mut config_store, &mut serial);
                } else {
                    power.sleep_ms(10);
                }
            }
        }
    }

    Ok(())
}

fn empty_config() -> Configuration {
    Configuration {
        network_ssid: Default::default(),
        network_enterprise: false,
        network_username: Default::default(),
        network_password: Default::default(),
        server_address: Default::default(),
        server_port: 0,
        network_timeout_s: 5,
        server_timeout_s: 5,
    }
}

fn read_mac() -> heapless::String<17> {
    let mut mac_bytes = [0u8; 6];
    unsafe {
        esp_idf_sys::esp_read_mac(mac_bytes.as_mut_ptr(), esp_idf_sys::esp_mac_type_t_ESP_MAC_WIFI_STA);
    }
    let mut s = heapless::String::new();
    for (i, byte) in mac_bytes.iter().enumerate() {
        if i > 0 {
            let _ = s.push(':');
        }
        let _ = core::fmt::write(&mut s, format_args!("{byte:02x}"));
    }
    s
}
