//! `SerialIo` over the USB-CDC/UART console, used once per cold boot for
//! provisioning. Grounded on `esp-idf-hal`'s UART driver.

use esp_idf_hal::uart::UartDriver;
use psn_core::capabilities::SerialIo;

pub struct EspSerial<'a> {
    uart: UartDriver<'a>,
    /// A byte consumed by `wait_for_byte`'s blocking read but not yet
    /// delivered through `read_byte`, since `UartDriver` has no
    /// non-consuming peek.
    pending: Option<u8>,
}

impl<'a> EspSerial<'a> {
    pub fn new(uart: UartDriver<'a>) -> Self {
        Self {
            uart,
            pending: None,
        }
    }
}

impl SerialIo for EspSerial<'_> {
    fn wait_for_byte(&mut self, timeout_s: u8) -> bool {
        if self.pending.is_some() {
            return true;
        }
        let mut buf = [0u8; 1];
        match self.uart.read(&mut buf, (timeout_s as u32).saturating_mul(1000)) {
            Ok(n) if n > 0 => {
                self.pending = Some(buf[0]);
                true
            }
            _ => false,
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.pending.take() {
            return Some(byte);
        }
        let mut buf = [0u8; 1];
        match self.uart.read(&mut buf, 0) {
            Ok(n) if n > 0 => Some(buf[0]),
            _ => None,
        }
    }

    fn write_all(&mut self, bytes: &[u8]) {
        let _ = self.uart.write(bytes);
    }
}
