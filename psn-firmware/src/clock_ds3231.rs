//! `Clock` over a DS3231 RTC on I2C, grounded on the original firmware's use
//! of a DS3231 square-wave alarm pin as the deep-sleep wake source (§6) and
//! on `esp-idf-hal`'s peripheral-ownership style: `Peripherals` is taken once
//! in `main` and pins/buses are handed to each driver.

use core::cell::RefCell;
use esp_idf_hal::i2c::I2cDriver;
use psn_core::capabilities::{Clock, ClockError};

const DS3231_ADDR: u8 = 0x68;

// Register map (DS3231 datasheet): seconds..year are BCD; register 0x0F bit 7
// (OSF, oscillator stop flag) is set by the chip whenever it has lost power
// and cleared by us on every successful `set_time`, which is how
// `is_time_valid` detects a dead backup battery.
const REG_SECONDS: u8 = 0x00;
const REG_ALARM1_SECONDS: u8 = 0x07;
const REG_CONTROL: u8 = 0x0E;
const REG_STATUS: u8 = 0x0F;
const OSF_BIT: u8 = 0x80;

/// The original firmware encoded times relative to 2000-01-01T00:00:00Z
/// (the Arduino `RtcDateTime` epoch); this offset converts to/from Unix
/// epoch seconds so the rest of `psn-core` only ever sees Unix time.
const DS3231_EPOCH_OFFSET_S: u32 = 946_684_800;

/// `RefCell`-wrapped bus handle: `Clock::now`/`is_time_valid` take `&self`
/// by trait contract, but an I2C transaction needs `&mut I2cDriver`.
pub struct Ds3231Clock<'a> {
    i2c: RefCell<I2cDriver<'a>>,
}

impl<'a> Ds3231Clock<'a> {
    pub fn new(i2c: I2cDriver<'a>) -> Self {
        Self {
            i2c: RefCell::new(i2c),
        }
    }

    fn read_reg(&self, reg: u8) -> Result<u8, ClockError> {
        let mut buf = [0u8; 1];
        self.i2c
            .borrow_mut()
            .write_read(DS3231_ADDR, &[reg], &mut buf, 100)
            .map_err(|_| ClockError)?;
        Ok(buf[0])
    }

    fn write_reg(&self, reg: u8, value: u8) -> Result<(), ClockError> {
        self.i2c
            .borrow_mut()
            .write(DS3231_ADDR, &[reg, value], 100)
            .map_err(|_| ClockError)
    }

    /// Reads the seven time-keeping registers and returns (sec, min, hour,
    /// day-of-month, month, year-since-2000).
    fn read_datetime(&self) -> Result<(u32, u32, u32, u32, u32, u32), ClockError> {
        let mut regs = [0u8; 7];
        self.i2c
            .borrow_mut()
            .write_read(DS3231_ADDR, &[REG_SECONDS], &mut regs, 100)
            .map_err(|_| ClockError)?;

        let s = from_bcd(regs[0] & 0x7F);
        let mi = from_bcd(regs[1] & 0x7F);
        let h = from_bcd(regs[2] & 0x3F); // 24-hour mode assumed
        let d = from_bcd(regs[4] & 0x3F);
        let mo = from_bcd(regs[5] & 0x1F);
        let y = from_bcd(regs[6]);
        Ok((s, mi, h, d, mo, y))
    }
}

impl Clock for Ds3231Clock<'_> {
    fn now(&self) -> u32 {
        // `now` is infallible by trait contract; a transient I2C error here
        // cannot be distinguished from "clock not set" by the caller, who is
        // expected to check `is_time_valid` first and ignore `now` otherwise.
        self.read_datetime()
            .map(|(s, mi, h, d, mo, y)| {
                let ds3231_days = days_from_civil(2000 + y as i64, mo, d);
                let ds3231_secs = ds3231_days as u32 * 86_400 + h * 3600 + mi * 60 + s;
                ds3231_secs.saturating_add(DS3231_EPOCH_OFFSET_S)
            })
            .unwrap_or(0)
    }

    fn is_time_valid(&self) -> bool {
        self.read_reg(REG_STATUS)
            .map(|s| s & OSF_BIT == 0)
            .unwrap_or(false)
    }

    fn set_time(&mut self, epoch_s: u32) -> Result<(), ClockError> {
        let ds3231_secs = epoch_s.saturating_sub(DS3231_EPOCH_OFFSET_S);
        let (s, mi, h, d, mo, y) = civil_from_ds3231_seconds(ds3231_secs);

        self.write_reg(REG_SECONDS, to_bcd(s))?;
        self.write_reg(REG_SECONDS + 1, to_bcd(mi))?;
        self.write_reg(REG_SECONDS + 2, to_bcd(h))?;
        self.write_reg(REG_SECONDS + 3, 1)?; // day-of-week, unused downstream
        self.write_reg(REG_SECONDS + 4, to_bcd(d))?;
        self.write_reg(REG_SECONDS + 5, to_bcd(mo))?;
        self.write_reg(REG_SECONDS + 6, to_bcd(y))?;

        let status = self.read_reg(REG_STATUS)?;
        self.write_reg(REG_STATUS, status & !OSF_BIT)?;
        Ok(())
    }

    fn set_alarm(&mut self, at_epoch_s: u32) -> Result<(), ClockError> {
        let ds3231_secs = at_epoch_s.saturating_sub(DS3231_EPOCH_OFFSET_S);
        let (s, mi, h, d, _mo, _y) = civil_from_ds3231_seconds(ds3231_secs);

        // Alarm 1, match seconds/minutes/hours/date: a one-shot absolute-time
        // alarm, matching the original firmware's scheduling model.
        self.write_reg(REG_ALARM1_SECONDS, to_bcd(s))?;
        self.write_reg(REG_ALARM1_SECONDS + 1, to_bcd(mi))?;
        self.write_reg(REG_ALARM1_SECONDS + 2, to_bcd(h))?;
        self.write_reg(REG_ALARM1_SECONDS + 3, to_bcd(d))?;

        let control = self.read_reg(REG_CONTROL)?;
        // INTCN=1 (interrupt mode, drives the square-wave pin low on alarm),
        // A1IE=1 (enable alarm 1 interrupt).
        self.write_reg(REG_CONTROL, control | 0x04 | 0x01)?;

        let status = self.read_reg(REG_STATUS)?;
        self.write_reg(REG_STATUS, status & !0x01)?; // clear A1F before arming
        Ok(())
    }
}

fn to_bcd(value: u32) -> u8 {
    (((value / 10) << 4) | (value % 10)) as u8
}

fn from_bcd(value: u8) -> u32 {
    ((value >> 4) * 10 + (value & 0x0F)) as u32
}

/// Howard Hinnant's days-from-civil algorithm (the same family psn-core's
/// `observation::format_iso8601_utc` uses in the opposite direction), needed
/// here to turn a DS3231 BCD date back into a day count for epoch-seconds
/// arithmetic.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = (m + 9) % 12;
    let doy = (153 * mp as u64 + 2) / 5 + d as u64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i64 - 719_468
}

/// Inverse of [`days_from_civil`] composed with time-of-day splitting,
/// producing (sec, min, hour, day, month, year-since-2000) from a DS3231-
/// epoch second count.
fn civil_from_ds3231_seconds(total_s: u32) -> (u32, u32, u32, u32, u32, u32) {
    let days = (total_s / 86_400) as i64;
    let secs_of_day = total_s % 86_400;
    let s = secs_of_day % 60;
    let mi = (secs_of_day / 60) % 60;
    let h = secs_of_day / 3600;

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };

    (s, mi, h, d, m, (y - 2000) as u32)
}
