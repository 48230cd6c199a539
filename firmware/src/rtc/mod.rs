//! Real time clock support for the PiCowbell Adalogger (PCF8523) and the common DS3231 / DS1307 breakouts.
//!
//! All three chips live at the same i2c address, [`detect`] reads the register block once and picks the first chip
//! whose time registers decode to a valid date, in the order PCF8523, DS3231, DS1307.
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

pub mod ds1307;
pub mod ds3231;
pub mod manager;
pub mod menu;
pub mod pcf8523;

/// All supported chips use this address.
pub const ADDRESS: SevenBitAddress = 0x68;

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum RtcChip {
    Auto,
    Pcf8523,
    Ds3231,
    Ds1307,
}

impl RtcChip {
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Auto, Self::Pcf8523, Self::Ds3231, Self::Ds1307]
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RtcChip::Auto => "auto",
            RtcChip::Pcf8523 => "pcf8523",
            RtcChip::Ds3231 => "ds3231",
            RtcChip::Ds1307 => "ds1307",
        }
    }

    /// Whether a dump of registers 0x00..0x0A looks like this chip holding a valid time.
    fn matches(&self, regs: &[u8; 10]) -> bool {
        match self {
            RtcChip::Auto => false,
            RtcChip::Pcf8523 => pcf8523::decode_registers(regs).is_some(),
            RtcChip::Ds3231 | RtcChip::Ds1307 => {
                decode_ds_time(regs[0..7].try_into().unwrap_or(&[0u8; 7])).is_some()
            }
        }
    }
}

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RtcError<E: core::fmt::Debug> {
    /// Underlying I2C device error.
    #[error("i2c error {0:?}")]
    I2c(E),
    /// The registers don't hold a valid date and time.
    #[error("rtc holds an invalid time")]
    InvalidTime,
    /// The date can't be represented by the chip, these only store 2000-2099.
    #[error("date out of range")]
    OutOfRange,
}
impl<E: core::fmt::Debug> From<E> for RtcError<E> {
    fn from(e: E) -> Self {
        RtcError::I2c(e)
    }
}
impl<E: core::fmt::Debug> defmt::Format for RtcError<E> {
    fn format(&self, f: defmt::Formatter) {
        match *self {
            RtcError::I2c(ref e) => defmt::write!(f, "RtcError:I2c({:?})", defmt::Debug2Format(&e)),
            RtcError::InvalidTime => defmt::write!(f, "RtcError:InvalidTime"),
            RtcError::OutOfRange => defmt::write!(f, "RtcError:OutOfRange"),
        }
    }
}

/// Clock that keeps the calendar time.
#[allow(async_fn_in_trait)]
pub trait Rtc {
    type Error;
    async fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error>;
    async fn set_datetime(&mut self, datetime: &NaiveDateTime) -> Result<(), Self::Error>;
    /// Whether the oscillator stopped at some point, which means the time can't be trusted.
    async fn lost_power(&mut self) -> Result<bool, Self::Error>;
}

pub fn bcd_to_bin(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

pub fn bin_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Decode a bcd value, None if either nibble is not a decimal digit.
fn bcd_checked(v: u8) -> Option<u8> {
    if (v >> 4) > 9 || (v & 0x0F) > 9 {
        None
    } else {
        Some(bcd_to_bin(v))
    }
}

/// Decode an hours register, 12 hour mode is indicated by `twelve_hour`, `pm_bit` holds pm in that mode.
fn decode_hours(v: u8, twelve_hour: bool, pm_bit: u8) -> Option<u8> {
    if twelve_hour {
        let h = bcd_checked(v & 0x1F)?;
        if !(1..=12).contains(&h) {
            return None;
        }
        let pm = v & pm_bit != 0;
        Some(match (h, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        })
    } else {
        bcd_checked(v & 0x3F)
    }
}

fn make_datetime(year: u8, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2000 + year as i32, month as u32, day as u32)?.and_hms_opt(
        hour as u32,
        minute as u32,
        second as u32,
    )
}

/// Year offset from 2000, as stored in the chips.
fn year_offset(dt: &NaiveDateTime) -> Option<u8> {
    let y = dt.year();
    if (2000..=2099).contains(&y) {
        Some((y - 2000) as u8)
    } else {
        None
    }
}

/// Decode the DS1307 / DS3231 time registers, 0x00 up to 0x06.
fn decode_ds_time(regs: &[u8; 7]) -> Option<NaiveDateTime> {
    let second = bcd_checked(regs[0] & 0x7F)?;
    let minute = bcd_checked(regs[1] & 0x7F)?;
    let hour = decode_hours(regs[2], regs[2] & 0x40 != 0, 0x20)?;
    let day = bcd_checked(regs[4] & 0x3F)?;
    let month = bcd_checked(regs[5] & 0x1F)?;
    let year = bcd_checked(regs[6])?;
    if regs[3] & 0x07 == 0 {
        // Day of week runs from 1 to 7.
        return None;
    }
    make_datetime(year, month, day, hour, minute, second)
}

/// Encode the DS1307 / DS3231 time registers, always in 24 hour mode.
fn encode_ds_time(dt: &NaiveDateTime) -> Option<[u8; 7]> {
    let year = year_offset(dt)?;
    Some([
        bin_to_bcd(dt.second() as u8),
        bin_to_bcd(dt.minute() as u8),
        bin_to_bcd(dt.hour() as u8),
        dt.weekday().num_days_from_sunday() as u8 + 1,
        bin_to_bcd(dt.day() as u8),
        bin_to_bcd(dt.month() as u8),
        bin_to_bcd(year),
    ])
}

/// One of the supported clocks.
pub enum AnyRtc<I2C> {
    Pcf8523(pcf8523::Pcf8523<I2C>),
    Ds3231(ds3231::Ds3231<I2C>),
    Ds1307(ds1307::Ds1307<I2C>),
}

impl<I2C: I2c> AnyRtc<I2C> {
    fn with_chip(chip: RtcChip, i2c: I2C) -> Self {
        match chip {
            RtcChip::Auto | RtcChip::Pcf8523 => AnyRtc::Pcf8523(pcf8523::Pcf8523::new(i2c)),
            RtcChip::Ds3231 => AnyRtc::Ds3231(ds3231::Ds3231::new(i2c)),
            RtcChip::Ds1307 => AnyRtc::Ds1307(ds1307::Ds1307::new(i2c)),
        }
    }

    pub fn chip(&self) -> RtcChip {
        match self {
            AnyRtc::Pcf8523(_) => RtcChip::Pcf8523,
            AnyRtc::Ds3231(_) => RtcChip::Ds3231,
            AnyRtc::Ds1307(_) => RtcChip::Ds1307,
        }
    }
}

impl<I2C: I2c> Rtc for AnyRtc<I2C> {
    type Error = RtcError<I2C::Error>;
    async fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error> {
        match self {
            AnyRtc::Pcf8523(r) => r.datetime().await,
            AnyRtc::Ds3231(r) => r.datetime().await,
            AnyRtc::Ds1307(r) => r.datetime().await,
        }
    }
    async fn set_datetime(&mut self, datetime: &NaiveDateTime) -> Result<(), Self::Error> {
        match self {
            AnyRtc::Pcf8523(r) => r.set_datetime(datetime).await,
            AnyRtc::Ds3231(r) => r.set_datetime(datetime).await,
            AnyRtc::Ds1307(r) => r.set_datetime(datetime).await,
        }
    }
    async fn lost_power(&mut self) -> Result<bool, Self::Error> {
        match self {
            AnyRtc::Pcf8523(r) => r.lost_power().await,
            AnyRtc::Ds3231(r) => r.lost_power().await,
            AnyRtc::Ds1307(r) => r.lost_power().await,
        }
    }
}

/// Find the clock on the bus.
///
/// With [`RtcChip::Auto`] the chips are tried in order, if the device answers but none of the chips decodes a valid
/// time (a clock that was never set) the PCF8523 is assumed. An explicit chip is used as long as the device answers.
pub async fn detect<I2C: I2c>(mut i2c: I2C, chip: RtcChip) -> Result<AnyRtc<I2C>, RtcError<I2C::Error>> {
    let mut regs = [0u8; 10];
    i2c.write_read(ADDRESS, &[0x00], &mut regs).await?;
    if chip != RtcChip::Auto {
        return Ok(AnyRtc::with_chip(chip, i2c));
    }
    let found = [RtcChip::Pcf8523, RtcChip::Ds3231, RtcChip::Ds1307]
        .into_iter()
        .find(|c| c.matches(&regs))
        .unwrap_or(RtcChip::Pcf8523);
    Ok(AnyRtc::with_chip(found, i2c))
}

#[cfg(test)]
pub(crate) mod test_util {
    use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress};
    use std::collections::HashMap;

    /// Register based i2c device, the first written byte selects the register, reads and writes auto increment.
    #[derive(Debug, Default)]
    pub struct MockI2c {
        pub devices: HashMap<SevenBitAddress, [u8; 256]>,
        pub writes: usize,
    }
    impl MockI2c {
        pub fn with_device(address: SevenBitAddress, regs: &[(u8, u8)]) -> Self {
            let mut r = Self::default();
            let mut map = [0u8; 256];
            for (reg, value) in regs {
                map[*reg as usize] = *value;
            }
            r.devices.insert(address, map);
            r
        }
        pub fn reg(&self, address: SevenBitAddress, reg: u8) -> u8 {
            self.devices[&address][reg as usize]
        }
    }
    impl ErrorType for MockI2c {
        type Error = ErrorKind;
    }
    impl I2c for MockI2c {
        async fn transaction(
            &mut self,
            address: SevenBitAddress,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            let Some(regs) = self.devices.get_mut(&address) else {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            };
            let mut pointer: Option<u8> = None;
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(data) => {
                        for b in data.iter() {
                            match pointer {
                                None => pointer = Some(*b),
                                Some(p) => {
                                    regs[p as usize] = *b;
                                    pointer = Some(p.wrapping_add(1));
                                    self.writes += 1;
                                }
                            }
                        }
                    }
                    Operation::Read(data) => {
                        let mut p = pointer.unwrap_or(0);
                        for b in data.iter_mut() {
                            *b = regs[p as usize];
                            p = p.wrapping_add(1);
                        }
                        pointer = Some(p);
                    }
                }
            }
            Ok(())
        }
    }
}
