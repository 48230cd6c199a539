//! NXP PCF8523, the clock on the Adafruit PiCowbell Adalogger.
use super::{bcd_checked, bin_to_bcd, decode_hours, make_datetime, year_offset, Rtc, RtcError, ADDRESS};
use bitfield_struct::bitfield;
use chrono::{Datelike, NaiveDateTime, Timelike};
use embedded_hal_async::i2c::I2c;

pub mod reg {
    pub const CONTROL_1: u8 = 0x00;
    pub const CONTROL_3: u8 = 0x02;
    pub const SECONDS: u8 = 0x03;
}

/// Control_1 register, 8.2.1
#[bitfield(u8)]
#[derive(PartialEq, Eq, defmt::Format)]
pub struct Control1 {
    pub correction_interrupt: bool,
    pub alarm_interrupt: bool,
    pub second_interrupt: bool,
    /// 12 hour mode when set.
    pub twelve_hour: bool,
    pub soft_reset: bool,
    /// Clock is stopped when set.
    pub stop: bool,
    _reserved_bit6: bool,
    pub capacitor_select: bool,
}

/// Control_3 register, 8.2.3
#[bitfield(u8)]
#[derive(PartialEq, Eq, defmt::Format)]
pub struct Control3 {
    pub battery_low_interrupt: bool,
    pub switchover_interrupt: bool,
    /// Battery low flag.
    pub battery_low: bool,
    pub switchover_flag: bool,
    _reserved_bit4: bool,
    /// Power management, 0 is switchover in standard mode with low battery detection, 0b111 (reset) disables it.
    #[bits(3)]
    pub power_management: u8,
}

/// Decode the register block starting at 0x00.
pub(super) fn decode_registers(regs: &[u8; 10]) -> Option<NaiveDateTime> {
    let control = Control1::from_bits(regs[reg::CONTROL_1 as usize]);
    let t = &regs[reg::SECONDS as usize..];
    let second = bcd_checked(t[0] & 0x7F)?;
    let minute = bcd_checked(t[1] & 0x7F)?;
    let hour = decode_hours(t[2], control.twelve_hour(), 0x20)?;
    let day = bcd_checked(t[3] & 0x3F)?;
    if t[4] & 0x07 > 6 {
        return None;
    }
    let month = bcd_checked(t[5] & 0x1F)?;
    let year = bcd_checked(t[6])?;
    make_datetime(year, month, day, hour, minute, second)
}

pub struct Pcf8523<I2C> {
    bus: I2C,
}
impl<I2C> core::fmt::Debug for Pcf8523<I2C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("PCF8523:{}", ADDRESS))
    }
}

impl<I2C: I2c> Pcf8523<I2C> {
    pub fn new(bus: I2C) -> Self {
        Self { bus }
    }

    pub async fn control_3(&mut self) -> Result<Control3, RtcError<I2C::Error>> {
        let mut v = [0u8; 1];
        self.bus.write_read(ADDRESS, &[reg::CONTROL_3], &mut v).await?;
        Ok(Control3::from_bits(v[0]))
    }

    /// Whether the backup battery is low.
    pub async fn battery_low(&mut self) -> Result<bool, RtcError<I2C::Error>> {
        Ok(self.control_3().await?.battery_low())
    }
}

impl<I2C: I2c> Rtc for Pcf8523<I2C> {
    type Error = RtcError<I2C::Error>;

    async fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error> {
        let mut regs = [0u8; 10];
        self.bus.write_read(ADDRESS, &[reg::CONTROL_1], &mut regs).await?;
        decode_registers(&regs).ok_or(RtcError::InvalidTime)
    }

    async fn set_datetime(&mut self, dt: &NaiveDateTime) -> Result<(), Self::Error> {
        let year = year_offset(dt).ok_or(RtcError::OutOfRange)?;
        // Stop the clock, 24 hour mode.
        let control = Control1::new().with_stop(true);
        self.bus.write(ADDRESS, &[reg::CONTROL_1, control.into_bits()]).await?;
        self.bus
            .write(
                ADDRESS,
                &[
                    reg::SECONDS,
                    bin_to_bcd(dt.second() as u8), // Also clears the oscillator stopped flag.
                    bin_to_bcd(dt.minute() as u8),
                    bin_to_bcd(dt.hour() as u8),
                    bin_to_bcd(dt.day() as u8),
                    dt.weekday().num_days_from_sunday() as u8,
                    bin_to_bcd(dt.month() as u8),
                    bin_to_bcd(year),
                ],
            )
            .await?;
        // Battery switchover in standard mode, otherwise the time is lost without main power.
        let control_3 = Control3::new().with_power_management(0);
        self.bus.write(ADDRESS, &[reg::CONTROL_3, control_3.into_bits()]).await?;
        // And start it again.
        self.bus
            .write(ADDRESS, &[reg::CONTROL_1, Control1::new().into_bits()])
            .await?;
        Ok(())
    }

    async fn lost_power(&mut self) -> Result<bool, Self::Error> {
        let mut v = [0u8; 1];
        self.bus.write_read(ADDRESS, &[reg::SECONDS], &mut v).await?;
        Ok(v[0] & 0x80 != 0)
    }
}
