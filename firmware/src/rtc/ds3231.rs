//! Maxim DS3231, temperature compensated clock.
use super::{decode_ds_time, encode_ds_time, Rtc, RtcError, ADDRESS};
use bitfield_struct::bitfield;
use chrono::NaiveDateTime;
use embedded_hal_async::i2c::I2c;

pub mod reg {
    pub const SECONDS: u8 = 0x00;
    pub const STATUS: u8 = 0x0F;
    pub const TEMPERATURE_MSB: u8 = 0x11;
}

#[bitfield(u8)]
#[derive(PartialEq, Eq, defmt::Format)]
pub struct Status {
    pub alarm_1: bool,
    pub alarm_2: bool,
    pub busy: bool,
    pub enable_32khz: bool,
    #[bits(3)]
    _reserved: u8,
    /// Oscillator stop flag, set when the oscillator stopped since it was last cleared.
    pub oscillator_stopped: bool,
}

pub struct Ds3231<I2C> {
    bus: I2C,
}
impl<I2C> core::fmt::Debug for Ds3231<I2C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("DS3231:{}", ADDRESS))
    }
}

impl<I2C: I2c> Ds3231<I2C> {
    pub fn new(bus: I2C) -> Self {
        Self { bus }
    }

    pub async fn status(&mut self) -> Result<Status, RtcError<I2C::Error>> {
        let mut v = [0u8; 1];
        self.bus.write_read(ADDRESS, &[reg::STATUS], &mut v).await?;
        Ok(Status::from_bits(v[0]))
    }

    /// Die temperature in quarter degrees celsius.
    pub async fn temperature_quarters(&mut self) -> Result<i16, RtcError<I2C::Error>> {
        let mut v = [0u8; 2];
        self.bus.write_read(ADDRESS, &[reg::TEMPERATURE_MSB], &mut v).await?;
        // 10 bit two's complement, msb holds the integer part, the top two bits of lsb the fraction.
        Ok(i16::from_be_bytes(v) >> 6)
    }

    /// Die temperature in degrees celsius.
    pub async fn temperature(&mut self) -> Result<f32, RtcError<I2C::Error>> {
        Ok(self.temperature_quarters().await? as f32 * 0.25)
    }
}

impl<I2C: I2c> Rtc for Ds3231<I2C> {
    type Error = RtcError<I2C::Error>;

    async fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error> {
        let mut regs = [0u8; 7];
        self.bus.write_read(ADDRESS, &[reg::SECONDS], &mut regs).await?;
        decode_ds_time(&regs).ok_or(RtcError::InvalidTime)
    }

    async fn set_datetime(&mut self, dt: &NaiveDateTime) -> Result<(), Self::Error> {
        let regs = encode_ds_time(dt).ok_or(RtcError::OutOfRange)?;
        let mut data = [0u8; 8];
        data[0] = reg::SECONDS;
        data[1..].copy_from_slice(&regs);
        self.bus.write(ADDRESS, &data).await?;
        let status = self.status().await?.with_oscillator_stopped(false);
        self.bus.write(ADDRESS, &[reg::STATUS, status.into_bits()]).await?;
        Ok(())
    }

    async fn lost_power(&mut self) -> Result<bool, Self::Error> {
        Ok(self.status().await?.oscillator_stopped())
    }
}

#[cfg(test)]
mod test {
    use super::super::test_util::MockI2c;
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_ds3231_set_get() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            // Oscillator stopped with the 32khz output enabled, as after power on.
            let bus = MockI2c::with_device(ADDRESS, &[(reg::STATUS, 0x88)]);
            let mut rtc = Ds3231::new(bus);
            assert!(rtc.lost_power().await?);
            assert!(matches!(rtc.datetime().await, Err(RtcError::InvalidTime)));

            let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
                .unwrap()
                .and_hms_opt(6, 30, 0)
                .unwrap();
            rtc.set_datetime(&dt).await?;
            assert_eq!(rtc.datetime().await?, dt);
            assert!(!rtc.lost_power().await?);
            // Other status bits are left alone.
            assert!(rtc.status().await?.enable_32khz());

            let too_late = NaiveDate::from_ymd_opt(2100, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            assert!(matches!(rtc.set_datetime(&too_late).await, Err(RtcError::OutOfRange)));
            Ok(())
        }())
    }

    #[test]
    fn test_ds3231_temperature() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let bus = MockI2c::with_device(ADDRESS, &[(0x11, 25), (0x12, 0b0100_0000)]);
            let mut rtc = Ds3231::new(bus);
            assert_eq!(rtc.temperature_quarters().await?, 101);
            assert_eq!(rtc.temperature().await?, 25.25);

            // -18.75 is 0xED 0x40.
            let bus = MockI2c::with_device(ADDRESS, &[(0x11, 0xED), (0x12, 0x40)]);
            let mut rtc = Ds3231::new(bus);
            assert_eq!(rtc.temperature().await?, -18.75);
            Ok(())
        }())
    }
}
