//! Maxim DS1307, the original hobby clock.
use super::{decode_ds_time, encode_ds_time, Rtc, RtcError, ADDRESS};
use chrono::NaiveDateTime;
use embedded_hal_async::i2c::I2c;

const SECONDS: u8 = 0x00;
/// Clock halt, bit 7 of the seconds register.
const CLOCK_HALT: u8 = 0x80;

pub struct Ds1307<I2C> {
    bus: I2C,
}
impl<I2C> core::fmt::Debug for Ds1307<I2C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("DS1307:{}", ADDRESS))
    }
}

impl<I2C: I2c> Ds1307<I2C> {
    pub fn new(bus: I2C) -> Self {
        Self { bus }
    }
}

impl<I2C: I2c> Rtc for Ds1307<I2C> {
    type Error = RtcError<I2C::Error>;

    async fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error> {
        let mut regs = [0u8; 7];
        self.bus.write_read(ADDRESS, &[SECONDS], &mut regs).await?;
        decode_ds_time(&regs).ok_or(RtcError::InvalidTime)
    }

    async fn set_datetime(&mut self, dt: &NaiveDateTime) -> Result<(), Self::Error> {
        let regs = encode_ds_time(dt).ok_or(RtcError::OutOfRange)?;
        let mut data = [0u8; 8];
        data[0] = SECONDS;
        data[1..].copy_from_slice(&regs);
        // Seconds are below 60, so the halt bit is clear and the clock runs.
        self.bus.write(ADDRESS, &data).await?;
        Ok(())
    }

    /// The DS1307 has no stop flag, a halted clock is the closest, that is its state after losing all power.
    async fn lost_power(&mut self) -> Result<bool, Self::Error> {
        let mut v = [0u8; 1];
        self.bus.write_read(ADDRESS, &[SECONDS], &mut v).await?;
        Ok(v[0] & CLOCK_HALT != 0)
    }
}

#[cfg(test)]
mod test {
    use super::super::test_util::MockI2c;
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_ds1307_starts_clock() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let bus = MockI2c::with_device(ADDRESS, &[(SECONDS, CLOCK_HALT | 0x12), (0x03, 1), (0x04, 1), (0x05, 1)]);
            let mut rtc = Ds1307::new(bus);
            assert!(rtc.lost_power().await?);
            // The halt bit is masked when decoding.
            assert_eq!(rtc.datetime().await?.to_string(), "2000-01-01 00:00:12");

            let dt = NaiveDate::from_ymd_opt(2031, 7, 4)
                .unwrap()
                .and_hms_opt(12, 0, 1)
                .unwrap();
            rtc.set_datetime(&dt).await?;
            assert!(!rtc.lost_power().await?);
            assert_eq!(rtc.datetime().await?, dt);
            assert_eq!(rtc.bus.writes, 7);
            Ok(())
        }())
    }
}
