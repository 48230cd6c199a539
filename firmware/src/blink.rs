//! Blink rate handling for the onboard LED.
//!
//! A rate of 0 turns the LED off, 1 blinks once every ~2 seconds and 100 toggles every 20 milliseconds. The
//! [`Blinker`] never waits, it is polled from the main loop and reports when the LED needs to change.
use embassy_time::{Duration, Instant};

/// Blink rate, always within `0..=100`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, defmt::Format)]
pub struct BlinkRate(u8);

impl BlinkRate {
    pub const MAX: u8 = 100;
    pub const OFF: BlinkRate = BlinkRate(0);

    /// Create a rate, clamping the value to the valid range.
    pub fn new(rate: i64) -> Self {
        Self(rate.clamp(0, Self::MAX as i64) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_off(&self) -> bool {
        self.0 == 0
    }

    /// Time between two toggles; 2.0s - rate * 19.8ms.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(2_000_000 - self.0 as u64 * 19_800)
    }
}

/// Anything that can show an on/off state.
#[allow(async_fn_in_trait)]
pub trait Led {
    async fn set(&mut self, on: bool);
}

/// Non blocking LED toggler.
#[derive(Debug, Copy, Clone)]
pub struct Blinker {
    rate: BlinkRate,
    led_on: bool,
    last_toggle: Instant,
    /// Set when the rate went to zero and the LED still has to be switched off.
    pending_off: bool,
}

impl Blinker {
    pub fn new(rate: BlinkRate, now: Instant) -> Self {
        Self {
            rate,
            led_on: false,
            last_toggle: now,
            pending_off: false,
        }
    }

    pub fn rate(&self) -> BlinkRate {
        self.rate
    }

    pub fn led_on(&self) -> bool {
        self.led_on
    }

    pub fn set_rate(&mut self, rate: BlinkRate) {
        if rate.is_off() && !self.rate.is_off() {
            self.pending_off = true;
        }
        self.rate = rate;
    }

    /// Force the LED state, used by the toggle button. With a non zero rate blinking continues from this state.
    pub fn set_led(&mut self, on: bool, now: Instant) {
        self.led_on = on;
        self.last_toggle = now;
    }

    /// When [`Blinker::update`] has something to do next, None while the LED is left alone.
    pub fn next_change(&self) -> Option<Instant> {
        if self.rate.is_off() {
            return self.pending_off.then_some(self.last_toggle);
        }
        Some(self.last_toggle + self.rate.interval())
    }

    /// Returns the new LED state if it has to change.
    pub fn update(&mut self, now: Instant) -> Option<bool> {
        if self.rate.is_off() {
            if self.pending_off {
                self.pending_off = false;
                self.led_on = false;
                return Some(false);
            }
            return None;
        }
        if now.saturating_duration_since(self.last_toggle) >= self.rate.interval() {
            self.led_on = !self.led_on;
            self.last_toggle = now;
            Some(self.led_on)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rate_clamping() {
        assert_eq!(BlinkRate::new(-5).value(), 0);
        assert_eq!(BlinkRate::new(42).value(), 42);
        assert_eq!(BlinkRate::new(1000).value(), 100);
        assert_eq!(BlinkRate::new(i64::MAX).value(), 100);
    }

    #[test]
    fn test_rate_interval() {
        assert_eq!(BlinkRate::new(0).interval(), Duration::from_secs(2));
        assert_eq!(BlinkRate::new(1).interval(), Duration::from_micros(1_980_200));
        assert_eq!(BlinkRate::new(50).interval(), Duration::from_millis(1010));
        assert_eq!(BlinkRate::new(100).interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_blinker_toggles() {
        let start = Instant::from_millis(1000);
        let mut b = Blinker::new(BlinkRate::new(100), start);
        assert_eq!(b.update(start + Duration::from_millis(10)), None);
        assert_eq!(b.update(start + Duration::from_millis(20)), Some(true));
        assert_eq!(b.update(start + Duration::from_millis(30)), None);
        assert_eq!(b.update(start + Duration::from_millis(40)), Some(false));
        assert_eq!(b.update(start + Duration::from_millis(65)), Some(true));
        assert!(b.led_on());
    }

    #[test]
    fn test_blinker_off() {
        let start = Instant::from_millis(0);
        let mut b = Blinker::new(BlinkRate::new(100), start);
        assert_eq!(b.update(start + Duration::from_millis(20)), Some(true));
        b.set_rate(BlinkRate::OFF);
        assert_eq!(b.update(start + Duration::from_millis(21)), Some(false));
        // Stays off, no further changes.
        assert_eq!(b.update(start + Duration::from_secs(10)), None);

        // Manual toggle with rate zero is left alone.
        b.set_led(true, start + Duration::from_secs(11));
        assert_eq!(b.update(start + Duration::from_secs(12)), None);
        assert!(b.led_on());
    }

    #[test]
    fn test_blinker_next_change() {
        let start = Instant::from_millis(500);
        let mut b = Blinker::new(BlinkRate::new(100), start);
        assert_eq!(b.next_change(), Some(start + Duration::from_millis(20)));
        assert_eq!(b.update(start + Duration::from_millis(25)), Some(true));
        assert_eq!(b.next_change(), Some(start + Duration::from_millis(45)));

        b.set_rate(BlinkRate::OFF);
        // Switching off is due right away.
        let due = b.next_change().unwrap();
        assert!(due <= start + Duration::from_millis(25));
        assert_eq!(b.update(due), Some(false));
        assert_eq!(b.next_change(), None);
    }
}
