//! Alarm, periodic timer, timezone and uptime bookkeeping for the rtc manager program.
//!
//! Calendar time always comes from the clock chip and is passed in, the periodic timer and the uptime use the
//! monotonic clock, so setting the clock doesn't affect them.
use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike};
use core::fmt::Write;
use embassy_time::Instant;

/// The event log on the sd card.
pub const LOG_FILE: &str = "rtclog.csv";
/// First line of a new event log.
pub const LOG_HEADER: &str = "timestamp,event_type,additional_data\n";

/// Longest periodic interval, 23:59:59.
pub const MAX_INTERVAL_SECS: u32 = 23 * 3600 + 59 * 60 + 59;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
#[error("value out of range")]
pub struct OutOfRange;

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum EventKind {
    ProgramStart,
    TimeSet,
    AlarmSet,
    PeriodicTimerSet,
    AlarmsCleared,
    ManualLog,
    TimezoneSet,
    ProgramExit,
    AlarmTriggered,
    PeriodicTimer,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProgramStart => "PROGRAM_START",
            EventKind::TimeSet => "TIME_SET",
            EventKind::AlarmSet => "ALARM_SET",
            EventKind::PeriodicTimerSet => "PERIODIC_TIMER_SET",
            EventKind::AlarmsCleared => "ALARMS_CLEARED",
            EventKind::ManualLog => "MANUAL_LOG",
            EventKind::TimezoneSet => "TIMEZONE_SET",
            EventKind::ProgramExit => "PROGRAM_EXIT",
            EventKind::AlarmTriggered => "ALARM_TRIGGERED",
            EventKind::PeriodicTimer => "PERIODIC_TIMER",
        }
    }
}

/// Displays as `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DateTimeText(pub NaiveDateTime);
impl core::fmt::Display for DateTimeText {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let t = &self.0;
        write!(
            f,
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second()
        )
    }
}

/// Displays a number of seconds as `Xh Ym Zs`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Hms(pub u64);
impl core::fmt::Display for Hms {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}h {}m {}s", self.0 / 3600, (self.0 % 3600) / 60, self.0 % 60)
    }
}

/// Displays a timezone offset as `UTC+n` or `UTC-n`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UtcOffset(pub i8);
impl core::fmt::Display for UtcOffset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "UTC{:+}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeriodicTimer {
    pub interval_secs: u32,
    pub last: Instant,
}

/// What fired during a [`RtcManager::check`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Triggered {
    pub alarm: bool,
    pub periodic: bool,
}

impl Triggered {
    pub fn any(&self) -> bool {
        self.alarm || self.periodic
    }

    /// Events to log, alarm first.
    pub fn events(&self) -> impl Iterator<Item = EventKind> {
        [
            self.alarm.then_some(EventKind::AlarmTriggered),
            self.periodic.then_some(EventKind::PeriodicTimer),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone)]
pub struct RtcManager {
    timezone_hours: i8,
    alarm: Option<NaiveDateTime>,
    periodic: Option<PeriodicTimer>,
    start: Instant,
}

impl RtcManager {
    pub fn new(start: Instant) -> Self {
        Self {
            timezone_hours: 0,
            alarm: None,
            periodic: None,
            start,
        }
    }

    pub fn timezone_hours(&self) -> i8 {
        self.timezone_hours
    }

    pub fn set_timezone(&mut self, hours: i32) -> Result<(), OutOfRange> {
        if !(-12..=12).contains(&hours) {
            return Err(OutOfRange);
        }
        self.timezone_hours = hours as i8;
        Ok(())
    }

    pub fn timezone_label(&self) -> UtcOffset {
        UtcOffset(self.timezone_hours)
    }

    /// Clock time shifted by the timezone.
    pub fn local(&self, rtc_now: NaiveDateTime) -> NaiveDateTime {
        rtc_now
            .checked_add_signed(TimeDelta::hours(self.timezone_hours as i64))
            .unwrap_or(rtc_now)
    }

    /// The local time as `YYYY-MM-DD HH:MM:SS`.
    pub fn format_timestamp(&self, rtc_now: NaiveDateTime) -> DateTimeText {
        DateTimeText(self.local(rtc_now))
    }

    /// Set the alarm `offset_secs` after the current clock time, returns when it will go off.
    pub fn set_alarm(&mut self, rtc_now: NaiveDateTime, offset_secs: u32) -> NaiveDateTime {
        let at = rtc_now
            .checked_add_signed(TimeDelta::seconds(offset_secs as i64))
            .unwrap_or(rtc_now);
        self.alarm = Some(at);
        at
    }

    pub fn alarm(&self) -> Option<NaiveDateTime> {
        self.alarm
    }

    pub fn set_periodic(&mut self, interval_secs: u32, now: Instant) -> Result<(), OutOfRange> {
        if !(1..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            return Err(OutOfRange);
        }
        self.periodic = Some(PeriodicTimer {
            interval_secs,
            last: now,
        });
        Ok(())
    }

    pub fn periodic(&self) -> Option<PeriodicTimer> {
        self.periodic
    }

    /// Whole seconds until the periodic timer fires next, None without a timer or when it is due.
    pub fn next_periodic_in(&self, now: Instant) -> Option<u64> {
        let p = self.periodic?;
        let elapsed = now.saturating_duration_since(p.last).as_secs();
        (elapsed < p.interval_secs as u64).then(|| p.interval_secs as u64 - elapsed)
    }

    pub fn clear(&mut self) {
        self.alarm = None;
        self.periodic = None;
    }

    /// Fire the alarm once when the clock passed it, fire the periodic timer whenever its interval elapsed.
    pub fn check(&mut self, rtc_now: NaiveDateTime, now: Instant) -> Triggered {
        let mut triggered = Triggered::default();
        if self.alarm.is_some_and(|a| rtc_now >= a) {
            self.alarm = None;
            triggered.alarm = true;
        }
        if let Some(p) = self.periodic.as_mut() {
            if now.saturating_duration_since(p.last).as_secs() >= p.interval_secs as u64 {
                p.last = now;
                triggered.periodic = true;
            }
        }
        triggered
    }

    /// Print the trigger messages.
    pub fn write_triggered<W: Write + ?Sized>(
        &self,
        w: &mut W,
        triggered: Triggered,
        rtc_now: NaiveDateTime,
    ) -> core::fmt::Result {
        let ts = self.format_timestamp(rtc_now);
        if triggered.alarm {
            write!(w, "\n🔔 ALARM! Triggered at {ts}\n")?;
        }
        if triggered.periodic {
            write!(w, "\n⏰ PERIODIC TIMER! Triggered at {ts}\n")?;
        }
        Ok(())
    }

    pub fn uptime(&self, now: Instant) -> Hms {
        Hms(now.saturating_duration_since(self.start).as_secs())
    }

    /// One line of the event log, including the newline.
    pub fn csv_line<W: Write + ?Sized>(
        &self,
        w: &mut W,
        rtc_now: NaiveDateTime,
        event: EventKind,
        data: &str,
    ) -> core::fmt::Result {
        write!(w, "{},{},{}\n", self.format_timestamp(rtc_now), event.as_str(), data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_formatting() {
        assert_eq!(DateTimeText(at(9, 5, 3)).to_string(), "2025-06-01 09:05:03");
        assert_eq!(Hms(3 * 3600 + 62).to_string(), "3h 1m 2s");
        assert_eq!(UtcOffset(2).to_string(), "UTC+2");
        assert_eq!(UtcOffset(-5).to_string(), "UTC-5");
        assert_eq!(UtcOffset(0).to_string(), "UTC+0");
    }

    #[test]
    fn test_timezone() {
        let mut m = RtcManager::new(Instant::from_secs(0));
        assert_eq!(m.set_timezone(13), Err(OutOfRange));
        assert_eq!(m.set_timezone(-12), Ok(()));
        // Crosses midnight backwards.
        assert_eq!(m.format_timestamp(at(3, 0, 0)).to_string(), "2025-05-31 15:00:00");
        m.set_timezone(0).unwrap();
        assert_eq!(m.format_timestamp(at(3, 0, 0)).to_string(), "2025-06-01 03:00:00");
    }

    #[test]
    fn test_alarm_fires_once() {
        let mut m = RtcManager::new(Instant::from_secs(0));
        let when = m.set_alarm(at(23, 59, 0), 90);
        assert_eq!(when, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap().and_hms_opt(0, 0, 30).unwrap());
        let mono = Instant::from_secs(10);
        assert!(!m.check(at(23, 59, 59), mono).any());
        let t = m.check(when, mono);
        assert!(t.alarm && !t.periodic);
        assert_eq!(t.events().collect::<Vec<_>>(), vec![EventKind::AlarmTriggered]);
        assert_eq!(m.alarm(), None);
        assert!(!m.check(when, mono).any());
    }

    #[test]
    fn test_periodic_timer() {
        let mut m = RtcManager::new(Instant::from_secs(0));
        assert_eq!(m.set_periodic(0, Instant::from_secs(0)), Err(OutOfRange));
        assert_eq!(m.set_periodic(MAX_INTERVAL_SECS + 1, Instant::from_secs(0)), Err(OutOfRange));
        m.set_periodic(5, Instant::from_secs(100)).unwrap();
        let rtc = at(12, 0, 0);
        assert_eq!(m.next_periodic_in(Instant::from_secs(102)), Some(3));
        assert!(!m.check(rtc, Instant::from_millis(104_999)).periodic);
        assert!(m.check(rtc, Instant::from_secs(105)).periodic);
        assert!(!m.check(rtc, Instant::from_secs(109)).periodic);
        assert!(m.check(rtc, Instant::from_secs(111)).periodic);
        assert_eq!(m.next_periodic_in(Instant::from_secs(120)), None);

        m.clear();
        assert_eq!(m.periodic(), None);
        assert!(!m.check(rtc, Instant::from_secs(1000)).any());
    }

    #[test]
    fn test_csv_and_report() {
        let mut m = RtcManager::new(Instant::from_secs(5));
        m.set_timezone(1).unwrap();
        let mut s = String::new();
        m.csv_line(&mut s, at(10, 0, 0), EventKind::TimezoneSet, "UTC+1").unwrap();
        assert_eq!(s, "2025-06-01 11:00:00,TIMEZONE_SET,UTC+1\n");

        let mut s = String::new();
        let t = Triggered {
            alarm: true,
            periodic: true,
        };
        m.write_triggered(&mut s, t, at(10, 0, 0)).unwrap();
        assert!(s.contains("ALARM! Triggered at 2025-06-01 11:00:00"));
        assert!(s.contains("PERIODIC TIMER! Triggered at"));
        assert_eq!(m.uptime(Instant::from_secs(3605)).to_string(), "1h 0m 0s");
    }
}
