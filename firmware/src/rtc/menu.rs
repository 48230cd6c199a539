//! Line driven menu of the rtc manager.
//!
//! The menu never touches the hardware, it consumes one line of input at a time, writes its replies and hands the
//! program a list of [`MenuAction`]s to carry out. Prompts are written separately by [`Menu::prompt`], after the
//! program has executed the actions and checked the alarms.
use super::manager::{DateTimeText, EventKind, Hms, RtcManager};
use chrono::{NaiveDate, NaiveDateTime};
use core::fmt::Write;
use embassy_time::Instant;
use heapless::{String, Vec};

pub type EventData = String<64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    /// Write this time to the clock.
    SetRtc(NaiveDateTime),
    /// Append an event to the log on the sd card.
    LogEvent(EventKind, EventData),
    /// Leave the menu, the program keeps checking the alarms.
    Exit,
}

pub type Actions = Vec<MenuAction, 3>;

/// Current time from both clocks.
#[derive(Debug, Copy, Clone)]
pub struct Now {
    pub rtc: NaiveDateTime,
    pub mono: Instant,
}

/// One numeric question.
struct Field {
    prompt: &'static str,
    min: i32,
    max: i32,
    range: &'static str,
    invalid: &'static str,
}

const TIME_FIELDS: [Field; 6] = [
    Field {
        prompt: "Enter year (e.g., 2025): ",
        min: 2020,
        max: 2099,
        range: "Year must be between 2020 and 2099",
        invalid: "Please enter a valid year",
    },
    Field {
        prompt: "Enter month (1-12): ",
        min: 1,
        max: 12,
        range: "Month must be between 1 and 12",
        invalid: "Please enter a valid month",
    },
    Field {
        prompt: "Enter day (1-31): ",
        min: 1,
        max: 31,
        range: "Day must be between 1 and 31",
        invalid: "Please enter a valid day",
    },
    Field {
        prompt: "Enter hour (0-23, 24-hour format): ",
        min: 0,
        max: 23,
        range: "Hour must be between 0 and 23",
        invalid: "Please enter a valid hour",
    },
    Field {
        prompt: "Enter minute (0-59): ",
        min: 0,
        max: 59,
        range: "Minute must be between 0 and 59",
        invalid: "Please enter a valid minute",
    },
    Field {
        prompt: "Enter second (0-59): ",
        min: 0,
        max: 59,
        range: "Second must be between 0 and 59",
        invalid: "Please enter a valid second",
    },
];

const NUMBER: &str = "Please enter a valid number";

const ALARM_FIELDS: [Field; 3] = [
    Field {
        prompt: "Hours from now (0-23): ",
        min: 0,
        max: 23,
        range: "Hours must be between 0 and 23",
        invalid: NUMBER,
    },
    Field {
        prompt: "Minutes from now (0-59): ",
        min: 0,
        max: 59,
        range: "Minutes must be between 0 and 59",
        invalid: NUMBER,
    },
    Field {
        prompt: "Seconds from now (0-59): ",
        min: 0,
        max: 59,
        range: "Seconds must be between 0 and 59",
        invalid: NUMBER,
    },
];

const PERIODIC_FIELDS: [Field; 3] = [
    Field {
        prompt: "Hours interval (0-23): ",
        min: 0,
        max: 23,
        range: "Hours must be between 0 and 23",
        invalid: NUMBER,
    },
    Field {
        prompt: "Minutes interval (0-59): ",
        min: 0,
        max: 59,
        range: "Minutes must be between 0 and 59",
        invalid: NUMBER,
    },
    Field {
        prompt: "Seconds interval (1-59): ",
        min: 1,
        max: 59,
        range: "Seconds must be between 1 and 59",
        invalid: NUMBER,
    },
];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Main,
    SetTime { index: usize, values: [i32; 6] },
    Confirm { values: [i32; 6] },
    Alarm { index: usize, values: [i32; 3] },
    Periodic { index: usize, values: [i32; 3] },
    Timezone,
    Exited,
}

pub struct Menu {
    state: State,
    manager: RtcManager,
    sd_available: bool,
}

fn hms_secs(values: &[i32; 3]) -> u32 {
    (values[0] * 3600 + values[1] * 60 + values[2]) as u32
}

/// Parse one answer, writes the complaint and returns None when it doesn't fit the field.
fn ask<W: Write + ?Sized>(field: &Field, line: &str, out: &mut W) -> Option<i32> {
    match line.trim().parse::<i32>() {
        Ok(v) if (field.min..=field.max).contains(&v) => Some(v),
        Ok(_) => {
            let _ = writeln!(out, "{}", field.range);
            None
        }
        Err(_) => {
            let _ = writeln!(out, "{}", field.invalid);
            None
        }
    }
}

fn event(kind: EventKind, data: core::fmt::Arguments) -> MenuAction {
    let mut s = EventData::new();
    let _ = s.write_fmt(data);
    MenuAction::LogEvent(kind, s)
}

impl Menu {
    pub fn new(manager: RtcManager, sd_available: bool) -> Self {
        Self {
            state: State::Main,
            manager,
            sd_available,
        }
    }

    pub fn manager(&self) -> &RtcManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut RtcManager {
        &mut self.manager
    }

    pub fn sd_available(&self) -> bool {
        self.sd_available
    }

    pub fn exited(&self) -> bool {
        self.state == State::Exited
    }

    /// Greeting shown once at startup.
    pub fn start<W: Write + ?Sized>(&self, now: Now, out: &mut W) {
        let _ = writeln!(out, "\nCurrent RTC time: {}", self.manager.format_timestamp(now.rtc));
        if self.manager.timezone_hours() != 0 {
            let _ = writeln!(out, "Timezone: {}", self.manager.timezone_label());
        }
    }

    /// Write the prompt for the current state.
    pub fn prompt<W: Write + ?Sized>(&self, now: Now, out: &mut W) {
        let _ = match self.state {
            State::Main => self.write_menu(out),
            State::SetTime { index, .. } => write!(
                out,
                "Current RTC time: {}\n{}",
                self.manager.format_timestamp(now.rtc),
                TIME_FIELDS[index].prompt
            ),
            State::Confirm { .. } => write!(out, "Is this correct? (y/n): "),
            State::Alarm { index, .. } => write!(out, "{}", ALARM_FIELDS[index].prompt),
            State::Periodic { index, .. } => write!(out, "{}", PERIODIC_FIELDS[index].prompt),
            State::Timezone => write!(out, "Timezone offset hours (-12 to +12): "),
            State::Exited => Ok(()),
        };
    }

    fn write_menu<W: Write + ?Sized>(&self, out: &mut W) -> core::fmt::Result {
        writeln!(out, "\n--- Enhanced RTC Time Manager ---")?;
        writeln!(out, "Options:")?;
        writeln!(out, "  1 - Set time")?;
        writeln!(out, "  2 - Show current time")?;
        writeln!(out, "  3 - Set alarm")?;
        writeln!(out, "  4 - Set periodic timer")?;
        writeln!(out, "  5 - View alarms/timers")?;
        writeln!(out, "  6 - Clear alarms/timers")?;
        if self.sd_available {
            writeln!(out, "  7 - Log current time to SD")?;
        }
        writeln!(out, "  8 - Set timezone")?;
        writeln!(out, "  9 - Show uptime")?;
        writeln!(out, "  0 - Exit")?;
        write!(out, "Enter your choice: ")
    }

    /// Log only when there is somewhere to log to.
    fn log(&self, actions: &mut Actions, action: MenuAction) {
        if self.sd_available {
            let _ = actions.push(action);
        }
    }

    /// Handle one line of input.
    pub fn input<W: Write + ?Sized>(&mut self, line: &str, now: Now, out: &mut W) -> Actions {
        let mut actions = Actions::new();
        let line = line.trim();
        let state = self.state;
        self.state = match state {
            State::Main => self.choose(line, now, out, &mut actions),
            State::SetTime { index, mut values } => match ask(&TIME_FIELDS[index], line, out) {
                Some(v) => {
                    values[index] = v;
                    if index + 1 < TIME_FIELDS.len() {
                        State::SetTime {
                            index: index + 1,
                            values,
                        }
                    } else {
                        let [y, mo, d, h, mi, s] = values;
                        let _ = writeln!(out, "\nYou entered: {y}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}");
                        State::Confirm { values }
                    }
                }
                None => State::SetTime { index, values },
            },
            State::Confirm { values } => {
                let answer = line.to_ascii_lowercase();
                if answer == "y" || answer == "yes" {
                    let [y, mo, d, h, mi, s] = values;
                    match NaiveDate::from_ymd_opt(y, mo as u32, d as u32)
                        .and_then(|date| date.and_hms_opt(h as u32, mi as u32, s as u32))
                    {
                        Some(dt) => {
                            let _ = actions.push(MenuAction::SetRtc(dt));
                            let _ = writeln!(out, "RTC time has been set!");
                            self.log(&mut actions, event(EventKind::TimeSet, format_args!("")));
                        }
                        None => {
                            let _ = writeln!(out, "Error setting time: {y}-{mo:02}-{d:02} is not a valid date");
                        }
                    }
                } else {
                    let _ = writeln!(out, "Time setting cancelled.");
                }
                State::Main
            }
            State::Alarm { index, mut values } => match ask(&ALARM_FIELDS[index], line, out) {
                Some(v) => {
                    values[index] = v;
                    if index + 1 < ALARM_FIELDS.len() {
                        State::Alarm {
                            index: index + 1,
                            values,
                        }
                    } else {
                        let when = self.manager.set_alarm(now.rtc, hms_secs(&values));
                        let _ = writeln!(out, "Alarm set for: {}", DateTimeText(when));
                        let _ = writeln!(
                            out,
                            "That's in {}h {}m {}s from now",
                            values[0], values[1], values[2]
                        );
                        self.log(&mut actions, event(EventKind::AlarmSet, format_args!("")));
                        State::Main
                    }
                }
                None => State::Alarm { index, values },
            },
            State::Periodic { index, mut values } => match ask(&PERIODIC_FIELDS[index], line, out) {
                Some(v) => {
                    values[index] = v;
                    if index + 1 < PERIODIC_FIELDS.len() {
                        State::Periodic {
                            index: index + 1,
                            values,
                        }
                    } else {
                        let secs = hms_secs(&values);
                        match self.manager.set_periodic(secs, now.mono) {
                            Ok(()) => {
                                let _ = writeln!(out, "Periodic timer set for every {}", Hms(secs as u64));
                                let _ = writeln!(out, "Timer will trigger in the background during menu operation");
                                self.log(&mut actions, event(EventKind::PeriodicTimerSet, format_args!("")));
                            }
                            Err(e) => {
                                let _ = writeln!(out, "Error setting periodic timer: {e}");
                            }
                        }
                        State::Main
                    }
                }
                None => State::Periodic { index, values },
            },
            State::Timezone => {
                match line.parse::<i32>() {
                    Ok(offset) => match self.manager.set_timezone(offset) {
                        Ok(()) => {
                            let label = self.manager.timezone_label();
                            let _ = writeln!(out, "Timezone set to {label}");
                            self.log(&mut actions, event(EventKind::TimezoneSet, format_args!("{label}")));
                        }
                        Err(_) => {
                            let _ = writeln!(out, "Offset must be between -12 and +12");
                        }
                    },
                    Err(_) => {
                        let _ = writeln!(out, "{NUMBER}");
                    }
                }
                State::Main
            }
            State::Exited => State::Exited,
        };
        actions
    }

    fn choose<W: Write + ?Sized>(&mut self, choice: &str, now: Now, out: &mut W, actions: &mut Actions) -> State {
        let m = &mut self.manager;
        match choice {
            "1" => {
                let _ = writeln!(out, "\n--- Setting RTC Time ---\nEnter the current date and time:");
                return State::SetTime {
                    index: 0,
                    values: [0; 6],
                };
            }
            "2" => {
                let _ = writeln!(out, "Current RTC time: {}", m.format_timestamp(now.rtc));
                if m.timezone_hours() != 0 {
                    let _ = writeln!(out, "UTC time: {}", DateTimeText(now.rtc));
                }
            }
            "3" => {
                let _ = writeln!(out, "\n--- Setting Alarm ---\nSet alarm time (relative to current time):");
                return State::Alarm {
                    index: 0,
                    values: [0; 3],
                };
            }
            "4" => {
                let _ = writeln!(out, "\n--- Setting Periodic Timer ---\nSet periodic timer interval:");
                return State::Periodic {
                    index: 0,
                    values: [0; 3],
                };
            }
            "5" => {
                let _ = writeln!(out, "\n--- Alarms and Timers Status ---");
                let _ = match m.alarm() {
                    Some(a) => writeln!(out, "🔔 Alarm set for: {}", DateTimeText(a)),
                    None => writeln!(out, "🔔 No alarm set"),
                };
                match m.periodic() {
                    Some(p) => {
                        let _ = writeln!(out, "⏰ Periodic timer: every {}", Hms(p.interval_secs as u64));
                        if let Some(next) = m.next_periodic_in(now.mono) {
                            let _ = writeln!(out, "   Next trigger in: {}", Hms(next));
                        }
                    }
                    None => {
                        let _ = writeln!(out, "⏰ No periodic timer set");
                    }
                }
            }
            "6" => {
                m.clear();
                let _ = writeln!(out, "All alarms and timers cleared.");
                self.log(actions, event(EventKind::AlarmsCleared, format_args!("")));
            }
            "7" if self.sd_available => {
                let ts = m.format_timestamp(now.rtc);
                let _ = actions.push(event(EventKind::ManualLog, format_args!("User requested log at {ts}")));
                let _ = writeln!(out, "Current time logged to SD card");
            }
            "8" => {
                let _ = writeln!(
                    out,
                    "\n--- Setting Timezone ---\nEnter timezone offset from UTC (e.g., -5 for EST, +1 for CET)"
                );
                return State::Timezone;
            }
            "9" => {
                let _ = writeln!(out, "\nSystem uptime: {}", m.uptime(now.mono));
            }
            "0" => {
                let _ = writeln!(out, "Exiting Enhanced RTC Time Manager...");
                self.log(actions, event(EventKind::ProgramExit, format_args!("")));
                let _ = actions.push(MenuAction::Exit);
                return State::Exited;
            }
            _ => {
                let _ = writeln!(out, "Invalid choice. Please enter a valid option number.");
            }
        }
        State::Main
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn now(secs: u64) -> Now {
        Now {
            rtc: NaiveDate::from_ymd_opt(2025, 1, 15)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            mono: Instant::from_secs(secs),
        }
    }

    fn feed(menu: &mut Menu, lines: &[&str]) -> (std::string::String, std::vec::Vec<MenuAction>) {
        let mut out = std::string::String::new();
        let mut actions = vec![];
        for line in lines {
            actions.extend(menu.input(line, now(0), &mut out));
            menu.prompt(now(0), &mut out);
        }
        (out, actions)
    }

    #[test]
    fn test_menu_options() {
        let with_sd = Menu::new(RtcManager::new(Instant::from_secs(0)), true);
        let mut out = std::string::String::new();
        with_sd.prompt(now(0), &mut out);
        assert!(out.contains("  7 - Log current time to SD"));
        assert!(out.ends_with("Enter your choice: "));

        let mut without = Menu::new(RtcManager::new(Instant::from_secs(0)), false);
        let mut out = std::string::String::new();
        without.prompt(now(0), &mut out);
        assert!(!out.contains("  7 -"));
        let (out, actions) = feed(&mut without, &["7", "x"]);
        assert_eq!(out.matches("Invalid choice. Please enter a valid option number.").count(), 2);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_set_time() {
        let mut menu = Menu::new(RtcManager::new(Instant::from_secs(0)), true);
        let (out, actions) = feed(
            &mut menu,
            &["1", "1999", "2026", "13", "feb", "2", "28", "24", "23", "59", "60", "58", "yes"],
        );
        assert!(out.contains("Year must be between 2020 and 2099"));
        assert!(out.contains("Month must be between 1 and 12"));
        assert!(out.contains("Please enter a valid month"));
        assert!(out.contains("Hour must be between 0 and 23"));
        assert!(out.contains("Second must be between 0 and 59"));
        assert!(out.contains("Current RTC time: 2025-01-15 08:00:00\nEnter day (1-31): "));
        assert!(out.contains("You entered: 2026-02-28 23:59:58"));
        assert!(out.contains("RTC time has been set!"));
        let dt = NaiveDate::from_ymd_opt(2026, 2, 28)
            .unwrap()
            .and_hms_opt(23, 59, 58)
            .unwrap();
        assert_eq!(
            actions,
            vec![
                MenuAction::SetRtc(dt),
                MenuAction::LogEvent(EventKind::TimeSet, EventData::new())
            ]
        );
    }

    #[test]
    fn test_set_time_invalid_day_and_cancel() {
        let mut menu = Menu::new(RtcManager::new(Instant::from_secs(0)), false);
        let (out, actions) = feed(&mut menu, &["1", "2025", "2", "30", "0", "0", "0", "y"]);
        assert!(out.contains("Error setting time: 2025-02-30 is not a valid date"));
        assert!(actions.is_empty());

        let (out, actions) = feed(&mut menu, &["1", "2025", "2", "3", "0", "0", "0", "n"]);
        assert!(out.contains("Time setting cancelled."));
        assert!(actions.is_empty());
        assert!(out.ends_with("Enter your choice: "));
    }

    #[test]
    fn test_alarm_and_periodic() {
        let mut menu = Menu::new(RtcManager::new(Instant::from_secs(0)), true);
        let (out, actions) = feed(&mut menu, &["3", "1", "x", "2", "3", "4", "0", "0", "0", "10"]);
        assert!(out.contains("Alarm set for: 2025-01-15 09:02:03"));
        assert!(out.contains("That's in 1h 2m 3s from now"));
        assert!(out.contains("Please enter a valid number"));
        assert!(out.contains("Seconds must be between 1 and 59"));
        assert!(out.contains("Periodic timer set for every 0h 0m 10s"));
        assert_eq!(menu.manager().periodic().map(|p| p.interval_secs), Some(10));
        assert_eq!(
            actions,
            vec![
                MenuAction::LogEvent(EventKind::AlarmSet, EventData::new()),
                MenuAction::LogEvent(EventKind::PeriodicTimerSet, EventData::new())
            ]
        );

        let (out, _) = feed(&mut menu, &["5"]);
        assert!(out.contains("🔔 Alarm set for: 2025-01-15 09:02:03"));
        assert!(out.contains("⏰ Periodic timer: every 0h 0m 10s"));
        assert!(out.contains("   Next trigger in: 0h 0m 10s"));

        let (out, actions) = feed(&mut menu, &["6", "5"]);
        assert!(out.contains("All alarms and timers cleared."));
        assert!(out.contains("🔔 No alarm set"));
        assert!(out.contains("⏰ No periodic timer set"));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_timezone_and_exit() {
        let mut menu = Menu::new(RtcManager::new(Instant::from_secs(0)), true);
        let (out, actions) = feed(&mut menu, &["8", "14", "8", "+2", "2", "7"]);
        assert!(out.contains("Offset must be between -12 and +12"));
        assert!(out.contains("Timezone set to UTC+2"));
        assert!(out.contains("Current RTC time: 2025-01-15 10:00:00"));
        assert!(out.contains("UTC time: 2025-01-15 08:00:00"));
        let mut data = EventData::new();
        data.push_str("UTC+2").unwrap();
        assert_eq!(actions[0], MenuAction::LogEvent(EventKind::TimezoneSet, data));
        match &actions[1] {
            MenuAction::LogEvent(EventKind::ManualLog, d) => {
                assert_eq!(d.as_str(), "User requested log at 2025-01-15 10:00:00")
            }
            other => panic!("unexpected {other:?}"),
        }

        let (out, actions) = feed(&mut menu, &["9", "0"]);
        assert!(out.contains("System uptime: 0h 0m 0s"));
        assert!(out.contains("Exiting Enhanced RTC Time Manager..."));
        assert_eq!(actions.last(), Some(&MenuAction::Exit));
        assert!(menu.exited());
    }
}
