//! Deferred reset after saving a file that is only read at boot.
//!
//! The save handler only schedules the reset, the server loop performs it once the deadline has passed. That way
//! the http response is flushed to the client before the board goes down.
use embassy_time::{Duration, Instant};

/// Time between saving the file and the reset.
pub const REBOOT_DELAY: Duration = Duration::from_secs(2);

/// The script that runs at boot, saving it restarts the board and deleting it is refused.
pub const BOOT_SCRIPT: &str = "code.py";

/// The runtime settings, only read at boot.
pub const SETTINGS_FILE: &str = "settings.txt";

const REBOOT_FILES: &[&str] = &[BOOT_SCRIPT, SETTINGS_FILE];

/// Whether saving this file should restart the board.
pub fn triggers_reboot(filename: &str) -> bool {
    let filename = filename.trim();
    REBOOT_FILES.iter().any(|f| f.eq_ignore_ascii_case(filename))
}

/// Whether this file may not be deleted.
pub fn is_protected(filename: &str) -> bool {
    BOOT_SCRIPT.eq_ignore_ascii_case(filename.trim())
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RebootSchedule {
    deadline: Option<Instant>,
}

impl RebootSchedule {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Schedule the reset at `now + REBOOT_DELAY`, rescheduling moves the deadline.
    pub fn schedule(&mut self, now: Instant) -> Instant {
        let deadline = now + REBOOT_DELAY;
        self.deadline = Some(deadline);
        deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn pending(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reboot_files() {
        assert!(triggers_reboot("code.py"));
        assert!(triggers_reboot(" CODE.PY "));
        assert!(triggers_reboot("Settings.txt"));
        assert!(!triggers_reboot("code.py.bak"));
        assert!(!triggers_reboot("main.py"));
        assert!(is_protected("Code.py"));
        assert!(!is_protected("settings.txt"));
    }

    #[test]
    fn test_schedule() {
        let mut s = RebootSchedule::new();
        let now = Instant::from_secs(10);
        assert!(!s.is_due(now));
        assert_eq!(s.pending(), None);

        let deadline = s.schedule(now);
        assert_eq!(deadline, Instant::from_secs(12));
        assert!(!s.is_due(now + Duration::from_millis(1999)));
        assert!(s.is_due(now + Duration::from_secs(2)));
        assert!(s.is_due(now + Duration::from_secs(60)));

        s.cancel();
        assert!(!s.is_due(now + Duration::from_secs(60)));
    }
}
