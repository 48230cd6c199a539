//! Bounded console log, mirrors everything that is printed so the web page can show it.
//!
//! The log holds at most `N` entries, when full the oldest entry is dropped to make room.
use core::fmt::Write;
use heapless::{Deque, String};

/// Number of entries kept on the device.
pub const CONSOLE_CAPACITY: usize = 1000;
/// Longest message stored per entry, longer messages are truncated.
pub const CONSOLE_LINE_LENGTH: usize = 80;

/// The console as used by the programs.
pub type Console = ConsoleLog<CONSOLE_CAPACITY, CONSOLE_LINE_LENGTH>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEntry<const L: usize> {
    /// Milliseconds since boot.
    pub time_ms: u64,
    /// The message, always ends with a newline.
    pub message: String<L>,
}

impl<const L: usize> ConsoleEntry<L> {
    /// Write as `{"time": seconds, "message": "..."}`.
    pub fn write_json<W: Write + ?Sized>(&self, w: &mut W) -> core::fmt::Result {
        write!(
            w,
            "{{\"time\":{}.{:03},\"message\":",
            self.time_ms / 1000,
            self.time_ms % 1000
        )?;
        crate::json::write_str(w, &self.message)?;
        w.write_char('}')
    }
}

pub struct ConsoleLog<const N: usize, const L: usize> {
    entries: Deque<ConsoleEntry<L>, N>,
    echo: Option<fn(&str)>,
}

impl<const N: usize, const L: usize> Default for ConsoleLog<N, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const L: usize> ConsoleLog<N, L> {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
            echo: None,
        }
    }

    /// Every logged message is also passed to this function, used to print to the serial terminal.
    pub fn set_echo(&mut self, echo: fn(&str)) {
        self.echo = Some(echo);
    }

    /// Append a message, a newline is added.
    pub fn log(&mut self, time_ms: u64, message: &str) {
        if let Some(echo) = self.echo {
            echo(message);
        }
        let mut stored: String<L> = String::new();
        // Keep one byte for the newline.
        for c in message.chars() {
            if stored.len() + c.len_utf8() + 1 > L {
                break;
            }
            let _ = stored.push(c);
        }
        let _ = stored.push('\n');

        if self.entries.is_full() {
            self.entries.pop_front();
        }
        let _ = self.entries.push_back(ConsoleEntry {
            time_ms,
            message: stored,
        });
    }

    /// Format and append a message.
    pub fn log_fmt(&mut self, time_ms: u64, args: core::fmt::Arguments) {
        let mut line: String<L> = String::new();
        let mut w = Truncating(&mut line);
        let _ = w.write_fmt(args);
        self.log(time_ms, line.as_str());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConsoleEntry<L>> {
        self.entries.iter()
    }

    /// Write the log as a json list of `{"time": seconds, "message": "..."}` objects.
    pub fn write_json<W: Write + ?Sized>(&self, w: &mut W) -> core::fmt::Result {
        w.write_char('[')?;
        for (i, entry) in self.entries.iter().enumerate() {
            if i != 0 {
                w.write_char(',')?;
            }
            entry.write_json(w)?;
        }
        w.write_char(']')
    }
}

/// Writer that silently drops whatever does not fit.
struct Truncating<'a, const L: usize>(&'a mut String<L>);
impl<const L: usize> Write for Truncating<'_, L> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_console_evicts_oldest() {
        let mut log: ConsoleLog<4, 32> = ConsoleLog::new();
        for i in 0..10u64 {
            log.log_fmt(i, format_args!("line {i}"));
            assert!(log.len() <= 4);
        }
        assert_eq!(log.len(), 4);
        let first = log.iter().next().unwrap();
        assert_eq!(first.time_ms, 6);
        assert_eq!(first.message.as_str(), "line 6\n");
    }

    #[test]
    fn test_console_capacity() {
        let mut log: Box<Console> = Box::new(Console::new());
        for i in 0..(CONSOLE_CAPACITY as u64 + 25) {
            log.log(i, "x");
        }
        assert_eq!(log.len(), CONSOLE_CAPACITY);
        assert_eq!(log.iter().next().map(|e| e.time_ms), Some(25));
    }

    #[test]
    fn test_console_truncates() {
        let mut log: ConsoleLog<2, 8> = ConsoleLog::new();
        log.log(0, "abcdefghijkl");
        assert_eq!(log.iter().next().unwrap().message.as_str(), "abcdefg\n");
        // Multi byte characters are never split.
        log.log(0, "ééééé");
        assert_eq!(log.iter().nth(1).unwrap().message.as_str(), "ééé\n");
    }

    #[test]
    fn test_console_json_and_echo() {
        static ECHOED: AtomicUsize = AtomicUsize::new(0);
        fn echo(s: &str) {
            ECHOED.fetch_add(s.len(), Ordering::Relaxed);
        }
        let mut log: ConsoleLog<4, 32> = ConsoleLog::new();
        log.set_echo(echo);
        log.log(1500, "hello \"you\"");
        log.log(20, ">>> 1+1");
        let mut s = std::string::String::new();
        log.write_json(&mut s).unwrap();
        assert_eq!(
            s,
            r#"[{"time":1.500,"message":"hello \"you\"\n"},{"time":0.020,"message":">>> 1+1\n"}]"#
        );
        assert_eq!(ECHOED.load(Ordering::Relaxed), 18);

        log.clear();
        let mut s = std::string::String::new();
        log.write_json(&mut s).unwrap();
        assert_eq!(s, "[]");
    }
}
