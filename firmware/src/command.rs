//! Commands accepted by the web console and run from `code.py` at boot.
//!
//! There is no interpreter on the board, instead a fixed set of commands is understood, anything that looks like an
//! integer expression is evaluated:
//! ```text
//! >>> blink 80
//! Blink rate set to 80
//! >>> (7 + 3) * -2
//! -20
//! ```
use crate::blink::{BlinkRate, Blinker};
use crate::files::{FileError, FileInfo, FileStore};
use crate::reboot::{is_protected, RebootSchedule, REBOOT_DELAY};
use crate::rtc::manager::Hms;
use core::fmt::Write;
use embassy_time::Instant;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum CommandError {
    #[error("unknown command, try 'help'")]
    Unknown,
    #[error("missing argument")]
    MissingArgument,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid number")]
    InvalidNumber,
    #[error("division by zero")]
    DivisionByZero,
    #[error("syntax error")]
    Syntax,
    #[error("overflow")]
    Overflow,
    #[error("cannot remove the boot script")]
    Protected,
    #[error("{0}")]
    File(#[from] FileError),
}

const HELP: &str = "help, version, uptime, blink [rate], led on|off, ls, cat <file>, rm <file>, echo <text>, clear, reboot, or an expression like (1 + 2) * 3";

/// Files shown by `ls`.
const LS_LIMIT: usize = 16;

/// Everything a command may touch.
pub struct CommandContext<'a, S> {
    pub store: &'a mut S,
    pub blinker: &'a mut Blinker,
    pub reboot: &'a mut RebootSchedule,
    pub now: Instant,
    /// Set by `clear`, the caller owns the console.
    pub clear_console: bool,
}

impl<'a, S: FileStore> CommandContext<'a, S> {
    pub fn new(store: &'a mut S, blinker: &'a mut Blinker, reboot: &'a mut RebootSchedule, now: Instant) -> Self {
        Self {
            store,
            blinker,
            reboot,
            now,
            clear_console: false,
        }
    }
}

/// Run a single command line, output goes to `out`.
pub async fn execute<S: FileStore, W: Write + ?Sized>(
    line: &str,
    ctx: &mut CommandContext<'_, S>,
    out: &mut W,
) -> Result<(), CommandError> {
    let line = line.trim();
    let (name, args) = match line.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (line, ""),
    };
    match name {
        "" => Ok(()),
        "help" => writeln(out, format_args!("{HELP}")),
        "version" => writeln(
            out,
            format_args!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        ),
        "uptime" => writeln(out, format_args!("Uptime: {}", Hms(ctx.now.as_secs()))),
        "blink" => {
            if args.is_empty() {
                return writeln(out, format_args!("Blink rate: {}", ctx.blinker.rate().value()));
            }
            let rate: i64 = args.parse().map_err(|_| CommandError::InvalidNumber)?;
            let rate = BlinkRate::new(rate);
            ctx.blinker.set_rate(rate);
            writeln(out, format_args!("Blink rate set to {}", rate.value()))
        }
        "led" => {
            let on = match args {
                "" => return Err(CommandError::MissingArgument),
                "on" | "1" => true,
                "off" | "0" => false,
                _ => return Err(CommandError::InvalidArgument),
            };
            ctx.blinker.set_led(on, ctx.now);
            writeln(out, format_args!("LED {}", if on { "on" } else { "off" }))
        }
        "ls" => {
            let mut files: heapless::Vec<FileInfo, LS_LIMIT> = heapless::Vec::new();
            let total = ctx.store.list(&mut files).await?;
            for f in files.iter() {
                writeln(out, format_args!("{:<12} {}", f.name, f.size))?;
            }
            if total > files.len() {
                writeln(out, format_args!("... {} more", total - files.len()))?;
            }
            Ok(())
        }
        "cat" => {
            if args.is_empty() {
                return Err(CommandError::MissingArgument);
            }
            let size = ctx.store.size(args).await?.ok_or(FileError::NotFound)?;
            let mut buf = [0u8; 512];
            let n = ctx.store.read(args, 0, &mut buf).await?;
            let text = match core::str::from_utf8(&buf[..n]) {
                Ok(t) => t,
                Err(e) => core::str::from_utf8(&buf[..e.valid_up_to()]).unwrap_or_default(),
            };
            writeln(out, format_args!("{}", text.trim_end()))?;
            if size as usize > n {
                writeln(out, format_args!("... ({size} bytes)"))?;
            }
            Ok(())
        }
        "rm" => {
            if args.is_empty() {
                return Err(CommandError::MissingArgument);
            }
            if is_protected(args) {
                return Err(CommandError::Protected);
            }
            ctx.store.remove(args).await?;
            writeln(out, format_args!("Removed {args}"))
        }
        "echo" => writeln(out, format_args!("{args}")),
        "clear" => {
            ctx.clear_console = true;
            Ok(())
        }
        "reboot" => {
            ctx.reboot.schedule(ctx.now);
            writeln(out, format_args!("Rebooting in {} seconds...", REBOOT_DELAY.as_secs()))
        }
        _ if line.starts_with(|c: char| c.is_ascii_digit() || "(-+".contains(c)) => {
            let v = evaluate(line)?;
            writeln(out, format_args!("{v}"))
        }
        _ => Err(CommandError::Unknown),
    }
}

/// Output that doesn't fit is dropped, that is not an error of the command.
fn writeln<W: Write + ?Sized>(out: &mut W, args: core::fmt::Arguments) -> Result<(), CommandError> {
    let _ = out.write_fmt(args);
    let _ = out.write_char('\n');
    Ok(())
}

/// Evaluate an integer expression with `+ - * / %`, parentheses and unary minus.
///
/// Division and remainder round towards negative infinity.
pub fn evaluate(expression: &str) -> Result<i64, CommandError> {
    let mut p = Parser {
        s: expression.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let v = p.expr()?;
    p.skip_ws();
    if p.pos != p.s.len() {
        return Err(CommandError::Syntax);
    }
    Ok(v)
}

const MAX_DEPTH: usize = 32;

struct Parser<'a> {
    s: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.s.get(self.pos).is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.s.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<i64, CommandError> {
        let mut v = self.term()?;
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            v = if op == b'+' { v.checked_add(rhs) } else { v.checked_sub(rhs) }.ok_or(CommandError::Overflow)?;
        }
        Ok(v)
    }

    fn term(&mut self) -> Result<i64, CommandError> {
        let mut v = self.unary()?;
        while let Some(op @ (b'*' | b'/' | b'%')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            v = match op {
                b'*' => v.checked_mul(rhs).ok_or(CommandError::Overflow)?,
                b'/' => floor_div(v, rhs)?,
                _ => floor_rem(v, rhs)?,
            };
        }
        Ok(v)
    }

    fn unary(&mut self) -> Result<i64, CommandError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                self.nested(|p| p.unary())?.checked_neg().ok_or(CommandError::Overflow)
            }
            Some(b'+') => {
                self.pos += 1;
                self.nested(|p| p.unary())
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<i64, CommandError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let v = self.nested(|p| p.expr())?;
                if self.peek() != Some(b')') {
                    return Err(CommandError::Syntax);
                }
                self.pos += 1;
                Ok(v)
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.s.get(self.pos).is_some_and(|c| c.is_ascii_digit() || *c == b'_') {
                    self.pos += 1;
                }
                let mut v: i64 = 0;
                for d in self.s[start..self.pos].iter().filter(|c| **c != b'_') {
                    v = v
                        .checked_mul(10)
                        .and_then(|v| v.checked_add((d - b'0') as i64))
                        .ok_or(CommandError::Overflow)?;
                }
                Ok(v)
            }
            Some(c) if c.is_ascii_alphabetic() => Err(CommandError::InvalidNumber),
            _ => Err(CommandError::Syntax),
        }
    }

    /// Limit recursion, the stack is small.
    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<i64, CommandError>) -> Result<i64, CommandError> {
        if self.depth >= MAX_DEPTH {
            return Err(CommandError::Syntax);
        }
        self.depth += 1;
        let r = f(self);
        self.depth -= 1;
        r
    }
}

fn floor_div(a: i64, b: i64) -> Result<i64, CommandError> {
    if b == 0 {
        return Err(CommandError::DivisionByZero);
    }
    let q = a.checked_div(b).ok_or(CommandError::Overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_rem(a: i64, b: i64) -> Result<i64, CommandError> {
    if b == 0 {
        return Err(CommandError::DivisionByZero);
    }
    let r = a.checked_rem(b).ok_or(CommandError::Overflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::files::RamFileStore;
    use embassy_time::Duration;

    #[test]
    fn test_evaluate() {
        assert_eq!(evaluate("1+1"), Ok(2));
        assert_eq!(evaluate(" (7 + 3) * -2 "), Ok(-20));
        assert_eq!(evaluate("2 + 3 * 4 - 1"), Ok(13));
        assert_eq!(evaluate("1_000 / 7"), Ok(142));
        assert_eq!(evaluate("-7 / 2"), Ok(-4));
        assert_eq!(evaluate("-7 % 3"), Ok(2));
        assert_eq!(evaluate("7 % -3"), Ok(-2));
        assert_eq!(evaluate("--5"), Ok(5));
        assert_eq!(evaluate("1 / 0"), Err(CommandError::DivisionByZero));
        assert_eq!(evaluate("5 % 0"), Err(CommandError::DivisionByZero));
        assert_eq!(evaluate("9223372036854775807 + 1"), Err(CommandError::Overflow));
        assert_eq!(evaluate("-9223372036854775807 - 1"), Ok(i64::MIN));
        assert_eq!(evaluate("(-9223372036854775807 - 1) / -1"), Err(CommandError::Overflow));
        assert_eq!(evaluate("(1 + 2"), Err(CommandError::Syntax));
        assert_eq!(evaluate("1 2"), Err(CommandError::Syntax));
        assert_eq!(evaluate("1 + x"), Err(CommandError::InvalidNumber));
        assert_eq!(evaluate(&"(".repeat(100)), Err(CommandError::Syntax));
    }

    struct Fixture {
        store: RamFileStore<20, 1024>,
        blinker: Blinker,
        reboot: RebootSchedule,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: RamFileStore::new(),
                blinker: Blinker::new(BlinkRate::new(10), Instant::from_secs(0)),
                reboot: RebootSchedule::new(),
            }
        }

        async fn run(&mut self, line: &str) -> (Result<(), CommandError>, String, bool) {
            let mut ctx = CommandContext::new(
                &mut self.store,
                &mut self.blinker,
                &mut self.reboot,
                Instant::from_secs(3723),
            );
            let mut out = String::new();
            let r = execute(line, &mut ctx, &mut out).await;
            let clear = ctx.clear_console;
            (r, out, clear)
        }
    }

    #[test]
    fn test_commands() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut f = Fixture::new();
            assert_eq!(f.run("uptime").await.1, "Uptime: 1h 2m 3s\n");
            assert_eq!(f.run("blink").await.1, "Blink rate: 10\n");
            assert_eq!(f.run("blink 250").await.1, "Blink rate set to 100\n");
            assert_eq!(f.blinker.rate().value(), 100);
            assert_eq!(f.run("blink fast").await.0, Err(CommandError::InvalidNumber));
            assert_eq!(f.run("led on").await.1, "LED on\n");
            assert!(f.blinker.led_on());
            assert_eq!(f.run("led").await.0, Err(CommandError::MissingArgument));
            assert_eq!(f.run("led maybe").await.0, Err(CommandError::InvalidArgument));
            assert_eq!(f.run("echo  hello world ").await.1, "hello world\n");
            assert_eq!(f.run("3 * 4").await.1, "12\n");
            assert_eq!(f.run("import os").await.0, Err(CommandError::Unknown));
            assert!(f.run("version").await.1.starts_with("pico_demos "));
            assert!(f.run("help").await.1.contains("blink [rate]"));
            assert_eq!(f.run("").await, (Ok(()), String::new(), false));

            let (r, out, clear) = f.run("clear").await;
            assert_eq!((r, out.as_str(), clear), (Ok(()), "", true));

            assert_eq!(f.run("reboot").await.1, "Rebooting in 2 seconds...\n");
            assert_eq!(f.reboot.pending(), Some(Instant::from_secs(3723) + Duration::from_secs(2)));
            Ok(())
        }())
    }

    #[test]
    fn test_file_commands() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut f = Fixture::new();
            f.store.write("code.py", b"blink 5\n").await?;
            f.store.write("b.txt", b"bee").await?;
            f.store.write("a.txt", &[b'x'; 600]).await?;

            let (_, out, _) = f.run("ls").await;
            assert_eq!(out, "a.txt        600\nb.txt        3\ncode.py      8\n");

            assert_eq!(f.run("cat code.py").await.1, "blink 5\n");
            let (_, out, _) = f.run("cat a.txt").await;
            assert!(out.ends_with("\n... (600 bytes)\n"));
            assert_eq!(f.run("cat").await.0, Err(CommandError::MissingArgument));
            assert_eq!(
                f.run("cat nope.txt").await.0,
                Err(CommandError::File(FileError::NotFound))
            );

            assert_eq!(f.run("rm CODE.PY").await.0, Err(CommandError::Protected));
            assert_eq!(f.run("rm b.txt").await.1, "Removed b.txt\n");
            assert!(!f.store.exists("b.txt").await?);
            Ok(())
        }())
    }

    #[test]
    fn test_ls_many_files() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut f = Fixture::new();
            for i in (0..18).rev() {
                f.store.write(&format!("n{i:02}.txt"), b"").await?;
            }
            let (r, out, _) = f.run("ls").await;
            assert_eq!(r, Ok(()));
            let lines: Vec<&str> = out.lines().collect();
            assert_eq!(lines.len(), LS_LIMIT + 1);
            assert_eq!(lines[0], "n00.txt      0");
            assert_eq!(lines[LS_LIMIT - 1], "n15.txt      0");
            assert_eq!(lines[LS_LIMIT], "... 2 more");
            Ok(())
        }())
    }
}
