//! The web pages and json api, shared by the web IDE and the blink menu programs.
//!
//! Everything is answered from a single [`WebApp::handle`] call per request, large bodies (files, the console) are
//! streamed in small pieces so nothing big is ever built in memory.
use crate::blink::{BlinkRate, Blinker};
use crate::command::{self, CommandContext};
use crate::console::Console;
use crate::files::{validate_name, FileError, FileInfo, FileStore};
use crate::http::{content_type, Chunk, HttpError, Method, Request, Response, Status};
use crate::json::{self, EscapedStr, EscapedStringFragment};
use crate::reboot::{is_protected, triggers_reboot, RebootSchedule};
use core::fmt::Write as _;
use embassy_time::Instant;
use embedded_io_async::Write;
use serde::Deserialize;

pub const EDITOR_HTML: &str = include_str!("../www/editor.html");
pub const MENU_HTML: &str = include_str!("../www/menu.html");
pub const BLINK_HTML: &str = include_str!("../www/blink.html");
/// Placeholder page, `{{name}}` is replaced with the page name.
pub const HOOK_HTML: &str = include_str!("../www/hook.html");
pub const STYLES_CSS: &str = include_str!("../www/styles.css");

/// Served instead of the built in editor when present in the store.
pub const INDEX_FILE: &str = "index.htm";
/// Served instead of the built in stylesheet when present in the store.
pub const STYLES_FILE: &str = "styles.css";
/// Written to files made with `/create_file`.
pub const NEW_FILE_CONTENT: &str = "# New file\n";

/// Longest command accepted from `/send_command`.
const MAX_COMMAND: usize = 128;
/// Longest file name accepted in a request, before validation.
const MAX_REQUEST_NAME: usize = 64;
/// Files listed by `/list_files`.
const MAX_LISTED: usize = 32;
/// Saves are written here first and only replace the target once complete.
pub const SAVE_SCRATCH: &str = "~saving.tmp";

/// What `GET /` shows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum HomePage {
    /// The editor and console, `index.htm` from the store if there is one.
    Editor,
    /// The control panel menu.
    Menu,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Route {
    Home,
    Styles,
    Editor,
    Console,
    Blink,
    Hook(u8),
    SaveFile,
    LoadFile,
    ListFiles,
    DeleteFile,
    CreateFile,
    GetConsole,
    SendCommand,
    GetBlink,
    SetBlink,
    Toggle,
}

impl Route {
    fn from_path(path: &str) -> Option<Route> {
        Some(match path {
            "/" | "/index.html" => Route::Home,
            "/styles.css" => Route::Styles,
            "/editor" | "/hook1" => Route::Editor,
            "/console" => Route::Console,
            "/blink" => Route::Blink,
            "/hook2" => Route::Hook(2),
            "/hook3" => Route::Hook(3),
            "/hook4" => Route::Hook(4),
            "/hook5" => Route::Hook(5),
            "/hook6" => Route::Hook(6),
            "/save_file" => Route::SaveFile,
            "/load_file" => Route::LoadFile,
            "/list_files" => Route::ListFiles,
            "/delete_file" => Route::DeleteFile,
            "/create_file" => Route::CreateFile,
            "/get_console" => Route::GetConsole,
            "/send_command" => Route::SendCommand,
            "/get_blink" => Route::GetBlink,
            "/set_blink" => Route::SetBlink,
            "/toggle" => Route::Toggle,
            _ => return None,
        })
    }

    fn method(&self) -> Method {
        match self {
            Route::SaveFile
            | Route::LoadFile
            | Route::DeleteFile
            | Route::CreateFile
            | Route::SendCommand
            | Route::SetBlink
            | Route::Toggle => Method::Post,
            _ => Method::Get,
        }
    }
}

#[derive(Deserialize)]
struct SaveBody<'a> {
    #[serde(borrow)]
    filename: EscapedStr<'a>,
    #[serde(borrow)]
    content: EscapedStr<'a>,
}

#[derive(Deserialize)]
struct NameBody<'a> {
    #[serde(borrow)]
    filename: EscapedStr<'a>,
}

#[derive(Deserialize)]
struct CommandBody<'a> {
    #[serde(borrow)]
    command: EscapedStr<'a>,
}

#[derive(Deserialize)]
struct RateBody {
    rate: i64,
}

/// Client side problems are a 400, the rest is on us.
fn file_error_status(e: &FileError) -> Status {
    match e {
        FileError::InvalidName | FileError::AlreadyExists | FileError::TooLarge => Status::BadRequest,
        FileError::NotFound => Status::NotFound,
        FileError::NoSpace | FileError::Io => Status::InternalServerError,
    }
}

/// Unescaped and trimmed file name from the request, empty if it didn't fit.
fn request_name(s: &EscapedStr<'_>) -> heapless::String<MAX_REQUEST_NAME> {
    let name: heapless::String<MAX_REQUEST_NAME> = json::unescape_string(s).unwrap_or_default();
    let mut trimmed = heapless::String::new();
    let _ = trimmed.push_str(name.trim());
    trimmed
}

/// State behind the web pages.
pub struct WebApp<'a, S> {
    pub home: HomePage,
    pub console: &'a mut Console,
    pub blinker: Blinker,
    pub reboot: RebootSchedule,
    pub store: S,
}

impl<'a, S: FileStore> WebApp<'a, S> {
    pub fn new(home: HomePage, console: &'a mut Console, blinker: Blinker, store: S) -> Self {
        Self {
            home,
            console,
            blinker,
            reboot: RebootSchedule::new(),
            store,
        }
    }

    /// Print to the console log.
    pub fn log(&mut self, now: Instant, args: core::fmt::Arguments) {
        self.console.log_fmt(now.as_millis(), args);
    }

    /// Run a command line and log its output, as if it was typed in the console.
    pub async fn run_command(&mut self, line: &str, now: Instant) {
        self.log(now, format_args!(">>> {line}"));
        let mut output: Chunk<512> = Chunk::default();
        let (result, clear) = {
            let mut ctx = CommandContext::new(&mut self.store, &mut self.blinker, &mut self.reboot, now);
            let r = command::execute(line, &mut ctx, &mut output).await;
            (r, ctx.clear_console)
        };
        if clear {
            self.console.clear();
        }
        for l in output.0.lines() {
            self.console.log(now.as_millis(), l);
        }
        if let Err(e) = result {
            self.log(now, format_args!("Error: {e}"));
        }
    }

    /// Earliest of the next LED change and the pending reset, what the server loop has to wake up for.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.blinker.next_change(), self.reboot.pending()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Answer a single request.
    pub async fn handle<C: Write>(
        &mut self,
        req: &Request<'_>,
        now: Instant,
        resp: &mut Response<'_, C>,
    ) -> Result<(), HttpError> {
        let Some(route) = Route::from_path(req.path) else {
            return resp.send(Status::NotFound, content_type::TEXT, "Not found").await;
        };
        if route.method() != req.method {
            return resp
                .send(Status::MethodNotAllowed, content_type::TEXT, "Method not allowed")
                .await;
        }
        match route {
            Route::Home => match self.home {
                HomePage::Menu => resp.send(Status::Ok, content_type::HTML, MENU_HTML).await,
                HomePage::Editor => {
                    if !self.send_file(INDEX_FILE, content_type::HTML, resp).await? {
                        resp.send(Status::Ok, content_type::HTML, EDITOR_HTML).await?;
                    }
                    Ok(())
                }
            },
            Route::Styles => {
                if !self.send_file(STYLES_FILE, content_type::CSS, resp).await? {
                    resp.send(Status::Ok, content_type::CSS, STYLES_CSS).await?;
                }
                Ok(())
            }
            Route::Editor | Route::Console => resp.send(Status::Ok, content_type::HTML, EDITOR_HTML).await,
            Route::Blink => resp.send(Status::Ok, content_type::HTML, BLINK_HTML).await,
            Route::Hook(n) => {
                resp.start(Status::Ok, content_type::HTML).await?;
                for (i, part) in HOOK_HTML.split("{{name}}").enumerate() {
                    if i != 0 {
                        resp.body_fmt(format_args!("Hook {n}")).await?;
                    }
                    resp.body_str(part).await?;
                }
                Ok(())
            }
            Route::SaveFile => self.save_file(req.body, now, resp).await,
            Route::LoadFile => self.load_file(req.body, resp).await,
            Route::ListFiles => self.list_files(now, resp).await,
            Route::DeleteFile => self.delete_file(req.body, now, resp).await,
            Route::CreateFile => self.create_file(req.body, now, resp).await,
            Route::GetConsole => self.get_console(resp).await,
            Route::SendCommand => {
                let command: heapless::String<MAX_COMMAND> = match json::from_body::<CommandBody>(req.body)
                    .and_then(|b| json::unescape_string(&b.command))
                {
                    Ok(c) => c,
                    Err(e) => {
                        resp.start(Status::BadRequest, content_type::TEXT).await?;
                        return resp.body_fmt(format_args!("Error: {e}")).await;
                    }
                };
                let command = command.trim();
                if command.is_empty() {
                    return resp.send(Status::BadRequest, content_type::TEXT, "Command required").await;
                }
                self.run_command(command, now).await;
                resp.send(Status::Ok, content_type::TEXT, "Command executed").await
            }
            Route::GetBlink => {
                resp.start(Status::Ok, content_type::JSON).await?;
                resp.body_fmt(format_args!("{{\"rate\":{}}}", self.blinker.rate().value()))
                    .await
            }
            Route::SetBlink => match json::from_body::<RateBody>(req.body) {
                Ok(body) => {
                    let rate = BlinkRate::new(body.rate);
                    self.blinker.set_rate(rate);
                    self.log(now, format_args!("Blink rate set to {}", rate.value()));
                    resp.send(Status::Ok, content_type::TEXT, "Blink rate updated").await
                }
                Err(_) => resp.send(Status::BadRequest, content_type::TEXT, "Error updating rate").await,
            },
            Route::Toggle => {
                let on = !self.blinker.led_on();
                self.blinker.set_led(on, now);
                self.log(now, format_args!("LED {}", if on { "on" } else { "off" }));
                resp.send(Status::Ok, content_type::HTML, MENU_HTML).await
            }
        }
    }

    /// Stream a file from the store, false if it doesn't exist.
    async fn send_file<C: Write>(
        &mut self,
        name: &str,
        content_type: &str,
        resp: &mut Response<'_, C>,
    ) -> Result<bool, HttpError> {
        let Ok(Some(size)) = self.store.size(name).await else {
            return Ok(false);
        };
        resp.start(Status::Ok, content_type).await?;
        let mut buf = [0u8; 512];
        let mut offset = 0;
        while offset < size {
            let n = self
                .store
                .read(name, offset, &mut buf)
                .await
                .map_err(|_| HttpError::Io)?;
            if n == 0 {
                break;
            }
            resp.body_bytes(&buf[..n]).await?;
            offset += n as u32;
        }
        Ok(true)
    }

    async fn save_file<C: Write>(&mut self, body: &[u8], now: Instant, resp: &mut Response<'_, C>) -> Result<(), HttpError> {
        let body: SaveBody = match json::from_body(body) {
            Ok(b) => b,
            Err(e) => {
                resp.start(Status::BadRequest, content_type::TEXT).await?;
                return resp.body_fmt(format_args!("Error saving file: {e}")).await;
            }
        };
        let filename = request_name(&body.filename);
        if filename.is_empty() {
            return resp.send(Status::BadRequest, content_type::TEXT, "Filename required").await;
        }
        if body.content.fragments().any(|f| f.is_err()) {
            resp.start(Status::BadRequest, content_type::TEXT).await?;
            return resp
                .body_fmt(format_args!("Error saving file: {}", json::JsonError::InvalidEscape))
                .await;
        }
        if let Err(e) = self.store_content(&filename, &body.content).await {
            self.log(now, format_args!("ERROR: Error saving file: {e}"));
            resp.start(file_error_status(&e), content_type::TEXT).await?;
            return resp.body_fmt(format_args!("Error saving file: {e}")).await;
        }
        self.log(now, format_args!("SUCCESS: File saved: {filename}"));

        resp.start(Status::Ok, content_type::TEXT).await?;
        if triggers_reboot(&filename) {
            self.log(now, format_args!("REBOOT: {filename} saved - scheduling reboot in 2 seconds..."));
            self.reboot.schedule(now);
            resp.body_fmt(format_args!("File saved: {filename} - Rebooting to apply changes..."))
                .await
        } else {
            resp.body_fmt(format_args!("File saved: {filename}")).await
        }
    }

    /// Write the content next to the file and swap it in afterwards, a failed save leaves the old file as it was.
    async fn store_content(&mut self, name: &str, content: &EscapedStr<'_>) -> Result<(), FileError> {
        validate_name(name)?;
        let r = match self.write_escaped(SAVE_SCRATCH, content).await {
            Ok(()) => self.store.replace(SAVE_SCRATCH, name).await,
            Err(e) => Err(e),
        };
        if r.is_err() {
            let _ = self.store.remove(SAVE_SCRATCH).await;
        }
        r
    }

    /// Unescape the json string into the file in small pieces, the escapes must have been checked.
    async fn write_escaped(&mut self, name: &str, content: &EscapedStr<'_>) -> Result<(), FileError> {
        self.store.write(name, &[]).await?;
        let mut pending: heapless::Vec<u8, 256> = heapless::Vec::new();
        for fragment in content.fragments().flatten() {
            let mut char_buf = [0u8; 4];
            let mut bytes = match fragment {
                EscapedStringFragment::NotEscaped(v) => v.as_bytes(),
                EscapedStringFragment::Escaped(c) => c.encode_utf8(&mut char_buf).as_bytes(),
            };
            while !bytes.is_empty() {
                let room = pending.capacity() - pending.len();
                let n = room.min(bytes.len());
                // Cannot fail, n fits.
                let _ = pending.extend_from_slice(&bytes[..n]);
                bytes = &bytes[n..];
                if pending.is_full() {
                    self.store.append(name, &pending).await?;
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            self.store.append(name, &pending).await?;
        }
        Ok(())
    }

    async fn load_file<C: Write>(&mut self, body: &[u8], resp: &mut Response<'_, C>) -> Result<(), HttpError> {
        let filename = match json::from_body::<NameBody>(body) {
            Ok(b) => request_name(&b.filename),
            Err(e) => {
                resp.start(Status::BadRequest, content_type::TEXT).await?;
                return resp.body_fmt(format_args!("Error loading file: {e}")).await;
            }
        };
        if filename.is_empty() {
            return resp.send(Status::BadRequest, content_type::TEXT, "Filename required").await;
        }
        let size = match self.store.size(&filename).await {
            Ok(Some(size)) => size,
            Ok(None) | Err(FileError::InvalidName) => {
                return resp.send(Status::NotFound, content_type::TEXT, "File not found").await
            }
            Err(e) => {
                resp.start(Status::InternalServerError, content_type::TEXT).await?;
                return resp.body_fmt(format_args!("Error loading file: {e}")).await;
            }
        };

        resp.start(Status::Ok, content_type::JSON).await?;
        resp.body_str("{\"content\":\"").await?;
        // Reads may split a multi byte character, the tail is carried over to the next read.
        let mut buf = [0u8; 128];
        let mut carry = 0;
        let mut offset = 0;
        while offset < size {
            let n = self
                .store
                .read(&filename, offset, &mut buf[carry..])
                .await
                .map_err(|_| HttpError::Io)?;
            if n == 0 {
                break;
            }
            offset += n as u32;
            let end = carry + n;
            let valid = loop {
                match core::str::from_utf8(&buf[..end]) {
                    Ok(s) => break s.len(),
                    Err(e) if e.error_len().is_none() => break e.valid_up_to(),
                    // Not text, replace the bad byte.
                    Err(e) => buf[e.valid_up_to()] = b'?',
                }
            };
            let text = core::str::from_utf8(&buf[..valid]).unwrap_or_default();
            let mut chunk: Chunk<768> = Chunk::default();
            json::write_escaped(&mut chunk, text).map_err(|_| HttpError::TooLarge)?;
            resp.body_str(&chunk.0).await?;
            buf.copy_within(valid..end, 0);
            carry = end - valid;
        }
        // The file ended inside a character.
        for _ in 0..carry {
            resp.body_str("?").await?;
        }
        resp.body_str("\"}").await
    }

    async fn list_files<C: Write>(&mut self, now: Instant, resp: &mut Response<'_, C>) -> Result<(), HttpError> {
        let mut files: heapless::Vec<FileInfo, MAX_LISTED> = heapless::Vec::new();
        let total = match self.store.list(&mut files).await {
            Ok(total) => total,
            Err(e) => {
                resp.start(Status::InternalServerError, content_type::TEXT).await?;
                return resp.body_fmt(format_args!("Error: {e}")).await;
            }
        };
        if total > files.len() {
            self.log(now, format_args!("Listing the first {} of {} files", files.len(), total));
        }
        resp.start(Status::Ok, content_type::JSON).await?;
        resp.body_str("[").await?;
        for (i, f) in files.iter().enumerate() {
            if i != 0 {
                resp.body_str(",").await?;
            }
            let mut buf = [0u8; 64];
            let entry = json::to_str(f, &mut buf).map_err(|_| HttpError::TooLarge)?;
            resp.body_str(entry).await?;
        }
        resp.body_str("]").await
    }

    async fn delete_file<C: Write>(&mut self, body: &[u8], now: Instant, resp: &mut Response<'_, C>) -> Result<(), HttpError> {
        let filename = match json::from_body::<NameBody>(body) {
            Ok(b) => request_name(&b.filename),
            Err(e) => {
                resp.start(Status::BadRequest, content_type::TEXT).await?;
                return resp.body_fmt(format_args!("Error: {e}")).await;
            }
        };
        if filename.is_empty() {
            return resp.send(Status::BadRequest, content_type::TEXT, "Filename required").await;
        }
        if is_protected(&filename) {
            return resp
                .send(
                    Status::BadRequest,
                    content_type::TEXT,
                    "Cannot delete code.py (currently running)",
                )
                .await;
        }
        match self.store.remove(&filename).await {
            Ok(()) => {
                self.log(now, format_args!("File deleted: {filename}"));
                resp.start(Status::Ok, content_type::TEXT).await?;
                resp.body_fmt(format_args!("File deleted: {filename}")).await
            }
            Err(FileError::NotFound) => resp.send(Status::NotFound, content_type::TEXT, "File not found").await,
            Err(e) => {
                resp.start(file_error_status(&e), content_type::TEXT).await?;
                resp.body_fmt(format_args!("Error: {e}")).await
            }
        }
    }

    async fn create_file<C: Write>(&mut self, body: &[u8], now: Instant, resp: &mut Response<'_, C>) -> Result<(), HttpError> {
        let filename = match json::from_body::<NameBody>(body) {
            Ok(b) => request_name(&b.filename),
            Err(e) => {
                resp.start(Status::BadRequest, content_type::TEXT).await?;
                return resp.body_fmt(format_args!("Error: {e}")).await;
            }
        };
        if filename.is_empty() {
            return resp.send(Status::BadRequest, content_type::TEXT, "Filename required").await;
        }
        let r = match self.store.exists(&filename).await {
            Ok(true) => Err(FileError::AlreadyExists),
            Ok(false) => self.store.write(&filename, NEW_FILE_CONTENT.as_bytes()).await,
            Err(e) => Err(e),
        };
        match r {
            Ok(()) => {
                self.log(now, format_args!("File created: {filename}"));
                resp.start(Status::Ok, content_type::TEXT).await?;
                resp.body_fmt(format_args!("File created: {filename}")).await
            }
            Err(FileError::AlreadyExists) => {
                resp.send(Status::BadRequest, content_type::TEXT, "File already exists").await
            }
            Err(e) => {
                resp.start(file_error_status(&e), content_type::TEXT).await?;
                resp.body_fmt(format_args!("Error: {e}")).await
            }
        }
    }

    /// The console as json, a few entries per write.
    async fn get_console<C: Write>(&mut self, resp: &mut Response<'_, C>) -> Result<(), HttpError> {
        resp.start(Status::Ok, content_type::JSON).await?;
        let mut pending: Chunk<1024> = Chunk::default();
        pending.0.push('[').map_err(|_| HttpError::TooLarge)?;
        for (i, entry) in self.console.iter().enumerate() {
            let mut one: Chunk<640> = Chunk::default();
            if i != 0 {
                one.write_char(',').map_err(|_| HttpError::TooLarge)?;
            }
            entry.write_json(&mut one).map_err(|_| HttpError::TooLarge)?;
            if pending.0.len() + one.0.len() > pending.0.capacity() {
                resp.body_str(&pending.0).await?;
                pending.0.clear();
            }
            pending.0.push_str(&one.0).map_err(|_| HttpError::TooLarge)?;
        }
        resp.body_str(&pending.0).await?;
        resp.body_str("]").await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::read_request;
    use crate::http::test_util::MockStream;
    use crate::files::RamFileStore;

    type Store = RamFileStore<8, 2048>;

    fn request(method: &str, path: &str, body: &str) -> Vec<u8> {
        format!(
            "{method} {path} HTTP/1.1\r\nHost: 192.168.4.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    /// Run one request through the app, returns the status code and the body.
    async fn call<S: FileStore>(app: &mut WebApp<'_, S>, method: &str, path: &str, body: &str, now: Instant) -> (u16, String) {
        let mut conn = MockStream::new(&request(method, path, body), 100);
        let mut buf = [0u8; 8192];
        let req = read_request(&mut conn, &mut buf).await.unwrap();
        let mut resp = Response::new(&mut conn);
        app.handle(&req, now, &mut resp).await.unwrap();
        let output = conn.output_str();
        let code = output[9..12].parse().unwrap();
        (code, conn.body().to_owned())
    }

    fn new_app(console: &mut Console, home: HomePage) -> WebApp<'_, Store> {
        WebApp::new(
            home,
            console,
            Blinker::new(BlinkRate::OFF, Instant::from_secs(0)),
            Store::new(),
        )
    }

    #[test]
    fn test_save_and_load() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            let now = Instant::from_secs(10);

            let (code, body) = call(
                &mut app,
                "POST",
                "/save_file",
                r#"{"filename": " notes.txt ", "content": "line \"one\"\nline two ✓\n"}"#,
                now,
            )
            .await;
            assert_eq!(code, 200);
            assert_eq!(body, "File saved: notes.txt");
            assert!(app.reboot.pending().is_none());

            let (code, body) = call(&mut app, "POST", "/load_file", r#"{"filename": "NOTES.TXT"}"#, now).await;
            assert_eq!(code, 200);
            assert_eq!(body, r#"{"content":"line \"one\"\nline two ✓\n"}"#);

            let (code, body) = call(&mut app, "POST", "/load_file", r#"{"filename": "other.txt"}"#, now).await;
            assert_eq!((code, body.as_str()), (404, "File not found"));

            let (code, body) = call(&mut app, "POST", "/save_file", r#"{"filename": "  ", "content": ""}"#, now).await;
            assert_eq!((code, body.as_str()), (400, "Filename required"));

            let (code, body) = call(
                &mut app,
                "POST",
                "/save_file",
                r#"{"filename": "much_too_long.txt", "content": ""}"#,
                now,
            )
            .await;
            assert_eq!(code, 400);
            assert!(body.starts_with("Error saving file: "));
            Ok(())
        }())
    }

    #[test]
    fn test_load_large_file() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            // Multi byte characters straddle the read boundaries.
            let content: String = "aé€\n".repeat(100);
            app.store.write("big.txt", content.as_bytes()).await?;
            let (code, body) = call(&mut app, "POST", "/load_file", r#"{"filename": "big.txt"}"#, Instant::from_secs(1)).await;
            assert_eq!(code, 200);
            assert_eq!(body, format!("{{\"content\":\"{}\"}}", content.replace('\n', "\\n")));
            Ok(())
        }())
    }

    #[test]
    fn test_failed_save_keeps_old_file() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            let now = Instant::from_secs(5);
            app.store.write("code.py", b"blink 50\n").await?;

            // More than a file in the store can hold.
            let content = "x".repeat(3000);
            let body = format!(r#"{{"filename": "code.py", "content": "{content}"}}"#);
            let (code, reply) = call(&mut app, "POST", "/save_file", &body, now).await;
            assert_eq!(code, 500);
            assert_eq!(reply, "Error saving file: storage is full");

            let mut buf = [0u8; 64];
            assert_eq!(app.store.read_to_end("code.py", &mut buf).await?, b"blink 50\n");
            assert!(!app.store.exists(SAVE_SCRATCH).await?);
            assert!(app.reboot.pending().is_none());

            // A save that fits still goes through afterwards.
            let (code, _) = call(
                &mut app,
                "POST",
                "/save_file",
                r#"{"filename": "code.py", "content": "blink 7\n"}"#,
                now,
            )
            .await;
            assert_eq!(code, 200);
            assert_eq!(app.store.read_to_end("code.py", &mut buf).await?, b"blink 7\n");
            assert!(!app.store.exists(SAVE_SCRATCH).await?);
            Ok(())
        }())
    }

    #[test]
    fn test_load_file_ending_inside_character() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            // The first two bytes of a three byte character.
            app.store.write("cut.txt", b"ab\xE2\x82").await?;
            let (code, body) = call(&mut app, "POST", "/load_file", r#"{"filename": "cut.txt"}"#, Instant::from_secs(1)).await;
            assert_eq!(code, 200);
            assert_eq!(body, r#"{"content":"ab??"}"#);
            Ok(())
        }())
    }

    #[test]
    fn test_list_files_more_than_listed() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = WebApp::new(
                HomePage::Editor,
                &mut console,
                Blinker::new(BlinkRate::OFF, Instant::from_secs(0)),
                RamFileStore::<40, 4>::new(),
            );
            let total = MAX_LISTED + 4;
            for i in (0..total).rev() {
                app.store.write(&format!("f{i:02}.txt"), b"").await?;
            }
            let (code, body) = call(&mut app, "GET", "/list_files", "", Instant::from_secs(1)).await;
            assert_eq!(code, 200);
            let expected: Vec<String> = (0..MAX_LISTED)
                .map(|i| format!(r#"{{"name":"f{i:02}.txt","size":0}}"#))
                .collect();
            assert_eq!(body, format!("[{}]", expected.join(",")));
            assert!(app
                .console
                .iter()
                .any(|e| e.message.contains(&format!("first {MAX_LISTED} of {total} files"))));
            Ok(())
        }())
    }

    #[test]
    fn test_next_deadline() {
        let mut console = Console::new();
        let mut app = new_app(&mut console, HomePage::Menu);
        assert_eq!(app.next_deadline(), None);
        app.blinker.set_rate(BlinkRate::new(100));
        assert_eq!(app.next_deadline(), Some(Instant::from_millis(20)));
        app.reboot.schedule(Instant::from_secs(0));
        assert_eq!(app.next_deadline(), Some(Instant::from_millis(20)));
        app.blinker.set_rate(BlinkRate::OFF);
        assert_eq!(app.next_deadline(), Some(Instant::from_millis(0)));
        assert_eq!(app.blinker.update(Instant::from_millis(1)), Some(false));
        // Only the reset is left.
        assert_eq!(app.next_deadline(), Some(Instant::from_secs(2)));
    }

    #[test]
    fn test_save_boot_script_schedules_reboot() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            let now = Instant::from_secs(100);
            let (code, body) = call(
                &mut app,
                "POST",
                "/save_file",
                r#"{"filename": "Code.py", "content": "blink 50\n"}"#,
                now,
            )
            .await;
            assert_eq!(code, 200);
            assert_eq!(body, "File saved: Code.py - Rebooting to apply changes...");
            assert!(!app.reboot.is_due(now));
            assert!(!app.reboot.is_due(Instant::from_millis(101_999)));
            assert!(app.reboot.is_due(Instant::from_secs(102)));
            Ok(())
        }())
    }

    #[test]
    fn test_list_delete_create() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            let now = Instant::from_secs(1);
            app.store.write("code.py", b"blink 1\n").await?;
            app.store.write("b.txt", b"bb").await?;

            let (code, body) = call(&mut app, "POST", "/create_file", r#"{"filename": "a.txt"}"#, now).await;
            assert_eq!((code, body.as_str()), (200, "File created: a.txt"));
            let (code, body) = call(&mut app, "POST", "/create_file", r#"{"filename": "a.txt"}"#, now).await;
            assert_eq!((code, body.as_str()), (400, "File already exists"));

            let (code, body) = call(&mut app, "GET", "/list_files", "", now).await;
            assert_eq!(code, 200);
            assert_eq!(
                body,
                r#"[{"name":"a.txt","size":11},{"name":"b.txt","size":2},{"name":"code.py","size":8}]"#
            );

            let (code, body) = call(&mut app, "POST", "/delete_file", r#"{"filename": "CODE.PY"}"#, now).await;
            assert_eq!((code, body.as_str()), (400, "Cannot delete code.py (currently running)"));
            let (code, body) = call(&mut app, "POST", "/delete_file", r#"{"filename": "b.txt"}"#, now).await;
            assert_eq!((code, body.as_str()), (200, "File deleted: b.txt"));
            let (code, body) = call(&mut app, "POST", "/delete_file", r#"{"filename": "b.txt"}"#, now).await;
            assert_eq!((code, body.as_str()), (404, "File not found"));
            assert_eq!(app.store.size("b.txt").await?, None);
            Ok(())
        }())
    }

    #[test]
    fn test_console_and_commands() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            app.log(Instant::from_millis(1500), format_args!("hello"));

            let (code, body) = call(&mut app, "POST", "/send_command", r#"{"command": " 6 * 7 "}"#, Instant::from_secs(2)).await;
            assert_eq!((code, body.as_str()), (200, "Command executed"));
            let (code, body) = call(&mut app, "POST", "/send_command", r#"{"command": "1 / 0"}"#, Instant::from_secs(3)).await;
            assert_eq!(code, 200);
            assert_eq!(body, "Command executed");
            let (code, body) = call(&mut app, "POST", "/send_command", r#"{"command": ""}"#, Instant::from_secs(3)).await;
            assert_eq!((code, body.as_str()), (400, "Command required"));

            let (code, body) = call(&mut app, "GET", "/get_console", "", Instant::from_secs(4)).await;
            assert_eq!(code, 200);
            assert_eq!(
                body,
                concat!(
                    r#"[{"time":1.500,"message":"hello\n"},"#,
                    r#"{"time":2.000,"message":">>> 6 * 7\n"},"#,
                    r#"{"time":2.000,"message":"42\n"},"#,
                    r#"{"time":3.000,"message":">>> 1 / 0\n"},"#,
                    r#"{"time":3.000,"message":"Error: division by zero\n"}]"#
                )
            );

            call(&mut app, "POST", "/send_command", r#"{"command": "clear"}"#, Instant::from_secs(5)).await;
            let (_, body) = call(&mut app, "GET", "/get_console", "", Instant::from_secs(5)).await;
            assert_eq!(body, "[]");
            Ok(())
        }())
    }

    #[test]
    fn test_full_console_streams() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            for i in 0..1200u64 {
                app.log(Instant::from_millis(i), format_args!("line {i}"));
            }
            assert_eq!(app.console.len(), 1000);
            let (code, body) = call(&mut app, "GET", "/get_console", "", Instant::from_secs(5)).await;
            assert_eq!(code, 200);
            assert!(body.starts_with(r#"[{"time":0.200,"message":"line 200\n"}"#));
            assert!(body.ends_with(r#"{"time":1.199,"message":"line 1199\n"}]"#));
            assert_eq!(body.matches("\"time\"").count(), 1000);
            Ok(())
        }())
    }

    #[test]
    fn test_blink_routes() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Menu);
            let now = Instant::from_secs(1);

            let (code, body) = call(&mut app, "GET", "/get_blink", "", now).await;
            assert_eq!((code, body.as_str()), (200, r#"{"rate":0}"#));
            let (code, body) = call(&mut app, "POST", "/set_blink", r#"{"rate": 250}"#, now).await;
            assert_eq!((code, body.as_str()), (200, "Blink rate updated"));
            assert_eq!(app.blinker.rate().value(), 100);
            let (code, body) = call(&mut app, "POST", "/set_blink", r#"{"rate": -3}"#, now).await;
            assert_eq!((code, body.as_str()), (200, "Blink rate updated"));
            assert_eq!(app.blinker.rate().value(), 0);
            let (code, body) = call(&mut app, "POST", "/set_blink", r#"{"speed": 3}"#, now).await;
            assert_eq!((code, body.as_str()), (400, "Error updating rate"));

            let (code, body) = call(&mut app, "POST", "/toggle", "", now).await;
            assert_eq!((code, body.as_str()), (200, MENU_HTML));
            assert!(app.blinker.led_on());
            call(&mut app, "POST", "/toggle", "", now).await;
            assert!(!app.blinker.led_on());
            Ok(())
        }())
    }

    #[test]
    fn test_pages() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut console = Console::new();
            let mut app = new_app(&mut console, HomePage::Editor);
            let now = Instant::from_secs(1);

            let (code, body) = call(&mut app, "GET", "/", "", now).await;
            assert_eq!((code, body.as_str()), (200, EDITOR_HTML));
            app.store.write("index.htm", b"<p>mine</p>").await?;
            let (_, body) = call(&mut app, "GET", "/", "", now).await;
            assert_eq!(body, "<p>mine</p>");

            let (_, body) = call(&mut app, "GET", "/styles.css", "", now).await;
            assert_eq!(body, STYLES_CSS);

            let (code, body) = call(&mut app, "GET", "/hook4", "", now).await;
            assert_eq!(code, 200);
            assert!(body.contains("<title>Pico W - Hook 4</title>"));
            assert!(body.contains("<h1>Hook 4</h1>"));
            assert!(!body.contains("{{name}}"));

            let (code, _) = call(&mut app, "GET", "/nope", "", now).await;
            assert_eq!(code, 404);
            let (code, _) = call(&mut app, "GET", "/save_file", "", now).await;
            assert_eq!(code, 405);
            let (code, _) = call(&mut app, "POST", "/list_files", "", now).await;
            assert_eq!(code, 405);

            app.home = HomePage::Menu;
            let (_, body) = call(&mut app, "GET", "/", "", now).await;
            assert_eq!(body, MENU_HTML);
            let (_, body) = call(&mut app, "GET", "/hook1", "", now).await;
            assert_eq!(body, EDITOR_HTML);
            Ok(())
        }())
    }
}
