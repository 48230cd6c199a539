//! Small helpers around `serde-json-core` for the web api.
//!
//! Request bodies are deserialized in place, strings that may hold escapes (file contents, commands) are taken
//! as [`EscapedStr`] and unescaped into a caller provided buffer. Responses are streamed through
//! [`core::fmt::Write`], so large bodies never need to be serialized into one buffer.
use core::fmt::Write;
use serde::Deserialize;
pub use serde_json_core::str::{EscapedStr, EscapedStringFragment};

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum JsonError {
    #[error("malformed json")]
    Malformed,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("string does not fit in buffer")]
    TooLong,
    #[error("serialization buffer full")]
    BufferFull,
}

/// Deserialize a request body, trailing whitespace is fine.
pub fn from_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, JsonError> {
    serde_json_core::from_slice::<T>(body)
        .map(|(v, _used)| v)
        .map_err(|_| JsonError::Malformed)
}

/// Serialize a small value into the buffer, returns the used part as str.
pub fn to_str<'b, T: serde::Serialize>(value: &T, buffer: &'b mut [u8]) -> Result<&'b str, JsonError> {
    let len = serde_json_core::to_slice(value, buffer).map_err(|_| JsonError::BufferFull)?;
    // serde-json-core only ever writes utf8.
    core::str::from_utf8(&buffer[..len]).map_err(|_| JsonError::Malformed)
}

/// Unescape a json string into the buffer, returns the resulting str.
pub fn unescape<'b>(s: &EscapedStr<'_>, buffer: &'b mut [u8]) -> Result<&'b str, JsonError> {
    let mut used = 0;
    for fragment in s.fragments() {
        let fragment = fragment.map_err(|_| JsonError::InvalidEscape)?;
        let mut char_buf = [0u8; 4];
        let bytes = match fragment {
            EscapedStringFragment::NotEscaped(v) => v.as_bytes(),
            EscapedStringFragment::Escaped(c) => c.encode_utf8(&mut char_buf).as_bytes(),
        };
        let end = used + bytes.len();
        if end > buffer.len() {
            return Err(JsonError::TooLong);
        }
        buffer[used..end].copy_from_slice(bytes);
        used = end;
    }
    core::str::from_utf8(&buffer[..used]).map_err(|_| JsonError::InvalidEscape)
}

/// Unescape a short json string into a heapless string.
pub fn unescape_string<const N: usize>(s: &EscapedStr<'_>) -> Result<heapless::String<N>, JsonError> {
    let mut buffer = [0u8; N];
    let v = unescape(s, &mut buffer)?;
    let mut r = heapless::String::new();
    r.push_str(v).map_err(|_| JsonError::TooLong)?;
    Ok(r)
}

/// Write `s` as a quoted json string.
pub fn write_str<W: Write + ?Sized>(w: &mut W, s: &str) -> core::fmt::Result {
    w.write_char('"')?;
    write_escaped(w, s)?;
    w.write_char('"')
}

/// Write the escaped contents of a json string, without the quotes.
pub fn write_escaped<W: Write + ?Sized>(w: &mut W, s: &str) -> core::fmt::Result {
    let mut start = 0;
    for (i, c) in s.char_indices() {
        let escaped = match c {
            '"' => Some("\\\""),
            '\\' => Some("\\\\"),
            '\n' => Some("\\n"),
            '\r' => Some("\\r"),
            '\t' => Some("\\t"),
            c if (c as u32) < 0x20 => None,
            _ => continue,
        };
        w.write_str(&s[start..i])?;
        match escaped {
            Some(e) => w.write_str(e)?,
            None => write!(w, "\\u{:04x}", c as u32)?,
        }
        start = i + c.len_utf8();
    }
    w.write_str(&s[start..])
}
