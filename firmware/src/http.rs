//! Just enough HTTP/1.1 to serve the pages, one request per connection.
//!
//! Requests are read into a caller provided buffer until the headers and the `Content-Length` bytes of body are in.
//! Responses never carry a `Content-Length`, the connection is closed after the body.
use core::fmt::Write as _;
use embedded_io_async::{Read, Write};

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum HttpError {
    #[error("request is incomplete")]
    Incomplete,
    #[error("malformed request")]
    Malformed,
    #[error("unsupported http version")]
    UnsupportedVersion,
    #[error("request too large")]
    TooLarge,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("io error")]
    Io,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum Method {
    Get,
    Post,
    Other,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub struct Request<'a> {
    pub method: Method,
    /// Path without the query.
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    InternalServerError,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::PayloadTooLarge => 413,
            Status::InternalServerError => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

impl From<HttpError> for Status {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::TooLarge => Status::PayloadTooLarge,
            _ => Status::BadRequest,
        }
    }
}

pub mod content_type {
    pub const HTML: &str = "text/html";
    pub const CSS: &str = "text/css";
    pub const JSON: &str = "application/json";
    pub const TEXT: &str = "text/plain";
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the header block including the empty line, and the content length.
fn head(buf: &[u8]) -> Result<Option<(usize, usize)>, HttpError> {
    let Some(end) = find(buf, b"\r\n\r\n") else {
        return Ok(None);
    };
    let head = core::str::from_utf8(&buf[..end]).map_err(|_| HttpError::Malformed)?;
    let mut content_length = 0;
    for line in head.split("\r\n").skip(1) {
        let (name, value) = line.split_once(':').ok_or(HttpError::Malformed)?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse().map_err(|_| HttpError::Malformed)?;
        }
    }
    Ok(Some((end + 4, content_length)))
}

/// Total length of the request in `buf` when it is complete.
///
/// A request that can never fit in `capacity` bytes is [`HttpError::TooLarge`].
pub fn request_length(buf: &[u8], capacity: usize) -> Result<Option<usize>, HttpError> {
    match head(buf)? {
        Some((head_len, body_len)) => {
            let total = head_len.checked_add(body_len).ok_or(HttpError::TooLarge)?;
            if total > capacity {
                Err(HttpError::TooLarge)
            } else if buf.len() >= total {
                Ok(Some(total))
            } else {
                Ok(None)
            }
        }
        None if buf.len() >= capacity => Err(HttpError::TooLarge),
        None => Ok(None),
    }
}

/// Parse a complete request.
pub fn parse_request(buf: &[u8]) -> Result<Request<'_>, HttpError> {
    let (head_len, body_len) = head(buf)?.ok_or(HttpError::Incomplete)?;
    if buf.len() < head_len + body_len {
        return Err(HttpError::Incomplete);
    }
    // Already validated as utf8 by head().
    let head = core::str::from_utf8(&buf[..head_len - 4]).map_err(|_| HttpError::Malformed)?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(HttpError::Malformed)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::Malformed);
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::UnsupportedVersion);
    }
    let method = match method {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "" => return Err(HttpError::Malformed),
        _ => Method::Other,
    };
    if !target.starts_with('/') {
        return Err(HttpError::Malformed);
    }
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };
    let content_type = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.trim());
    Ok(Request {
        method,
        path,
        query,
        content_type,
        body: &buf[head_len..head_len + body_len],
    })
}

/// Read from `conn` until a whole request is in `buf`, then parse it.
pub async fn read_request<'b, C: Read>(conn: &mut C, buf: &'b mut [u8]) -> Result<Request<'b>, HttpError> {
    let capacity = buf.len();
    let mut used = 0;
    let total = loop {
        if let Some(total) = request_length(&buf[..used], capacity)? {
            break total;
        }
        let n = conn.read(&mut buf[used..]).await.map_err(|_| HttpError::Io)?;
        if n == 0 {
            return Err(HttpError::ConnectionClosed);
        }
        used += n;
    };
    let buf: &'b [u8] = buf;
    parse_request(&buf[..total])
}

/// Writer that formats into a fixed buffer, fails when it is full.
pub struct Chunk<const N: usize>(pub heapless::String<N>);
impl<const N: usize> Default for Chunk<N> {
    fn default() -> Self {
        Self(heapless::String::new())
    }
}
impl<const N: usize> core::fmt::Write for Chunk<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.push_str(s).map_err(|_| core::fmt::Error)
    }
}

/// Response on a connection, the status line is written by [`Response::start`].
pub struct Response<'c, C: Write> {
    conn: &'c mut C,
    started: bool,
}

impl<'c, C: Write> Response<'c, C> {
    pub fn new(conn: &'c mut C) -> Self {
        Self { conn, started: false }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub async fn start(&mut self, status: Status, content_type: &str) -> Result<(), HttpError> {
        let mut line: Chunk<128> = Chunk::default();
        write!(
            line,
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
            status.code(),
            status.reason(),
            content_type
        )
        .map_err(|_| HttpError::TooLarge)?;
        self.started = true;
        self.body_str(&line.0).await
    }

    pub async fn body_bytes(&mut self, data: &[u8]) -> Result<(), HttpError> {
        self.conn.write_all(data).await.map_err(|_| HttpError::Io)
    }

    pub async fn body_str(&mut self, data: &str) -> Result<(), HttpError> {
        self.body_bytes(data.as_bytes()).await
    }

    /// Format a piece of the body, it must fit in 256 bytes.
    pub async fn body_fmt(&mut self, args: core::fmt::Arguments<'_>) -> Result<(), HttpError> {
        let mut chunk: Chunk<256> = Chunk::default();
        chunk.write_fmt(args).map_err(|_| HttpError::TooLarge)?;
        self.body_str(&chunk.0).await
    }

    /// A complete response.
    pub async fn send(&mut self, status: Status, content_type: &str, body: &str) -> Result<(), HttpError> {
        self.start(status, content_type).await?;
        self.body_str(body).await
    }

    pub async fn flush(&mut self) -> Result<(), HttpError> {
        self.conn.flush().await.map_err(|_| HttpError::Io)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use embedded_io_async::{ErrorType, Read, Write};

    /// Connection that hands out `input` in pieces of at most `chunk` bytes and collects what is written.
    #[derive(Debug, Default)]
    pub struct MockStream {
        pub input: Vec<u8>,
        pub position: usize,
        pub chunk: usize,
        pub output: Vec<u8>,
    }
    impl MockStream {
        pub fn new(input: &[u8], chunk: usize) -> Self {
            Self {
                input: input.to_vec(),
                chunk,
                ..Default::default()
            }
        }
        pub fn output_str(&self) -> &str {
            std::str::from_utf8(&self.output).unwrap()
        }
        /// The body of the response, after the header block.
        pub fn body(&self) -> &str {
            let s = self.output_str();
            s.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
        }
    }
    impl ErrorType for MockStream {
        type Error = core::convert::Infallible;
    }
    impl Read for MockStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = (self.input.len() - self.position).min(buf.len()).min(self.chunk);
            buf[..n].copy_from_slice(&self.input[self.position..self.position + n]);
            self.position += n;
            Ok(n)
        }
    }
    impl Write for MockStream {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_util::MockStream;
    use super::*;

    #[test]
    fn test_parse_request() {
        let raw = b"POST /save_file?x=1 HTTP/1.1\r\nHost: 192.168.4.1\r\ncontent-type: application/json\r\nContent-Length: 7\r\n\r\n{\"a\":1}";
        assert_eq!(request_length(raw, 1024), Ok(Some(raw.len())));
        let r = parse_request(raw).unwrap();
        assert_eq!(r.method, Method::Post);
        assert_eq!(r.path, "/save_file");
        assert_eq!(r.query, Some("x=1"));
        assert_eq!(r.content_type, Some("application/json"));
        assert_eq!(r.body, b"{\"a\":1}");

        let get = parse_request(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!((get.method, get.path, get.body), (Method::Get, "/", &b""[..]));
        assert_eq!(
            parse_request(b"DELETE /x HTTP/1.1\r\n\r\n").map(|r| r.method),
            Ok(Method::Other)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_request(b"GET / HTTP/1.1\r\nHost: x\r\n"), Err(HttpError::Incomplete));
        assert_eq!(
            parse_request(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab"),
            Err(HttpError::Incomplete)
        );
        assert_eq!(parse_request(b"GET / HTTP/2\r\n\r\n"), Err(HttpError::UnsupportedVersion));
        assert_eq!(parse_request(b"GET /\r\n\r\n"), Err(HttpError::Malformed));
        assert_eq!(parse_request(b"GET x HTTP/1.1\r\n\r\n"), Err(HttpError::Malformed));
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nContent-Length: lots\r\n\r\n"),
            Err(HttpError::Malformed)
        );
        assert_eq!(parse_request(b"GET / HTTP/1.1\r\nno colon\r\n\r\n"), Err(HttpError::Malformed));

        let big = b"POST / HTTP/1.1\r\nContent-Length: 5000\r\n\r\n";
        assert_eq!(request_length(big, 1024), Err(HttpError::TooLarge));
        assert_eq!(request_length(&[b'a'; 64], 64), Err(HttpError::TooLarge));
        assert_eq!(request_length(&[b'a'; 32], 64), Ok(None));
        assert_eq!(Status::from(HttpError::TooLarge).code(), 413);
    }

    #[test]
    fn test_read_request_in_pieces() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let raw = b"POST /send_command HTTP/1.1\r\nContent-Length: 17\r\n\r\n{\"command\":\"1+1\"}";
            let mut stream = MockStream::new(raw, 5);
            let mut buf = [0u8; 256];
            let r = read_request(&mut stream, &mut buf).await?;
            assert_eq!(r.path, "/send_command");
            assert_eq!(r.body, b"{\"command\":\"1+1\"}");

            let mut closed = MockStream::new(b"GET / HTTP/1.1\r\n", 64);
            let mut buf = [0u8; 256];
            assert_eq!(
                read_request(&mut closed, &mut buf).await,
                Err(HttpError::ConnectionClosed)
            );

            let mut huge = MockStream::new(&[b'x'; 300], 64);
            let mut buf = [0u8; 128];
            assert_eq!(read_request(&mut huge, &mut buf).await, Err(HttpError::TooLarge));
            Ok(())
        }())
    }

    #[test]
    fn test_response() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut stream = MockStream::default();
            let mut response = Response::new(&mut stream);
            assert!(!response.started());
            response.start(Status::NotFound, content_type::TEXT).await?;
            response.body_fmt(format_args!("File {} not found", "x.py")).await?;
            response.flush().await?;
            assert_eq!(
                stream.output_str(),
                "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nFile x.py not found"
            );
            assert_eq!(stream.body(), "File x.py not found");
            Ok(())
        }())
    }
}
