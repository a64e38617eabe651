//! Incremental request framing.
//!
//! Bytes are appended to a [`RequestAccumulator`] as they arrive and the
//! [`RequestFramer`] decides, after every append, whether the request is
//! complete, needs more data, or is malformed:
//!
//! ```text
//! AwaitingHeaders ──terminator──▶ HeadersParsed ──GET/DELETE──────────▶ Ready
//!        │                              │
//!        │                              └──POST/PUT──▶ AwaitingBody ──len reached──▶ Ready
//!        └──────────────── any failure ──────────────────────────────────────▶ Error
//! ```
//!
//! Until the blank line ending the headers is seen, the whole buffer is
//! rescanned on every chunk; this is bounded by `max_header_bytes`. After
//! that, chunks are only appended and counted against `Content-Length`.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::http::headers::HeaderMap;
use crate::http::request::{Method, Request, RequestBuilder, decode_path, is_bad_path, split_target};
use crate::http::response::StatusCode;
use crate::http::span::{ByteSpan, LineRead, LineScanner};

pub const DEFAULT_MAX_HEADER_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request is incomplete")]
    Incomplete,
    #[error("request headers are too large")]
    HeadersTooLarge,
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unsupported request method")]
    InvalidMethod,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("request path is not allowed")]
    BadPath,
    #[error("request is not ready to be dispatched")]
    NotReady,
}

impl ParseError {
    /// Status code to answer with, when a response is still possible.
    pub fn status(&self) -> StatusCode {
        StatusCode::BadRequest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerLimits {
    pub max_header_bytes: usize,
}

impl Default for FramerLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    AwaitingHeaders,
    HeadersParsed,
    AwaitingBody,
    Ready,
    Error,
}

/// What the connection should do after feeding bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    NeedMoreData,
    Ready,
    Error(ParseError),
}

/// Request line and headers, parsed once the header terminator is found.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: String,
    pub headers: HeaderMap,
    pub raw_headers: String,
    /// Declared body length; always 0 for GET and DELETE.
    pub content_length: usize,
}

/// Per-request receive state: the raw bytes plus what has been parsed so far.
#[derive(Debug, Default)]
pub struct RequestAccumulator {
    buffer: BytesMut,
    header_end: Option<usize>,
    head: Option<RequestHead>,
    total_received: usize,
}

impl RequestAccumulator {
    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        self.total_received += chunk.len();
    }

    pub fn total_received(&self) -> usize {
        self.total_received
    }

    /// Offset just past the blank line ending the headers, once found.
    pub fn header_end(&self) -> Option<usize> {
        self.header_end
    }

    pub fn head(&self) -> Option<&RequestHead> {
        self.head.as_ref()
    }

    /// Bytes received beyond the header terminator.
    pub fn body_received(&self) -> usize {
        self.header_end
            .map(|end| self.buffer.len().saturating_sub(end))
            .unwrap_or(0)
    }
}

/// Drives one request from raw bytes to a [`Request`].
#[derive(Debug)]
pub struct RequestFramer {
    limits: FramerLimits,
    acc: RequestAccumulator,
    state: FrameState,
    error: Option<ParseError>,
}

impl RequestFramer {
    pub fn new(limits: FramerLimits) -> Self {
        Self {
            limits,
            acc: RequestAccumulator::default(),
            state: FrameState::AwaitingHeaders,
            error: None,
        }
    }

    /// Starts a new request with bytes left over from the previous one on
    /// the same connection. Call [`RequestFramer::poll`] to evaluate them.
    pub fn with_carry_over(limits: FramerLimits, carry_over: Bytes) -> Self {
        let mut framer = Self::new(limits);
        if !carry_over.is_empty() {
            framer.acc.append(&carry_over);
        }
        framer
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn accumulator(&self) -> &RequestAccumulator {
        &self.acc
    }

    pub fn method(&self) -> Option<Method> {
        self.acc.head.as_ref().map(|head| head.method)
    }

    pub fn content_length(&self) -> usize {
        self.acc
            .head
            .as_ref()
            .map(|head| head.content_length)
            .unwrap_or(0)
    }

    pub fn body_received(&self) -> usize {
        self.acc.body_received()
    }

    /// Whether any byte of this request has arrived yet.
    pub fn has_data(&self) -> bool {
        !self.acc.buffer.is_empty()
    }

    /// Appends a chunk and re-evaluates the request.
    ///
    /// Once `Ready`, further bytes are kept for the next request on the
    /// connection. Once `Error`, input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Verdict {
        if self.state != FrameState::Error {
            self.acc.append(chunk);
        }
        self.poll()
    }

    /// Re-evaluates the buffered bytes without appending anything.
    pub fn poll(&mut self) -> Verdict {
        loop {
            match self.state {
                FrameState::AwaitingHeaders => match self.scan_headers() {
                    Ok(true) => self.state = FrameState::HeadersParsed,
                    Ok(false) => return Verdict::NeedMoreData,
                    Err(e) => return self.fail(e),
                },
                FrameState::HeadersParsed => {
                    let bodied = self
                        .acc
                        .head
                        .as_ref()
                        .is_some_and(|head| head.method.has_body() && head.content_length > 0);
                    self.state = if bodied {
                        FrameState::AwaitingBody
                    } else {
                        FrameState::Ready
                    };
                }
                FrameState::AwaitingBody => {
                    if self.acc.body_received() >= self.content_length() {
                        self.state = FrameState::Ready;
                    } else {
                        return Verdict::NeedMoreData;
                    }
                }
                FrameState::Ready => return Verdict::Ready,
                FrameState::Error => {
                    return Verdict::Error(self.error.clone().unwrap_or(ParseError::NotReady));
                }
            }
        }
    }

    /// Total length of the framed request (headers plus body), once ready.
    pub fn consumed(&self) -> Option<usize> {
        if self.state != FrameState::Ready {
            return None;
        }
        self.acc
            .header_end
            .map(|end| end + self.content_length())
    }

    /// Builds the request, returning it with any bytes that followed it.
    pub fn into_request(
        self,
        remote_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
    ) -> Result<(Request, Bytes), ParseError> {
        let consumed = self.consumed().ok_or(ParseError::NotReady)?;
        let header_end = self.acc.header_end.ok_or(ParseError::NotReady)?;
        let head = self.acc.head.ok_or(ParseError::NotReady)?;

        let raw = self.acc.buffer.freeze();
        let body = raw.slice(header_end..consumed);
        let rest = raw.slice(consumed..);

        let request = RequestBuilder::new()
            .method(head.method)
            .target(head.target)
            .version(head.version)
            .headers(head.headers)
            .raw_headers(head.raw_headers)
            .body(body)
            .remote_addr(remote_addr)
            .local_addr(local_addr)
            .build()
            .map_err(|_| ParseError::NotReady)?;

        Ok((request, rest))
    }

    fn fail(&mut self, error: ParseError) -> Verdict {
        self.state = FrameState::Error;
        self.error = Some(error.clone());
        Verdict::Error(error)
    }

    /// Looks for the header terminator from the start of the buffer and,
    /// when found, parses the head. Returns whether the head is complete.
    fn scan_headers(&mut self) -> Result<bool, ParseError> {
        let snapshot = std::mem::take(&mut self.acc.buffer).freeze();
        let scanned = scan_head(snapshot.clone(), self.limits);
        // The spans from the scan are gone, so this gets the allocation back
        // without copying.
        self.acc.buffer = BytesMut::from(snapshot);

        match scanned? {
            Some((head, header_end)) => {
                self.acc.header_end = Some(header_end);
                self.acc.head = Some(head);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn scan_head(raw: Bytes, limits: FramerLimits) -> Result<Option<(RequestHead, usize)>, ParseError> {
    let total = raw.len();
    let span = ByteSpan::from(raw);
    let mut scanner = LineScanner::new(span.clone());

    let mut request_line = None;
    let mut header_lines = Vec::new();
    let mut headers_start = 0;

    loop {
        let line = match scanner.read_line() {
            LineRead::Found(line) => line,
            LineRead::NeedMoreData { .. } => {
                if total > limits.max_header_bytes {
                    return Err(ParseError::HeadersTooLarge);
                }
                return Ok(None);
            }
        };

        if request_line.is_none() {
            // Blank lines before the request line are tolerated.
            if !line.is_empty() {
                request_line = Some(line);
                headers_start = scanner.current_offset();
            }
            continue;
        }

        if line.is_empty() {
            break;
        }
        header_lines.push(line);
    }

    let header_end = scanner.current_offset();
    if header_end > limits.max_header_bytes {
        return Err(ParseError::HeadersTooLarge);
    }

    let request_line = request_line.ok_or(ParseError::InvalidRequestLine)?;
    let (method, target, version) = parse_request_line(&request_line)?;

    let (path, _) = split_target(&target);
    if !path.starts_with('/') || is_bad_path(&decode_path(path)) {
        return Err(ParseError::BadPath);
    }

    let mut headers = HeaderMap::new();
    for line in &header_lines {
        let text = line.to_string_lossy();
        let (name, value) = text.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::InvalidHeader);
        }
        headers.insert(name, value.trim());
    }

    let content_length = if method.has_body() {
        headers
            .get("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0)
    } else {
        0
    };

    let raw_headers = span
        .substring_len(headers_start, header_end - headers_start)
        .to_string_lossy()
        .into_owned();

    let head = RequestHead {
        method,
        target,
        version,
        headers,
        raw_headers,
        content_length,
    };

    Ok(Some((head, header_end)))
}

fn parse_request_line(line: &ByteSpan) -> Result<(Method, String, String), ParseError> {
    let parts = line.split(b' ');
    if !(2..=3).contains(&parts.len()) {
        return Err(ParseError::InvalidRequestLine);
    }

    let verb = parts[0].to_str().map_err(|_| ParseError::InvalidMethod)?;
    let method = Method::from_str(verb).ok_or(ParseError::InvalidMethod)?;

    let target = parts[1].to_string_lossy().into_owned();

    let version = match parts.get(2) {
        Some(span) => {
            let version = span.to_string_lossy().into_owned();
            if !version.starts_with("HTTP/") {
                return Err(ParseError::InvalidRequestLine);
            }
            version
        }
        None => "HTTP/1.0".to_string(),
    };

    Ok((method, target, version))
}

/// One-shot parse of a complete request held in `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// [`ParseError::Incomplete`] if `buf` does not hold a whole request yet.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let mut framer = RequestFramer::new(FramerLimits::default());

    match framer.feed(buf) {
        Verdict::Ready => {
            let consumed = framer.consumed().ok_or(ParseError::NotReady)?;
            let (request, _) = framer.into_request(None, None)?;
            Ok((request, consumed))
        }
        Verdict::NeedMoreData => Err(ParseError::Incomplete),
        Verdict::Error(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn request_line_without_terminator_is_not_accepted() {
        let mut framer = RequestFramer::new(FramerLimits::default());
        assert_eq!(framer.feed(b"GET / HTTP/1.1"), Verdict::NeedMoreData);
        assert_eq!(framer.state(), FrameState::AwaitingHeaders);
        assert!(framer.accumulator().head().is_none());
    }

    #[test]
    fn buffer_survives_rescans() {
        let mut framer = RequestFramer::new(FramerLimits::default());
        framer.feed(b"POST /x HTTP/1.1\r\n");
        framer.feed(b"Content-Length: 3\r\n\r\nab");
        assert_eq!(framer.accumulator().total_received(), 41);
        assert_eq!(framer.body_received(), 2);
    }
}
