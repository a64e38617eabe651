//! Zero-copy views over the raw request buffer.
//!
//! A [`ByteSpan`] is an `(offset, length)` window into a shared [`Bytes`]
//! buffer. Slicing and splitting only produce new windows over the same
//! allocation; nothing is copied until [`ByteSpan::to_vec`] is called.
//!
//! [`LineScanner`] walks a span line by line and reports explicitly whether
//! a line was terminated or whether the data simply ran out.

use std::borrow::Cow;
use std::fmt;
use std::str::Utf8Error;

use bytes::Bytes;

const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// Immutable window into a shared byte buffer.
///
/// Out-of-range construction yields an empty span instead of panicking, so
/// hostile input can never make the parser index outside the buffer.
#[derive(Clone, Default)]
pub struct ByteSpan {
    buf: Bytes,
    offset: usize,
    len: usize,
}

impl ByteSpan {
    /// Creates a span over `buf[offset..offset + len]`.
    ///
    /// # Example
    ///
    /// ```
    /// # use bytes::Bytes;
    /// # use wicket::http::span::ByteSpan;
    /// let span = ByteSpan::new(Bytes::from_static(b"hello"), 1, 3);
    /// assert_eq!(span.as_bytes(), b"ell");
    ///
    /// let bad = ByteSpan::new(Bytes::from_static(b"hello"), 4, 10);
    /// assert!(bad.is_empty());
    /// ```
    pub fn new(buf: Bytes, offset: usize, len: usize) -> Self {
        match offset.checked_add(len) {
            Some(end) if end <= buf.len() => Self { buf, offset, len },
            _ => Self {
                buf,
                offset: 0,
                len: 0,
            },
        }
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self::from(Bytes::from_static(bytes))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of this window inside the backing buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte at `index`, relative to the start of the span.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.as_bytes().get(index).copied()
    }

    pub fn index_of(&self, needle: u8) -> Option<usize> {
        self.index_of_from(needle, 0)
    }

    /// First index of `needle` at or after `from`.
    pub fn index_of_from(&self, needle: u8, from: usize) -> Option<usize> {
        let bytes = self.as_bytes();
        if from >= bytes.len() {
            return None;
        }
        bytes[from..]
            .iter()
            .position(|&b| b == needle)
            .map(|pos| pos + from)
    }

    /// Span from `offset` to the end of this span.
    pub fn substring(&self, offset: usize) -> ByteSpan {
        self.substring_len(offset, self.len.saturating_sub(offset))
    }

    /// Span of `len` bytes starting at `offset`, relative to this span.
    ///
    /// A window reaching past the end of this span is empty, even if the
    /// backing buffer would have room for it.
    pub fn substring_len(&self, offset: usize, len: usize) -> ByteSpan {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => {
                ByteSpan::new(self.buf.clone(), self.offset + offset, len)
            }
            _ => ByteSpan::new(self.buf.clone(), 0, 0),
        }
    }

    /// Splits on `separator`, treating a run of separators as one.
    ///
    /// A leading separator produces a single empty first element; a
    /// trailing separator produces nothing.
    ///
    /// ```
    /// # use wicket::http::span::ByteSpan;
    /// let parts = ByteSpan::from("a,b,,c").split(b',');
    /// let parts: Vec<_> = parts.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    /// assert_eq!(parts, ["a", "b", "c"]);
    /// ```
    pub fn split(&self, separator: u8) -> Vec<ByteSpan> {
        let mut parts = Vec::new();
        let mut i = 0;

        while i < self.len {
            let Some(next) = self.index_of_from(separator, i) else {
                parts.push(self.substring(i));
                break;
            };

            parts.push(self.substring_len(i, next - i));
            i = next + 1;

            while self.get(i) == Some(separator) {
                i += 1;
            }
        }

        parts
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    pub fn to_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Shares the underlying allocation; does not copy.
    pub fn to_bytes(&self) -> Bytes {
        self.buf.slice(self.offset..self.offset + self.len)
    }

    /// Materialises the span into an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl From<Bytes> for ByteSpan {
    fn from(buf: Bytes) -> Self {
        let len = buf.len();
        Self::new(buf, 0, len)
    }
}

impl From<&'static str> for ByteSpan {
    fn from(s: &'static str) -> Self {
        Self::from_static(s.as_bytes())
    }
}

/// Spans compare by content, not by position in their buffers.
impl PartialEq for ByteSpan {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ByteSpan {}

impl PartialEq<&str> for ByteSpan {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for ByteSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ByteSpan")
            .field(&self.to_string_lossy())
            .finish()
    }
}

/// Outcome of [`LineScanner::read_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A line terminated by LF (or CRLF). The terminator is not included.
    Found(ByteSpan),
    /// No terminator before the end of the buffer. `partial` holds whatever
    /// unterminated tail was left; it must not be treated as a complete line.
    NeedMoreData { partial: ByteSpan },
}

/// Sequential, non-restartable line reader over a [`ByteSpan`].
#[derive(Debug)]
pub struct LineScanner {
    span: ByteSpan,
    cursor: usize,
}

impl LineScanner {
    pub fn new(span: impl Into<ByteSpan>) -> Self {
        Self {
            span: span.into(),
            cursor: 0,
        }
    }

    /// Offset just past the last line returned.
    pub fn current_offset(&self) -> usize {
        self.cursor
    }

    pub fn read_line(&mut self) -> LineRead {
        match self.span.index_of_from(LF, self.cursor) {
            Some(lf) => {
                let mut len = lf - self.cursor;
                if len > 0 && self.span.get(lf - 1) == Some(CR) {
                    len -= 1;
                }
                let line = self.span.substring_len(self.cursor, len);
                self.cursor = lf + 1;
                LineRead::Found(line)
            }
            None => {
                let partial = self.span.substring(self.cursor);
                self.cursor = self.span.len();
                LineRead::NeedMoreData { partial }
            }
        }
    }
}
