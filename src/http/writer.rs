//! Response serialization onto the client connection.
//!
//! [`ResponseWriter`] offers two ways of answering:
//!
//! - one-shot writes (`write_full`, `write_from_file`, `write_error`) that
//!   put a whole response on the wire immediately;
//! - a buffered surface for request handlers (`set_status`,
//!   `append_header`, `send_body`, `send_file`, `flush`) that collects the
//!   status, headers and an ordered list of body chunks and emits them on
//!   flush.
//!
//! Headers go out at most once per response. Write failures are logged,
//! close the writer, and are never retried.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::http::headers::HeaderMap;
use crate::http::mime::content_type_for;
use crate::http::pages;
use crate::http::response::{Response, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Files are streamed in blocks of this size.
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Identity of the server, used in the `Server` header and on error pages.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub virtual_path: String,
}

impl ServerInfo {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            name: cfg.server.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            virtual_path: cfg.server.virtual_path.clone(),
        }
    }

    /// `name/version`, as sent in the `Server` header.
    pub fn product(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Builds a response head: status line, `Server`, `Date`, `Content-Length`
/// when known, the extra headers, `Connection: close` unless keeping the
/// connection alive, and the blank line.
pub fn serialize_head(
    status: StatusCode,
    extra: Option<&HeaderMap>,
    content_length: Option<u64>,
    keep_alive: bool,
    info: &ServerInfo,
) -> Vec<u8> {
    let mut head = String::with_capacity(256);

    head.push_str(&format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    ));
    head.push_str(&format!("Server: {}\r\n", info.product()));
    head.push_str(&format!(
        "Date: {}\r\n",
        httpdate::fmt_http_date(SystemTime::now())
    ));

    if let Some(len) = content_length {
        head.push_str(&format!("Content-Length: {len}\r\n"));
    }

    for (name, value) in extra.into_iter().flat_map(HeaderMap::iter) {
        if content_length.is_some() && name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        if name.eq_ignore_ascii_case("Connection") {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }

    if !keep_alive {
        head.push_str("Connection: close\r\n");
    }

    head.push_str("\r\n");
    head.into_bytes()
}

/// Status, headers and queued body of the response being built.
#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers_sent: bool,
    headers: HeaderMap,
    body_chunks: Vec<Bytes>,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::Ok,
            headers_sent: false,
            headers: HeaderMap::new(),
            body_chunks: Vec::new(),
        }
    }
}

pub struct ResponseWriter<'a, W> {
    stream: &'a mut W,
    info: &'a ServerInfo,
    keep_alive: bool,
    state: ResponseState,
    closed: bool,
    failed: bool,
    body_writes: usize,
    bytes_written: u64,
}

impl<'a, W> ResponseWriter<'a, W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// `keep_alive` is what the request asked for; any response that cannot
    /// be delimited, and every error response, turns it off.
    pub fn new(stream: &'a mut W, info: &'a ServerInfo, keep_alive: bool) -> Self {
        Self {
            stream,
            info,
            keep_alive,
            state: ResponseState::default(),
            closed: false,
            failed: false,
            body_writes: 0,
            bytes_written: 0,
        }
    }

    pub fn info(&self) -> &ServerInfo {
        self.info
    }

    pub fn status(&self) -> StatusCode {
        self.state.status
    }

    pub fn headers_sent(&self) -> bool {
        self.state.headers_sent
    }

    /// Whether the connection has to be closed once this response is done.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the connection may carry another request after this response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive && !self.closed
    }

    /// Number of body writes issued so far.
    pub fn body_writes(&self) -> usize {
        self.body_writes
    }

    /// Total bytes put on the wire, heads included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Marks the connection for closing after this response.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Answers with `Connection: close` if the head has not gone out yet,
    /// and closes once the response is complete.
    pub fn disable_keep_alive(&mut self) {
        self.keep_alive = false;
    }

    /// Sends `100 Continue`. Does not count as the response head.
    pub async fn write_interim_continue(&mut self) -> bool {
        let status = StatusCode::Continue;
        let head = format!(
            "{} {} {}\r\nServer: {}\r\nDate: {}\r\n\r\n",
            HTTP_VERSION,
            status.as_u16(),
            status.reason_phrase(),
            self.info.product(),
            httpdate::fmt_http_date(SystemTime::now())
        );
        self.send(head.as_bytes()).await
    }

    /// Writes a complete response in one write, replacing anything queued.
    pub async fn write_full(
        &mut self,
        status: StatusCode,
        extra: Option<&HeaderMap>,
        body: impl Into<Bytes>,
        keep_alive: bool,
    ) -> bool {
        if self.state.headers_sent {
            warn!(status = status.as_u16(), "Response already started, dropping full response");
            return false;
        }

        let body = body.into();
        let keep_alive = keep_alive && self.keep_alive;

        let mut wire = serialize_head(status, extra, Some(body.len() as u64), keep_alive, self.info);
        wire.extend_from_slice(&body);

        self.state.status = status;
        self.state.headers_sent = true;
        self.state.body_chunks.clear();
        self.keep_alive = keep_alive;

        let sent = self.send(&wire).await;
        if !keep_alive {
            self.closed = true;
        }
        sent
    }

    pub async fn write_response(&mut self, response: &Response, keep_alive: bool) -> bool {
        self.write_full(
            response.status,
            Some(&response.headers),
            response.body.clone(),
            keep_alive,
        )
        .await
    }

    /// Serves a file from disk, streaming it in [`FILE_CHUNK_SIZE`] blocks.
    ///
    /// Missing files get a 404 and files outside the content-type allow-list
    /// a 403; both close the connection.
    pub async fn write_from_file(&mut self, path: &Path, keep_alive: bool) -> bool {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return self.write_error(StatusCode::NotFound, None).await,
        };

        let Some(content_type) = content_type_for(path) else {
            debug!(path = %path.display(), "File type not served");
            return self.write_error(StatusCode::Forbidden, None).await;
        };

        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return self.write_error(StatusCode::NotFound, None).await;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open file");
                return self.write_error(StatusCode::Forbidden, None).await;
            }
        };

        let length = metadata.len();
        let mut extra = HeaderMap::new();
        extra.insert("Content-Type", content_type);

        self.state.status = StatusCode::Ok;
        self.keep_alive = keep_alive && self.keep_alive;
        let head = serialize_head(StatusCode::Ok, Some(&extra), Some(length), self.keep_alive, self.info);
        self.state.headers_sent = true;
        if !self.send(&head).await {
            return false;
        }

        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        let mut remaining = length;

        while remaining > 0 {
            let want = remaining.min(FILE_CHUNK_SIZE as u64) as usize;
            let n = match fill_chunk(&mut file, &mut buf[..want]).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read file");
                    0
                }
            };
            if n == 0 {
                // The file shrank underneath us; the promised length cannot be met.
                self.closed = true;
                return false;
            }
            if !self.write_body_chunk(&buf[..n]).await {
                return false;
            }
            remaining -= n as u64;
        }

        if !self.keep_alive {
            self.closed = true;
        }
        true
    }

    /// Sends the status line and headers without a length.
    ///
    /// Unless `extra` declares a `Content-Length`, the body is delimited by
    /// closing the connection. Does nothing once headers have been sent.
    pub async fn write_headers_only(&mut self, status: StatusCode, extra: Option<&HeaderMap>) -> bool {
        if self.state.headers_sent {
            return true;
        }
        if let Some(extra) = extra {
            for (name, value) in extra.iter() {
                self.state.headers.insert(name, value);
            }
        }
        self.state.status = status;
        self.flush_head(None).await
    }

    /// Writes one block of body bytes, sending the head first if needed.
    pub async fn write_body_chunk(&mut self, chunk: &[u8]) -> bool {
        if self.closed && !self.state.headers_sent {
            return false;
        }
        if !self.state.headers_sent && !self.flush_head(None).await {
            return false;
        }
        if chunk.is_empty() {
            return true;
        }
        self.body_writes += 1;
        self.send(chunk).await
    }

    /// Writes an error page and closes the connection.
    ///
    /// `diagnostic` is only ever embedded as an HTML comment.
    pub async fn write_error(&mut self, status: StatusCode, diagnostic: Option<&str>) -> bool {
        if self.state.headers_sent {
            self.closed = true;
            return false;
        }
        let body = pages::error_page(status, self.info, diagnostic);
        let mut extra = HeaderMap::new();
        extra.insert("Content-Type", "text/html; charset=utf-8");
        self.write_full(status, Some(&extra), body, false).await
    }

    /// Sets the response status. Ignored once headers have been sent.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.state.headers_sent {
            trace!(status = status.as_u16(), "Headers already sent, status ignored");
            return;
        }
        self.state.status = status;
    }

    /// Adds a response header. Ignored once headers have been sent.
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.state.headers_sent {
            trace!("Headers already sent, header ignored");
            return;
        }
        self.state.headers.insert(name, value);
    }

    /// Queues a body chunk; it is written on the next flush.
    pub fn send_body(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.state.body_chunks.push(chunk);
        }
    }

    /// Queues the contents of `path`, flushing between blocks so that at
    /// most one block is held in memory.
    ///
    /// When nothing has been sent yet the file length is declared up front,
    /// which keeps the connection reusable.
    pub async fn send_file(&mut self, path: &Path) -> io::Result<()> {
        let mut file = File::open(path).await?;
        let length = file.metadata().await?.len();

        if !self.state.headers_sent
            && self.state.body_chunks.is_empty()
            && !self.state.headers.contains("Content-Length")
        {
            self.state.headers.insert("Content-Length", length.to_string());
        }

        let mut remaining = length;
        while remaining > 0 {
            let want = remaining.min(FILE_CHUNK_SIZE as u64) as usize;
            let mut buf = vec![0u8; want];
            let n = fill_chunk(&mut file, &mut buf).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file shrank while being sent",
                ));
            }
            buf.truncate(n);
            self.send_body(buf);
            remaining -= n as u64;

            if remaining > 0 {
                self.flush(false).await;
            }
        }

        Ok(())
    }

    /// Sends the head if needed, then every queued chunk in order.
    ///
    /// On the final flush of a response whose head has not gone out yet,
    /// the queued chunks are measured so a `Content-Length` can be sent.
    pub async fn flush(&mut self, final_flush: bool) -> bool {
        if self.closed && !self.state.headers_sent {
            return false;
        }

        if !self.state.headers_sent {
            let length = if final_flush {
                Some(self.state.body_chunks.iter().map(|c| c.len() as u64).sum())
            } else {
                None
            };
            if !self.flush_head(length).await {
                return false;
            }
        }

        let chunks = std::mem::take(&mut self.state.body_chunks);
        for chunk in chunks {
            if !self.write_body_chunk(&chunk).await {
                return false;
            }
        }

        if final_flush && !self.keep_alive {
            self.closed = true;
        }
        true
    }

    /// Sends the head built from the buffered state.
    async fn flush_head(&mut self, content_length: Option<u64>) -> bool {
        let declared = content_length.is_some() || self.state.headers.contains("Content-Length");
        if !declared || self.state.status.as_u16() >= 400 {
            self.keep_alive = false;
        }

        let head = serialize_head(
            self.state.status,
            Some(&self.state.headers),
            content_length,
            self.keep_alive,
            self.info,
        );
        self.state.headers_sent = true;
        self.send(&head).await
    }

    async fn send(&mut self, bytes: &[u8]) -> bool {
        if self.failed {
            return false;
        }

        let result = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.bytes_written += bytes.len() as u64;
                trace!(bytes = bytes.len(), "Wrote response bytes");
                true
            }
            Err(e) => {
                warn!(error = %e, "Write failed, closing connection");
                self.failed = true;
                self.closed = true;
                false
            }
        }
    }
}

/// Reads until `buf` is full or the file ends.
async fn fill_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
