use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::http::headers::HeaderMap;

/// Characters that are never allowed in a decoded request path.
const BAD_PATH_CHARS: &[char] = &['%', '>', '<', ':', '\\'];

/// HTTP request methods understood by the server.
///
/// Only the verbs needed for static serving and simple uploads are
/// accepted; anything else is rejected while framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use wicket::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
        }
    }

    /// Whether requests with this method carry a Content-Length delimited body.
    ///
    /// GET and DELETE are always treated as bodiless, whatever their headers say.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT)
    }
}

/// A fully framed HTTP request, handed to the request handler.
///
/// The body is always completely buffered before the request is built.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method
    pub method: Method,
    /// The request target as sent on the wire (path plus query)
    pub target: String,
    /// Percent-decoded path, without the query string
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: String,
    /// HTTP version, `HTTP/1.0` when the request line omitted it
    pub version: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Header block text between the request line and the blank line
    pub raw_headers: String,
    /// Request body; empty for GET and DELETE
    pub body: Bytes,
    /// Peer address of the connection
    pub remote_addr: Option<SocketAddr>,
    /// Local address the connection was accepted on
    pub local_addr: Option<SocketAddr>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<String>,
    headers: HeaderMap,
    raw_headers: String,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: None,
            headers: HeaderMap::new(),
            raw_headers: String::new(),
            body: Bytes::new(),
            remote_addr: None,
            local_addr: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the raw request target; path and query are derived from it.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn raw_headers(mut self, raw: impl Into<String>) -> Self {
        self.raw_headers = raw.into();
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn local_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.local_addr = addr;
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let target = self.target.ok_or("target missing")?;
        let (path, query) = split_target(&target);

        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: decode_path(path),
            query: query.to_string(),
            target,
            version: self.version.unwrap_or_else(|| "HTTP/1.0".to_string()),
            headers: self.headers,
            raw_headers: self.raw_headers,
            body: self.body,
            remote_addr: self.remote_addr,
            local_addr: self.local_addr,
        })
    }
}

impl Request {
    /// Retrieves a header value by name (case-insensitive).
    ///
    /// # Arguments
    ///
    /// * `key` - Header name to look up
    ///
    /// # Returns
    ///
    /// `Some(&str)` with the header value if present, `None` otherwise.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Retrieves the Content-Length header value and parses it as a usize.
    ///
    /// Returns 0 if the header is missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// An explicit `Connection: close` or `Connection: keep-alive` token wins.
    /// Without one, HTTP/1.1 defaults to keep-alive and HTTP/1.0 to close.
    pub fn keep_alive(&self) -> bool {
        if let Some(value) = self.header("Connection") {
            let mut tokens = value.split(',').map(str::trim);
            if tokens.clone().any(|t| t.eq_ignore_ascii_case("close")) {
                return false;
            }
            if tokens.any(|t| t.eq_ignore_ascii_case("keep-alive")) {
                return true;
            }
        }
        self.version.eq_ignore_ascii_case("HTTP/1.1")
    }

    /// Path up to and including the last segment that looks like a file.
    ///
    /// For `/app/page.htm/extra` this is `/app/page.htm`.
    pub fn file_path(&self) -> &str {
        let (file, _) = split_path_info(&self.path);
        file
    }

    /// Trailing path after [`Request::file_path`], e.g. `/extra`.
    pub fn path_info(&self) -> &str {
        let (_, info) = split_path_info(&self.path);
        info
    }

    /// Whether the peer is on a loopback address.
    pub fn is_local(&self) -> bool {
        match self.remote_addr.map(|addr| addr.ip()) {
            Some(IpAddr::V4(ip)) => ip.is_loopback(),
            Some(IpAddr::V6(ip)) => {
                ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
            }
            None => false,
        }
    }

    /// Rewrites the decoded path, keeping the query string.
    ///
    /// Used when a directory request is redirected internally to its
    /// default document.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
        self.target = if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        };
    }
}

/// Splits a request target into path and query at the first `?`.
pub fn split_target(target: &str) -> (&str, &str) {
    match target.find('?') {
        Some(idx) if idx > 0 => (&target[..idx], &target[idx + 1..]),
        _ => (target, ""),
    }
}

/// Percent-decodes a path when it contains escapes. Invalid UTF-8 is replaced.
pub fn decode_path(path: &str) -> String {
    if path.contains('%') {
        percent_decode_str(path).decode_utf8_lossy().into_owned()
    } else {
        path.to_string()
    }
}

/// Rejects decoded paths that could escape the site root or confuse the
/// filesystem mapping: `..`, `//`, and any of `% > < : \`.
///
/// # Example
///
/// ```
/// # use wicket::http::request::is_bad_path;
/// assert!(is_bad_path("/a/../etc/passwd"));
/// assert!(is_bad_path("/a//b"));
/// assert!(is_bad_path("/c:/windows"));
/// assert!(!is_bad_path("/docs/index.html"));
/// ```
pub fn is_bad_path(path: &str) -> bool {
    path.contains(BAD_PATH_CHARS) || path.contains("..") || path.contains("//")
}

fn split_path_info(path: &str) -> (&str, &str) {
    let last_dot = path.rfind('.');
    let last_slash = path.rfind('/');

    if let (Some(dot), Some(slash)) = (last_dot, last_slash) {
        if dot < slash {
            if let Some(cut) = path[dot..].find('/').map(|i| i + dot) {
                return (&path[..cut], &path[cut..]);
            }
        }
    }

    (path, "")
}
