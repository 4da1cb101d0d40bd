//! HTTP message types
//!
//! [`RequestHeader`] is the mutable builder a consumer fills in before an
//! exchange; [`ResponseHeader`] is what the parser produces from the wire.

use super::{Error, Headers, Result, CRLF};
use std::fmt;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    /// Parse version from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    pub const SWITCHING_PROTOCOLS: Status = Status { code: 101 };
    pub const OK: Status = Status { code: 200 };
    pub const NO_CONTENT: Status = Status { code: 204 };
    pub const NOT_MODIFIED: Status = Status { code: 304 };

    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            426 => "Upgrade Required",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// Request header builder
///
/// Setters chain through `&mut Self` so a consumer can adjust the header a
/// connection owns in place:
///
/// ```
/// use aioclient::http::RequestHeader;
///
/// let mut head = RequestHeader::new();
/// head.set_url("/index.html")
///     .set_host("example.com")
///     .set_content_length(0)
///     .accept_gzip(true)
///     .set_keep_alive(true);
///
/// let wire = String::from_utf8(head.build_request()).unwrap();
/// assert!(wire.starts_with("GET /index.html HTTP/1.1\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestHeader {
    method: Method,
    url: Option<String>,
    version: Version,
    host: Option<String>,
    content_length: Option<u64>,
    accept_gzip: bool,
    keep_alive: bool,
    upgrade: Option<String>,
    headers: Headers,
}

impl RequestHeader {
    /// Create a `GET /` request header with keep-alive disabled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = Some(url.into());
        self
    }

    pub fn set_version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    pub fn set_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = Some(host.into());
        self
    }

    pub fn set_content_length(&mut self, len: u64) -> &mut Self {
        self.content_length = Some(len);
        self
    }

    /// Advertise `Accept-Encoding: gzip`
    pub fn accept_gzip(&mut self, on: bool) -> &mut Self {
        self.accept_gzip = on;
        self
    }

    pub fn set_keep_alive(&mut self, on: bool) -> &mut Self {
        self.keep_alive = on;
        self
    }

    /// Request a protocol upgrade (`Connection: Upgrade`)
    pub fn set_upgrade(&mut self, protocol: impl Into<String>) -> &mut Self {
        self.upgrade = Some(protocol.into());
        self
    }

    /// Set an extra header field, replacing any previous value
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Add an extra header field
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or("/")
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_accept_gzip(&self) -> bool {
        self.accept_gzip
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn upgrade(&self) -> Option<&str> {
        self.upgrade.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Serialize the request line and header fields
    pub fn build_request(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        buf.extend_from_slice(self.method.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.url().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        let mut fixed = Headers::new();
        if let Some(host) = &self.host {
            fixed.insert("Host", host.as_str());
        }
        if let Some(len) = self.content_length {
            fixed.insert("Content-Length", len.to_string());
        }
        if self.accept_gzip {
            fixed.insert("Accept-Encoding", "gzip");
        }
        match &self.upgrade {
            Some(protocol) => {
                fixed.insert("Connection", "Upgrade");
                fixed.insert("Upgrade", protocol.as_str());
            }
            None if self.keep_alive => fixed.insert("Connection", "keep-alive"),
            None => fixed.insert("Connection", "close"),
        }
        fixed.write_to(&mut buf);
        self.headers.write_to(&mut buf);

        buf.extend_from_slice(CRLF.as_bytes());
        buf
    }
}

/// Parsed response status line and header fields
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
}

impl ResponseHeader {
    pub fn new(
        version: Version,
        status: Status,
        reason: impl Into<String>,
        headers: Headers,
    ) -> Self {
        ResponseHeader {
            version,
            status,
            reason: reason.into(),
            headers,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Declared `Content-Length`, if any
    pub fn content_length(&self) -> Result<Option<u64>> {
        let values = self.headers.get_all("Content-Length");
        let Some(first) = values.first() else {
            return Ok(None);
        };

        let len = first
            .parse::<u64>()
            .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", first)))?;

        if values.iter().any(|v| v.parse::<u64>().ok() != Some(len)) {
            return Err(Error::Parse("Conflicting Content-Length fields".to_string()));
        }
        Ok(Some(len))
    }

    /// Check for `Transfer-Encoding: chunked`
    pub fn is_chunked(&self) -> bool {
        self.headers.has_token("Transfer-Encoding", "chunked")
    }

    /// Check for a gzip `Content-Encoding`
    pub fn is_transfer_gzip(&self) -> bool {
        self.headers.has_token("Content-Encoding", "gzip")
            || self.headers.has_token("Content-Encoding", "x-gzip")
    }

    /// Whether the server intends to keep the connection open
    ///
    /// HTTP/1.1 defaults to persistent connections unless the server sends
    /// `Connection: close`; HTTP/1.0 requires an explicit `keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.headers.has_token("Connection", "close"),
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
        }
    }

    /// Render the header back to text, for display
    pub fn build_response(&self) -> String {
        format!(
            "{} {} {}{}{}",
            self.version,
            self.status.code(),
            self.reason,
            CRLF,
            self.headers
        )
    }
}
