//! Asynchronous HTTP/1.1 client
//!
//! This module provides a callback-driven HTTP/1.1 client that runs on the
//! [`Reactor`](crate::reactor::Reactor) and can upgrade its connection to
//! the WebSocket protocol.
//!
//! # Architecture
//!
//! The client is a state machine driven by reactor readiness events:
//!
//! - `SessionOps` abstracts the transport (plain TCP or TLS), exactly as the
//!   blocking tools built on this crate's session layer do
//! - `ResponseParser` and `BodyDecoder` turn inbound bytes into a header and
//!   a stream of decoded body chunks (chunked, gzip)
//! - `Client` owns the connection and reports progress to a
//!   `ClientHandler`, which decides what to send and whether to keep the
//!   connection after each exchange
//! - the `ws` module layers WebSocket framing on the same connection
//! - `dns` resolves host names on a helper thread, so `open` never blocks
//!   the reactor
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use aioclient::http::{Client, ClientHandler, Connection};
//! use aioclient::reactor::Reactor;
//!
//! struct Get;
//!
//! impl ClientHandler for Get {
//!     fn on_connect(&mut self, conn: &mut Connection) -> bool {
//!         conn.send_request(None).is_ok()
//!     }
//!
//!     fn on_body_chunk(&mut self, _conn: &mut Connection, data: &[u8]) -> bool {
//!         print!("{}", String::from_utf8_lossy(data));
//!         true
//!     }
//! }
//!
//! let mut reactor = Reactor::new().unwrap();
//! let mut builder = Client::builder(&reactor.handle());
//! builder.request_header().set_host("example.com");
//! let _client = builder
//!     .open(Get, "example.com:80", Duration::from_secs(5), Duration::from_secs(5))
//!     .unwrap();
//! reactor.run().unwrap();
//! ```

pub mod body;
pub mod chunked;
pub mod client;
pub mod dns;
pub mod handler;
pub mod headers;
pub mod message;
pub mod parser;
pub mod session;
pub mod tls;
pub mod ws;

pub use body::{BodyDecoder, Framing};
pub use client::{Client, ClientBuilder, Connection, State};
pub use dns::DnsConfig;
pub use handler::ClientHandler;
pub use headers::Headers;
pub use message::{Method, RequestHeader, ResponseHeader, Status, Version};
pub use parser::ResponseParser;
pub use session::{FdSessionOps, Handshake, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Connect timeout")]
    ConnectTimeout,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Gzip decode error: {0}")]
    Gzip(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket handshake rejected with status {status}")]
    HandshakeRejected { status: u16 },

    #[error("Operation not allowed in state {0:?}")]
    InvalidState(State),
}

impl Error {
    /// Check whether this is a non-blocking "try again" condition
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }

    /// Check whether the peer violated the wire grammar
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::InvalidVersion(_)
                | Error::InvalidStatus(_)
                | Error::InvalidHeader(_)
                | Error::InvalidChunkSize(_)
                | Error::Gzip(_)
                | Error::Protocol(_)
        )
    }
}

/// Maximum number of header fields in a response; more is a parse error
pub const MAX_HEADERS: usize = 128;

/// Maximum size of a response header block
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
