//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{Handshake, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{ErrorCode, Ssl, SslStream};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use tracing::debug;

/// TLS session operations
///
/// Wraps an OpenSSL `SslStream` over a non-blocking TCP stream. The
/// handshake is driven step by step through [`SessionOps::handshake`].
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    established: bool,
    failed: bool,
}

impl TlsSessionOps {
    /// Prepare a client session on a connected TCP stream
    ///
    /// No bytes are exchanged until the first `handshake` call.
    pub fn new(tcp_stream: TcpStream, config: &TlsConfig) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername)?;
            if config.verify_peer {
                ssl.param_mut().set_host(servername)?;
            }
        }

        Ok(TlsSessionOps {
            stream: SslStream::new(ssl, tcp_stream)?,
            established: false,
            failed: false,
        })
    }

    /// Negotiated protocol version, e.g. `TLSv1.3`
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Negotiated ALPN protocol
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.stream.ssl().selected_alpn_protocol()
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

impl SessionOps for TlsSessionOps {
    fn fd(&self) -> RawFd {
        self.stream.get_ref().as_raw_fd()
    }

    fn handshake(&mut self) -> HttpResult<Handshake> {
        if self.established {
            return Ok(Handshake::Done);
        }

        match self.stream.connect() {
            Ok(()) => {
                self.established = true;
                debug!(
                    "TLS established: {} {}",
                    self.stream.ssl().version_str(),
                    self.stream
                        .ssl()
                        .current_cipher()
                        .map(|c| c.name())
                        .unwrap_or("-")
                );
                Ok(Handshake::Done)
            }
            Err(e) if e.code() == ErrorCode::WANT_READ => Ok(Handshake::WantRead),
            Err(e) if e.code() == ErrorCode::WANT_WRITE => Ok(Handshake::WantWrite),
            Err(e) => {
                self.failed = true;
                Err(Error::Tls(TlsError::HandshakeFailed(e.to_string())))
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::WouldBlock {
                    self.failed = true;
                }
                Err(Error::Io(e))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::WouldBlock {
                    self.failed = true;
                }
                Err(Error::Io(e))
            }
        }
    }

    fn close(&mut self) -> HttpResult<()> {
        // Send close_notify if the session is healthy; a non-blocking socket
        // may not take it, which is fine.
        if self.established && !self.failed {
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for TlsSessionOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSessionOps")
            .field("fd", &self.fd())
            .field("established", &self.established)
            .field("failed", &self.failed)
            .finish()
    }
}
