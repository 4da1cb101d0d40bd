//! TLS support for HTTP connections
//!
//! The TLS layer follows the session operations pattern:
//!
//! 1. `TlsConfig` defines TLS settings (versions, ciphers, SNI, verification)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. The client state machine is unchanged; it drives the handshake
//!    through `SessionOps::handshake` and then reads and writes as usual
//!
//! # Examples
//!
//! ```no_run
//! use aioclient::http::tls::{TlsConfig, TlsVersion};
//!
//! let tls_config = TlsConfig::client()?
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)?
//!     .servername("example.com")
//!     .verify_peer(true)?
//!     .build()?;
//! # Ok::<(), aioclient::http::tls::TlsError>(())
//! ```

pub mod config;
pub mod session;

pub use config::{ClientConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
