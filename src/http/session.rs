//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS connections.
//!
//! Every session is non-blocking. A call that cannot make progress yields
//! an [`Error::Io`] of kind `WouldBlock`; the caller waits for readiness
//! from the reactor and tries again.

use super::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps {
    /// File descriptor to watch for readiness
    fn fd(&self) -> RawFd;

    /// Drive any protocol handshake one step
    ///
    /// Plain sessions are done immediately.
    fn handshake(&mut self) -> Result<Handshake> {
        Ok(Handshake::Done)
    }

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Progress of a non-blocking handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Done,
    /// Retry once the socket is readable
    WantRead,
    /// Retry once the socket is writable
    WantWrite,
}

/// Plain file descriptor session operations
#[derive(Debug)]
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Start a non-blocking connect to `addr`
    ///
    /// The connect is usually still in progress when this returns; wait for
    /// writability and call [`check_connected`](Self::check_connected).
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;

        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::ConnectFailed(e.to_string())),
        }

        Ok(FdSessionOps {
            stream: socket.into(),
        })
    }

    /// Resolve the outcome of a non-blocking connect after writability
    pub fn check_connected(&self) -> Result<()> {
        if let Some(e) = self.stream.take_error()? {
            return Err(Error::ConnectFailed(e.to_string()));
        }
        match self.stream.peer_addr() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                Err(Error::ConnectFailed("connection refused".to_string()))
            }
            Err(e) => Err(Error::ConnectFailed(e.to_string())),
        }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Unwrap into the underlying stream, e.g. to layer TLS on top
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_connected(session: &FdSessionOps) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match session.check_connected() {
                Ok(()) => return Ok(()),
                Err(e) if Instant::now() > deadline => return Err(e),
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    #[test]
    fn test_fd_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let mut session = FdSessionOps::connect(addr).unwrap();
        wait_connected(&session).unwrap();
        assert_eq!(session.handshake().unwrap(), Handshake::Done);
        handle.join().unwrap();

        let mut buf = [0u8; 5];
        let deadline = Instant::now() + Duration::from_secs(2);
        let n = loop {
            match session.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.is_would_block() && Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10))
                }
                Err(e) => panic!("read failed: {}", e),
            }
        };
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");
        session.close().unwrap();
    }

    #[test]
    fn test_read_would_block() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut session = FdSessionOps::connect(addr).unwrap();
        let (_peer, _) = listener.accept().unwrap();
        wait_connected(&session).unwrap();

        let mut buf = [0u8; 10];
        assert!(session.read(&mut buf).unwrap_err().is_would_block());
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        let result = FdSessionOps::connect(addr).and_then(|session| {
            thread::sleep(Duration::from_millis(50));
            session.check_connected()
        });
        assert!(matches!(result, Err(Error::ConnectFailed(_))));
    }
}
