//! Stream reader actor
//!
//! Watches any byte-stream endpoint (a socket pair end, a pipe) on the
//! reactor and hands whatever arrives to a [`ReadHandler`]. It is the
//! reactor side of a blocking producer thread: the thread writes, the
//! reader delivers on the reactor thread. When the peer hangs up the
//! reader leaves the reactor and releases its shutdown coordinator.

use std::cell::Cell;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd};
use std::rc::Rc;

use socket2::SockRef;
use tracing::{debug, warn};

use crate::reactor::{Handle, Interest, Token};
use crate::shutdown::ShutdownCoordinator;

/// Callbacks of a stream reader
pub trait ReadHandler {
    /// Bytes arrived; `false` stops reading
    fn on_read(&mut self, data: &[u8]) -> bool;

    /// The reader stopped (peer closed, read error or `on_read` refused)
    fn on_close(&mut self) {}
}

/// Register `stream` with the reactor and read it until it closes
///
/// The stream is switched to non-blocking mode and owned by the reactor
/// from now on; it is closed when the reader stops.
pub fn spawn_reader<S, H>(
    handle: &Handle,
    mut stream: S,
    mut handler: H,
    coordinator: Option<ShutdownCoordinator>,
) -> io::Result<Token>
where
    S: Read + AsFd + 'static,
    H: ReadHandler + 'static,
{
    SockRef::from(&stream).set_nonblocking(true)?;
    let fd = stream.as_fd().as_raw_fd();

    let own_token: Rc<Cell<Option<Token>>> = Rc::new(Cell::new(None));
    let registered = own_token.clone();
    let mut coordinator = coordinator;

    let token = handle.register(fd, Interest::READABLE, move |handle, _| {
        let mut buf = [0u8; 4096];
        let keep = loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    debug!(fd, "reader: peer closed");
                    break false;
                }
                Ok(n) => {
                    if !handler.on_read(&buf[..n]) {
                        break false;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(fd, "reader: read failed: {}", e);
                    break false;
                }
            }
        };

        if !keep {
            handler.on_close();
            if let Some(token) = own_token.take() {
                handle.deregister(token);
            }
            if let Some(coordinator) = coordinator.take() {
                coordinator.release();
            }
        }
    });

    registered.set(Some(token));
    Ok(token)
}
