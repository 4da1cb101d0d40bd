//! Consumer callbacks
//!
//! A [`ClientHandler`] receives every event of a connection's life. All
//! methods have defaults, so a consumer implements only what it needs.
//! Methods returning `bool` let the consumer stop: `false` closes the
//! connection.

use super::client::Connection;
use super::{Error, ResponseHeader};

/// Connection event callbacks
///
/// Callbacks run on the reactor thread and must not block. The
/// [`Connection`] passed in is the live connection; requests, handshakes
/// and WebSocket sends are issued through it.
#[allow(unused_variables)]
pub trait ClientHandler {
    /// The transport is up (TLS included); issue the first request or
    /// handshake here
    fn on_connect(&mut self, conn: &mut Connection) -> bool {
        true
    }

    /// A connection that reached the connected state went away
    fn on_disconnect(&mut self) {}

    /// The connect timer expired before the transport came up
    fn on_connect_timeout(&mut self) {}

    /// Connecting (or the TLS handshake) failed
    fn on_connect_failed(&mut self, err: &Error) {}

    /// No progress for the read/write timeout while an exchange or
    /// handshake was in flight; `true` keeps waiting
    fn on_read_timeout(&mut self, conn: &mut Connection) -> bool {
        false
    }

    /// The response header arrived
    fn on_header(&mut self, conn: &mut Connection, header: &ResponseHeader) -> bool {
        true
    }

    /// Decoded body bytes, in order
    fn on_body_chunk(&mut self, conn: &mut Connection, data: &[u8]) -> bool {
        true
    }

    /// The exchange ended; `true` keeps the connection for another request
    ///
    /// Called exactly once per request. The next request may be queued
    /// with [`Connection::send_request`] before returning `true`.
    fn on_finish(&mut self, conn: &mut Connection, success: bool) -> bool {
        success && conn.keep_alive()
    }

    /// The server accepted the WebSocket upgrade; `true` starts reading
    /// frames
    fn on_handshake_ok(&mut self, conn: &mut Connection) -> bool {
        true
    }

    /// The server refused the upgrade (`status` is 0 if no response came)
    fn on_handshake_failed(&mut self, status: u16) {}

    /// A text frame starts
    fn on_frame_text(&mut self, conn: &mut Connection) -> bool {
        true
    }

    /// A binary frame starts
    fn on_frame_binary(&mut self, conn: &mut Connection) -> bool {
        true
    }

    /// Payload bytes of the current frame
    fn on_frame_data(&mut self, conn: &mut Connection, data: &[u8]) -> bool {
        true
    }

    /// The current frame is complete
    fn on_frame_finish(&mut self, conn: &mut Connection) -> bool {
        true
    }

    /// The server sent a close frame
    fn on_frame_closed(&mut self, code: Option<u16>) {}

    /// Last callback of the connection, right before it releases its
    /// shutdown coordinator
    fn on_destroy(&mut self) {}
}
