//! WebSocket opening handshake (RFC 6455 section 4)

use crate::http::{Error, Method, RequestHeader, ResponseHeader, Result, Status};
use base64::prelude::*;
use sha1::{Digest, Sha1};

/// GUID appended to the key before hashing
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version sent in `Sec-WebSocket-Version`
pub const WS_VERSION: &str = "13";

/// Random 16-byte nonce, base64 encoded
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Expected `Sec-WebSocket-Accept` for a key
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Turn a request header into an upgrade request carrying `key`
pub fn prepare_request(head: &mut RequestHeader, key: &str) {
    head.set_method(Method::Get)
        .set_keep_alive(true)
        .set_upgrade("websocket")
        .set_header("Sec-WebSocket-Key", key)
        .set_header("Sec-WebSocket-Version", WS_VERSION);
}

/// Check the server's answer to an upgrade request made with `key`
pub fn verify(key: &str, resp: &ResponseHeader) -> Result<()> {
    let status = resp.status().code();
    let rejected = || Error::HandshakeRejected { status };

    if resp.status() != Status::SWITCHING_PROTOCOLS {
        return Err(rejected());
    }

    let upgrade = resp.headers().get("Upgrade").unwrap_or("");
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(rejected());
    }
    if !resp.headers().has_token("Connection", "upgrade") {
        return Err(rejected());
    }
    match resp.headers().get("Sec-WebSocket-Accept") {
        Some(accept) if accept == accept_key(key) => Ok(()),
        _ => Err(rejected()),
    }
}
