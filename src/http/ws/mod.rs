//! WebSocket overlay
//!
//! After a successful upgrade the HTTP connection carries WebSocket frames.
//! [`FrameReceiver`] turns the inbound byte stream into [`FrameEvent`]s
//! without waiting for whole payloads, so large frames are delivered
//! piece by piece as they arrive.

pub mod frame;
pub mod handshake;

pub use frame::{apply_mask, encode_frame, FrameHeader, OpCode};
pub use handshake::{accept_key, generate_key};

use crate::http::{Error, Result};
use bytes::{Buf, BytesMut};

/// Something the receiver found in the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A data frame starts; continuation frames report their message type
    Begin(OpCode),
    /// Unmasked payload bytes of the current data frame
    Data(Vec<u8>),
    /// The current data frame is complete
    Finish,
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close frame with its status code, if any
    Close(Option<u16>),
}

#[derive(Debug, Clone, Copy)]
enum RecvState {
    Header,
    Payload {
        fin: bool,
        mask: Option<[u8; 4]>,
        remaining: u64,
        offset: u64,
    },
}

/// Incremental frame parser
#[derive(Debug)]
pub struct FrameReceiver {
    state: RecvState,
    /// Opcode of the fragmented message in progress
    message: Option<OpCode>,
}

impl FrameReceiver {
    pub fn new() -> Self {
        FrameReceiver {
            state: RecvState::Header,
            message: None,
        }
    }

    /// Consume bytes from `buf` up to the next event
    ///
    /// Returns `Ok(None)` when `buf` holds no complete event yet.
    pub fn poll(&mut self, buf: &mut BytesMut) -> Result<Option<FrameEvent>> {
        match self.state {
            RecvState::Header => self.poll_header(buf),
            RecvState::Payload {
                fin,
                mask,
                remaining,
                offset,
            } => {
                if remaining == 0 {
                    self.state = RecvState::Header;
                    if fin {
                        self.message = None;
                    }
                    return Ok(Some(FrameEvent::Finish));
                }
                if buf.is_empty() {
                    return Ok(None);
                }

                let take = remaining.min(buf.len() as u64) as usize;
                let mut data = buf.split_to(take).to_vec();
                if let Some(key) = mask {
                    apply_mask(&mut data, key, offset);
                }
                self.state = RecvState::Payload {
                    fin,
                    mask,
                    remaining: remaining - take as u64,
                    offset: offset + take as u64,
                };
                Ok(Some(FrameEvent::Data(data)))
            }
        }
    }

    fn poll_header(&mut self, buf: &mut BytesMut) -> Result<Option<FrameEvent>> {
        let Some((header, header_len)) = FrameHeader::parse(buf)? else {
            return Ok(None);
        };

        if header.opcode.is_control() {
            // Control payloads are at most 125 bytes; wait for all of it.
            let total = header_len + header.payload_len as usize;
            if buf.len() < total {
                return Ok(None);
            }
            buf.advance(header_len);
            let mut payload = buf.split_to(header.payload_len as usize).to_vec();
            if let Some(key) = header.mask {
                apply_mask(&mut payload, key, 0);
            }
            return Ok(Some(control_event(header.opcode, payload)?));
        }

        let opcode = match (header.opcode, self.message) {
            (OpCode::Continuation, Some(message)) => message,
            (OpCode::Continuation, None) => {
                return Err(Error::Protocol(
                    "WebSocket continuation frame without a message".to_string(),
                ))
            }
            (_, Some(_)) => {
                return Err(Error::Protocol(
                    "WebSocket data frame inside a fragmented message".to_string(),
                ))
            }
            (opcode, None) => opcode,
        };

        buf.advance(header_len);
        self.message = Some(opcode);
        self.state = RecvState::Payload {
            fin: header.fin,
            mask: header.mask,
            remaining: header.payload_len,
            offset: 0,
        };
        Ok(Some(FrameEvent::Begin(opcode)))
    }
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}

fn control_event(opcode: OpCode, payload: Vec<u8>) -> Result<FrameEvent> {
    match opcode {
        OpCode::Ping => Ok(FrameEvent::Ping(payload)),
        OpCode::Pong => Ok(FrameEvent::Pong(payload)),
        OpCode::Close => match payload.len() {
            0 => Ok(FrameEvent::Close(None)),
            1 => Err(Error::Protocol("WebSocket close payload of one byte".to_string())),
            _ => Ok(FrameEvent::Close(Some(u16::from_be_bytes([payload[0], payload[1]])))),
        },
        _ => Err(Error::Protocol(format!("{:?} is not a control opcode", opcode))),
    }
}

/// Per-connection WebSocket state
#[derive(Debug)]
pub struct WsSession {
    key: String,
    verified: bool,
    receiver: FrameReceiver,
}

impl WsSession {
    /// Start a handshake with a fresh key
    pub fn new() -> Self {
        WsSession {
            key: generate_key(),
            verified: false,
            receiver: FrameReceiver::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub(crate) fn set_verified(&mut self) {
        self.verified = true;
    }

    pub fn receiver(&mut self) -> &mut FrameReceiver {
        &mut self.receiver
    }

    /// Encode a client frame under a fresh random mask
    pub fn encode(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        encode_frame(opcode, payload, Some(rand::random()))
    }
}

impl Default for WsSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(receiver: &mut FrameReceiver, buf: &mut BytesMut) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        while let Some(event) = receiver.poll(buf).unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_single_text_frame() {
        let mut receiver = FrameReceiver::new();
        let mut buf = BytesMut::from(&encode_frame(OpCode::Text, b"hi", None)[..]);

        assert_eq!(
            drain(&mut receiver, &mut buf),
            vec![
                FrameEvent::Begin(OpCode::Text),
                FrameEvent::Data(b"hi".to_vec()),
                FrameEvent::Finish,
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_payload_split_across_reads() {
        let wire = encode_frame(OpCode::Binary, b"abcdefgh", Some([1, 2, 3, 4]));
        let mut receiver = FrameReceiver::new();
        let mut buf = BytesMut::new();
        let mut payload = Vec::new();
        let mut finished = 0;

        for piece in wire.chunks(3) {
            buf.extend_from_slice(piece);
            for event in drain(&mut receiver, &mut buf) {
                match event {
                    FrameEvent::Data(data) => payload.extend(data),
                    FrameEvent::Finish => finished += 1,
                    FrameEvent::Begin(op) => assert_eq!(op, OpCode::Binary),
                    other => panic!("unexpected {:?}", other),
                }
            }
        }

        assert_eq!(payload, b"abcdefgh");
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_continuation_inherits_type() {
        let mut wire = Vec::new();
        FrameHeader {
            fin: false,
            opcode: OpCode::Text,
            mask: None,
            payload_len: 3,
        }
        .encode(&mut wire);
        wire.extend_from_slice(b"abc");
        // A ping may arrive between fragments.
        wire.extend(encode_frame(OpCode::Ping, b"p", None));
        FrameHeader {
            fin: true,
            opcode: OpCode::Continuation,
            mask: None,
            payload_len: 0,
        }
        .encode(&mut wire);

        let mut receiver = FrameReceiver::new();
        let mut buf = BytesMut::from(&wire[..]);
        assert_eq!(
            drain(&mut receiver, &mut buf),
            vec![
                FrameEvent::Begin(OpCode::Text),
                FrameEvent::Data(b"abc".to_vec()),
                FrameEvent::Finish,
                FrameEvent::Ping(b"p".to_vec()),
                FrameEvent::Begin(OpCode::Text),
                FrameEvent::Finish,
            ]
        );
        assert!(receiver.message.is_none());
    }

    #[test]
    fn test_close_frame() {
        let mut receiver = FrameReceiver::new();
        let frame = encode_frame(OpCode::Close, &1000u16.to_be_bytes(), None);
        let mut buf = BytesMut::from(&frame[..]);
        assert_eq!(
            receiver.poll(&mut buf).unwrap(),
            Some(FrameEvent::Close(Some(1000)))
        );

        let mut buf = BytesMut::from(&encode_frame(OpCode::Close, &[], None)[..]);
        assert_eq!(receiver.poll(&mut buf).unwrap(), Some(FrameEvent::Close(None)));
    }

    #[test]
    fn test_orphan_continuation() {
        let mut receiver = FrameReceiver::new();
        let mut buf = BytesMut::from(&encode_frame(OpCode::Continuation, b"x", None)[..]);
        assert!(receiver.poll(&mut buf).is_err());
    }

    #[test]
    fn test_client_frames_are_masked() {
        let wire = WsSession::encode(OpCode::Text, b"hello");
        let (header, len) = FrameHeader::parse(&wire).unwrap().unwrap();
        assert!(header.mask.is_some());

        let mut payload = wire[len..].to_vec();
        apply_mask(&mut payload, header.mask.unwrap(), 0);
        assert_eq!(payload, b"hello");
    }
}
