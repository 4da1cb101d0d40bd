//! WebSocket frame header codec (RFC 6455 section 5.2)

use crate::http::{Error, Result};

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::Protocol(format!("Reserved WebSocket opcode {:#x}", value))),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Parse a frame header from the start of `buf`
    ///
    /// Returns the header and its encoded length, or `Ok(None)` if `buf`
    /// does not hold the whole header yet.
    pub fn parse(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        if buf[0] & 0x70 != 0 {
            return Err(Error::Protocol("WebSocket RSV bits set without extension".to_string()));
        }
        let opcode = OpCode::from_u8(buf[0] & 0x0F)?;
        let masked = buf[1] & 0x80 != 0;

        let (payload_len, mut pos) = match buf[1] & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(len);
                if len >> 63 != 0 {
                    return Err(Error::Protocol("WebSocket payload length overflow".to_string()));
                }
                (len, 10)
            }
            len => (len as u64, 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(Error::Protocol("Fragmented WebSocket control frame".to_string()));
            }
            if payload_len > MAX_CONTROL_PAYLOAD {
                return Err(Error::Protocol(format!(
                    "WebSocket control frame too long: {}",
                    payload_len
                )));
            }
        }

        let mask = if masked {
            if buf.len() < pos + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[pos..pos + 4]);
            pos += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((
            FrameHeader {
                fin,
                opcode,
                mask,
                payload_len,
            },
            pos,
        )))
    }

    /// Append the encoded header to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(if self.fin { 0x80 } else { 0 } | self.opcode.as_u8());

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        if self.payload_len < 126 {
            buf.push(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= u16::MAX as u64 {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(self.payload_len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&self.payload_len.to_be_bytes());
        }

        if let Some(key) = self.mask {
            buf.extend_from_slice(&key);
        }
    }
}

/// XOR `data` with the masking key
///
/// `offset` is the position of `data[0]` within the frame payload, so a
/// payload can be unmasked piece by piece.
pub fn apply_mask(data: &mut [u8], key: [u8; 4], offset: u64) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[((offset + i as u64) % 4) as usize];
    }
}

/// Encode a complete single-frame message
pub fn encode_frame(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let header = FrameHeader {
        fin: true,
        opcode,
        mask,
        payload_len: payload.len() as u64,
    };

    let mut buf = Vec::with_capacity(payload.len() + 14);
    header.encode(&mut buf);
    let start = buf.len();
    buf.extend_from_slice(payload);
    if let Some(key) = mask {
        apply_mask(&mut buf[start..], key, 0);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unmasked_text() {
        let (header, len) = FrameHeader::parse(&[0x81, 0x05, b'H']).unwrap().unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.mask, None);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_parse_extended_lengths() {
        let (header, len) = FrameHeader::parse(&[0x82, 126, 0x01, 0x00]).unwrap().unwrap();
        assert_eq!(header.payload_len, 256);
        assert_eq!(len, 4);

        let mut buf = vec![0x02, 127];
        buf.extend_from_slice(&65536u64.to_be_bytes());
        let (header, len) = FrameHeader::parse(&buf).unwrap().unwrap();
        assert!(!header.fin);
        assert_eq!(header.opcode, OpCode::Binary);
        assert_eq!(header.payload_len, 65536);
        assert_eq!(len, 10);
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(FrameHeader::parse(&[0x81]).unwrap().is_none());
        assert!(FrameHeader::parse(&[0x82, 126, 0x01]).unwrap().is_none());
        assert!(FrameHeader::parse(&[0x81, 0x85, 1, 2]).unwrap().is_none());
    }

    #[test]
    fn test_protocol_violations() {
        // reserved opcode
        assert!(FrameHeader::parse(&[0x83, 0x00]).is_err());
        // RSV1 without extension
        assert!(FrameHeader::parse(&[0xC1, 0x00]).is_err());
        // fragmented ping
        assert!(FrameHeader::parse(&[0x09, 0x00]).is_err());
        // oversized close
        assert!(FrameHeader::parse(&[0x88, 126, 0x00, 0x7E]).is_err());
    }

    #[test]
    fn test_masked_frame_rfc_example() {
        // RFC 6455 5.7: masked "Hello"
        let wire = encode_frame(OpCode::Text, b"Hello", Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            wire,
            [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );

        let (header, len) = FrameHeader::parse(&wire).unwrap().unwrap();
        let mut payload = wire[len..].to_vec();
        // unmask in two pieces
        let (a, b) = payload.split_at_mut(2);
        apply_mask(a, header.mask.unwrap(), 0);
        apply_mask(b, header.mask.unwrap(), 2);
        assert_eq!(payload, b"Hello");
    }
}
