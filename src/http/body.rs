//! Response body framing and decoding
//!
//! [`Framing`] decides how the end of a body is found; [`BodyDecoder`]
//! removes the framing and, when asked to, inflates a gzip
//! `Content-Encoding` on the fly so every decoded chunk can be handed to
//! the consumer as soon as it is available.

use super::chunked::ChunkedDecoder;
use super::{Error, Method, ResponseHeader, Result};
use flate2::write::GzDecoder;
use std::io::Write;

/// How the end of a response body is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body at all (HEAD, 1xx, 204, 304)
    Empty,
    /// Exactly this many bytes follow the header
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// The body runs until the server closes the connection
    UntilClose,
}

impl Framing {
    /// Select the framing of a response to a request made with `method`
    pub fn for_response(method: Method, header: &ResponseHeader) -> Result<Self> {
        let status = header.status();
        if method == Method::Head
            || status.is_informational()
            || status.code() == 204
            || status.code() == 304
        {
            return Ok(Framing::Empty);
        }

        // Transfer-Encoding overrides Content-Length.
        if header.is_chunked() {
            return Ok(Framing::Chunked);
        }

        match header.content_length()? {
            Some(0) => Ok(Framing::Empty),
            Some(len) => Ok(Framing::Length(len)),
            None => Ok(Framing::UntilClose),
        }
    }
}

/// Streaming body decoder
pub struct BodyDecoder {
    framing: Framing,
    remaining: u64,
    chunked: ChunkedDecoder,
    inflate: Option<GzDecoder<Vec<u8>>>,
    scratch: Vec<u8>,
    delivered: u64,
    complete: bool,
}

impl BodyDecoder {
    /// Create a decoder; `unzip` enables gzip inflation of the payload
    pub fn new(framing: Framing, unzip: bool) -> Self {
        BodyDecoder {
            framing,
            remaining: match framing {
                Framing::Length(len) => len,
                _ => 0,
            },
            chunked: ChunkedDecoder::new(),
            inflate: unzip.then(|| GzDecoder::new(Vec::new())),
            scratch: Vec::new(),
            delivered: 0,
            complete: framing == Framing::Empty,
        }
    }

    /// Decode bytes from `input`, appending the decoded payload to `output`
    ///
    /// Returns (bytes_consumed, is_complete). Bytes past the end of the
    /// body are left unconsumed.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool)> {
        if self.complete {
            return Ok((0, true));
        }

        self.scratch.clear();
        let consumed = match self.framing {
            Framing::Empty => 0,
            Framing::Length(_) => {
                let take = self.remaining.min(input.len() as u64) as usize;
                self.scratch.extend_from_slice(&input[..take]);
                self.remaining -= take as u64;
                take
            }
            Framing::Chunked => {
                let (consumed, _) = self.chunked.decode(input, &mut self.scratch)?;
                consumed
            }
            Framing::UntilClose => {
                self.scratch.extend_from_slice(input);
                input.len()
            }
        };

        let raw = std::mem::take(&mut self.scratch);
        self.emit(&raw, output)?;
        self.scratch = raw;

        let done = match self.framing {
            Framing::Length(_) => self.remaining == 0,
            Framing::Chunked => self.chunked.is_complete(),
            _ => false,
        };
        if done {
            self.finish(output)?;
        }

        Ok((consumed, self.complete))
    }

    /// The peer closed the connection
    ///
    /// Completes a read-until-close body; any other unfinished body was
    /// truncated.
    pub fn finish_eof(&mut self, output: &mut Vec<u8>) -> Result<()> {
        if self.complete {
            return Ok(());
        }
        match self.framing {
            Framing::UntilClose => self.finish(output),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Whether the payload is being inflated
    pub fn is_unzip(&self) -> bool {
        self.inflate.is_some()
    }

    /// Total decoded bytes handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn emit(&mut self, raw: &[u8], output: &mut Vec<u8>) -> Result<()> {
        if raw.is_empty() {
            return Ok(());
        }

        let start = output.len();
        match self.inflate.as_mut() {
            Some(inflate) => {
                inflate
                    .write_all(raw)
                    .and_then(|_| inflate.flush())
                    .map_err(|e| Error::Gzip(e.to_string()))?;
                output.append(inflate.get_mut());
            }
            None => output.extend_from_slice(raw),
        }
        self.delivered += (output.len() - start) as u64;
        Ok(())
    }

    fn finish(&mut self, output: &mut Vec<u8>) -> Result<()> {
        self.complete = true;
        if let Some(inflate) = self.inflate.as_mut() {
            let start = output.len();
            inflate.try_finish().map_err(|e| Error::Gzip(e.to_string()))?;
            output.append(inflate.get_mut());
            self.delivered += (output.len() - start) as u64;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BodyDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyDecoder")
            .field("framing", &self.framing)
            .field("remaining", &self.remaining)
            .field("unzip", &self.is_unzip())
            .field("delivered", &self.delivered)
            .field("complete", &self.complete)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, Status, Version};
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn response(code: u16, fields: &[(&str, &str)]) -> ResponseHeader {
        let headers: Headers = fields
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        ResponseHeader::new(Version::Http11, Status::new(code).unwrap(), "", headers)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_framing_selection() {
        let get = Method::Get;
        assert_eq!(
            Framing::for_response(get, &response(200, &[("Content-Length", "5")])).unwrap(),
            Framing::Length(5)
        );
        assert_eq!(
            Framing::for_response(
                get,
                &response(200, &[("Content-Length", "5"), ("Transfer-Encoding", "chunked")])
            )
            .unwrap(),
            Framing::Chunked
        );
        assert_eq!(
            Framing::for_response(get, &response(200, &[])).unwrap(),
            Framing::UntilClose
        );
        let sized = response(200, &[("Content-Length", "5")]);
        assert_eq!(
            Framing::for_response(Method::Head, &sized).unwrap(),
            Framing::Empty
        );
        assert_eq!(
            Framing::for_response(get, &response(204, &[])).unwrap(),
            Framing::Empty
        );
        assert_eq!(
            Framing::for_response(get, &response(304, &[("Content-Length", "10")])).unwrap(),
            Framing::Empty
        );
    }

    #[test]
    fn test_content_length_exact() {
        let mut decoder = BodyDecoder::new(Framing::Length(5), false);
        let mut out = Vec::new();

        let (consumed, complete) = decoder.decode(b"hel", &mut out).unwrap();
        assert_eq!((consumed, complete), (3, false));

        let (consumed, complete) = decoder.decode(b"loHTTP/1.1", &mut out).unwrap();
        assert_eq!((consumed, complete), (2, true));
        assert_eq!(out, b"hello");
        assert_eq!(decoder.delivered(), 5);
    }

    #[test]
    fn test_truncated_length_body() {
        let mut decoder = BodyDecoder::new(Framing::Length(10), false);
        let mut out = Vec::new();
        decoder.decode(b"short", &mut out).unwrap();
        assert!(matches!(decoder.finish_eof(&mut out), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_until_close() {
        let mut decoder = BodyDecoder::new(Framing::UntilClose, false);
        let mut out = Vec::new();
        assert_eq!(decoder.decode(b"abc", &mut out).unwrap(), (3, false));
        assert_eq!(decoder.decode(b"def", &mut out).unwrap(), (3, false));
        decoder.finish_eof(&mut out).unwrap();
        assert!(decoder.is_complete());
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_gzip_chunks_concatenate_to_plaintext() {
        let plain: Vec<u8> = (0..20_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
        let compressed = gzip(&plain);

        let mut decoder = BodyDecoder::new(Framing::Length(compressed.len() as u64), true);
        let mut out = Vec::new();
        for piece in compressed.chunks(97) {
            let (consumed, _) = decoder.decode(piece, &mut out).unwrap();
            assert_eq!(consumed, piece.len());
        }

        assert!(decoder.is_complete());
        assert!(decoder.is_unzip());
        assert_eq!(out, plain);
        assert_eq!(decoder.delivered(), plain.len() as u64);
    }

    #[test]
    fn test_gzip_inside_chunked() {
        let compressed = gzip(b"hello hello hello");
        let mut wire = format!("{:x}\r\n", compressed.len()).into_bytes();
        wire.extend_from_slice(&compressed);
        wire.extend_from_slice(b"\r\n0\r\n\r\n");

        let mut decoder = BodyDecoder::new(Framing::Chunked, true);
        let mut out = Vec::new();
        let (consumed, complete) = decoder.decode(&wire, &mut out).unwrap();
        assert_eq!(consumed, wire.len());
        assert!(complete);
        assert_eq!(out, b"hello hello hello");
    }

    #[test]
    fn test_corrupt_gzip() {
        let mut decoder = BodyDecoder::new(Framing::Length(12), true);
        let mut out = Vec::new();
        assert!(matches!(
            decoder.decode(b"not gzip at all", &mut out),
            Err(Error::Gzip(_))
        ));
    }
}
