//! Chunked transfer encoding decoding
//!
//! The decoder is a resumable state machine: it consumes whatever part of
//! the input it can, appends the chunk payload to an output vector and
//! reports how many input bytes it used. Unconsumed input stays with the
//! caller until more bytes arrive.

use super::{Error, Result, MAX_HEADER_SIZE};

/// Longest chunk-size line accepted (size plus extensions)
const MAX_CHUNK_LINE: usize = 4096;

/// Chunked decoder
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: u64,
    chunk_read: u64,
    trailer_read: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
            trailer_read: 0,
        }
    }

    /// Decode as much of `input` as possible, appending payload to `output`
    ///
    /// Returns (bytes_consumed, is_complete)
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool)> {
        let mut pos = 0;

        loop {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf_pos) = find_crlf(&input[pos..]) else {
                        if input.len() - pos > MAX_CHUNK_LINE {
                            return Err(Error::InvalidChunkSize(
                                "chunk size line too long".to_string(),
                            ));
                        }
                        break;
                    };

                    let line = String::from_utf8_lossy(&input[pos..pos + crlf_pos]);
                    // Chunk extensions after ';' are ignored.
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    self.chunk_size = u64::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;

                    pos += crlf_pos + 2;
                    self.chunk_read = 0;
                    self.state = if self.chunk_size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let remaining = self.chunk_size - self.chunk_read;
                    let available = (input.len() - pos) as u64;
                    let to_copy = remaining.min(available) as usize;

                    output.extend_from_slice(&input[pos..pos + to_copy]);
                    pos += to_copy;
                    self.chunk_read += to_copy as u64;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    } else {
                        break;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    // Trailer fields are skipped up to the empty line, within
                    // the same bound as a response head.
                    let line = find_crlf(&input[pos..]);
                    let seen = self.trailer_read + line.map_or(input.len() - pos, |n| n + 2);
                    if seen > MAX_HEADER_SIZE {
                        return Err(Error::Protocol(format!(
                            "Trailer section exceeds {} bytes",
                            MAX_HEADER_SIZE
                        )));
                    }
                    let Some(crlf_pos) = line else {
                        break;
                    };
                    self.trailer_read = seen;
                    pos += crlf_pos + 2;
                    if crlf_pos == 0 {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((pos, self.state == DecoderState::Complete))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Find CRLF in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
