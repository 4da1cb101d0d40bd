//! HTTP response header parsing
//!
//! The parser is incremental: bytes accumulate in the caller's buffer and
//! [`ResponseParser::parse`] is called after every read. It only remembers
//! how far it has already scanned for the blank line terminating the header
//! block, so each byte is scanned once.

use super::{
    Error, Headers, ResponseHeader, Result, Status, Version, MAX_HEADERS, MAX_HEADER_SIZE,
};

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON\r\n
/// Example: HTTP/1.1 200 OK\r\n
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::from_str(parts[0])?;
    if parts[1].len() != 3 {
        return Err(Error::InvalidStatus(parts[1].to_string()));
    }
    let code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(parts[1].to_string()))?;
    let status = Status::new(code)?;
    let reason = match parts.get(2) {
        Some(reason) => reason.to_string(),
        None => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Parse a complete header block (without the terminating blank line)
///
/// More than [`MAX_HEADERS`] fields is an error.
pub fn parse_header_block(block: &[u8]) -> Result<ResponseHeader> {
    let text = std::str::from_utf8(block)
        .map_err(|_| Error::Parse("Response header is not valid UTF-8".to_string()))?;

    let mut lines = text.split(super::CRLF);
    let status_line = lines
        .next()
        .ok_or_else(|| Error::Parse("Missing status line".to_string()))?;
    let (version, status, reason) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            headers.fold_into_last(line)?;
            continue;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(Error::Parse(format!(
                "Response has more than {} header fields",
                MAX_HEADERS
            )));
        }
        let (name, value) = Headers::parse_header_line(line)?;
        headers.insert(name, value);
    }

    Ok(ResponseHeader::new(version, status, reason, headers))
}

/// Incremental HTTP response header parser
#[derive(Debug)]
pub struct ResponseParser {
    scanned: usize,
    max_size: usize,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        ResponseParser {
            scanned: 0,
            max_size: MAX_HEADER_SIZE,
        }
    }

    /// Limit the size of the header block
    pub fn with_max_size(max_size: usize) -> Self {
        ResponseParser {
            scanned: 0,
            max_size,
        }
    }

    /// Look for a complete header block at the start of `buf`
    ///
    /// Returns the parsed header and the number of bytes it occupied
    /// (terminator included), `Ok(None)` if more data is needed, or an error
    /// if the header is malformed or exceeds the size limit.
    pub fn parse(&mut self, buf: &[u8]) -> Result<Option<(ResponseHeader, usize)>> {
        // Leading empty lines before a status line are tolerated.
        let skip = buf
            .chunks(2)
            .take_while(|pair| *pair == b"\r\n")
            .count()
            * 2;
        let start = self.scanned.saturating_sub(3).max(skip);

        let Some(pos) = buf[start..].windows(4).position(|w| w == b"\r\n\r\n") else {
            self.scanned = buf.len();
            if buf.len() - skip > self.max_size {
                return Err(Error::Parse(format!(
                    "Response header exceeds {} bytes",
                    self.max_size
                )));
            }
            return Ok(None);
        };

        let end = start + pos;
        let header = parse_header_block(&buf[skip..end])?;
        self.scanned = 0;
        Ok(Some((header, end + 4)))
    }

    /// Reset the parser for the next response
    pub fn reset(&mut self) {
        self.scanned = 0;
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
