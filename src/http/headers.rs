//! HTTP headers handling
//!
//! Header fields keep their insertion order. Lookups are case-insensitive;
//! [`Headers::get`] returns the first occurrence and [`Headers::get_all`]
//! every occurrence, for list-valued fields such as `Set-Cookie`.

use super::{Error, Result, CRLF};
use std::fmt;

/// HTTP headers collection
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Append a field, keeping earlier fields with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Replace every field named `name` with a single value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.insert(name, value);
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check whether a comma-separated list field contains `token`
    ///
    /// All occurrences of the field are searched, so `Connection: keep-alive`
    /// and `Connection: Upgrade` on separate lines are both found.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Iterate over all headers in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Append a continuation line to the last field (obsolete line folding)
    pub(crate) fn fold_into_last(&mut self, continuation: &str) -> Result<()> {
        match self.headers.last_mut() {
            Some((_, value)) => {
                value.push(' ');
                value.push_str(continuation.trim());
                Ok(())
            }
            None => Err(Error::InvalidHeader(
                "Continuation line before first header".to_string(),
            )),
        }
    }

    /// Serialize every field as `Name: value\r\n`
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
    }

    /// Parse a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let Some(colon_pos) = line.find(':') else {
            return Err(Error::InvalidHeader(format!("No colon in header: {}", line)));
        };

        let name = &line[..colon_pos];
        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty header name".to_string()));
        }
        // No whitespace is allowed between the field name and the colon.
        if name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(Error::InvalidHeader(format!("Invalid header name: {:?}", name)));
        }

        Ok((name.to_string(), line[colon_pos + 1..].trim().to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            write!(f, "{}: {}{}", name, value, CRLF)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_first_wins() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("content-type", "text/plain");

        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get_all("Content-Type"), vec!["text/html", "text/plain"]);
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_has_token_across_lines() {
        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive");
        headers.insert("connection", "Upgrade, foo");
        headers.insert("Transfer-Encoding", "gzip, chunked");

        assert!(headers.has_token("Connection", "upgrade"));
        assert!(headers.has_token("Connection", "KEEP-ALIVE"));
        assert!(!headers.has_token("Connection", "close"));
        assert!(headers.has_token("transfer-encoding", "chunked"));
    }

    #[test]
    fn test_set_replaces_all() {
        let mut headers = Headers::new();
        headers.insert("X-Key", "a");
        headers.insert("x-key", "b");
        headers.set("X-Key", "c");

        assert_eq!(headers.get_all("X-Key"), vec!["c"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_fold_into_last() {
        let mut headers = Headers::new();
        assert!(headers.fold_into_last(" orphan").is_err());

        headers.insert("X-Long", "first");
        headers.fold_into_last("\t second").unwrap();
        assert_eq!(headers.get("X-Long"), Some("first second"));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        let (_, value) = Headers::parse_header_line("X-Empty:").unwrap();
        assert_eq!(value, "");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
        assert!(Headers::parse_header_line("Bad Name : value").is_err());
    }

    #[test]
    fn test_write_to() {
        let mut small = Headers::new();
        small.insert("A", "1");
        let mut buf = Vec::new();
        small.write_to(&mut buf);
        assert_eq!(buf, b"A: 1\r\n");
    }
}
