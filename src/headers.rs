//! Handshake header parsing
//!
//! The parser is deliberately forgiving: lines it cannot make sense of are
//! dropped instead of rejected. Validation belongs to the negotiator.

use std::collections::HashMap;

/// Lower-cased header names mapped to trimmed values.
///
/// Besides regular `key: value` pairs it remembers whether a request line
/// starting with `GET` was seen. That marker is only reachable through
/// [`HeaderMap::request_method`] and [`HeaderMap::is_get`]; [`HeaderMap::get`]
/// sees client-supplied headers only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
    request_method: Option<&'static str>,
}

impl HeaderMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, lower-casing the name. A later insert for the same
    /// name overwrites the earlier value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Look up a header by name, ignoring ASCII case
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether a header is present
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The request method recorded from the request line, if any
    pub fn request_method(&self) -> Option<&str> {
        self.request_method
    }

    /// Whether the request line was a `GET`
    pub fn is_get(&self) -> bool {
        self.request_method == Some("GET")
    }

    /// Number of regular headers (the request line marker is not counted)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no regular header was parsed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Parse CRLF-separated request text into a [`HeaderMap`].
///
/// A line is split on its first colon; the name is lower-cased and the rest
/// of the line (further colons included) is trimmed to form the value. A line
/// without a colon that begins with `GET` marks the request as a GET; any
/// other line is ignored.
pub fn parse_headers(text: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for line in text.split("\r\n") {
        match line.split_once(':') {
            Some((name, value)) => headers.insert(name, value.trim()),
            None => {
                if line.starts_with("GET") {
                    headers.request_method = Some("GET");
                }
            }
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn test_parse_request() {
        let headers = parse_headers(REQUEST);

        assert!(headers.is_get());
        assert_eq!(headers.len(), 5);
        assert_eq!(headers.get("host"), Some("server.example.com"));
        assert_eq!(
            headers.get("sec-websocket-key"),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let headers = parse_headers("SEC-WEBSOCKET-KEY: abc\r\n");

        assert_eq!(headers.get("Sec-WebSocket-Key"), Some("abc"));
        assert_eq!(headers.get("sec-websocket-key"), Some("abc"));
    }

    #[test]
    fn test_last_occurrence_wins() {
        let headers = parse_headers(
            "Sec-WebSocket-Key: first\r\n\
             sec-websocket-key: second\r\n",
        );

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Sec-WebSocket-Key"), Some("second"));
    }

    #[test]
    fn test_value_keeps_extra_colons_and_is_trimmed() {
        let headers = parse_headers("Origin:   http://example.com:8080  \r\n");
        assert_eq!(headers.get("origin"), Some("http://example.com:8080"));
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        let headers = parse_headers("POST /x HTTP/1.1\r\ngarbage line\r\n\r\nHost: a\r\n");

        assert!(!headers.is_get());
        assert_eq!(headers.request_method(), None);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_request_method_marker() {
        let headers = parse_headers("GET / HTTP/1.1\r\n");
        assert_eq!(headers.request_method(), Some("GET"));
        assert_eq!(headers.get("x-request-method"), None);
        assert!(headers.is_empty());

        // a client header with the same name stays an ordinary header
        let forged = parse_headers("X-Request-Method: GET\r\n");
        assert!(!forged.is_get());
        assert_eq!(forged.request_method(), None);
        assert_eq!(forged.get("x-request-method"), Some("GET"));
    }

    #[test]
    fn test_empty_input() {
        let headers = parse_headers("");
        assert!(headers.is_empty());
        assert!(!headers.is_get());
    }
}
