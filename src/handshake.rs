//! WebSocket handshake negotiation
//!
//! Turns a parsed upgrade request into the `101 Switching Protocols`
//! response, or a typed failure. Nothing here writes to a transport; the
//! connection decides what to do with the outcome.

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use crate::{Config, WS_GUID};

/// Length in bytes of the decoded client nonce
const NONCE_LEN: usize = 16;

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Check that a client key is a base64-encoded 16-byte nonce
pub fn validate_key(key: &str) -> Result<()> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| Error::HandshakeFailed("Sec-WebSocket-Key is not base64"))?;
    if decoded.len() != NONCE_LEN {
        return Err(Error::HandshakeFailed(
            "Sec-WebSocket-Key must decode to 16 bytes",
        ));
    }
    Ok(())
}

/// A successful negotiation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Value for the Sec-WebSocket-Accept header
    pub accept_key: String,
    /// Echoed Sec-WebSocket-Protocol, if the client sent one
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Response header lines in wire order, ending with the blank terminator
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            "HTTP/1.1 101 Switching Protocols".to_string(),
            "Upgrade: websocket".to_string(),
            "Connection: Upgrade".to_string(),
            format!("Sec-WebSocket-Accept: {}", self.accept_key),
            "Access-Control-Allow-Origin: *".to_string(),
        ];
        if let Some(protocol) = &self.protocol {
            lines.push(format!("Sec-WebSocket-Protocol: {}", protocol));
        }
        lines.push(String::new());
        lines
    }

    /// The exact bytes to write back on the transport
    pub fn to_bytes(&self) -> Bytes {
        build_response(&self.accept_key, self.protocol.as_deref())
    }
}

/// Negotiate a handshake from parsed request headers.
///
/// Fails when the key is missing or unusable, and (depending on `config`)
/// when the request line was not a GET or the key is not a 16-byte nonce.
/// A requested subprotocol is echoed back verbatim.
pub fn negotiate(headers: &HeaderMap, config: &Config) -> Result<HandshakeResponse> {
    if config.require_get && !headers.is_get() {
        return Err(Error::HandshakeFailed("request line must be GET"));
    }

    let key = headers
        .get("sec-websocket-key")
        .filter(|key| !key.is_empty())
        .ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Key"))?;

    if config.strict_key {
        validate_key(key)?;
    }

    Ok(HandshakeResponse {
        accept_key: generate_accept_key(key),
        protocol: headers.get("sec-websocket-protocol").map(String::from),
    })
}

/// Build a WebSocket upgrade response
pub fn build_response(accept_key: &str, protocol: Option<&str>) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Access-Control-Allow-Origin: *\r\n");

    if let Some(proto) = protocol {
        buf.put_slice(b"Sec-WebSocket-Protocol: ");
        put_latin1(&mut buf, proto);
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Decode a request head byte-for-byte (ISO-8859-1), so no input byte is lost
pub fn decode_latin1(head: &[u8]) -> String {
    head.iter().map(|&b| b as char).collect()
}

/// Write `text` back one byte per char; inverse of [`decode_latin1`]
fn put_latin1(buf: &mut BytesMut, text: &str) {
    buf.reserve(text.len());
    for c in text.chars() {
        // values come from decode_latin1, so every char is <= U+00FF
        buf.put_u8(c as u32 as u8);
    }
}

/// Find the end of the request head.
///
/// Returns the offset just past the `\r\n\r\n` terminator.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Build a WebSocket upgrade request the way a client would
#[cfg(test)]
pub(crate) fn build_request(host: &str, path: &str, key: &str, protocol: Option<&str>) -> Bytes {
    let mut buf = BytesMut::with_capacity(512);

    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    buf.put_slice(b"Host: ");
    buf.put_slice(host.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Key: ");
    buf.put_slice(key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Sec-WebSocket-Version: 13\r\n");

    if let Some(proto) = protocol {
        buf.put_slice(b"Sec-WebSocket-Protocol: ");
        buf.put_slice(proto.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}
