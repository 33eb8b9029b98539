//! WebSocket opening handshake (RFC 6455 section 4).
//!
//! The handshake is plain HTTP/1.1: the client asks for an upgrade, the
//! server answers `101 Switching Protocols` with an accept key derived from
//! the client's `Sec-WebSocket-Key`. Parsing is deferred until the full
//! header block (terminated by an empty line) has been buffered.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The GUID appended to the client key in the accept computation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Computes the `Sec-WebSocket-Accept` value: Base64(SHA-1(key + GUID)).
///
/// # Example
///
/// ```
/// use tideway::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Format the fixed `101 Switching Protocols` response for `accept_key`.
#[must_use]
pub fn build_accept_response(accept_key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(160);
    buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.extend_from_slice(b"Upgrade: websocket\r\n");
    buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
    buf.extend_from_slice(b"Connection: Upgrade\r\n");
    buf.extend_from_slice(format!("Sec-WebSocket-Accept: {accept_key}\r\n\r\n").as_bytes());
    buf
}

/// Format an HTTP error response for a rejected or malformed handshake.
///
/// Sent before the connection is dropped so the peer sees a well-formed
/// refusal rather than a bare reset.
#[must_use]
pub fn build_reject_response(status: u16, body: &str) -> Vec<u8> {
    let phrase = match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        426 => "Upgrade Required",
        _ => "Error",
    };
    format!(
        "HTTP/1.1 {status} {phrase}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Parsed view of the client's upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request method (always `GET` for a valid upgrade).
    pub method: String,
    /// Request path, e.g. `/chat`.
    pub path: String,
    /// The client's `Sec-WebSocket-Key` value.
    pub key: String,
    headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Parse an upgrade request out of the raw bytes read so far.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteHandshake`] if the CRLFCRLF terminator has not
    ///   arrived yet; the caller keeps the connection and retries on the
    ///   next read. Parsing is never attempted on a partial header block.
    /// - [`Error::InvalidHandshake`] if the block is present but is not a
    ///   `GET` over HTTP/1.1, lacks the `Upgrade: websocket` header, or
    ///   lacks `Sec-WebSocket-Key`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let head_len = find_terminator(data).ok_or(Error::IncompleteHandshake)?;

        let text = std::str::from_utf8(&data[..head_len])
            .map_err(|_| Error::InvalidHandshake("request is not valid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::InvalidHandshake("malformed request line".into()));
        }
        if parts[0] != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "expected GET, got {}",
                parts[0]
            )));
        }
        if !parts[2].starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "expected HTTP/1.1, got {}",
                parts[2]
            )));
        }

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("missing Upgrade header".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "unsupported Upgrade target: {upgrade}"
            )));
        }

        let key = headers
            .get("sec-websocket-key")
            .ok_or_else(|| Error::InvalidHandshake("missing Sec-WebSocket-Key header".into()))?
            .clone();

        Ok(Self {
            method: parts[0].to_string(),
            path: parts[1].to_string(),
            key,
            headers,
        })
    }

    /// Parse with an upper bound on the handshake size.
    ///
    /// # Errors
    ///
    /// [`Error::HandshakeTooLarge`] when `data` exceeds `max_size`,
    /// otherwise as [`HandshakeRequest::parse`].
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }

    /// Look up a header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Byte offset one past the CRLFCRLF terminator, if present.
fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn test_accept_key_rfc_vector() {
        // RFC 6455 section 1.3 example
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_key_second_vector() {
        assert_eq!(
            compute_accept_key("x3JJHMbDL1EzLkh9GBhXDw=="),
            "HSmrc0sMlYUkAGmm5OPpG2HaGWk="
        );
    }

    #[test]
    fn test_parse_valid_request() {
        let req = HandshakeRequest::parse(SAMPLE).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/chat");
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(req.header("host"), Some("server.example.com"));
        assert_eq!(req.header("HOST"), Some("server.example.com"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_parse_defers_until_terminator() {
        // Every prefix short of the blank line is Incomplete, never an error.
        for cut in 0..SAMPLE.len() - 1 {
            assert!(
                matches!(
                    HandshakeRequest::parse(&SAMPLE[..cut]),
                    Err(Error::IncompleteHandshake)
                ),
                "prefix of {cut} bytes should be incomplete"
            );
        }
        assert!(HandshakeRequest::parse(SAMPLE).is_ok());
    }

    #[test]
    fn test_parse_missing_key() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            \r\n";
        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Sec-WebSocket-Key")));
    }

    #[test]
    fn test_parse_missing_upgrade() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Upgrade")));
    }

    #[test]
    fn test_parse_rejects_non_get() {
        let request = b"POST /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("GET")));
    }

    #[test]
    fn test_parse_case_insensitive_headers() {
        let request = b"GET / HTTP/1.1\r\n\
            UPGRADE: WebSocket\r\n\
            SEC-WEBSOCKET-KEY: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        let req = HandshakeRequest::parse(request).unwrap();
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn test_parse_with_limit() {
        let oversized = vec![b'A'; 10000];
        assert!(matches!(
            HandshakeRequest::parse_with_limit(&oversized, 8192),
            Err(Error::HandshakeTooLarge { size: 10000, max: 8192 })
        ));
        assert!(HandshakeRequest::parse_with_limit(SAMPLE, 8192).is_ok());
    }

    #[test]
    fn test_accept_response_wire_format() {
        let bytes = build_accept_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn test_reject_response_is_valid_http() {
        let bytes = build_reject_response(403, "origin not allowed");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(text.contains("Content-Length: 18\r\n"));
        assert!(text.ends_with("\r\n\r\norigin not allowed"));
    }

    #[test]
    fn test_reject_response_unknown_status() {
        let text = String::from_utf8(build_reject_response(599, "")).unwrap();
        assert!(text.starts_with("HTTP/1.1 599 Error\r\n"));
    }
}
