//! HTTP/1.1 upgrade handshake (RFC 6455 Section 4).
//!
//! Both codecs are boundary-aware: they scan for the `\r\n\r\n` head
//! terminator and report how many bytes the head consumed, because a single
//! transport delivery may carry the handshake head plus the start of the
//! first frame. Until the terminator arrives they report "incomplete" and
//! the caller simply waits for the next delivery.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

/// Fixed GUID appended to the client key for the accept digest (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Parsed header map with lowercase names.
pub type Headers = HashMap<String, String>;

/// Compute `Sec-WebSocket-Accept` from a `Sec-WebSocket-Key`.
///
/// Defined as `base64(SHA-1(key ++ GUID))`.
///
/// ```
/// use wsengine::protocol::compute_accept_key;
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

/// Server-side hook for policy checks (origin, auth, subprotocols) on an
/// upgrade request. Runs after structural validation, before the response
/// is built; rejection fails the connection without a 101.
pub trait HeaderValidator: Send + Sync {
    /// Inspect the parsed request headers and the client's key.
    ///
    /// # Errors
    ///
    /// Return [`HandshakeError::Rejected`] (or any variant) to refuse the
    /// upgrade.
    fn validate(&self, headers: &Headers, key: &str) -> Result<(), HandshakeError>;
}

/// Index one past the `\r\n\r\n` head terminator, if present.
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parse `name: value` lines into a lowercase-keyed map.
///
/// `guarded` names must not appear twice; request smuggling defence.
fn parse_header_block<'a>(
    lines: impl Iterator<Item = &'a str>,
    guarded: &[&str],
) -> Result<Headers, String> {
    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if guarded.contains(&name.as_str()) && headers.contains_key(&name) {
            return Err(format!("duplicate header: {name}"));
        }
        headers.insert(name, value.trim().to_string());
    }
    Ok(headers)
}

fn reject_crlf(header: &str, value: &str) -> Result<(), HandshakeError> {
    if value.contains('\r') || value.contains('\n') {
        Err(HandshakeError::InvalidRequest(format!(
            "{header} value contains CR or LF"
        )))
    } else {
        Ok(())
    }
}

fn random_key() -> String {
    let mut nonce = [0u8; 16];
    if getrandom::getrandom(&mut nonce).is_err() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0x6B65_795F);
        nonce.copy_from_slice(&seed.to_le_bytes());
    }
    BASE64.encode(nonce)
}

/// Client side of the upgrade: builds the request, validates the response.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    host: String,
    path: String,
    key: String,
    protocols: Vec<String>,
}

impl ClientHandshake {
    /// Create a handshake for `GET {path}` against `host`, with a fresh
    /// random 16-byte key.
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_key(host, path, random_key())
    }

    /// Create a handshake with an explicit key (test vectors).
    #[must_use]
    pub fn with_key(
        host: impl Into<String>,
        path: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            key: key.into(),
            protocols: Vec::new(),
        }
    }

    /// Request these subprotocols via `Sec-WebSocket-Protocol`.
    #[must_use]
    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    /// The `Sec-WebSocket-Key` this handshake will send.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialize the upgrade request.
    #[must_use]
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut req = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.path, self.host, self.key
        );
        if !self.protocols.is_empty() {
            req.push_str(&format!(
                "Sec-WebSocket-Protocol: {}\r\n",
                self.protocols.join(", ")
            ));
        }
        req.push_str("\r\n");
        req.into_bytes()
    }

    /// Validate the server's response once its head is complete.
    ///
    /// Returns `Ok(None)` while the head terminator has not arrived, and
    /// `Ok(Some((headers, consumed)))` on success; bytes past `consumed`
    /// belong to the frame stream and must not be dropped.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::InvalidResponse`] for a non-101 status or missing
    /// upgrade header, [`HandshakeError::AcceptMismatch`] when the accept
    /// digest does not match our key, [`HandshakeError::TooLarge`] when the
    /// head never terminates within `max_size` bytes. After any error no
    /// byte of the stream may be interpreted as a frame.
    pub fn read_response(
        &self,
        buf: &[u8],
        max_size: usize,
    ) -> Result<Option<(Headers, usize)>, HandshakeError> {
        let Some(consumed) = head_end(buf) else {
            if buf.len() > max_size {
                return Err(HandshakeError::TooLarge {
                    size: buf.len(),
                    max: max_size,
                });
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&buf[..consumed])
            .map_err(|_| HandshakeError::InvalidResponse("head is not valid UTF-8".into()))?;
        let mut lines = head.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| HandshakeError::InvalidResponse("empty response".into()))?;
        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(HandshakeError::InvalidResponse(format!(
                "expected 101 status, got: {status_line}"
            )));
        }

        let headers =
            parse_header_block(lines, &[]).map_err(HandshakeError::InvalidResponse)?;

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| HandshakeError::InvalidResponse("missing Upgrade header".into()))?;
        if !upgrade.to_ascii_lowercase().contains("websocket") {
            return Err(HandshakeError::InvalidResponse(format!(
                "unexpected Upgrade header: {upgrade}"
            )));
        }

        let accept = headers.get("sec-websocket-accept").ok_or_else(|| {
            HandshakeError::InvalidResponse("missing Sec-WebSocket-Accept header".into())
        })?;
        let expected = compute_accept_key(&self.key);
        if *accept != expected {
            return Err(HandshakeError::AcceptMismatch {
                expected,
                actual: accept.clone(),
            });
        }

        Ok(Some((headers, consumed)))
    }
}

/// A structurally valid client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target, e.g. `/chat`.
    pub path: String,
    /// The client's `Sec-WebSocket-Key`.
    pub key: String,
    /// All request headers, lowercase-keyed.
    pub headers: Headers,
}

/// Server side of the upgrade: parses the request, builds the response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerHandshake;

impl ServerHandshake {
    /// Parse and validate a client upgrade request once its head is complete.
    ///
    /// Returns `Ok(None)` while the head terminator has not arrived, and
    /// `Ok(Some((request, consumed)))` on success; bytes past `consumed`
    /// belong to the frame stream.
    ///
    /// Header names are matched case-insensitively. Security-critical
    /// headers must not be duplicated.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::InvalidRequest`] for anything other than a
    /// well-formed `GET ... HTTP/1.1` upgrade with `Upgrade: websocket`,
    /// a `Connection` header containing `upgrade`, version 13, and a
    /// non-empty key; [`HandshakeError::TooLarge`] when the head never
    /// terminates within `max_size` bytes.
    pub fn read_request(
        buf: &[u8],
        max_size: usize,
    ) -> Result<Option<(UpgradeRequest, usize)>, HandshakeError> {
        let Some(consumed) = head_end(buf) else {
            if buf.len() > max_size {
                return Err(HandshakeError::TooLarge {
                    size: buf.len(),
                    max: max_size,
                });
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&buf[..consumed])
            .map_err(|_| HandshakeError::InvalidRequest("head is not valid UTF-8".into()))?;
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) => (m, p, v),
            _ => {
                return Err(HandshakeError::InvalidRequest(format!(
                    "malformed request line: {request_line}"
                )));
            }
        };
        if method != "GET" {
            return Err(HandshakeError::InvalidRequest(format!(
                "expected GET, got {method}"
            )));
        }
        if !version.starts_with("HTTP/1.1") {
            return Err(HandshakeError::InvalidRequest(format!(
                "expected HTTP/1.1, got {version}"
            )));
        }

        let headers = parse_header_block(
            lines,
            &[
                "host",
                "upgrade",
                "connection",
                "sec-websocket-key",
                "sec-websocket-version",
            ],
        )
        .map_err(HandshakeError::InvalidRequest)?;

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| HandshakeError::InvalidRequest("missing Upgrade header".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::InvalidRequest(format!(
                "unexpected Upgrade header: {upgrade}"
            )));
        }

        let connection = headers
            .get("connection")
            .ok_or_else(|| HandshakeError::InvalidRequest("missing Connection header".into()))?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(HandshakeError::InvalidRequest(format!(
                "unexpected Connection header: {connection}"
            )));
        }

        let version = headers.get("sec-websocket-version").ok_or_else(|| {
            HandshakeError::InvalidRequest("missing Sec-WebSocket-Version header".into())
        })?;
        if version != "13" {
            return Err(HandshakeError::InvalidRequest(format!(
                "unsupported WebSocket version: {version}"
            )));
        }

        let key = headers
            .get("sec-websocket-key")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| HandshakeError::InvalidRequest("missing Sec-WebSocket-Key".into()))?
            .clone();

        Ok(Some((
            UpgradeRequest {
                path: path.to_string(),
                key,
                headers,
            },
            consumed,
        )))
    }

    /// Build the `101 Switching Protocols` response for `key`.
    ///
    /// # Errors
    ///
    /// Rejects a `protocol` echo containing CR/LF (header injection).
    pub fn response_bytes(key: &str, protocol: Option<&str>) -> Result<Vec<u8>, HandshakeError> {
        let mut resp = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            compute_accept_key(key)
        );
        if let Some(protocol) = protocol {
            reject_crlf("Sec-WebSocket-Protocol", protocol)?;
            resp.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        resp.push_str("\r\n");
        Ok(resp.into_bytes())
    }
}
