//! Frame codec: RFC 6455 wire format encode/decode.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK set)                     |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! The decoder is resumable: it consumes complete frames from an
//! append-only buffer and leaves a partial trailing frame untouched for the
//! next delivery, however the byte stream happens to be chunked. Masking is
//! a wire-level concern handled entirely in here, so an in-memory [`Frame`]
//! is always unmasked.

use bytes::{Buf, BytesMut};

use crate::connection::Role;
use crate::error::FrameError;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum control frame payload (RFC 6455 Section 5.5).
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// One decoded (or to-be-encoded) WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// RSV1: payload is compressed under a negotiated extension.
    pub compressed: bool,
    /// Frame type tag.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame with explicit flags.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            compressed: false,
            opcode,
            payload,
        }
    }

    /// Single-frame text message.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Single-frame binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Close frame; the status code, when present, is prepended big-endian
    /// before the reason bytes.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Resumable decoder for one direction of a connection.
///
/// `role` is this endpoint's own role and fixes the masking discipline for
/// *incoming* frames: a server requires masked frames, a client rejects
/// them.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    role: Role,
    accept_unmasked: bool,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder for an endpoint of the given role.
    #[must_use]
    pub fn new(role: Role, max_frame_size: usize, accept_unmasked: bool) -> Self {
        Self {
            role,
            accept_unmasked,
            max_frame_size,
        }
    }

    /// Consume at most one complete frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial frame; the
    /// bytes stay in place and decoding resumes on the next call. Call in a
    /// loop to drain every complete frame from a delivery.
    ///
    /// # Errors
    ///
    /// See [`FrameError`]; after an error the stream's frame boundaries can
    /// no longer be trusted and the connection must be torn down.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & 0x80 != 0;
        let compressed = byte0 & 0x40 != 0;
        // RSV2/RSV3 are ignored; no extension defined here assigns them.
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;

        let masked = byte1 & 0x80 != 0;
        let len7 = byte1 & 0x7F;

        let (payload_len, len_field_end) = match len7 {
            0..=125 => (u64::from(len7), 2),
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                if len & (1 << 63) != 0 {
                    return Err(FrameError::LengthOverflow(len));
                }
                (len, 10)
            }
            _ => unreachable!(),
        };

        // Header-only checks run before the payload arrives so hostile
        // lengths fail fast instead of stalling on bytes that never come.
        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlFrameTooLarge(payload_len as usize));
            }
        }
        if payload_len > self.max_frame_size as u64 {
            return Err(FrameError::FrameTooLarge {
                size: payload_len as usize,
                max: self.max_frame_size,
            });
        }
        match self.role {
            Role::Server if !masked && !self.accept_unmasked => {
                return Err(FrameError::UnmaskedFrame);
            }
            Role::Client if masked => {
                return Err(FrameError::UnexpectedMask);
            }
            _ => {}
        }

        let payload_len = payload_len as usize;
        let header_len = if masked {
            len_field_end + 4
        } else {
            len_field_end
        };
        if buf.len() < header_len + payload_len {
            return Ok(None);
        }

        let mask_key = masked.then(|| {
            [
                buf[len_field_end],
                buf[len_field_end + 1],
                buf[len_field_end + 2],
                buf[len_field_end + 3],
            ]
        });

        buf.advance(header_len);
        let mut payload = buf.split_to(payload_len).to_vec();
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            compressed,
            opcode,
            payload,
        }))
    }
}

/// Frame encoder for one direction of a connection.
///
/// `role` fixes the masking discipline for *outgoing* frames: a client
/// masks every frame with a fresh key, a server never masks. Encoding a
/// well-formed frame cannot fail.
#[derive(Debug)]
pub struct FrameEncoder {
    role: Role,
    mask_state: u32,
}

impl FrameEncoder {
    /// Create an encoder for an endpoint of the given role.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            mask_state: random_seed(),
        }
    }

    /// Serialize `frame`, using the shortest length form that fits and
    /// masking when this endpoint is a client.
    #[must_use]
    pub fn encode(&mut self, frame: &Frame) -> Vec<u8> {
        let payload = frame.payload();
        let mask_key = self.role.must_mask().then(|| self.next_mask());

        let (len7, extended) = match payload.len() {
            len @ 0..=125 => (len as u8, 0),
            len if len <= usize::from(u16::MAX) => (126, 2),
            _ => (127, 8),
        };

        let mut out = Vec::with_capacity(2 + extended + 4 + payload.len());

        let mut byte0 = frame.opcode.as_u8();
        if frame.fin {
            byte0 |= 0x80;
        }
        if frame.compressed {
            byte0 |= 0x40;
        }
        out.push(byte0);
        out.push(if mask_key.is_some() { len7 | 0x80 } else { len7 });

        match extended {
            2 => out.extend_from_slice(&(payload.len() as u16).to_be_bytes()),
            8 => out.extend_from_slice(&(payload.len() as u64).to_be_bytes()),
            _ => {}
        }

        match mask_key {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(payload),
        }

        out
    }

    // Per-frame key from a counter-hash stream; unpredictability is not a
    // security property here, only non-degeneracy (RFC 6455 Section 10.3
    // cache poisoning concerns are about proxies seeing attacker-chosen
    // plaintext, countered by any varying key).
    fn next_mask(&mut self) -> [u8; 4] {
        self.mask_state = self.mask_state.wrapping_add(0x9E37_79B9);
        let mut x = self.mask_state;
        x = (x ^ (x >> 16)).wrapping_mul(0x85EB_CA6B);
        x = (x ^ (x >> 13)).wrapping_mul(0xC2B2_AE35);
        (x ^ (x >> 16)).to_le_bytes()
    }
}

fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x5EED_5EED)
    }
}
