//! Error taxonomy for the WebSocket protocol engine.
//!
//! Errors are grouped by the layer that detects them: transport, handshake,
//! frame codec, and message sequencing. None of them are retried internally;
//! every error surfaces exactly once and leaves the connection terminal.

use thiserror::Error;

use crate::protocol::OpCode;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for all engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Failure in the underlying byte transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Failure during the HTTP upgrade handshake.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Malformed or oversized wire frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Frame sequencing violation across an otherwise valid frame stream.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors reported by (or about) the byte transport.
///
/// The engine never retries these; the connection moves to `Failed` and
/// retry/backoff policy is left to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The transport could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The transport did not become ready in time.
    #[error("connect timed out")]
    Timeout,

    /// A read or write on the established transport failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A write was issued after the transport was torn down.
    #[error("transport closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Errors detected while performing the HTTP/1.1 upgrade handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandshakeError {
    /// The client's upgrade request was malformed or missing headers.
    #[error("invalid upgrade request: {0}")]
    InvalidRequest(String),

    /// The server's upgrade response was malformed or not a 101.
    #[error("invalid upgrade response: {0}")]
    InvalidResponse(String),

    /// `Sec-WebSocket-Accept` did not match the digest of our key.
    #[error("accept key mismatch: expected {expected}, got {actual}")]
    AcceptMismatch {
        /// Digest computed from the key we sent.
        expected: String,
        /// Value the server actually returned.
        actual: String,
    },

    /// An installed [`HeaderValidator`](crate::protocol::HeaderValidator)
    /// refused the request.
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// Handshake head exceeded the configured maximum.
    #[error("handshake too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Bytes buffered so far without finding the head terminator.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Errors detected by the frame codec on a single frame.
///
/// After any of these the frame boundary can no longer be trusted, so the
/// engine never resynchronizes mid-stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    /// Opcode nibble is reserved for future use (0x3-0x7, 0xB-0xF).
    #[error("reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame payload exceeds 125 bytes.
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Control frame with FIN=0.
    #[error("control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// 64-bit extended length with the high bit set.
    #[error("payload length overflow: {0:#x}")]
    LengthOverflow(u64),

    /// Frame size exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Compressed frame (RSV1) received with no decompressor installed.
    #[error("compressed frame without negotiated compression")]
    CompressionNotNegotiated,

    /// A client-originated frame arrived without a mask.
    #[error("client frame must be masked")]
    UnmaskedFrame,

    /// A server-originated frame arrived masked.
    #[error("server frame must not be masked")]
    UnexpectedMask,

    /// Close frame payload of exactly one byte.
    #[error("close frame with truncated status code")]
    InvalidCloseFrame,

    /// Text message payload was not valid UTF-8.
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// A compression hook failed to process a payload.
    #[error("extension error: {0}")]
    Extension(String),
}

/// Frame sequencing violations detected by the reassembler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Continuation frame with no message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// New data opcode while a fragmented message is still in progress.
    #[error("expected continuation frame, got {0}")]
    UnexpectedOpcode(OpCode),

    /// Reassembled message exceeds the configured maximum.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Message split into more fragments than allowed.
    #[error("too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Fragment count so far.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A send was attempted while the connection cannot carry data.
    #[error("connection is not open")]
    NotOpen,
}
