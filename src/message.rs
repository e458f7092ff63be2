//! Reassembled message types and close status codes (RFC 6455).

/// Close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001): endpoint is shutting down or navigating away.
    GoingAway,
    /// Protocol error (1002).
    Protocol,
    /// Unsupported data (1003).
    UnsupportedData,
    /// No status present (1005). Presentation-layer only, never on the wire.
    NoStatus,
    /// Abnormal closure (1006). Presentation-layer only, never on the wire.
    Abnormal,
    /// Invalid payload data (1007), e.g. non-UTF-8 in a text message.
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    TooBig,
    /// Missing mandatory extension (1010).
    MandatoryExtension,
    /// Internal server error (1011).
    InternalError,
    /// Any other code (1012-1014 registered, 3000-4999 application).
    Other(u16),
}

impl CloseCode {
    /// Map a numeric status code onto the registry.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value of this code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether this code may be encoded into an outgoing close frame.
    ///
    /// 1004-1006 and 1015 are reserved per RFC 6455 Section 7.4.1 and must
    /// never appear on the wire; they exist only for reporting.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A complete unit delivered by the message reassembler.
///
/// Data messages are the reassembly of one or more frames; control messages
/// map one-to-one onto control frames and may interleave with an in-progress
/// fragmented message. Ownership transfers to the caller on emission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A UTF-8 text message.
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
    /// A ping (payload <= 125 bytes).
    Ping(Vec<u8>),
    /// A pong (payload <= 125 bytes).
    Pong(Vec<u8>),
    /// The peer's close frame. An absent wire code maps to
    /// [`CloseCode::NoStatus`].
    Closed {
        /// Close status code.
        code: CloseCode,
        /// UTF-8 close reason, possibly empty.
        reason: String,
    },
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Create a ping message.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Message::Ping(data.into())
    }

    /// Create a pong message.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Message::Pong(data.into())
    }

    /// Returns `true` for text or binary messages.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Message::Text(_) | Message::Binary(_))
    }

    /// Returns `true` for ping, pong, or close messages.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        !self.is_data()
    }

    /// Consume and return the text content, if any.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Consume and return the binary content, if any.
    #[must_use]
    pub fn into_binary(self) -> Option<Vec<u8>> {
        match self {
            Message::Binary(data) => Some(data),
            _ => None,
        }
    }
}
