//! Connection lifecycle states.

/// Lifecycle of one connection.
///
/// ```text
/// Connecting --transport connected--> HandshakeInFlight
/// HandshakeInFlight --handshake validated--> Open
/// Open --close()--> Closing --peer close--> Closed
/// Open --peer close--> Closed
/// any non-terminal --transport/protocol failure--> Failed
/// ```
///
/// `Closed` and `Failed` are terminal; nothing transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Waiting for the transport to come up.
    #[default]
    Connecting,
    /// Transport is up; upgrade handshake bytes are being exchanged.
    HandshakeInFlight,
    /// Upgraded; frames flow both ways.
    Open,
    /// We sent a close frame and are waiting for the peer's.
    Closing,
    /// Connection ended without error.
    Closed,
    /// Connection ended on a transport, handshake, or protocol error.
    Failed,
}

impl ConnectionState {
    /// Whether this state admits no further transitions.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Whether application data may be sent.
    #[inline]
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether inbound frames are still processed.
    #[inline]
    #[must_use]
    pub const fn can_receive(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::HandshakeInFlight => "HandshakeInFlight",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}
