//! Connection role (client or server).

/// Which side of the connection this endpoint is.
///
/// The role fixes the handshake direction and the masking discipline:
/// clients mask every outgoing frame, servers never do (RFC 6455
/// Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the upgrade; masks outgoing frames.
    Client,
    /// Accepts the upgrade; never masks outgoing frames.
    Server,
}

impl Role {
    /// Whether outgoing frames must carry a mask.
    #[inline]
    #[must_use]
    pub const fn must_mask(self) -> bool {
        matches!(self, Role::Client)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}
