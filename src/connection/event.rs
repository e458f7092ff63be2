//! Events surfaced from the engine to the application.

use crate::error::Error;
use crate::message::CloseCode;
use crate::protocol::Headers;

/// One connection's outbound event stream.
///
/// Each component exposes a single stream of these; composition happens in
/// the orchestration layer, which subscribes and re-publishes.
/// `Disconnected`, `Error`, and `Cancelled` are terminal and are emitted at
/// most once per connection.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event {
    /// The upgrade handshake completed; headers are the peer's.
    Connected(Headers),
    /// A complete text message arrived.
    Text(String),
    /// A complete binary message arrived.
    Binary(Vec<u8>),
    /// A ping arrived (a pong echo may already have been queued).
    Ping(Vec<u8>),
    /// A pong arrived.
    Pong(Vec<u8>),
    /// The connection closed; [`CloseCode::NoStatus`] when the peer
    /// vanished without a close frame.
    Disconnected {
        /// Close status code.
        code: CloseCode,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The connection failed; it is now terminal.
    Error(Error),
    /// The connection was torn down locally before it opened.
    Cancelled,
}

impl Event {
    /// Whether this event ends the connection.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Disconnected { .. } | Event::Error(_) | Event::Cancelled
        )
    }
}
