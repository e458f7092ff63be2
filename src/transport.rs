//! Transport capability consumed by the engine.
//!
//! The engine is byte-carrier agnostic: anything that can push ordered byte
//! chunks in and accept byte writes out can carry a connection — a TCP
//! socket, a TLS session, or an in-memory test harness. The engine owns the
//! write half as a [`Transport`] object; whoever owns the read half feeds
//! [`TransportEvent`]s to the endpoint. The engine never blocks waiting for
//! bytes: a short buffer simply waits for the next delivery.

use crate::error::TransportError;

/// Completion callback for a single write.
///
/// Invoked exactly once, after the transport confirms the bytes were handed
/// off or the write failed.
pub type WriteCompletion = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// Write half of a byte transport, owned by the connection state machine.
pub trait Transport: Send {
    /// Queue `data` for delivery. Fire-and-forget; if `completion` is given
    /// it must be invoked exactly once, even on failure.
    fn write(&mut self, data: Vec<u8>, completion: Option<WriteCompletion>);

    /// Tear the transport down. Idempotent.
    fn disconnect(&mut self);
}

/// Events pushed from a transport into the engine.
#[derive(Debug)]
#[non_exhaustive]
pub enum TransportEvent {
    /// The transport is established and ready to carry bytes.
    Connected,
    /// An ordered chunk of received bytes. Chunk boundaries carry no
    /// meaning; a frame or handshake head may span any number of chunks.
    Received(Vec<u8>),
    /// The path's viability changed (e.g. interface went away). Informational.
    ViabilityChanged(bool),
    /// The transport failed; no further events will follow.
    Failed(TransportError),
    /// The transport was torn down; no further events will follow.
    Cancelled,
}

/// Outcome of a trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// The presented chain is acceptable for this peer.
    Accept,
    /// The presented chain must be rejected; the transport fails the connect.
    Reject,
}

/// Certificate trust / pinning capability, consumed by TLS transports.
///
/// Invoked by the transport during session establishment, never by the
/// protocol engine itself.
pub trait TrustEvaluator: Send + Sync {
    /// Evaluate the peer's DER certificate chain for `domain`.
    fn evaluate_trust(&self, chain: &[Vec<u8>], domain: &str) -> TrustDecision;
}
