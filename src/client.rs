//! Client endpoint: one connection, thin orchestration over the machine.

use crate::config::Config;
use crate::connection::{ConnectionState, ConnectionStateMachine, Event};
use crate::error::Result;
use crate::message::{CloseCode, Message};
use crate::protocol::ClientHandshake;
use crate::transport::{Transport, TransportEvent};

/// One client-side WebSocket connection.
///
/// Owns exactly one [`ConnectionStateMachine`]. The caller wires the
/// transport's event stream into [`handle_transport_event`]
/// (`ClientEndpoint::handle_transport_event`) and drains application events
/// with [`poll_event`](ClientEndpoint::poll_event); with the `async-tokio`
/// feature, [`crate::net::connect`] produces a matching transport and event
/// receiver.
pub struct ClientEndpoint {
    machine: ConnectionStateMachine,
}

impl ClientEndpoint {
    /// Create a client endpoint over an established (or connecting)
    /// transport. The upgrade request goes out once the transport reports
    /// connected.
    #[must_use]
    pub fn new(handshake: ClientHandshake, transport: Box<dyn Transport>, config: Config) -> Self {
        Self {
            machine: ConnectionStateMachine::client(handshake, transport, config),
        }
    }

    /// Feed one transport event into the connection.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        self.machine.handle_transport_event(event);
    }

    /// Pop the next application event, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.machine.poll_event()
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// See [`ConnectionStateMachine::send`].
    pub fn send(&mut self, message: Message) -> Result<()> {
        self.machine.send(message)
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`ConnectionStateMachine::send`].
    pub fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.machine.send(Message::Text(text.into()))
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// See [`ConnectionStateMachine::send`].
    pub fn send_binary(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.machine.send(Message::Binary(data.into()))
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// See [`ConnectionStateMachine::send`].
    pub fn ping(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.machine.send(Message::Ping(data.into()))
    }

    /// Initiate the close handshake. Idempotent.
    pub fn close(&mut self, code: CloseCode, reason: &str) {
        self.machine.close(code, reason);
    }

    /// Tear the connection down immediately. Idempotent.
    pub fn force_cancel(&mut self) {
        self.machine.force_cancel();
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }
}

#[cfg(feature = "async-tokio")]
impl ClientEndpoint {
    /// Connect over TCP and return the endpoint plus the transport event
    /// stream to pump into it.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] when the TCP connect fails or
    /// times out.
    pub async fn connect(
        addr: &str,
        path: &str,
        timeout: std::time::Duration,
        config: Config,
    ) -> Result<(Self, tokio::sync::mpsc::UnboundedReceiver<TransportEvent>)> {
        let (transport, events) = crate::net::connect(addr, timeout).await?;
        let handshake = ClientHandshake::new(addr, path);
        Ok((Self::new(handshake, Box::new(transport), config), events))
    }
}
