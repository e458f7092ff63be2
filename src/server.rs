//! Server endpoint: many connections behind integer handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::Config;
use crate::connection::{ConnectionStateMachine, Event};
use crate::error::{ProtocolError, Result};
use crate::message::{CloseCode, Message};
use crate::protocol::HeaderValidator;
use crate::transport::{Transport, TransportEvent};

/// Opaque handle for one accepted connection.
pub type ConnectionId = u64;

/// Accepts transports and runs one [`ConnectionStateMachine`] per
/// connection behind a generated integer handle.
///
/// The registry map is the only state shared across connections: its lock
/// covers insert, lookup, and remove, while each connection is processed
/// under its own lock so different connections proceed fully in parallel.
/// A connection is removed exactly once, on its transition to `Closed` or
/// `Failed`; removing an already-removed handle is a no-op.
pub struct ServerEndpoint {
    config: Config,
    header_validator: Option<Arc<dyn HeaderValidator>>,
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Arc<Mutex<ConnectionStateMachine>>>>,
}

impl ServerEndpoint {
    /// Create a server endpoint; every accepted connection gets a clone of
    /// `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            header_validator: None,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Install a handshake policy hook applied to every accepted connection.
    #[must_use]
    pub fn with_header_validator(mut self, validator: Arc<dyn HeaderValidator>) -> Self {
        self.header_validator = Some(validator);
        self
    }

    /// Register a newly accepted transport and return its handle.
    pub fn accept(&self, transport: Box<dyn Transport>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut machine = ConnectionStateMachine::server(transport, self.config.clone());
        if let Some(validator) = &self.header_validator {
            machine = machine.with_header_validator(Arc::clone(validator));
        }
        self.connections
            .lock()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(machine)));
        info!(id, "connection accepted");
        id
    }

    /// Feed one transport event to connection `id` and drain its events.
    ///
    /// Returns an empty vector for an unknown (already removed) handle.
    /// When the event drives the connection terminal, the registry entry is
    /// removed before returning.
    pub fn handle_transport_event(&self, id: ConnectionId, event: TransportEvent) -> Vec<Event> {
        let Some(machine) = self.lookup(id) else {
            return Vec::new();
        };

        let mut machine = machine.lock().unwrap();
        machine.handle_transport_event(event);
        let events = drain(&mut machine);
        let terminal = machine.state().is_terminal();
        drop(machine);

        if terminal {
            self.remove(id);
        }
        events
    }

    /// Send a message on connection `id`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::NotOpen`] for an unknown handle; otherwise see
    /// [`ConnectionStateMachine::send`].
    pub fn send(&self, id: ConnectionId, message: Message) -> Result<()> {
        match self.lookup(id) {
            Some(machine) => machine.lock().unwrap().send(message),
            None => Err(ProtocolError::NotOpen.into()),
        }
    }

    /// Initiate the close handshake on connection `id`. No-op for an
    /// unknown handle.
    pub fn close(&self, id: ConnectionId, code: CloseCode, reason: &str) {
        if let Some(machine) = self.lookup(id) {
            machine.lock().unwrap().close(code, reason);
        }
    }

    /// Forcibly cancel connection `id` and drop it from the registry.
    /// Returns its final events; empty for an unknown handle.
    pub fn force_cancel(&self, id: ConnectionId) -> Vec<Event> {
        let Some(machine) = self.lookup(id) else {
            return Vec::new();
        };
        let mut machine = machine.lock().unwrap();
        machine.force_cancel();
        let events = drain(&mut machine);
        drop(machine);
        self.remove(id);
        events
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn lookup(&self, id: ConnectionId) -> Option<Arc<Mutex<ConnectionStateMachine>>> {
        self.connections.lock().unwrap().get(&id).cloned()
    }

    fn remove(&self, id: ConnectionId) {
        if self.connections.lock().unwrap().remove(&id).is_some() {
            debug!(id, "connection removed");
        }
    }
}

fn drain(machine: &mut ConnectionStateMachine) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = machine.poll_event() {
        events.push(event);
    }
    events
}
