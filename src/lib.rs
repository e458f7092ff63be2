//! # wsengine - Transport-agnostic WebSocket protocol engine
//!
//! `wsengine` is an RFC 6455 compliant WebSocket protocol engine usable on
//! both sides of a connection. It turns a raw, ordered byte stream into
//! typed messages and outgoing messages back into correctly framed bytes,
//! independent of what carries those bytes: a TCP socket, a TLS session,
//! or an in-memory test harness.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol::frame`]) - resumable decode and
//!   role-masked encode of the RFC 6455 binary frame format
//! - **Message reassembler** ([`protocol::assembler`]) - fragmentation
//!   rules, control-frame interleaving, UTF-8 validation
//! - **Handshake codecs** ([`protocol::handshake`]) - HTTP/1.1 upgrade
//!   request/response construction and validation
//! - **Connection state machine** ([`connection`]) - one connection's
//!   lifecycle, routing transport byte events through the layers above
//! - **Endpoints** ([`ClientEndpoint`], [`ServerEndpoint`]) - thin
//!   orchestration over one or many connections
//!
//! The engine is push-driven and runtime-free: transports deliver
//! [`TransportEvent`]s, applications drain [`Event`]s. The `async-tokio`
//! feature (default) adds a tokio TCP transport in [`net`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use wsengine::{ClientEndpoint, ClientHandshake, Config};
//!
//! let (transport, mut events) =
//!     wsengine::net::connect("127.0.0.1:9001", timeout).await?;
//! let handshake = ClientHandshake::new("127.0.0.1:9001", "/");
//! let mut client = ClientEndpoint::new(handshake, Box::new(transport), Config::new());
//! while let Some(event) = events.recv().await {
//!     client.handle_transport_event(event);
//!     while let Some(app_event) = client.poll_event() {
//!         println!("{app_event:?}");
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod server;
pub mod transport;

#[cfg(feature = "async-tokio")]
pub mod net;

pub use client::ClientEndpoint;
pub use config::{Config, Limits};
pub use connection::{ConnectionState, ConnectionStateMachine, Event, Role};
pub use error::{Error, FrameError, HandshakeError, ProtocolError, Result, TransportError};
pub use message::{CloseCode, Message};
pub use protocol::{ClientHandshake, HeaderValidator, OpCode, WS_GUID, compute_accept_key};
pub use server::{ConnectionId, ServerEndpoint};
pub use transport::{Transport, TransportEvent, TrustDecision, TrustEvaluator, WriteCompletion};
