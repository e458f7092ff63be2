//! Per-connection protocol state machine.
//!
//! One instance owns one connection's lifecycle. Transport byte events are
//! pushed in; typed [`Event`]s come out of an internal queue drained with
//! [`poll_event`](ConnectionStateMachine::poll_event). Before the upgrade,
//! inbound bytes feed the handshake codec; after it, the frame decoder and
//! reassembler. Outbound application writes run through the fragmenter and
//! encoder to the owned transport write half. The machine never blocks and
//! owns no timers; deadlines are the transport's and caller's business.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::{ConnectionState, Event, Role};
use crate::error::{Error, FrameError, ProtocolError, Result};
use crate::extensions::{Compressor, Decompressor};
use crate::message::{CloseCode, Message};
use crate::protocol::{
    ClientHandshake, Fragmenter, Frame, FrameDecoder, FrameEncoder, HeaderValidator, Headers,
    MAX_CONTROL_PAYLOAD, MessageReassembler, OpCode, ServerHandshake,
};
use crate::transport::{Transport, TransportEvent};

enum HandshakePhase {
    Client(ClientHandshake),
    Server,
    Done,
}

/// State machine for one WebSocket connection, client or server.
///
/// Confined to a single logical sequence of execution: the caller must not
/// feed it from two threads at once. Different connections are fully
/// independent.
pub struct ConnectionStateMachine {
    role: Role,
    state: ConnectionState,
    config: Config,
    transport: Box<dyn Transport>,
    read_buf: BytesMut,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    assembler: MessageReassembler,
    handshake: HandshakePhase,
    header_validator: Option<Arc<dyn HeaderValidator>>,
    compressor: Option<Box<dyn Compressor>>,
    events: VecDeque<Event>,
    close_sent: bool,
    terminal_emitted: bool,
}

impl ConnectionStateMachine {
    /// Create the client side of a connection. The upgrade request is sent
    /// when the transport reports `Connected`.
    #[must_use]
    pub fn client(
        handshake: ClientHandshake,
        transport: Box<dyn Transport>,
        config: Config,
    ) -> Self {
        Self::new(Role::Client, HandshakePhase::Client(handshake), transport, config)
    }

    /// Create the server side of a connection, awaiting the client's
    /// upgrade request.
    #[must_use]
    pub fn server(transport: Box<dyn Transport>, config: Config) -> Self {
        Self::new(Role::Server, HandshakePhase::Server, transport, config)
    }

    fn new(
        role: Role,
        handshake: HandshakePhase,
        transport: Box<dyn Transport>,
        config: Config,
    ) -> Self {
        let decoder = FrameDecoder::new(
            role,
            config.limits.max_frame_size,
            config.accept_unmasked_frames,
        );
        Self {
            role,
            state: ConnectionState::Connecting,
            transport,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            decoder,
            encoder: FrameEncoder::new(role),
            assembler: MessageReassembler::new(config.limits.clone()),
            handshake,
            header_validator: None,
            compressor: None,
            events: VecDeque::new(),
            close_sent: false,
            terminal_emitted: false,
            config,
        }
    }

    /// Install a server-side handshake policy hook.
    #[must_use]
    pub fn with_header_validator(mut self, validator: Arc<dyn HeaderValidator>) -> Self {
        self.header_validator = Some(validator);
        self
    }

    /// Install per-message compression hooks for both directions.
    #[must_use]
    pub fn with_compression(
        mut self,
        compressor: Box<dyn Compressor>,
        decompressor: Box<dyn Decompressor>,
    ) -> Self {
        self.compressor = Some(compressor);
        self.assembler =
            MessageReassembler::new(self.config.limits.clone()).with_decompressor(decompressor);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// This endpoint's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Pop the next queued engine event, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Feed one transport event into the machine.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Received(bytes) => self.on_received(&bytes),
            TransportEvent::ViabilityChanged(viable) => {
                debug!(role = %self.role, viable, "transport viability changed");
            }
            TransportEvent::Failed(error) => self.fail(error.into()),
            TransportEvent::Cancelled => self.on_cancelled(),
        }
    }

    /// Send a message. Data messages are fragmented per
    /// [`Config::fragment_size`]; control messages go out as single frames.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::NotOpen`] outside the `Open` state,
    /// [`FrameError::ControlFrameTooLarge`] for an oversized ping/pong,
    /// limit and compression failures otherwise.
    pub fn send(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Closed { code, reason } => {
                self.close(code, &reason);
                Ok(())
            }
            _ if !self.state.can_send() => Err(ProtocolError::NotOpen.into()),
            Message::Text(text) => self.send_data(OpCode::Text, text.into_bytes()),
            Message::Binary(data) => self.send_data(OpCode::Binary, data),
            Message::Ping(data) => self.send_control(Frame::ping(data)),
            Message::Pong(data) => self.send_control(Frame::pong(data)),
        }
    }

    /// Initiate the close handshake. Idempotent; a second call (or a call
    /// racing the peer's close) does nothing.
    pub fn close(&mut self, code: CloseCode, reason: &str) {
        if self.state != ConnectionState::Open || self.close_sent {
            return;
        }
        debug!(role = %self.role, %code, "close initiated");
        self.write_close_frame(code, reason);
        self.state = ConnectionState::Closing;
    }

    /// Forced local teardown from any state, without further I/O beyond the
    /// transport teardown itself. Idempotent.
    pub fn force_cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        debug!(role = %self.role, state = %self.state, "force cancel");
        self.transport.disconnect();
        self.state = ConnectionState::Closed;
        self.emit_terminal(Event::Cancelled);
    }

    fn on_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        if let HandshakePhase::Client(handshake) = &self.handshake {
            self.transport.write(handshake.request_bytes(), None);
        }
        self.state = ConnectionState::HandshakeInFlight;
    }

    fn on_received(&mut self, bytes: &[u8]) {
        if self.state.is_terminal() {
            return;
        }
        self.read_buf.extend_from_slice(bytes);
        match self.state {
            // Tolerate transports that deliver bytes before the connected
            // notification; the handshake codec waits either way.
            ConnectionState::Connecting | ConnectionState::HandshakeInFlight => {
                self.progress_handshake();
            }
            ConnectionState::Open | ConnectionState::Closing => self.process_frames(),
            ConnectionState::Closed | ConnectionState::Failed => {}
        }
    }

    fn progress_handshake(&mut self) {
        let max = self.config.limits.max_handshake_size;
        match std::mem::replace(&mut self.handshake, HandshakePhase::Done) {
            HandshakePhase::Client(handshake) => {
                match handshake.read_response(&self.read_buf, max) {
                    Ok(None) => self.handshake = HandshakePhase::Client(handshake),
                    Ok(Some((headers, consumed))) => {
                        self.read_buf.advance(consumed);
                        self.open(headers);
                    }
                    Err(error) => self.fail(error.into()),
                }
            }
            HandshakePhase::Server => match ServerHandshake::read_request(&self.read_buf, max) {
                Ok(None) => self.handshake = HandshakePhase::Server,
                Ok(Some((request, consumed))) => {
                    self.read_buf.advance(consumed);
                    if let Some(validator) = &self.header_validator {
                        if let Err(error) = validator.validate(&request.headers, &request.key) {
                            // Rejected: no response goes out; the caller may
                            // layer a 400-class reply on the raw transport.
                            self.fail(error.into());
                            return;
                        }
                    }
                    match ServerHandshake::response_bytes(&request.key, None) {
                        Ok(response) => {
                            self.transport.write(response, None);
                            self.open(request.headers);
                        }
                        Err(error) => self.fail(error.into()),
                    }
                }
                Err(error) => self.fail(error.into()),
            },
            HandshakePhase::Done => {}
        }
    }

    fn open(&mut self, headers: Headers) {
        debug!(role = %self.role, "handshake complete");
        self.state = ConnectionState::Open;
        self.events.push_back(Event::Connected(headers));
        // The delivery that finished the handshake may already hold the
        // start of the frame stream.
        self.process_frames();
    }

    fn process_frames(&mut self) {
        while self.state.can_receive() {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => match self.assembler.push(frame) {
                    Ok(Some(message)) => self.dispatch_message(message),
                    Ok(None) => {}
                    Err(error) => self.protocol_failure(error),
                },
                Ok(None) => break,
                Err(error) => self.protocol_failure(error.into()),
            }
        }
    }

    fn dispatch_message(&mut self, message: Message) {
        match message {
            Message::Text(text) => self.events.push_back(Event::Text(text)),
            Message::Binary(data) => self.events.push_back(Event::Binary(data)),
            Message::Ping(data) => {
                if self.config.auto_pong && !self.close_sent {
                    let wire = self.encoder.encode(&Frame::pong(data.clone()));
                    self.transport.write(wire, None);
                }
                self.events.push_back(Event::Ping(data));
            }
            Message::Pong(data) => self.events.push_back(Event::Pong(data)),
            Message::Closed { code, reason } => self.on_peer_close(code, reason),
        }
    }

    fn on_peer_close(&mut self, code: CloseCode, reason: String) {
        debug!(role = %self.role, %code, "peer close received");
        if !self.close_sent {
            self.write_close_frame(code, &reason);
        }
        self.state = ConnectionState::Closed;
        self.emit_terminal(Event::Disconnected { code, reason });
        self.transport.disconnect();
    }

    fn on_cancelled(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let had_opened = self.state.can_receive();
        self.state = ConnectionState::Closed;
        if had_opened {
            // Abrupt termination: the peer's intent is unknown, not wrong.
            self.emit_terminal(Event::Disconnected {
                code: CloseCode::NoStatus,
                reason: String::new(),
            });
        } else {
            self.emit_terminal(Event::Cancelled);
        }
    }

    /// Terminal failure without close-frame courtesy (transport already
    /// dead, or no frame layer to speak yet).
    fn fail(&mut self, error: Error) {
        if self.state.is_terminal() {
            return;
        }
        warn!(role = %self.role, %error, "connection failed");
        self.state = ConnectionState::Failed;
        self.emit_terminal(Event::Error(error));
        self.transport.disconnect();
    }

    /// Terminal failure on a live frame stream: best-effort close frame,
    /// then teardown. Frame boundaries are untrusted from here on, so no
    /// resynchronization is attempted.
    fn protocol_failure(&mut self, error: Error) {
        if self.state.is_terminal() {
            return;
        }
        warn!(role = %self.role, %error, "protocol violation");
        if !self.close_sent {
            let code = match &error {
                Error::Frame(FrameError::InvalidUtf8) => CloseCode::InvalidPayload,
                _ => CloseCode::Protocol,
            };
            self.write_close_frame(code, "");
        }
        self.state = ConnectionState::Failed;
        self.emit_terminal(Event::Error(error));
        self.transport.disconnect();
    }

    fn write_close_frame(&mut self, code: CloseCode, reason: &str) {
        // Report-only codes (1005/1006/...) must never hit the wire.
        let frame = if code.is_sendable() {
            Frame::close(Some(code.as_u16()), reason)
        } else {
            Frame::close(None, "")
        };
        let wire = self.encoder.encode(&frame);
        self.transport.write(wire, None);
        self.close_sent = true;
    }

    fn emit_terminal(&mut self, event: Event) {
        if self.terminal_emitted {
            return;
        }
        self.terminal_emitted = true;
        self.events.push_back(event);
    }

    fn send_data(&mut self, opcode: OpCode, payload: Vec<u8>) -> Result<()> {
        self.config.limits.check_message_size(payload.len())?;
        let (payload, compressed) = match self.compressor.as_mut() {
            Some(compressor) => (compressor.compress(&payload)?, true),
            None => (payload, false),
        };
        for frame in Fragmenter::new(&payload, opcode, compressed, self.config.fragment_size) {
            let wire = self.encoder.encode(&frame);
            self.transport.write(wire, None);
        }
        Ok(())
    }

    fn send_control(&mut self, frame: Frame) -> Result<()> {
        if frame.payload().len() > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlFrameTooLarge(frame.payload().len()).into());
        }
        let wire = self.encoder.encode(&frame);
        self.transport.write(wire, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WriteCompletion;
    use std::sync::Mutex;

    /// Captures everything the machine writes; the test plays the peer.
    #[derive(Clone, Default)]
    struct RecordingTransport {
        written: Arc<Mutex<Vec<u8>>>,
        disconnects: Arc<Mutex<usize>>,
    }

    impl RecordingTransport {
        fn take_written(&self) -> Vec<u8> {
            std::mem::take(&mut *self.written.lock().unwrap())
        }

        fn disconnect_count(&self) -> usize {
            *self.disconnects.lock().unwrap()
        }
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, data: Vec<u8>, completion: Option<WriteCompletion>) {
            self.written.lock().unwrap().extend_from_slice(&data);
            if let Some(done) = completion {
                done(Ok(()));
            }
        }

        fn disconnect(&mut self) {
            *self.disconnects.lock().unwrap() += 1;
        }
    }

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn open_server() -> (ConnectionStateMachine, RecordingTransport) {
        let transport = RecordingTransport::default();
        let mut machine =
            ConnectionStateMachine::server(Box::new(transport.clone()), Config::default());
        machine.handle_transport_event(TransportEvent::Connected);
        let request = ClientHandshake::with_key("example.com", "/", KEY).request_bytes();
        machine.handle_transport_event(TransportEvent::Received(request));
        assert!(matches!(machine.poll_event(), Some(Event::Connected(_))));
        transport.take_written(); // drop the 101 response
        (machine, transport)
    }

    #[test]
    fn test_client_sends_upgrade_request_on_connect() {
        let transport = RecordingTransport::default();
        let handshake = ClientHandshake::with_key("example.com", "/chat", KEY);
        let mut machine = ConnectionStateMachine::client(
            handshake,
            Box::new(transport.clone()),
            Config::default(),
        );

        assert_eq!(machine.state(), ConnectionState::Connecting);
        machine.handle_transport_event(TransportEvent::Connected);
        assert_eq!(machine.state(), ConnectionState::HandshakeInFlight);

        let request = String::from_utf8(transport.take_written()).unwrap();
        assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Sec-WebSocket-Key: {KEY}\r\n")));
    }

    #[test]
    fn test_client_opens_on_valid_response() {
        let transport = RecordingTransport::default();
        let handshake = ClientHandshake::with_key("example.com", "/", KEY);
        let mut machine = ConnectionStateMachine::client(
            handshake,
            Box::new(transport.clone()),
            Config::default(),
        );
        machine.handle_transport_event(TransportEvent::Connected);
        transport.take_written();

        let response = ServerHandshake::response_bytes(KEY, None).unwrap();
        machine.handle_transport_event(TransportEvent::Received(response));
        assert_eq!(machine.state(), ConnectionState::Open);
        assert!(matches!(machine.poll_event(), Some(Event::Connected(_))));
    }

    #[test]
    fn test_client_fails_on_accept_mismatch() {
        let transport = RecordingTransport::default();
        let handshake = ClientHandshake::with_key("example.com", "/", KEY);
        let mut machine = ConnectionStateMachine::client(
            handshake,
            Box::new(transport.clone()),
            Config::default(),
        );
        machine.handle_transport_event(TransportEvent::Connected);

        let response = ServerHandshake::response_bytes("bm90IHRoZSBzYW1lIGtleSE=", None).unwrap();
        machine.handle_transport_event(TransportEvent::Received(response));
        assert_eq!(machine.state(), ConnectionState::Failed);
        assert!(matches!(
            machine.poll_event(),
            Some(Event::Error(Error::Handshake(_)))
        ));
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[test]
    fn test_server_writes_101_response() {
        let transport = RecordingTransport::default();
        let mut machine =
            ConnectionStateMachine::server(Box::new(transport.clone()), Config::default());
        machine.handle_transport_event(TransportEvent::Connected);
        let request = ClientHandshake::with_key("example.com", "/", KEY).request_bytes();
        machine.handle_transport_event(TransportEvent::Received(request));

        let response = String::from_utf8(transport.take_written()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn test_server_handshake_split_across_deliveries() {
        let transport = RecordingTransport::default();
        let mut machine =
            ConnectionStateMachine::server(Box::new(transport.clone()), Config::default());
        machine.handle_transport_event(TransportEvent::Connected);

        let request = ClientHandshake::with_key("example.com", "/", KEY).request_bytes();
        for byte in request {
            machine.handle_transport_event(TransportEvent::Received(vec![byte]));
        }
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn test_leftover_bytes_after_handshake_become_frames() {
        let transport = RecordingTransport::default();
        let mut machine =
            ConnectionStateMachine::server(Box::new(transport.clone()), Config::default());
        machine.handle_transport_event(TransportEvent::Connected);

        // Handshake head and the first (masked) frame in one delivery.
        let mut delivery = ClientHandshake::with_key("example.com", "/", KEY).request_bytes();
        let mut client_encoder = FrameEncoder::new(Role::Client);
        delivery.extend(client_encoder.encode(&Frame::text(b"hello".to_vec())));
        machine.handle_transport_event(TransportEvent::Received(delivery));

        assert!(matches!(machine.poll_event(), Some(Event::Connected(_))));
        assert!(matches!(machine.poll_event(), Some(Event::Text(t)) if t == "hello"));
    }

    #[test]
    fn test_header_validator_rejection_sends_no_response() {
        struct DenyAll;
        impl HeaderValidator for DenyAll {
            fn validate(
                &self,
                _headers: &Headers,
                _key: &str,
            ) -> std::result::Result<(), crate::error::HandshakeError> {
                Err(crate::error::HandshakeError::Rejected("denied".into()))
            }
        }

        let transport = RecordingTransport::default();
        let mut machine =
            ConnectionStateMachine::server(Box::new(transport.clone()), Config::default())
                .with_header_validator(Arc::new(DenyAll));
        machine.handle_transport_event(TransportEvent::Connected);
        let request = ClientHandshake::with_key("example.com", "/", KEY).request_bytes();
        machine.handle_transport_event(TransportEvent::Received(request));

        assert_eq!(machine.state(), ConnectionState::Failed);
        assert!(transport.take_written().is_empty());
        assert!(matches!(
            machine.poll_event(),
            Some(Event::Error(Error::Handshake(_)))
        ));
    }

    #[test]
    fn test_auto_pong_echo() {
        let (mut machine, transport) = open_server();
        let mut client_encoder = FrameEncoder::new(Role::Client);
        let ping = client_encoder.encode(&Frame::ping(b"beat".to_vec()));
        machine.handle_transport_event(TransportEvent::Received(ping));

        assert!(matches!(machine.poll_event(), Some(Event::Ping(d)) if d == b"beat"));
        let written = transport.take_written();
        assert_eq!(written[0], 0x8a); // FIN + Pong, unmasked from server
        assert_eq!(&written[2..], b"beat");
    }

    #[test]
    fn test_auto_pong_disabled() {
        let transport = RecordingTransport::default();
        let config = Config::default().with_auto_pong(false);
        let mut machine = ConnectionStateMachine::server(Box::new(transport.clone()), config);
        machine.handle_transport_event(TransportEvent::Connected);
        let request = ClientHandshake::with_key("example.com", "/", KEY).request_bytes();
        machine.handle_transport_event(TransportEvent::Received(request));
        transport.take_written();

        let mut client_encoder = FrameEncoder::new(Role::Client);
        let ping = client_encoder.encode(&Frame::ping(b"beat".to_vec()));
        machine.handle_transport_event(TransportEvent::Received(ping));
        assert!(transport.take_written().is_empty());
    }

    #[test]
    fn test_peer_close_is_echoed_once() {
        let (mut machine, transport) = open_server();
        let mut client_encoder = FrameEncoder::new(Role::Client);
        let close = client_encoder.encode(&Frame::close(Some(1000), "bye"));
        machine.handle_transport_event(TransportEvent::Received(close));

        assert_eq!(machine.state(), ConnectionState::Closed);
        let written = transport.take_written();
        assert_eq!(written[0], 0x88);
        assert_eq!(u16::from_be_bytes([written[2], written[3]]), 1000);

        let mut disconnects = 0;
        while let Some(event) = machine.poll_event() {
            if let Event::Disconnected { code, reason } = event {
                assert_eq!(code, CloseCode::Normal);
                assert_eq!(reason, "bye");
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn test_close_handshake_completes() {
        let (mut machine, transport) = open_server();
        machine.close(CloseCode::Normal, "done");
        assert_eq!(machine.state(), ConnectionState::Closing);
        let written = transport.take_written();
        assert_eq!(written[0], 0x88);

        // Peer echoes; we reach Closed with exactly one Disconnected event.
        let mut client_encoder = FrameEncoder::new(Role::Client);
        let echo = client_encoder.encode(&Frame::close(Some(1000), "done"));
        machine.handle_transport_event(TransportEvent::Received(echo));
        assert_eq!(machine.state(), ConnectionState::Closed);

        let mut disconnects = 0;
        while let Some(event) = machine.poll_event() {
            if matches!(event, Event::Disconnected { .. }) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        // No second close frame went out.
        assert!(transport.take_written().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut machine, transport) = open_server();
        machine.close(CloseCode::Normal, "bye");
        let first = transport.take_written();
        assert!(!first.is_empty());
        machine.close(CloseCode::Normal, "bye");
        assert!(transport.take_written().is_empty());
    }

    #[test]
    fn test_force_cancel_is_idempotent() {
        let (mut machine, transport) = open_server();
        machine.force_cancel();
        machine.force_cancel();
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert_eq!(transport.disconnect_count(), 1);

        let mut terminal = 0;
        while let Some(event) = machine.poll_event() {
            if event.is_terminal() {
                terminal += 1;
            }
        }
        assert_eq!(terminal, 1);
    }

    #[test]
    fn test_transport_cancel_while_open_reports_no_status() {
        let (mut machine, _transport) = open_server();
        machine.handle_transport_event(TransportEvent::Cancelled);
        assert_eq!(machine.state(), ConnectionState::Closed);

        let mut saw = false;
        while let Some(event) = machine.poll_event() {
            if let Event::Disconnected { code, reason } = event {
                assert_eq!(code, CloseCode::NoStatus);
                assert!(reason.is_empty());
                saw = true;
            }
        }
        assert!(saw);
    }

    #[test]
    fn test_transport_cancel_before_open_reports_cancelled() {
        let transport = RecordingTransport::default();
        let mut machine =
            ConnectionStateMachine::server(Box::new(transport.clone()), Config::default());
        machine.handle_transport_event(TransportEvent::Connected);
        machine.handle_transport_event(TransportEvent::Cancelled);
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(matches!(machine.poll_event(), Some(Event::Cancelled)));
    }

    #[test]
    fn test_transport_failure_is_fatal() {
        let (mut machine, _transport) = open_server();
        machine.handle_transport_event(TransportEvent::Failed(
            crate::error::TransportError::Io("reset".into()),
        ));
        assert_eq!(machine.state(), ConnectionState::Failed);
        assert!(matches!(
            machine.poll_event(),
            Some(Event::Error(Error::Transport(_)))
        ));

        // A late cancel must not produce a second terminal event.
        machine.handle_transport_event(TransportEvent::Cancelled);
        assert!(machine.poll_event().is_none());
    }

    #[test]
    fn test_protocol_violation_sends_close_1002() {
        let (mut machine, transport) = open_server();
        // Lone continuation frame from the client.
        let mut client_encoder = FrameEncoder::new(Role::Client);
        let frame = client_encoder.encode(&Frame::new(true, OpCode::Continuation, vec![1]));
        machine.handle_transport_event(TransportEvent::Received(frame));

        assert_eq!(machine.state(), ConnectionState::Failed);
        let written = transport.take_written();
        assert_eq!(written[0], 0x88);
        assert_eq!(u16::from_be_bytes([written[2], written[3]]), 1002);
        assert!(matches!(
            machine.poll_event(),
            Some(Event::Error(Error::Protocol(_)))
        ));
    }

    #[test]
    fn test_invalid_utf8_sends_close_1007() {
        let (mut machine, transport) = open_server();
        let mut client_encoder = FrameEncoder::new(Role::Client);
        let frame = client_encoder.encode(&Frame::new(true, OpCode::Text, vec![0x80, 0x81]));
        machine.handle_transport_event(TransportEvent::Received(frame));

        let written = transport.take_written();
        assert_eq!(u16::from_be_bytes([written[2], written[3]]), 1007);
        assert!(matches!(
            machine.poll_event(),
            Some(Event::Error(Error::Frame(FrameError::InvalidUtf8)))
        ));
    }

    #[test]
    fn test_send_before_open_fails() {
        let transport = RecordingTransport::default();
        let mut machine =
            ConnectionStateMachine::server(Box::new(transport), Config::default());
        let result = machine.send(Message::text("early"));
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::NotOpen))
        ));
    }

    #[test]
    fn test_server_send_is_unmasked() {
        let (mut machine, transport) = open_server();
        machine.send(Message::text("hi")).unwrap();
        let written = transport.take_written();
        assert_eq!(written, [0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_oversized_ping_rejected() {
        let (mut machine, _transport) = open_server();
        let result = machine.send(Message::ping(vec![0u8; 126]));
        assert!(matches!(
            result,
            Err(Error::Frame(FrameError::ControlFrameTooLarge(126)))
        ));
    }

    #[test]
    fn test_large_send_fragments() {
        let transport = RecordingTransport::default();
        let config = Config::default().with_fragment_size(4);
        let mut machine = ConnectionStateMachine::server(Box::new(transport.clone()), config);
        machine.handle_transport_event(TransportEvent::Connected);
        let request = ClientHandshake::with_key("example.com", "/", KEY).request_bytes();
        machine.handle_transport_event(TransportEvent::Received(request));
        transport.take_written();

        machine.send(Message::binary(vec![0u8; 10])).unwrap();
        let written = transport.take_written();
        // 3 frames: 4+4+2 payload bytes, each with a 2-byte header.
        assert_eq!(written.len(), 10 + 6);
        assert_eq!(written[0], 0x02); // Binary, FIN=0
        assert_eq!(written[6], 0x00); // Continuation, FIN=0
        assert_eq!(written[12], 0x80); // Continuation, FIN=1
    }
}
