//! Tokio TCP transport glue (`async-tokio` feature).
//!
//! A spawned task owns each socket: reads are pushed into an event channel
//! as [`TransportEvent`]s, writes arrive over a command channel from the
//! [`TcpTransport`] handle the engine owns. A TLS transport would have the
//! same shape with a [`TrustEvaluator`](crate::transport::TrustEvaluator)
//! consulted during session setup; plain TCP has nothing to evaluate.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent, WriteCompletion};

enum Command {
    Write(Vec<u8>, Option<WriteCompletion>),
    Disconnect,
}

/// Write half of a TCP-backed transport.
///
/// Cheap handle over the socket task's command channel; dropping it does
/// not close the socket (call [`disconnect`](Transport::disconnect)).
pub struct TcpTransport {
    commands: mpsc::UnboundedSender<Command>,
}

impl Transport for TcpTransport {
    fn write(&mut self, data: Vec<u8>, completion: Option<WriteCompletion>) {
        if let Err(rejected) = self.commands.send(Command::Write(data, completion)) {
            // Socket task already gone; the completion contract still holds.
            if let Command::Write(_, Some(done)) = rejected.0 {
                done(Err(TransportError::Closed));
            }
        }
    }

    fn disconnect(&mut self) {
        let _ = self.commands.send(Command::Disconnect);
    }
}

/// Connect to `addr` within `timeout`.
///
/// Returns the transport write half and the event stream to pump into an
/// endpoint; the first event is `Connected`.
///
/// # Errors
///
/// [`TransportError::Timeout`] or [`TransportError::ConnectFailed`].
pub async fn connect(
    addr: &str,
    timeout: Duration,
) -> Result<(TcpTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    debug!(addr, "tcp connected");
    Ok(spawn_socket_task(stream))
}

/// Listens for TCP connections and hands each one off as a transport.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectFailed`] when the bind fails.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        info!(addr, "listening");
        Ok(Self { listener })
    }

    /// The bound local address.
    ///
    /// # Errors
    ///
    /// [`TransportError::Io`] when the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::from)
    }

    /// Accept the next connection.
    ///
    /// # Errors
    ///
    /// [`TransportError::Io`] when the accept fails.
    pub async fn accept(
        &self,
    ) -> Result<(TcpTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::from)?;
        debug!(%peer, "tcp accepted");
        Ok(spawn_socket_task(stream))
    }
}

fn spawn_socket_task(
    stream: TcpStream,
) -> (TcpTransport, mpsc::UnboundedReceiver<TransportEvent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let _ = events_tx.send(TransportEvent::Connected);
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                command = commands_rx.recv() => match command {
                    Some(Command::Write(data, completion)) => {
                        let result = writer
                            .write_all(&data)
                            .await
                            .map_err(TransportError::from);
                        let failure = result.as_ref().err().cloned();
                        if let Some(done) = completion {
                            done(result);
                        }
                        if let Some(error) = failure {
                            let _ = events_tx.send(TransportEvent::Failed(error));
                            break;
                        }
                    }
                    // Engine handle dropped or disconnected: tear down.
                    Some(Command::Disconnect) | None => {
                        let _ = writer.shutdown().await;
                        let _ = events_tx.send(TransportEvent::Cancelled);
                        break;
                    }
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        let _ = events_tx.send(TransportEvent::Cancelled);
                        break;
                    }
                    Ok(n) => {
                        if events_tx.send(TransportEvent::Received(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        let _ = events_tx.send(TransportEvent::Failed(error.into()));
                        break;
                    }
                },
            }
        }

        // Fail any writes still queued so their completions fire exactly
        // once; anything sent after this close fails at the send site.
        commands_rx.close();
        while let Ok(command) = commands_rx.try_recv() {
            if let Command::Write(_, Some(done)) = command {
                done(Err(TransportError::Closed));
            }
        }
    });

    (TcpTransport { commands: commands_tx }, events_rx)
}
