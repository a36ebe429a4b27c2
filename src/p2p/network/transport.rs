//! Transport layer for network communication
//!
//! A short-lived TCP connection per exchange: connect, write one frame,
//! optionally read one frame, close. The listener spawns a task per accepted
//! connection and hands decoded requests to a [`MessageHandler`].

use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{MessageProtocol, NetworkMessage};
use crate::p2p::{NetworkConfig, P2PError, P2PResult};

/// Receives decoded inbound requests.
///
/// Returning `None` closes the connection without writing anything, which
/// the sender observes as an empty response.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: NetworkMessage, remote: SocketAddr) -> Option<NetworkMessage>;

    /// Called for inbound frames that fail to decode
    async fn malformed(&self, remote: SocketAddr, error: P2PError) {
        debug!("Dropping malformed message from {}: {}", remote, error);
    }
}

/// Client side of the request/response exchange
#[derive(Debug, Clone)]
pub struct Transport {
    config: NetworkConfig,
}

impl Transport {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Send a request and wait for its single reply.
    ///
    /// Every failure on the peer's side (refused, timeout, empty or garbled
    /// reply) is reported as `PeerUnreachable`. A message too large to send
    /// is `MalformedMessage` and never reaches the network.
    pub async fn request(&self, addr: SocketAddr, message: &NetworkMessage) -> P2PResult<NetworkMessage> {
        let frame = MessageProtocol::encode(message, self.config.max_message_size)?;
        let exchange = async {
            let mut stream = TcpStream::connect(addr).await?;
            MessageProtocol::write_frame(&mut stream, &frame).await?;
            MessageProtocol::read_message(&mut stream, self.config.max_message_size).await
        };

        match timeout(self.config.peer_timeout(), exchange).await {
            Ok(Ok(Some(reply))) => Ok(reply),
            Ok(Ok(None)) => Err(P2PError::unreachable(addr, "empty response")),
            Ok(Err(e)) => Err(P2PError::unreachable(addr, e)),
            Err(_) => Err(P2PError::unreachable(addr, "timed out")),
        }
    }

    /// Send a one-way message; no reply is read
    pub async fn send(&self, addr: SocketAddr, message: &NetworkMessage) -> P2PResult<()> {
        let frame = MessageProtocol::encode(message, self.config.max_message_size)?;
        let exchange = async {
            let mut stream = TcpStream::connect(addr).await?;
            MessageProtocol::write_frame(&mut stream, &frame).await
        };

        match timeout(self.config.peer_timeout(), exchange).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(P2PError::unreachable(addr, e)),
            Err(_) => Err(P2PError::unreachable(addr, "timed out")),
        }
    }
}

/// Concurrent TCP listener dispatching to a [`MessageHandler`]
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    config: NetworkConfig,
    shutdown_tx: Option<mpsc::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind the socket; connections queue until [`Listener::serve`] is called
    pub async fn bind(addr: SocketAddr, config: NetworkConfig) -> P2PResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| P2PError::Bind(format!("{}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| P2PError::Bind(e.to_string()))?;

        Ok(Self {
            local_addr,
            listener: Some(listener),
            config,
            shutdown_tx: None,
            accept_task: None,
        })
    }

    /// Start accepting connections, one task per connection
    pub fn serve<H: MessageHandler>(&mut self, handler: Arc<H>) -> P2PResult<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| P2PError::Bind(format!("{} is already serving", self.local_addr)))?;
        let config = self.config.clone();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, remote)) => {
                                let handler = Arc::clone(&handler);
                                let config = config.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, remote, handler, config).await;
                                });
                            }
                            Err(e) => {
                                // transient (e.g. fd exhaustion); keep serving
                                warn!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                }
            }
        }));

        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting; connections already being served finish on their own
    pub async fn shutdown(&mut self) {
        self.listener = None;
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
    }

    async fn handle_connection<H: MessageHandler>(
        mut stream: TcpStream,
        remote: SocketAddr,
        handler: Arc<H>,
        config: NetworkConfig,
    ) {
        let read = timeout(
            config.peer_timeout(),
            MessageProtocol::read_message(&mut stream, config.max_message_size),
        )
        .await;

        let message = match read {
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => {
                trace!("Connection from {} closed without a request", remote);
                return;
            }
            Ok(Err(e @ P2PError::MalformedMessage(_))) => {
                handler.malformed(remote, e).await;
                return;
            }
            Ok(Err(e)) => {
                debug!("Read from {} failed: {}", remote, e);
                return;
            }
            Err(_) => {
                debug!("Timed out reading request from {}", remote);
                return;
            }
        };

        let kind = message.kind();
        if let Some(reply) = handler.handle(message, remote).await {
            if let Err(e) = MessageProtocol::write_message(&mut stream, &reply, config.max_message_size).await {
                debug!("Failed to reply {} to {} ({}): {}", reply.kind(), remote, kind, e);
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}
