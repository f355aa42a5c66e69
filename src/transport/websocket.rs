//! Persistent WebSocket transport
//!
//! The socket is owned by a single connection task. The transport handle
//! only flips [`ConnectionState`] and pushes outgoing frames into that task's
//! bounded channel, so `send` never waits on the network. A full channel
//! (peer not reading) drops the frame.
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake ok--> Connected
//!      ^                          |                            |
//!      +------ error / timeout ---+------ error / peer close --+
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ConnectError, ConnectionState, SendError, Transport, TransportKind};
use crate::encoder::{EncodedMessage, Payload};
use crate::supervisor::Reconnect;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Frames buffered toward the socket task before sends are refused
pub const OUTGOING_QUEUE_CAPACITY: usize = 256;

/// Connection bookkeeping shared with the connection task
struct Link {
    state: ConnectionState,
    /// Bumped on every attempt and on shutdown; a task only touches the
    /// link while its generation is current
    generation: u64,
    outgoing: Option<mpsc::Sender<Message>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl Link {
    /// Drop the current connection if `generation` still owns it
    fn release(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        self.outgoing = None;
        true
    }
}

/// WebSocket client transport
pub struct WebSocketTransport {
    url: String,
    connect_timeout: Option<Duration>,
    link: Arc<Mutex<Link>>,
}

impl WebSocketTransport {
    /// Create a transport for `url` (e.g. `ws://host:3902`), initially disconnected
    pub fn new(url: impl Into<String>, connect_timeout: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            link: Arc::new(Mutex::new(Link {
                state: ConnectionState::Disconnected,
                generation: 0,
                outgoing: None,
                task: None,
                closed: false,
            })),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.lock().state
    }

    /// Start a connection attempt in the background
    ///
    /// No-op while connecting, connected or after shutdown. Returns whether
    /// a new attempt was started. Must be called from within a tokio runtime.
    pub fn connect(&self) -> bool {
        let mut link = self.link.lock();
        if link.closed || link.state != ConnectionState::Disconnected {
            return false;
        }

        link.generation += 1;
        link.state = ConnectionState::Connecting;

        let (tx, rx) = mpsc::channel(OUTGOING_QUEUE_CAPACITY);
        link.outgoing = Some(tx);

        let task = tokio::spawn(run_connection(
            Arc::clone(&self.link),
            link.generation,
            self.url.clone(),
            self.connect_timeout,
            rx,
        ));
        link.task = Some(task);

        debug!("Connecting to {} (attempt generation {})", self.url, link.generation);
        true
    }
}

async fn handshake(url: &str, timeout: Option<Duration>) -> Result<WsStream, ConnectError> {
    let attempt = connect_async(url);
    let result = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ConnectError::Timeout {
                url: url.to_string(),
                timeout,
            })?,
        None => attempt.await,
    };

    result
        .map(|(stream, _response)| stream)
        .map_err(|e| ConnectError::Handshake {
            url: url.to_string(),
            source: Box::new(e),
        })
}

/// Owns the socket for one connection attempt
async fn run_connection(
    link: Arc<Mutex<Link>>,
    generation: u64,
    url: String,
    timeout: Option<Duration>,
    mut outgoing: mpsc::Receiver<Message>,
) {
    let stream = match handshake(&url, timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("ERROR: {}", e);
            link.lock().release(generation);
            return;
        }
    };

    {
        let mut link = link.lock();
        if link.generation != generation {
            debug!("Connection to {} superseded, dropping socket", url);
            return;
        }
        link.state = ConnectionState::Connected;
    }
    info!("✅ Connected to {}", url);

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            Some(frame) = outgoing.recv() => {
                if let Err(e) = sink.send(frame).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    info!("CLOSE: connection closed by server ({:?})", frame);
                    break;
                }
                Some(Ok(other)) => {
                    debug!("Ignoring inbound frame ({} bytes)", other.len());
                }
                Some(Err(e)) => {
                    warn!("ERROR: connection to {} failed: {}", url, e);
                    break;
                }
                None => {
                    info!("CLOSE: connection to {} ended", url);
                    break;
                }
            }
        }
    }

    link.lock().release(generation);
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn send(&self, message: EncodedMessage) -> Result<(), SendError> {
        let link = self.link.lock();
        if link.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }

        let frame = match message.payload {
            Payload::Text(text) => Message::Text(text),
            Payload::Binary(bytes) => Message::Binary(bytes.to_vec()),
        };

        link.outgoing
            .as_ref()
            .ok_or(SendError::NotConnected)?
            .try_send(frame)
            .map_err(|e| match e {
                TrySendError::Full(_) => SendError::QueueFull,
                TrySendError::Closed(_) => SendError::NotConnected,
            })
    }

    fn connection_state(&self) -> ConnectionState {
        WebSocketTransport::connection_state(self)
    }

    async fn shutdown(&self) -> Result<()> {
        let task = {
            let mut link = self.link.lock();
            link.closed = true;
            link.generation += 1;
            link.state = ConnectionState::Disconnected;
            link.outgoing = None;
            link.task.take()
        };

        if let Some(task) = task {
            task.abort();
        }
        info!("WebSocket transport to {} terminated", self.url);
        Ok(())
    }
}

impl Reconnect for WebSocketTransport {
    fn connection_state(&self) -> ConnectionState {
        WebSocketTransport::connection_state(self)
    }

    fn connect(&self) -> bool {
        WebSocketTransport::connect(self)
    }
}
