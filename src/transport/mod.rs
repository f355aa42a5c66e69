//! Network transports
//!
//! Two interchangeable ways to reach the remote endpoint:
//! - [`WebSocketTransport`]: persistent connection, reconnected by the
//!   [`crate::supervisor::ReconnectSupervisor`]
//! - [`UdpTransport`]: connectionless OSC datagrams
//!
//! Sends are fire-and-forget. A failed send is reported to the caller, who
//! logs it; nothing is queued or retried.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::encoder::EncodedMessage;

pub mod udp;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use udp::UdpTransport;
pub use websocket::WebSocketTransport;

/// Which transport the session uses, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    #[serde(alias = "ws")]
    WebSocket,
    #[serde(alias = "osc")]
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "udp" | "osc" => Ok(TransportKind::Udp),
            other => Err(format!(
                "unknown transport '{}' (expected 'websocket' or 'udp')",
                other
            )),
        }
    }
}

/// Lifecycle of a connection-oriented transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Recoverable per-message send failure
#[derive(Debug, Error)]
pub enum SendError {
    /// Persistent connection is not up; the message is dropped
    #[error("not connected to remote server")]
    NotConnected,

    /// Persistent connection is up but its outgoing queue is full
    #[error("outgoing queue full, message dropped")]
    QueueFull,

    /// Datagram could not be handed to the network stack
    #[error("transport failure: {0}")]
    TransportFailure(#[from] std::io::Error),
}

/// Handshake failure of the persistent connection
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("couldn't connect to {url}: {source}")]
    Handshake {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("connection to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}

/// Uniform interface over both transports
///
/// `send` must return without waiting on the network so that event capture
/// is never stalled.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Hand a message to the network, best effort
    fn send(&self, message: EncodedMessage) -> Result<(), SendError>;

    fn connection_state(&self) -> ConnectionState;

    /// Release the network resource regardless of state
    async fn shutdown(&self) -> Result<()>;
}
