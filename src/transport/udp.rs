//! Connectionless UDP transport
//!
//! Each event is an independent OSC datagram. The socket is bound once at
//! startup and stays bound until shutdown; there is no connection state and
//! no retry.
//!
//! `send` writes straight to a non-blocking std socket; it never consults
//! reactor readiness, so a datagram sent right after bind is transmitted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use tracing::{debug, info};

use super::{ConnectionState, SendError, Transport, TransportKind};
use crate::encoder::EncodedMessage;

/// UDP datagram transport
pub struct UdpTransport {
    target: SocketAddr,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpTransport {
    /// Bind an ephemeral local socket for sending to `target`
    pub fn bind(target: SocketAddr) -> io::Result<Self> {
        let local = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;

        info!(
            "UDP client initialized on {}. Will send to {}",
            socket.local_addr()?,
            target
        );

        Ok(Self {
            target,
            socket: Mutex::new(Some(Arc::new(socket))),
        })
    }

    /// Resolve `host:port` and bind
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        let target = tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("Failed to resolve {}:{}", host, port))?
            .next()
            .with_context(|| format!("No address found for {}:{}", host, port))?;

        Self::bind(target).context("Failed to bind UDP socket")
    }

    pub fn is_bound(&self) -> bool {
        self.socket.lock().is_some()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn send(&self, message: EncodedMessage) -> Result<(), SendError> {
        let socket = self.socket.lock().clone().ok_or_else(|| {
            SendError::TransportFailure(io::Error::new(
                io::ErrorKind::NotConnected,
                "UDP socket already released",
            ))
        })?;

        let bytes = message.payload.as_bytes();
        let sent = socket.send_to(bytes, self.target)?;
        if sent != bytes.len() {
            return Err(SendError::TransportFailure(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram: {} of {} bytes", sent, bytes.len()),
            )));
        }

        debug!(
            "UDP -> {} {} ({} bytes)",
            self.target,
            message.address.as_deref().unwrap_or("-"),
            sent
        );
        Ok(())
    }

    /// Connected for as long as the socket is bound
    fn connection_state(&self) -> ConnectionState {
        if self.is_bound() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if self.socket.lock().take().is_some() {
            info!("UDP socket released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::osc::OscMessage;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::bind(receiver.local_addr().unwrap()).unwrap();
        assert_eq!(transport.connection_state(), ConnectionState::Connected);

        let message = OscMessage::new("/note/on", vec![60, 100, 0]);
        transport.send(EncodedMessage::osc(&message)).unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(OscMessage::decode(&buf[..len]).unwrap(), message);
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let transport = UdpTransport::bind("127.0.0.1:9".parse().unwrap()).unwrap();
        transport.shutdown().await.unwrap();

        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
        let result = transport.send(EncodedMessage::text("[1,2,3]"));
        assert!(matches!(result, Err(SendError::TransportFailure(_))));

        // Releasing twice is harmless
        assert!(transport.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_burst_right_after_bind_is_delivered() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::bind(receiver.local_addr().unwrap()).unwrap();

        // No await between bind and the sends
        for note in 60..65 {
            let message = OscMessage::new("/note/on", vec![note, 100, 0]);
            transport.send(EncodedMessage::osc(&message)).unwrap();
        }

        let mut buf = [0u8; 256];
        for note in 60..65 {
            let (len, _) =
                tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                    .await
                    .unwrap()
                    .unwrap();
            assert_eq!(OscMessage::decode(&buf[..len]).unwrap().args, vec![note, 100, 0]);
        }
    }
}
