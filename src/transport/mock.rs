//! In-memory transport for tests

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ConnectionState, SendError, Transport, TransportKind};
use crate::encoder::EncodedMessage;

/// Records every accepted message; `send` honours the configured state
pub struct MockTransport {
    kind: TransportKind,
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<EncodedMessage>>,
    send_attempts: AtomicUsize,
    shutdown_calls: AtomicUsize,
    io_failure: bool,
    fail_shutdown: bool,
}

impl MockTransport {
    pub fn new(kind: TransportKind, state: ConnectionState) -> Self {
        Self {
            kind,
            state: Mutex::new(state),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            io_failure: false,
            fail_shutdown: false,
        }
    }

    pub fn connected(kind: TransportKind) -> Self {
        Self::new(kind, ConnectionState::Connected)
    }

    /// Every send fails like a broken datagram socket
    pub fn failing_io(mut self) -> Self {
        self.io_failure = true;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn sent(&self) -> Vec<EncodedMessage> {
        self.sent.lock().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&self, message: EncodedMessage) -> Result<(), SendError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.io_failure {
            return Err(SendError::TransportFailure(io::Error::new(
                io::ErrorKind::Other,
                "network unreachable",
            )));
        }
        if *self.state.lock() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Disconnected;
        if self.fail_shutdown {
            anyhow::bail!("socket already gone");
        }
        Ok(())
    }
}
