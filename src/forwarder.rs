//! Forwarding controller
//!
//! Wires classifier → remapper → encoder → transport for every device event.
//! Handling is synchronous and returns as soon as the transport has accepted
//! (or refused) the message; it never waits on the network.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::encoder::{encode, note_text};
use crate::midi::{classify, format_hex, RawEvent, SemanticEvent};
use crate::profile::{remap, DeviceProfile};
use crate::transport::{SendError, Transport};

/// What happened to one device event
#[derive(Debug)]
pub enum Dispatch {
    /// Not a note or control change
    Ignored,
    /// Dropped by the device profile
    Filtered,
    /// Control change, logged only
    Observed,
    /// Handed to the transport
    Sent,
    /// Transport refused the message
    SendFailed(SendError),
}

impl Dispatch {
    pub fn is_sent(&self) -> bool {
        matches!(self, Dispatch::Sent)
    }
}

/// Running counters for the shutdown summary
#[derive(Debug, Default)]
pub struct ForwardStats {
    received: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ForwardStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl ForwardStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received, {} sent, {} dropped, {} failed",
            self.received, self.sent, self.dropped, self.failed
        )
    }
}

/// Pushes device events through the pipeline to the transport
pub struct Forwarder {
    profile: DeviceProfile,
    transport: Arc<dyn Transport>,
    stats: ForwardStats,
}

impl Forwarder {
    pub fn new(profile: DeviceProfile, transport: Arc<dyn Transport>) -> Self {
        Self {
            profile,
            transport,
            stats: ForwardStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one device event
    pub fn handle(&self, raw: &RawEvent) -> Dispatch {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let event = classify(raw);
        if event == SemanticEvent::Ignored {
            trace!("Ignoring MIDI {}", format_hex(&[raw.status, raw.data1, raw.data2]));
            return Dispatch::Ignored;
        }

        let Some(event) = remap(event, &self.profile) else {
            debug!("Filtered by profile '{}': {}", self.profile.name, event);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Dispatch::Filtered;
        };

        self.log_event(&event);

        let Some(message) = encode(&event, self.transport.kind()) else {
            return Dispatch::Observed;
        };

        match self.transport.send(message) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Dispatch::Sent
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                match &e {
                    SendError::NotConnected => {
                        debug!("can't send note right now: {}", e);
                    }
                    SendError::QueueFull => {
                        warn!("Server not keeping up: {}", e);
                    }
                    SendError::TransportFailure(_) => {
                        warn!("UDP send error: {}", e);
                    }
                }
                Dispatch::SendFailed(e)
            }
        }
    }

    /// Console line for an event that passed the profile
    ///
    /// Offset profiles show the channel, others only note and velocity.
    fn log_event(&self, event: &SemanticEvent) {
        match *event {
            SemanticEvent::NoteOn { .. } | SemanticEvent::NoteOff { .. } => {
                let Some((note, velocity, channel)) = event.note_triple() else {
                    return;
                };
                let label = if self.profile.requires_offset {
                    note_text(note, velocity, channel)
                } else {
                    format!("[{},{}]", note, velocity)
                };
                let kind = if matches!(event, SemanticEvent::NoteOn { .. }) {
                    "NoteOn"
                } else {
                    "NoteOff"
                };
                info!("{}: {}", kind, label);
            }
            SemanticEvent::ControlChange {
                controller,
                value,
                channel,
            } => {
                info!("CC: ch:{} cc:{} v:{}", channel, controller, value);
            }
            SemanticEvent::Ignored => {}
        }
    }
}

/// Drain device events until `shutdown` resolves or the device side hangs up
pub async fn run(
    forwarder: &Forwarder,
    mut events: mpsc::Receiver<RawEvent>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            maybe_event = events.recv() => match maybe_event {
                Some(raw) => {
                    forwarder.handle(&raw);
                }
                None => {
                    info!("Event source closed, stopping forwarding loop");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }
}
