//! Reconnection supervisor for the persistent transport
//!
//! Runs on its own timer, independent of event arrival. Every tick it looks
//! at the connection state and starts a new attempt only when the transport
//! is fully disconnected, so attempts never overlap.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::transport::ConnectionState;

/// Something the supervisor can observe and reconnect
pub trait Reconnect: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    /// Start a connection attempt; returns false if one was not started
    fn connect(&self) -> bool;
}

/// Delay between supervisor ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same interval forever
    Fixed(Duration),
    /// Interval grows by `base` per consecutive attempt, capped at `max`
    Backoff { base: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// Delay before the next tick after `attempts` attempts without a connection
    pub fn delay(&self, attempts: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(interval) => interval,
            ReconnectPolicy::Backoff { base, max } => {
                std::cmp::min(max, base.saturating_mul(attempts.max(1)))
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(1))
    }
}

/// Outcome of a single supervisor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Transport was disconnected and a connect was started
    Attempted,
    /// Nothing started: connecting, connected, or the target refused
    Idle,
}

/// Drives reconnection of a [`Reconnect`] target
pub struct ReconnectSupervisor {
    target: Arc<dyn Reconnect>,
    policy: ReconnectPolicy,
    /// Attempts since the target was last seen connected
    attempts: u32,
}

impl ReconnectSupervisor {
    pub fn new(target: Arc<dyn Reconnect>, policy: ReconnectPolicy) -> Self {
        Self {
            target,
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Check the target once and reconnect it if needed
    pub fn tick(&mut self) -> Tick {
        match self.target.connection_state() {
            ConnectionState::Disconnected => {
                info!("------------------------------------------------------------");
                info!("Not connected. Trying to connect to server...");
                if !self.target.connect() {
                    debug!("Connection attempt not started");
                    return Tick::Idle;
                }
                self.attempts = self.attempts.saturating_add(1);
                Tick::Attempted
            }
            ConnectionState::Connected => {
                self.attempts = 0;
                Tick::Idle
            }
            ConnectionState::Connecting => Tick::Idle,
        }
    }

    /// Delay until the next tick
    pub fn next_delay(&self) -> Duration {
        self.policy.delay(self.attempts)
    }

    /// Run forever on the runtime until the returned handle is cancelled
    ///
    /// The first check happens immediately.
    pub fn spawn(mut self) -> SupervisorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                self.tick();
                let delay = self.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Reconnection supervisor stopped");
        });

        SupervisorHandle { stop_tx, task }
    }
}

/// Handle to a running supervisor task
pub struct SupervisorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Stop the timer and wait for the task to exit
    pub async fn cancel(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            debug!("Supervisor task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
