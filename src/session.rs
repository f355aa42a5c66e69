//! Session lifecycle
//!
//! A session owns the opened input device, the single transport chosen at
//! startup and, for the WebSocket transport, the reconnection supervisor.
//! Teardown releases each of them in turn; a failure in one step never
//! prevents the next.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::device::{EventSink, InputDevice};
use crate::forwarder::Forwarder;
use crate::profile::DeviceProfile;
use crate::supervisor::{ReconnectSupervisor, SupervisorHandle};
use crate::transport::{
    ConnectionState, Transport, TransportKind, UdpTransport, WebSocketTransport,
};

/// Where events are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Result of one teardown step
#[derive(Debug)]
pub struct TeardownStep {
    pub resource: &'static str,
    pub error: Option<String>,
}

/// Every release attempted during shutdown, in order
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
}

impl TeardownReport {
    fn record(&mut self, resource: &'static str, result: Result<()>) {
        let error = match result {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to release {}: {:#}", resource, e);
                Some(format!("{:#}", e))
            }
        };
        self.steps.push(TeardownStep { resource, error });
    }

    pub fn attempted(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.resource).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|step| step.error.is_none())
    }
}

/// One relay session from startup to shutdown
pub struct Session {
    remote: RemoteEndpoint,
    kind: TransportKind,
    profile: DeviceProfile,
    device: Box<dyn InputDevice>,
    transport: Arc<dyn Transport>,
    supervisor: Option<SupervisorHandle>,
}

impl Session {
    /// Assemble a session from already-opened parts
    pub fn new(
        remote: RemoteEndpoint,
        profile: DeviceProfile,
        device: Box<dyn InputDevice>,
        transport: Arc<dyn Transport>,
        supervisor: Option<SupervisorHandle>,
    ) -> Self {
        Self {
            remote,
            kind: transport.kind(),
            profile,
            device,
            transport,
            supervisor,
        }
    }

    /// Open the device and the configured transport
    ///
    /// A device that cannot be opened is fatal. The WebSocket transport starts
    /// disconnected and is brought up by the supervisor spawned here.
    pub async fn establish(
        config: &AppConfig,
        port: u16,
        mut device: Box<dyn InputDevice>,
        device_index: usize,
        sink: EventSink,
    ) -> Result<Self> {
        let port_name = device
            .open(device_index, sink)
            .context("Failed to open MIDI input device")?;

        let profile = DeviceProfile::select(&port_name, &config.profiles);
        info!("Device '{}' uses profile '{}'", port_name, profile.name);

        let remote = RemoteEndpoint {
            host: config.remote.host.clone(),
            port,
        };

        let (transport, supervisor): (Arc<dyn Transport>, Option<SupervisorHandle>) =
            match config.transport {
                TransportKind::WebSocket => {
                    let ws = Arc::new(WebSocketTransport::new(
                        config.websocket_url(port),
                        config.connect_timeout(),
                    ));
                    let supervisor =
                        ReconnectSupervisor::new(ws.clone(), config.reconnect_policy()).spawn();
                    (ws as Arc<dyn Transport>, Some(supervisor))
                }
                TransportKind::Udp => {
                    let udp = match UdpTransport::open(&remote.host, port).await {
                        Ok(udp) => udp,
                        Err(e) => {
                            if let Err(close_err) = device.close() {
                                warn!("Failed to close MIDI input: {}", close_err);
                            }
                            return Err(e);
                        }
                    };
                    (Arc::new(udp) as Arc<dyn Transport>, None)
                }
            };

        info!("Forwarding to {} over {}", remote, config.transport);

        Ok(Self::new(remote, profile, device, transport, supervisor))
    }

    pub fn remote(&self) -> &RemoteEndpoint {
        &self.remote
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state()
    }

    /// Forwarding controller bound to this session's profile and transport
    pub fn forwarder(&self) -> Forwarder {
        Forwarder::new(self.profile.clone(), Arc::clone(&self.transport))
    }

    /// Release device, reconnect timer and transport, best effort
    pub async fn shutdown(mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        report.record(
            "midi input",
            self.device.close().map_err(anyhow::Error::from),
        );

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.cancel().await;
            report.record("reconnect timer", Ok(()));
        }

        report.record("transport", self.transport.shutdown().await);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::midi::RawEvent;
    use crate::transport::mock::MockTransport;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    /// Device with a fixed port list; records open/close calls
    #[derive(Clone, Default)]
    struct FakeDevice {
        ports: Vec<String>,
        fail_close: bool,
        log: Arc<Mutex<Vec<String>>>,
        sink: Arc<Mutex<Option<EventSink>>>,
    }

    impl FakeDevice {
        fn with_ports(ports: &[&str]) -> Self {
            Self {
                ports: ports.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl InputDevice for FakeDevice {
        fn enumerate(&self) -> Result<Vec<String>, DeviceError> {
            Ok(self.ports.clone())
        }

        fn open(&mut self, index: usize, sink: EventSink) -> Result<String, DeviceError> {
            let name = self.ports.get(index).cloned().ok_or(DeviceError::NoSuchPort {
                index,
                available: self.ports.len(),
            })?;
            self.log.lock().push(format!("open {}", index));
            *self.sink.lock() = Some(sink);
            Ok(name)
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.log.lock().push("close".to_string());
            self.sink.lock().take();
            if self.fail_close {
                return Err(DeviceError::Backend("port vanished".to_string()));
            }
            Ok(())
        }
    }

    fn remote() -> RemoteEndpoint {
        RemoteEndpoint {
            host: "127.0.0.1".to_string(),
            port: 3902,
        }
    }

    #[tokio::test]
    async fn test_shutdown_attempts_every_release() {
        let device = FakeDevice {
            fail_close: true,
            ..FakeDevice::with_ports(&["Keys"])
        };
        let log = device.log.clone();
        let transport = Arc::new(MockTransport::connected(TransportKind::Udp));

        let session = Session::new(
            remote(),
            DeviceProfile::passthrough(),
            Box::new(device),
            transport.clone(),
            None,
        );
        let report = session.shutdown().await;

        assert_eq!(*log.lock(), vec!["close".to_string()]);
        assert_eq!(transport.shutdown_calls(), 1, "transport released despite device failure");
        assert_eq!(report.attempted(), vec!["midi input", "transport"]);
        assert!(!report.is_clean());
        assert!(report.steps[0].error.is_some());
        assert!(report.steps[1].error.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_survives_transport_failure() {
        let transport = Arc::new(
            MockTransport::connected(TransportKind::WebSocket).failing_shutdown(),
        );
        let session = Session::new(
            remote(),
            DeviceProfile::passthrough(),
            Box::new(FakeDevice::with_ports(&["Keys"])),
            transport.clone(),
            None,
        );

        let report = session.shutdown().await;
        assert_eq!(transport.shutdown_calls(), 1);
        assert!(report.steps[1].error.is_some());
    }

    #[tokio::test]
    async fn test_establish_websocket_selects_profile_and_supervises() {
        let mut config = AppConfig::default();
        config.remote.host = "127.0.0.1".to_string();
        config.reconnect.connect_timeout_ms = Some(200);

        let device = FakeDevice::with_ports(&["Keys", "TriplePlay Guitar"]);
        let log = device.log.clone();
        let (tx, _rx) = mpsc::channel::<RawEvent>(8);

        // Port 9 (discard) is almost never served over WebSocket; the
        // supervisor keeps retrying in the background either way
        let session = Session::establish(&config, 9, Box::new(device), 1, tx)
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["open 1".to_string()]);
        assert!(session.profile().requires_offset);
        assert_eq!(session.transport_kind(), TransportKind::WebSocket);
        assert_ne!(session.connection_state(), ConnectionState::Connected);

        let report = session.shutdown().await;
        assert_eq!(
            report.attempted(),
            vec!["midi input", "reconnect timer", "transport"]
        );
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_establish_udp() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut config = AppConfig::default();
        config.remote.host = "127.0.0.1".to_string();
        config.transport = TransportKind::Udp;

        let (tx, _rx) = mpsc::channel::<RawEvent>(8);
        let session = Session::establish(
            &config,
            port,
            Box::new(FakeDevice::with_ports(&["Keys"])),
            0,
            tx,
        )
        .await
        .unwrap();

        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert!(!session.profile().requires_offset);
        assert_eq!(session.remote().port, port);

        let report = session.shutdown().await;
        assert_eq!(report.attempted(), vec!["midi input", "transport"]);
    }

    #[tokio::test]
    async fn test_establish_fails_without_device() {
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel::<RawEvent>(8);

        let result = Session::establish(
            &config,
            3902,
            Box::new(FakeDevice::with_ports(&["Keys"])),
            4,
            tx,
        )
        .await;

        assert!(result.is_err());
    }
}
