//! MIDI input device access
//!
//! The relay only needs to list input ports, open one, receive its events
//! and close it again. [`InputDevice`] captures that surface so the session
//! can be driven by a fake device in tests.

use midir::{Ignore, MidiInput, MidiInputConnection};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::midi::{format_hex, RawEvent};

/// Capacity of the device → forwarder event queue
pub const EVENT_QUEUE_CAPACITY: usize = 1000;

/// Channel end the device pushes events into
pub type EventSink = mpsc::Sender<RawEvent>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("MIDI backend error: {0}")]
    Backend(String),

    #[error("no MIDI input port at index {index} ({available} available)")]
    NoSuchPort { index: usize, available: usize },

    #[error("no MIDI input port matching '{0}'")]
    NoMatchingPort(String),

    #[error("failed to open MIDI input '{port}': {reason}")]
    Connect { port: String, reason: String },

    #[error("MIDI input is not open")]
    NotOpen,
}

/// Local source of MIDI events
pub trait InputDevice {
    /// Names of the available input ports, in index order
    fn enumerate(&self) -> Result<Vec<String>, DeviceError>;

    /// Open the port at `index` and start pushing events into `sink`
    ///
    /// Returns the port name. Delivery must never block the device thread.
    fn open(&mut self, index: usize, sink: EventSink) -> Result<String, DeviceError>;

    /// Stop delivery and release the port
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Input port description
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
    pub is_virtual: bool,
}

impl PortInfo {
    pub fn new(index: usize, name: String) -> Self {
        let is_virtual =
            name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC");
        Self {
            index,
            name,
            is_virtual,
        }
    }
}

/// Describe every port from an enumeration
pub fn describe_ports(names: Vec<String>) -> Vec<PortInfo> {
    names
        .into_iter()
        .enumerate()
        .map(|(index, name)| PortInfo::new(index, name))
        .collect()
}

/// Find a port by case-insensitive substring match
pub fn find_port_index(names: &[String], pattern: &str) -> Option<usize> {
    let pattern = pattern.to_lowercase();
    names
        .iter()
        .position(|name| name.to_lowercase().contains(&pattern))
}

/// Push an event without blocking; a full queue drops it
fn deliver(sink: &EventSink, raw: RawEvent, data: &[u8]) {
    match sink.try_send(raw) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!("Event queue full, dropping MIDI {}", format_hex(data));
        }
        Err(TrySendError::Closed(_)) => {
            trace!("Event queue closed, dropping MIDI {}", format_hex(data));
        }
    }
}

/// Input device backed by midir
pub struct MidirDevice {
    client_name: String,
    connection: Option<MidiInputConnection<()>>,
    port_name: Option<String>,
}

impl MidirDevice {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            connection: None,
            port_name: None,
        }
    }

    fn backend(&self) -> Result<MidiInput, DeviceError> {
        MidiInput::new(&self.client_name).map_err(|e| DeviceError::Backend(e.to_string()))
    }
}

impl InputDevice for MidirDevice {
    fn enumerate(&self) -> Result<Vec<String>, DeviceError> {
        let midi_in = self.backend()?;
        let names = midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect();
        Ok(names)
    }

    fn open(&mut self, index: usize, sink: EventSink) -> Result<String, DeviceError> {
        if self.connection.is_some() {
            self.close()?;
        }

        let mut midi_in = self.backend()?;
        // SysEx, timing clock and active sensing carry no notes
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let port = ports.get(index).ok_or(DeviceError::NoSuchPort {
            index,
            available: ports.len(),
        })?;
        let port_name = midi_in
            .port_name(port)
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        debug!("Opening MIDI input [{}] {}", index, port_name);

        let connection = midi_in
            .connect(
                port,
                &format!("{}-in", self.client_name),
                move |timestamp_us, data, _| {
                    if let Some(raw) = RawEvent::from_bytes(timestamp_us, data) {
                        deliver(&sink, raw, data);
                    }
                },
                (),
            )
            .map_err(|e| DeviceError::Connect {
                port: port_name.clone(),
                reason: e.to_string(),
            })?;

        info!("MIDI input opened: {}", port_name);
        self.connection = Some(connection);
        self.port_name = Some(port_name.clone());
        Ok(port_name)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let connection = self.connection.take().ok_or(DeviceError::NotOpen)?;
        connection.close();
        if let Some(name) = self.port_name.take() {
            info!("MIDI input closed: {}", name);
        }
        Ok(())
    }
}
