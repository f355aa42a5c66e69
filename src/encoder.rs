//! Wire encoding for note events
//!
//! The WebSocket transport receives a compact text triple, the UDP transport
//! an OSC message. Control changes are never encoded.

pub mod osc;

use bytes::Bytes;

use crate::midi::SemanticEvent;
use crate::transport::TransportKind;
use osc::OscMessage;

/// OSC address for note-on messages
pub const NOTE_ON_ADDRESS: &str = "/note/on";
/// OSC address for note-off messages
pub const NOTE_OFF_ADDRESS: &str = "/note/off";

/// Encoded payload body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }
}

/// A message ready for a transport, consumed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub payload: Payload,
    /// OSC address, only set for the UDP transport
    pub address: Option<String>,
}

impl EncodedMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            address: None,
        }
    }

    pub fn osc(message: &OscMessage) -> Self {
        Self {
            payload: Payload::Binary(message.encode()),
            address: Some(message.address.clone()),
        }
    }
}

/// Text form used on the WebSocket: `[note,velocity,channel]`
pub fn note_text(note: u8, velocity: u8, channel: u8) -> String {
    format!("[{},{},{}]", note, velocity, channel)
}

/// Serialize an event for the given transport
///
/// Returns None for control changes and ignored events.
pub fn encode(event: &SemanticEvent, kind: TransportKind) -> Option<EncodedMessage> {
    let (note, velocity, channel) = event.note_triple()?;

    let message = match kind {
        TransportKind::WebSocket => EncodedMessage::text(note_text(note, velocity, channel)),
        TransportKind::Udp => {
            let address = match event {
                SemanticEvent::NoteOn { .. } => NOTE_ON_ADDRESS,
                _ => NOTE_OFF_ADDRESS,
            };
            EncodedMessage::osc(&OscMessage::new(
                address,
                vec![note as i32, velocity as i32, channel as i32],
            ))
        }
    };

    Some(message)
}
