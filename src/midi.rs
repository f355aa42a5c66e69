//! MIDI event types and classification
//!
//! Turns the raw status/data bytes delivered by the input device into typed
//! performance events. Classification is permissive: anything that is not a
//! note or a control change resolves to [`SemanticEvent::Ignored`].

use std::fmt;

/// Status nibble for Note Off
pub const NOTE_OFF: u8 = 0x80;
/// Status nibble for Note On
pub const NOTE_ON: u8 = 0x90;
/// Status nibble for Control Change
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Unprocessed message from the input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    /// Backend timestamp in microseconds
    pub timestamp_us: u64,
}

impl RawEvent {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
            timestamp_us: 0,
        }
    }

    /// Build an event from raw device bytes
    ///
    /// Missing data bytes read as zero. Returns None for an empty message.
    pub fn from_bytes(timestamp_us: u64, data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        Some(Self {
            status,
            data1: rest.first().copied().unwrap_or(0),
            data2: rest.get(1).copied().unwrap_or(0),
            timestamp_us,
        })
    }

    /// Low nibble of the status byte (0-15)
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    /// High nibble of the status byte
    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }
}

/// Classified performance event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticEvent {
    NoteOn { note: u8, velocity: u8, channel: u8 },
    /// Release velocity is dropped; it is sent as 0
    NoteOff { note: u8, channel: u8 },
    /// Observed locally, never transmitted
    ControlChange { controller: u8, value: u8, channel: u8 },
    Ignored,
}

impl SemanticEvent {
    /// Channel of the event, None for [`SemanticEvent::Ignored`]
    pub fn channel(&self) -> Option<u8> {
        match *self {
            SemanticEvent::NoteOn { channel, .. }
            | SemanticEvent::NoteOff { channel, .. }
            | SemanticEvent::ControlChange { channel, .. } => Some(channel),
            SemanticEvent::Ignored => None,
        }
    }

    /// Copy of the event moved to another channel
    pub fn with_channel(self, channel: u8) -> Self {
        match self {
            SemanticEvent::NoteOn { note, velocity, .. } => SemanticEvent::NoteOn {
                note,
                velocity,
                channel,
            },
            SemanticEvent::NoteOff { note, .. } => SemanticEvent::NoteOff { note, channel },
            SemanticEvent::ControlChange {
                controller, value, ..
            } => SemanticEvent::ControlChange {
                controller,
                value,
                channel,
            },
            SemanticEvent::Ignored => SemanticEvent::Ignored,
        }
    }

    /// Note/velocity/channel triple for note events
    ///
    /// Note Off always reports velocity 0.
    pub fn note_triple(&self) -> Option<(u8, u8, u8)> {
        match *self {
            SemanticEvent::NoteOn {
                note,
                velocity,
                channel,
            } => Some((note, velocity, channel)),
            SemanticEvent::NoteOff { note, channel } => Some((note, 0, channel)),
            _ => None,
        }
    }
}

impl fmt::Display for SemanticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SemanticEvent::NoteOn {
                note,
                velocity,
                channel,
            } => write!(f, "NoteOn ch:{} n:{} v:{}", channel, note, velocity),
            SemanticEvent::NoteOff { note, channel } => {
                write!(f, "NoteOff ch:{} n:{}", channel, note)
            }
            SemanticEvent::ControlChange {
                controller,
                value,
                channel,
            } => write!(f, "CC ch:{} cc:{} v:{}", channel, controller, value),
            SemanticEvent::Ignored => write!(f, "Ignored"),
        }
    }
}

/// Interpret a raw device message
pub fn classify(raw: &RawEvent) -> SemanticEvent {
    let channel = raw.channel();
    match raw.kind() {
        NOTE_ON => SemanticEvent::NoteOn {
            note: raw.data1,
            velocity: raw.data2,
            channel,
        },
        NOTE_OFF => SemanticEvent::NoteOff {
            note: raw.data1,
            channel,
        },
        CONTROL_CHANGE => SemanticEvent::ControlChange {
            controller: raw.data1,
            value: raw.data2,
            channel,
        },
        _ => SemanticEvent::Ignored,
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_note_on_classification() {
        let raw = RawEvent::new(0x90, 60, 100);
        assert_eq!(
            classify(&raw),
            SemanticEvent::NoteOn {
                note: 60,
                velocity: 100,
                channel: 0,
            }
        );
    }

    #[test]
    fn test_note_on_velocity_zero_stays_note_on() {
        let raw = RawEvent::new(0x93, 60, 0);
        assert_eq!(
            classify(&raw),
            SemanticEvent::NoteOn {
                note: 60,
                velocity: 0,
                channel: 3,
            }
        );
    }

    #[test]
    fn test_note_off_drops_velocity() {
        let raw = RawEvent::new(0x82, 60, 64);
        let event = classify(&raw);
        assert_eq!(event, SemanticEvent::NoteOff { note: 60, channel: 2 });
        assert_eq!(event.note_triple(), Some((60, 0, 2)));
    }

    #[test]
    fn test_control_change() {
        let raw = RawEvent::new(0xB0, 7, 127);
        assert_eq!(
            classify(&raw),
            SemanticEvent::ControlChange {
                controller: 7,
                value: 127,
                channel: 0,
            }
        );
    }

    #[test]
    fn test_other_status_is_ignored() {
        for status in [0xA0, 0xC5, 0xD0, 0xE1, 0xF0, 0xF8, 0xFE, 0x00, 0x7F] {
            assert_eq!(classify(&RawEvent::new(status, 1, 2)), SemanticEvent::Ignored);
        }
    }

    #[test]
    fn test_from_bytes_pads_short_messages() {
        let raw = RawEvent::from_bytes(42, &[0xC0, 5]).unwrap();
        assert_eq!(raw.data1, 5);
        assert_eq!(raw.data2, 0);
        assert_eq!(raw.timestamp_us, 42);
        assert!(RawEvent::from_bytes(0, &[]).is_none());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x90, 0x3C, 0x64]), "90 3C 64");
    }

    proptest! {
        #[test]
        fn note_on_fields_map_directly(channel in 0u8..16, data1 in any::<u8>(), data2 in any::<u8>()) {
            let raw = RawEvent::new(0x90 | channel, data1, data2);
            prop_assert_eq!(
                classify(&raw),
                SemanticEvent::NoteOn { note: data1, velocity: data2, channel }
            );
        }

        #[test]
        fn note_off_always_has_zero_velocity(channel in 0u8..16, data1 in any::<u8>(), data2 in any::<u8>()) {
            let raw = RawEvent::new(0x80 | channel, data1, data2);
            prop_assert_eq!(classify(&raw).note_triple(), Some((data1, 0, channel)));
        }

        #[test]
        fn classified_channel_is_in_range(status in any::<u8>(), data1 in any::<u8>(), data2 in any::<u8>()) {
            let event = classify(&RawEvent::new(status, data1, data2));
            if let Some(channel) = event.channel() {
                prop_assert!(channel <= 15);
            }
        }
    }
}
