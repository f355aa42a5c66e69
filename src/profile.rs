//! Device profiles and channel remapping
//!
//! Some controllers reserve their low channels for non-performance data and
//! spread strings/pads over a higher channel block. A [`DeviceProfile`]
//! filters those reserved channels and shifts the rest down to a zero-based
//! range. The profile is chosen once from the port name and never changes.

use tracing::debug;

use crate::config::ProfileRule;
use crate::midi::SemanticEvent;

/// Per-device channel policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    pub channel_offset: u8,
    pub channel_filter_min: u8,
    pub requires_offset: bool,
}

impl DeviceProfile {
    /// Profile that forwards every channel untouched
    pub fn passthrough() -> Self {
        Self {
            name: "passthrough".to_string(),
            channel_offset: 0,
            channel_filter_min: 0,
            requires_offset: false,
        }
    }

    /// Profile that drops channels `<= filter_min` and subtracts `offset`
    pub fn offset(name: impl Into<String>, offset: u8, filter_min: u8) -> Self {
        Self {
            name: name.into(),
            channel_offset: offset,
            channel_filter_min: filter_min,
            requires_offset: true,
        }
    }

    /// Pick the profile for a device from its advertised port name
    ///
    /// The first rule whose `match` string appears in the port name wins.
    /// Without a match the passthrough profile is used.
    pub fn select(port_name: &str, rules: &[ProfileRule]) -> Self {
        match rules.iter().find(|rule| port_name.contains(&rule.matches)) {
            Some(rule) => {
                debug!(
                    "Port '{}' matches profile '{}' (offset {}, filter <= {})",
                    port_name, rule.matches, rule.channel_offset, rule.channel_filter_min
                );
                Self::offset(rule.matches.clone(), rule.channel_offset, rule.channel_filter_min)
            }
            None => Self::passthrough(),
        }
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::passthrough()
    }
}

/// Apply the profile's channel policy to an event
///
/// Returns None when the event falls on a reserved channel or would land
/// below channel 0 after the offset.
pub fn remap(event: SemanticEvent, profile: &DeviceProfile) -> Option<SemanticEvent> {
    if !profile.requires_offset {
        return Some(event);
    }

    let Some(channel) = event.channel() else {
        return Some(event);
    };

    if channel <= profile.channel_filter_min {
        return None;
    }

    channel
        .checked_sub(profile.channel_offset)
        .map(|remapped| event.with_channel(remapped))
}
