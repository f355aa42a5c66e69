//! MIDI Relay
//!
//! Pipeline from a local MIDI input to a remote server:
//! classify ([`midi`]) → remap ([`profile`]) → encode ([`encoder`]) →
//! send ([`transport`]). The [`forwarder`] drives one event at a time
//! through it, the [`supervisor`] keeps the WebSocket link up and the
//! [`session`] owns everything and tears it down.

pub mod cli;
pub mod config;
pub mod device;
pub mod encoder;
pub mod forwarder;
pub mod midi;
pub mod profile;
pub mod session;
pub mod supervisor;
pub mod transport;
