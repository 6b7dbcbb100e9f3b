//! External MIDI output for the lyre player
//!
//! This crate provides:
//! - MIDI output port discovery and connection via midir
//! - [`MidiSinkInstrument`], a player instrument forwarding item events to a port
//! - [`MidiSinkFactory`], which lists ports and hands out sinks
//!
//! # Architecture
//!
//! ```text
//! audio callback → rtrb ring → sender thread → midir → MIDI device
//! ```
//!
//! The audio callback only pushes into the ring; all driver calls happen on
//! the sender thread.

mod connection;
mod sink;

pub use connection::{connect_output, list_output_ports, MidiConnectionError, CLIENT_NAME};
pub use sink::{MidiSinkFactory, MidiSinkInstrument, PortClaims};
