//! MIDI output port discovery and connection
//!
//! Uses midir for cross-platform MIDI I/O (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).
//! Port names double as port IDs: they are what the user sees and what gets
//! saved in the config.

use midir::{MidiOutput, MidiOutputConnection};

/// Client name registered with the MIDI system
pub const CLIENT_NAME: &str = "lyre";

/// Error type for MIDI connection operations
#[derive(Debug, thiserror::Error)]
pub enum MidiConnectionError {
    #[error("Failed to initialize MIDI output: {0}")]
    OutputInitError(String),

    #[error("No MIDI output port found matching: {0}")]
    PortNotFound(String),

    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),
}

/// List all available MIDI output ports
pub fn list_output_ports() -> Result<Vec<String>, MidiConnectionError> {
    let midi_out = MidiOutput::new(&format!("{}-list", CLIENT_NAME))
        .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

    let ports: Vec<String> = midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect();

    Ok(ports)
}

/// Connect to the output port named `port_id`
///
/// An exact name match wins; otherwise the first port whose name contains
/// `port_id` (case-insensitive) is used. Returns the connection and the full
/// port name.
pub fn connect_output(port_id: &str) -> Result<(MidiOutputConnection, String), MidiConnectionError> {
    let midi_out = MidiOutput::new(&format!("{}-out", CLIENT_NAME))
        .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

    let named: Vec<_> = midi_out
        .ports()
        .into_iter()
        .filter_map(|port| midi_out.port_name(&port).ok().map(|name| (port, name)))
        .collect();

    let pattern = port_id.to_lowercase();
    let (port, name) = named
        .iter()
        .find(|(_, name)| name == port_id)
        .or_else(|| named.iter().find(|(_, name)| name.to_lowercase().contains(&pattern)))
        .ok_or_else(|| MidiConnectionError::PortNotFound(port_id.to_string()))?;

    log::info!("MIDI: Found output port: {}", name);

    let connection = midi_out
        .connect(port, &format!("{}-output", CLIENT_NAME))
        .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

    Ok((connection, name.clone()))
}
