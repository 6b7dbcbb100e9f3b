//! Lyre Core - real-time playback engine for MIDI and audio players
//!
//! Controllers drive a [`engine::PlayerHandle`] with commands and poll
//! [`engine::PlayerState`] snapshots. The player runs inside the audio
//! callback of an [`audio::AudioDevice`] and routes item events to an
//! [`instrument::Instrument`].

pub mod audio;
pub mod config;
pub mod engine;
pub mod instrument;
pub mod types;

pub use types::*;
