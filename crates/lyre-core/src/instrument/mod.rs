//! Instrument output - the sink for timestamped MIDI events
//!
//! This module provides a unified interface for every place item events can
//! go:
//! - In-process synthesizer ([`SynthInstrument`]), which renders audio
//! - External MIDI ports (the `lyre-midi` crate), which render nothing
//!
//! The player owns at most one open instrument at a time and swaps it only
//! between audio cycles.

mod channels;
mod synth;

pub use channels::{ChannelFilter, ChannelMask, ChannelMeters, EventSink};
pub use synth::{SynthFactory, SynthInstrument, SynthPreset};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{StereoSample, MIDI_CHANNELS};

/// Which variant of output an instrument is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// In-process synthesizer rendering into the audio buffer
    Synth,
    /// External MIDI output port
    MidiSink,
}

/// Flags attached to a single event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFlags(u8);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    /// Part of a note-cleanup burst; deliver even while muted
    pub const PANIC: EventFlags = EventFlags(1);

    #[inline]
    pub fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EventFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        EventFlags(self.0 | rhs.0)
    }
}

/// Errors from opening or driving an instrument
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    /// The target does not exist or is already claimed
    #[error("Output unavailable: {0}")]
    OutputUnavailable(String),

    /// The underlying MIDI/synth backend failed
    #[error("Instrument backend error: {0}")]
    Backend(String),
}

/// Result type for instrument operations
pub type InstrumentResult<T> = Result<T, InstrumentError>;

/// One selectable output target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputInfo {
    /// Stable identifier passed to [`Instrument::open`]
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl OutputInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A destination for MIDI events
///
/// Every method is called from the audio context, so implementations must
/// not block on I/O for longer than a cycle.
pub trait Instrument: Send {
    /// Variant of this instrument
    fn kind(&self) -> InstrumentKind;

    /// Bind to the target with the given ID
    ///
    /// Fails with [`InstrumentError::OutputUnavailable`] if the ID is unknown
    /// or the target is already claimed.
    fn open(&mut self, target_id: &str) -> InstrumentResult<()>;

    /// Release the target. Safe to call when already closed.
    fn close(&mut self);

    /// Whether a target is bound
    fn is_open(&self) -> bool;

    /// ID of the bound target
    fn target_id(&self) -> Option<&str>;

    /// Inform the instrument of the negotiated sample rate
    fn prepare(&mut self, _sample_rate: u32) {}

    /// Forward one message
    ///
    /// `timestamp` is in seconds from the start of the current audio cycle.
    fn send_event(&mut self, data: &[u8], timestamp: f64, flags: EventFlags);

    /// Force delivery of anything buffered
    fn flush_events(&mut self) {}

    /// Mix in-process audio into `out` (no-op for external sinks)
    fn render(&mut self, _out: &mut [StereoSample]) {}
}

/// Enumerates the targets of one instrument variant and creates instruments
pub trait InstrumentFactory: Send + Sync {
    /// Variant produced by this factory
    fn kind(&self) -> InstrumentKind;

    /// Currently available targets
    fn list_targets(&self) -> Vec<OutputInfo>;

    /// Create an unopened instrument
    fn create(&self) -> Box<dyn Instrument>;
}

/// Output to open when the player starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSelection {
    /// Synth preset ID
    Synth(String),
    /// MIDI port ID
    Midi(String),
}

impl OutputSelection {
    pub fn kind(&self) -> InstrumentKind {
        match self {
            OutputSelection::Synth(_) => InstrumentKind::Synth,
            OutputSelection::Midi(_) => InstrumentKind::MidiSink,
        }
    }

    /// Target ID within the variant
    pub fn id(&self) -> &str {
        match self {
            OutputSelection::Synth(id) | OutputSelection::Midi(id) => id,
        }
    }
}

/// The instrument factories available to the player
#[derive(Default)]
pub struct Instruments {
    /// In-process synth variant
    pub synth: Option<Box<dyn InstrumentFactory>>,
    /// External MIDI variant
    pub midi: Option<Box<dyn InstrumentFactory>>,
    /// Opened at startup, if any
    pub initial: Option<OutputSelection>,
}

impl Instruments {
    /// Only the built-in synth, opened with its default preset
    pub fn synth_only() -> Self {
        Self {
            synth: Some(Box::new(SynthFactory)),
            midi: None,
            initial: Some(OutputSelection::Synth(SynthPreset::default().id().to_string())),
        }
    }

    /// Add a MIDI factory
    pub fn with_midi(mut self, factory: Box<dyn InstrumentFactory>) -> Self {
        self.midi = Some(factory);
        self
    }

    /// Set the output opened at startup
    pub fn with_initial(mut self, selection: OutputSelection) -> Self {
        self.initial = Some(selection);
        self
    }

    /// Factory for the given selection's variant
    pub fn factory_for(&self, selection: &OutputSelection) -> Option<&dyn InstrumentFactory> {
        match selection {
            OutputSelection::Synth(_) => self.synth.as_deref(),
            OutputSelection::Midi(_) => self.midi.as_deref(),
        }
    }
}

const CC_ALL_SOUND_OFF: u8 = 120;
const CC_ALL_NOTES_OFF: u8 = 123;

/// Silence one channel: all-notes-off followed by all-sound-off
pub fn channel_notes_off(sink: &mut dyn Instrument, channel: u8) {
    let status = 0xB0 | (channel & 0x0F);
    sink.send_event(&[status, CC_ALL_NOTES_OFF, 0], 0.0, EventFlags::PANIC);
    sink.send_event(&[status, CC_ALL_SOUND_OFF, 0], 0.0, EventFlags::PANIC);
}

/// Silence every channel and flush
pub fn all_notes_off(sink: &mut dyn Instrument) {
    for channel in 0..MIDI_CHANNELS as u8 {
        channel_notes_off(sink, channel);
    }
    sink.flush_events();
}
