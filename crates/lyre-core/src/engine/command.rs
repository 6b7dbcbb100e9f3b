//! Commands sent from controller threads to the player
//!
//! This module implements the **Command Pattern** for the playback engine:
//! controllers push commands into the [`CommandQueue`](super::CommandQueue),
//! and the player applies them at the start of the next audio cycle, so
//! transport state never changes in the middle of a cycle.
//!
//! # Blocking commands
//!
//! `GetMidiOutputs` and `Shutdown` carry a oneshot reply. The player sends on
//! it after the effect is fully applied; the submitter waits with
//! `blocking_recv()`. If the player drops the command without applying it,
//! the submitter wakes with an error instead of hanging.
//!
//! ```ignore
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! queue.push(PlayerCommand::GetMidiOutputs { reply: tx })?;
//! let outputs = rx.blocking_recv()?;
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::item::ItemDescriptor;
use crate::instrument::OutputInfo;

/// How a pause request is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseMode {
    /// Flip between Playing and Paused
    Toggle,
    /// Enter Paused (no-op if already paused)
    Pause,
    /// Leave Paused (no-op if already playing)
    Resume,
}

/// Advancement policy when an item completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop after the last item
    #[default]
    Off,
    /// Replay the current item
    One,
    /// Wrap around to the first item
    All,
}

impl RepeatMode {
    /// Cycle order: Off → One → All → Off
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::Off,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }
}

/// Commands sent from controllers to the player
///
/// Each variant is one atomic operation on the transport. Commands are
/// applied in submission order, exactly once.
#[derive(Debug)]
pub enum PlayerCommand {
    // ─────────────────────────────────────────────────────────────
    // Playlist
    // ─────────────────────────────────────────────────────────────
    /// Replace the playlist and start playing the item at `index`
    ///
    /// Out-of-range indices are clamped; an empty playlist stops.
    Play {
        playlist: Vec<ItemDescriptor>,
        index: usize,
    },
    /// Move the cursor by `offset` items
    Next { offset: i32 },

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    /// Close the item and silence the instrument; the playlist is kept
    Stop,
    /// Pause, resume or toggle
    Pause { mode: PauseMode },
    /// Seek to the start of the current item
    Rewind,
    /// Seek relative to the current position (seconds)
    SeekCur { offset: f64 },
    /// Seek to an absolute position (seconds)
    SeekSet { time: f64 },
    /// Seek to the end of the current item
    SeekEnd,
    /// Set the speed multiplier, or adjust it when `relative`
    Speed { value: f64, relative: bool },
    /// Set the linear output gain
    Volume { value: f32 },
    /// Set the repeat mode
    SetRepeatMode { mode: RepeatMode },
    /// Cycle to the next repeat mode
    NextRepeatMode,

    // ─────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────
    /// Enable or mute a MIDI channel (0-15)
    ChannelEnable { channel: usize, enable: bool },
    /// Flip a MIDI channel's enable state
    ChannelToggle { channel: usize },

    // ─────────────────────────────────────────────────────────────
    // Outputs
    // ─────────────────────────────────────────────────────────────
    /// Enumerate MIDI output ports (blocking)
    GetMidiOutputs {
        reply: oneshot::Sender<Vec<OutputInfo>>,
    },
    /// Route events to the MIDI port with this ID
    SetMidiOutput { id: String },
    /// Route events to the built-in synth with this preset ID
    SetSynth { id: String },
    /// Set an FX stage parameter
    SetFxParameter { index: usize, value: i32 },

    // ─────────────────────────────────────────────────────────────
    // Engine
    // ─────────────────────────────────────────────────────────────
    /// Publish the state snapshot immediately
    RequestState,
    /// Silence, release everything and stop accepting commands (blocking)
    Shutdown { reply: oneshot::Sender<()> },
}

impl PlayerCommand {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PlayerCommand::Play { .. } => "Play",
            PlayerCommand::Next { .. } => "Next",
            PlayerCommand::Stop => "Stop",
            PlayerCommand::Pause { .. } => "Pause",
            PlayerCommand::Rewind => "Rewind",
            PlayerCommand::SeekCur { .. } => "SeekCur",
            PlayerCommand::SeekSet { .. } => "SeekSet",
            PlayerCommand::SeekEnd => "SeekEnd",
            PlayerCommand::Speed { .. } => "Speed",
            PlayerCommand::Volume { .. } => "Volume",
            PlayerCommand::SetRepeatMode { .. } => "SetRepeatMode",
            PlayerCommand::NextRepeatMode => "NextRepeatMode",
            PlayerCommand::ChannelEnable { .. } => "ChannelEnable",
            PlayerCommand::ChannelToggle { .. } => "ChannelToggle",
            PlayerCommand::GetMidiOutputs { .. } => "GetMidiOutputs",
            PlayerCommand::SetMidiOutput { .. } => "SetMidiOutput",
            PlayerCommand::SetSynth { .. } => "SetSynth",
            PlayerCommand::SetFxParameter { .. } => "SetFxParameter",
            PlayerCommand::RequestState => "RequestState",
            PlayerCommand::Shutdown { .. } => "Shutdown",
        }
    }

    /// Whether the submitter waits for a reply
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            PlayerCommand::GetMidiOutputs { .. } | PlayerCommand::Shutdown { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_mode_cycle() {
        let mode = RepeatMode::Off;
        assert_eq!(mode.next(), RepeatMode::One);
        assert_eq!(mode.next().next(), RepeatMode::All);
        assert_eq!(mode.next().next().next(), RepeatMode::Off);
    }

    #[test]
    fn test_blocking_commands() {
        let (tx, _rx) = oneshot::channel();
        assert!(PlayerCommand::Shutdown { reply: tx }.is_blocking());
        let (tx, _rx) = oneshot::channel();
        assert!(PlayerCommand::GetMidiOutputs { reply: tx }.is_blocking());
        assert!(!PlayerCommand::Stop.is_blocking());
    }

    #[test]
    fn test_dropped_reply_wakes_submitter() {
        let (tx, rx) = oneshot::channel::<()>();
        drop(PlayerCommand::Shutdown { reply: tx });
        assert!(rx.blocking_recv().is_err());
    }
}
