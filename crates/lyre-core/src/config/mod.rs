//! Engine configuration
//!
//! Plain serde types; the application decides where and how they are
//! persisted (the `lyre` binary keeps them in a YAML file).
//!
//! # Usage
//!
//! ```ignore
//! use lyre_core::config::PlayerConfig;
//!
//! let config = PlayerConfig {
//!     state_update_hz: 60.0,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::engine::RepeatMode;

/// Snapshot rate used when the configured one is unusable
const FALLBACK_UPDATE_HZ: f32 = 30.0;

/// Everything the engine needs at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Requested audio stream
    pub audio: AudioConfig,

    /// Initial repeat mode
    pub repeat: RepeatMode,

    /// Initial speed multiplier
    pub speed: f64,

    /// Initial linear output gain
    pub volume: f32,

    /// How often the state snapshot is republished (per second)
    pub state_update_hz: f32,

    /// Consecutive overrunning cycles before the current item is failed
    pub max_consecutive_overruns: u32,

    /// How long `shutdown()` waits for the player before forcing cleanup
    pub shutdown_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            repeat: RepeatMode::Off,
            speed: 1.0,
            volume: 1.0,
            state_update_hz: FALLBACK_UPDATE_HZ,
            max_consecutive_overruns: 8,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl PlayerConfig {
    /// Frames between two regular snapshot publishes at `sample_rate`
    pub fn publish_interval_frames(&self, sample_rate: u32) -> usize {
        let hz = if self.state_update_hz.is_finite() && self.state_update_hz > 0.0 {
            self.state_update_hz
        } else {
            FALLBACK_UPDATE_HZ
        };
        ((sample_rate as f32 / hz) as usize).max(1)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
