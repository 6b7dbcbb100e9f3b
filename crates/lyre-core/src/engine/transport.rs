//! Transport state: status, repeat mode, speed, volume and channel mask

use serde::{Deserialize, Serialize};

use super::command::RepeatMode;
use crate::audio::TransportLimits;
use crate::instrument::ChannelMask;
use crate::types::StereoSample;

/// Playback status of the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
    /// Terminal; no further commands are applied
    ShutDown,
}

impl PlaybackStatus {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::ShutDown => "shut down",
        }
    }

    /// Playing or paused: an item is open
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackStatus::Playing | PlaybackStatus::Paused)
    }
}

/// Live transport values owned by the player
///
/// Speed and volume only change through the clamping setters, so whatever
/// reaches the render step is always inside the backend's limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportState {
    pub status: PlaybackStatus,
    pub repeat: RepeatMode,
    speed: f64,
    volume: f32,
    pub channels: ChannelMask,
}

impl TransportState {
    pub fn new(repeat: RepeatMode, speed: f64, volume: f32, limits: &TransportLimits) -> Self {
        let mut state = Self {
            status: PlaybackStatus::Stopped,
            repeat,
            speed: 1.0,
            volume: limits.max_volume,
            channels: ChannelMask::ALL,
        };
        state.set_speed(speed, false, limits);
        state.set_volume(volume, limits);
        state
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Set (or adjust, when `relative`) the speed multiplier
    ///
    /// NaN is rejected and leaves the speed unchanged.
    pub fn set_speed(&mut self, value: f64, relative: bool, limits: &TransportLimits) -> bool {
        let target = if relative { self.speed + value } else { value };
        if target.is_nan() {
            return false;
        }
        self.speed = limits.clamp_speed(target);
        true
    }

    /// Set the linear gain. NaN is rejected.
    pub fn set_volume(&mut self, value: f32, limits: &TransportLimits) -> bool {
        if value.is_nan() {
            return false;
        }
        self.volume = limits.clamp_volume(value);
        true
    }
}

/// Per-cycle linear gain ramp
///
/// Each cycle moves from the gain applied at the end of the previous cycle
/// to the current target, so volume changes never click.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRamp {
    current: f32,
}

impl VolumeRamp {
    pub fn new(initial: f32) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Jump straight to `gain` (used when starting from silence)
    pub fn reset(&mut self, gain: f32) {
        self.current = gain;
    }

    /// Apply the ramp towards `target` across `buffer`
    pub fn apply(&mut self, buffer: &mut [StereoSample], target: f32) {
        let n = buffer.len();
        if n == 0 {
            return;
        }
        if (self.current - target).abs() < f32::EPSILON {
            if (target - 1.0).abs() > f32::EPSILON {
                buffer.iter_mut().for_each(|s| *s *= target);
            }
            self.current = target;
            return;
        }
        let step = (target - self.current) / n as f32;
        for (i, sample) in buffer.iter_mut().enumerate() {
            *sample *= self.current + step * (i + 1) as f32;
        }
        self.current = target;
    }
}
