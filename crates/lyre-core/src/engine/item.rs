//! Playable items - the opaque units the player renders
//!
//! The engine never decodes a file format itself. An [`ItemOpener`] supplied
//! by the application turns an [`ItemDescriptor`] into a [`PlayableItem`],
//! which the player then drives one audio cycle at a time.
//!
//! An item can produce audio directly into the cycle buffer, MIDI events
//! through the context's event sink (which the player routes to the active
//! instrument), or both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument::EventSink;
use crate::types::StereoSample;

/// Errors from opening, rendering or seeking an item
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Seek failed: {0}")]
    Seek(String),
}

impl ItemError {
    pub fn open(path: &Path, reason: impl std::fmt::Display) -> Self {
        ItemError::Open {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Identifies one playlist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ItemDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit name, or the file name
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }
}

/// Descriptive information shown while an item plays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Container/format description (e.g. "SMF type 1", "WAV 16-bit")
    pub format: Option<String>,
    /// Number of tracks, for multi-track formats
    pub track_count: Option<u32>,
    pub author: Option<String>,
    pub name: Option<String>,
    /// Free-form text lines embedded in the item
    pub text: Vec<String>,
}

/// Everything an item needs to render one cycle
pub struct RenderContext<'a> {
    /// Cycle buffer; arrives silent, the item writes or mixes into it
    pub out: &'a mut [StereoSample],
    /// Negotiated sample rate
    pub sample_rate: u32,
    /// Playback speed multiplier, already clamped
    pub speed: f64,
    /// Destination for MIDI events emitted during this cycle
    pub events: &'a mut dyn EventSink,
}

impl RenderContext<'_> {
    /// Frames in this cycle
    pub fn frames(&self) -> usize {
        self.out.len()
    }

    /// Duration of this cycle in seconds of real time
    pub fn cycle_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.out.len() as f64 / self.sample_rate as f64
    }
}

/// Outcome of rendering one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// The whole cycle was rendered (frame count)
    Rendered(usize),
    /// The item ended after this many frames
    EndOfItem(usize),
}

/// A decodable unit of content
pub trait PlayableItem: Send {
    /// Render the next cycle
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<RenderStatus, ItemError>;

    /// Total length in seconds
    fn duration(&self) -> f64;

    /// Current position in seconds
    fn position(&self) -> f64;

    /// Jump to `time` seconds (already clamped into `[0, duration]`)
    fn seek(&mut self, time: f64) -> Result<(), ItemError>;

    fn metadata(&self) -> &ItemMetadata;
}

/// Creates playable items from descriptors (the codec collaborator)
pub trait ItemOpener: Send + Sync {
    fn open(&self, descriptor: &ItemDescriptor, sample_rate: u32) -> Result<Box<dyn PlayableItem>, ItemError>;
}
