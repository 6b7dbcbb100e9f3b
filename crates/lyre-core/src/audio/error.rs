//! Audio backend error types

use thiserror::Error;

use super::AudioBackend;

/// Errors that can occur during audio operations
#[derive(Error, Debug)]
pub enum AudioError {
    /// No compatible stream could be opened
    #[error("Failed to initialize audio device: {0}")]
    DeviceInit(String),

    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// `start()` called before a successful `init()`
    #[error("Audio device not initialized")]
    NotInitialized,

    /// Backend not compiled into this build
    #[error("Audio backend '{0}' is not available in this build")]
    UnsupportedBackend(AudioBackend),
}

impl AudioError {
    /// Whether this error means no stream could be opened at all
    pub fn is_init_failure(&self) -> bool {
        !matches!(self, AudioError::StreamPlayError(_) | AudioError::NotInitialized)
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
