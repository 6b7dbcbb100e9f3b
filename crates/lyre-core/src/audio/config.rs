//! Audio backend configuration
//!
//! Describes what the application *asks for* (backend, device, sample rate,
//! latency). What it actually gets is reported back as a
//! [`NegotiatedConfig`](super::NegotiatedConfig) once the stream is open.

use serde::{Deserialize, Serialize};

/// Maximum buffer size to pre-allocate (covers typical configurations)
/// Common values: 64, 128, 256, 512, 1024, 2048, 4096 frames
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Default buffer size when no latency preference is given (frames)
/// 512 frames is a safe default that works on most systems
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Smallest buffer the backends will request (frames)
pub const MIN_BUFFER_SIZE: u32 = 64;

/// Default desired latency: 50ms, matching a relaxed desktop player
pub const DEFAULT_LATENCY_MS: f32 = 50.0;

/// Which native stream API drives the real-time callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackend {
    /// CPAL (ALSA/PulseAudio, WASAPI, CoreAudio)
    #[default]
    Cpal,
    /// Native JACK client (Linux, `jack-backend` feature)
    Jack,
    /// No hardware: the callback is driven by a clock thread or by hand
    Offline,
}

impl AudioBackend {
    /// Display name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AudioBackend::Cpal => "cpal",
            AudioBackend::Jack => "jack",
            AudioBackend::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AudioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, WASAPI, etc.)
/// This allows selecting devices from different hosts on systems with multiple
/// audio backends available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "ALSA", "CoreAudio")
    /// If None, uses the default/preferred host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Requested configuration for an audio stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Native stream API to use
    pub backend: AudioBackend,

    /// Output device (None = use system default)
    /// Used by the CPAL backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,

    /// Preferred sample rate (None = use device default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,

    /// Desired output latency in milliseconds
    pub latency_ms: f32,

    /// Client name registered with JACK
    pub client_name: String,

    /// Connect JACK outputs to the first physical playback pair
    pub auto_connect: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: AudioBackend::default(),
            device: None,
            sample_rate: None,
            latency_ms: DEFAULT_LATENCY_MS,
            client_name: "lyre".to_string(),
            auto_connect: true,
        }
    }
}

impl AudioConfig {
    /// Config for a hardware-free stream
    pub fn offline() -> Self {
        Self {
            backend: AudioBackend::Offline,
            ..Default::default()
        }
    }

    /// Set the backend
    pub fn with_backend(mut self, backend: AudioBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the output device
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the preferred sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Set the desired latency in milliseconds
    pub fn with_latency_ms(mut self, latency_ms: f32) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Buffer size in frames that realizes the desired latency at `sample_rate`
    ///
    /// Rounded up, then clamped to what the backends can pre-allocate.
    pub fn buffer_frames_for(&self, sample_rate: u32) -> u32 {
        if !(self.latency_ms.is_finite() && self.latency_ms > 0.0) {
            return DEFAULT_BUFFER_SIZE;
        }
        let frames = (self.latency_ms as f64 / 1000.0 * sample_rate as f64).ceil() as u32;
        frames.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_frames_rounds_up() {
        let config = AudioConfig::default().with_latency_ms(10.0);
        // 10ms @ 44.1kHz = 441 frames
        assert_eq!(config.buffer_frames_for(44100), 441);
    }

    #[test]
    fn test_buffer_frames_clamped() {
        let tiny = AudioConfig::default().with_latency_ms(0.01);
        assert_eq!(tiny.buffer_frames_for(48000), MIN_BUFFER_SIZE);

        let huge = AudioConfig::default().with_latency_ms(10_000.0);
        assert_eq!(huge.buffer_frames_for(48000), MAX_BUFFER_SIZE as u32);

        let invalid = AudioConfig::default().with_latency_ms(f32::NAN);
        assert_eq!(invalid.buffer_frames_for(48000), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_device_label() {
        assert_eq!(DeviceId::new("hw:0").display_label(), "hw:0");
        assert_eq!(DeviceId::with_host("hw:0", "ALSA").display_label(), "[ALSA] hw:0");
    }
}
