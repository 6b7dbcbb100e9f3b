//! Audio device capability shared by all backends
//!
//! Every backend exposes the same contract:
//! - `init()` negotiates a stream and installs the render function
//! - `start()` / `shutdown()` are idempotent
//! - the backend invokes the render function once per audio cycle with an
//!   exact frame count, on a buffer allocated before the stream started
//!
//! Backends differ only in which native API produces the callback.

use std::time::Duration;

use crate::types::{StereoBuffer, StereoSample};

use super::config::{AudioBackend, AudioConfig, MAX_BUFFER_SIZE};
use super::error::{AudioError, AudioResult};

/// Real-time render function invoked once per audio cycle
///
/// Must write every frame of the slice and return in bounded time.
pub type RenderFn = Box<dyn FnMut(&mut [StereoSample]) + Send + 'static>;

/// Stream parameters actually obtained from the backend
///
/// Fixed once a stream is open; changing them requires a full
/// `shutdown()` + `init()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per audio cycle
    pub buffer_frames: u32,
    /// Output channel count of the native stream
    pub channels: u16,
}

impl NegotiatedConfig {
    /// One-way output latency implied by the buffer size
    pub fn latency(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.buffer_frames as f64 / self.sample_rate as f64)
    }

    /// Latency in milliseconds (for display)
    pub fn latency_ms(&self) -> f32 {
        self.latency().as_secs_f32() * 1000.0
    }
}

/// Valid ranges for transport values, declared by the backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportLimits {
    /// Slowest playback speed multiplier
    pub min_speed: f64,
    /// Fastest playback speed multiplier
    pub max_speed: f64,
    /// Largest linear output gain
    pub max_volume: f32,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            min_speed: 0.25,
            max_speed: 4.0,
            max_volume: 1.0,
        }
    }
}

impl TransportLimits {
    /// Clamp a speed multiplier into range
    #[inline]
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        speed.clamp(self.min_speed, self.max_speed)
    }

    /// Clamp a linear gain into `[0, max_volume]`
    #[inline]
    pub fn clamp_volume(&self, volume: f32) -> f32 {
        volume.clamp(0.0, self.max_volume)
    }
}

/// An output stream provider
///
/// Owned by the player handle for the engine's whole lifetime.
pub trait AudioDevice: Send {
    /// Native API behind this device
    fn backend(&self) -> AudioBackend;

    /// Open a stream as close as possible to `desired` and install `render`
    ///
    /// Any previously opened stream is shut down first. Fails with
    /// [`AudioError::DeviceInit`] (or a more specific init error) if no
    /// compatible stream can be opened.
    fn init(&mut self, desired: &AudioConfig, render: RenderFn) -> AudioResult<NegotiatedConfig>;

    /// Start the callback. Calling it on a running device is a no-op.
    fn start(&mut self) -> AudioResult<()>;

    /// Stop and release the stream. Safe to call when never started.
    fn shutdown(&mut self);

    /// Whether the callback is currently running
    fn is_started(&self) -> bool;

    /// Negotiated stream parameters, once initialized
    fn negotiated(&self) -> Option<NegotiatedConfig>;

    /// Negotiated sample rate (0 before `init()`)
    fn sample_rate(&self) -> u32 {
        self.negotiated().map(|n| n.sample_rate).unwrap_or(0)
    }

    /// Negotiated frames per cycle (0 before `init()`)
    fn buffer_frames(&self) -> u32 {
        self.negotiated().map(|n| n.buffer_frames).unwrap_or(0)
    }

    /// Negotiated native channel count (0 before `init()`)
    fn channels(&self) -> u16 {
        self.negotiated().map(|n| n.channels).unwrap_or(0)
    }

    /// Negotiated output latency (zero before `init()`)
    fn latency(&self) -> Duration {
        self.negotiated().map(|n| n.latency()).unwrap_or(Duration::ZERO)
    }

    /// Transport ranges this backend can honor
    fn limits(&self) -> TransportLimits {
        TransportLimits::default()
    }
}

/// Create an uninitialized device for the requested backend
pub fn open_device(backend: AudioBackend) -> AudioResult<Box<dyn AudioDevice>> {
    match backend {
        AudioBackend::Cpal => Ok(Box::new(super::cpal_backend::CpalDevice::new())),
        #[cfg(all(target_os = "linux", feature = "jack-backend"))]
        AudioBackend::Jack => Ok(Box::new(super::jack_backend::JackDevice::new())),
        #[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
        AudioBackend::Jack => Err(AudioError::UnsupportedBackend(AudioBackend::Jack)),
        AudioBackend::Offline => Ok(Box::new(super::offline_backend::OfflineDevice::realtime())),
    }
}

/// Adapts the render function to native buffers
///
/// Owns a scratch buffer pre-allocated to [`MAX_BUFFER_SIZE`] frames; device
/// cycles larger than that are rendered in several chunks.
pub(crate) struct CycleRenderer {
    render: RenderFn,
    scratch: StereoBuffer,
}

impl CycleRenderer {
    pub(crate) fn new(render: RenderFn) -> Self {
        Self {
            render,
            scratch: StereoBuffer::silence(MAX_BUFFER_SIZE),
        }
    }

    /// Render one cycle into an interleaved buffer with `channels` channels
    pub(crate) fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for chunk in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
            let n_frames = chunk.len() / channels;
            self.scratch.set_len_from_capacity(n_frames);
            (self.render)(self.scratch.as_mut_slice());
            if channels == 2 {
                let frames = self.scratch.as_interleaved();
                chunk[..frames.len()].copy_from_slice(frames);
                chunk[frames.len()..].fill(0.0);
            } else {
                self.scratch.write_frames(chunk, channels);
            }
        }
    }

    /// Render one cycle into separate left/right buffers
    pub(crate) fn render_planar(&mut self, left: &mut [f32], right: &mut [f32]) {
        let n_frames = left.len().min(right.len());
        let mut offset = 0;
        while offset < n_frames {
            let len = (n_frames - offset).min(MAX_BUFFER_SIZE);
            self.scratch.set_len_from_capacity(len);
            (self.render)(self.scratch.as_mut_slice());
            for (i, sample) in self.scratch.as_slice().iter().enumerate() {
                left[offset + i] = sample.left;
                right[offset + i] = sample.right;
            }
            offset += len;
        }
    }

    /// Render one cycle and hand back the samples
    pub(crate) fn render_block(&mut self, n_frames: usize) -> &[StereoSample] {
        let n_frames = n_frames.min(MAX_BUFFER_SIZE);
        self.scratch.set_len_from_capacity(n_frames);
        (self.render)(self.scratch.as_mut_slice());
        self.scratch.as_slice()
    }
}
