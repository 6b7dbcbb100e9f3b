//! Audio device capability for Lyre
//!
//! One contract, several native APIs:
//! - **CPAL**: ALSA/PulseAudio/PipeWire, WASAPI, CoreAudio
//! - **JACK**: native client with port routing (Linux, `jack-backend` feature)
//! - **Offline**: no hardware, clock-driven or stepped by hand
//!
//! # Example Usage
//!
//! ```ignore
//! use lyre_core::audio::{open_device, AudioConfig};
//!
//! let config = AudioConfig::default();
//! let mut device = open_device(config.backend)?;
//! let negotiated = device.init(&config, Box::new(|out| out.fill(Default::default())))?;
//! device.start()?;
//! ```
//!
//! The playback engine normally does this itself through
//! [`PlayerHandle::start`](crate::engine::PlayerHandle::start).

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;
mod offline_backend;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;

pub use backend::{open_device, AudioDevice, NegotiatedConfig, RenderFn, TransportLimits};
pub use config::{
    AudioBackend, AudioConfig, DeviceId, DEFAULT_BUFFER_SIZE, DEFAULT_LATENCY_MS, MAX_BUFFER_SIZE,
    MIN_BUFFER_SIZE,
};
pub use cpal_backend::CpalDevice;
pub use device::{get_output_devices, OutputDeviceInfo};
pub use error::{AudioError, AudioResult};
pub use offline_backend::{OfflineDevice, OfflineDriver};

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::JackDevice;
