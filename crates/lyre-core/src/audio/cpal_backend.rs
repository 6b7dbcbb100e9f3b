//! CPAL audio backend implementation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  StreamControl   ┌─────────────────────┐
//! │    CpalDevice    │─────────────────►│    Stream Thread    │
//! │ (owned by handle)│◄─────────────────│  (owns cpal Stream) │
//! └──────────────────┘  negotiated cfg  └──────────┬──────────┘
//!                                                  │ builds
//!                                                  ▼
//!                                       ┌─────────────────────┐
//!                                       │  CPAL Audio Thread  │
//!                                       │  (calls RenderFn)   │
//!                                       └─────────────────────┘
//! ```
//!
//! `cpal::Stream` is not `Send`, so it lives on a small control thread for
//! its whole life. The device talks to that thread over crossbeam channels,
//! which keeps [`CpalDevice`] itself movable between threads.

use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig, SupportedBufferSize};
use crossbeam::channel::{bounded, Sender};

use super::backend::{AudioDevice, CycleRenderer, NegotiatedConfig, RenderFn};
use super::config::{AudioBackend, AudioConfig};
use super::device::{default_output_device, find_device_by_id};
use super::error::{AudioError, AudioResult};

/// Messages from the device to its stream thread
enum StreamControl {
    Play(Sender<AudioResult<()>>),
    Stop,
}

/// Control side of the thread that owns the CPAL stream
struct StreamThread {
    control: Sender<StreamControl>,
    join: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn stop(&mut self) {
        let _ = self.control.send(StreamControl::Stop);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("CPAL stream thread panicked");
            }
        }
    }
}

/// Output device driven by a CPAL stream
pub struct CpalDevice {
    stream: Option<StreamThread>,
    negotiated: Option<NegotiatedConfig>,
    started: bool,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            stream: None,
            negotiated: None,
            started: false,
        }
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for CpalDevice {
    fn backend(&self) -> AudioBackend {
        AudioBackend::Cpal
    }

    fn init(&mut self, desired: &AudioConfig, render: RenderFn) -> AudioResult<NegotiatedConfig> {
        self.shutdown();

        let desired = desired.clone();
        let (ready_tx, ready_rx) = bounded::<AudioResult<NegotiatedConfig>>(1);
        let (control_tx, control_rx) = bounded::<StreamControl>(4);

        let join = std::thread::Builder::new()
            .name("lyre-cpal-stream".to_string())
            .spawn(move || {
                let (stream, negotiated) = match open_stream(&desired, render) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(negotiated));

                for msg in control_rx.iter() {
                    match msg {
                        StreamControl::Play(reply) => {
                            let result = stream
                                .play()
                                .map_err(|e| AudioError::StreamPlayError(e.to_string()));
                            let _ = reply.send(result);
                        }
                        StreamControl::Stop => break,
                    }
                }

                if let Err(e) = stream.pause() {
                    log::debug!("Pausing CPAL stream before drop failed: {}", e);
                }
            })
            .map_err(|e| AudioError::DeviceInit(format!("could not spawn stream thread: {}", e)))?;

        let mut thread = StreamThread {
            control: control_tx,
            join: Some(join),
        };

        match ready_rx.recv() {
            Ok(Ok(negotiated)) => {
                self.stream = Some(thread);
                self.negotiated = Some(negotiated);
                Ok(negotiated)
            }
            Ok(Err(e)) => {
                thread.stop();
                Err(e)
            }
            Err(_) => {
                thread.stop();
                Err(AudioError::DeviceInit("stream thread exited during init".to_string()))
            }
        }
    }

    fn start(&mut self) -> AudioResult<()> {
        if self.started {
            return Ok(());
        }
        let stream = self.stream.as_ref().ok_or(AudioError::NotInitialized)?;

        let (reply_tx, reply_rx) = bounded(1);
        stream
            .control
            .send(StreamControl::Play(reply_tx))
            .map_err(|_| AudioError::StreamPlayError("stream thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::StreamPlayError("stream thread is gone".to_string()))??;

        self.started = true;
        log::info!("CPAL stream started");
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            log::info!("CPAL stream closed");
        }
        self.started = false;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn negotiated(&self) -> Option<NegotiatedConfig> {
        self.negotiated
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build a paused output stream matching `desired` as closely as possible
fn open_stream(desired: &AudioConfig, render: RenderFn) -> AudioResult<(Stream, NegotiatedConfig)> {
    let device = match &desired.device {
        Some(id) => find_device_by_id(id)?,
        None => default_output_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let (supported, sample_rate) = select_output_config(&device, desired)?;
    let channels = supported.channels();

    let mut buffer_frames = desired.buffer_frames_for(sample_rate);
    if let SupportedBufferSize::Range { min, max } = supported.buffer_size() {
        buffer_frames = buffer_frames.clamp(*min, *max);
    }

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: CpalBufferSize::Fixed(buffer_frames),
    };

    let mut renderer = CycleRenderer::new(render);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                renderer.render_interleaved(data, channels as usize);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    let negotiated = NegotiatedConfig {
        sample_rate,
        buffer_frames,
        channels,
    };
    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        channels,
        sample_rate,
        buffer_frames,
        negotiated.latency_ms()
    );

    Ok((stream, negotiated))
}

/// Pick an f32 output config and the sample rate to run it at
///
/// The requested rate wins when the device supports it; otherwise the
/// device's preferred rate is used.
fn select_output_config(
    device: &cpal::Device,
    desired: &AudioConfig,
) -> AudioResult<(cpal::SupportedStreamConfigRange, u32)> {
    let preferred_rate = device
        .default_output_config()
        .map(|c| c.sample_rate().0)
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    let target_rate = desired.sample_rate.unwrap_or(preferred_rate);

    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let supports = |c: &cpal::SupportedStreamConfigRange, rate: u32| {
        rate >= c.min_sample_rate().0 && rate <= c.max_sample_rate().0
    };

    let (config, rate) = configs
        .iter()
        .find(|c| c.channels() >= 2 && supports(c, target_rate))
        .map(|c| (c, target_rate))
        .or_else(|| {
            configs
                .iter()
                .find(|c| c.channels() >= 2 && supports(c, preferred_rate))
                .map(|c| (c, preferred_rate))
        })
        .or_else(|| configs.first().map(|c| (c, c.max_sample_rate().0)))
        .ok_or_else(|| AudioError::DeviceInit("no f32 output configuration available".to_string()))?;

    if rate != target_rate {
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_rate,
            rate
        );
    }

    Ok((config.clone(), rate))
}
