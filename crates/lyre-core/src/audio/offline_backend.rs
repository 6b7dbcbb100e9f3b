//! Hardware-free audio backend
//!
//! Two ways to drive the callback:
//!
//! - [`OfflineDevice::realtime`]: a clock thread renders one buffer per
//!   buffer period and discards the output. Useful on machines without a
//!   sound card and for MIDI-only playback.
//! - [`OfflineDevice::manual`]: nothing runs on its own; the returned
//!   [`OfflineDriver`] renders cycles on demand and hands back the samples.
//!   Tests use this to step the engine deterministically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, select, tick, Sender};

use super::backend::{AudioDevice, CycleRenderer, NegotiatedConfig, RenderFn};
use super::config::{AudioBackend, AudioConfig};
use super::error::{AudioError, AudioResult};
use crate::types::{StereoSample, DEFAULT_SAMPLE_RATE};

/// State shared between the device and its driver
#[derive(Default)]
struct Shared {
    renderer: Mutex<Option<CycleRenderer>>,
    started: AtomicBool,
}

/// Clock thread rendering in (approximately) real time
struct ClockThread {
    stop: Sender<()>,
    join: Option<JoinHandle<()>>,
}

/// Output device without hardware
pub struct OfflineDevice {
    shared: Arc<Shared>,
    negotiated: Option<NegotiatedConfig>,
    realtime: bool,
    clock: Option<ClockThread>,
}

impl OfflineDevice {
    /// Device whose callback is driven by an internal clock thread
    pub fn realtime() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            negotiated: None,
            realtime: true,
            clock: None,
        }
    }

    /// Device whose callback is driven by hand through the returned driver
    pub fn manual() -> (Self, OfflineDriver) {
        let shared = Arc::new(Shared::default());
        let driver = OfflineDriver {
            shared: shared.clone(),
        };
        let device = Self {
            shared,
            negotiated: None,
            realtime: false,
            clock: None,
        };
        (device, driver)
    }

    fn spawn_clock(&mut self, negotiated: NegotiatedConfig) -> AudioResult<()> {
        let shared = self.shared.clone();
        let frames = negotiated.buffer_frames as usize;
        let period = negotiated.latency().max(Duration::from_millis(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let join = std::thread::Builder::new()
            .name("lyre-offline-clock".to_string())
            .spawn(move || {
                let ticker = tick(period);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if let Ok(mut renderer) = shared.renderer.lock() {
                                if let Some(renderer) = renderer.as_mut() {
                                    renderer.render_block(frames);
                                }
                            }
                        }
                    }
                }
            })
            .map_err(|e| AudioError::StreamPlayError(format!("could not spawn clock thread: {}", e)))?;

        self.clock = Some(ClockThread {
            stop: stop_tx,
            join: Some(join),
        });
        Ok(())
    }
}

impl AudioDevice for OfflineDevice {
    fn backend(&self) -> AudioBackend {
        AudioBackend::Offline
    }

    fn init(&mut self, desired: &AudioConfig, render: RenderFn) -> AudioResult<NegotiatedConfig> {
        self.shutdown();

        let sample_rate = desired.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        if sample_rate == 0 {
            return Err(AudioError::DeviceInit("sample rate must be positive".to_string()));
        }
        let negotiated = NegotiatedConfig {
            sample_rate,
            buffer_frames: desired.buffer_frames_for(sample_rate),
            channels: 2,
        };

        if let Ok(mut renderer) = self.shared.renderer.lock() {
            *renderer = Some(CycleRenderer::new(render));
        }
        self.negotiated = Some(negotiated);
        log::info!(
            "Offline stream ready: {}Hz, {} frames (~{:.1}ms)",
            sample_rate,
            negotiated.buffer_frames,
            negotiated.latency_ms()
        );
        Ok(negotiated)
    }

    fn start(&mut self) -> AudioResult<()> {
        if self.is_started() {
            return Ok(());
        }
        let negotiated = self.negotiated.ok_or(AudioError::NotInitialized)?;
        if self.realtime {
            self.spawn_clock(negotiated)?;
        }
        self.shared.started.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shared.started.store(false, Ordering::Release);
        if let Some(mut clock) = self.clock.take() {
            let _ = clock.stop.send(());
            if let Some(join) = clock.join.take() {
                if join.join().is_err() {
                    log::error!("Offline clock thread panicked");
                }
            }
        }
        if let Ok(mut renderer) = self.shared.renderer.lock() {
            *renderer = None;
        }
    }

    fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    fn negotiated(&self) -> Option<NegotiatedConfig> {
        self.negotiated
    }
}

impl Drop for OfflineDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Steps a manual [`OfflineDevice`] one cycle at a time
#[derive(Clone)]
pub struct OfflineDriver {
    shared: Arc<Shared>,
}

impl OfflineDriver {
    /// Run one audio cycle of `n_frames` and return what was rendered
    ///
    /// Returns `None` while the device is not started.
    pub fn cycle(&self, n_frames: usize) -> Option<Vec<StereoSample>> {
        if !self.shared.started.load(Ordering::Acquire) {
            return None;
        }
        let mut renderer = self.shared.renderer.lock().ok()?;
        renderer.as_mut().map(|r| r.render_block(n_frames).to_vec())
    }

    /// Run `cycles` cycles of `n_frames` each, concatenating the output
    ///
    /// Stops early if the device stops.
    pub fn run(&self, cycles: usize, n_frames: usize) -> Vec<StereoSample> {
        let mut out = Vec::with_capacity(cycles * n_frames);
        for _ in 0..cycles {
            match self.cycle(n_frames) {
                Some(block) => out.extend_from_slice(&block),
                None => break,
            }
        }
        out
    }

    /// Whether the device callback is running
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }
}
