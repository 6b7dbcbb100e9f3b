//! Native JACK audio backend for Linux
//!
//! Used when the `jack-backend` feature is enabled. The JACK server decides
//! sample rate and buffer size, so the desired latency is only advisory here.
//!
//! # Lifecycle
//!
//! - `init()` creates the client and registers `out_left` / `out_right`
//! - `start()` activates the client and optionally connects the ports to the
//!   first physical playback pair
//! - `shutdown()` deactivates the client, which unregisters the ports

use jack::{AudioOut, Client, ClientOptions, Control, Port, ProcessScope};

use super::backend::{AudioDevice, CycleRenderer, NegotiatedConfig, RenderFn};
use super::config::{AudioBackend, AudioConfig};
use super::error::{AudioError, AudioResult};

/// JACK output port names
const OUT_LEFT: &str = "out_left";
const OUT_RIGHT: &str = "out_right";

/// JACK process handler
///
/// Owns the render adapter exclusively; runs on the JACK RT thread.
struct JackProcessor {
    out_left: Port<AudioOut>,
    out_right: Port<AudioOut>,
    renderer: CycleRenderer,
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let left = self.out_left.as_mut_slice(ps);
        let right = self.out_right.as_mut_slice(ps);
        self.renderer.render_planar(left, right);
        Control::Continue
    }
}

/// JACK notification handler
struct JackNotifications;

impl jack::NotificationHandler for JackNotifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        // Negotiated parameters are fixed for the stream's life
        log::warn!("JACK sample rate changed to {}Hz; restart playback to follow", srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }
}

type ActiveClient = jack::AsyncClient<JackNotifications, JackProcessor>;

/// Output device backed by a JACK client
pub struct JackDevice {
    /// Client created by `init()`, waiting for `start()`
    pending: Option<(Client, JackProcessor)>,
    /// Activated client
    active: Option<ActiveClient>,
    negotiated: Option<NegotiatedConfig>,
    auto_connect: bool,
}

impl JackDevice {
    pub fn new() -> Self {
        Self {
            pending: None,
            active: None,
            negotiated: None,
            auto_connect: true,
        }
    }
}

impl Default for JackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for JackDevice {
    fn backend(&self) -> AudioBackend {
        AudioBackend::Jack
    }

    fn init(&mut self, desired: &AudioConfig, render: RenderFn) -> AudioResult<NegotiatedConfig> {
        self.shutdown();

        // JACK may rename the client if another one has the same name
        let (client, _status) = Client::new(&desired.client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| AudioError::DeviceInit(format!("Failed to create JACK client: {}", e)))?;

        let sample_rate = client.sample_rate() as u32;
        let buffer_frames = client.buffer_size();
        if let Some(rate) = desired.sample_rate.filter(|&r| r != sample_rate) {
            log::warn!("JACK runs at {}Hz, ignoring requested {}Hz", sample_rate, rate);
        }

        let out_left = client
            .register_port(OUT_LEFT, AudioOut::default())
            .map_err(|e| AudioError::ConfigError(format!("Failed to register port: {}", e)))?;
        let out_right = client
            .register_port(OUT_RIGHT, AudioOut::default())
            .map_err(|e| AudioError::ConfigError(format!("Failed to register port: {}", e)))?;

        let negotiated = NegotiatedConfig {
            sample_rate,
            buffer_frames,
            channels: 2,
        };
        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
            client.name(),
            sample_rate,
            buffer_frames,
            negotiated.latency_ms()
        );

        let processor = JackProcessor {
            out_left,
            out_right,
            renderer: CycleRenderer::new(render),
        };
        self.pending = Some((client, processor));
        self.negotiated = Some(negotiated);
        self.auto_connect = desired.auto_connect;
        Ok(negotiated)
    }

    fn start(&mut self) -> AudioResult<()> {
        if self.active.is_some() {
            return Ok(());
        }
        let (client, processor) = self.pending.take().ok_or(AudioError::NotInitialized)?;
        let client_name = client.name().to_string();

        let active = client
            .activate_async(JackNotifications, processor)
            .map_err(|e| AudioError::StreamPlayError(format!("Failed to activate JACK client: {}", e)))?;
        log::info!("JACK client activated");

        if self.auto_connect {
            connect_to_playback(active.as_client(), &client_name);
        }
        self.active = Some(active);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.deactivate() {
                log::warn!("JACK deactivate failed: {}", e);
            }
            log::info!("JACK client closed");
        }
        self.pending = None;
    }

    fn is_started(&self) -> bool {
        self.active.is_some()
    }

    fn negotiated(&self) -> Option<NegotiatedConfig> {
        self.negotiated
    }
}

impl Drop for JackDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// First physical playback pair, as `(left, right)` port names
///
/// Understands both numbered (`playback_1`, `playback_2`) and PipeWire
/// surround (`playback_FL`, `playback_FR`) naming.
fn first_playback_pair(client: &Client) -> Option<(String, String)> {
    let mut ports = client.ports(
        Some(".*:playback_.*"),
        None,
        jack::PortFlags::IS_INPUT | jack::PortFlags::IS_PHYSICAL,
    );
    ports.sort();

    let fl = ports.iter().find(|p| p.ends_with("_FL"));
    let fr = ports.iter().find(|p| p.ends_with("_FR"));
    if let (Some(fl), Some(fr)) = (fl, fr) {
        return Some((fl.clone(), fr.clone()));
    }

    match ports.as_slice() {
        [left, right, ..] => Some((left.clone(), right.clone())),
        [mono] => Some((mono.clone(), mono.clone())),
        [] => None,
    }
}

fn connect_to_playback(client: &Client, client_name: &str) {
    let Some((left, right)) = first_playback_pair(client) else {
        log::warn!("No JACK playback ports found for connection");
        return;
    };

    let our_left = format!("{}:{}", client_name, OUT_LEFT);
    let our_right = format!("{}:{}", client_name, OUT_RIGHT);
    if let Err(e) = client.connect_ports_by_name(&our_left, &left) {
        log::warn!("Could not connect left output: {}", e);
    }
    if let Err(e) = client.connect_ports_by_name(&our_right, &right) {
        log::warn!("Could not connect right output: {}", e);
    }
    log::info!("Connected outputs to {} and {}", left, right);
}
