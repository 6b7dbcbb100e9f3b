//! Output device enumeration for the CPAL backend
//!
//! Devices are gathered from every available host (ALSA, PulseAudio, JACK,
//! WASAPI, ...) so a configured [`DeviceId`] can name both the host and the
//! device.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// Description of an output device
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    /// Identifier usable in [`AudioConfig::device`](super::AudioConfig::device)
    pub id: DeviceId,
    /// Host backend name (e.g., "ALSA", "JACK")
    pub host: String,
    /// Whether this is the default device of its host
    pub is_default: bool,
    /// Common sample rates within the supported range
    pub sample_rates: Vec<u32>,
    /// Maximum output channels
    pub max_channels: u16,
}

impl std::fmt::Display for OutputDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.id.name)?;
        if self.is_default {
            f.write_str(" (default)")?;
        }
        Ok(())
    }
}

/// All output devices from all hosts, defaults first
pub fn get_output_devices() -> AudioResult<Vec<OutputDeviceInfo>> {
    let mut devices: Vec<OutputDeviceInfo> = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host
            .default_output_device()
            .and_then(|d: cpal::Device| d.name().ok());

        let outputs = match host.output_devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let Ok(configs) = device.supported_output_configs() else { continue };

            let mut sample_rates: Vec<u32> = Vec::new();
            let mut max_channels: u16 = 0;
            for config in configs {
                max_channels = max_channels.max(config.channels());
                for rate in [44100, 48000, 88200, 96000, 176400, 192000] {
                    if rate >= config.min_sample_rate().0
                        && rate <= config.max_sample_rate().0
                        && !sample_rates.contains(&rate)
                    {
                        sample_rates.push(rate);
                    }
                }
            }
            if max_channels == 0 {
                continue;
            }
            sample_rates.sort_unstable();

            devices.push(OutputDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                id: DeviceId::with_host(&name, &host_label),
                host: host_label.clone(),
                sample_rates,
                max_channels,
            });
        }
    }

    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }

    devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.id.name.cmp(&b.id.name))
    });

    log::debug!("Enumerated {} audio output devices", devices.len());
    Ok(devices)
}

/// Resolve a configured device ID to a CPAL device
///
/// Uses the host named in the ID when present, otherwise searches all hosts.
pub(crate) fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    if let Some(host) = id.host.as_deref().and_then(host_by_name) {
        return host
            .output_devices()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name))
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else { continue };
        let Ok(mut outputs) = host.output_devices() else { continue };
        if let Some(device) = outputs.find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name)) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.display_label()))
}

/// Default output device of the default host
pub(crate) fn default_output_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("default output".to_string()))
}
