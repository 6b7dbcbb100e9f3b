//! Per-channel muting and activity metering
//!
//! Items emit MIDI through a [`ChannelFilter`], which drops channel-voice
//! messages on muted channels before they reach the instrument. Note-offs
//! always pass so muting never leaves a note hanging.

use serde::{Deserialize, Serialize};

use super::{EventFlags, Instrument};
use crate::types::MIDI_CHANNELS;

/// Receiver for the events an item emits during one cycle
pub trait EventSink {
    /// `timestamp` is in seconds from the start of the current cycle
    fn send(&mut self, data: &[u8], timestamp: f64);
}

/// 16-bit set of enabled MIDI channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(u16);

impl Default for ChannelMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl ChannelMask {
    pub const ALL: ChannelMask = ChannelMask(u16::MAX);
    pub const NONE: ChannelMask = ChannelMask(0);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Whether `channel` is enabled; out-of-range channels never are
    #[inline]
    pub fn is_enabled(self, channel: usize) -> bool {
        channel < MIDI_CHANNELS && self.0 & (1 << channel) != 0
    }

    /// Enable or disable `channel`. Returns false if the channel is out of range.
    pub fn set(&mut self, channel: usize, enable: bool) -> bool {
        if channel >= MIDI_CHANNELS {
            return false;
        }
        if enable {
            self.0 |= 1 << channel;
        } else {
            self.0 &= !(1 << channel);
        }
        true
    }

    /// Flip `channel`. Returns the new state, or None if out of range.
    pub fn toggle(&mut self, channel: usize) -> Option<bool> {
        if channel >= MIDI_CHANNELS {
            return None;
        }
        self.0 ^= 1 << channel;
        Some(self.is_enabled(channel))
    }
}

/// Time for a meter to fall by 1/e after the last note-on
const METER_DECAY_SECS: f32 = 0.3;

/// Per-channel activity levels (0.0-1.0), driven by note-on velocity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelMeters {
    levels: [f32; MIDI_CHANNELS],
}

impl ChannelMeters {
    pub fn levels(&self) -> [f32; MIDI_CHANNELS] {
        self.levels
    }

    /// Register a note-on
    #[inline]
    pub fn hit(&mut self, channel: usize, velocity: u8) {
        if let Some(level) = self.levels.get_mut(channel) {
            *level = level.max(velocity as f32 / 127.0);
        }
    }

    /// Let all meters fall for `frames` frames at `sample_rate`
    pub fn decay(&mut self, frames: usize, sample_rate: u32) {
        if sample_rate == 0 {
            return;
        }
        let factor = (-(frames as f32) / (sample_rate as f32 * METER_DECAY_SECS)).exp();
        for level in &mut self.levels {
            *level *= factor;
            if *level < 1e-3 {
                *level = 0.0;
            }
        }
    }

    pub fn reset(&mut self) {
        self.levels = [0.0; MIDI_CHANNELS];
    }
}

/// Mute filter between an item and the active instrument
pub struct ChannelFilter<'a> {
    instrument: Option<&'a mut (dyn Instrument + 'static)>,
    mask: ChannelMask,
    meters: &'a mut ChannelMeters,
}

impl<'a> ChannelFilter<'a> {
    pub fn new(
        instrument: Option<&'a mut (dyn Instrument + 'static)>,
        mask: ChannelMask,
        meters: &'a mut ChannelMeters,
    ) -> Self {
        Self {
            instrument,
            mask,
            meters,
        }
    }

    /// Whether a message survives the mask
    pub fn passes(mask: ChannelMask, data: &[u8]) -> bool {
        let Some(&status) = data.first() else {
            return false;
        };
        if !(0x80..0xF0).contains(&status) {
            return true;
        }
        if is_note_off(data) {
            return true;
        }
        mask.is_enabled((status & 0x0F) as usize)
    }
}

impl EventSink for ChannelFilter<'_> {
    fn send(&mut self, data: &[u8], timestamp: f64) {
        if !Self::passes(self.mask, data) {
            return;
        }
        if let [status, _key, velocity, ..] = data {
            if status & 0xF0 == 0x90 && *velocity > 0 {
                self.meters.hit((status & 0x0F) as usize, *velocity);
            }
        }
        if let Some(instrument) = self.instrument.as_deref_mut() {
            instrument.send_event(data, timestamp, EventFlags::NONE);
        }
    }
}

#[inline]
fn is_note_off(data: &[u8]) -> bool {
    match data {
        [status, ..] if status & 0xF0 == 0x80 => true,
        [status, _key, 0, ..] if status & 0xF0 == 0x90 => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::tests::RecordingInstrument;

    #[test]
    fn test_mask_ignores_out_of_range_channels() {
        let mut mask = ChannelMask::ALL;
        assert!(!mask.set(16, false));
        assert_eq!(mask.toggle(42), None);
        assert_eq!(mask, ChannelMask::ALL);
        assert!(!mask.is_enabled(16));
    }

    #[test]
    fn test_mask_toggle() {
        let mut mask = ChannelMask::ALL;
        assert_eq!(mask.toggle(3), Some(false));
        assert!(!mask.is_enabled(3));
        assert_eq!(mask.toggle(3), Some(true));
        assert_eq!(mask.bits(), u16::MAX);
    }

    #[test]
    fn test_filter_drops_muted_channel_but_passes_note_off() {
        let mut sink = RecordingInstrument::default();
        let mut meters = ChannelMeters::default();
        let mut mask = ChannelMask::ALL;
        mask.set(2, false);

        {
            let mut filter = ChannelFilter::new(Some(&mut sink), mask, &mut meters);
            filter.send(&[0x92, 60, 100], 0.0); // note-on, muted
            filter.send(&[0x82, 60, 0], 0.001); // note-off, muted channel
            filter.send(&[0x92, 61, 0], 0.002); // note-on vel 0
            filter.send(&[0xB2, 7, 100], 0.003); // CC, muted
            filter.send(&[0x91, 64, 90], 0.004); // other channel
            filter.send(&[0xF8], 0.005); // clock
        }

        let sent: Vec<_> = sink.events.iter().map(|(d, _, _)| d.clone()).collect();
        assert_eq!(
            sent,
            vec![vec![0x82, 60, 0], vec![0x92, 61, 0], vec![0x91, 64, 90], vec![0xF8]]
        );
        assert_eq!(meters.levels()[2], 0.0);
        assert!((meters.levels()[1] - 90.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_filter_without_instrument_still_meters() {
        let mut meters = ChannelMeters::default();
        let mut filter = ChannelFilter::new(None, ChannelMask::ALL, &mut meters);
        filter.send(&[0x90, 60, 127], 0.0);
        assert_eq!(meters.levels()[0], 1.0);
    }

    #[test]
    fn test_meters_decay_to_zero() {
        let mut meters = ChannelMeters::default();
        meters.hit(0, 127);
        meters.decay(48000, 48000);
        assert!(meters.levels()[0] < 0.1);
        meters.decay(48000 * 5, 48000);
        assert_eq!(meters.levels()[0], 0.0);
    }
}
