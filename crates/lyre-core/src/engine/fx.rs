//! Output FX stage - tone filter and echo
//!
//! Runs on the mixed cycle buffer after the instrument, before the volume
//! ramp. Parameters are integers so they map directly onto key presses and
//! the `SetFxParameter` command:
//!
//! | index | parameter     | range       | default |
//! |-------|---------------|-------------|---------|
//! | 0     | tone          | -100..=100  | 0       |
//! | 1     | echo time ms  | 10..=1000   | 250     |
//! | 2     | echo feedback | 0..=95 %    | 40      |
//! | 3     | echo mix      | 0..=100 %   | 0       |
//!
//! Tone below zero sweeps a low-pass down from 20kHz, above zero a high-pass
//! up from 20Hz. With tone 0 and echo mix 0 the stage is a pass-through.

use std::f32::consts::PI;

use crate::types::StereoSample;

/// Longest echo the delay line is allocated for
const MAX_ECHO_MS: i32 = 1000;

/// Tone values this close to 0 are flat
const TONE_DEAD_ZONE: i32 = 2;

/// Static description of one FX parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FxParamInfo {
    pub name: &'static str,
    pub min: i32,
    pub max: i32,
    pub default: i32,
    pub unit: &'static str,
}

/// All FX parameters, by index
pub const FX_PARAMS: [FxParamInfo; 4] = [
    FxParamInfo { name: "Tone", min: -100, max: 100, default: 0, unit: "" },
    FxParamInfo { name: "Echo Time", min: 10, max: MAX_ECHO_MS, default: 250, unit: "ms" },
    FxParamInfo { name: "Echo Feedback", min: 0, max: 95, default: 40, unit: "%" },
    FxParamInfo { name: "Echo Mix", min: 0, max: 100, default: 0, unit: "%" },
];

/// Number of FX parameters
pub const FX_PARAM_COUNT: usize = FX_PARAMS.len();

const TONE: usize = 0;
const ECHO_TIME: usize = 1;
const ECHO_FEEDBACK: usize = 2;
const ECHO_MIX: usize = 3;

/// Two-pole (12dB/octave) state-variable filter
#[derive(Debug, Clone, Default)]
struct SvfFilter {
    ic1eq: [f32; 2],
    ic2eq: [f32; 2],
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl SvfFilter {
    fn set_params(&mut self, cutoff: f32, q: f32, sample_rate: u32) {
        let nyquist_guard = sample_rate as f32 * 0.45;
        let cutoff = cutoff.clamp(20.0, nyquist_guard.max(20.0));
        let g = (PI * cutoff / sample_rate as f32).tan();
        self.k = 1.0 / q.clamp(0.1, 10.0);
        self.a1 = 1.0 / (1.0 + g * (g + self.k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
    }

    /// One channel step, returns (lowpass, highpass)
    #[inline]
    fn tick(&mut self, ch: usize, input: f32) -> (f32, f32) {
        let v3 = input - self.ic2eq[ch];
        let v1 = self.a1 * self.ic1eq[ch] + self.a2 * v3;
        let v2 = self.ic2eq[ch] + self.a2 * self.ic1eq[ch] + self.a3 * v3;
        self.ic1eq[ch] = 2.0 * v1 - self.ic1eq[ch];
        self.ic2eq[ch] = 2.0 * v2 - self.ic2eq[ch];
        (v2, input - self.k * v1 - v2)
    }

    fn reset(&mut self) {
        self.ic1eq = [0.0; 2];
        self.ic2eq = [0.0; 2];
    }
}

/// Stereo delay line, sized once for [`MAX_ECHO_MS`]
#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<StereoSample>,
    write_pos: usize,
    delay_samples: usize,
}

impl DelayLine {
    fn new(sample_rate: u32) -> Self {
        let len = (sample_rate as usize * MAX_ECHO_MS as usize / 1000).max(1) + 1;
        Self {
            buffer: vec![StereoSample::silence(); len],
            write_pos: 0,
            delay_samples: 1,
        }
    }

    fn set_delay_samples(&mut self, samples: usize) {
        self.delay_samples = samples.clamp(1, self.buffer.len() - 1);
    }

    /// Read the delayed sample and write input plus feedback
    #[inline]
    fn process(&mut self, input: StereoSample, feedback: f32) -> StereoSample {
        let len = self.buffer.len();
        let read_pos = (self.write_pos + len - self.delay_samples) % len;
        let delayed = self.buffer[read_pos];
        self.buffer[self.write_pos] = input + delayed * feedback;
        self.write_pos = (self.write_pos + 1) % len;
        delayed
    }

    fn reset(&mut self) {
        self.buffer.fill(StereoSample::silence());
        self.write_pos = 0;
    }
}

/// Tone + echo output stage
#[derive(Debug, Clone)]
pub struct FxStage {
    sample_rate: u32,
    values: [i32; FX_PARAM_COUNT],
    filter: SvfFilter,
    delay: DelayLine,
}

impl FxStage {
    /// Allocates the delay line; call outside the audio callback
    pub fn new(sample_rate: u32) -> Self {
        let mut stage = Self {
            sample_rate: sample_rate.max(1),
            values: FX_PARAMS.map(|p| p.default),
            filter: SvfFilter::default(),
            delay: DelayLine::new(sample_rate.max(1)),
        };
        stage.update_tone();
        stage.update_echo_time();
        stage
    }

    /// Current parameter values, by index
    pub fn values(&self) -> [i32; FX_PARAM_COUNT] {
        self.values
    }

    /// Set a parameter, clamped to its range
    ///
    /// Returns the applied value, or None for an unknown index.
    pub fn set_parameter(&mut self, index: usize, value: i32) -> Option<i32> {
        let info = FX_PARAMS.get(index)?;
        let value = value.clamp(info.min, info.max);
        self.values[index] = value;
        match index {
            TONE => self.update_tone(),
            ECHO_TIME => self.update_echo_time(),
            _ => {}
        }
        Some(value)
    }

    fn update_tone(&mut self) {
        let tone = self.values[TONE];
        if tone.abs() < TONE_DEAD_ZONE {
            self.filter.reset();
            return;
        }
        let position = tone as f32 / 100.0;
        let cutoff = if position < 0.0 {
            // -1 = 100Hz, 0 = 20kHz
            100.0 * 200.0_f32.powf(1.0 + position)
        } else {
            // 0 = 20Hz, 1 = 5kHz
            20.0 * 250.0_f32.powf(position)
        };
        self.filter.set_params(cutoff, 0.707, self.sample_rate);
    }

    fn update_echo_time(&mut self) {
        let samples = self.values[ECHO_TIME] as usize * self.sample_rate as usize / 1000;
        self.delay.set_delay_samples(samples);
    }

    /// Whether processing would leave the signal untouched
    pub fn is_flat(&self) -> bool {
        self.values[TONE].abs() < TONE_DEAD_ZONE && self.values[ECHO_MIX] == 0
    }

    /// Clear filter and echo memory (on stop and seek)
    pub fn reset(&mut self) {
        self.filter.reset();
        self.delay.reset();
    }

    /// Process a cycle in place
    pub fn process(&mut self, buffer: &mut [StereoSample]) {
        if self.is_flat() {
            return;
        }

        let tone = self.values[TONE];
        if tone.abs() >= TONE_DEAD_ZONE {
            let low_pass = tone < 0;
            for sample in buffer.iter_mut() {
                let (lo_l, hi_l) = self.filter.tick(0, sample.left);
                let (lo_r, hi_r) = self.filter.tick(1, sample.right);
                *sample = if low_pass {
                    StereoSample::new(lo_l, lo_r)
                } else {
                    StereoSample::new(hi_l, hi_r)
                };
            }
        }

        let mix = self.values[ECHO_MIX] as f32 / 100.0;
        if mix > 0.0 {
            let feedback = self.values[ECHO_FEEDBACK] as f32 / 100.0;
            for sample in buffer.iter_mut() {
                let wet = self.delay.process(*sample, feedback);
                *sample = *sample * (1.0 - mix) + wet * mix;
            }
        }
    }
}
