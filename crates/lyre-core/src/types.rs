//! Common types for Lyre
//!
//! This module contains the fundamental audio types shared by the playback
//! engine, the audio backends and the instruments: stereo samples, the
//! pre-allocated stereo buffer used on the real-time path, and a few global
//! constants.

/// Fallback sample rate when a backend cannot report one (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Number of MIDI channels addressable by the channel mask
pub const MIDI_CHANNELS: usize = 16;

/// Audio sample type (32-bit float throughout the render path)
pub type Sample = f32;

/// A single stereo sample (left and right channels)
///
/// Uses `#[repr(C)]` to ensure predictable memory layout: [left, right].
/// This enables zero-copy conversion between `&[StereoSample]` and `&[f32]`
/// (interleaved format) using bytemuck, avoiding per-frame format conversions.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    /// Create a new stereo sample
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Create a silent stereo sample
    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Create a mono sample (same value in both channels)
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// Fill a slice of stereo samples with silence
#[inline]
pub fn fill_silence(samples: &mut [StereoSample]) {
    samples.fill(StereoSample::silence());
}

/// Peak amplitude of a block, per channel
pub fn block_peak(samples: &[StereoSample]) -> (Sample, Sample) {
    samples.iter().fold((0.0, 0.0), |(l, r), s| {
        (l.max(s.left.abs()), r.max(s.right.abs()))
    })
}

/// A pre-allocated buffer of stereo samples
///
/// Backends allocate one of these at stream creation with enough capacity for
/// the largest cycle they will ever request, then only change its working
/// length from inside the callback.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); len],
        }
    }

    /// Get the number of stereo samples in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Allocated capacity in stereo samples
    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Fills any newly exposed elements with silence. Use for pre-allocated
    /// buffers only: growing past capacity would allocate.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        let current_len = self.samples.len();
        if new_len > current_len {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.samples.resize(new_len, StereoSample::silence());
        } else {
            self.samples.truncate(new_len);
        }
    }

    /// Get a slice of the samples
    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    /// Get a mutable slice of the samples
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Get a zero-copy view of samples as interleaved f32 [L, R, L, R, ...]
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Copy samples to an output buffer with `channels` interleaved channels
    ///
    /// Left/right go to the first two channels; any additional channels are
    /// filled with silence. A mono output receives the average of both sides.
    pub fn write_frames(&self, output: &mut [Sample], channels: usize) {
        write_frames(&self.samples, output, channels);
    }
}

/// Copy stereo samples into an interleaved device buffer with `channels` channels
pub fn write_frames(samples: &[StereoSample], output: &mut [Sample], channels: usize) {
    if channels == 0 {
        return;
    }
    let mut frames = output.chunks_exact_mut(channels);
    for (i, frame) in frames.by_ref().enumerate() {
        match samples.get(i) {
            Some(sample) if channels == 1 => frame[0] = 0.5 * (sample.left + sample.right),
            Some(sample) => {
                frame[0] = sample.left;
                frame[1] = sample.right;
                // Fill additional channels with silence
                for ch in frame.iter_mut().skip(2) {
                    *ch = 0.0;
                }
            }
            None => frame.fill(0.0),
        }
    }
    frames.into_remainder().fill(0.0);
}
