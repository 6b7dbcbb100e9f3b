//! WAV playback via hound
//!
//! Samples are streamed from disk a frame at a time and resampled to the
//! output rate by linear interpolation. Playback speed folds into the same
//! step, so faster playback also raises pitch.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec};

use lyre_core::engine::{ItemError, ItemMetadata, PlayableItem, RenderContext, RenderStatus};
use lyre_core::StereoSample;

/// A WAV file being played
pub struct WavItem {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    total_frames: u64,
    /// Scale from integer samples to [-1.0, 1.0]
    int_scale: f32,
    /// Source frame held in `a`
    frame: u64,
    /// Fractional position between `a` and `b`
    frac: f64,
    a: StereoSample,
    b: StereoSample,
    metadata: ItemMetadata,
}

impl WavItem {
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self, ItemError> {
        let reader = WavReader::open(path).map_err(|e| ItemError::open(path, e))?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(ItemError::open(path, "invalid WAV header"));
        }

        let kind = match spec.sample_format {
            SampleFormat::Int => "int",
            SampleFormat::Float => "float",
        };
        let metadata = ItemMetadata {
            format: Some(format!(
                "WAV {}-bit {}, {}ch, {}Hz",
                spec.bits_per_sample, kind, spec.channels, spec.sample_rate
            )),
            track_count: None,
            author: None,
            name: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
            text: Vec::new(),
        };

        if spec.sample_rate != sample_rate {
            log::debug!(
                "{:?}: resampling {}Hz to {}Hz",
                path,
                spec.sample_rate,
                sample_rate
            );
        }

        let total_frames = reader.duration() as u64;
        let mut item = Self {
            reader,
            spec,
            total_frames,
            int_scale: 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32,
            frame: 0,
            frac: 0.0,
            a: StereoSample::silence(),
            b: StereoSample::silence(),
            metadata,
        };
        item.load_pair().map_err(|e| ItemError::open(path, e))?;
        Ok(item)
    }

    fn next_sample(&mut self) -> Result<Option<f32>, ItemError> {
        let scale = self.int_scale;
        let sample = match self.spec.sample_format {
            SampleFormat::Float => self.reader.samples::<f32>().next(),
            SampleFormat::Int => self
                .reader
                .samples::<i32>()
                .next()
                .map(|s| s.map(|v| v as f32 * scale)),
        };
        sample
            .transpose()
            .map_err(|e| ItemError::Render(e.to_string()))
    }

    /// Next interleaved frame, folded to stereo; `None` past the end
    fn read_frame(&mut self) -> Result<Option<StereoSample>, ItemError> {
        let channels = self.spec.channels as usize;
        let mut frame = StereoSample::silence();
        for ch in 0..channels {
            let Some(value) = self.next_sample()? else {
                return Ok(None);
            };
            match ch {
                0 => frame.left = value,
                1 => frame.right = value,
                _ => {}
            }
        }
        if channels == 1 {
            frame.right = frame.left;
        }
        Ok(Some(frame))
    }

    /// Reload `a` and `b` from the reader's current position
    fn load_pair(&mut self) -> Result<(), ItemError> {
        self.a = self.read_frame()?.unwrap_or_default();
        self.b = self.read_frame()?.unwrap_or_default();
        Ok(())
    }

    fn advance(&mut self) -> Result<(), ItemError> {
        self.a = self.b;
        self.frame += 1;
        self.b = self.read_frame()?.unwrap_or_default();
        Ok(())
    }

    fn finished(&self) -> bool {
        self.frame >= self.total_frames
    }
}

impl PlayableItem for WavItem {
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<RenderStatus, ItemError> {
        if ctx.sample_rate == 0 {
            return Ok(RenderStatus::Rendered(0));
        }
        let step = ctx.speed * self.spec.sample_rate as f64 / ctx.sample_rate as f64;
        let frames = ctx.frames();

        for i in 0..frames {
            if self.finished() {
                return Ok(RenderStatus::EndOfItem(i));
            }
            let t = self.frac as f32;
            ctx.out[i] += self.a * (1.0 - t) + self.b * t;

            self.frac += step;
            while self.frac >= 1.0 {
                self.advance()?;
                self.frac -= 1.0;
            }
        }

        if self.finished() {
            Ok(RenderStatus::EndOfItem(frames))
        } else {
            Ok(RenderStatus::Rendered(frames))
        }
    }

    fn duration(&self) -> f64 {
        self.total_frames as f64 / self.spec.sample_rate as f64
    }

    fn position(&self) -> f64 {
        let frames = (self.frame as f64 + self.frac).min(self.total_frames as f64);
        frames / self.spec.sample_rate as f64
    }

    fn seek(&mut self, time: f64) -> Result<(), ItemError> {
        let target = ((time.max(0.0) * self.spec.sample_rate as f64) as u64).min(self.total_frames);
        let target = u32::try_from(target).map_err(|e| ItemError::Seek(e.to_string()))?;
        self.reader
            .seek(target)
            .map_err(|e| ItemError::Seek(e.to_string()))?;
        self.frame = target as u64;
        self.frac = 0.0;
        self.load_pair()
    }

    fn metadata(&self) -> &ItemMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_core::instrument::EventSink;
    use std::path::PathBuf;

    struct NullSink;

    impl EventSink for NullSink {
        fn send(&mut self, _data: &[u8], _timestamp: f64) {}
    }

    fn write_wav(dir: &Path, name: &str, spec: WavSpec, frames: &[(f32, f32)]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for &(l, r) in frames {
            match spec.sample_format {
                SampleFormat::Int => {
                    writer.write_sample((l * 32768.0) as i16).unwrap();
                    if spec.channels == 2 {
                        writer.write_sample((r * 32768.0) as i16).unwrap();
                    }
                }
                SampleFormat::Float => {
                    writer.write_sample(l).unwrap();
                    if spec.channels == 2 {
                        writer.write_sample(r).unwrap();
                    }
                }
            }
        }
        writer.finalize().unwrap();
        path
    }

    fn mono16(rate: u32) -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    fn render(item: &mut WavItem, frames: usize, rate: u32, speed: f64) -> (Vec<StereoSample>, RenderStatus) {
        let mut out = vec![StereoSample::silence(); frames];
        let mut sink = NullSink;
        let mut ctx = RenderContext {
            out: &mut out,
            sample_rate: rate,
            speed,
            events: &mut sink,
        };
        let status = item.render(&mut ctx).unwrap();
        (out, status)
    }

    #[test]
    fn test_mono_plays_on_both_channels_to_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "half.wav", mono16(1000), &[(0.5, 0.0); 300]);

        let mut item = WavItem::open(&path, 1000).unwrap();
        assert!((item.duration() - 0.3).abs() < 1e-9);
        assert_eq!(item.metadata().name.as_deref(), Some("half"));
        assert_eq!(item.metadata().format.as_deref(), Some("WAV 16-bit int, 1ch, 1000Hz"));

        let (out, status) = render(&mut item, 200, 1000, 1.0);
        assert_eq!(status, RenderStatus::Rendered(200));
        assert!(out.iter().all(|s| (s.left - 0.5).abs() < 1e-3 && (s.right - 0.5).abs() < 1e-3));
        assert!((item.position() - 0.2).abs() < 1e-9);

        let (_, status) = render(&mut item, 200, 1000, 1.0);
        assert_eq!(status, RenderStatus::EndOfItem(100));
    }

    #[test]
    fn test_speed_and_rate_fold_into_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "ramp.wav", mono16(2000), &[(0.25, 0.0); 400]);

        // 2kHz source at 1kHz output, double speed: 4 source frames per output frame
        let mut item = WavItem::open(&path, 1000).unwrap();
        let (_, status) = render(&mut item, 200, 1000, 2.0);
        assert_eq!(status, RenderStatus::EndOfItem(100));
    }

    #[test]
    fn test_interpolates_between_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frames = [(0.0, 0.0), (0.5, 0.0), (0.5, 0.0), (0.5, 0.0)];
        let path = write_wav(dir.path(), "step.wav", mono16(1000), &frames);

        // Half speed: every other output frame falls between two source frames
        let mut item = WavItem::open(&path, 1000).unwrap();
        let (out, _) = render(&mut item, 3, 1000, 0.5);
        assert!(out[0].left.abs() < 1e-3);
        assert!((out[1].left - 0.25).abs() < 1e-3);
        assert!((out[2].left - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_stereo_float_keeps_channels() {
        let dir = tempfile::tempdir().unwrap();
        let spec = WavSpec {
            channels: 2,
            sample_rate: 1000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let path = write_wav(dir.path(), "lr.wav", spec, &[(0.75, -0.25); 50]);

        let mut item = WavItem::open(&path, 1000).unwrap();
        let (out, _) = render(&mut item, 10, 1000, 1.0);
        assert!(out.iter().all(|s| s.left == 0.75 && s.right == -0.25));
    }

    #[test]
    fn test_seek_repositions_reader() {
        let dir = tempfile::tempdir().unwrap();
        let mut frames = vec![(0.0, 0.0); 100];
        frames.extend(vec![(0.5, 0.0); 100]);
        let path = write_wav(dir.path(), "two.wav", mono16(1000), &frames);

        let mut item = WavItem::open(&path, 1000).unwrap();
        item.seek(0.15).unwrap();
        assert!((item.position() - 0.15).abs() < 1e-9);
        let (out, status) = render(&mut item, 10, 1000, 1.0);
        assert_eq!(status, RenderStatus::Rendered(10));
        assert!(out.iter().all(|s| (s.left - 0.5).abs() < 1e-3));

        item.seek(item.duration()).unwrap();
        let (_, status) = render(&mut item, 10, 1000, 1.0);
        assert_eq!(status, RenderStatus::EndOfItem(0));
    }

    #[test]
    fn test_garbage_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.wav");
        std::fs::write(&path, b"definitely not RIFF").unwrap();
        assert!(matches!(WavItem::open(&path, 1000), Err(ItemError::Open { .. })));
    }
}
