//! Standard MIDI File playback via midly
//!
//! The whole file is parsed at open time into a single list of channel and
//! SysEx messages, each stamped with its absolute time in seconds (tracks
//! merged, tempo map applied). Rendering then walks that list one cycle at a
//! time and hands due events to the instrument with in-cycle timestamps.

use std::path::Path;

use midly::live::LiveEvent;
use midly::{Format, MetaMessage, Smf, Timing, TrackEventKind};

use lyre_core::engine::{ItemError, ItemMetadata, PlayableItem, RenderContext, RenderStatus};
use lyre_core::MIDI_CHANNELS;

/// Tempo assumed until the first tempo event (120 BPM)
const DEFAULT_TEMPO_US: u32 = 500_000;

/// Header text lines kept for display
const MAX_TEXT_LINES: usize = 32;

/// Controller slots tracked when chasing state after a seek
const CHASE_SLOTS: usize = MIDI_CHANNELS * (128 + 2);

/// One message at its absolute item time
#[derive(Debug, Clone, PartialEq)]
struct TimedEvent {
    time: f64,
    data: Vec<u8>,
}

/// Converts ticks to seconds, following tempo changes
struct TempoClock {
    timing: Timing,
    tempo_us: u32,
    anchor_tick: u64,
    anchor_secs: f64,
}

impl TempoClock {
    fn new(timing: Timing) -> Self {
        Self {
            timing,
            tempo_us: DEFAULT_TEMPO_US,
            anchor_tick: 0,
            anchor_secs: 0.0,
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        let ticks = tick.saturating_sub(self.anchor_tick) as f64;
        let elapsed = match self.timing {
            Timing::Metrical(tpq) => {
                let tpq = tpq.as_int().max(1) as f64;
                ticks * self.tempo_us as f64 / (tpq * 1_000_000.0)
            }
            Timing::Timecode(fps, subframes) => {
                ticks / (fps.as_f32() as f64 * subframes.max(1) as f64)
            }
        };
        self.anchor_secs + elapsed
    }

    fn set_tempo(&mut self, tick: u64, tempo_us: u32) {
        self.anchor_secs = self.seconds_at(tick);
        self.anchor_tick = tick;
        self.tempo_us = tempo_us.max(1);
    }
}

/// A parsed MIDI file being played
pub struct SmfItem {
    events: Vec<TimedEvent>,
    duration: f64,
    /// Item time at the start of the next cycle (seconds)
    time: f64,
    /// Index of the next event to emit
    next: usize,
    /// Controller state to resend before the next cycle (indices into `events`)
    chase: Vec<usize>,
    metadata: ItemMetadata,
}

fn meta_text(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    (!text.is_empty()).then_some(text)
}

impl SmfItem {
    pub fn open(path: &Path) -> Result<Self, ItemError> {
        let bytes = std::fs::read(path).map_err(|e| ItemError::open(path, e))?;
        let smf = Smf::parse(&bytes).map_err(|e| ItemError::open(path, e))?;
        let mut item = Self::from_smf(&smf);
        if item.metadata.name.is_none() {
            item.metadata.name = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        }
        log::debug!(
            "{:?}: {} events, {:.1}s",
            path,
            item.events.len(),
            item.duration
        );
        Ok(item)
    }

    /// Flatten a parsed file into a timed event list
    pub fn from_smf(smf: &Smf<'_>) -> Self {
        let sequential = smf.header.format == Format::Sequential;

        // (tick, track, kind), merged across tracks
        let mut raw = Vec::new();
        let mut end_tick = 0u64;
        let mut offset = 0u64;
        for (track, events) in smf.tracks.iter().enumerate() {
            let mut tick = offset;
            for event in events {
                tick += event.delta.as_int() as u64;
                raw.push((tick, track, event.kind));
            }
            end_tick = end_tick.max(tick);
            if sequential {
                offset = tick;
            }
        }
        // Stable: simultaneous events keep track order
        raw.sort_by_key(|(tick, _, _)| *tick);

        let mut metadata = ItemMetadata {
            format: Some(format!(
                "SMF type {}",
                match smf.header.format {
                    Format::SingleTrack => 0,
                    Format::Parallel => 1,
                    Format::Sequential => 2,
                }
            )),
            track_count: Some(smf.tracks.len() as u32),
            ..ItemMetadata::default()
        };

        let mut clock = TempoClock::new(smf.header.timing);
        let mut events = Vec::with_capacity(raw.len());
        for (tick, track, kind) in raw {
            let time = clock.seconds_at(tick);
            match kind {
                TrackEventKind::Midi { channel, message } => {
                    let mut data = Vec::with_capacity(3);
                    if (LiveEvent::Midi { channel, message }).write_std(&mut data).is_ok() {
                        events.push(TimedEvent { time, data });
                    }
                }
                TrackEventKind::SysEx(bytes) => {
                    let mut data = Vec::with_capacity(bytes.len() + 1);
                    data.push(0xF0);
                    data.extend_from_slice(bytes);
                    events.push(TimedEvent { time, data });
                }
                TrackEventKind::Escape(_) => {}
                TrackEventKind::Meta(meta) => match meta {
                    MetaMessage::Tempo(tempo) => clock.set_tempo(tick, tempo.as_int()),
                    MetaMessage::TrackName(name) if track == 0 && metadata.name.is_none() => {
                        metadata.name = meta_text(name);
                    }
                    MetaMessage::Copyright(text) if metadata.author.is_none() => {
                        metadata.author = meta_text(text);
                    }
                    // Only header text; later text events are usually lyrics
                    MetaMessage::Text(text)
                        if events.is_empty() && metadata.text.len() < MAX_TEXT_LINES =>
                    {
                        metadata.text.extend(meta_text(text));
                    }
                    _ => {}
                },
            }
        }

        Self {
            events,
            duration: clock.seconds_at(end_tick),
            time: 0.0,
            next: 0,
            chase: Vec::with_capacity(CHASE_SLOTS),
            metadata,
        }
    }

    /// Collect the latest controller, program and pitch bend per channel
    /// before `self.next`
    fn collect_chase(&mut self) {
        self.chase.clear();
        let mut seen = [false; CHASE_SLOTS];
        for index in (0..self.next).rev() {
            let data = &self.events[index].data;
            let (Some(&status), Some(&first)) = (data.first(), data.get(1)) else {
                continue;
            };
            let channel = (status & 0x0F) as usize;
            let slot = match status & 0xF0 {
                0xB0 => channel * 130 + (first & 0x7F) as usize,
                0xC0 => channel * 130 + 128,
                0xE0 => channel * 130 + 129,
                _ => continue,
            };
            if !seen[slot] {
                seen[slot] = true;
                self.chase.push(index);
            }
        }
        self.chase.reverse();
    }
}

impl PlayableItem for SmfItem {
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<RenderStatus, ItemError> {
        let frames = ctx.frames();
        let speed = ctx.speed.max(f64::EPSILON);

        for &index in &self.chase {
            ctx.events.send(&self.events[index].data, 0.0);
        }
        self.chase.clear();

        let start = self.time;
        let end = start + ctx.cycle_secs() * speed;
        while let Some(event) = self.events.get(self.next) {
            if event.time >= end {
                break;
            }
            ctx.events.send(&event.data, (event.time - start).max(0.0) / speed);
            self.next += 1;
        }
        self.time = end;

        if self.next >= self.events.len() && end >= self.duration {
            let remaining = (self.duration - start).max(0.0) / speed * ctx.sample_rate as f64;
            self.time = self.duration;
            return Ok(RenderStatus::EndOfItem((remaining.ceil() as usize).min(frames)));
        }
        Ok(RenderStatus::Rendered(frames))
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn position(&self) -> f64 {
        self.time.min(self.duration)
    }

    fn seek(&mut self, time: f64) -> Result<(), ItemError> {
        self.time = time.clamp(0.0, self.duration);
        self.next = self.events.partition_point(|e| e.time < self.time);
        self.collect_chase();
        Ok(())
    }

    fn metadata(&self) -> &ItemMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_core::instrument::EventSink;
    use lyre_core::StereoSample;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Header, MidiMessage, TrackEvent};

    #[derive(Default)]
    struct Recorder {
        events: Vec<(Vec<u8>, f64)>,
    }

    impl EventSink for Recorder {
        fn send(&mut self, data: &[u8], timestamp: f64) {
            self.events.push((data.to_vec(), timestamp));
        }
    }

    fn ev(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn midi(channel: u8, message: MidiMessage) -> TrackEventKind<'static> {
        TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        }
    }

    fn note_on(key: u8) -> TrackEventKind<'static> {
        midi(0, MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(100) })
    }

    fn note_off(key: u8) -> TrackEventKind<'static> {
        midi(0, MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) })
    }

    fn meta(message: MetaMessage<'static>) -> TrackEventKind<'static> {
        TrackEventKind::Meta(message)
    }

    /// 480 tpq; note at 0.0s, off at 0.5s, tempo doubles, note at 0.75s, end at 1.0s
    fn song() -> Smf<'static> {
        let track = vec![
            ev(0, meta(MetaMessage::Tempo(u24::new(500_000)))),
            ev(0, meta(MetaMessage::TrackName(b"Test Song"))),
            ev(0, meta(MetaMessage::Copyright(b"Someone"))),
            ev(0, meta(MetaMessage::Text(b"hello"))),
            ev(0, midi(0, MidiMessage::Controller { controller: u7::new(7), value: u7::new(50) })),
            ev(0, midi(0, MidiMessage::Controller { controller: u7::new(7), value: u7::new(90) })),
            ev(0, midi(1, MidiMessage::ProgramChange { program: u7::new(24) })),
            ev(0, note_on(60)),
            ev(480, note_off(60)),
            ev(0, meta(MetaMessage::Tempo(u24::new(250_000)))),
            ev(0, meta(MetaMessage::Text(b"la la la"))),
            ev(480, note_on(64)),
            ev(480, meta(MetaMessage::EndOfTrack)),
        ];
        Smf {
            header: Header::new(Format::Parallel, Timing::Metrical(u15::new(480))),
            tracks: vec![track],
        }
    }

    fn render(item: &mut SmfItem, frames: usize, speed: f64) -> (Recorder, RenderStatus) {
        let mut out = vec![StereoSample::silence(); frames];
        let mut recorder = Recorder::default();
        let mut ctx = RenderContext {
            out: &mut out,
            sample_rate: 1000,
            speed,
            events: &mut recorder,
        };
        let status = item.render(&mut ctx).unwrap();
        (recorder, status)
    }

    #[test]
    fn test_tempo_map_and_metadata() {
        let item = SmfItem::from_smf(&song());
        assert_eq!(item.duration(), 1.0);

        let meta = item.metadata();
        assert_eq!(meta.format.as_deref(), Some("SMF type 1"));
        assert_eq!(meta.track_count, Some(1));
        assert_eq!(meta.name.as_deref(), Some("Test Song"));
        assert_eq!(meta.author.as_deref(), Some("Someone"));
        assert_eq!(meta.text, vec!["hello".to_string()]);

        let times: Vec<f64> = item.events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.75]);
    }

    #[test]
    fn test_events_land_in_their_cycle() {
        let mut item = SmfItem::from_smf(&song());

        let (first, status) = render(&mut item, 250, 1.0);
        assert_eq!(status, RenderStatus::Rendered(250));
        assert_eq!(first.events.len(), 4);
        assert_eq!(first.events[3], (vec![0x90, 60, 100], 0.0));

        let (second, _) = render(&mut item, 250, 1.0);
        assert!(second.events.is_empty());

        let (third, _) = render(&mut item, 250, 1.0);
        assert_eq!(third.events, vec![(vec![0x80, 60, 0], 0.0)]);

        let (fourth, status) = render(&mut item, 250, 1.0);
        assert_eq!(fourth.events, vec![(vec![0x90, 64, 100], 0.0)]);
        assert_eq!(status, RenderStatus::EndOfItem(250));
        assert_eq!(item.position(), 1.0);
    }

    #[test]
    fn test_speed_scales_timestamps() {
        let mut item = SmfItem::from_smf(&song());
        render(&mut item, 250, 2.0);

        let (second, status) = render(&mut item, 250, 2.0);
        assert_eq!(
            second.events,
            vec![(vec![0x80, 60, 0], 0.0), (vec![0x90, 64, 100], 0.125)]
        );
        assert_eq!(status, RenderStatus::EndOfItem(250));
    }

    #[test]
    fn test_seek_chases_controllers() {
        let mut item = SmfItem::from_smf(&song());
        item.seek(0.6).unwrap();
        assert_eq!(item.position(), 0.6);

        let (recorder, _) = render(&mut item, 250, 1.0);
        let data: Vec<Vec<u8>> = recorder.events.iter().map(|(d, _)| d.clone()).collect();
        // Latest volume only, then program, then the note at 0.75s
        assert_eq!(
            data,
            vec![vec![0xB0, 7, 90], vec![0xC1, 24], vec![0x90, 64, 100]]
        );
        assert!((recorder.events[2].1 - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_sequential_tracks_play_one_after_another() {
        let track = || vec![ev(0, note_on(60)), ev(480, note_off(60))];
        let smf = Smf {
            header: Header::new(Format::Sequential, Timing::Metrical(u15::new(480))),
            tracks: vec![track(), track()],
        };
        let item = SmfItem::from_smf(&smf);
        let times: Vec<f64> = item.events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 0.5, 0.5, 1.0]);
        assert_eq!(item.duration(), 1.0);
    }

    #[test]
    fn test_empty_file_ends_immediately() {
        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(96))),
            tracks: vec![vec![ev(0, meta(MetaMessage::EndOfTrack))]],
        };
        let mut item = SmfItem::from_smf(&smf);
        let (_, status) = render(&mut item, 100, 1.0);
        assert_eq!(status, RenderStatus::EndOfItem(0));
    }

    #[test]
    fn test_open_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mid");
        song().save(&path).unwrap();

        let item = SmfItem::open(&path).unwrap();
        assert_eq!(item.duration(), 1.0);
        assert_eq!(item.metadata().name.as_deref(), Some("Test Song"));

        std::fs::write(&path, b"MThd garbage").unwrap();
        assert!(matches!(SmfItem::open(&path), Err(ItemError::Open { .. })));
    }
}
