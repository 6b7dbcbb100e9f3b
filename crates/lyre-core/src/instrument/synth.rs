//! In-process polyphonic oscillator synth
//!
//! A deliberately small General-MIDI-ish voice engine so playback has sound
//! without any external MIDI device. Events are queued with their in-cycle
//! frame offset and applied sample-accurately during `render()`.
//!
//! Handled messages: note on/off, CC7 volume, CC11 expression, CC120 all
//! sound off, CC121 reset controllers, CC123 all notes off, pitch bend.
//! Channel 10 (percussion) is not voiced.

use std::f32::consts::TAU;

use midly::live::LiveEvent;
use midly::MidiMessage;

use super::{EventFlags, Instrument, InstrumentError, InstrumentFactory, InstrumentKind, InstrumentResult, OutputInfo};
use crate::types::{StereoSample, DEFAULT_SAMPLE_RATE, MIDI_CHANNELS};

/// Simultaneous voices before stealing
const MAX_VOICES: usize = 32;

/// Events queued per cycle before new ones are dropped
const EVENT_QUEUE_CAPACITY: usize = 1024;

const ATTACK_SECS: f32 = 0.005;
const RELEASE_SECS: f32 = 0.12;
const PITCH_BEND_RANGE: f32 = 2.0;
const PERCUSSION_CHANNEL: usize = 9;

/// Master scale so a handful of full-velocity voices stay below 0dBFS
const OUTPUT_GAIN: f32 = 0.15;

/// Oscillator waveform, selected as the synth's output target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynthPreset {
    #[default]
    Sine,
    Square,
    Saw,
    Triangle,
}

impl SynthPreset {
    pub const ALL: [SynthPreset; 4] = [
        SynthPreset::Sine,
        SynthPreset::Square,
        SynthPreset::Saw,
        SynthPreset::Triangle,
    ];

    /// Target ID used with [`Instrument::open`]
    pub fn id(&self) -> &'static str {
        match self {
            SynthPreset::Sine => "sine",
            SynthPreset::Square => "square",
            SynthPreset::Saw => "saw",
            SynthPreset::Triangle => "triangle",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SynthPreset::Sine => "Synth: Sine",
            SynthPreset::Square => "Synth: Square",
            SynthPreset::Saw => "Synth: Sawtooth",
            SynthPreset::Triangle => "Synth: Triangle",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    /// One sample of the waveform at `phase` in [0, 1)
    #[inline]
    fn sample(&self, phase: f32) -> f32 {
        match self {
            SynthPreset::Sine => (phase * TAU).sin(),
            SynthPreset::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            SynthPreset::Saw => 2.0 * phase - 1.0,
            SynthPreset::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// A channel message waiting for its frame
#[derive(Debug, Clone, Copy)]
struct QueuedEvent {
    frame: u32,
    len: u8,
    data: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EnvelopeStage {
    Attack,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    channel: u8,
    key: u8,
    velocity: f32,
    phase: f32,
    envelope: f32,
    stage: EnvelopeStage,
    /// Allocation order, for stealing the oldest voice
    age: u64,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    volume: f32,
    expression: f32,
    /// Current bend in semitones
    bend: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            volume: 100.0 / 127.0,
            expression: 1.0,
            bend: 0.0,
        }
    }
}

/// Oscillator synth instrument
pub struct SynthInstrument {
    preset: Option<SynthPreset>,
    sample_rate: u32,
    voices: [Option<Voice>; MAX_VOICES],
    channels: [ChannelState; MIDI_CHANNELS],
    next_age: u64,
    event_tx: rtrb::Producer<QueuedEvent>,
    event_rx: rtrb::Consumer<QueuedEvent>,
}

impl SynthInstrument {
    pub fn new() -> Self {
        let (event_tx, event_rx) = rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY);
        Self {
            preset: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            voices: [None; MAX_VOICES],
            channels: [ChannelState::default(); MIDI_CHANNELS],
            next_age: 0,
            event_tx,
            event_rx,
        }
    }

    /// Number of voices currently sounding
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }

    fn reset(&mut self) {
        self.voices = [None; MAX_VOICES];
        self.channels = [ChannelState::default(); MIDI_CHANNELS];
        while self.event_rx.pop().is_ok() {}
    }

    fn apply(&mut self, data: &[u8]) {
        let Ok(LiveEvent::Midi { channel, message }) = LiveEvent::parse(data) else {
            return;
        };
        let ch = channel.as_int() as usize;
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                self.note_on(ch, key.as_int(), vel.as_int())
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                self.note_off(ch, key.as_int())
            }
            MidiMessage::Controller { controller, value } => {
                let value = value.as_int();
                match controller.as_int() {
                    7 => self.channels[ch].volume = value as f32 / 127.0,
                    11 => self.channels[ch].expression = value as f32 / 127.0,
                    120 => self.voices.iter_mut().for_each(|slot| {
                        if slot.is_some_and(|v| v.channel as usize == ch) {
                            *slot = None;
                        }
                    }),
                    121 => {
                        self.channels[ch].expression = 1.0;
                        self.channels[ch].bend = 0.0;
                    }
                    123 => self.release_channel(ch),
                    _ => {}
                }
            }
            MidiMessage::PitchBend { bend } => {
                self.channels[ch].bend = bend.as_f32() * PITCH_BEND_RANGE;
            }
            _ => {}
        }
    }

    fn note_on(&mut self, channel: usize, key: u8, velocity: u8) {
        if channel == PERCUSSION_CHANNEL {
            return;
        }
        let voice = Voice {
            channel: channel as u8,
            key,
            velocity: velocity as f32 / 127.0,
            phase: 0.0,
            envelope: 0.0,
            stage: EnvelopeStage::Attack,
            age: self.next_age,
        };
        self.next_age += 1;

        let slot = match self.voices.iter().position(|v| v.is_none()) {
            Some(free) => free,
            None => self
                .voices
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.map(|v| v.age).unwrap_or(0))
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        self.voices[slot] = Some(voice);
    }

    fn note_off(&mut self, channel: usize, key: u8) {
        for voice in self.voices.iter_mut().flatten() {
            if voice.channel as usize == channel && voice.key == key {
                voice.stage = EnvelopeStage::Release;
            }
        }
    }

    fn release_channel(&mut self, channel: usize) {
        for voice in self.voices.iter_mut().flatten() {
            if voice.channel as usize == channel {
                voice.stage = EnvelopeStage::Release;
            }
        }
    }

    /// Mix all voices into a single frame
    #[inline]
    fn next_frame(&mut self, preset: SynthPreset) -> f32 {
        let sr = self.sample_rate as f32;
        let attack_step = 1.0 / (ATTACK_SECS * sr);
        let release_step = 1.0 / (RELEASE_SECS * sr);
        let mut mix = 0.0;

        for slot in self.voices.iter_mut() {
            let Some(voice) = slot.as_mut() else { continue };
            let state = self.channels[voice.channel as usize];

            match voice.stage {
                EnvelopeStage::Attack => {
                    voice.envelope += attack_step;
                    if voice.envelope >= 1.0 {
                        voice.envelope = 1.0;
                        voice.stage = EnvelopeStage::Sustain;
                    }
                }
                EnvelopeStage::Sustain => {}
                EnvelopeStage::Release => {
                    voice.envelope -= release_step;
                    if voice.envelope <= 0.0 {
                        *slot = None;
                        continue;
                    }
                }
            }

            let semitones = voice.key as f32 - 69.0 + state.bend;
            let freq = 440.0 * (semitones / 12.0).exp2();
            mix += preset.sample(voice.phase) * voice.envelope * voice.velocity * state.volume * state.expression;

            voice.phase += freq / sr;
            voice.phase -= voice.phase.floor();
        }

        mix * OUTPUT_GAIN
    }
}

impl Default for SynthInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrument for SynthInstrument {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::Synth
    }

    fn open(&mut self, target_id: &str) -> InstrumentResult<()> {
        let preset = SynthPreset::from_id(target_id)
            .ok_or_else(|| InstrumentError::OutputUnavailable(format!("unknown synth preset '{}'", target_id)))?;
        self.reset();
        self.preset = Some(preset);
        log::info!("Synth opened with preset '{}'", preset.id());
        Ok(())
    }

    fn close(&mut self) {
        if self.preset.take().is_some() {
            self.reset();
            log::info!("Synth closed");
        }
    }

    fn is_open(&self) -> bool {
        self.preset.is_some()
    }

    fn target_id(&self) -> Option<&str> {
        self.preset.as_ref().map(|p| p.id())
    }

    fn prepare(&mut self, sample_rate: u32) {
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
    }

    fn send_event(&mut self, data: &[u8], timestamp: f64, flags: EventFlags) {
        if self.preset.is_none() || data.is_empty() || data.len() > 3 {
            return;
        }
        let frame = if flags.contains(EventFlags::PANIC) {
            0
        } else {
            (timestamp.max(0.0) * self.sample_rate as f64) as u32
        };
        let mut event = QueuedEvent {
            frame,
            len: data.len() as u8,
            data: [0; 3],
        };
        event.data[..data.len()].copy_from_slice(data);

        if self.event_tx.push(event).is_err() {
            log::trace!("Synth event queue full, dropping event");
        }
    }

    fn render(&mut self, out: &mut [StereoSample]) {
        let Some(preset) = self.preset else { return };

        for (i, frame) in out.iter_mut().enumerate() {
            while let Ok(event) = self.event_rx.peek() {
                if event.frame as usize > i {
                    break;
                }
                let event = *event;
                let _ = self.event_rx.pop();
                self.apply(&event.data[..event.len as usize]);
            }
            *frame += StereoSample::mono(self.next_frame(preset));
        }

        // Events stamped past the end of this cycle land on its last frame
        while let Ok(event) = self.event_rx.pop() {
            self.apply(&event.data[..event.len as usize]);
        }
    }
}

/// Factory for [`SynthInstrument`]; every preset is a target
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthFactory;

impl InstrumentFactory for SynthFactory {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::Synth
    }

    fn list_targets(&self) -> Vec<OutputInfo> {
        SynthPreset::ALL
            .iter()
            .map(|p| OutputInfo::new(p.id(), p.display_name()))
            .collect()
    }

    fn create(&self) -> Box<dyn Instrument> {
        Box::new(SynthInstrument::new())
    }
}
