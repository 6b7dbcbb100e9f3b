//! The player: per-cycle state machine and scheduler
//!
//! Exactly one real-time context calls [`Player::process`] once per audio
//! cycle. Each call:
//!
//! 1. Drains the command queue without blocking (a contended queue defers
//!    every command to the next cycle)
//! 2. Applies the drained commands in submission order
//! 3. Renders the current item through the channel filter, then the
//!    instrument's own audio, the FX stage and the volume ramp
//! 4. Advances the playlist when the item ends or fails
//! 5. Publishes a state snapshot at the configured rate
//!
//! ```text
//!            Play / Next              Pause(Toggle|Pause)
//!  Stopped ───────────────▶ Playing ─────────────────────▶ Paused
//!     ▲                      │  ▲                            │
//!     │  Stop / end of list  │  └──────── Pause(Toggle|Resume)
//!     └──────────────────────┘◀──────────── Stop ────────────┘
//!
//!  any state ── Shutdown ──▶ ShutDown (terminal)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::command::{PauseMode, PlayerCommand};
use super::event::{EventSender, PlayerEvent};
use super::fx::FxStage;
use super::item::{
    ItemDescriptor, ItemError, ItemOpener, PlayableItem, RenderContext, RenderStatus,
};
use super::playlist::Playlist;
use super::queue::CommandQueue;
use super::state::{ActiveOutput, PlayerState, StatePublisher};
use super::transport::{PlaybackStatus, TransportState, VolumeRamp};
use crate::audio::{NegotiatedConfig, TransportLimits};
use crate::config::PlayerConfig;
use crate::instrument::{
    all_notes_off, channel_notes_off, ChannelFilter, ChannelMeters, Instrument, InstrumentError,
    Instruments, OutputSelection,
};
use crate::types::{block_peak, fill_silence, StereoSample, DEFAULT_SAMPLE_RATE};

/// Most commands applied in one cycle; the rest wait for the next one
const PENDING_CAPACITY: usize = 64;

/// Minimum time between two overrun warnings
const OVERRUN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the player shares with its controllers
#[derive(Clone)]
pub struct PlayerShared {
    pub queue: Arc<CommandQueue>,
    pub publisher: Arc<StatePublisher>,
    pub(crate) events: EventSender,
}

/// Playback state machine, owned by the audio callback
pub struct Player {
    shared: PlayerShared,
    opener: Arc<dyn ItemOpener>,
    instruments: Instruments,
    instrument: Option<Box<dyn Instrument>>,

    limits: TransportLimits,
    sample_rate: u32,
    transport: TransportState,
    playlist: Playlist,
    item: Option<Box<dyn PlayableItem>>,
    /// Items failed since the last one that played to its end
    failed_in_pass: usize,

    fx: FxStage,
    ramp: VolumeRamp,
    meters: ChannelMeters,

    /// Working copy of the snapshot, filled field by field
    state: PlayerState,
    /// Reused drain buffer
    pending: Vec<PlayerCommand>,

    publish_interval: usize,
    frames_since_publish: usize,
    publish_forced: bool,
    peak_window: [f32; 2],

    max_consecutive_overruns: u32,
    consecutive_overruns: u32,
    last_overrun_log: Option<Instant>,
}

impl Player {
    /// Create a stopped player
    ///
    /// Allocates all cycle-independent buffers for `sample_rate`; call
    /// [`Player::configure`] once the device has negotiated the real one.
    pub fn new(
        config: &PlayerConfig,
        limits: TransportLimits,
        shared: PlayerShared,
        opener: Arc<dyn ItemOpener>,
        instruments: Instruments,
    ) -> Self {
        let sample_rate = config.audio.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let transport = TransportState::new(config.repeat, config.speed, config.volume, &limits);
        let fx = FxStage::new(sample_rate);

        let mut state = PlayerState::default();
        state.repeat = transport.repeat;
        state.speed = transport.speed();
        state.volume = transport.volume();
        state.fx = fx.values();
        state.sample_rate = sample_rate;

        Self {
            shared,
            opener,
            instruments,
            instrument: None,
            limits,
            sample_rate,
            ramp: VolumeRamp::new(transport.volume()),
            transport,
            playlist: Playlist::default(),
            item: None,
            failed_in_pass: 0,
            fx,
            meters: ChannelMeters::default(),
            state,
            pending: Vec::with_capacity(PENDING_CAPACITY),
            publish_interval: config.publish_interval_frames(sample_rate),
            frames_since_publish: 0,
            publish_forced: true,
            peak_window: [0.0; 2],
            max_consecutive_overruns: config.max_consecutive_overruns,
            consecutive_overruns: 0,
            last_overrun_log: None,
        }
    }

    /// Adopt the negotiated stream parameters
    ///
    /// Must run before the device starts; reallocates the FX delay line when
    /// the rate changed.
    pub fn configure(&mut self, negotiated: &NegotiatedConfig, config: &PlayerConfig) {
        if negotiated.sample_rate != self.sample_rate {
            let values = self.fx.values();
            self.fx = FxStage::new(negotiated.sample_rate);
            for (index, value) in values.iter().enumerate() {
                self.fx.set_parameter(index, *value);
            }
        }
        self.sample_rate = negotiated.sample_rate;
        self.publish_interval = config.publish_interval_frames(self.sample_rate);
        self.state.sample_rate = self.sample_rate;
        if let Some(instrument) = self.instrument.as_mut() {
            instrument.prepare(self.sample_rate);
        }
    }

    /// Open the startup output, if one is configured
    pub fn open_initial_output(&mut self) {
        if let Some(selection) = self.instruments.initial.clone() {
            self.select_output(&selection);
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.transport.status
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Transport limits the player clamps against
    pub fn limits(&self) -> TransportLimits {
        self.limits
    }

    // ─────────────────────────────────────────────────────────────
    // Audio cycle
    // ─────────────────────────────────────────────────────────────

    /// Run one audio cycle into `out`
    pub fn process(&mut self, out: &mut [StereoSample]) {
        let started = Instant::now();

        if self.transport.status == PlaybackStatus::ShutDown {
            self.discard_late_commands();
            fill_silence(out);
            return;
        }

        self.drain_commands();

        fill_silence(out);
        if self.transport.status == PlaybackStatus::ShutDown {
            return;
        }

        let rendering = self.transport.status == PlaybackStatus::Playing && self.item.is_some();
        if rendering {
            self.render_item(out);
        }
        if let Some(instrument) = self.instrument.as_mut() {
            instrument.render(out);
        }
        self.fx.process(out);
        self.ramp.apply(out, self.transport.volume());

        self.meters.decay(out.len(), self.sample_rate);
        let (left, right) = block_peak(out);
        self.peak_window[0] = self.peak_window[0].max(left);
        self.peak_window[1] = self.peak_window[1].max(right);

        self.frames_since_publish += out.len();
        if self.publish_forced || self.frames_since_publish >= self.publish_interval {
            self.try_publish();
        }

        self.check_cycle_budget(started, out.len(), rendering);
    }

    fn drain_commands(&mut self) {
        if !self
            .shared
            .queue
            .try_drain_into(&mut self.pending, PENDING_CAPACITY)
        {
            log::trace!("command queue busy, deferring to next cycle");
            return;
        }
        if self.pending.is_empty() {
            return;
        }

        let mut commands = std::mem::take(&mut self.pending);
        for command in commands.drain(..) {
            if self.transport.status == PlaybackStatus::ShutDown {
                log::debug!("ignoring {} after shutdown", command.name());
                continue;
            }
            self.apply(command);
        }
        self.pending = commands;
    }

    /// Drop commands that slipped in before the queue closed
    ///
    /// Dropping a blocking command's reply wakes its submitter with an error.
    fn discard_late_commands(&mut self) {
        if self
            .shared
            .queue
            .try_drain_into(&mut self.pending, PENDING_CAPACITY)
        {
            for command in self.pending.drain(..) {
                log::debug!("ignoring {} after shutdown", command.name());
            }
        }
    }

    fn render_item(&mut self, out: &mut [StereoSample]) {
        let Some(item) = self.item.as_mut() else {
            return;
        };

        let result = {
            let mut filter = ChannelFilter::new(
                self.instrument.as_deref_mut(),
                self.transport.channels,
                &mut self.meters,
            );
            let mut ctx = RenderContext {
                out,
                sample_rate: self.sample_rate,
                speed: self.transport.speed(),
                events: &mut filter,
            };
            item.render(&mut ctx)
        };

        match result {
            Ok(RenderStatus::Rendered(_)) => {}
            Ok(RenderStatus::EndOfItem(_)) => self.on_item_finished(),
            Err(e) => self.on_item_failed(e),
        }
    }

    fn check_cycle_budget(&mut self, started: Instant, frames: usize, rendering: bool) {
        if self.sample_rate == 0 {
            return;
        }
        let budget = Duration::from_secs_f64(frames as f64 / self.sample_rate as f64);
        let elapsed = started.elapsed();
        if elapsed <= budget {
            self.consecutive_overruns = 0;
            return;
        }

        self.state.overruns += 1;
        let now = Instant::now();
        let should_log = self
            .last_overrun_log
            .map_or(true, |last| now.duration_since(last) >= OVERRUN_LOG_INTERVAL);
        if should_log {
            log::warn!(
                "audio cycle overrun: {:.2}ms for a {:.2}ms buffer ({} total)",
                elapsed.as_secs_f64() * 1000.0,
                budget.as_secs_f64() * 1000.0,
                self.state.overruns
            );
            self.last_overrun_log = Some(now);
        }

        if !rendering || self.max_consecutive_overruns == 0 {
            self.consecutive_overruns = 0;
            return;
        }
        self.consecutive_overruns += 1;
        if self.consecutive_overruns >= self.max_consecutive_overruns && self.item.is_some() {
            let cycles = self.consecutive_overruns;
            self.consecutive_overruns = 0;
            self.on_item_failed(ItemError::Render(format!(
                "{} consecutive cycles over budget",
                cycles
            )));
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────

    fn apply(&mut self, command: PlayerCommand) {
        log::debug!("applying {}", command.name());
        match command {
            PlayerCommand::Play { playlist, index } => self.play(playlist, index),
            PlayerCommand::Next { offset } => self.next(offset),
            PlayerCommand::Stop => self.stop(),
            PlayerCommand::Pause { mode } => self.pause(mode),
            PlayerCommand::Rewind => self.seek_with(|_, _| 0.0),
            PlayerCommand::SeekCur { offset } => self.seek_with(|position, _| position + offset),
            PlayerCommand::SeekSet { time } => self.seek_with(|_, _| time),
            PlayerCommand::SeekEnd => self.seek_with(|_, duration| duration),
            PlayerCommand::Speed { value, relative } => {
                if !self.transport.set_speed(value, relative, &self.limits) {
                    log::debug!("ignoring invalid speed {}", value);
                }
            }
            PlayerCommand::Volume { value } => {
                if !self.transport.set_volume(value, &self.limits) {
                    log::debug!("ignoring invalid volume {}", value);
                }
            }
            PlayerCommand::SetRepeatMode { mode } => self.transport.repeat = mode,
            PlayerCommand::NextRepeatMode => self.transport.repeat = self.transport.repeat.next(),
            PlayerCommand::ChannelEnable { channel, enable } => {
                if !self.transport.channels.set(channel, enable) {
                    log::debug!("ignoring channel {} (out of range)", channel);
                } else if !enable {
                    self.silence_channel(channel);
                }
            }
            PlayerCommand::ChannelToggle { channel } => match self.transport.channels.toggle(channel) {
                Some(false) => self.silence_channel(channel),
                Some(true) => {}
                None => log::debug!("ignoring channel {} (out of range)", channel),
            },
            PlayerCommand::GetMidiOutputs { reply } => {
                let outputs = self
                    .instruments
                    .midi
                    .as_ref()
                    .map(|factory| factory.list_targets())
                    .unwrap_or_default();
                let _ = reply.send(outputs);
            }
            PlayerCommand::SetMidiOutput { id } => {
                self.select_output(&OutputSelection::Midi(id));
            }
            PlayerCommand::SetSynth { id } => {
                self.select_output(&OutputSelection::Synth(id));
            }
            PlayerCommand::SetFxParameter { index, value } => match self.fx.set_parameter(index, value) {
                Some(applied) => self.state.fx[index] = applied,
                None => log::debug!("ignoring unknown FX parameter {}", index),
            },
            PlayerCommand::RequestState => self.publish_forced = true,
            PlayerCommand::Shutdown { reply } => {
                self.shut_down();
                let _ = reply.send(());
            }
        }
    }

    fn play(&mut self, playlist: Vec<ItemDescriptor>, index: usize) {
        self.failed_in_pass = 0;
        match self.playlist.replace(playlist, index) {
            Some(index) => self.start_item_at(index),
            None => {
                log::debug!("empty playlist");
                self.stop();
            }
        }
    }

    fn next(&mut self, offset: i32) {
        let Some(cursor) = self.playlist.cursor() else {
            return;
        };
        self.failed_in_pass = 0;
        match self.playlist.offset_from(cursor, offset as i64, self.transport.repeat) {
            Some(index) => self.start_item_at(index),
            None => self.stop(),
        }
    }

    fn stop(&mut self) {
        let was_active = self.transport.status.is_active();
        self.close_item();
        self.transport.status = PlaybackStatus::Stopped;
        self.publish_forced = true;
        if was_active {
            log::info!("playback stopped");
            self.shared.events.emit(PlayerEvent::Stopped);
        }
    }

    fn pause(&mut self, mode: PauseMode) {
        let next = match (self.transport.status, mode) {
            (PlaybackStatus::Playing, PauseMode::Toggle | PauseMode::Pause) => PlaybackStatus::Paused,
            (PlaybackStatus::Paused, PauseMode::Toggle | PauseMode::Resume) => PlaybackStatus::Playing,
            _ => return,
        };
        if next == PlaybackStatus::Paused {
            self.silence_instrument();
        }
        self.transport.status = next;
        self.publish_forced = true;
    }

    /// Seek to `target(position, duration)`, clamped into the item
    fn seek_with(&mut self, target: impl FnOnce(f64, f64) -> f64) {
        if !self.transport.status.is_active() {
            return;
        }
        let Some(item) = self.item.as_mut() else {
            return;
        };
        let duration = item.duration().max(0.0);
        let time = target(item.position(), duration);
        if time.is_nan() {
            log::debug!("ignoring seek to NaN");
            return;
        }

        let result = item.seek(time.clamp(0.0, duration));
        self.silence_instrument();
        self.publish_forced = true;
        if let Err(e) = result {
            self.on_item_failed(e);
        }
    }

    fn silence_channel(&mut self, channel: usize) {
        if let Some(instrument) = self.instrument.as_deref_mut() {
            channel_notes_off(instrument, channel as u8);
            instrument.flush_events();
        }
    }

    fn silence_instrument(&mut self) {
        if let Some(instrument) = self.instrument.as_deref_mut() {
            all_notes_off(instrument);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────

    /// Open the item at `index`, skipping items that fail to open
    ///
    /// Failed items advance by one (wrapping only in repeat-all). Once every
    /// item has failed without one playing to its end, playback stops.
    fn start_item_at(&mut self, index: usize) {
        self.close_item();

        let mut candidate = Some(index);
        while let Some(index) = candidate {
            if self.pass_exhausted() {
                break;
            }
            self.playlist.set_cursor(Some(index));

            let Some(descriptor) = self.playlist.get(index) else {
                break;
            };
            match self.opener.open(descriptor, self.sample_rate) {
                Ok(item) => {
                    log::info!("playing [{}] {}", index, descriptor.display_name());
                    self.state.item_path = Some(descriptor.path.clone());
                    self.state.item_name = Some(descriptor.display_name());
                    self.state.metadata = item.metadata().clone();
                    self.shared.events.emit(PlayerEvent::ItemStarted {
                        index,
                        path: descriptor.path.clone(),
                    });
                    self.item = Some(item);
                    self.transport.status = PlaybackStatus::Playing;
                    self.consecutive_overruns = 0;
                    self.publish_forced = true;
                    return;
                }
                Err(e) => {
                    log::warn!("skipping [{}]: {}", index, e);
                    self.state.failed_items += 1;
                    self.failed_in_pass += 1;
                    self.shared.events.emit(PlayerEvent::ItemFailed { index, error: e });
                    candidate = self.playlist.offset_from(index, 1, self.transport.repeat);
                }
            }
        }

        self.stop();
    }

    fn pass_exhausted(&self) -> bool {
        self.failed_in_pass >= self.playlist.len()
    }

    /// Close the current item and silence everything it left sounding
    fn close_item(&mut self) {
        if self.item.take().is_some() {
            self.silence_instrument();
            self.fx.reset();
            self.meters.reset();
        }
        self.state.item_path = None;
        self.state.item_name = None;
        self.state.metadata = Default::default();
        self.state.position = 0.0;
        self.state.duration = 0.0;
    }

    fn on_item_finished(&mut self) {
        let Some(index) = self.playlist.cursor() else {
            self.stop();
            return;
        };
        log::debug!("item [{}] finished", index);
        self.failed_in_pass = 0;
        self.shared.events.emit(PlayerEvent::ItemFinished { index });
        match self.playlist.after_completion(index, self.transport.repeat) {
            Some(next) => self.start_item_at(next),
            None => self.stop(),
        }
    }

    fn on_item_failed(&mut self, error: ItemError) {
        let Some(index) = self.playlist.cursor() else {
            self.stop();
            return;
        };
        log::warn!("item [{}] failed: {}", index, error);
        self.state.failed_items += 1;
        self.failed_in_pass += 1;
        self.shared.events.emit(PlayerEvent::ItemFailed { index, error });
        // Skipped like an open failure: never replayed, even in repeat-one
        match self.playlist.offset_from(index, 1, self.transport.repeat) {
            Some(next) if !self.pass_exhausted() => self.start_item_at(next),
            _ => self.stop(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Outputs
    // ─────────────────────────────────────────────────────────────

    /// Swap the instrument: the old one is closed before the new one opens
    ///
    /// On failure no instrument is bound and playback continues.
    fn select_output(&mut self, selection: &OutputSelection) -> bool {
        if let Some(mut old) = self.instrument.take() {
            all_notes_off(old.as_mut());
            old.close();
        }
        self.state.output = None;
        self.publish_forced = true;

        let result = match self.instruments.factory_for(selection) {
            Some(factory) => {
                let mut instrument = factory.create();
                instrument.prepare(self.sample_rate);
                instrument.open(selection.id()).map(|()| instrument)
            }
            None => Err(InstrumentError::OutputUnavailable(format!(
                "no {:?} backend configured",
                selection.kind()
            ))),
        };

        match result {
            Ok(instrument) => {
                let output = ActiveOutput {
                    kind: selection.kind(),
                    id: selection.id().to_string(),
                };
                log::info!("output: {:?} {}", output.kind, output.id);
                self.instrument = Some(instrument);
                self.state.output = Some(output.clone());
                self.shared.events.emit(PlayerEvent::OutputChanged { output });
                true
            }
            Err(e) => {
                log::warn!("cannot open output {}: {}", selection.id(), e);
                self.shared.events.emit(PlayerEvent::OutputUnavailable {
                    kind: selection.kind(),
                    id: selection.id().to_string(),
                    error: e,
                });
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Shutdown and publishing
    // ─────────────────────────────────────────────────────────────

    /// Silence and release everything, close the queue, publish
    ///
    /// Idempotent. Also used by the handle to force cleanup when the audio
    /// context stopped answering.
    pub fn shut_down(&mut self) {
        if self.transport.status == PlaybackStatus::ShutDown {
            return;
        }
        self.close_item();
        if let Some(mut instrument) = self.instrument.take() {
            all_notes_off(instrument.as_mut());
            instrument.close();
        }
        self.state.output = None;
        self.transport.status = PlaybackStatus::ShutDown;
        self.shared.queue.close();

        self.fill_state();
        self.shared.publisher.publish(&self.state);
        self.publish_forced = false;
        self.frames_since_publish = 0;

        log::info!("player shut down");
        self.shared.events.emit(PlayerEvent::ShutdownComplete);
    }

    /// Publish right now, waiting for readers (control-side use)
    pub fn publish_now(&mut self) {
        self.fill_state();
        self.shared.publisher.publish(&self.state);
        self.publish_forced = false;
    }

    fn try_publish(&mut self) {
        self.fill_state();
        if self.shared.publisher.try_publish(&self.state).is_some() {
            self.publish_forced = false;
            self.frames_since_publish = 0;
            self.peak_window = [0.0; 2];
        } else {
            log::trace!("state publisher busy, retrying next cycle");
        }
    }

    fn fill_state(&mut self) {
        let state = &mut self.state;
        state.status = self.transport.status;
        state.repeat = self.transport.repeat;
        state.speed = self.transport.speed();
        state.volume = self.transport.volume();
        state.channels = self.transport.channels;
        state.playlist_index = self.playlist.cursor();
        state.playlist_len = self.playlist.len();
        if let Some(item) = self.item.as_ref() {
            state.position = item.position();
            state.duration = item.duration();
        }
        state.levels = self.peak_window;
        state.channel_levels = self.meters.levels();
    }
}
