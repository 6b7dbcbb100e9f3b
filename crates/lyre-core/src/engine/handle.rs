//! Controller-side handle to a running player
//!
//! [`PlayerHandle::start`] wires the pieces together:
//!
//! ```text
//!  controller threads                       audio callback
//!  ──────────────────                       ──────────────
//!  PlayerHandle::send ──▶ CommandQueue ──try_lock──▶ Player::process
//!  PlayerHandle::snapshot ◀── StatePublisher ◀──try_publish──┘
//!  PlayerHandle::events ◀── bounded channel ◀── PlayerEvent
//! ```
//!
//! The handle owns the audio device. Dropping it shuts the player down.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver};
use thiserror::Error;
use tokio::sync::oneshot;

use super::command::{PauseMode, PlayerCommand, RepeatMode};
use super::event::{EventSender, PlayerEvent, EVENT_CAPACITY};
use super::item::{ItemDescriptor, ItemOpener};
use super::player::{Player, PlayerShared};
use super::queue::CommandQueue;
use super::state::{PlayerState, StatePublisher};
use crate::audio::{AudioDevice, AudioError, NegotiatedConfig, RenderFn, TransportLimits};
use crate::config::PlayerConfig;
use crate::instrument::{Instruments, OutputInfo};
use crate::types::fill_silence;

/// Poll period while waiting for the shutdown reply
const SHUTDOWN_POLL: Duration = Duration::from_millis(2);

/// Errors surfaced to controllers
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Audio device error: {0}")]
    Audio(#[from] AudioError),

    /// The player has shut down and accepts no more commands
    #[error("Player command queue is closed")]
    QueueClosed,

    /// A blocking command was dropped without being applied
    #[error("Player dropped the command before replying")]
    ReplyDropped,

    #[error("Player did not acknowledge shutdown within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Owned handle to a running player
pub struct PlayerHandle {
    shared: PlayerShared,
    player: Arc<Mutex<Player>>,
    device: Box<dyn AudioDevice>,
    events: Receiver<PlayerEvent>,
    negotiated: NegotiatedConfig,
    limits: TransportLimits,
    shutdown_timeout: Duration,
    shut_down: bool,
}

impl PlayerHandle {
    /// Build the player, initialise the device and start the stream
    pub fn start(
        config: PlayerConfig,
        mut device: Box<dyn AudioDevice>,
        opener: Arc<dyn ItemOpener>,
        instruments: Instruments,
    ) -> Result<Self, PlayerError> {
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        let shared = PlayerShared {
            queue: Arc::new(CommandQueue::new()),
            publisher: Arc::new(StatePublisher::new()),
            events: EventSender::new(events_tx),
        };
        let limits = device.limits();
        let player = Arc::new(Mutex::new(Player::new(
            &config,
            limits,
            shared.clone(),
            opener,
            instruments,
        )));

        let render_player = player.clone();
        let render: RenderFn = Box::new(move |out| match render_player.try_lock() {
            Ok(mut player) => player.process(out),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().process(out),
            Err(TryLockError::WouldBlock) => {
                log::trace!("player busy, emitting silence");
                fill_silence(out);
            }
        });

        let negotiated = device.init(&config.audio, render)?;
        log::info!(
            "{:?} stream: {}Hz, {} frames, {} channels ({:.1}ms)",
            device.backend(),
            negotiated.sample_rate,
            negotiated.buffer_frames,
            negotiated.channels,
            negotiated.latency_ms()
        );

        {
            let mut player = player.lock().unwrap_or_else(PoisonError::into_inner);
            player.configure(&negotiated, &config);
            player.open_initial_output();
            player.publish_now();
        }

        if let Err(e) = device.start() {
            device.shutdown();
            return Err(e.into());
        }

        Ok(Self {
            shared,
            player,
            device,
            events: events_rx,
            negotiated,
            limits,
            shutdown_timeout: config.shutdown_timeout(),
            shut_down: false,
        })
    }

    /// Submit a command; never waits on the player
    pub fn send(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.shared
            .queue
            .push(command)
            .map_err(|_| PlayerError::QueueClosed)
    }

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────

    pub fn play(&self, playlist: Vec<ItemDescriptor>, index: usize) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Play { playlist, index })
    }

    pub fn next(&self, offset: i32) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Next { offset })
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Stop)
    }

    pub fn pause(&self, mode: PauseMode) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Pause { mode })
    }

    pub fn rewind(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Rewind)
    }

    /// Seek relative to the current position (seconds)
    pub fn seek_by(&self, offset: f64) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SeekCur { offset })
    }

    /// Seek to an absolute position (seconds)
    pub fn seek_to(&self, time: f64) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SeekSet { time })
    }

    pub fn seek_end(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SeekEnd)
    }

    pub fn set_speed(&self, value: f64) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Speed {
            value,
            relative: false,
        })
    }

    pub fn adjust_speed(&self, delta: f64) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Speed {
            value: delta,
            relative: true,
        })
    }

    pub fn set_volume(&self, value: f32) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Volume { value })
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetRepeatMode { mode })
    }

    pub fn next_repeat_mode(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::NextRepeatMode)
    }

    // ─────────────────────────────────────────────────────────────
    // Channels, outputs, FX
    // ─────────────────────────────────────────────────────────────

    pub fn set_channel_enabled(&self, channel: usize, enable: bool) -> Result<(), PlayerError> {
        self.send(PlayerCommand::ChannelEnable { channel, enable })
    }

    pub fn toggle_channel(&self, channel: usize) -> Result<(), PlayerError> {
        self.send(PlayerCommand::ChannelToggle { channel })
    }

    /// List MIDI output ports, waiting for the player's next cycle
    pub fn midi_outputs(&self) -> Result<Vec<OutputInfo>, PlayerError> {
        let (reply, rx) = oneshot::channel();
        self.send(PlayerCommand::GetMidiOutputs { reply })?;
        rx.blocking_recv().map_err(|_| PlayerError::ReplyDropped)
    }

    pub fn set_midi_output(&self, id: impl Into<String>) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetMidiOutput { id: id.into() })
    }

    pub fn set_synth(&self, id: impl Into<String>) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetSynth { id: id.into() })
    }

    pub fn set_fx_parameter(&self, index: usize, value: i32) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetFxParameter { index, value })
    }

    // ─────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────

    /// Ask for a snapshot at the end of the next cycle
    pub fn request_state(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::RequestState)
    }

    /// Copy of the latest published snapshot
    pub fn snapshot(&self) -> PlayerState {
        self.shared.publisher.read()
    }

    /// Copy the latest snapshot into `dst`, reusing its allocations
    pub fn snapshot_into(&self, dst: &mut PlayerState) {
        self.shared.publisher.read_into(dst);
    }

    /// Serial of the latest snapshot
    pub fn state_serial(&self) -> u64 {
        self.shared.publisher.serial()
    }

    /// Player notifications
    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events
    }

    /// Notifications lost because nobody drained [`PlayerHandle::events`]
    pub fn dropped_events(&self) -> u64 {
        self.shared.events.dropped()
    }

    pub fn negotiated(&self) -> NegotiatedConfig {
        self.negotiated
    }

    pub fn limits(&self) -> TransportLimits {
        self.limits
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ─────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────

    /// Shut the player down and release the device
    ///
    /// Waits up to the configured timeout for the player to acknowledge.
    /// After that the stream is stopped and cleanup is forced from this
    /// thread; the timeout is still reported. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), PlayerError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        log::info!("shutting down player");

        let (reply, mut rx) = oneshot::channel();
        let result = match self.shared.queue.push(PlayerCommand::Shutdown { reply }) {
            Ok(()) => {
                let deadline = Instant::now() + self.shutdown_timeout;
                loop {
                    match rx.try_recv() {
                        Ok(()) => break Ok(()),
                        Err(oneshot::error::TryRecvError::Closed) => {
                            break Err(PlayerError::ReplyDropped)
                        }
                        Err(oneshot::error::TryRecvError::Empty) => {
                            if Instant::now() >= deadline {
                                break Err(PlayerError::ShutdownTimeout(self.shutdown_timeout));
                            }
                            std::thread::sleep(SHUTDOWN_POLL);
                        }
                    }
                }
            }
            // Already shut down from the player side
            Err(_) => Ok(()),
        };

        self.device.shutdown();

        if let Err(e) = &result {
            log::warn!("{}, forcing cleanup", e);
            let mut player = self.player.lock().unwrap_or_else(PoisonError::into_inner);
            player.shut_down();
        }

        for command in self.shared.queue.drain_all() {
            log::debug!("dropping {} after shutdown", command.name());
        }
        result
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("player shutdown on drop: {}", e);
        }
    }
}
