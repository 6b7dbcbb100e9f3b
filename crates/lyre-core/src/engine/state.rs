//! Player state snapshots and the publisher that hands them to pollers
//!
//! The player fills its own working [`PlayerState`] during the cycle and
//! copies it into the publisher's front slot as a unit. Readers copy the
//! front slot out under the same lock, so a reader can never see fields from
//! two different publishes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use serde::Serialize;

use super::command::RepeatMode;
use super::fx::{FX_PARAMS, FX_PARAM_COUNT};
use super::item::ItemMetadata;
use super::transport::PlaybackStatus;
use crate::instrument::{ChannelMask, InstrumentKind};
use crate::types::MIDI_CHANNELS;

/// Instrument currently receiving events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveOutput {
    pub kind: InstrumentKind,
    pub id: String,
}

/// Everything a poller can observe about the player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerState {
    pub status: PlaybackStatus,
    pub repeat: RepeatMode,
    pub speed: f64,
    pub volume: f32,
    pub channels: ChannelMask,

    /// Position in the current item (seconds)
    pub position: f64,
    /// Duration of the current item (seconds)
    pub duration: f64,
    pub playlist_index: Option<usize>,
    pub playlist_len: usize,
    pub item_path: Option<PathBuf>,
    pub item_name: Option<String>,
    pub metadata: ItemMetadata,

    /// Output peak levels of the last published cycle [left, right]
    pub levels: [f32; 2],
    /// Per-channel MIDI activity (0.0-1.0)
    pub channel_levels: [f32; MIDI_CHANNELS],

    pub output: Option<ActiveOutput>,
    pub fx: [i32; FX_PARAM_COUNT],
    /// Negotiated sample rate
    pub sample_rate: u32,

    /// Incremented by every publish
    pub serial: u64,
    /// Audio cycles that took longer than their real-time duration
    pub overruns: u64,
    /// Items that failed to open or render
    pub failed_items: u64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            repeat: RepeatMode::Off,
            speed: 1.0,
            volume: 1.0,
            channels: ChannelMask::ALL,
            position: 0.0,
            duration: 0.0,
            playlist_index: None,
            playlist_len: 0,
            item_path: None,
            item_name: None,
            metadata: ItemMetadata::default(),
            levels: [0.0; 2],
            channel_levels: [0.0; MIDI_CHANNELS],
            output: None,
            fx: FX_PARAMS.map(|p| p.default),
            sample_rate: 0,
            serial: 0,
            overruns: 0,
            failed_items: 0,
        }
    }
}

impl PlayerState {
    /// Copy into `dst`, reusing its string and vector allocations
    pub fn copy_into(&self, dst: &mut PlayerState) {
        dst.status = self.status;
        dst.repeat = self.repeat;
        dst.speed = self.speed;
        dst.volume = self.volume;
        dst.channels = self.channels;
        dst.position = self.position;
        dst.duration = self.duration;
        dst.playlist_index = self.playlist_index;
        dst.playlist_len = self.playlist_len;
        dst.item_path.clone_from(&self.item_path);
        dst.item_name.clone_from(&self.item_name);
        dst.metadata.format.clone_from(&self.metadata.format);
        dst.metadata.track_count = self.metadata.track_count;
        dst.metadata.author.clone_from(&self.metadata.author);
        dst.metadata.name.clone_from(&self.metadata.name);
        dst.metadata.text.clone_from(&self.metadata.text);
        dst.levels = self.levels;
        dst.channel_levels = self.channel_levels;
        dst.output.clone_from(&self.output);
        dst.fx = self.fx;
        dst.sample_rate = self.sample_rate;
        dst.serial = self.serial;
        dst.overruns = self.overruns;
        dst.failed_items = self.failed_items;
    }
}

/// Lock-protected snapshot slot shared between the player and pollers
#[derive(Default)]
pub struct StatePublisher {
    front: Mutex<PlayerState>,
    serial: AtomicU64,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.front.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self, front: &mut PlayerState, state: &PlayerState) -> u64 {
        let serial = self.serial.load(Ordering::Relaxed) + 1;
        state.copy_into(front);
        front.serial = serial;
        self.serial.store(serial, Ordering::Release);
        serial
    }

    /// Replace the snapshot, waiting for readers. Returns the new serial.
    pub fn publish(&self, state: &PlayerState) -> u64 {
        let mut front = self.lock();
        self.store(&mut front, state)
    }

    /// Replace the snapshot unless a reader holds the lock (real-time safe)
    pub fn try_publish(&self, state: &PlayerState) -> Option<u64> {
        let mut front = match self.front.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(self.store(&mut front, state))
    }

    /// Copy of the latest snapshot
    pub fn read(&self) -> PlayerState {
        self.lock().clone()
    }

    /// Copy the latest snapshot into `dst`, reusing its allocations
    pub fn read_into(&self, dst: &mut PlayerState) {
        self.lock().copy_into(dst);
    }

    /// Serial of the latest snapshot, for cheap change detection
    pub fn serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_publish_increments_serial() {
        let publisher = StatePublisher::new();
        assert_eq!(publisher.serial(), 0);

        let mut state = PlayerState::default();
        state.position = 1.5;
        assert_eq!(publisher.publish(&state), 1);
        assert_eq!(publisher.try_publish(&state), Some(2));

        let snapshot = publisher.read();
        assert_eq!(snapshot.serial, 2);
        assert_eq!(snapshot.position, 1.5);
    }

    #[test]
    fn test_try_publish_fails_while_reader_holds_lock() {
        let publisher = StatePublisher::new();
        let guard = publisher.front.lock().unwrap();
        assert_eq!(publisher.try_publish(&PlayerState::default()), None);
        drop(guard);
        assert_eq!(publisher.try_publish(&PlayerState::default()), Some(1));
    }

    #[test]
    fn test_read_into_copies_everything() {
        let publisher = StatePublisher::new();
        let mut state = PlayerState::default();
        state.item_name = Some("song".to_string());
        state.metadata.text = vec!["line 1".to_string(), "line 2".to_string()];
        state.output = Some(ActiveOutput {
            kind: InstrumentKind::Synth,
            id: "sine".to_string(),
        });
        publisher.publish(&state);

        let mut dst = PlayerState::default();
        dst.metadata.text = vec!["stale".to_string(); 5];
        publisher.read_into(&mut dst);

        state.serial = 1;
        assert_eq!(dst, state);
    }

    #[test]
    fn test_snapshots_never_torn() {
        // Every published state keeps position == duration == serial-ish counter
        let publisher = Arc::new(StatePublisher::new());
        let writer = {
            let publisher = publisher.clone();
            std::thread::spawn(move || {
                let mut state = PlayerState::default();
                for i in 0..2000 {
                    state.position = i as f64;
                    state.duration = i as f64;
                    state.playlist_index = Some(i);
                    state.item_name = Some(format!("item {}", i));
                    publisher.publish(&state);
                }
            })
        };

        let mut snapshot = PlayerState::default();
        for _ in 0..2000 {
            publisher.read_into(&mut snapshot);
            assert_eq!(snapshot.position, snapshot.duration);
            if let Some(i) = snapshot.playlist_index {
                assert_eq!(snapshot.item_name.as_deref(), Some(format!("item {}", i).as_str()));
                assert_eq!(snapshot.position, i as f64);
            }
        }
        writer.join().unwrap();
    }
}
