//! Notifications emitted by the player
//!
//! Events go out over a bounded crossbeam channel. The player never waits
//! on it: when the controller falls behind, new events are dropped and
//! counted instead of growing the queue from the audio callback.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Sender, TrySendError};

/// Events buffered for a controller that is not reading
pub const EVENT_CAPACITY: usize = 256;

use super::item::ItemError;
use super::state::ActiveOutput;
use crate::instrument::{InstrumentError, InstrumentKind};

/// Something the controller may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// An item was opened and playback started
    ItemStarted { index: usize, path: PathBuf },
    /// An item played to its end
    ItemFinished { index: usize },
    /// An item failed to open or render and was skipped
    ItemFailed { index: usize, error: ItemError },
    /// Events now go to a different instrument
    OutputChanged { output: ActiveOutput },
    /// An output could not be opened; no instrument is bound
    OutputUnavailable {
        kind: InstrumentKind,
        id: String,
        error: InstrumentError,
    },
    /// Playback stopped (by command or at the end of the playlist)
    Stopped,
    /// The player released everything and accepts no more commands
    ShutdownComplete,
}

/// Sending half held by the player
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: Sender<PlayerEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    pub(crate) fn new(tx: Sender<PlayerEvent>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fire and forget
    pub(crate) fn emit(&self, event: PlayerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("player event dropped, no receiver");
            }
        }
    }

    /// Events lost because the channel was full
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    #[test]
    fn test_full_channel_counts_drops() {
        let (tx, rx) = bounded(2);
        let sender = EventSender::new(tx);
        for _ in 0..5 {
            sender.emit(PlayerEvent::Stopped);
        }
        assert_eq!(rx.len(), 2);
        assert_eq!(sender.dropped(), 3);

        rx.recv().unwrap();
        sender.emit(PlayerEvent::ShutdownComplete);
        assert_eq!(sender.dropped(), 3);
        assert_eq!(rx.try_iter().last(), Some(PlayerEvent::ShutdownComplete));
    }

    #[test]
    fn test_disconnected_receiver_is_not_counted() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.emit(PlayerEvent::Stopped);
        assert_eq!(sender.dropped(), 0);
    }
}
