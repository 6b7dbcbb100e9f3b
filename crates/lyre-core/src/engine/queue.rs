//! Ordered, unbounded command mailbox from controllers to the player
//!
//! Controllers `push()` under a short lock and never wait on the player.
//! The audio context only ever `try_lock`s: if a controller happens to hold
//! the lock, the drain is deferred to the next cycle instead of blocking the
//! callback.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use super::command::PlayerCommand;

struct QueueInner {
    commands: VecDeque<PlayerCommand>,
    closed: bool,
}

/// Thread-safe FIFO of [`PlayerCommand`]s
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                commands: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// A panicking controller must not take the player down with it
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command to the tail
    ///
    /// Hands the command back if the queue has been closed by shutdown.
    pub fn push(&self, command: PlayerCommand) -> Result<(), PlayerCommand> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(command);
        }
        inner.commands.push_back(command);
        Ok(())
    }

    /// Remove and return every queued command, in order
    pub fn drain_all(&self) -> Vec<PlayerCommand> {
        self.lock().commands.drain(..).collect()
    }

    /// Move up to `limit` queued commands into `out` without blocking
    ///
    /// Commands past `limit` stay queued, in order, for the next drain.
    /// Returns false if the lock was contended; the caller should retry next
    /// cycle. With `out` pre-allocated to hold `limit` this does not allocate.
    pub fn try_drain_into(&self, out: &mut Vec<PlayerCommand>, limit: usize) -> bool {
        let mut inner = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::trace!("Command queue busy, deferring drain");
                return false;
            }
        };
        let n = inner.commands.len().min(limit);
        out.extend(inner.commands.drain(..n));
        true
    }

    /// Reject all further pushes
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().commands.is_empty()
    }
}
