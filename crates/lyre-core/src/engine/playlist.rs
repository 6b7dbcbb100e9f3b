//! Playlist and cursor arithmetic
//!
//! Invariant: the cursor is either `Some(i)` with `i < len()`, or `None`
//! (empty playlist). Reaching the end of the list leaves it on the last item.

use super::command::RepeatMode;
use super::item::ItemDescriptor;

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    items: Vec<ItemDescriptor>,
    cursor: Option<usize>,
}

impl Playlist {
    pub fn new(items: Vec<ItemDescriptor>) -> Self {
        Self { items, cursor: None }
    }

    /// Replace the items and point the cursor at `index`, clamped into range
    ///
    /// Returns the new cursor (None for an empty playlist).
    pub fn replace(&mut self, items: Vec<ItemDescriptor>, index: usize) -> Option<usize> {
        self.items = items;
        self.cursor = self.clamp(index);
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Move the cursor; out-of-range indices clear it
    pub fn set_cursor(&mut self, cursor: Option<usize>) {
        self.cursor = cursor.filter(|&i| i < self.items.len());
    }

    pub fn get(&self, index: usize) -> Option<&ItemDescriptor> {
        self.items.get(index)
    }

    pub fn current(&self) -> Option<&ItemDescriptor> {
        self.cursor.and_then(|i| self.items.get(i))
    }

    fn clamp(&self, index: usize) -> Option<usize> {
        if self.items.is_empty() {
            None
        } else {
            Some(index.min(self.items.len() - 1))
        }
    }

    /// Index `offset` positions away from `from`
    ///
    /// Inside the list the target is returned as-is; outside it wraps when
    /// `repeat` is `All` and yields None otherwise.
    pub fn offset_from(&self, from: usize, offset: i64, repeat: RepeatMode) -> Option<usize> {
        let len = self.items.len() as i64;
        if len == 0 {
            return None;
        }
        let target = from as i64 + offset;
        if (0..len).contains(&target) {
            Some(target as usize)
        } else if repeat == RepeatMode::All {
            Some(target.rem_euclid(len) as usize)
        } else {
            None
        }
    }

    /// Index to play after the item at `from` completes
    ///
    /// `One` replays the same index, `All` wraps, `Off` stops after the last
    /// item.
    pub fn after_completion(&self, from: usize, repeat: RepeatMode) -> Option<usize> {
        match repeat {
            RepeatMode::One if from < self.items.len() => Some(from),
            RepeatMode::One => None,
            _ => self.offset_from(from, 1, repeat),
        }
    }
}
