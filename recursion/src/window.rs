//! Fixed-capacity ring of recently observed frames

use crate::types::FrameSignature;
use crate::types::RecursionFrame;
use serde::Deserialize;
use serde::Serialize;

/// A frame together with the signature it was counted under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub signature: FrameSignature,
    pub frame: RecursionFrame,
}

/// Arena of `capacity` slots with a cursor at the oldest entry.
///
/// The arena grows until full; after that each push overwrites the slot under
/// the cursor and advances it, so eviction is O(1) and memory stays bounded.
#[derive(Debug, Clone)]
pub struct FrameWindow {
    slots: Vec<WindowEntry>,
    cursor: usize,
    capacity: usize,
}

impl FrameWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
        }
    }

    /// Rebuild a window from entries ordered oldest first
    pub fn from_entries(capacity: usize, entries: impl IntoIterator<Item = WindowEntry>) -> Self {
        let mut window = Self::with_capacity(capacity);
        for entry in entries {
            window.push(entry);
        }
        window
    }

    /// Insert an entry, returning the evicted one once the window is full
    pub fn push(&mut self, entry: WindowEntry) -> Option<WindowEntry> {
        if self.slots.len() < self.capacity {
            self.slots.push(entry);
            return None;
        }

        let evicted = std::mem::replace(&mut self.slots[self.cursor], entry);
        self.cursor = (self.cursor + 1) % self.capacity;
        Some(evicted)
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &WindowEntry> {
        let (newer, older) = self.slots.split_at(self.cursor);
        older.iter().chain(newer.iter())
    }

    pub fn count(&self, signature: &FrameSignature) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.signature == *signature)
            .count()
    }

    pub fn newest(&self) -> Option<&WindowEntry> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = if self.slots.len() < self.capacity {
            self.slots.len() - 1
        } else {
            (self.cursor + self.capacity - 1) % self.capacity
        };
        self.slots.get(idx)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameId;
    use chrono::Utc;

    fn entry(seq: u64, signature: &str) -> WindowEntry {
        WindowEntry {
            signature: FrameSignature::new(signature),
            frame: RecursionFrame {
                id: FrameId(seq),
                function: signature.to_string(),
                arguments: String::new(),
                depth: seq as usize,
                entered_at: Utc::now(),
            },
        }
    }

    fn ids(window: &FrameWindow) -> Vec<u64> {
        window.iter().map(|e| e.frame.id.0).collect()
    }

    #[test]
    fn test_fills_then_evicts_oldest() {
        let mut window = FrameWindow::with_capacity(3);
        assert!(window.push(entry(1, "a")).is_none());
        assert!(window.push(entry(2, "b")).is_none());
        assert!(window.push(entry(3, "c")).is_none());
        assert_eq!(ids(&window), vec![1, 2, 3]);

        let evicted = window.push(entry(4, "d")).unwrap();
        assert_eq!(evicted.frame.id, FrameId(1));
        assert_eq!(ids(&window), vec![2, 3, 4]);

        window.push(entry(5, "e"));
        window.push(entry(6, "f"));
        window.push(entry(7, "g"));
        assert_eq!(ids(&window), vec![5, 6, 7]);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_newest_tracks_cursor() {
        let mut window = FrameWindow::with_capacity(2);
        assert!(window.newest().is_none());
        window.push(entry(1, "a"));
        assert_eq!(window.newest().unwrap().frame.id, FrameId(1));
        window.push(entry(2, "a"));
        window.push(entry(3, "a"));
        assert_eq!(window.newest().unwrap().frame.id, FrameId(3));
    }

    #[test]
    fn test_count_forgets_evicted_entries() {
        let mut window = FrameWindow::with_capacity(4);
        window.push(entry(1, "loop"));
        window.push(entry(2, "x"));
        window.push(entry(3, "y"));
        window.push(entry(4, "z"));
        assert_eq!(window.count(&FrameSignature::new("loop")), 1);

        window.push(entry(5, "w"));
        assert_eq!(window.count(&FrameSignature::new("loop")), 0);
    }

    #[test]
    fn test_from_entries_keeps_order() {
        let window = FrameWindow::from_entries(2, (1..=5).map(|i| entry(i, "s")));
        assert_eq!(ids(&window), vec![4, 5]);
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        let window = FrameWindow::with_capacity(0);
        assert_eq!(window.capacity(), 1);
    }
}
