//! Expiration index.
//!
//! Binary min-heap of slot handles ordered by absolute expiry. Each queued
//! slot remembers its heap position, so removal and re-keying run in
//! `O(log n)` without a linear search, and the next entry to expire is
//! visible in `O(1)`.

use std::time::Instant;

/// Stable handle of an entry inside its shard's slot arena.
pub type Slot = usize;

const ABSENT: usize = usize::MAX;

#[derive(Debug, Default)]
pub struct ExpirationIndex {
    heap: Vec<(Instant, Slot)>,
    /// Heap position of every slot, `ABSENT` when the slot is not queued.
    positions: Vec<usize>,
}

impl ExpirationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.positions.get(slot).is_some_and(|pos| *pos != ABSENT)
    }

    /// Queues `slot`. A slot that is already queued is re-keyed instead.
    pub fn push(&mut self, slot: Slot, expires_at: Instant) {
        if self.contains(slot) {
            self.remove(slot);
        }
        if slot >= self.positions.len() {
            self.positions.resize(slot + 1, ABSENT);
        }

        let pos = self.heap.len();
        self.heap.push((expires_at, slot));
        self.positions[slot] = pos;
        self.sift_up(pos);
    }

    /// Removes `slot` by its stored position. Returns its expiry if it was
    /// queued.
    pub fn remove(&mut self, slot: Slot) -> Option<Instant> {
        let pos = *self.positions.get(slot)?;
        if pos == ABSENT {
            return None;
        }

        let last = self.heap.len() - 1;
        self.swap(pos, last);
        let (expires_at, removed) = self.heap.pop()?;
        debug_assert_eq!(removed, slot);
        self.positions[slot] = ABSENT;

        if pos < self.heap.len() && !self.sift_up(pos) {
            self.sift_down(pos);
        }

        Some(expires_at)
    }

    /// Earliest expiry, without removing it.
    pub fn peek(&self) -> Option<(Slot, Instant)> {
        self.heap.first().map(|(expires_at, slot)| (*slot, *expires_at))
    }

    pub fn pop(&mut self) -> Option<(Slot, Instant)> {
        let (slot, _) = self.peek()?;
        self.remove(slot).map(|expires_at| (slot, expires_at))
    }

    /// Pops the earliest slot if it expires at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Slot> {
        match self.peek() {
            Some((slot, expires_at)) if expires_at <= now => {
                self.remove(slot);
                Some(slot)
            }
            _ => None,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions[self.heap[a].1] = a;
        self.positions[self.heap[b].1] = b;
    }

    /// Returns whether the element moved.
    fn sift_up(&mut self, mut pos: usize) -> bool {
        let start = pos;
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.heap[pos].0 >= self.heap[parent].0 {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos != start
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;

            if left < len && self.heap[left].0 < self.heap[smallest].0 {
                smallest = left;
            }
            if right < len && self.heap[right].0 < self.heap[smallest].0 {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// Checks the heap property and the position table.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        for (pos, (expires_at, slot)) in self.heap.iter().enumerate() {
            if self.positions.get(*slot) != Some(&pos) {
                return Err(format!("slot {} at heap position {} has a stale position", slot, pos));
            }
            if pos > 0 && *expires_at < self.heap[(pos - 1) / 2].0 {
                return Err(format!("heap order violated at position {}", pos));
            }
        }

        let queued = self.positions.iter().filter(|pos| **pos != ABSENT).count();
        if queued != self.heap.len() {
            return Err(format!(
                "{} slots claim a position but the heap holds {}",
                queued,
                self.heap.len()
            ));
        }

        Ok(())
    }
}
