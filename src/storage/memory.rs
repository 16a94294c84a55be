//! Per-shard storage.
//!
//! Entries live in a slot arena; the key map and the expiration index both
//! refer to entries by slot handle. All three are mutated together by each
//! operation, so under a single lock acquisition the index holds exactly one
//! handle per keyed entry.

use super::expiry::{ExpirationIndex, Slot};
use super::protocol::ShardValue;

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug)]
struct Entry {
    key: String,
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct ShardStore {
    keys: HashMap<String, Slot>,
    slots: Vec<Option<Entry>>,
    /// Released slots, reused before the arena grows.
    free_list: Vec<Slot>,
    expirations: ExpirationIndex,
}

impl ShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a peer's snapshot, rebasing each remaining ttl onto
    /// `now`. Entries with no time left are skipped.
    pub fn from_snapshot<I>(values: I, now: Instant) -> Self
    where
        I: IntoIterator<Item = ShardValue>,
    {
        let mut store = Self::new();
        for item in values {
            if item.ttl_ms_remaining <= 0 {
                continue;
            }
            let ttl = Duration::from_millis(item.ttl_ms_remaining as u64);
            store.set(&item.key, item.value, ttl, now);
        }
        store
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Value of a live entry. Expired entries read as absent even before the
    /// sweeper evicts them.
    pub fn get(&self, key: &str, now: Instant) -> Option<&str> {
        let entry = self.entry(*self.keys.get(key)?)?;
        (entry.expires_at > now).then_some(entry.value.as_str())
    }

    /// Inserts or overwrites `key`. The expiry is always `now + ttl`; it
    /// replaces, never extends, a previous expiry.
    pub fn set(&mut self, key: &str, value: String, ttl: Duration, now: Instant) {
        let expires_at = now.checked_add(ttl).unwrap_or(now + FAR_FUTURE);

        match self.keys.get(key) {
            Some(&slot) => {
                if let Some(entry) = self.slots[slot].as_mut() {
                    entry.value = value;
                    entry.expires_at = expires_at;
                }
                self.expirations.remove(slot);
                self.expirations.push(slot, expires_at);
            }
            None => {
                let slot = self.allocate(Entry {
                    key: key.to_string(),
                    value,
                    expires_at,
                });
                self.keys.insert(key.to_string(), slot);
                self.expirations.push(slot, expires_at);
            }
        }
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.keys.remove(key) {
            Some(slot) => {
                self.expirations.remove(slot);
                self.release(slot);
                true
            }
            None => false,
        }
    }

    /// Evicts every entry expiring at or before `now`.
    ///
    /// Stops at the first live entry of the index, the rest expire later.
    /// Returns the number of evicted entries.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some(slot) = self.expirations.pop_expired(now) {
            if let Some(entry) = self.release(slot) {
                self.keys.remove(&entry.key);
                evicted += 1;
            }
        }
        evicted
    }

    /// Every live entry with its remaining ttl at `now`.
    pub fn snapshot(&self, now: Instant) -> Vec<ShardValue> {
        self.slots
            .iter()
            .flatten()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| ShardValue {
                key: entry.key.clone(),
                value: entry.value.clone(),
                ttl_ms_remaining: remaining_ms(entry.expires_at, now),
            })
            .collect()
    }

    fn entry(&self, slot: Slot) -> Option<&Entry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn allocate(&mut self, entry: Entry) -> Slot {
        match self.free_list.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, slot: Slot) -> Option<Entry> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.free_list.push(slot);
        Some(entry)
    }

    /// Cross-checks key map, slot arena and expiration index.
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        self.expirations.check_invariants()?;

        let occupied = self.slots.iter().filter(|slot| slot.is_some()).count();
        if occupied != self.keys.len() || self.expirations.len() != self.keys.len() {
            return Err(format!(
                "keys={} occupied slots={} queued={}",
                self.keys.len(),
                occupied,
                self.expirations.len()
            ));
        }

        for (key, slot) in &self.keys {
            match self.entry(*slot) {
                Some(entry) if entry.key == *key => {}
                _ => return Err(format!("key {} points at a foreign or empty slot {}", key, slot)),
            }
            if !self.expirations.contains(*slot) {
                return Err(format!("key {} is missing from the expiration index", key));
            }
        }

        Ok(())
    }
}

fn remaining_ms(expires_at: Instant, now: Instant) -> i64 {
    let millis = expires_at.saturating_duration_since(now).as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}
