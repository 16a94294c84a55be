//! Table of shards hosted by this node.
//!
//! The outer lock guards which shards exist; each shard has its own lock
//! guarding its contents. Data operations hold the outer lock for reading for
//! their whole duration, so a shard cannot be dropped between the hosting
//! check and the shard lock acquisition. Installs and removals take the outer
//! lock for writing and therefore wait for in-flight operations to finish.
//!
//! Closures passed to [`HostedShards::read`] and [`HostedShards::write`] run
//! under blocking locks and must not await.

use super::memory::ShardStore;
use crate::membership::types::ShardId;

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

#[derive(Default)]
pub struct HostedShards {
    shards: RwLock<HashMap<ShardId, RwLock<ShardStore>>>,
}

impl HostedShards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` under the shard's read lock. `None` if the shard is not
    /// hosted.
    pub fn read<R>(&self, shard: ShardId, f: impl FnOnce(&ShardStore) -> R) -> Option<R> {
        let shards = self.shards.read();
        let store = shards.get(&shard)?.read();
        Some(f(&store))
    }

    /// Runs `f` under the shard's write lock. `None` if the shard is not
    /// hosted.
    pub fn write<R>(&self, shard: ShardId, f: impl FnOnce(&mut ShardStore) -> R) -> Option<R> {
        let shards = self.shards.read();
        let mut store = shards.get(&shard)?.write();
        Some(f(&mut store))
    }

    /// Starts hosting `shard` with `store`, replacing any previous contents.
    pub fn install(&self, shard: ShardId, store: ShardStore) {
        let mut shards = self.shards.write();
        match shards.get(&shard) {
            Some(existing) => *existing.write() = store,
            None => {
                shards.insert(shard, RwLock::new(store));
            }
        }
    }

    /// Stops hosting `shard` and drops its contents. Returns the number of
    /// dropped entries, `None` if it was not hosted.
    pub fn remove(&self, shard: ShardId) -> Option<usize> {
        let store = self.shards.write().remove(&shard)?;
        Some(store.into_inner().len())
    }

    pub fn is_hosted(&self, shard: ShardId) -> bool {
        self.shards.read().contains_key(&shard)
    }

    pub fn hosted(&self) -> BTreeSet<ShardId> {
        self.shards.read().keys().copied().collect()
    }

    /// Total entries across hosted shards, including unswept expired ones.
    pub fn entry_count(&self) -> usize {
        self.shards.read().values().map(|store| store.read().len()).sum()
    }

    /// Evicts expired entries from every hosted shard, taking one shard lock
    /// at a time. Returns the number of evicted entries.
    pub fn sweep(&self, now: Instant) -> usize {
        self.hosted()
            .into_iter()
            .filter_map(|shard| self.write(shard, |store| store.sweep(now)))
            .sum()
    }

    pub fn clear(&self) {
        self.shards.write().clear();
    }
}
