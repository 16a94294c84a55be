//! Membership manager: keeps the hosted shard table in line with the shard
//! map, migrating the data of newly assigned shards from peers.

use super::shard_map::{ShardMap, ShardMapListener};
use super::types::ShardId;
use crate::client::pool::ClientPool;
use crate::error::{KvError, KvResult};
use crate::storage::hosted::HostedShards;
use crate::storage::memory::ShardStore;
use crate::storage::protocol::ShardValue;
use crate::storage::server::stopped;

use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};

/// Shards to start and stop hosting, both ascending.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShardDelta {
    pub to_add: Vec<ShardId>,
    pub to_remove: Vec<ShardId>,
}

impl ShardDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

pub fn compute_delta(hosted: &BTreeSet<ShardId>, assigned: &[ShardId]) -> ShardDelta {
    let assigned: BTreeSet<ShardId> = assigned.iter().copied().collect();

    ShardDelta {
        to_add: assigned.difference(hosted).copied().collect(),
        to_remove: hosted.difference(&assigned).copied().collect(),
    }
}

/// How a newly hosted shard got its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Snapshot copied from `from`.
    Migrated { from: String, entries: usize },
    /// No other node is assigned the shard; it starts empty.
    NoPeers,
    /// Peers were assigned but none served a snapshot. The shard starts empty
    /// and whatever data they held is not available here.
    Failed { attempted: usize },
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub added: Vec<(ShardId, MigrationOutcome)>,
    pub removed: Vec<ShardId>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn failed(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.added
            .iter()
            .filter(|(_, outcome)| matches!(outcome, MigrationOutcome::Failed { .. }))
            .map(|(shard, _)| *shard)
    }

    /// Added shards whose data was copied from a peer.
    pub fn migrated(&self) -> usize {
        self.added
            .iter()
            .filter(|(_, outcome)| matches!(outcome, MigrationOutcome::Migrated { .. }))
            .count()
    }
}

pub struct MembershipManager {
    node: String,
    shard_map: Arc<ShardMap>,
    pool: Arc<dyn ClientPool>,
    hosted: Arc<HostedShards>,
    migration_timeout: Duration,
    /// Serializes syncs so two deltas are never computed against the same
    /// hosted set.
    sync_lock: Mutex<()>,
    /// Set by `clear`. Later syncs leave the hosted table empty.
    closed: AtomicBool,
}

impl MembershipManager {
    pub fn new(
        node: &str,
        shard_map: Arc<ShardMap>,
        pool: Arc<dyn ClientPool>,
        hosted: Arc<HostedShards>,
        migration_timeout: Duration,
    ) -> Self {
        Self {
            node: node.to_string(),
            shard_map,
            pool,
            hosted,
            migration_timeout,
            sync_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Applies the current shard map to the hosted table.
    ///
    /// Added shards are migrated concurrently. Removals are applied once every
    /// addition has been installed. Does nothing once `clear` has run.
    pub async fn sync(&self) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return SyncReport::default();
        }

        let assigned = self.shard_map.shards_for_node(&self.node);
        let delta = compute_delta(&self.hosted.hosted(), &assigned);
        if delta.is_empty() {
            return SyncReport::default();
        }

        tracing::debug!(
            "Node {} shard delta: add {:?}, remove {:?}",
            self.node,
            delta.to_add,
            delta.to_remove
        );

        let added = futures::future::join_all(
            delta
                .to_add
                .iter()
                .map(|&shard| async move { (shard, self.add_shard(shard).await) }),
        )
        .await;

        let mut removed = Vec::with_capacity(delta.to_remove.len());
        for shard in delta.to_remove {
            if let Some(entries) = self.hosted.remove(shard) {
                tracing::info!(
                    "Node {} stopped hosting shard {} ({} entries dropped)",
                    self.node,
                    shard,
                    entries
                );
                removed.push(shard);
            }
        }

        SyncReport { added, removed }
    }

    /// Drops every hosted shard once no sync is running, and stops later
    /// syncs from hosting any again.
    pub async fn clear(&self) {
        let _guard = self.sync_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        self.hosted.clear();
    }

    /// Reacts to shard map changes until shutdown or until the map goes away.
    pub async fn run(self: Arc<Self>, mut listener: ShardMapListener, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Node {} listening for shard map changes", self.node);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                changed = listener.changed() => {
                    if !changed {
                        tracing::warn!("Node {}: shard map closed, listener exiting", self.node);
                        break;
                    }
                }
            }

            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                report = self.sync() => {
                    tracing::debug!(
                        "Node {} applied shard map: {} added, {} removed",
                        self.node,
                        report.added.len(),
                        report.removed.len()
                    );
                }
            }
        }

        tracing::debug!("Node {} membership listener stopped", self.node);
    }

    async fn add_shard(&self, shard: ShardId) -> MigrationOutcome {
        let mut candidates: Vec<String> = self
            .shard_map
            .nodes_for_shard(shard)
            .into_iter()
            .filter(|node| *node != self.node)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        if candidates.is_empty() {
            tracing::debug!("Shard {} has no peers to migrate from, hosting empty", shard);
            self.hosted.install(shard, ShardStore::new());
            tracing::info!("Node {} now hosting shard {} (new, empty)", self.node, shard);
            return MigrationOutcome::NoPeers;
        }

        tracing::debug!("Shard {} migration candidates: {:?}", shard, candidates);

        for peer in &candidates {
            match self.fetch_snapshot(peer, shard).await {
                Ok(values) => {
                    let store = ShardStore::from_snapshot(values, Instant::now());
                    let entries = store.len();
                    self.hosted.install(shard, store);
                    tracing::info!(
                        "Node {} now hosting shard {} ({} entries from {})",
                        self.node,
                        shard,
                        entries,
                        peer
                    );
                    return MigrationOutcome::Migrated {
                        from: peer.clone(),
                        entries,
                    };
                }
                Err(e) => {
                    tracing::warn!("Shard {} snapshot from {} failed: {}", shard, peer, e);
                }
            }
        }

        tracing::error!(
            "Node {}: migration of shard {} failed on all {} peers {:?}, hosting empty",
            self.node,
            shard,
            candidates.len(),
            candidates
        );
        self.hosted.install(shard, ShardStore::new());
        MigrationOutcome::Failed {
            attempted: candidates.len(),
        }
    }

    async fn fetch_snapshot(&self, peer: &str, shard: ShardId) -> KvResult<Vec<ShardValue>> {
        let client = self.pool.get_client(peer)?;
        match tokio::time::timeout(self.migration_timeout, client.get_shard_contents(shard)).await {
            Ok(result) => result,
            Err(_) => Err(KvError::DeadlineExceeded(self.migration_timeout)),
        }
    }
}
