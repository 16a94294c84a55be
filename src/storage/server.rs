//! Storage node service.
//!
//! Serves Get/Set/Delete for the shards this node hosts and shard snapshots
//! for peers, and runs two background loops: the membership listener and the
//! expiration sweeper.

use super::hosted::HostedShards;
use super::partitioner::shard_for_key;
use super::protocol::{NodeStatusResponse, ShardValue};
use crate::client::pool::{ClientPool, KvClient};
use crate::config::ServerConfig;
use crate::error::{KvError, KvResult, validate_key};
use crate::membership::service::{MembershipManager, SyncReport};
use crate::membership::shard_map::ShardMap;
use crate::membership::types::ShardId;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct KvServer {
    node: String,
    shard_map: Arc<ShardMap>,
    hosted: Arc<HostedShards>,
    membership: Arc<MembershipManager>,
    config: ServerConfig,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KvServer {
    /// Starts a node: syncs with the current shard map, migrating assigned
    /// shards from peers, then spawns the background loops.
    pub async fn start(
        node: &str,
        shard_map: Arc<ShardMap>,
        pool: Arc<dyn ClientPool>,
        config: ServerConfig,
    ) -> Arc<Self> {
        let hosted = Arc::new(HostedShards::new());
        let membership = Arc::new(MembershipManager::new(
            node,
            shard_map.clone(),
            pool,
            hosted.clone(),
            config.migration_timeout,
        ));
        let (shutdown, _) = watch::channel(false);

        let server = Arc::new(Self {
            node: node.to_string(),
            shard_map,
            hosted,
            membership,
            config,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        // Subscribe first so that a change racing the initial sync is not lost.
        let listener = server.shard_map.subscribe();
        let report = server.membership.sync().await;
        tracing::info!(
            "Node {} started hosting {:?} ({} migrated from peers)",
            server.node,
            server.hosted_shards(),
            report.migrated()
        );

        let listener_handle = tokio::spawn(
            server
                .membership
                .clone()
                .run(listener, server.shutdown.subscribe()),
        );
        let sweeper_handle = tokio::spawn(sweep_loop(
            server.node.clone(),
            server.hosted.clone(),
            server.config.sweep_interval,
            server.shutdown.subscribe(),
        ));
        server.tasks.lock().extend([listener_handle, sweeper_handle]);

        server
    }

    /// Stops the background loops and drops all shard data. Safe to call more
    /// than once; afterwards every request fails with `ShuttingDown`.
    pub async fn shutdown(&self) {
        let already = self.shutdown.send_replace(true);

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Node {} background task failed: {}", self.node, e);
            }
        }
        self.membership.clear().await;

        if !already {
            tracing::info!("Node {} shut down", self.node);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn hosted_shards(&self) -> Vec<ShardId> {
        self.hosted.hosted().into_iter().collect()
    }

    /// Stored entries across hosted shards, including unswept expired ones.
    pub fn entry_count(&self) -> usize {
        self.hosted.entry_count()
    }

    pub fn status(&self) -> NodeStatusResponse {
        NodeStatusResponse {
            node: self.node.clone(),
            hosted_shards: self.hosted_shards(),
            entries: self.entry_count(),
        }
    }

    pub fn shard_map(&self) -> &Arc<ShardMap> {
        &self.shard_map
    }

    /// Re-applies the shard map immediately, without waiting for the listener.
    pub async fn sync(&self) -> KvResult<SyncReport> {
        self.ensure_running()?;
        Ok(self.membership.sync().await)
    }

    /// Runs one expiration pass over every hosted shard.
    pub fn sweep_expired(&self) -> usize {
        self.hosted.sweep(Instant::now())
    }

    pub fn get_local(&self, key: &str) -> KvResult<Option<String>> {
        self.ensure_running()?;
        validate_key(key)?;
        let shard = self.shard_for(key);
        tracing::trace!("Node {} get {} (shard {})", self.node, key, shard);

        let now = Instant::now();
        self.hosted
            .read(shard, |store| store.get(key, now).map(str::to_string))
            .ok_or(KvError::ShardNotHosted(shard))
    }

    pub fn set_local(&self, key: &str, value: String, ttl_ms: i64) -> KvResult<()> {
        self.ensure_running()?;
        validate_key(key)?;
        if ttl_ms < 0 {
            return Err(KvError::InvalidArgument(format!(
                "ttl must not be negative, got {}ms",
                ttl_ms
            )));
        }
        let shard = self.shard_for(key);
        tracing::trace!("Node {} set {} (shard {}, ttl {}ms)", self.node, key, shard, ttl_ms);

        let ttl = Duration::from_millis(ttl_ms as u64);
        let now = Instant::now();
        self.hosted
            .write(shard, |store| store.set(key, value, ttl, now))
            .ok_or(KvError::ShardNotHosted(shard))
    }

    pub fn delete_local(&self, key: &str) -> KvResult<()> {
        self.ensure_running()?;
        validate_key(key)?;
        let shard = self.shard_for(key);
        tracing::trace!("Node {} delete {} (shard {})", self.node, key, shard);

        self.hosted
            .write(shard, |store| {
                store.delete(key);
            })
            .ok_or(KvError::ShardNotHosted(shard))
    }

    /// Point-in-time snapshot of a hosted shard's live entries.
    pub fn shard_contents(&self, shard: ShardId) -> KvResult<Vec<ShardValue>> {
        self.ensure_running()?;
        tracing::trace!("Node {} shard contents {}", self.node, shard);

        let now = Instant::now();
        self.hosted
            .read(shard, |store| store.snapshot(now))
            .ok_or(KvError::ShardNotHosted(shard))
    }

    fn shard_for(&self, key: &str) -> ShardId {
        shard_for_key(key, self.shard_map.num_shards())
    }

    fn ensure_running(&self) -> KvResult<()> {
        if self.is_shut_down() {
            return Err(KvError::ShuttingDown);
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for KvServer {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.get_local(key)
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: i64) -> KvResult<()> {
        self.set_local(key, value.to_string(), ttl_ms)
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.delete_local(key)
    }

    async fn get_shard_contents(&self, shard: ShardId) -> KvResult<Vec<ShardValue>> {
        self.shard_contents(shard)
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn sweep_loop(
    node: String,
    hosted: Arc<HostedShards>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = interval.tick() => {}
        }

        let evicted = hosted.sweep(Instant::now());
        if evicted > 0 {
            tracing::debug!("Node {} swept {} expired entries", node, evicted);
        }
    }

    tracing::debug!("Node {} sweeper stopped", node);
}
