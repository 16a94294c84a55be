//! Routing client.
//!
//! Resolves the shard of a key, then reads from one replica (round-robin,
//! falling through on failure) or writes to all of them concurrently. Writes
//! are not atomic across replicas: on partial failure the replicas that
//! succeeded keep the write and the caller sees the first error.

use super::pool::{ClientPool, KvClient};
use crate::config::ClientConfig;
use crate::error::{KvError, KvResult, validate_key};
use crate::membership::shard_map::ShardMap;
use crate::membership::types::ShardId;
use crate::storage::partitioner::shard_for_key;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct Kv {
    shard_map: Arc<ShardMap>,
    pool: Arc<dyn ClientPool>,
    config: ClientConfig,
    /// Next replica index to read from, per shard.
    rr_counter: Mutex<HashMap<ShardId, usize>>,
}

impl Kv {
    pub fn new(shard_map: Arc<ShardMap>, pool: Arc<dyn ClientPool>, config: ClientConfig) -> Self {
        Self {
            shard_map,
            pool,
            config,
            rr_counter: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> KvResult<Option<String>> {
        validate_key(key)?;
        self.with_deadline(self.read_any(key)).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        validate_key(key)?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let value = value.to_string();

        self.with_deadline(self.write_all(key, move |client, key| {
            let value = value.clone();
            async move { client.set(&key, &value, ttl_ms).await }
        }))
        .await
    }

    pub async fn delete(&self, key: &str) -> KvResult<()> {
        validate_key(key)?;
        self.with_deadline(
            self.write_all(key, |client, key| async move { client.delete(&key).await }),
        )
        .await
    }

    async fn with_deadline<T>(&self, call: impl Future<Output = KvResult<T>>) -> KvResult<T> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(KvError::DeadlineExceeded(self.config.request_timeout)),
        }
    }

    fn replicas(&self, key: &str) -> KvResult<(ShardId, Vec<String>)> {
        let shard = shard_for_key(key, self.shard_map.num_shards());
        let nodes = self.shard_map.nodes_for_shard(shard);
        if nodes.is_empty() {
            return Err(KvError::NoReplicas(shard));
        }
        Ok((shard, nodes))
    }

    /// Index of the replica to read first. The cursor moves past it, so the
    /// next read on this shard starts one replica further.
    fn next_start(&self, shard: ShardId, replicas: usize) -> usize {
        let mut counters = self.rr_counter.lock();
        let cursor = counters.entry(shard).or_insert(0);
        let start = *cursor % replicas;
        *cursor = (start + 1) % replicas;
        start
    }

    async fn read_any(&self, key: &str) -> KvResult<Option<String>> {
        let (shard, nodes) = self.replicas(key)?;
        let start = self.next_start(shard, nodes.len());

        let mut last_error = None;
        for offset in 0..nodes.len() {
            let node = &nodes[(start + offset) % nodes.len()];
            let result = match self.pool.get_client(node) {
                Ok(client) => client.get(key).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!("Get {} from {} failed: {}", key, node, e);
                    last_error = Some(e);
                }
            }
        }

        Err(KvError::AllNodesFailed {
            shard,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Sends one write to every replica and waits for all of them.
    async fn write_all<F, Fut>(&self, key: &str, op: F) -> KvResult<()>
    where
        F: Fn(Arc<dyn KvClient>, String) -> Fut,
        Fut: Future<Output = KvResult<()>>,
    {
        let (shard, nodes) = self.replicas(key)?;

        let mut pending: FuturesUnordered<_> = nodes
            .into_iter()
            .map(|node| {
                let client = self.pool.get_client(&node);
                let call = client.map(|client| op(client, key.to_string()));
                async move {
                    let result = match call {
                        Ok(call) => call.await,
                        Err(e) => Err(e),
                    };
                    (node, result)
                }
            })
            .collect();

        let mut first_error = None;
        while let Some((node, result)) = pending.next().await {
            if let Err(e) = result {
                tracing::debug!("Write of {} to {} (shard {}) failed: {}", key, node, shard, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
