//! Helpers shared by the unit tests: shard map builders, an in-process
//! cluster and a scriptable fake node.

use crate::client::pool::{KvClient, LocalClientPool};
use crate::config::ServerConfig;
use crate::error::{KvError, KvResult};
use crate::membership::shard_map::ShardMap;
use crate::membership::types::{NodeInfo, ShardId, ShardMapState};
use crate::storage::partitioner::shard_for_key;
use crate::storage::protocol::ShardValue;
use crate::storage::server::KvServer;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Shard map over `nodes` (ports from 9001) with the given assignment.
pub fn map_state(num_shards: u32, nodes: &[&str], shards: &[(ShardId, &[&str])]) -> ShardMapState {
    ShardMapState {
        num_shards,
        nodes: nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.to_string(), NodeInfo::new("127.0.0.1", 9001 + i as u16)))
            .collect(),
        shards_to_nodes: shards
            .iter()
            .map(|(shard, owners)| (*shard, owners.iter().map(|n| n.to_string()).collect::<Vec<_>>()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// First key of the form `key-N` that lands on `shard`.
pub fn key_for_shard(shard: ShardId, num_shards: u32) -> String {
    (0..)
        .map(|i| format!("key-{}", i))
        .find(|key| shard_for_key(key, num_shards) == shard)
        .unwrap_or_default()
}

/// Polls `condition` for up to five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn fast_config() -> ServerConfig {
    ServerConfig {
        sweep_interval: Duration::from_millis(20),
        migration_timeout: Duration::from_millis(500),
    }
}

/// Several nodes in one process sharing a shard map and a local pool.
pub struct Cluster {
    pub shard_map: Arc<ShardMap>,
    pub pool: Arc<LocalClientPool>,
    pub servers: HashMap<String, Arc<KvServer>>,
}

impl Cluster {
    pub async fn start(state: ShardMapState, nodes: &[&str]) -> Self {
        let shard_map = Arc::new(ShardMap::new(state).unwrap());
        let mut cluster = Self {
            shard_map,
            pool: Arc::new(LocalClientPool::new()),
            servers: HashMap::new(),
        };
        for node in nodes {
            cluster.add_node(node, fast_config()).await;
        }
        cluster
    }

    pub async fn add_node(&mut self, node: &str, config: ServerConfig) -> Arc<KvServer> {
        let server = KvServer::start(node, self.shard_map.clone(), self.pool.clone(), config).await;
        self.pool.register(node, server.clone());
        self.servers.insert(node.to_string(), server.clone());
        server
    }

    pub fn node(&self, node: &str) -> &Arc<KvServer> {
        &self.servers[node]
    }

    pub async fn shutdown(&self) {
        for server in self.servers.values() {
            server.shutdown().await;
        }
    }
}

/// Fake node: an in-memory map plus injectable failures and latency.
#[derive(Default)]
pub struct FakeNode {
    pub name: String,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    pub data: Mutex<HashMap<String, String>>,
    snapshot: Mutex<Vec<ShardValue>>,
    calls: AtomicUsize,
}

impl FakeNode {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_snapshot(&self, values: Vec<ShardValue>) {
        *self.snapshot.lock() = values;
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.data.lock().insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> KvResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KvError::unavailable(&self.name, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for FakeNode {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.enter().await?;
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str, _ttl_ms: i64) -> KvResult<()> {
        self.enter().await?;
        self.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.enter().await?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn get_shard_contents(&self, _shard: ShardId) -> KvResult<Vec<ShardValue>> {
        self.enter().await?;
        Ok(self.snapshot.lock().clone())
    }
}
