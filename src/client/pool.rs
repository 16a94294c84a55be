//! Per-node RPC handles and the pools handing them out.

use crate::error::{KvError, KvResult};
use crate::membership::types::ShardId;
use crate::storage::protocol::ShardValue;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// RPC surface of one storage node.
///
/// Implemented by the HTTP transport and directly by the in-process server.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_ms: i64) -> KvResult<()>;

    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Snapshot of every live entry of `shard`, used by migration only.
    async fn get_shard_contents(&self, shard: ShardId) -> KvResult<Vec<ShardValue>>;
}

/// Hands out clients for node names. Hides connection setup and reuse.
pub trait ClientPool: Send + Sync {
    fn get_client(&self, node: &str) -> KvResult<Arc<dyn KvClient>>;
}

/// Pool of in-process clients, for single-process clusters and tests.
///
/// Nodes can be marked unreachable to simulate partitions.
#[derive(Default)]
pub struct LocalClientPool {
    clients: DashMap<String, Arc<dyn KvClient>>,
    unreachable: DashSet<String>,
}

impl LocalClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: &str, client: Arc<dyn KvClient>) {
        self.clients.insert(node.to_string(), client);
    }

    pub fn deregister(&self, node: &str) {
        self.clients.remove(node);
    }

    pub fn set_unreachable(&self, node: &str, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(node.to_string());
        } else {
            self.unreachable.remove(node);
        }
    }
}

impl ClientPool for LocalClientPool {
    fn get_client(&self, node: &str) -> KvResult<Arc<dyn KvClient>> {
        if self.unreachable.contains(node) {
            return Err(KvError::unavailable(node, "node unreachable"));
        }
        self.clients
            .get(node)
            .map(|client| client.value().clone())
            .ok_or_else(|| KvError::unavailable(node, "no client registered"))
    }
}
