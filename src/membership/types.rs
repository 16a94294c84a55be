use crate::error::{KvError, KvResult};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Shard number, always in `[1, num_shards]`.
pub type ShardId = u32;

/// Network location of a storage node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub address: String,
    pub port: u16,
}

impl NodeInfo {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// `address:port`, suitable for binding or building a URL.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Full shard assignment of a deployment.
///
/// The shard count is fixed for the lifetime of a deployment; only the node
/// list of each shard changes. Serialized as
/// `{"numShards": 2, "nodes": {"n1": {..}}, "shards": {"1": ["n1"]}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShardMapState {
    pub num_shards: u32,
    pub nodes: HashMap<String, NodeInfo>,
    /// Ordered replica list per shard. Shards missing from the map have no
    /// replicas.
    #[serde(rename = "shards")]
    pub shards_to_nodes: BTreeMap<ShardId, Vec<String>>,
}

impl ShardMapState {
    pub fn validate(&self) -> KvResult<()> {
        if self.num_shards == 0 {
            return Err(KvError::InvalidArgument(
                "shard map must declare at least one shard".to_string(),
            ));
        }

        for (shard, nodes) in &self.shards_to_nodes {
            if *shard == 0 || *shard > self.num_shards {
                return Err(KvError::InvalidArgument(format!(
                    "shard {} is outside [1, {}]",
                    shard, self.num_shards
                )));
            }
            if let Some(unknown) = nodes.iter().find(|node| !self.nodes.contains_key(*node)) {
                return Err(KvError::InvalidArgument(format!(
                    "shard {} lists undeclared node {}",
                    shard, unknown
                )));
            }
        }

        Ok(())
    }

    pub fn nodes_for_shard(&self, shard: ShardId) -> Vec<String> {
        self.shards_to_nodes.get(&shard).cloned().unwrap_or_default()
    }

    /// Shards that list `node` as a replica, in ascending order.
    pub fn shards_for_node(&self, node: &str) -> Vec<ShardId> {
        self.shards_to_nodes
            .iter()
            .filter(|(_, nodes)| nodes.iter().any(|n| n == node))
            .map(|(shard, _)| *shard)
            .collect()
    }
}
