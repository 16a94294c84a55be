//! In-process holder of the shard assignment.
//!
//! The assignment itself is decided elsewhere; this type only stores the
//! latest state and tells subscribers that something changed. Notifications
//! carry no payload and coalesce, a listener always re-reads the full state.

use super::types::{NodeInfo, ShardId, ShardMapState};
use crate::error::{KvError, KvResult};

use parking_lot::RwLock;
use tokio::sync::watch;

pub struct ShardMap {
    state: RwLock<ShardMapState>,
    version: watch::Sender<u64>,
}

impl ShardMap {
    pub fn new(state: ShardMapState) -> KvResult<Self> {
        state.validate()?;
        let (version, _) = watch::channel(0);

        Ok(Self {
            state: RwLock::new(state),
            version,
        })
    }

    pub fn num_shards(&self) -> u32 {
        self.state.read().num_shards
    }

    pub fn nodes_for_shard(&self, shard: ShardId) -> Vec<String> {
        self.state.read().nodes_for_shard(shard)
    }

    pub fn shards_for_node(&self, node: &str) -> Vec<ShardId> {
        self.state.read().shards_for_node(node)
    }

    pub fn node_info(&self, node: &str) -> Option<NodeInfo> {
        self.state.read().nodes.get(node).cloned()
    }

    pub fn state(&self) -> ShardMapState {
        self.state.read().clone()
    }

    /// Number of updates applied so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Replaces the assignment and notifies every listener.
    ///
    /// The shard count cannot change. An identical state is accepted without
    /// notifying anyone.
    pub fn update(&self, new_state: ShardMapState) -> KvResult<()> {
        new_state.validate()?;

        {
            let mut state = self.state.write();
            if state.num_shards != new_state.num_shards {
                return Err(KvError::InvalidArgument(format!(
                    "shard count is fixed at {}, got {}",
                    state.num_shards, new_state.num_shards
                )));
            }
            if *state == new_state {
                return Ok(());
            }
            *state = new_state;
        }

        self.version.send_modify(|version| *version += 1);
        tracing::debug!("Shard map updated to version {}", self.version());

        Ok(())
    }

    pub fn subscribe(&self) -> ShardMapListener {
        ShardMapListener {
            rx: self.version.subscribe(),
        }
    }
}

/// Change notifications for one subscriber.
pub struct ShardMapListener {
    rx: watch::Receiver<u64>,
}

impl ShardMapListener {
    /// Waits for the next change. Returns `false` once the shard map has been
    /// dropped and no further change can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
