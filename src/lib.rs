//! Sharded In-Memory Key-Value Store
//!
//! Library behind the `shardkv-node` binary. Also usable in-process, with
//! several nodes sharing a [`membership::shard_map::ShardMap`] and talking
//! through a [`client::pool::LocalClientPool`].
//!
//! ## Modules
//! - **`storage`**: per-shard stores with TTL expiration and the node service that
//!   serves them.
//! - **`membership`**: the shard assignment and the migration of shard data between
//!   nodes when it changes.
//! - **`client`**: node RPC transports and the routing client that load-balances
//!   reads and fans out writes.
//! - **`config`**, **`error`**: settings and the shared error type.

pub mod client;
pub mod config;
pub mod error;
pub mod membership;
pub mod storage;

#[cfg(test)]
mod testing;
