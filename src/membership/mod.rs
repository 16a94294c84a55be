//! Membership Module
//!
//! Tracks which node hosts which shard and moves shard data when that changes.
//!
//! ## Core Mechanisms
//! - **Shard map**: the externally decided assignment, with change notifications
//!   that carry no payload (`shard_map`).
//! - **Delta sync**: on every change a node compares its hosted shards with its
//!   assignment, pulls snapshots of new shards from peers and drops the rest (`service`).

pub mod service;
pub mod shard_map;
pub mod types;
