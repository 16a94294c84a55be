//! Storage Module
//!
//! The per-node side of the store.
//!
//! ## Core Concepts
//! - **Partitioning**: keys map to a fixed number of shards by a stable hash (`partitioner`).
//! - **Shard Store**: each hosted shard keeps its entries and an expiration min-heap
//!   under one lock (`memory`, `expiry`).
//! - **Hosting**: `hosted` tracks which shards exist on this node; shards come and go
//!   through the membership manager.
//! - **Serving**: `KvServer` answers requests for hosted shards and rejects the rest
//!   as not found; `handlers` exposes it over HTTP.

pub mod expiry;
pub mod handlers;
pub mod hosted;
pub mod memory;
pub mod partitioner;
pub mod protocol;
pub mod server;
