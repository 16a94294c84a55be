//! Client Module
//!
//! - **`pool`**: the per-node RPC trait and the pools that hand out node clients.
//! - **`http`**: JSON-over-HTTP implementation of the node RPCs.
//! - **`kv`**: the routing client applications use.

pub mod http;
pub mod kv;
pub mod pool;
