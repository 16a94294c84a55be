//! Storage Network Protocol
//!
//! API endpoints and Data Transfer Objects exchanged between routing clients
//! and storage nodes, and between storage nodes during shard migration.

use crate::membership::types::ShardId;

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Read a key from the node hosting its shard.
pub const ENDPOINT_GET: &str = "/kv/get";
/// Write a key with a ttl.
pub const ENDPOINT_SET: &str = "/kv/set";
pub const ENDPOINT_DELETE: &str = "/kv/delete";
/// Internal endpoint for bulk shard transfer during migration.
pub const ENDPOINT_SHARD_CONTENTS: &str = "/internal/shard_contents";
/// Node name, hosted shards and entry count.
pub const ENDPOINT_STATUS: &str = "/admin/status";
/// Pushes a new shard assignment to a node.
pub const ENDPOINT_SHARD_MAP: &str = "/admin/shard_map";

// --- Data Transfer Objects ---

/// Get request sent by the routing client to one replica of the key's shard.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
}

/// Get response. An absent key is a successful lookup, not an error.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub value: String,
    /// `false` when the key is absent or expired; `value` is empty then.
    pub was_found: bool,
}

impl From<Option<String>> for GetResponse {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(value) => Self {
                value,
                was_found: true,
            },
            None => Self {
                value: String::new(),
                was_found: false,
            },
        }
    }
}

impl From<GetResponse> for Option<String> {
    fn from(response: GetResponse) -> Self {
        response.was_found.then_some(response.value)
    }
}

/// Set request, fanned out to every replica of the key's shard.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    /// Relative ttl in milliseconds. Negative values are rejected.
    pub ttl_ms: i64,
}

/// Delete request, fanned out like Set. Deleting a missing key succeeds.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

/// Empty acknowledgment for Set and Delete.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Ack {}

/// Request for a snapshot of one shard, sent by a node that was just
/// assigned it to a peer that already hosts it.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardContentsRequest {
    /// Fails with NotFound if the peer does not host this shard.
    pub shard: ShardId,
}

/// One live entry of a shard snapshot.
///
/// The ttl is relative so that the receiving node can rebase it onto its own
/// clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardValue {
    pub key: String,
    pub value: String,
    /// Milliseconds left until expiry, measured when the snapshot was taken.
    pub ttl_ms_remaining: i64,
}

/// Response to a shard snapshot request.
///
/// Expired entries are left out, so every value has a positive remaining ttl.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardContentsResponse {
    pub shard: ShardId,
    /// Unordered live entries of the shard.
    pub values: Vec<ShardValue>,
}

/// Node status for operators and the stats reporter.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub node: String,
    /// Ascending.
    pub hosted_shards: Vec<ShardId>,
    /// Stored entries, including expired ones the sweeper has not reached yet.
    pub entries: usize,
}
