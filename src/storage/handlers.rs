use axum::{
    Json, Router,
    extract::Extension,
    routing::{get, post, put},
};
use std::sync::Arc;

use super::protocol::*;
use super::server::KvServer;
use crate::error::KvError;
use crate::membership::types::ShardMapState;

/// HTTP surface of a storage node.
pub fn router(server: Arc<KvServer>) -> Router {
    Router::new()
        .route(ENDPOINT_GET, post(handle_get))
        .route(ENDPOINT_SET, post(handle_set))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_SHARD_CONTENTS, post(handle_shard_contents))
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(ENDPOINT_SHARD_MAP, put(handle_update_shard_map))
        .layer(Extension(server))
}

pub async fn handle_get(
    Extension(server): Extension<Arc<KvServer>>,
    Json(req): Json<GetRequest>,
) -> Result<Json<GetResponse>, KvError> {
    let value = server.get_local(&req.key)?;
    Ok(Json(value.into()))
}

pub async fn handle_set(
    Extension(server): Extension<Arc<KvServer>>,
    Json(req): Json<SetRequest>,
) -> Result<Json<Ack>, KvError> {
    server.set_local(&req.key, req.value, req.ttl_ms)?;
    Ok(Json(Ack::default()))
}

pub async fn handle_delete(
    Extension(server): Extension<Arc<KvServer>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<Ack>, KvError> {
    server.delete_local(&req.key)?;
    Ok(Json(Ack::default()))
}

/// Internal: serves a shard snapshot to a migrating peer.
pub async fn handle_shard_contents(
    Extension(server): Extension<Arc<KvServer>>,
    Json(req): Json<ShardContentsRequest>,
) -> Result<Json<ShardContentsResponse>, KvError> {
    let values = server.shard_contents(req.shard)?;
    tracing::debug!(
        "Serving snapshot of shard {} ({} entries)",
        req.shard,
        values.len()
    );
    Ok(Json(ShardContentsResponse {
        shard: req.shard,
        values,
    }))
}

pub async fn handle_status(Extension(server): Extension<Arc<KvServer>>) -> Json<NodeStatusResponse> {
    Json(server.status())
}

/// Replaces this node's shard map. The membership listener picks the change
/// up and migrates.
pub async fn handle_update_shard_map(
    Extension(server): Extension<Arc<KvServer>>,
    Json(state): Json<ShardMapState>,
) -> Result<Json<Ack>, KvError> {
    if server.is_shut_down() {
        return Err(KvError::ShuttingDown);
    }
    server.shard_map().update(state)?;
    tracing::info!("Node {} received a new shard map", server.node_name());
    Ok(Json(Ack::default()))
}
