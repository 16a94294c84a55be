//! Error taxonomy shared by the server, the membership manager and the
//! routing client.
//!
//! Every error carries a transport-neutral [`Code`]. The HTTP layer maps codes
//! to status codes on the way out and back into [`KvError::Remote`] on the way
//! in, so a caller can always ask `err.code()` regardless of where the failure
//! happened.

use crate::membership::types::ShardId;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error class surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    /// Empty key, negative ttl, malformed shard map.
    InvalidArgument,
    /// Shard not hosted by the node that received the request.
    NotFound,
    /// No replicas known, every replica failed, node shutting down.
    Unavailable,
    /// The caller's deadline elapsed before the call completed.
    DeadlineExceeded,
    Internal,
}

impl Code {
    pub fn http_status(self) -> StatusCode {
        match self {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Best-effort inverse of [`Code::http_status`], used when a peer answers
    /// with an error status but no decodable body.
    pub fn from_http_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Code::InvalidArgument,
            StatusCode::NOT_FOUND => Code::NotFound,
            StatusCode::SERVICE_UNAVAILABLE => Code::Unavailable,
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => Code::DeadlineExceeded,
            _ => Code::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KvError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The node is not (or no longer) hosting the shard.
    #[error("shard {0} is not hosted on this node")]
    ShardNotHosted(ShardId),

    /// The shard map lists no node for the shard.
    #[error("no nodes available for shard {0}")]
    NoReplicas(ShardId),

    /// Every replica of the shard was tried and none answered.
    #[error("all nodes failed for shard {shard}: {last}")]
    AllNodesFailed { shard: ShardId, last: String },

    #[error("node {node} is unavailable: {reason}")]
    NodeUnavailable { node: String, reason: String },

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("node is shutting down")]
    ShuttingDown,

    /// Error reported by a peer node, decoded from the wire.
    #[error("{message}")]
    Remote { code: Code, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type KvResult<T> = Result<T, KvError>;

impl KvError {
    pub fn code(&self) -> Code {
        match self {
            KvError::InvalidArgument(_) => Code::InvalidArgument,
            KvError::ShardNotHosted(_) => Code::NotFound,
            KvError::NoReplicas(_)
            | KvError::AllNodesFailed { .. }
            | KvError::NodeUnavailable { .. }
            | KvError::ShuttingDown => Code::Unavailable,
            KvError::DeadlineExceeded(_) => Code::DeadlineExceeded,
            KvError::Remote { code, .. } => *code,
            KvError::Internal(_) => Code::Internal,
        }
    }

    pub fn unavailable(node: &str, reason: impl ToString) -> Self {
        KvError::NodeUnavailable {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Error body sent over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: Code,
    pub message: String,
}

impl From<ErrorResponse> for KvError {
    fn from(body: ErrorResponse) -> Self {
        KvError::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

impl IntoResponse for KvError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = ErrorResponse {
            code,
            message: self.to_string(),
        };
        (code.http_status(), Json(body)).into_response()
    }
}

/// Rejects empty keys before any shard state is touched.
pub fn validate_key(key: &str) -> KvResult<()> {
    if key.is_empty() {
        return Err(KvError::InvalidArgument("empty key not allowed".to_string()));
    }
    Ok(())
}
