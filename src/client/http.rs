//! HTTP transport: JSON over POST to the endpoints in
//! [`crate::storage::protocol`].

use super::pool::{ClientPool, KvClient};
use crate::config::HttpConfig;
use crate::error::{Code, ErrorResponse, KvError, KvResult};
use crate::membership::shard_map::ShardMap;
use crate::membership::types::ShardId;
use crate::storage::protocol::*;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

pub struct HttpKvClient {
    node: String,
    base_url: String,
    http_client: reqwest::Client,
    config: HttpConfig,
}

impl HttpKvClient {
    pub fn new(node: &str, host_port: &str, http_client: reqwest::Client, config: HttpConfig) -> Self {
        Self {
            node: node.to_string(),
            base_url: format!("http://{}", host_port),
            http_client,
            config,
        }
    }

    /// Fetches the node's name, hosted shards and entry count.
    pub async fn status(&self) -> KvResult<NodeStatusResponse> {
        let response = self
            .http_client
            .get(format!("{}{}", self.base_url, ENDPOINT_STATUS))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| KvError::unavailable(&self.node, e))?;
        self.decode(response).await
    }

    async fn call<Req, Resp>(&self, endpoint: &str, payload: &Req) -> KvResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self
            .post_with_retry(format!("{}{}", self.base_url, endpoint), payload)
            .await?;
        self.decode(response).await
    }

    async fn decode<Resp: DeserializeOwned>(&self, response: reqwest::Response) -> KvResult<Resp> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| KvError::Internal(format!("bad response from {}: {}", self.node, e)));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => Err(error.into()),
            Err(_) => Err(KvError::Remote {
                code: Code::from_http_status(status),
                message: format!("{} answered {}", self.node, status),
            }),
        }
    }

    // --- HTTP Helpers with Backoff ---

    /// Retries connection-level failures only; any HTTP response, error
    /// status included, is returned as is.
    async fn post_with_retry<T: Serialize>(&self, url: String, payload: &T) -> KvResult<reqwest::Response> {
        let attempts = self.config.attempts.max(1);
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.config.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(KvError::unavailable(&self.node, e));
                    }
                    tracing::debug!("Request to {} failed ({}), retrying", self.node, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(KvError::unavailable(&self.node, "retry attempts exhausted"))
    }
}

#[async_trait]
impl KvClient for HttpKvClient {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let request = GetRequest {
            key: key.to_string(),
        };
        let response: GetResponse = self.call(ENDPOINT_GET, &request).await?;
        Ok(response.into())
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: i64) -> KvResult<()> {
        let request = SetRequest {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms,
        };
        let _: Ack = self.call(ENDPOINT_SET, &request).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let request = DeleteRequest {
            key: key.to_string(),
        };
        let _: Ack = self.call(ENDPOINT_DELETE, &request).await?;
        Ok(())
    }

    async fn get_shard_contents(&self, shard: ShardId) -> KvResult<Vec<ShardValue>> {
        let response: ShardContentsResponse = self
            .call(ENDPOINT_SHARD_CONTENTS, &ShardContentsRequest { shard })
            .await?;
        Ok(response.values)
    }
}

/// Resolves node names through the shard map and keeps one client per node.
///
/// All clients share a single connection pool. A cached client is rebuilt
/// when the node's address changes in the shard map.
pub struct HttpClientPool {
    shard_map: Arc<ShardMap>,
    http_client: reqwest::Client,
    config: HttpConfig,
    clients: DashMap<String, (String, Arc<HttpKvClient>)>,
}

impl HttpClientPool {
    pub fn new(shard_map: Arc<ShardMap>, config: HttpConfig) -> Self {
        Self {
            shard_map,
            http_client: reqwest::Client::new(),
            config,
            clients: DashMap::new(),
        }
    }

    /// Like [`ClientPool::get_client`], keeping the concrete type.
    pub fn http_client(&self, node: &str) -> KvResult<Arc<HttpKvClient>> {
        let info = self
            .shard_map
            .node_info(node)
            .ok_or_else(|| KvError::unavailable(node, "not in shard map"))?;
        let host_port = info.host_port();

        if let Some(cached) = self.clients.get(node)
            && cached.0 == host_port
        {
            return Ok(cached.1.clone());
        }

        let client = Arc::new(HttpKvClient::new(
            node,
            &host_port,
            self.http_client.clone(),
            self.config.clone(),
        ));
        self.clients
            .insert(node.to_string(), (host_port, client.clone()));
        Ok(client)
    }
}

impl ClientPool for HttpClientPool {
    fn get_client(&self, node: &str) -> KvResult<Arc<dyn KvClient>> {
        let client: Arc<dyn KvClient> = self.http_client(node)?;
        Ok(client)
    }
}
