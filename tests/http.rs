//! End-to-end check of the HTTP transport: two nodes on ephemeral ports,
//! the routing client over `HttpClientPool`, and shard migration over HTTP.

use shardkv::client::http::HttpClientPool;
use shardkv::client::kv::Kv;
use shardkv::client::pool::KvClient;
use shardkv::config::{ClientConfig, HttpConfig, ServerConfig};
use shardkv::error::Code;
use shardkv::membership::shard_map::ShardMap;
use shardkv::membership::types::{NodeInfo, ShardMapState};
use shardkv::storage::handlers::router;
use shardkv::storage::partitioner::shard_for_key;
use shardkv::storage::server::KvServer;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn state(ports: &[(&str, u16)], shards: &[(u32, &[&str])]) -> ShardMapState {
    ShardMapState {
        num_shards: 2,
        nodes: ports
            .iter()
            .map(|(node, port)| (node.to_string(), NodeInfo::new("127.0.0.1", *port)))
            .collect::<HashMap<_, _>>(),
        shards_to_nodes: shards
            .iter()
            .map(|(shard, nodes)| (*shard, nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>()))
            .collect::<BTreeMap<_, _>>(),
    }
}

async fn serve(
    node: &str,
    listener: TcpListener,
    shard_map: Arc<ShardMap>,
    pool: Arc<HttpClientPool>,
) -> Arc<KvServer> {
    let config = ServerConfig {
        sweep_interval: Duration::from_millis(50),
        migration_timeout: Duration::from_secs(2),
    };
    let server = KvServer::start(node, shard_map, pool, config).await;
    let app = router(server.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    server
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cluster_over_http() {
    let l1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let l2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ports = [
        ("n1", l1.local_addr().unwrap().port()),
        ("n2", l2.local_addr().unwrap().port()),
    ];

    // n1 owns both shards to begin with
    let shard_map = Arc::new(ShardMap::new(state(&ports, &[(1, &["n1"]), (2, &["n1"])])).unwrap());
    let pool = Arc::new(HttpClientPool::new(shard_map.clone(), HttpConfig::default()));
    let n1 = serve("n1", l1, shard_map.clone(), pool.clone()).await;
    let n2 = serve("n2", l2, shard_map.clone(), pool.clone()).await;

    let kv = Kv::new(shard_map.clone(), pool.clone(), ClientConfig::default());
    for i in 0..20 {
        kv.set(&format!("k{}", i), &format!("v{}", i), Duration::from_secs(60))
            .await
            .unwrap();
    }
    assert_eq!(kv.get("k3").await.unwrap(), Some("v3".to_string()));
    assert_eq!(kv.get("missing").await.unwrap(), None);

    // Errors keep their code across the wire
    let direct_n2 = pool.http_client("n2").unwrap();
    let err = direct_n2.get("k3").await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    let err = pool
        .http_client("n1")
        .unwrap()
        .set("k", "v", -5)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let status = pool.http_client("n1").unwrap().status().await.unwrap();
    assert_eq!(status.node, "n1");
    assert_eq!(status.hosted_shards, vec![1, 2]);
    assert_eq!(status.entries, 20);

    // Hand everything to n2, through n1 and n2 both
    shard_map
        .update(state(&ports, &[(1, &["n1", "n2"]), (2, &["n1", "n2"])]))
        .unwrap();
    assert!(wait_until(|| n2.hosted_shards() == vec![1, 2]).await);
    shard_map
        .update(state(&ports, &[(1, &["n2"]), (2, &["n2"])]))
        .unwrap();
    assert!(wait_until(|| n1.hosted_shards().is_empty()).await);

    for i in 0..20 {
        let key = format!("k{}", i);
        assert_eq!(direct_n2.get(&key).await.unwrap(), Some(format!("v{}", i)));
        assert_eq!(kv.get(&key).await.unwrap(), Some(format!("v{}", i)));
    }
    let contents = direct_n2
        .get_shard_contents(shard_for_key("k0", 2))
        .await
        .unwrap();
    assert!(contents.iter().any(|value| value.key == "k0"));

    kv.delete("k0").await.unwrap();
    assert_eq!(kv.get("k0").await.unwrap(), None);

    n1.shutdown().await;
    n2.shutdown().await;
    let err = direct_n2.get("k1").await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test]
async fn test_unreachable_node_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let shard_map = Arc::new(ShardMap::new(state(&[("n1", port)], &[(1, &["n1"]), (2, &["n1"])])).unwrap());
    let pool = Arc::new(HttpClientPool::new(
        shard_map.clone(),
        HttpConfig {
            timeout: Duration::from_millis(200),
            attempts: 2,
        },
    ));
    let kv = Kv::new(shard_map, pool, ClientConfig::default());

    let err = kv.get("k").await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    let err = kv.set("k", "v", Duration::from_secs(1)).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}
