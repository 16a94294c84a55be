use anyhow::{Context, Result};
use clap::Parser;
use shardkv::client::http::HttpClientPool;
use shardkv::config::{HttpConfig, NodeArgs, load_shard_map};
use shardkv::membership::shard_map::ShardMap;
use shardkv::storage::handlers::router;
use shardkv::storage::server::KvServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = NodeArgs::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 1. Shard map:
    let state = load_shard_map(&args.shard_map)?;
    let local = state
        .nodes
        .get(&args.node)
        .cloned()
        .with_context(|| format!("node {} is not declared in the shard map", args.node))?;
    let shard_map = Arc::new(ShardMap::new(state)?);
    tracing::info!(
        "Loaded shard map with {} shards, {} assigned to {}",
        shard_map.num_shards(),
        shard_map.shards_for_node(&args.node).len(),
        args.node
    );

    // 2. Storage node (migrates its shards before serving):
    let pool = Arc::new(HttpClientPool::new(shard_map.clone(), HttpConfig::default()));
    let server = KvServer::start(&args.node, shard_map.clone(), pool, args.server_config()).await;

    // 3. Spawn stats reporter:
    let stats_server = server.clone();
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            if stats_server.is_shut_down() {
                break;
            }
            tracing::info!(
                "Node stats: {} hosted shards {:?}, {} entries",
                stats_server.node_name(),
                stats_server.hosted_shards(),
                stats_server.entry_count()
            );
        }
    });

    // 4. Spawn shard map reloader:
    let reload_handle = args.reload_interval_ms.map(|period_ms| {
        let path = args.shard_map.clone();
        let shard_map = shard_map.clone();
        tokio::spawn(reload_loop(path, shard_map, Duration::from_millis(period_ms.max(1))))
    });

    // 5. Start HTTP server:
    let bind_addr = args.bind.clone().unwrap_or_else(|| local.host_port());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Node {} listening on {}", args.node, bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, router(server.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    server.shutdown().await;
    stats_handle.abort();
    if let Some(handle) = reload_handle {
        handle.abort();
    }

    Ok(())
}

/// Polls the shard map file and applies changed contents.
async fn reload_loop(path: PathBuf, shard_map: Arc<ShardMap>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let state = match load_shard_map(&path) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Shard map reload skipped: {:#}", e);
                continue;
            }
        };

        let before = shard_map.version();
        match shard_map.update(state) {
            Ok(()) if shard_map.version() != before => {
                tracing::info!("Shard map reloaded from {}", path.display());
            }
            Ok(()) => {}
            Err(e) => tracing::error!("Rejected shard map from {}: {}", path.display(), e),
        }
    }
}
