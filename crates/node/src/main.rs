//! ringkv-node: entry point for a cluster node.
//!
//! Loads config, opens the store (snapshot + WAL replay), seeds membership,
//! wires the replicator over the HTTP transport, then serves the API with a
//! periodic snapshot loop and a graceful shutdown sequence.
//!
//! Example — 3-node cluster:
//!
//! ```text
//! ringkv-node configs/node1.yaml
//! ringkv-node configs/node2.yaml
//! ringkv-node configs/node3.yaml
//! ```

use ringkv_cluster::{Membership, Node, QuorumConfig, Replicator};
use ringkv_net::{router, AppState, HttpTransport};
use ringkv_storage::Store;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ringkv_metrics::init_tracing();

    // First CLI arg is the YAML config path.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = ringkv_config::load_from_file(std::path::Path::new(&config_path))?;

    // ── Storage ─────────────────────────────────────────────────────────
    let data_dir = config.storage.data_dir.join(&config.node_id);
    let store = Arc::new(Store::open(&data_dir, &config.node_id)?);

    // ── Cluster membership ──────────────────────────────────────────────
    // This node is always part of its own roster.
    let mut seeds = vec![Node {
        id: config.node_id.clone(),
        address: config.listen.to_string(),
        is_alive: true,
    }];
    for peer in &config.cluster.peers {
        seeds.push(Node {
            id: peer.id.clone(),
            address: peer.address.clone(),
            is_alive: true,
        });
    }
    let membership = Arc::new(Membership::new(seeds, config.cluster.vnodes));

    // ── Replicator ──────────────────────────────────────────────────────
    // A cluster smaller than N caps the quorum parameters; the overlap
    // invariant must still hold afterwards or the node refuses to start.
    let quorum = QuorumConfig {
        n: config.cluster.n,
        w: config.cluster.w,
        r: config.cluster.r,
        op_deadline: Duration::from_millis(config.cluster.op_deadline_ms),
        ..QuorumConfig::default()
    }
    .capped_to(membership.node_count());

    if !quorum.quorum_holds() {
        tracing::error!(
            n = quorum.n,
            w = quorum.w,
            r = quorum.r,
            "W + R must be > N after live-cluster capping"
        );
        return Err("invalid quorum configuration".into());
    }

    let transport = Arc::new(HttpTransport::new(Duration::from_millis(
        config.cluster.rpc_timeout_ms,
    ))?);
    let replicator = Arc::new(Replicator::new(
        config.node_id.clone(),
        membership.clone(),
        store.clone(),
        transport,
        quorum.clone(),
    ));

    // ── HTTP server ─────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        node_id: config.node_id.clone(),
        store: store.clone(),
        membership: membership.clone(),
        replicator,
    });
    let app = router(state);

    // Metrics endpoint, if configured.
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{metrics_port}").parse()?;
        tokio::spawn(async move {
            if let Err(e) = ringkv_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {e}");
            }
        });
    }

    // Background snapshot loop.
    let snapshot_store = store.clone();
    let snapshot_interval = Duration::from_secs(config.storage.snapshot_interval_secs);
    let snapshot_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(snapshot_interval);
        ticker.tick().await; // the first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            match snapshot_store.snapshot() {
                Ok(()) => {
                    ringkv_metrics::metrics().snapshots_taken.inc();
                    tracing::debug!("snapshot saved");
                }
                Err(e) => tracing::warn!("snapshot failed: {e}"),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(
        node = %config.node_id,
        listen = %config.listen,
        n = quorum.n,
        w = quorum.w,
        r = quorum.r,
        "node started"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    // ── Graceful shutdown ───────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    tracing::info!(node = %config.node_id, "shutting down");

    let _ = shutdown_tx.send(());
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => {
            if let Err(e) = result? {
                tracing::warn!("server error during shutdown: {e}");
            }
        }
        Err(_) => {
            tracing::warn!("shutdown grace elapsed; aborting in-flight requests");
            server.abort();
        }
    }

    snapshot_task.abort();

    // Final snapshot so the next start replays an empty WAL.
    if let Err(e) = store.snapshot() {
        tracing::warn!("final snapshot failed: {e}");
    } else {
        ringkv_metrics::metrics().snapshots_taken.inc();
    }
    store.close()?;

    Ok(())
}
