//! Chaos injection wrapper for [`Transport`].
//!
//! [`ChaosTransport`] wraps any `T: Transport` and injects configurable
//! failures: random errors, per-node failures, and latency. Used by the
//! cluster integration tests to simulate partitions and flaky peers.

use crate::membership::Node;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use ringkv_storage::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for transport chaos injection.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of returning an error \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// A [`Transport`] wrapper that injects chaos (failures, latency,
/// per-node blocks).
pub struct ChaosTransport<T: Transport> {
    inner: Arc<T>,
    config: Arc<RwLock<ChaosConfig>>,
    /// Nodes that are explicitly marked as unreachable.
    failed_nodes: Arc<RwLock<HashSet<String>>>,
}

impl<T: Transport> std::fmt::Debug for ChaosTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosTransport").finish_non_exhaustive()
    }
}

impl<T: Transport> ChaosTransport<T> {
    pub fn new(inner: T, config: ChaosConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config: Arc::new(RwLock::new(config)),
            failed_nodes: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Mark a node as unreachable (until recovered).
    pub fn fail_node(&self, node_id: &str) {
        self.failed_nodes.write().insert(node_id.to_string());
    }

    /// Remove a node from the failed set.
    pub fn recover_node(&self, node_id: &str) {
        self.failed_nodes.write().remove(node_id);
    }

    /// Dynamically update the random failure rate.
    pub fn set_failure_rate(&self, rate: f64) {
        self.config.write().failure_rate = rate;
    }

    /// Apply chaos checks: returns Err if the request should fail.
    async fn maybe_fail(&self, peer: &Node) -> Result<(), TransportError> {
        if self.failed_nodes.read().contains(&peer.id) {
            return Err(TransportError::RequestFailed(
                peer.id.clone(),
                "chaos: node marked as failed".into(),
            ));
        }

        let (delay, failure_rate) = {
            let config = self.config.read();
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            (
                config.latency + Duration::from_millis(jitter_ms),
                config.failure_rate,
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(TransportError::RequestFailed(
                peer.id.clone(),
                "chaos: random failure".into(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl<T: Transport> Transport for ChaosTransport<T> {
    async fn replicate(
        &self,
        peer: &Node,
        key: &str,
        value: &Value,
    ) -> Result<(), TransportError> {
        self.maybe_fail(peer).await?;
        self.inner.replicate(peer, key, value).await
    }

    async fn fetch(&self, peer: &Node, key: &str) -> Result<Option<Value>, TransportError> {
        self.maybe_fail(peer).await?;
        self.inner.fetch(peer, key).await
    }
}

// ────────────────────────── Tests ──────────────────────────
