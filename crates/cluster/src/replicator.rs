//! The coordinator: fans client operations out to replicas and enforces
//! quorums.
//!
//! With N replicas, W write acks, and R read responses, `W + R > N`
//! guarantees a read quorum overlaps every successful write quorum. The
//! classic configuration is N=3, W=2, R=2.
//!
//! Write path: write locally (one ack), fan replicate RPCs out to the peers
//! in parallel, and return once W acks are in. Peers that ack late keep
//! running in the background.
//!
//! Read path: fan fetches out to all N replicas, gather R responses,
//! reconcile by vector clock (wall clock breaks conflicts), answer with the
//! winner, and asynchronously push the winner to any replica seen stale.

use crate::membership::{Membership, Node};
use crate::transport::{Transport, TransportError};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use rand::Rng;
use ringkv_storage::{ClockRelation, Store, StoreError, Value, VectorClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Quorum and retry parameters for a [`Replicator`].
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Replication factor (N).
    pub n: usize,
    /// Write quorum (W).
    pub w: usize,
    /// Read quorum (R).
    pub r: usize,
    /// Overall deadline for a write or read operation.
    pub op_deadline: Duration,
    /// Attempts per replicate send.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt after that.
    pub retry_base_delay: Duration,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            n: 3,
            w: 2,
            r: 2,
            op_deadline: Duration::from_secs(5),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl QuorumConfig {
    /// Cap N, W, and R to the number of live nodes, so a small cluster does
    /// not deadlock waiting for replicas that cannot exist.
    pub fn capped_to(mut self, live_nodes: usize) -> Self {
        self.n = self.n.min(live_nodes);
        self.w = self.w.min(self.n);
        self.r = self.r.min(self.n);
        self
    }

    /// Whether the overlap invariant `W + R > N` holds.
    pub fn quorum_holds(&self) -> bool {
        self.n > 0 && self.w + self.r > self.n
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("local storage: {0}")]
    Storage(#[from] StoreError),
    #[error("write quorum not met ({acks}/{required} acks); peer errors: {errors:?}")]
    WriteQuorum {
        acks: usize,
        required: usize,
        errors: Vec<String>,
    },
    #[error("read quorum not met ({responses}/{required} responses); peer errors: {errors:?}")]
    ReadQuorum {
        responses: usize,
        required: usize,
        errors: Vec<String>,
    },
}

/// Coordinates replicated writes, reads, and deletes for one node.
///
/// Generic over `T: Transport` so tests can swap the HTTP client for an
/// in-memory or chaos transport.
pub struct Replicator<T: Transport> {
    self_id: String,
    membership: Arc<Membership>,
    store: Arc<Store>,
    transport: Arc<T>,
    config: QuorumConfig,
}

impl<T: Transport> std::fmt::Debug for Replicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("self_id", &self.self_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Replicator<T> {
    pub fn new(
        self_id: impl Into<String>,
        membership: Arc<Membership>,
        store: Arc<Store>,
        transport: Arc<T>,
        config: QuorumConfig,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            membership,
            store,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    // ── Write path ──────────────────────────────────────────────────────

    /// Write a key and wait for the write quorum.
    ///
    /// The local write happens first and counts as one ack; peer replication
    /// runs in parallel with retries. Once W acks are in the call returns,
    /// leaving the remaining peer sends to finish in the background.
    pub async fn replicate_write(
        &self,
        key: &str,
        data: &str,
        clock: Option<VectorClock>,
    ) -> Result<Value, ReplicationError> {
        let m = ringkv_metrics::metrics();
        m.kv_puts.inc();
        let _timer = ringkv_metrics::start_kv_timer("put");

        let value = self.store.put(key, data, clock)?;

        let peers = self.peers_for(key);
        let deadline = Instant::now() + self.config.op_deadline;
        let mut futs = FuturesUnordered::new();
        for peer in peers {
            futs.push(self.spawn_replicate(peer, key, value.clone()));
        }

        let required = self.config.w;
        let mut acks = 1usize; // the local write
        let mut errors = Vec::new();

        while acks < required {
            match tokio::time::timeout_at(deadline, futs.next()).await {
                Ok(Some(Ok((_peer, Ok(()))))) => acks += 1,
                Ok(Some(Ok((peer, Err(err))))) => errors.push(format!("{peer}: {err}")),
                Ok(Some(Err(join_err))) => errors.push(format!("replication task: {join_err}")),
                // All peers answered, or the deadline passed.
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if acks >= required {
            Ok(value)
        } else {
            m.quorum_failures.with_label_values(&["put"]).inc();
            Err(ReplicationError::WriteQuorum {
                acks,
                required,
                errors,
            })
        }
    }

    // ── Read path ───────────────────────────────────────────────────────

    /// Read a key through the read quorum.
    ///
    /// `Ok(None)` means the key is absent or tombstoned everywhere the
    /// quorum could see, which is distinct from failing to reach the quorum.
    pub async fn coordinate_read(&self, key: &str) -> Result<Option<Value>, ReplicationError> {
        let m = ringkv_metrics::metrics();
        m.kv_gets.inc();
        let _timer = ringkv_metrics::start_kv_timer("get");

        let replicas = self.membership.replica_nodes(key, self.config.n);
        let deadline = Instant::now() + self.config.op_deadline;
        let mut futs = FuturesUnordered::new();

        for node in replicas {
            if node.id == self.self_id {
                let store = self.store.clone();
                let key = key.to_string();
                futs.push(tokio::spawn(async move {
                    let value = store.get_raw(&key);
                    (node.id, Ok::<_, TransportError>(value))
                }));
            } else {
                let transport = self.transport.clone();
                let key = key.to_string();
                futs.push(tokio::spawn(async move {
                    let result = transport.fetch(&node, &key).await;
                    (node.id, result)
                }));
            }
        }

        let required = self.config.r;
        let mut responses: Vec<(String, Option<Value>)> = Vec::new();
        let mut errors = Vec::new();

        while responses.len() < required {
            match tokio::time::timeout_at(deadline, futs.next()).await {
                Ok(Some(Ok((peer, Ok(value))))) => responses.push((peer, value)),
                Ok(Some(Ok((peer, Err(err))))) => errors.push(format!("{peer}: {err}")),
                Ok(Some(Err(join_err))) => errors.push(format!("fetch task: {join_err}")),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if responses.len() < required {
            m.quorum_failures.with_label_values(&["get"]).inc();
            return Err(ReplicationError::ReadQuorum {
                responses: responses.len(),
                required,
                errors,
            });
        }

        let outcome = reconcile(&responses);
        let Some((_, winner)) = outcome.winner else {
            return Ok(None);
        };
        if winner.tombstone {
            return Ok(None);
        }

        if !outcome.stale.is_empty() {
            self.spawn_read_repair(key, winner.clone(), outcome.stale);
        }
        Ok(Some(winner))
    }

    // ── Delete path ─────────────────────────────────────────────────────

    /// Delete a key by replicating its tombstone.
    ///
    /// Unlike writes, this waits for *every* peer send to finish (not just
    /// W), so callers observe a strong attempt to place the tombstone
    /// everywhere. Individual peer failures are logged, not returned; read
    /// repair and later writes heal the rest.
    pub async fn delete_replicated(&self, key: &str) -> Result<(), ReplicationError> {
        let m = ringkv_metrics::metrics();
        m.kv_deletes.inc();
        let _timer = ringkv_metrics::start_kv_timer("delete");

        self.store.delete(key)?;
        let Some(tombstone) = self.store.get_raw(key) else {
            return Ok(());
        };

        let peers = self.peers_for(key);
        let sends = peers.into_iter().map(|peer| {
            let transport = self.transport.clone();
            let key = key.to_string();
            let value = tombstone.clone();
            let attempts = self.config.max_attempts;
            let base = self.config.retry_base_delay;
            async move {
                if let Err(err) =
                    send_with_retry(transport.as_ref(), &peer, &key, &value, attempts, base).await
                {
                    tracing::warn!(peer = %peer.id, key = %key, "tombstone replication failed: {err}");
                }
            }
        });
        futures::future::join_all(sends).await;
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// The replica set for `key`, excluding ourselves.
    fn peers_for(&self, key: &str) -> Vec<Node> {
        self.membership
            .replica_nodes(key, self.config.n)
            .into_iter()
            .filter(|node| node.id != self.self_id)
            .collect()
    }

    fn spawn_replicate(
        &self,
        peer: Node,
        key: &str,
        value: Value,
    ) -> tokio::task::JoinHandle<(String, Result<(), TransportError>)> {
        let transport = self.transport.clone();
        let key = key.to_string();
        let attempts = self.config.max_attempts;
        let base = self.config.retry_base_delay;
        tokio::spawn(async move {
            let result =
                send_with_retry(transport.as_ref(), &peer, &key, &value, attempts, base).await;
            (peer.id, result)
        })
    }

    /// Push the winning value to every replica seen stale during a read.
    /// Best effort: failures are swallowed.
    fn spawn_read_repair(&self, key: &str, winner: Value, stale: Vec<String>) {
        let membership = self.membership.clone();
        let transport = self.transport.clone();
        let key = key.to_string();
        let attempts = self.config.max_attempts;
        let base = self.config.retry_base_delay;

        tokio::spawn(async move {
            ringkv_metrics::metrics().read_repairs.inc();
            for node_id in stale {
                let Some(node) = membership.get(&node_id) else {
                    continue;
                };
                if let Err(err) =
                    send_with_retry(transport.as_ref(), &node, &key, &winner, attempts, base).await
                {
                    tracing::debug!(peer = %node_id, key = %key, "read repair failed: {err}");
                }
            }
        });
    }
}

/// Send one replicate RPC with exponential backoff between attempts
/// (base, 2·base, 4·base, …) plus a little jitter so peers retrying the
/// same overloaded node do not stampede it in lockstep.
async fn send_with_retry<T: Transport + ?Sized>(
    transport: &T,
    peer: &Node,
    key: &str,
    value: &Value,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<(), TransportError> {
    let mut last = None;
    for attempt in 1..=max_attempts {
        if attempt > 1 {
            ringkv_metrics::metrics().replicate_retries.inc();
            let backoff = base_delay * 2u32.pow(attempt - 2);
            let jitter_ms = {
                let cap = (backoff.as_millis() / 4) as u64;
                rand::thread_rng().gen_range(0..=cap)
            };
            tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
        }
        match transport.replicate(peer, key, value).await {
            Ok(()) => return Ok(()),
            Err(err) => last = Some(err),
        }
    }
    Err(TransportError::RetriesExhausted {
        peer: peer.id.clone(),
        attempts: max_attempts,
        last: Box::new(last.unwrap_or_else(|| {
            TransportError::RequestFailed(peer.id.clone(), "no attempt made".into())
        })),
    })
}

// ── Reconciliation ──────────────────────────────────────────────────────

/// Result of reconciling a set of replica responses.
#[derive(Debug)]
pub struct ReadOutcome {
    /// The winning value and the node it came from, if any replica had one.
    pub winner: Option<(String, Value)>,
    /// Nodes whose answer was behind the winner (including nodes that had
    /// nothing at all); targets for read repair.
    pub stale: Vec<String>,
}

/// Pick the most recent value among replica responses and list the nodes
/// that are behind it.
///
/// A strictly newer clock wins outright. Concurrent clocks fall back to the
/// wall clock, later write wins; on an exact timestamp tie the current
/// winner is kept, so repeated reconciliations never flap. The winner's
/// node id travels along so a demoted former winner is repaired too.
pub fn reconcile(responses: &[(String, Option<Value>)]) -> ReadOutcome {
    let mut winner: Option<(&str, &Value)> = None;
    let mut stale: Vec<String> = Vec::new();

    for (node_id, value) in responses {
        let Some(value) = value else { continue };
        let Some((winner_id, winner_value)) = winner else {
            winner = Some((node_id.as_str(), value));
            continue;
        };
        match value.clock.compare(&winner_value.clock) {
            ClockRelation::After => {
                stale.push(winner_id.to_string());
                winner = Some((node_id.as_str(), value));
            }
            ClockRelation::Before => stale.push(node_id.clone()),
            ClockRelation::Equal => {}
            ClockRelation::Concurrent => {
                if value.updated_at_ms > winner_value.updated_at_ms {
                    stale.push(winner_id.to_string());
                    winner = Some((node_id.as_str(), value));
                } else {
                    stale.push(node_id.clone());
                }
            }
        }
    }

    let Some((winner_id, winner_value)) = winner else {
        return ReadOutcome {
            winner: None,
            stale: Vec::new(),
        };
    };

    // Replicas that answered with nothing are missing the winner entirely.
    for (node_id, value) in responses {
        if value.is_none() && node_id != winner_id {
            stale.push(node_id.clone());
        }
    }

    ReadOutcome {
        winner: Some((winner_id.to_string(), winner_value.clone())),
        stale,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
