//! Abstraction over peer-to-peer replication RPCs.
//!
//! A trait in the domain crate with the HTTP implementation in
//! `ringkv-net`; tests substitute in-memory or chaos transports.

use crate::membership::Node;
use async_trait::async_trait;
use ringkv_storage::Value;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {0} failed: {1}")]
    RequestFailed(String, String),
    #[error("peer {0} returned status {1}")]
    Status(String, u16),
    #[error("timeout contacting {0}")]
    Timeout(String),
    #[error("decoding response from {0} failed: {1}")]
    Decode(String, String),
    #[error("replicate to {peer} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        peer: String,
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },
}

/// Peer transport for the two replica RPCs.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Push a value to a peer. The peer applies it with remote-write
    /// arbitration (`Store::apply_remote`), so sending an older value is
    /// safe: the peer deterministically discards it.
    async fn replicate(&self, peer: &Node, key: &str, value: &Value)
        -> Result<(), TransportError>;

    /// Fetch the raw stored value from a peer, tombstones included.
    /// `Ok(None)` means the peer has never seen the key.
    async fn fetch(&self, peer: &Node, key: &str) -> Result<Option<Value>, TransportError>;
}
