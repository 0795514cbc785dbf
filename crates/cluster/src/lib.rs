//! Distributed logic for ringkv: who owns a key, who is in the cluster,
//! and how an operation reaches its quorum.
//!
//! - [`ring`]: consistent-hash ring with virtual nodes
//! - [`membership`]: cluster roster wrapping the ring
//! - [`replicator`]: the coordinator for quorum reads/writes, tombstoned
//!   deletes, and async read repair
//! - [`transport`]: the peer RPC contract, implemented over HTTP in
//!   `ringkv-net`
//! - [`chaos`]: failure-injecting transport wrapper for tests

pub mod chaos;
pub mod membership;
pub mod replicator;
pub mod ring;
pub mod transport;

pub use membership::{Membership, MembershipError, Node};
pub use replicator::{QuorumConfig, ReplicationError, Replicator};
pub use ring::Ring;
pub use transport::{Transport, TransportError};
