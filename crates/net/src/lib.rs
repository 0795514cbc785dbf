//! HTTP layer for ringkv.
//!
//! Provides:
//! - [`HttpTransport`]: implements the cluster `Transport` trait over
//!   reqwest for real peer-to-peer I/O
//! - [`router`]: the axum application serving the public KV API, cluster
//!   management, the internal peer endpoints, and the health check
//!
//! The wire format is JSON throughout; peers speak to each other via
//! `POST /internal/replicate` and `GET /internal/fetch/:key`.

pub mod client;
pub mod server;
pub mod wire;

pub use client::HttpTransport;
pub use server::{router, AppState};
