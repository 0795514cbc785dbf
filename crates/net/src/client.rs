//! HTTP implementation of the peer [`Transport`].
//!
//! One pooled reqwest client with a per-request timeout; connections to
//! peers are reused across calls.

use crate::wire::ReplicateRequest;
use async_trait::async_trait;
use ringkv_cluster::{Node, Transport, TransportError};
use ringkv_storage::Value;
use std::time::Duration;

/// Peer transport over JSON/HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose every request is bounded by `rpc_timeout`.
    pub fn new(rpc_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| TransportError::RequestFailed("<local>".into(), e.to_string()))?;
        Ok(Self { client })
    }
}

fn request_error(peer: &Node, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(peer.id.clone())
    } else {
        TransportError::RequestFailed(peer.id.clone(), err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn replicate(
        &self,
        peer: &Node,
        key: &str,
        value: &Value,
    ) -> Result<(), TransportError> {
        let m = ringkv_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["replicate"]).inc();
        let _timer = ringkv_metrics::start_rpc_timer("replicate", "outbound");

        let url = format!("http://{}/internal/replicate", peer.address);
        let body = ReplicateRequest {
            key: key.to_string(),
            value: value.clone(),
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(peer, e))?;

        if !resp.status().is_success() {
            return Err(TransportError::Status(
                peer.id.clone(),
                resp.status().as_u16(),
            ));
        }
        Ok(())
    }

    async fn fetch(&self, peer: &Node, key: &str) -> Result<Option<Value>, TransportError> {
        let m = ringkv_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["fetch"]).inc();
        let _timer = ringkv_metrics::start_rpc_timer("fetch", "outbound");

        let url = format!("http://{}/internal/fetch/{}", peer.address, key);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(peer, e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(TransportError::Status(
                peer.id.clone(),
                resp.status().as_u16(),
            ));
        }

        let value = resp
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(peer.id.clone(), e.to_string()))?;
        Ok(Some(value))
    }
}
