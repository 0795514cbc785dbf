//! HTTP handlers: the public KV API, cluster management, and the internal
//! peer endpoints.
//!
//! Public routes go through the replicator so every operation is
//! quorum-coordinated; internal routes touch the local store directly,
//! because the sender is a coordinator that has already done the routing.

use crate::client::HttpTransport;
use crate::wire::{LeaveBody, PutBody, ReplicateRequest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ringkv_cluster::{Membership, Node, Replicator};
use ringkv_storage::Store;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Everything the handlers need, injected from the supervisor.
pub struct AppState {
    pub node_id: String,
    pub store: Arc<Store>,
    pub membership: Arc<Membership>,
    pub replicator: Arc<Replicator<HttpTransport>>,
}

/// Build the axum application.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Public KV API, used by clients.
        .route("/kv/:key", get(get_key).put(put_key).delete(delete_key))
        // Cluster management.
        .route("/cluster/join", post(join))
        .route("/cluster/leave", post(leave))
        .route("/cluster/nodes", get(list_nodes))
        // Internal endpoints used only by peer nodes.
        .route("/internal/replicate", post(internal_replicate))
        .route("/internal/fetch/:key", get(internal_fetch))
        // Liveness, for load balancers and probes.
        .route("/health", get(health))
        // A panicking handler answers 500 instead of dropping the
        // connection; the trace layer logs every request around it.
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("handler panicked: {detail}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

// ─── Public KV handlers ──────────────────────────────────────────────────

async fn put_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<PutBody>,
) -> Response {
    match state.replicator.replicate_write(&key, &body.value, None).await {
        Ok(value) => (
            StatusCode::OK,
            Json(json!({
                "key": key,
                "value": value.data,
                "clock": value.clock,
            })),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(key = %key, "put failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn get_key(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.replicator.coordinate_read(&key).await {
        Ok(Some(value)) => (
            StatusCode::OK,
            Json(json!({
                "key": key,
                "value": value.data,
                "clock": value.clock,
                "updated_at_ms": value.updated_at_ms,
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "key not found" })),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(key = %key, "get failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn delete_key(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.replicator.delete_replicated(&key).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "deleted": key }))).into_response(),
        Err(err) => {
            tracing::warn!(key = %key, "delete failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

// ─── Cluster management handlers ─────────────────────────────────────────

async fn join(State(state): State<Arc<AppState>>, Json(node): Json<Node>) -> Response {
    match state.membership.join(node.clone()) {
        Ok(()) => (StatusCode::OK, Json(json!({ "joined": node.id }))).into_response(),
        Err(err) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn leave(State(state): State<Arc<AppState>>, Json(body): Json<LeaveBody>) -> Response {
    match state.membership.leave(&body.id) {
        Ok(()) => (StatusCode::OK, Json(json!({ "left": body.id }))).into_response(),
        Err(err) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "nodes": state.membership.all() })),
    )
        .into_response()
}

// ─── Internal (peer-to-peer) handlers ────────────────────────────────────

async fn internal_replicate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplicateRequest>,
) -> Response {
    let m = ringkv_metrics::metrics();
    m.rpcs_received.inc();
    m.rpcs_received_by_type
        .with_label_values(&["replicate"])
        .inc();
    let _timer = ringkv_metrics::start_rpc_timer("replicate", "inbound");

    match state.store.apply_remote(&req.key, req.value) {
        Ok(_applied) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::warn!(key = %req.key, "apply_remote failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn internal_fetch(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let m = ringkv_metrics::metrics();
    m.rpcs_received.inc();
    m.rpcs_received_by_type.with_label_values(&["fetch"]).inc();
    let _timer = ringkv_metrics::start_rpc_timer("fetch", "inbound");

    match state.store.get_raw(&key) {
        Some(value) => (StatusCode::OK, Json(value)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not found" })),
        )
            .into_response(),
    }
}

// ─── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "node": state.node_id,
            "status": "ok",
            "nodes": state.membership.node_count(),
        })),
    )
        .into_response()
}
