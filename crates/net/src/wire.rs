//! Wire formats shared by the HTTP server and the peer client.

use ringkv_storage::Value;
use serde::{Deserialize, Serialize};

/// Body of `POST /internal/replicate`: a value pushed from a coordinator,
/// applied on the receiving node with remote-write arbitration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub key: String,
    pub value: Value,
}

/// Body of `PUT /kv/:key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutBody {
    pub value: String,
}

/// Body of `POST /cluster/leave`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveBody {
    pub id: String,
}
