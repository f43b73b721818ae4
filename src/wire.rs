//! JSON request/response bodies for `tetherd`'s HTTP control surface.
//! Shared between `tetherd` (serializes/deserializes them in its handlers)
//! and `tetherctl` (the client), so the two binaries can't drift apart on
//! field names the way hand-duplicated structs would.

use serde::{Deserialize, Serialize};

use crate::types::{EngineStatus, TetherMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnableRequest {
    pub mode: TetherMode,
    pub upstream_ifname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisableRequest {
    pub mode: TetherMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: EngineStatus,
    pub enable_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateNetworkRequest {
    pub owner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub owner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
