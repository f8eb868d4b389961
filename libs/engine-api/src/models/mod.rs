//! Engine API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Deploy request
///
/// Without a slot the engine picks one that carries no traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub service: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
}

/// Traffic weights request
///
/// Signed so that negative weights reach validation instead of failing
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficRequest {
    pub service: String,
    pub primary: i64,
    pub secondary: i64,
}

/// Error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
}
