//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::slot::Slot;

/// Status of a promotion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

/// One promotion attempt of a version into a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,

    pub service: String,

    pub version: String,

    pub slot: Slot,

    pub status: DeploymentStatus,

    /// Human-readable progress or failure reason
    pub message: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Create a record for an accepted attempt
    pub fn accepted(service: &str, version: &str, slot: Slot) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.to_string(),
            version: version.to_string(),
            slot,
            status: DeploymentStatus::InProgress,
            message: format!("deploying {} {} into {} slot", service, version, slot),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}
