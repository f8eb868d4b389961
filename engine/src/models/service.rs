//! Aggregated views returned to callers

use serde::{Deserialize, Serialize};

use crate::models::release::ReleaseTag;
use crate::models::routing::ServiceRouting;
use crate::models::slot::SlotState;

/// Both slots of a service together with its traffic weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub primary: SlotState,
    pub secondary: SlotState,
    pub routing: ServiceRouting,
}

/// Release tag plus whether any slot currently runs it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseView {
    #[serde(flatten)]
    pub release: ReleaseTag,
    pub deployed: bool,
}
