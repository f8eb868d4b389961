//! Slot models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the two execution slots of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Historically "blue"
    Primary,

    /// Historically "green"
    Secondary,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Primary, Slot::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Primary => "primary",
            Slot::Secondary => "secondary",
        }
    }

    /// The opposite slot
    pub fn other(&self) -> Slot {
        match self {
            Slot::Primary => Slot::Secondary,
            Slot::Secondary => Slot::Primary,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Slot::Primary => 0,
            Slot::Secondary => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" | "blue" | "slot-a" => Ok(Slot::Primary),
            "secondary" | "green" | "slot-b" => Ok(Slot::Secondary),
            _ => Err(format!("Invalid slot: {} (expected 'primary' or 'secondary')", s)),
        }
    }
}

/// Lifecycle status of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    /// Never deployed to
    Idle,

    /// A deployment attempt owns the slot
    Deploying,

    /// Running a healthy instance
    Active,

    /// Last attempt or re-probe failed
    Failed,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotStatus::Idle => "idle",
            SlotStatus::Deploying => "deploying",
            SlotStatus::Active => "active",
            SlotStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Handle of the instance that currently owns a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    /// Runtime identifier (container id)
    pub id: String,

    /// Stable instance name, also its DNS name on the shared network
    pub name: String,

    /// Network address reported by the runtime, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl InstanceRef {
    /// Host used to reach the instance, preferring the reported address
    pub fn host(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }
}

/// Per (service, slot) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    pub status: SlotStatus,

    /// Deployed artifact tag
    pub version: Option<String>,

    /// Currently owned running instance
    pub instance: Option<InstanceRef>,

    /// Reason of the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the current version was promoted
    pub deployed_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl SlotState {
    pub fn idle() -> Self {
        Self {
            status: SlotStatus::Idle,
            version: None,
            instance: None,
            last_error: None,
            deployed_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SlotStatus::Active
    }
}

impl Default for SlotState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Consistent snapshot of both slots of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSlots {
    pub primary: SlotState,
    pub secondary: SlotState,
}

impl ServiceSlots {
    pub fn new() -> Self {
        Self {
            primary: SlotState::idle(),
            secondary: SlotState::idle(),
        }
    }

    pub fn get(&self, slot: Slot) -> &SlotState {
        match slot {
            Slot::Primary => &self.primary,
            Slot::Secondary => &self.secondary,
        }
    }

    pub fn get_mut(&mut self, slot: Slot) -> &mut SlotState {
        match slot {
            Slot::Primary => &mut self.primary,
            Slot::Secondary => &mut self.secondary,
        }
    }
}

impl Default for ServiceSlots {
    fn default() -> Self {
        Self::new()
    }
}
