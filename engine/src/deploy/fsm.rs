//! Finite state machine for slot lifecycle
//!
//! `Idle -> Deploying -> {Active | Failed}`; `Active` and `Failed` can always
//! be redeployed. Restart keeps an `Active` slot `Active` or fails it.

use std::fmt;

use chrono::Utc;

use crate::models::slot::{InstanceRef, SlotState, SlotStatus};

/// Slot lifecycle event
#[derive(Debug, Clone)]
pub enum SlotEvent {
    /// A deployment attempt takes the slot
    Deploy,

    /// Launch and health gate passed
    Promote {
        version: String,
        instance: InstanceRef,
    },

    /// Launch, health gate or re-probe failed
    Fail {
        reason: String,
        version: Option<String>,
        instance: Option<InstanceRef>,
    },

    /// Instance restarted in place and answered its probe
    Restarted { instance: InstanceRef },

    /// Healthy instance found while reconciling at startup
    Discover {
        version: String,
        instance: InstanceRef,
    },

    /// Attempt cancelled before launch, put the previous record back
    Restore(SlotState),
}

impl fmt::Display for SlotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotEvent::Deploy => "deploy",
            SlotEvent::Promote { .. } => "promote",
            SlotEvent::Fail { .. } => "fail",
            SlotEvent::Restarted { .. } => "restarted",
            SlotEvent::Discover { .. } => "discover",
            SlotEvent::Restore(_) => "restore",
        };
        f.write_str(name)
    }
}

impl SlotState {
    /// Process an event and transition state
    ///
    /// The record is left untouched when the transition is rejected.
    pub fn process(&mut self, event: SlotEvent) -> Result<(), String> {
        let mut next = self.clone();

        match (self.status, event) {
            (SlotStatus::Idle | SlotStatus::Active | SlotStatus::Failed, SlotEvent::Deploy) => {
                next.status = SlotStatus::Deploying;
                next.last_error = None;
            }

            (SlotStatus::Deploying, SlotEvent::Promote { version, instance })
            | (SlotStatus::Idle, SlotEvent::Discover { version, instance }) => {
                if version.trim().is_empty() {
                    return Err("Cannot activate a slot without a version".to_string());
                }
                next.status = SlotStatus::Active;
                next.version = Some(version);
                next.instance = Some(instance);
                next.last_error = None;
                next.deployed_at = Some(Utc::now());
            }

            (
                SlotStatus::Deploying | SlotStatus::Active,
                SlotEvent::Fail {
                    reason,
                    version,
                    instance,
                },
            ) => {
                next.status = SlotStatus::Failed;
                next.last_error = Some(reason);
                next.version = version;
                next.instance = instance;
            }

            (SlotStatus::Active, SlotEvent::Restarted { instance }) => {
                next.instance = Some(instance);
                next.last_error = None;
            }

            (SlotStatus::Deploying, SlotEvent::Restore(previous)) => {
                if previous.status == SlotStatus::Deploying {
                    return Err("Cannot restore a deploying record".to_string());
                }
                next = previous;
            }

            (state, event) => {
                return Err(format!("Invalid transition: {} -> {}", state, event));
            }
        }

        check_invariants(&next)?;
        next.updated_at = Utc::now();
        *self = next;
        Ok(())
    }
}

/// `Active` implies both a version and an instance
pub fn check_invariants(state: &SlotState) -> Result<(), String> {
    if state.status == SlotStatus::Active && (state.version.is_none() || state.instance.is_none())
    {
        return Err("Active slot must record a version and an instance".to_string());
    }
    Ok(())
}
