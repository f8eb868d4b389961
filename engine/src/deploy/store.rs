//! Deployment record store
//!
//! Records are keyed by id, created by the orchestrator and frozen once they
//! reach a terminal status.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentStatus};

pub const CANCELLED_MESSAGE: &str = "cancelled before launch";

struct Tracked {
    record: Deployment,
    launch_started: bool,
}

/// In-memory deployment history
#[derive(Default)]
pub struct DeploymentStore {
    entries: RwLock<HashMap<Uuid, Tracked>>,
    finished: Notify,
}

impl DeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: Deployment) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            record.id,
            Tracked {
                record,
                launch_started: false,
            },
        );
    }

    pub fn get(&self, id: Uuid) -> Result<Deployment, EngineError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&id)
            .map(|t| t.record.clone())
            .ok_or_else(|| EngineError::NotFound(format!("deployment {}", id)))
    }

    /// All records, newest first
    pub fn list(&self) -> Vec<Deployment> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<Deployment> = entries.values().map(|t| t.record.clone()).collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    /// Mark the launcher step as started
    ///
    /// Returns false if the attempt was cancelled first.
    pub fn begin_launch(&self, id: Uuid) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(&id) {
            Some(tracked) if !tracked.record.status.is_terminal() => {
                tracked.launch_started = true;
                true
            }
            _ => false,
        }
    }

    /// Cancel an attempt whose launcher step has not begun
    pub fn cancel(&self, id: Uuid) -> Result<Deployment, EngineError> {
        let record = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let tracked = entries
                .get_mut(&id)
                .ok_or_else(|| EngineError::NotFound(format!("deployment {}", id)))?;

            if tracked.record.status.is_terminal() {
                return Err(EngineError::Conflict(format!(
                    "deployment {} already finished",
                    id
                )));
            }
            if tracked.launch_started {
                return Err(EngineError::Conflict(format!(
                    "deployment {} is already launching and must run to completion",
                    id
                )));
            }

            tracked.record.status = DeploymentStatus::Failed;
            tracked.record.message = CANCELLED_MESSAGE.to_string();
            tracked.record.finished_at = Some(Utc::now());
            tracked.record.clone()
        };

        self.finished.notify_waiters();
        Ok(record)
    }

    /// Record the terminal outcome of an attempt
    ///
    /// A record that is already terminal is never rewritten.
    pub fn finish(&self, id: Uuid, status: DeploymentStatus, message: impl Into<String>) -> bool {
        let updated = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            match entries.get_mut(&id) {
                Some(tracked) if !tracked.record.status.is_terminal() => {
                    tracked.record.status = status;
                    tracked.record.message = message.into();
                    if status.is_terminal() {
                        tracked.record.finished_at = Some(Utc::now());
                    }
                    true
                }
                _ => false,
            }
        };

        if updated {
            self.finished.notify_waiters();
        }
        updated
    }

    /// Wait until an attempt reaches a terminal status
    pub async fn wait_for(&self, id: Uuid) -> Result<Deployment, EngineError> {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.get(id)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            notified.await;
        }
    }
}
