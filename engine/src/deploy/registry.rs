//! Slot registry
//!
//! Authoritative in-memory record of both slots of every configured service.
//! Reads return a consistent per-service snapshot; every mutation goes
//! through [`SlotRegistry::transition`] and requires a [`SlotLease`], the
//! exclusive per (service, slot) right to mutate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::deploy::fsm::SlotEvent;
use crate::errors::EngineError;
use crate::models::slot::{ServiceSlots, Slot, SlotState};

struct ServiceEntry {
    slots: RwLock<ServiceSlots>,
    leases: [Arc<Mutex<()>>; 2],
}

impl ServiceEntry {
    fn new() -> Self {
        Self {
            slots: RwLock::new(ServiceSlots::new()),
            leases: [Arc::new(Mutex::new(())), Arc::new(Mutex::new(()))],
        }
    }
}

/// Exclusive mutation right over one (service, slot)
///
/// Released on drop.
pub struct SlotLease {
    service: String,
    slot: Slot,
    _guard: OwnedMutexGuard<()>,
}

impl SlotLease {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("service", &self.service)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Registry of slot states for a fixed set of services
pub struct SlotRegistry {
    services: HashMap<String, ServiceEntry>,
    order: Vec<String>,
}

impl SlotRegistry {
    /// Create a registry with every slot idle
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for service in services {
            let service = service.into();
            if map.contains_key(&service) {
                continue;
            }
            map.insert(service.clone(), ServiceEntry::new());
            order.push(service);
        }

        Self {
            services: map,
            order,
        }
    }

    /// Configured service names, in configuration order
    pub fn services(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    fn entry(&self, service: &str) -> Result<&ServiceEntry, EngineError> {
        self.services
            .get(service)
            .ok_or_else(|| EngineError::NotFound(format!("unknown service '{}'", service)))
    }

    /// Snapshot of both slots of a service
    pub fn get(&self, service: &str) -> Result<ServiceSlots, EngineError> {
        let entry = self.entry(service)?;
        let slots = entry.slots.read().unwrap_or_else(|e| e.into_inner());
        Ok(slots.clone())
    }

    /// Snapshot of a single slot
    pub fn slot(&self, service: &str, slot: Slot) -> Result<SlotState, EngineError> {
        Ok(self.get(service)?.get(slot).clone())
    }

    /// Snapshot of every service
    pub fn snapshot(&self) -> Vec<(String, ServiceSlots)> {
        self.order
            .iter()
            .filter_map(|name| self.get(name).ok().map(|slots| (name.clone(), slots)))
            .collect()
    }

    /// Take the mutation lease of a slot without waiting
    ///
    /// Fails with `Conflict` while another operation holds it.
    pub fn try_lease(&self, service: &str, slot: Slot) -> Result<SlotLease, EngineError> {
        let entry = self.entry(service)?;
        let guard = entry.leases[slot.index()]
            .clone()
            .try_lock_owned()
            .map_err(|_| {
                EngineError::Conflict(format!(
                    "{} slot of '{}' is busy with another operation",
                    slot, service
                ))
            })?;

        Ok(SlotLease {
            service: service.to_string(),
            slot,
            _guard: guard,
        })
    }

    /// Apply a lifecycle event to the leased slot
    pub fn transition(&self, lease: &SlotLease, event: SlotEvent) -> Result<SlotState, EngineError> {
        let entry = self.entry(&lease.service)?;
        let mut slots = entry.slots.write().unwrap_or_else(|e| e.into_inner());
        let state = slots.get_mut(lease.slot);

        debug!(
            service = %lease.service,
            slot = %lease.slot,
            from = %state.status,
            event = %event,
            "slot transition"
        );

        state.process(event).map_err(|e| {
            EngineError::Conflict(format!("{} slot of '{}': {}", lease.slot, lease.service, e))
        })?;

        Ok(state.clone())
    }
}
