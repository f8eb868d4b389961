//! Traffic allocator
//!
//! Owns the in-memory routing table and is the only writer of the router
//! document. Writes are serialized process-wide and published in memory only
//! once the router confirmed them.

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::deploy::registry::{SlotLease, SlotRegistry};
use crate::errors::EngineError;
use crate::models::routing::{ServiceRouting, TOTAL_WEIGHT};
use crate::models::slot::{ServiceSlots, Slot};
use crate::traffic::{RouterStore, RoutingTable};

pub struct TrafficAllocator {
    registry: Arc<SlotRegistry>,
    router: Arc<dyn RouterStore>,

    /// Weights confirmed by the router
    published: RwLock<RoutingTable>,

    /// Last document known to be on the router; `None` forces a reload
    writer: Mutex<Option<RoutingTable>>,
}

impl TrafficAllocator {
    pub fn new(registry: Arc<SlotRegistry>, router: Arc<dyn RouterStore>) -> Self {
        Self {
            registry,
            router,
            published: RwLock::new(RoutingTable::new()),
            writer: Mutex::new(None),
        }
    }

    /// Current weights of a service, `0/0` if never routed
    pub fn get(&self, service: &str) -> Result<ServiceRouting, EngineError> {
        if !self.registry.contains(service) {
            return Err(EngineError::NotFound(format!("unknown service '{}'", service)));
        }
        let published = self.published.read().unwrap_or_else(|e| e.into_inner());
        Ok(published.get(service).copied().unwrap_or_default())
    }

    pub fn weight(&self, service: &str, slot: Slot) -> Result<u32, EngineError> {
        Ok(self.get(service)?.weight(slot))
    }

    /// Snapshot of every published routing entry
    pub fn table(&self) -> RoutingTable {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the weights of a service
    ///
    /// Every slot receiving traffic must be `Active` and is leased for the
    /// duration of the write, so no deployment or restart can take it
    /// meanwhile.
    pub async fn set_weights(
        &self,
        service: &str,
        primary: u32,
        secondary: u32,
    ) -> Result<ServiceRouting, EngineError> {
        if !self.registry.contains(service) {
            return Err(EngineError::NotFound(format!("unknown service '{}'", service)));
        }

        let routing = ServiceRouting::new(primary, secondary);
        if primary.checked_add(secondary) != Some(TOTAL_WEIGHT) {
            return Err(EngineError::Conflict(format!(
                "weights {}/{} for '{}' must add up to {}",
                primary, secondary, service, TOTAL_WEIGHT
            )));
        }

        let _leases = self.lease_receiving(service, routing)?;
        let slots = self.registry.get(service)?;
        check_targets(service, &slots, routing)?;

        self.write(service, routing).await?;

        info!(
            service,
            primary = routing.primary,
            secondary = routing.secondary,
            "traffic weights applied"
        );
        Ok(routing)
    }

    /// Adopt the weights found on the router at startup
    ///
    /// Entries that would route traffic to a non-`Active` slot or do not add
    /// up are left out of memory. Returns the number of adopted services.
    pub async fn hydrate(&self) -> Result<usize, EngineError> {
        let mut writer = self.writer.lock().await;
        let document = self.router.load().await?;

        let mut adopted = RoutingTable::new();
        for service in self.registry.services() {
            let Some(routing) = document.get(service).copied() else {
                continue;
            };
            if !routing.is_routed() {
                continue;
            }

            let slots = self.registry.get(service)?;
            let consistent = routing.primary.checked_add(routing.secondary) == Some(TOTAL_WEIGHT)
                && check_targets(service, &slots, routing).is_ok();
            if consistent {
                adopted.insert(service.clone(), routing);
            } else {
                warn!(
                    service = %service,
                    primary = routing.primary,
                    secondary = routing.secondary,
                    "router weights do not match slot states, leaving service unrouted"
                );
            }
        }

        let count = adopted.len();
        *self.published.write().unwrap_or_else(|e| e.into_inner()) = adopted;
        *writer = Some(document);
        Ok(count)
    }

    fn lease_receiving(
        &self,
        service: &str,
        routing: ServiceRouting,
    ) -> Result<Vec<SlotLease>, EngineError> {
        Slot::ALL
            .iter()
            .filter(|slot| routing.weight(**slot) > 0)
            .map(|slot| self.registry.try_lease(service, *slot))
            .collect()
    }

    async fn write(&self, service: &str, routing: ServiceRouting) -> Result<(), EngineError> {
        let mut writer = self.writer.lock().await;

        let mut document = match writer.take() {
            Some(document) => document,
            None => self.router.load().await.map_err(unavailable)?,
        };
        document.insert(service.to_string(), routing);

        if let Err(e) = self.router.store(&document).await {
            warn!(service, "router write failed, dropping cached document: {}", e);
            return Err(unavailable(e));
        }

        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service.to_string(), routing);
        *writer = Some(document);
        Ok(())
    }
}

/// Non-zero weight is only allowed on `Active` slots
fn check_targets(
    service: &str,
    slots: &ServiceSlots,
    routing: ServiceRouting,
) -> Result<(), EngineError> {
    for slot in Slot::ALL {
        let state = slots.get(slot);
        if routing.weight(slot) > 0 && !state.is_active() {
            return Err(EngineError::Conflict(format!(
                "cannot route traffic to the {} slot of '{}' while it is {}",
                slot, service, state.status
            )));
        }
    }
    Ok(())
}

fn unavailable(err: EngineError) -> EngineError {
    match err {
        EngineError::CollaboratorUnavailable(_) => err,
        other => EngineError::CollaboratorUnavailable(format!("router: {}", other)),
    }
}
