//! Deployment orchestrator
//!
//! Drives a version into a slot through launch, health gate and promotion,
//! and implements the rollback and restart recovery paths. Every mutation of
//! a slot happens while holding its [`SlotLease`]; a deployment attempt keeps
//! the lease from acceptance until its record is terminal.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::catalog::ReleaseCatalog;
use crate::deploy::fsm::SlotEvent;
use crate::deploy::launcher::{version_of, InstanceLauncher};
use crate::deploy::prober::HealthProber;
use crate::deploy::registry::{SlotLease, SlotRegistry};
use crate::deploy::store::DeploymentStore;
use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::release::ReleaseTag;
use crate::models::routing::ServiceRouting;
use crate::models::service::{ReleaseView, ServiceStatus};
use crate::models::slot::{InstanceRef, ServiceSlots, Slot, SlotState, SlotStatus};
use crate::traffic::allocator::TrafficAllocator;

pub const DEADLINE_MESSAGE: &str = "deployment deadline exceeded";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Budget of an attempt; the health gate is cut off once it runs out
    pub deadline: Duration,

    /// Reject tags the release catalog does not know instead of warning
    pub strict_versions: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            strict_versions: false,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<SlotRegistry>,
    deployments: Arc<DeploymentStore>,
    launcher: Arc<InstanceLauncher>,
    prober: Arc<HealthProber>,
    traffic: Arc<TrafficAllocator>,
    catalog: Option<Arc<ReleaseCatalog>>,
    settings: OrchestratorSettings,
    last_manual_slot: Arc<RwLock<HashMap<String, Slot>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SlotRegistry>,
        launcher: Arc<InstanceLauncher>,
        prober: Arc<HealthProber>,
        traffic: Arc<TrafficAllocator>,
        catalog: Option<Arc<ReleaseCatalog>>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            deployments: Arc::new(DeploymentStore::new()),
            launcher,
            prober,
            traffic,
            catalog,
            settings,
            last_manual_slot: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // ================================ DEPLOY ======================================== //

    /// Accept a deployment and run it in the background
    ///
    /// Returns as soon as the slot is `Deploying` and the record exists; the
    /// outcome is observed through [`Orchestrator::deployment_status`]. Must
    /// be called from within a tokio runtime.
    pub fn deploy(
        &self,
        service: &str,
        version: &str,
        slot: Option<Slot>,
    ) -> Result<Deployment, EngineError> {
        let version = version.trim();
        if version.is_empty() {
            return Err(EngineError::ValidationError(
                "version must not be empty".to_string(),
            ));
        }
        if !self.registry.contains(service) {
            return Err(EngineError::NotFound(format!("unknown service '{}'", service)));
        }
        self.check_version(service, version)?;

        let lease = match slot {
            Some(slot) => {
                let lease = self.registry.try_lease(service, slot)?;
                if self.traffic.weight(service, slot)? > 0 {
                    return Err(EngineError::Conflict(format!(
                        "{} slot of '{}' is serving traffic, move its weight away first",
                        slot, service
                    )));
                }
                self.remember_manual_slot(service, slot);
                lease
            }
            None => self.select_slot(service)?,
        };
        let slot = lease.slot();

        let previous = self.registry.slot(service, slot)?;
        self.registry.transition(&lease, SlotEvent::Deploy)?;

        let record = Deployment::accepted(service, version, slot);
        self.deployments.insert(record.clone());
        info!(
            service,
            version,
            slot = %slot,
            deployment = %record.id,
            "deployment accepted"
        );

        let attempt = Attempt {
            registry: self.registry.clone(),
            deployments: self.deployments.clone(),
            lease: Some(lease),
            id: record.id,
            version: version.to_string(),
            done: false,
        };
        tokio::spawn(self.clone().run_attempt(attempt, previous));

        Ok(record)
    }

    fn check_version(&self, service: &str, version: &str) -> Result<(), EngineError> {
        let Some(catalog) = &self.catalog else {
            return Ok(());
        };

        match catalog.contains(version) {
            Some(true) => Ok(()),
            Some(false) if self.settings.strict_versions => Err(EngineError::ValidationError(
                format!("unknown release tag '{}'", version),
            )),
            Some(false) => {
                warn!(service, version, "release tag unknown to the catalog, deploying anyway");
                Ok(())
            }
            None => {
                warn!(service, version, "release catalog unavailable, cannot verify tag");
                Ok(())
            }
        }
    }

    fn remember_manual_slot(&self, service: &str, slot: Slot) {
        self.last_manual_slot
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service.to_string(), slot);
    }

    /// Pick and lease a slot that carries no traffic
    fn select_slot(&self, service: &str) -> Result<SlotLease, EngineError> {
        let slots = self.registry.get(service)?;
        let routing = self.traffic.get(service)?;
        let last_manual = self
            .last_manual_slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(service)
            .copied();

        for slot in selection_order(&slots, routing, last_manual) {
            if routing.weight(slot) > 0 || slots.get(slot).status == SlotStatus::Deploying {
                continue;
            }
            match self.registry.try_lease(service, slot) {
                // weights may have moved onto the slot since the snapshot
                Ok(_) if self.traffic.weight(service, slot)? > 0 => continue,
                Ok(lease) => {
                    debug!(service, slot = %slot, "slot selected");
                    return Ok(lease);
                }
                Err(EngineError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::Conflict(format!(
            "no free slot for '{}': every slot is serving or busy",
            service
        )))
    }

    async fn run_attempt(self, mut attempt: Attempt, previous: SlotState) {
        let Some(lease) = attempt.lease.as_ref() else {
            return;
        };
        let service = lease.service().to_string();
        let slot = lease.slot();

        if !self.deployments.begin_launch(attempt.id) {
            info!(service = %service, slot = %slot, deployment = %attempt.id, "deployment cancelled before launch");
            if let Err(e) = self.registry.transition(lease, SlotEvent::Restore(previous)) {
                error!(service = %service, slot = %slot, "failed to restore slot: {}", e);
            }
            attempt.done = true;
            return;
        }

        let version = attempt.version.clone();
        let deadline = Instant::now() + self.settings.deadline;

        // a started replace always runs to completion
        let image = self.launcher.image_ref(&service, &version);
        let instance = match self
            .launcher
            .replace_in_slot(&service, slot, &image, &version)
            .await
        {
            Ok(instance) => instance,
            Err(err) => {
                warn!(service = %service, slot = %slot, version = %version, "deployment failed: {}", err);
                attempt.fail(err.to_string(), None);
                return;
            }
        };

        let healthy = if Instant::now() >= deadline {
            None
        } else {
            tokio::time::timeout_at(deadline, self.prober.gate(&instance))
                .await
                .ok()
        };

        match healthy {
            Some(true) => {
                let event = SlotEvent::Promote {
                    version: version.clone(),
                    instance,
                };
                match self.registry.transition(lease, event) {
                    Ok(_) => {
                        info!(service = %service, slot = %slot, version = %version, "slot promoted");
                        attempt.complete(
                            DeploymentStatus::Success,
                            format!("{} {} is active in {} slot", service, version, slot),
                        );
                    }
                    Err(e) => attempt.fail(e.to_string(), None),
                }
            }
            Some(false) => {
                let err = EngineError::HealthCheckTimeout(format!(
                    "instance {} did not become healthy",
                    instance.name
                ));
                warn!(service = %service, slot = %slot, version = %version, "deployment failed: {}", err);
                attempt.fail(err.to_string(), Some(instance));
            }
            None => {
                let err = EngineError::HealthCheckTimeout(DEADLINE_MESSAGE.to_string());
                warn!(service = %service, slot = %slot, version = %version, "{}", err);
                attempt.fail(err.to_string(), Some(instance));
            }
        }
    }

    pub fn deployment_status(&self, id: Uuid) -> Result<Deployment, EngineError> {
        self.deployments.get(id)
    }

    /// Deployment history, newest first
    pub fn list_deployments(&self) -> Vec<Deployment> {
        self.deployments.list()
    }

    /// Cancel an attempt that has not started launching
    pub fn cancel_deployment(&self, id: Uuid) -> Result<Deployment, EngineError> {
        let record = self.deployments.cancel(id)?;
        info!(service = %record.service, deployment = %id, "deployment cancelled");
        Ok(record)
    }

    /// Wait for an attempt to reach a terminal status
    pub async fn wait_for(&self, id: Uuid) -> Result<Deployment, EngineError> {
        self.deployments.wait_for(id).await
    }

    // ================================ RECOVERY ====================================== //

    /// Move all traffic back onto the alternate `Active` slot
    pub async fn rollback(&self, service: &str) -> Result<ServiceRouting, EngineError> {
        let slots = self.registry.get(service)?;
        let routing = self.traffic.get(service)?;

        let serving = serving_slot(&slots, routing).ok_or_else(|| {
            EngineError::Conflict(format!("'{}' is not serving traffic, nothing to roll back", service))
        })?;
        let alternate = serving.other();
        let target = slots.get(alternate);
        if !target.is_active() || target.version.is_none() {
            return Err(EngineError::NotFound(format!(
                "'{}' has no active {} slot to roll back to",
                service, alternate
            )));
        }

        let all_on = ServiceRouting::all_on(alternate);
        let applied = self
            .traffic
            .set_weights(service, all_on.primary, all_on.secondary)
            .await?;

        info!(
            service,
            from = %serving,
            to = %alternate,
            version = target.version.as_deref().unwrap_or_default(),
            "rolled back"
        );
        Ok(applied)
    }

    /// Restart the instance of an `Active` slot in place and re-probe it
    ///
    /// A failed re-probe leaves the slot `Failed`; its weight is not touched.
    pub async fn restart(&self, service: &str, slot: Slot) -> Result<SlotState, EngineError> {
        ensure_active(service, slot, &self.registry.slot(service, slot)?)?;
        let lease = self.registry.try_lease(service, slot)?;
        let current = self.registry.slot(service, slot)?;
        ensure_active(service, slot, &current)?;

        let instance = match self.launcher.restart_in_place(service, slot).await {
            Ok(instance) => instance,
            Err(e) => {
                self.registry.transition(
                    &lease,
                    SlotEvent::Fail {
                        reason: e.to_string(),
                        version: current.version.clone(),
                        instance: None,
                    },
                )?;
                return Err(e);
            }
        };

        if self.prober.gate(&instance).await {
            let state = self
                .registry
                .transition(&lease, SlotEvent::Restarted { instance })?;
            info!(service, slot = %slot, "instance restarted");
            return Ok(state);
        }

        let err = EngineError::HealthCheckTimeout(format!(
            "instance {} did not become healthy after restart",
            instance.name
        ));
        self.registry.transition(
            &lease,
            SlotEvent::Fail {
                reason: err.to_string(),
                version: current.version.clone(),
                instance: Some(instance),
            },
        )?;
        warn!(service, slot = %slot, "{}", err);
        Err(err)
    }

    pub async fn set_weights(
        &self,
        service: &str,
        primary: u32,
        secondary: u32,
    ) -> Result<ServiceRouting, EngineError> {
        self.traffic.set_weights(service, primary, secondary).await
    }

    // ================================ QUERIES ======================================= //

    pub fn service_status(&self, service: &str) -> Result<ServiceStatus, EngineError> {
        let slots = self.registry.get(service)?;
        let routing = self.traffic.get(service)?;
        Ok(ServiceStatus {
            service: service.to_string(),
            primary: slots.primary,
            secondary: slots.secondary,
            routing,
        })
    }

    pub fn services_status(&self) -> Vec<ServiceStatus> {
        self.registry
            .services()
            .iter()
            .filter_map(|service| self.service_status(service).ok())
            .collect()
    }

    fn release_catalog(&self) -> Result<&Arc<ReleaseCatalog>, EngineError> {
        self.catalog.as_ref().ok_or_else(|| {
            EngineError::CollaboratorUnavailable("release catalog is not configured".to_string())
        })
    }

    /// Known releases, oldest first, flagged when a slot runs them
    pub fn list_releases(&self) -> Result<Vec<ReleaseView>, EngineError> {
        let catalog = self.release_catalog()?;
        let running = self.running_versions();
        Ok(catalog
            .list_versions()
            .into_iter()
            .map(|release| ReleaseView {
                deployed: running.iter().any(|v| v == &release.tag),
                release,
            })
            .collect())
    }

    pub fn get_release(&self, tag: &str) -> Result<ReleaseTag, EngineError> {
        self.release_catalog()?.get_details(tag)
    }

    pub fn latest_release(&self) -> Result<ReleaseTag, EngineError> {
        self.release_catalog()?
            .list_versions()
            .pop()
            .ok_or_else(|| EngineError::NotFound("no release tags known".to_string()))
    }

    fn running_versions(&self) -> Vec<String> {
        self.registry
            .snapshot()
            .into_iter()
            .flat_map(|(_, slots)| [slots.primary, slots.secondary])
            .filter(SlotState::is_active)
            .filter_map(|state| state.version)
            .collect()
    }

    // ================================ STARTUP ======================================= //

    /// Rebuild slot states and weights from the runtime and the router
    ///
    /// Slots are inspected concurrently. Best effort; collaborator failures
    /// are logged. Returns the number of slots found active.
    pub async fn reconcile(&self) -> usize {
        let inspections = self.registry.services().iter().flat_map(move |service| {
            Slot::ALL
                .into_iter()
                .map(move |slot| async move { (service, slot, self.discover(service, slot).await) })
        });

        let mut discovered = 0;
        for (service, slot, outcome) in join_all(inspections).await {
            match outcome {
                Ok(true) => discovered += 1,
                Ok(false) => {}
                Err(e) => warn!(service = %service, slot = %slot, "reconcile skipped: {}", e),
            }
        }

        match self.traffic.hydrate().await {
            Ok(routed) => info!(
                "Reconciled {} active slot(s), {} routed service(s)",
                discovered, routed
            ),
            Err(e) => warn!("Could not read router weights, all services unrouted: {}", e),
        }
        discovered
    }

    async fn discover(&self, service: &str, slot: Slot) -> Result<bool, EngineError> {
        let Some(info) = self.launcher.inspect_slot(service, slot).await? else {
            return Ok(false);
        };
        if !info.running {
            debug!(service, slot = %slot, "instance {} is not running", info.name);
            return Ok(false);
        }
        let Some(version) = version_of(&info) else {
            warn!(service, slot = %slot, "instance {} carries no version", info.name);
            return Ok(false);
        };

        let instance = InstanceRef {
            id: info.id,
            name: info.name,
            address: info.ip_address,
        };
        if !self.prober.probe(&instance).await {
            warn!(service, slot = %slot, "instance {} is unhealthy, leaving slot idle", instance.name);
            return Ok(false);
        }

        let lease = self.registry.try_lease(service, slot)?;
        self.registry
            .transition(&lease, SlotEvent::Discover { version: version.clone(), instance })?;
        info!(service, slot = %slot, version = %version, "active instance discovered");
        Ok(true)
    }
}

/// Running deployment attempt
///
/// Owns the slot lease. Dropped without completing (task aborted or
/// panicked), it fails both the slot and the record.
struct Attempt {
    registry: Arc<SlotRegistry>,
    deployments: Arc<DeploymentStore>,
    lease: Option<SlotLease>,
    id: Uuid,
    version: String,
    done: bool,
}

impl Attempt {
    fn complete(&mut self, status: DeploymentStatus, message: String) {
        self.done = true;
        drop(self.lease.take());
        self.deployments.finish(self.id, status, message);
    }

    fn fail(&mut self, reason: String, instance: Option<InstanceRef>) {
        if let Some(lease) = self.lease.as_ref() {
            let event = SlotEvent::Fail {
                reason: reason.clone(),
                version: Some(self.version.clone()),
                instance,
            };
            if let Err(e) = self.registry.transition(lease, event) {
                error!(deployment = %self.id, "failed to mark slot failed: {}", e);
            }
        }
        self.complete(DeploymentStatus::Failed, reason);
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        if !self.done {
            self.fail("deployment attempt aborted".to_string(), None);
        }
    }
}

/// Order in which an unspecified deployment tries the two slots
///
/// Idle slots first (primary before secondary), then the slot that is not
/// serving, then the older deployment, then the slot not chosen manually
/// last time.
pub fn selection_order(
    slots: &ServiceSlots,
    routing: ServiceRouting,
    last_manual: Option<Slot>,
) -> [Slot; 2] {
    let idle = |slot: Slot| slots.get(slot).status == SlotStatus::Idle;

    let first = if idle(Slot::Primary) {
        Slot::Primary
    } else if idle(Slot::Secondary) {
        Slot::Secondary
    } else if let Some(serving) = routing.serving_slot() {
        serving.other()
    } else {
        match (slots.primary.deployed_at, slots.secondary.deployed_at) {
            (Some(primary), Some(secondary)) if primary != secondary => {
                if primary < secondary {
                    Slot::Primary
                } else {
                    Slot::Secondary
                }
            }
            _ => last_manual.map(|s| s.other()).unwrap_or(Slot::Primary),
        }
    };

    [first, first.other()]
}

/// Slot with the highest weight; ties go to the most recent deployment
pub fn serving_slot(slots: &ServiceSlots, routing: ServiceRouting) -> Option<Slot> {
    if !routing.is_routed() {
        return None;
    }
    routing.serving_slot().or_else(|| {
        if slots.secondary.deployed_at > slots.primary.deployed_at {
            Some(Slot::Secondary)
        } else {
            Some(Slot::Primary)
        }
    })
}

fn ensure_active(service: &str, slot: Slot, state: &SlotState) -> Result<(), EngineError> {
    if state.is_active() {
        return Ok(());
    }
    Err(EngineError::Conflict(format!(
        "{} slot of '{}' is {}, only active slots can be restarted",
        slot, service, state.status
    )))
}
