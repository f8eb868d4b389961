//! In-memory collaborators and an engine harness shared by the test binaries

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use bluegreen::catalog::catalog::{ReleaseCatalog, VersionSource};
use bluegreen::deploy::fsm::SlotEvent;
use bluegreen::deploy::launcher::{InstanceLauncher, LauncherSettings, LABEL_VERSION};
use bluegreen::deploy::orchestrator::{Orchestrator, OrchestratorSettings};
use bluegreen::deploy::prober::{HealthCheck, HealthProber, ProbeSettings};
use bluegreen::deploy::registry::SlotRegistry;
use bluegreen::deploy::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec};
use bluegreen::errors::{EngineError, RuntimeError};
use bluegreen::models::deployment::{Deployment, DeploymentStatus};
use bluegreen::models::release::CommitInfo;
use bluegreen::models::routing::ServiceRouting;
use bluegreen::models::slot::{InstanceRef, Slot, SlotState};
use bluegreen::traffic::allocator::TrafficAllocator;
use bluegreen::traffic::{RouterStore, RoutingTable};

pub const SERVICES: [&str; 3] = ["m1", "m2", "m3"];
pub const IMAGE_REPOSITORY: &str = "registry.local";

pub fn instance(name: &str) -> InstanceRef {
    InstanceRef {
        id: format!("{}-id", name),
        name: name.to_string(),
        address: Some("10.0.0.1".to_string()),
    }
}

/// Drive a slot to `Active` directly through the registry
pub fn activate_slot(registry: &SlotRegistry, service: &str, slot: Slot, version: &str) -> SlotState {
    let lease = registry.try_lease(service, slot).unwrap();
    registry.transition(&lease, SlotEvent::Deploy).unwrap();
    registry
        .transition(
            &lease,
            SlotEvent::Promote {
                version: version.to_string(),
                instance: instance(&format!("bluegreen-{}-{}", service, slot)),
            },
        )
        .unwrap()
}

// ================================ RUNTIME ======================================= //

#[derive(Default)]
struct RuntimeState {
    containers: BTreeMap<String, ContainerInfo>,
    created: usize,
    calls: Vec<String>,
    missing_images: Vec<String>,
    fail_start: bool,
    pull_delay: Option<Duration>,
}

impl RuntimeState {
    /// Containers are addressed by name or by id
    fn resolve(&self, id: &str) -> Option<String> {
        if self.containers.contains_key(id) {
            return Some(id.to_string());
        }
        self.containers
            .values()
            .find(|c| c.id == id)
            .map(|c| c.name.clone())
    }

    fn record(&mut self, op: &str, id: &str) {
        let target = self.resolve(id).unwrap_or_else(|| id.to_string());
        self.calls.push(format!("{} {}", op, target));
    }
}

/// Container runtime keeping its instances in memory
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap()
    }

    pub fn missing_image(&self, image: &str) {
        self.lock().missing_images.push(image.to_string());
    }

    pub fn fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn pull_delay(&self, delay: Duration) {
        self.lock().pull_delay = Some(delay);
    }

    /// Seed a running instance left over from a previous engine run
    pub fn insert_running(&self, name: &str, image: &str, version: Option<&str>) {
        let mut state = self.lock();
        state.created += 1;
        let labels = version
            .map(|v| BTreeMap::from([(LABEL_VERSION.to_string(), v.to_string())]))
            .unwrap_or_default();
        let info = ContainerInfo {
            id: format!("seed-{}", state.created),
            name: name.to_string(),
            running: true,
            ip_address: Some(format!("10.0.1.{}", state.created)),
            image: image.to_string(),
            labels,
        };
        state.containers.insert(name.to_string(), info);
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.lock().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

fn missing(id: &str) -> RuntimeError {
    RuntimeError::NotFound(id.to_string())
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let delay = {
            let mut state = self.lock();
            state.record("pull", image);
            if state.missing_images.iter().any(|i| i == image) {
                return Err(RuntimeError::NotFound(format!("manifest for {}", image)));
            }
            state.pull_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        state.record("create", &spec.name);
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Api(format!("name {} already in use", spec.name)));
        }

        state.created += 1;
        let id = format!("c{}", state.created);
        let info = ContainerInfo {
            id: id.clone(),
            name: spec.name.clone(),
            running: false,
            ip_address: Some(format!("10.0.0.{}", state.created)),
            image: spec.image.clone(),
            labels: spec.labels.clone(),
        };
        state.containers.insert(spec.name.clone(), info);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("start", id);
        if state.fail_start {
            return Err(RuntimeError::Api("port already allocated".to_string()));
        }
        let name = state.resolve(id).ok_or_else(|| missing(id))?;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = true;
        }
        Ok(())
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("stop", id);
        let name = state.resolve(id).ok_or_else(|| missing(id))?;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("remove", id);
        let name = state.resolve(id).ok_or_else(|| missing(id))?;
        state.containers.remove(&name);
        Ok(())
    }

    async fn restart(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record("restart", id);
        let name = state.resolve(id).ok_or_else(|| missing(id))?;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = true;
        }
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let state = self.lock();
        let name = state.resolve(id).ok_or_else(|| missing(id))?;
        state.containers.get(&name).cloned().ok_or_else(|| missing(id))
    }
}

// ================================ HEALTH ======================================== //

/// Health check answering from a script, then from a fixed default
pub struct FakeHealth {
    healthy: AtomicBool,
    script: Mutex<VecDeque<bool>>,
    checks: AtomicUsize,
}

impl FakeHealth {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            script: Mutex::new(VecDeque::new()),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Outcomes returned before falling back to the default
    pub fn script(&self, outcomes: &[bool]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for FakeHealth {
    async fn check(&self, _instance: &InstanceRef) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => self.healthy.load(Ordering::SeqCst),
        }
    }
}

// ================================ ROUTER ======================================== //

/// Router document held in memory
#[derive(Default)]
pub struct FakeRouter {
    document: Mutex<RoutingTable>,
    fail_store: AtomicBool,
    fail_load: AtomicBool,
    loads: AtomicUsize,
    stores: AtomicUsize,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(entries: &[(&str, u32, u32)]) -> Self {
        let router = Self::default();
        {
            let mut document = router.document.lock().unwrap();
            for (service, primary, secondary) in entries {
                document.insert(service.to_string(), ServiceRouting::new(*primary, *secondary));
            }
        }
        router
    }

    pub fn document(&self) -> RoutingTable {
        self.document.lock().unwrap().clone()
    }

    pub fn fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouterStore for FakeRouter {
    async fn load(&self) -> Result<RoutingTable, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(EngineError::CollaboratorUnavailable(
                "router config unreadable".to_string(),
            ));
        }
        Ok(self.document())
    }

    async fn store(&self, table: &RoutingTable) -> Result<(), EngineError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(EngineError::CollaboratorUnavailable(
                "router config not writable".to_string(),
            ));
        }
        self.stores.fetch_add(1, Ordering::SeqCst);
        *self.document.lock().unwrap() = table.clone();
        Ok(())
    }
}

// ================================ VERSIONS ====================================== //

#[derive(Default)]
struct SourceState {
    tags: Vec<String>,
    changes: BTreeMap<String, Vec<String>>,
    broken_tags: Vec<String>,
    unavailable: bool,
    commit_calls: usize,
}

/// Version source with scripted tags; clones share their state
#[derive(Clone, Default)]
pub struct FakeVersionSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeVersionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_hash(tag: &str) -> String {
        format!("commit-{}", tag)
    }

    /// Append a tag whose commit touched `paths` since the previous tag
    pub fn add_tag(&self, tag: &str, paths: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.tags.push(tag.to_string());
        state.changes.insert(
            Self::commit_hash(tag),
            paths.iter().map(|p| p.to_string()).collect(),
        );
    }

    pub fn break_tag(&self, tag: &str) {
        self.state.lock().unwrap().broken_tags.push(tag.to_string());
    }

    pub fn repair(&self) {
        self.state.lock().unwrap().broken_tags.clear();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn commit_calls(&self) -> usize {
        self.state.lock().unwrap().commit_calls
    }
}

#[async_trait]
impl VersionSource for FakeVersionSource {
    async fn list_tags(&self) -> Result<Vec<String>, EngineError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(EngineError::CollaboratorUnavailable(
                "version source offline".to_string(),
            ));
        }
        Ok(state.tags.clone())
    }

    async fn commit_for(&self, tag: &str) -> Result<CommitInfo, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.commit_calls += 1;
        if state.broken_tags.iter().any(|t| t == tag) {
            return Err(EngineError::CollaboratorUnavailable(format!("commit of {}", tag)));
        }
        let position = state
            .tags
            .iter()
            .position(|t| t == tag)
            .ok_or_else(|| EngineError::NotFound(format!("tag {}", tag)))?;

        Ok(CommitInfo {
            hash: Self::commit_hash(tag),
            author: "release-bot".to_string(),
            date: Utc
                .with_ymd_and_hms(2025, 1, position as u32 + 1, 12, 0, 0)
                .single(),
            message: format!("release {}", tag),
        })
    }

    async fn changed_paths(&self, _from: &str, to: &str) -> Result<Vec<String>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state.changes.get(to).cloned().unwrap_or_default())
    }
}

pub fn catalog(source: &FakeVersionSource) -> ReleaseCatalog {
    ReleaseCatalog::new(
        Box::new(source.clone()),
        SERVICES.iter().map(|s| s.to_string()).collect(),
        "apps/",
    )
}

// ================================ HARNESS ======================================= //

/// Engine wired onto the in-memory collaborators
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub health: Arc<FakeHealth>,
    pub router: Arc<FakeRouter>,
    pub registry: Arc<SlotRegistry>,
    pub traffic: Arc<TrafficAllocator>,
    pub orchestrator: Orchestrator,
}

pub struct HarnessBuilder {
    router: FakeRouter,
    catalog: Option<Arc<ReleaseCatalog>>,
    settings: OrchestratorSettings,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            router: FakeRouter::new(),
            catalog: None,
            settings: OrchestratorSettings {
                deadline: Duration::from_secs(5),
                strict_versions: false,
            },
        }
    }

    pub fn router(mut self, router: FakeRouter) -> Self {
        self.router = router;
        self
    }

    pub fn catalog(mut self, catalog: Arc<ReleaseCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.settings.deadline = deadline;
        self
    }

    pub fn strict_versions(mut self) -> Self {
        self.settings.strict_versions = true;
        self
    }

    pub fn build(self) -> Harness {
        let runtime = Arc::new(FakeRuntime::new());
        let health = Arc::new(FakeHealth::new(true));
        let router = Arc::new(self.router);
        let registry = Arc::new(SlotRegistry::new(SERVICES));

        let launcher = Arc::new(InstanceLauncher::new(runtime.clone(), launcher_settings()));
        let prober = Arc::new(HealthProber::new(health.clone(), probe_settings()));
        let traffic = Arc::new(TrafficAllocator::new(registry.clone(), router.clone()));
        let orchestrator = Orchestrator::new(
            registry.clone(),
            launcher,
            prober,
            traffic.clone(),
            self.catalog,
            self.settings,
        );

        Harness {
            runtime,
            health,
            router,
            registry,
            traffic,
            orchestrator,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}

pub fn launcher_settings() -> LauncherSettings {
    LauncherSettings {
        project: "bluegreen".to_string(),
        image_repository: IMAGE_REPOSITORY.to_string(),
        network: None,
        stop_grace: Duration::from_secs(1),
        restart_policy: None,
    }
}

pub fn probe_settings() -> ProbeSettings {
    ProbeSettings {
        grace: Duration::ZERO,
        retries: 3,
        interval: Duration::ZERO,
    }
}

impl Harness {
    /// Accept a deployment and wait for its terminal record
    pub async fn deploy_and_wait(&self, service: &str, version: &str, slot: Option<Slot>) -> Deployment {
        let accepted = self.orchestrator.deploy(service, version, slot).unwrap();
        self.orchestrator.wait_for(accepted.id).await.unwrap()
    }

    /// Deploy and assert the version went live
    pub async fn activate(&self, service: &str, version: &str, slot: Slot) -> SlotState {
        let record = self.deploy_and_wait(service, version, Some(slot)).await;
        assert_eq!(record.status, DeploymentStatus::Success, "{}", record.message);
        self.registry.slot(service, slot).unwrap()
    }

    /// Let a background attempt release its slot
    pub async fn settle(&self, service: &str, slot: Slot) {
        for _ in 0..1000 {
            if self.registry.try_lease(service, slot).is_ok() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("{} slot of {} never released", slot, service);
    }
}
