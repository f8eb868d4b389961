//! Container runtime contract

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::RuntimeError;

/// Everything needed to create a named, labeled instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub network: Option<String>,
    pub restart_policy: Option<String>,
}

/// Runtime view of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub ip_address: Option<String>,
    pub image: String,
    pub labels: BTreeMap<String, String>,
}

/// Process sandbox runtime (docker, podman, a test double)
///
/// Every call distinguishes a missing object from any other failure.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make an image available locally
    async fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create an instance and return its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;
}
