//! Instance launcher
//!
//! Owns the naming and labeling of slot instances and the
//! teardown-then-create sequence that replaces one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec};
use crate::errors::{EngineError, RuntimeError};
use crate::models::slot::{InstanceRef, Slot};

pub const LABEL_PROJECT: &str = "bluegreen.project";
pub const LABEL_SERVICE: &str = "bluegreen.service";
pub const LABEL_SLOT: &str = "bluegreen.slot";
pub const LABEL_VERSION: &str = "bluegreen.version";

/// Launcher settings
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// Prefix of instance names
    pub project: String,

    /// Registry path images are pulled from, `<repository>/<service>:<version>`
    pub image_repository: String,

    /// Shared network the router reaches instances on
    pub network: Option<String>,

    /// Grace period given to an instance on stop/restart
    pub stop_grace: Duration,

    pub restart_policy: Option<String>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            project: "bluegreen".to_string(),
            image_repository: String::new(),
            network: Some("bluegreen".to_string()),
            stop_grace: Duration::from_secs(10),
            restart_policy: Some("unless-stopped".to_string()),
        }
    }
}

/// Replaces and restarts slot instances through a container runtime
pub struct InstanceLauncher {
    runtime: Arc<dyn ContainerRuntime>,
    settings: LauncherSettings,
}

impl InstanceLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: LauncherSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    /// Name of the instance owning a slot
    pub fn instance_name(&self, service: &str, slot: Slot) -> String {
        format!("{}-{}-{}", self.settings.project, service, slot)
    }

    /// Image reference of a service version
    pub fn image_ref(&self, service: &str, version: &str) -> String {
        let repository = self.settings.image_repository.trim_end_matches('/');
        if repository.is_empty() {
            format!("{}:{}", service, version)
        } else {
            format!("{}/{}:{}", repository, service, version)
        }
    }

    /// Replace whatever runs in a slot with a new instance of `image`
    ///
    /// The previous instance is gone once this returns, whether or not the
    /// new one could be created.
    pub async fn replace_in_slot(
        &self,
        service: &str,
        slot: Slot,
        image: &str,
        version: &str,
    ) -> Result<InstanceRef, EngineError> {
        let name = self.instance_name(service, slot);
        info!(service, slot = %slot, image, "replacing instance {}", name);

        self.teardown(&name).await?;

        self.runtime
            .pull(image)
            .await
            .map_err(|e| EngineError::LaunchError(format!("image {} unavailable: {}", image, e)))?;

        let spec = self.container_spec(service, slot, image, version);
        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(|e| EngineError::LaunchError(format!("create {} failed: {}", name, e)))?;

        if let Err(e) = self.runtime.start(&id).await {
            if let Err(rm_err) = self.runtime.remove(&id).await {
                warn!("Failed to remove unstartable instance {}: {}", name, rm_err);
            }
            return Err(EngineError::LaunchError(format!("start {} failed: {}", name, e)));
        }

        let address = match self.runtime.inspect(&id).await {
            Ok(info) => info.ip_address,
            Err(e) => {
                warn!("Started {} but could not inspect it: {}", name, e);
                None
            }
        };

        info!(service, slot = %slot, "instance {} started ({})", name, id);
        Ok(InstanceRef { id, name, address })
    }

    /// Restart the slot's instance without changing its image
    pub async fn restart_in_place(&self, service: &str, slot: Slot) -> Result<InstanceRef, EngineError> {
        let name = self.instance_name(service, slot);
        info!(service, slot = %slot, "restarting instance {}", name);

        self.runtime
            .restart(&name, self.settings.stop_grace)
            .await
            .map_err(|e| match e {
                RuntimeError::NotFound(_) => {
                    EngineError::NotFound(format!("no instance owns the {} slot of '{}'", slot, service))
                }
                RuntimeError::Api(msg) => {
                    EngineError::LaunchError(format!("restart {} failed: {}", name, msg))
                }
            })?;

        let info = self.runtime.inspect(&name).await.map_err(|e| {
            EngineError::LaunchError(format!("inspect {} after restart failed: {}", name, e))
        })?;

        Ok(InstanceRef {
            id: info.id,
            name,
            address: info.ip_address,
        })
    }

    /// Runtime view of the slot's instance, if one exists
    pub async fn inspect_slot(&self, service: &str, slot: Slot) -> Result<Option<ContainerInfo>, EngineError> {
        let name = self.instance_name(service, slot);
        match self.runtime.inspect(&name).await {
            Ok(info) => Ok(Some(info)),
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(RuntimeError::Api(msg)) => Err(EngineError::CollaboratorUnavailable(format!(
                "container runtime: {}",
                msg
            ))),
        }
    }

    /// Stop and remove a stale instance; absence counts as success
    async fn teardown(&self, name: &str) -> Result<(), EngineError> {
        match self.runtime.stop(name, self.settings.stop_grace).await {
            Ok(()) => debug!("Stopped stale instance {}", name),
            Err(RuntimeError::NotFound(_)) => {
                debug!("No stale instance {}", name);
                return Ok(());
            }
            Err(e) => warn!("Failed to stop {}, removing anyway: {}", name, e),
        }

        match self.runtime.remove(name).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(EngineError::LaunchError(format!(
                "could not remove stale instance {}: {}",
                name, e
            ))),
        }
    }

    fn container_spec(&self, service: &str, slot: Slot, image: &str, version: &str) -> ContainerSpec {
        let labels = BTreeMap::from([
            (LABEL_PROJECT.to_string(), self.settings.project.clone()),
            (LABEL_SERVICE.to_string(), service.to_string()),
            (LABEL_SLOT.to_string(), slot.to_string()),
            (LABEL_VERSION.to_string(), version.to_string()),
        ]);
        let env = BTreeMap::from([
            ("SERVICE_NAME".to_string(), service.to_string()),
            ("DEPLOYMENT_SLOT".to_string(), slot.to_string()),
            ("SERVICE_VERSION".to_string(), version.to_string()),
        ]);

        ContainerSpec {
            name: self.instance_name(service, slot),
            image: image.to_string(),
            labels,
            env,
            network: self.settings.network.clone(),
            restart_policy: self.settings.restart_policy.clone(),
        }
    }
}

/// Version an instance runs, from its label or else its image tag
pub fn version_of(info: &ContainerInfo) -> Option<String> {
    if let Some(version) = info.labels.get(LABEL_VERSION).filter(|v| !v.is_empty()) {
        return Some(version.clone());
    }

    let last_segment = info.image.rsplit('/').next().unwrap_or(&info.image);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag.to_string())
        .filter(|tag| !tag.is_empty())
}
