//! Docker CLI container runtime

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::deploy::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec};
use crate::errors::RuntimeError;

/// Runtime that drives the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    network: Option<String>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, network: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            network,
        }
    }

    async fn docker(&self, args: &[String]) -> Result<String, RuntimeError> {
        debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| RuntimeError::Api(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn classify_failure(stderr: &str) -> RuntimeError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("no such container")
        || lowered.contains("no such object")
        || lowered.contains("no such image")
        || lowered.contains("manifest unknown")
    {
        RuntimeError::NotFound(stderr.to_string())
    } else {
        RuntimeError::Api(stderr.to_string())
    }
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    if let Some(policy) = &spec.restart_policy {
        args.push("--restart".to_string());
        args.push(policy.clone());
    }
    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(spec.image.clone());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.docker(&["pull".to_string(), image.to_string()]).await?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let id = self.docker(&create_args(spec)).await?;
        if id.is_empty() {
            return Err(RuntimeError::Api(format!(
                "docker create returned no id for {}",
                spec.name
            )));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker(&["start".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.docker(&[
            "stop".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker(&["rm".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.docker(&[
            "restart".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let output = self
            .docker(&[
                "inspect".to_string(),
                "--type".to_string(),
                "container".to_string(),
                id.to_string(),
            ])
            .await?;
        parse_inspect(&output, self.network.as_deref())
    }
}

// ================================ INSPECT ======================================= //

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    name: String,
    state: InspectState,
    config: InspectConfig,
    #[serde(default)]
    network_settings: Option<InspectNetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    networks: Option<BTreeMap<String, InspectNetwork>>,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Parse `docker inspect` output, preferring the address on `network`
pub fn parse_inspect(output: &str, network: Option<&str>) -> Result<ContainerInfo, RuntimeError> {
    let entries: Vec<InspectEntry> = serde_json::from_str(output)
        .map_err(|e| RuntimeError::Api(format!("Unreadable docker inspect output: {}", e)))?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::NotFound("docker inspect returned nothing".to_string()))?;

    let networks = entry
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default();

    let ip_address = if entry.state.running {
        network
            .and_then(|name| networks.get(name))
            .map(|n| n.ip_address.clone())
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                networks
                    .values()
                    .map(|n| n.ip_address.clone())
                    .find(|ip| !ip.is_empty())
            })
    } else {
        None
    };

    Ok(ContainerInfo {
        id: entry.id,
        name: entry.name.trim_start_matches('/').to_string(),
        running: entry.state.running,
        ip_address,
        image: entry.config.image,
        labels: entry.config.labels.unwrap_or_default(),
    })
}
