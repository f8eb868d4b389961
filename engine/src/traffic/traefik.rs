//! Traefik file-provider router store
//!
//! The dynamic configuration document is owned by the engine and rendered
//! completely from the routing table on every store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::models::routing::ServiceRouting;
use crate::models::slot::Slot;
use crate::traffic::{RouterStore, RoutingTable};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DynamicConfig {
    #[serde(default)]
    http: HttpSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HttpSection {
    #[serde(default)]
    routers: BTreeMap<String, RouterEntry>,
    #[serde(default)]
    services: BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RouterEntry {
    rule: String,
    service: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    weighted: Option<Weighted>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    load_balancer: Option<LoadBalancer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Weighted {
    services: Vec<WeightedTarget>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WeightedTarget {
    name: String,
    weight: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoadBalancer {
    servers: Vec<Server>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Server {
    url: String,
}

/// Router store backed by a Traefik dynamic configuration file (TOML)
pub struct TraefikFileRouter {
    file: File,
    project: String,
    backend_port: u16,
}

impl TraefikFileRouter {
    pub fn new(file: File, project: impl Into<String>, backend_port: u16) -> Self {
        Self {
            file,
            project: project.into(),
            backend_port,
        }
    }

    fn service_name(&self, service: &str) -> String {
        format!("{}-{}", self.project, service)
    }

    fn slot_name(&self, service: &str, slot: Slot) -> String {
        format!("{}-{}-{}", self.project, service, slot)
    }

    /// Render the full document for a routing table
    ///
    /// Services that were never routed are left out.
    pub fn render(&self, table: &RoutingTable) -> Result<String, EngineError> {
        let mut config = DynamicConfig::default();

        for (service, routing) in table.iter().filter(|(_, r)| r.is_routed()) {
            let name = self.service_name(service);

            config.http.routers.insert(
                name.clone(),
                RouterEntry {
                    rule: format!("PathPrefix(`/api/{}`)", service),
                    service: name.clone(),
                },
            );

            let targets = Slot::ALL
                .iter()
                .map(|slot| WeightedTarget {
                    name: self.slot_name(service, *slot),
                    weight: routing.weight(*slot),
                })
                .collect();
            config.http.services.insert(
                name,
                ServiceEntry {
                    weighted: Some(Weighted { services: targets }),
                    load_balancer: None,
                },
            );

            for slot in Slot::ALL {
                let backend = self.slot_name(service, slot);
                config.http.services.insert(
                    backend.clone(),
                    ServiceEntry {
                        weighted: None,
                        load_balancer: Some(LoadBalancer {
                            servers: vec![Server {
                                url: format!("http://{}:{}", backend, self.backend_port),
                            }],
                        }),
                    },
                );
            }
        }

        toml::to_string(&config)
            .map_err(|e| EngineError::Internal(format!("Failed to render router config: {}", e)))
    }

    /// Extract the routing table from a document
    pub fn parse(&self, contents: &str) -> Result<RoutingTable, EngineError> {
        let config: DynamicConfig = toml::from_str(contents).map_err(|e| {
            EngineError::CollaboratorUnavailable(format!("Unreadable router config: {}", e))
        })?;

        let prefix = format!("{}-", self.project);
        let mut table = RoutingTable::new();

        for (name, entry) in &config.http.services {
            let (Some(service), Some(weighted)) = (name.strip_prefix(&prefix), &entry.weighted)
            else {
                continue;
            };

            let mut routing = ServiceRouting::default();
            for target in &weighted.services {
                if target.name == self.slot_name(service, Slot::Primary) {
                    routing.primary = target.weight;
                } else if target.name == self.slot_name(service, Slot::Secondary) {
                    routing.secondary = target.weight;
                }
            }
            table.insert(service.to_string(), routing);
        }

        Ok(table)
    }
}

#[async_trait]
impl RouterStore for TraefikFileRouter {
    async fn load(&self) -> Result<RoutingTable, EngineError> {
        if !self.file.exists().await {
            debug!("Router config {} missing, starting empty", self.file.path().display());
            return Ok(RoutingTable::new());
        }

        let contents = self.file.read_string().await.map_err(|e| {
            EngineError::CollaboratorUnavailable(format!(
                "Failed to read router config {}: {}",
                self.file.path().display(),
                e
            ))
        })?;
        self.parse(&contents)
    }

    async fn store(&self, table: &RoutingTable) -> Result<(), EngineError> {
        let contents = self.render(table)?;
        self.file
            .write_atomic(contents.as_bytes())
            .await
            .map_err(|e| {
                EngineError::CollaboratorUnavailable(format!(
                    "Failed to write router config {}: {}",
                    self.file.path().display(),
                    e
                ))
            })?;

        info!("Router config written to {}", self.file.path().display());
        Ok(())
    }
}
