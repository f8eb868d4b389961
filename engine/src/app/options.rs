//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::launcher::LauncherSettings;
use crate::deploy::orchestrator::OrchestratorSettings;
use crate::deploy::prober::ProbeSettings;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{Settings, VersionSourceSettings};
use crate::workers::catalog_poller;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Services managed by the engine
    pub services: Vec<String>,

    /// Docker CLI binary
    pub docker_binary: String,

    /// Instance naming and runtime options
    pub launcher: LauncherSettings,

    /// Liveness endpoint of every instance
    pub health_check: HealthCheckOptions,

    /// Post-launch health gate
    pub probe: ProbeSettings,

    pub orchestrator: OrchestratorSettings,

    pub router: RouterOptions,

    /// Release tag source, none to run without a catalog
    pub version_source: Option<VersionSourceSettings>,

    /// Catalog poller options
    pub catalog_poller: catalog_poller::Options,

    /// Server configuration
    pub server: ServerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), &StorageLayout::default())
    }
}

impl AppOptions {
    /// Derive the runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: &StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            services: settings.services.clone(),
            docker_binary: settings.runtime.docker_binary.clone(),
            launcher: LauncherSettings {
                project: settings.project.clone(),
                image_repository: settings.runtime.image_repository.clone(),
                network: settings.runtime.network.clone(),
                stop_grace: Duration::from_secs(settings.runtime.stop_grace_secs),
                restart_policy: settings.runtime.restart_policy.clone(),
            },
            health_check: HealthCheckOptions {
                port: settings.health.port,
                path: settings.health.path.clone(),
                timeout: Duration::from_millis(settings.health.timeout_ms),
            },
            probe: ProbeSettings {
                grace: Duration::from_millis(settings.health.grace_ms),
                retries: settings.health.retries,
                interval: Duration::from_millis(settings.health.interval_ms),
            },
            orchestrator: OrchestratorSettings {
                deadline: settings.deploy_deadline(),
                strict_versions: settings.strict_versions,
            },
            router: RouterOptions {
                config_path: layout.resolve(&settings.router.config_path),
                backend_port: settings.router.backend_port,
            },
            version_source: settings.version_source.clone(),
            catalog_poller: catalog_poller::Options {
                interval: settings.catalog_poll_interval(),
                ..Default::default()
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    pub port: u16,
    pub path: String,

    /// Per-attempt timeout
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Traefik dynamic configuration file
    pub config_path: PathBuf,

    pub backend_port: u16,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
