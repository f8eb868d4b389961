//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::catalog::catalog::ReleaseCatalog;
use crate::catalog::github::GithubVersionSource;
use crate::deploy::docker::DockerCli;
use crate::deploy::launcher::InstanceLauncher;
use crate::deploy::orchestrator::Orchestrator;
use crate::deploy::prober::{HealthProber, HttpHealthCheck};
use crate::deploy::registry::SlotRegistry;
use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::traffic::allocator::TrafficAllocator;
use crate::traffic::traefik::TraefikFileRouter;

const VERSION_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Main application state
pub struct AppState {
    pub orchestrator: Orchestrator,

    /// Present when a version source is configured
    pub catalog: Option<Arc<ReleaseCatalog>>,
}

impl AppState {
    /// Wire the engine against docker, Traefik and GitHub
    pub fn init(options: &AppOptions) -> Result<Self, EngineError> {
        info!("Initializing application state...");

        let registry = Arc::new(SlotRegistry::new(options.services.iter().cloned()));

        let runtime = Arc::new(DockerCli::new(
            options.docker_binary.clone(),
            options.launcher.network.clone(),
        ));
        let launcher = Arc::new(InstanceLauncher::new(runtime, options.launcher.clone()));

        let check = Arc::new(HttpHealthCheck::new(
            options.health_check.port,
            &options.health_check.path,
            options.health_check.timeout,
        )?);
        let prober = Arc::new(HealthProber::new(check, options.probe.clone()));

        let router = Arc::new(TraefikFileRouter::new(
            File::new(options.router.config_path.clone()),
            options.launcher.project.clone(),
            options.router.backend_port,
        ));
        let traffic = Arc::new(TrafficAllocator::new(registry.clone(), router));

        let catalog = match &options.version_source {
            Some(source) => {
                let client = HttpClient::new(
                    &source.api_base_url,
                    source.token.clone(),
                    VERSION_SOURCE_TIMEOUT,
                )?;
                let source_impl = GithubVersionSource::new(
                    client,
                    source.owner.clone(),
                    source.repo.clone(),
                );
                Some(Arc::new(ReleaseCatalog::new(
                    Box::new(source_impl),
                    options.services.clone(),
                    source.service_dir_prefix.clone(),
                )))
            }
            None => {
                warn!("No version source configured, release tags will not be verified");
                None
            }
        };

        let orchestrator = Orchestrator::new(
            registry,
            launcher,
            prober,
            traffic,
            catalog.clone(),
            options.orchestrator.clone(),
        );

        Ok(Self {
            orchestrator,
            catalog,
        })
    }
}
