//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Directory of the rolling log file, none to log to stdout only
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Prefix of container, router and service names
    #[serde(default = "default_project")]
    pub project: String,

    /// Services managed by the engine
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Container runtime configuration
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Health probe configuration
    #[serde(default)]
    pub health: HealthSettings,

    /// Overall budget of a deployment attempt in seconds
    #[serde(default = "default_deploy_deadline")]
    pub deploy_deadline_secs: u64,

    /// Reject release tags the catalog does not know
    #[serde(default)]
    pub strict_versions: bool,

    /// Router configuration
    #[serde(default)]
    pub router: RouterSettings,

    /// Release tag source, none to run without a catalog
    #[serde(default)]
    pub version_source: Option<VersionSourceSettings>,

    /// Catalog polling interval in seconds
    #[serde(default = "default_catalog_poll")]
    pub catalog_poll_secs: u64,

    /// HTTP front-end
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_project() -> String {
    "bluegreen".to_string()
}

fn default_services() -> Vec<String> {
    vec!["m1".to_string(), "m2".to_string(), "m3".to_string()]
}

fn default_deploy_deadline() -> u64 {
    120
}

fn default_catalog_poll() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            project: default_project(),
            services: default_services(),
            runtime: RuntimeSettings::default(),
            health: HealthSettings::default(),
            deploy_deadline_secs: default_deploy_deadline(),
            strict_versions: false,
            router: RouterSettings::default(),
            version_source: None,
            catalog_poll_secs: default_catalog_poll(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults when the file is missing
    pub async fn load(file: &File) -> Result<Self, EngineError> {
        if !file.exists().await {
            warn!(
                "Settings file {} not found, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }

        let settings: Settings = file.read_json().await.map_err(|e| {
            EngineError::ConfigError(format!(
                "Invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.services.is_empty() {
            return Err(EngineError::ConfigError("no services configured".to_string()));
        }
        if let Some(service) = self.services.iter().find(|s| !is_valid_name(s)) {
            return Err(EngineError::ConfigError(format!(
                "invalid service name '{}'",
                service
            )));
        }
        if !is_valid_name(&self.project) {
            return Err(EngineError::ConfigError(format!(
                "invalid project name '{}'",
                self.project
            )));
        }
        if self.deploy_deadline_secs == 0 {
            return Err(EngineError::ConfigError(
                "deploy_deadline_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn deploy_deadline(&self) -> Duration {
        Duration::from_secs(self.deploy_deadline_secs)
    }

    pub fn catalog_poll_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_poll_secs.max(1))
    }
}

/// Names end up in container and router names
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Docker CLI binary
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Network shared with the router
    #[serde(default = "default_network")]
    pub network: Option<String>,

    /// Registry path images are pulled from
    #[serde(default)]
    pub image_repository: String,

    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_restart_policy")]
    pub restart_policy: Option<String>,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_network() -> Option<String> {
    Some("bluegreen".to_string())
}

fn default_stop_grace() -> u64 {
    10
}

fn default_restart_policy() -> Option<String> {
    Some("unless-stopped".to_string())
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            network: default_network(),
            image_repository: String::new(),
            stop_grace_secs: default_stop_grace(),
            restart_policy: default_restart_policy(),
        }
    }
}

/// Health probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_port")]
    pub port: u16,

    #[serde(default = "default_health_path")]
    pub path: String,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,

    /// Settle time before the first probe in milliseconds
    #[serde(default = "default_health_grace")]
    pub grace_ms: u64,

    #[serde(default = "default_health_retries")]
    pub retries: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,
}

fn default_health_port() -> u16 {
    8000
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_timeout() -> u64 {
    2_000
}

fn default_health_grace() -> u64 {
    5_000
}

fn default_health_retries() -> u32 {
    3
}

fn default_health_interval() -> u64 {
    2_000
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            port: default_health_port(),
            path: default_health_path(),
            timeout_ms: default_health_timeout(),
            grace_ms: default_health_grace(),
            retries: default_health_retries(),
            interval_ms: default_health_interval(),
        }
    }
}

/// Router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Traefik dynamic configuration file
    #[serde(default = "default_router_config")]
    pub config_path: PathBuf,

    /// Port services listen on behind the router
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,
}

fn default_router_config() -> PathBuf {
    PathBuf::from("traefik/dynamic/services.toml")
}

fn default_backend_port() -> u16 {
    8000
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            config_path: default_router_config(),
            backend_port: default_backend_port(),
        }
    }
}

/// GitHub repository the release tags come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSourceSettings {
    #[serde(default = "default_github_api")]
    pub api_base_url: String,

    pub owner: String,

    pub repo: String,

    /// API token, never written back out
    #[serde(default, skip_serializing, deserialize_with = "deserialize_token")]
    pub token: Option<SecretString>,

    /// Repository directory holding one subdirectory per service
    #[serde(default = "default_service_dir_prefix")]
    pub service_dir_prefix: String,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_service_dir_prefix() -> String {
    "apps/".to_string()
}

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let token = Option::<String>::deserialize(deserializer)?;
    Ok(token.filter(|t| !t.is_empty()).map(SecretString::from))
}

/// HTTP front-end settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
