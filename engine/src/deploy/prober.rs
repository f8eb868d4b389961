//! Health prober

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::errors::EngineError;
use crate::models::slot::InstanceRef;

/// Single liveness check against an instance
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// True only for a timely 2xx answer
    async fn check(&self, instance: &InstanceRef) -> bool;
}

/// HTTP GET liveness check
pub struct HttpHealthCheck {
    client: Client,
    port: u16,
    path: String,
}

impl HttpHealthCheck {
    pub fn new(port: u16, path: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(timeout).build()?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Ok(Self { client, port, path })
    }

    pub fn url(&self, instance: &InstanceRef) -> Result<Url, url::ParseError> {
        Url::parse(&format!("http://{}:{}{}", instance.host(), self.port, self.path))
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, instance: &InstanceRef) -> bool {
        let url = match self.url(instance) {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid health URL for {}: {}", instance.name, e);
                return false;
            }
        };

        match self.client.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!("Health check {} answered {}", url, response.status());
                false
            }
            Err(e) => {
                debug!("Health check {} failed: {}", url, e);
                false
            }
        }
    }
}

/// Probe settings
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Settle time between launch and the first probe
    pub grace: Duration,

    /// Attempts of the post-launch gate
    pub retries: u32,

    /// Delay between attempts
    pub interval: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            retries: 3,
            interval: Duration::from_secs(2),
        }
    }
}

/// Bounded-retry health gate
pub struct HealthProber {
    check: Arc<dyn HealthCheck>,
    settings: ProbeSettings,
}

impl HealthProber {
    pub fn new(check: Arc<dyn HealthCheck>, settings: ProbeSettings) -> Self {
        Self { check, settings }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// One check
    pub async fn probe(&self, instance: &InstanceRef) -> bool {
        self.check.check(instance).await
    }

    /// Up to `attempts` checks, `interval` apart; true on the first success
    pub async fn probe_with_retries(
        &self,
        instance: &InstanceRef,
        attempts: u32,
        interval: Duration,
    ) -> bool {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            if self.probe(instance).await {
                debug!("{} healthy after {} attempt(s)", instance.name, attempt);
                return true;
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!("{} unhealthy after {} attempt(s)", instance.name, attempts);
        false
    }

    /// Grace delay followed by the configured retry budget
    pub async fn gate(&self, instance: &InstanceRef) -> bool {
        if !self.settings.grace.is_zero() {
            tokio::time::sleep(self.settings.grace).await;
        }
        self.probe_with_retries(instance, self.settings.retries, self.settings.interval)
            .await
    }
}
