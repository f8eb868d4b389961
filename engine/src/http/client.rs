//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::errors::EngineError;

const USER_AGENT: &str = concat!("bluegreen-engine/", env!("CARGO_PKG_VERSION"));

/// JSON client for a remote API
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await.map_err(|e| {
            EngineError::CollaboratorUnavailable(format!("GET {} failed: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(match status {
                StatusCode::NOT_FOUND => EngineError::NotFound(format!("{} ({})", path, status)),
                _ => EngineError::CollaboratorUnavailable(format!("{}: {}", status, body)),
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}
