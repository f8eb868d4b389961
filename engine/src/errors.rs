//! Error types for the deployment engine

use serde::Serialize;
use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown service, slot, deployment or release tag
    #[error("Not found: {0}")]
    NotFound(String),

    /// Slot busy, no free slot, or weights that do not add up
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The container runtime could not stand up an instance
    #[error("Launch error: {0}")]
    LaunchError(String),

    #[error("Health check timeout: {0}")]
    HealthCheckTimeout(String),

    /// Registry, router or version source unreachable
    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ValidationError,
    LaunchError,
    HealthCheckTimeout,
    CollaboratorUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::LaunchError => "launch_error",
            ErrorKind::HealthCheckTimeout => "health_check_timeout",
            ErrorKind::CollaboratorUnavailable => "collaborator_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::ValidationError(_) => ErrorKind::ValidationError,
            EngineError::LaunchError(_) => ErrorKind::LaunchError,
            EngineError::HealthCheckTimeout(_) => ErrorKind::HealthCheckTimeout,
            EngineError::CollaboratorUnavailable(_) | EngineError::HttpError(_) => {
                ErrorKind::CollaboratorUnavailable
            }
            EngineError::IoError(_)
            | EngineError::JsonError(_)
            | EngineError::ConfigError(_)
            | EngineError::ServerError(_)
            | EngineError::ShutdownError(_)
            | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Error reported by a container runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("no such object: {0}")]
    NotFound(String),

    #[error("runtime API error: {0}")]
    Api(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}
