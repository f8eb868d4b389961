//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EngineError;
use crate::server::handlers::{
    cancel_deployment_handler, deploy_handler, deployment_handler, deployments_handler,
    health_handler, latest_release_handler, release_handler, releases_handler, restart_handler,
    rollback_handler, service_handler, services_handler, traffic_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the front-end
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Services
        .route("/services", get(services_handler))
        .route("/services/{service}", get(service_handler))
        // Deployment operations
        .route("/deploy", post(deploy_handler))
        .route("/rollback/{service}", post(rollback_handler))
        .route("/restart/{service}/{slot}", post(restart_handler))
        .route("/traffic", post(traffic_handler))
        // Deployment history
        .route("/deployments", get(deployments_handler))
        .route("/deployments/{id}", get(deployment_handler))
        .route("/deployments/{id}/cancel", post(cancel_deployment_handler))
        // Releases
        .route("/releases", get(releases_handler))
        .route("/releases/latest", get(latest_release_handler))
        .route("/releases/{tag}", get(release_handler))
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EngineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
