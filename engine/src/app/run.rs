//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::catalog::catalog::ReleaseCatalog;
use crate::errors::EngineError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::catalog_poller;

/// Run the engine until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
    info!("Initializing bluegreen engine...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start engine: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), EngineError> {
    let app_state = AppState::init(options)?;

    // Initial catalog pull so the first deployments can be verified
    if let Some(catalog) = &app_state.catalog {
        if let Err(e) = catalog.refresh().await {
            error!("Initial catalog refresh failed: {}", e);
        }
    }

    app_state.orchestrator.reconcile().await;

    if let Some(catalog) = app_state.catalog.clone() {
        init_catalog_poller(
            options.catalog_poller.clone(),
            catalog,
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    init_server(options, &app_state, shutdown_manager, shutdown_tx.subscribe()).await?;
    Ok(())
}

fn init_catalog_poller(
    mut options: catalog_poller::Options,
    catalog: Arc<ReleaseCatalog>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing catalog poller...");

    // init already refreshed once
    options.initial_delay = options.interval;

    let handle = tokio::spawn(async move {
        catalog_poller::run(
            &options,
            catalog.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_catalog_poller_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: &AppState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), EngineError>>>,
    catalog_poller_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            catalog_poller_handle: None,
        }
    }

    pub fn with_catalog_poller_handle(&mut self, handle: JoinHandle<()>) -> Result<(), EngineError> {
        if self.catalog_poller_handle.is_some() {
            return Err(EngineError::ShutdownError(
                "catalog_poller_handle already set".to_string(),
            ));
        }
        self.catalog_poller_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), EngineError>>,
    ) -> Result<(), EngineError> {
        if self.server_handle.is_some() {
            return Err(EngineError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), EngineError> {
        info!("Shutting down bluegreen engine...");

        // 1. Catalog poller
        if let Some(handle) = self.catalog_poller_handle.take() {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
