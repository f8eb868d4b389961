//! Release catalog polling worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::catalog::ReleaseCatalog;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Catalog poller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,

    /// Backoff applied after failed refreshes, capped at `interval`
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::ZERO,
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Run the catalog poller until shutdown
pub async fn run<S, F>(
    options: &Options,
    catalog: &ReleaseCatalog,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Catalog poller starting...");

    let mut delay = options.initial_delay;
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Catalog poller shutting down...");
                return;
            }
            _ = sleep_fn(delay) => {}
        }

        match catalog.refresh().await {
            Ok(added) => {
                debug!("Catalog refresh done, {} new tag(s)", added);
                failures = 0;
                delay = options.interval;
            }
            Err(e) => {
                delay = calc_exp_backoff(&options.cooldown, failures).min(options.interval);
                failures = failures.saturating_add(1);
                warn!("Catalog refresh failed, retrying in {:?}: {}", delay, e);
            }
        }
    }
}
