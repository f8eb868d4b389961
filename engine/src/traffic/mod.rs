//! Traffic allocation between slots

pub mod allocator;
pub mod traefik;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::models::routing::ServiceRouting;

/// Weighted targets of every routed service, keyed by service
pub type RoutingTable = BTreeMap<String, ServiceRouting>;

/// The edge router's declarative configuration
///
/// `store` replaces the whole document atomically.
#[async_trait]
pub trait RouterStore: Send + Sync {
    async fn load(&self) -> Result<RoutingTable, EngineError>;

    async fn store(&self, table: &RoutingTable) -> Result<(), EngineError>;
}
