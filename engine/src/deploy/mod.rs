//! Deployment module

pub mod docker;
pub mod fsm;
pub mod launcher;
pub mod orchestrator;
pub mod prober;
pub mod registry;
pub mod runtime;
pub mod store;
