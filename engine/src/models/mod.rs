//! Domain models

pub mod deployment;
pub mod release;
pub mod routing;
pub mod service;
pub mod slot;
