//! HTTP API models of the bluegreen engine

pub mod models;

pub use models::*;
