//! Blue-green deployment engine
//!
//! Keeps two execution slots per service, promotes new versions into a slot
//! behind a health gate and shifts weighted traffic between the slots.

pub mod app;
pub mod catalog;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod traffic;
pub mod utils;
pub mod workers;
