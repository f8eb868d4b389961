pub mod client;
pub mod github;
