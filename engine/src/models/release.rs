//! Release models

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable metadata of a release tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTag {
    pub tag: String,

    pub commit_hash: String,

    pub author: String,

    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub message: String,

    /// Services whose sources changed since the previous tag
    #[serde(default)]
    pub changed_services: BTreeSet<String>,
}

/// Commit metadata as reported by the version source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub message: String,
}
