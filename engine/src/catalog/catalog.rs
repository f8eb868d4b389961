//! Release catalog
//!
//! Read cache over the version source. Tags are immutable, so an entry is
//! fetched once and then only merged by tag identity.

use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::models::release::{CommitInfo, ReleaseTag};

/// Source of release tags
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Tag names in the source's own order
    async fn list_tags(&self) -> Result<Vec<String>, EngineError>;

    async fn commit_for(&self, tag: &str) -> Result<CommitInfo, EngineError>;

    /// Paths changed between two commits
    async fn changed_paths(&self, from: &str, to: &str) -> Result<Vec<String>, EngineError>;
}

#[derive(Default)]
struct CatalogState {
    releases: Vec<ReleaseTag>,
    refreshed_at: Option<DateTime<Utc>>,
}

pub struct ReleaseCatalog {
    source: Box<dyn VersionSource>,
    services: Vec<String>,
    service_dir_prefix: String,
    state: RwLock<CatalogState>,
}

impl ReleaseCatalog {
    pub fn new(
        source: Box<dyn VersionSource>,
        services: Vec<String>,
        service_dir_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source,
            services,
            service_dir_prefix: service_dir_prefix.into(),
            state: RwLock::new(CatalogState::default()),
        }
    }

    /// Cached tags, oldest first
    pub fn list_versions(&self) -> Vec<ReleaseTag> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .releases
            .clone()
    }

    pub fn get_details(&self, tag: &str) -> Result<ReleaseTag, EngineError> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .releases
            .iter()
            .find(|r| r.tag == tag)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("release tag '{}'", tag)))
    }

    /// Whether a tag is known; `None` until the first successful refresh
    pub fn contains(&self, tag: &str) -> Option<bool> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.refreshed_at?;
        Some(state.releases.iter().any(|r| r.tag == tag))
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .refreshed_at
    }

    /// Pull new tags from the source and merge them in
    ///
    /// Stops at the first tag whose metadata cannot be fetched; that tag and
    /// the ones after it are retried on the next refresh. Returns the number
    /// of tags added.
    pub async fn refresh(&self) -> Result<usize, EngineError> {
        let tags = self.source.list_tags().await.map_err(|e| match e {
            EngineError::CollaboratorUnavailable(_) => e,
            other => EngineError::CollaboratorUnavailable(format!("version source: {}", other)),
        })?;

        let known = self.list_versions();
        let mut fetched = Vec::new();
        let mut previous: Option<String> = None;

        for tag in &tags {
            if let Some(existing) = known.iter().find(|r| &r.tag == tag) {
                previous = Some(existing.commit_hash.clone());
                continue;
            }

            match self.describe(tag, previous.as_deref()).await {
                Ok(release) => {
                    debug!(tag = %release.tag, "release tag fetched");
                    previous = Some(release.commit_hash.clone());
                    fetched.push(release);
                }
                Err(e) => {
                    warn!(tag = %tag, "deferring release tag: {}", e);
                    // later tags diff against this one
                    break;
                }
            }
        }

        let added = fetched.len();
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            for release in fetched {
                upsert(&mut state.releases, release);
            }
            state.refreshed_at = Some(Utc::now());
        }

        if added > 0 {
            info!("Release catalog refreshed, {} new tag(s)", added);
        }
        Ok(added)
    }

    async fn describe(&self, tag: &str, previous: Option<&str>) -> Result<ReleaseTag, EngineError> {
        let commit = self.source.commit_for(tag).await?;

        let changed_services = match previous {
            None => self.services.iter().cloned().collect(),
            Some(base) => {
                let paths = self.source.changed_paths(base, &commit.hash).await?;
                changed_services(&paths, &self.service_dir_prefix, &self.services)
            }
        };

        Ok(ReleaseTag {
            tag: tag.to_string(),
            commit_hash: commit.hash,
            author: commit.author,
            timestamp: commit.date,
            message: commit.message,
            changed_services,
        })
    }
}

fn upsert(releases: &mut Vec<ReleaseTag>, release: ReleaseTag) {
    match releases.iter_mut().find(|r| r.tag == release.tag) {
        Some(existing) => *existing = release,
        None => releases.push(release),
    }
}

/// Map changed paths `<prefix><service>/...` onto known services
pub fn changed_services(paths: &[String], prefix: &str, services: &[String]) -> BTreeSet<String> {
    paths
        .iter()
        .filter_map(|path| path.strip_prefix(prefix))
        .filter_map(|rest| rest.split('/').next())
        .filter(|name| services.iter().any(|s| s.as_str() == *name))
        .map(str::to_string)
        .collect()
}
