//! GitHub REST API calls used by the release catalog

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::EngineError;
use crate::http::client::HttpClient;
use crate::models::release::CommitInfo;

/// Largest page the tags endpoint serves
const TAGS_PER_PAGE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct TagResponse {
    pub name: String,
    pub commit: CommitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    author: Option<Signature>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Signature {
    #[serde(default)]
    name: String,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    files: Vec<ChangedFile>,
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    filename: String,
}

impl HttpClient {
    /// Every tag of a repository, following pagination
    pub async fn list_tags(&self, owner: &str, repo: &str) -> Result<Vec<TagResponse>, EngineError> {
        let mut tags = Vec::new();
        for page in 1.. {
            let path = format!(
                "/repos/{}/{}/tags?per_page={}&page={}",
                owner, repo, TAGS_PER_PAGE, page
            );
            let batch: Vec<TagResponse> = self.get(&path).await?;
            let last = batch.len() < TAGS_PER_PAGE;
            tags.extend(batch);
            if last {
                break;
            }
        }
        Ok(tags)
    }

    /// Commit metadata for a sha or ref
    pub async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<CommitInfo, EngineError> {
        let path = format!("/repos/{}/{}/commits/{}", owner, repo, reference);
        let response: CommitResponse = self.get(&path).await?;
        let (author, date) = response
            .commit
            .author
            .map(|a| (a.name, a.date))
            .unwrap_or_default();

        Ok(CommitInfo {
            hash: response.sha,
            author,
            date,
            message: response.commit.message,
        })
    }

    /// Paths changed between two commits
    pub async fn compare(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, EngineError> {
        let path = format!("/repos/{}/{}/compare/{}...{}", owner, repo, base, head);
        let response: CompareResponse = self.get(&path).await?;
        Ok(response.files.into_iter().map(|f| f.filename).collect())
    }
}
