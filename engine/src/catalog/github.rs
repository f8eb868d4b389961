//! GitHub-backed version source

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::catalog::catalog::VersionSource;
use crate::errors::EngineError;
use crate::http::client::HttpClient;
use crate::models::release::CommitInfo;

/// Release tags of a GitHub repository
pub struct GithubVersionSource {
    client: HttpClient,
    owner: String,
    repo: String,
}

impl GithubVersionSource {
    pub fn new(client: HttpClient, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

#[async_trait]
impl VersionSource for GithubVersionSource {
    /// Tag names in version order, oldest first
    async fn list_tags(&self) -> Result<Vec<String>, EngineError> {
        let mut tags: Vec<String> = self
            .client
            .list_tags(&self.owner, &self.repo)
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect();
        tags.sort_by(|a, b| compare_versions(a, b));
        Ok(tags)
    }

    async fn commit_for(&self, tag: &str) -> Result<CommitInfo, EngineError> {
        self.client.get_commit(&self.owner, &self.repo, tag).await
    }

    async fn changed_paths(&self, from: &str, to: &str) -> Result<Vec<String>, EngineError> {
        self.client.compare(&self.owner, &self.repo, from, to).await
    }
}

/// Natural ordering of tag names: digit runs compare by value, so `v9` comes
/// before `v10`
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (x_run, x_rest) = split_digits(a);
                let (y_run, y_rest) = split_digits(b);
                let (x_num, y_num) = (x_run.trim_start_matches('0'), y_run.trim_start_matches('0'));
                let ordering = x_num
                    .len()
                    .cmp(&y_num.len())
                    .then_with(|| x_num.cmp(y_num))
                    .then_with(|| x_run.len().cmp(&y_run.len()));
                if ordering != Ordering::Equal {
                    return ordering;
                }
                a = x_rest;
                b = y_rest;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a = &a[x.len_utf8()..];
                b = &b[y.len_utf8()..];
            }
        }
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}
