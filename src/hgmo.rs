//! hg.mozilla.org (hgweb) access.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::TelemetryError;
use crate::http::{decode_json, error_for_status, RetryClient};

/// A changeset as returned by hgweb's `json-rev` view.
///
/// Example: https://hg.mozilla.org/mozilla-central/json-rev/deafa2891c61
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Changeset {
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub parents: Vec<String>,
    /// `[epoch_seconds, utc_offset]`
    #[serde(default)]
    pub pushdate: Option<(f64, i64)>,
    #[serde(default)]
    pub landingsystem: Option<String>,
}

impl Changeset {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn push_timestamp(&self) -> Option<i64> {
        self.pushdate.map(|(secs, _)| secs as i64)
    }
}

#[async_trait]
pub trait ChangesetSource: Send + Sync {
    async fn fetch_changeset(&self, changeset: &str, repo_url: &str) -> Result<Changeset>;
    async fn fetch_raw_diff(&self, changeset: &str, repo_url: &str) -> Result<String>;
}

pub struct HgmoClient {
    http: RetryClient,
}

impl HgmoClient {
    pub fn new(http: RetryClient) -> Self {
        Self { http }
    }
}

fn rev_url(repo_url: &str, view: &str, changeset: &str) -> String {
    format!("{}/{}/{}", repo_url.trim_end_matches('/'), view, changeset)
}

fn not_found(changeset: &str, repo_url: &str) -> TelemetryError {
    TelemetryError::NoSuchChangeset {
        changeset: changeset.to_string(),
        repo_url: repo_url.to_string(),
    }
}

#[async_trait]
impl ChangesetSource for HgmoClient {
    async fn fetch_changeset(&self, changeset: &str, repo_url: &str) -> Result<Changeset> {
        let url = rev_url(repo_url, "json-rev", changeset);
        let response = self.http.get(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found(changeset, repo_url).into());
        }
        let value = decode_json(&url, error_for_status(&url, response)?).await?;
        let changeset: Changeset = serde_json::from_value(value).map_err(|e| TelemetryError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(changeset)
    }

    async fn fetch_raw_diff(&self, changeset: &str, repo_url: &str) -> Result<String> {
        let url = rev_url(repo_url, "raw-rev", changeset);
        let response = self.http.get(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found(changeset, repo_url).into());
        }
        let text = error_for_status(&url, response)?.text().await?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HgmoClient {
        HgmoClient::new(RetryClient::with_policy(0, Duration::from_millis(1)).unwrap())
    }

    #[tokio::test]
    async fn fetches_changeset_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mozilla-central/json-rev/abcd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "node": "abcd",
                "desc": "Bug 1 - fix",
                "user": "Test User <author@mozilla.com>",
                "parents": ["1234"],
                "pushdate": [1537966541, 0],
                "landingsystem": null,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let repo = format!("{}/mozilla-central/", server.uri());
        let changeset = client().fetch_changeset("abcd", &repo).await.unwrap();

        assert_eq!(changeset.node, "abcd");
        assert_eq!(changeset.push_timestamp(), Some(1537966541));
        assert_eq!(changeset.landingsystem, None);
        assert!(!changeset.is_merge());
    }

    #[tokio::test]
    async fn missing_changeset_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client().fetch_changeset("ffff", &server.uri()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TelemetryError>(),
            Some(TelemetryError::NoSuchChangeset { .. })
        ));
    }

    #[tokio::test]
    async fn fetches_raw_diff_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw-rev/abcd"))
            .respond_with(ResponseTemplate::new(200).set_body_string("diff --git a/x b/x\n"))
            .mount(&server)
            .await;

        let diff = client().fetch_raw_diff("abcd", &server.uri()).await.unwrap();
        assert!(diff.starts_with("diff --git"));
    }
}
