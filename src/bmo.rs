//! Bugzilla (bugzilla.mozilla.org) REST access.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::TelemetryError;
use crate::http::RetryClient;

pub const ATTACHMENT_TYPE_MOZREVIEW: &str = "text/x-review-board-request";
pub const ATTACHMENT_TYPE_GITHUB: &str = "text/x-github-request";
pub const ATTACHMENT_TYPE_PHABRICATOR: &str = "text/x-phabricator-request";

/// Example: https://bugzilla.mozilla.org/rest/bug/1447193/attachment?exclude_fields=data
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub is_patch: u8,
    #[serde(default)]
    pub is_obsolete: u8,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FieldChange {
    pub field_name: String,
    #[serde(default)]
    pub added: String,
    #[serde(default)]
    pub removed: String,
}

#[async_trait]
pub trait BugTracker: Send + Sync {
    async fn fetch_attachments(&self, bug_id: u64) -> Result<Vec<Attachment>>;
    async fn fetch_bug_history(&self, bug_id: u64) -> Result<Vec<HistoryEntry>>;
}

pub struct BmoClient {
    http: RetryClient,
    api_url: String,
}

impl BmoClient {
    pub fn new(http: RetryClient, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_bugzilla_json(&self, url: &str) -> Result<Value> {
        let value = self.http.get_json(url).await?;
        // BMO can answer 200 with an error document when a bug is private.
        if value.get("error").is_some() {
            return Err(TelemetryError::Http {
                url: url.to_string(),
                status: 401,
            }
            .into());
        }
        Ok(value)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(url: &str, value: Option<&Value>) -> Result<T> {
    let value = value.ok_or_else(|| TelemetryError::Decode {
        url: url.to_string(),
        reason: "missing field".to_string(),
    })?;
    let decoded = T::deserialize(value).map_err(|e| TelemetryError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(decoded)
}

#[async_trait]
impl BugTracker for BmoClient {
    async fn fetch_attachments(&self, bug_id: u64) -> Result<Vec<Attachment>> {
        let url = format!("{}/bug/{}/attachment?exclude_fields=data", self.api_url, bug_id);
        let value = self.get_bugzilla_json(&url).await?;
        decode(&url, value.pointer(&format!("/bugs/{}", bug_id)))
    }

    async fn fetch_bug_history(&self, bug_id: u64) -> Result<Vec<HistoryEntry>> {
        // Example: https://bugzilla.mozilla.org/rest/bug/1447193/history
        let url = format!("{}/bug/{}/history", self.api_url, bug_id);
        let value = self.get_bugzilla_json(&url).await?;
        decode(&url, value.pointer("/bugs/0/history"))
    }
}
