//! Commit telemetry payloads and their submission to telemetry.mozilla.org.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::bmo::BugTracker;
use crate::classifier::{determine_review_system, ReviewSystem};
use crate::config::PingTarget;
use crate::diffstat::{diffstat, Diffstat};
use crate::hgmo::ChangesetSource;
use crate::http::{error_for_status, RetryClient};

/// Ping body for the commit-pipeline/mozilla-central-commit schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    #[serde(rename = "changesetID")]
    pub changeset_id: String,
    pub review_system_used: ReviewSystem,
    pub repository: String,
    pub landing_system: Option<String>,
    pub push_date: Option<i64>,
    pub diffstat: Option<Diffstat>,
}

/// Build the telemetry ping for a changeset in `repo_url`.
pub async fn payload_for_changeset(
    changeset_id: &str,
    repo_url: &str,
    hgmo: &dyn ChangesetSource,
    bugs: &dyn BugTracker,
) -> Result<Ping> {
    let changeset = hgmo.fetch_changeset(changeset_id, repo_url).await?;
    let system = determine_review_system(&changeset, bugs).await?;

    // Merges have no single diff of their own.
    let stat = if changeset.is_merge() {
        None
    } else {
        let patch = hgmo.fetch_raw_diff(changeset_id, repo_url).await?;
        Some(diffstat(&patch))
    };

    debug!("changeset {} classified as {}", changeset_id, system);

    Ok(Ping {
        changeset_id: changeset_id.to_string(),
        review_system_used: system,
        repository: repo_url.to_string(),
        landing_system: changeset.landingsystem.clone(),
        push_date: changeset.push_timestamp(),
        diffstat: stat,
    })
}

#[async_trait]
pub trait PingSink: Send + Sync {
    /// `ping_id` must be unique per ping so the ingestion service can de-duplicate.
    async fn send_ping(&self, ping_id: &str, ping: &Ping) -> Result<()>;
}

/// Posts pings to the generic ingestion service.
pub struct TmoClient {
    http: RetryClient,
    target: PingTarget,
}

impl TmoClient {
    pub fn new(http: RetryClient, target: PingTarget) -> Self {
        Self { http, target }
    }

    pub fn submission_url(&self, ping_id: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.target.base_url.trim_end_matches('/'),
            self.target.namespace,
            self.target.doctype,
            self.target.docversion,
            ping_id
        )
    }
}

#[async_trait]
impl PingSink for TmoClient {
    async fn send_ping(&self, ping_id: &str, ping: &Ping) -> Result<()> {
        let url = self.submission_url(ping_id);
        let response = self
            .http
            .post_json(&url, ping)
            .await
            .with_context(|| format!("failed to submit ping {}", ping_id))?;
        error_for_status(&url, response)?;
        info!("sent ping {} to {}", ping_id, url);
        Ok(())
    }
}
