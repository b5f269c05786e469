use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TelemetryError;

/// Statuses worth another attempt; anything else is returned to the caller.
const RETRY_STATUSES: [StatusCode; 3] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::GATEWAY_TIMEOUT,
];

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client that retries connection failures and gateway errors with
/// exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryClient {
    client: Client,
    retries: u32,
    backoff: Duration,
}

impl RetryClient {
    pub fn new() -> Result<Self> {
        Self::with_policy(DEFAULT_RETRIES, DEFAULT_BACKOFF)
    }

    pub fn with_policy(retries: u32, backoff: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("committelemetry/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, retries, backoff })
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send_with_retries(url, || self.client.get(url)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        self.send_with_retries(url, || self.client.post(url).json(body)).await
    }

    /// GET `url` and decode the JSON body, treating non-2xx statuses as errors.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = error_for_status(url, self.get(url).await?)?;
        decode_json(url, response).await
    }

    async fn send_with_retries<F>(&self, url: &str, build: F) -> Result<Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let outcome = build().send().await;
            let retryable = match &outcome {
                Ok(response) => RETRY_STATUSES.contains(&response.status()),
                Err(e) => e.is_connect() || e.is_timeout(),
            };

            if !retryable || attempt >= self.retries {
                return outcome.with_context(|| format!("request to {} failed", url));
            }

            let delay = self.backoff * 2u32.pow(attempt);
            match &outcome {
                Ok(response) => warn!("{} returned {}, retrying in {:?}", url, response.status(), delay),
                Err(e) => warn!("request to {} failed: {}, retrying in {:?}", url, e, delay),
            }
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

pub fn error_for_status(url: &str, response: Response) -> Result<Response, TelemetryError> {
    let status = response.status();
    if status.is_success() {
        debug!("{} returned {}", url, status);
        Ok(response)
    } else {
        Err(TelemetryError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

pub async fn decode_json(url: &str, response: Response) -> Result<serde_json::Value> {
    let value = response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| TelemetryError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    Ok(value)
}
