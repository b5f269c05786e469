use serde::{Deserialize, Serialize};
use std::path::Path;
use anyhow::{Context, Result};

use crate::error::TelemetryError;

pub const DEFAULT_BMO_API_URL: &str = "https://bugzilla.mozilla.org/rest";
pub const DEFAULT_TARGET_REPO: &str = "https://hg.mozilla.org/mozilla-central/";
pub const DEFAULT_PULSE_HOST: &str = "pulse.mozilla.org";
pub const DEFAULT_PULSE_PORT: u16 = 5671;
pub const DEFAULT_PULSE_EXCHANGE: &str = "exchange/hgpushes/v2";
pub const DEFAULT_TMO_BASE_URL: &str = "http://incoming.telemetry.mozilla.org/submit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bmo_api_url: String,
    pub target_repo: String,
    pub pulse: PulseSettings,
    pub telemetry: TelemetrySettings,
}

/// Connection and binding details for the Mozilla Pulse service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseSettings {
    pub host: String,
    pub port: u16,
    pub exchange: String,
    pub queue_name: Option<String>,
    pub routing_key: Option<String>,
}

/// Where pings are submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub base_url: String,
    pub namespace: Option<String>,
    pub doctype: Option<String>,
    pub docversion: Option<String>,
}

/// Validated ping submission target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingTarget {
    pub base_url: String,
    pub namespace: String,
    pub doctype: String,
    pub docversion: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bmo_api_url: DEFAULT_BMO_API_URL.to_string(),
            target_repo: DEFAULT_TARGET_REPO.to_string(),
            pulse: PulseSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_PULSE_HOST.to_string(),
            port: DEFAULT_PULSE_PORT,
            exchange: DEFAULT_PULSE_EXCHANGE.to_string(),
            queue_name: None,
            routing_key: None,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TMO_BASE_URL.to_string(),
            namespace: None,
            doctype: None,
            docversion: None,
        }
    }
}

impl Settings {
    /// Defaults, then the config file if one is given and present, then the
    /// process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::warn!("config file {:?} not found, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(settings)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override settings from environment variables looked up through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BMO_API_URL") {
            self.bmo_api_url = url;
        }
        if let Some(repo) = lookup("TARGET_REPO") {
            self.target_repo = repo;
        }
        if let Some(host) = lookup("PULSE_HOST") {
            self.pulse.host = host;
        }
        if let Some(port) = lookup("PULSE_PORT") {
            self.pulse.port = port
                .parse()
                .with_context(|| format!("PULSE_PORT is not a valid port: {}", port))?;
        }
        if let Some(exchange) = lookup("PULSE_EXCHANGE") {
            self.pulse.exchange = exchange;
        }
        if let Some(name) = lookup("PULSE_QUEUE_NAME") {
            self.pulse.queue_name = Some(name);
        }
        if let Some(key) = lookup("PULSE_QUEUE_ROUTING_KEY") {
            self.pulse.routing_key = Some(key);
        }
        if let Some(url) = lookup("TMO_BASE_URL") {
            self.telemetry.base_url = url;
        }
        if let Some(namespace) = lookup("TMO_PING_NAMESPACE") {
            self.telemetry.namespace = Some(namespace);
        }
        if let Some(doctype) = lookup("TMO_PING_DOCTYPE") {
            self.telemetry.doctype = Some(doctype);
        }
        if let Some(docversion) = lookup("TMO_PING_DOCVERSION") {
            self.telemetry.docversion = Some(docversion);
        }
        Ok(())
    }

    pub fn ping_target(&self) -> Result<PingTarget, TelemetryError> {
        let t = &self.telemetry;
        Ok(PingTarget {
            base_url: t.base_url.clone(),
            namespace: t.namespace.clone().ok_or(TelemetryError::MissingSetting("TMO_PING_NAMESPACE"))?,
            doctype: t.doctype.clone().ok_or(TelemetryError::MissingSetting("TMO_PING_DOCTYPE"))?,
            docversion: t.docversion.clone().ok_or(TelemetryError::MissingSetting("TMO_PING_DOCVERSION"))?,
        })
    }
}

impl PulseSettings {
    /// Pulse only lets a user read queues named `queue/<user>/...`.
    pub fn queue_name_for(&self, username: &str) -> Result<String, TelemetryError> {
        let name = self
            .queue_name
            .as_deref()
            .ok_or(TelemetryError::MissingSetting("PULSE_QUEUE_NAME"))?;
        let prefix = format!("queue/{}/", username);
        if name.starts_with(&prefix) {
            Ok(name.to_string())
        } else {
            Ok(format!("{}{}", prefix, name))
        }
    }

    pub fn routing_key(&self) -> Result<&str, TelemetryError> {
        self.routing_key
            .as_deref()
            .ok_or(TelemetryError::MissingSetting("PULSE_QUEUE_ROUTING_KEY"))
    }
}
