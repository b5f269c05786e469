use std::fmt;

#[derive(Debug)]
pub enum TelemetryError {
    NoSuchChangeset { changeset: String, repo_url: String },
    Http { url: String, status: u16 },
    Decode { url: String, reason: String },
    MissingSetting(&'static str),
}

impl TelemetryError {
    /// True for errors reported by a remote service as a bad HTTP status.
    pub fn is_http(&self) -> bool {
        matches!(self, TelemetryError::Http { .. })
    }
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::NoSuchChangeset { changeset, repo_url } =>
                write!(f, "changeset {} does not exist in repository {}", changeset, repo_url),
            TelemetryError::Http { url, status } =>
                write!(f, "HTTP status {} for {}", status, url),
            TelemetryError::Decode { url, reason } =>
                write!(f, "unexpected response from {}: {}", url, reason),
            TelemetryError::MissingSetting(name) =>
                write!(f, "missing required setting {}", name),
        }
    }
}

impl std::error::Error for TelemetryError {}
