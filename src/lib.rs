//! Commit telemetry for Mercurial pushes: review-system classification,
//! diffstats, and ping submission driven by Mozilla Pulse notifications.

pub mod bmo;
pub mod classifier;
pub mod cli;
pub mod commitparser;
pub mod config;
pub mod diffstat;
pub mod entrypoint;
pub mod error;
pub mod hgmo;
pub mod http;
pub mod limits;
pub mod pulse;
pub mod stats;
pub mod telemetry;
