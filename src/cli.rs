use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::fmt::MakeWriter;

use crate::bmo::BmoClient;
use crate::config::Settings;
use crate::hgmo::HgmoClient;
use crate::http::RetryClient;
use crate::limits::current_address_space_limit;
use crate::pulse::{run_pulse_listener, MessageHandler, PulseCredentials};
use crate::stats::ProcessingStats;
use crate::telemetry::{payload_for_changeset, TmoClient};

#[derive(Parser, Debug)]
#[command(name = "process-queue-messages")]
#[command(about = "Process all queued mercurial repo change messages.")]
pub struct ProcessQueueCli {
    /// Print debugging messages about the script's progress.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// The Pulse queue username to connect with.
    #[arg(long, env = "PULSE_USERNAME")]
    pub user: Option<String>,

    /// The Pulse queue user's password.
    #[arg(long, env = "PULSE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Timeout, in seconds, to wait for additional queue messages.
    #[arg(long, default_value_t = 1.0)]
    pub timeout: f64,

    /// Config file path.
    #[arg(long, env = "COMMITTELEMETRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to this path and exit.
    #[arg(long, value_name = "PATH")]
    pub generate_config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(name = "dump-telemetry")]
#[command(about = "Dump the commit telemetry JSON for the given mercurial changeset ID.")]
pub struct DumpTelemetryCli {
    /// Print debugging messages about the script's progress.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// The URL of the repository where the given changeset can be found.
    #[arg(long, env = "TARGET_REPO", value_name = "URL")]
    pub target_repo: Option<String>,

    /// Config file path.
    #[arg(long, env = "COMMITTELEMETRY_CONFIG")]
    pub config: Option<PathBuf>,

    pub node_id: String,
}

pub fn init_logging<W>(debug: bool, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let level = if debug { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("committelemetry={}", level))
        .with_writer(writer)
        .try_init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// 12 to 40 hex digits, the short and full forms of a Mercurial node ID.
pub fn validate_node_id(node_id: &str) -> Result<()> {
    let valid_len = (12..=40).contains(&node_id.len()) && node_id.len() % 2 == 0;
    if !valid_len || hex::decode(node_id).is_err() {
        anyhow::bail!("{} is not a valid changeset ID", node_id);
    }
    Ok(())
}

/// The `process-queue-messages` command.
pub fn process_queue_messages() -> Result<()> {
    let cli = ProcessQueueCli::parse();
    init_logging(cli.debug, std::io::stdout);

    // main installs the limit before any subscriber exists, so report it here.
    match current_address_space_limit() {
        Ok(Some(limit)) => debug!("address-space limit is {} bytes", limit),
        Ok(None) => debug!("address-space limit is unlimited"),
        Err(e) => debug!("could not read address-space limit: {}", e),
    }

    let settings = Settings::load(cli.config.as_deref())?;

    if let Some(path) = &cli.generate_config {
        settings.save(path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let credentials = PulseCredentials {
        username: cli
            .user
            .context("a Pulse username is required (--user or PULSE_USERNAME)")?,
        password: cli
            .password
            .context("a Pulse password is required (--password or PULSE_PASSWORD)")?,
    };
    let idle_timeout = Duration::try_from_secs_f64(cli.timeout)
        .ok()
        .filter(|timeout| !timeout.is_zero())
        .context("--timeout must be a positive number of seconds")?;

    let http = RetryClient::new()?;
    let stats = Arc::new(ProcessingStats::new());
    let handler = MessageHandler::new(
        Arc::new(HgmoClient::new(http.clone())),
        Arc::new(BmoClient::new(http.clone(), settings.bmo_api_url.clone())),
        Arc::new(TmoClient::new(http, settings.ping_target()?)),
        stats.clone(),
    );

    runtime()?.block_on(run_pulse_listener(
        &settings.pulse,
        &credentials,
        idle_timeout,
        &handler,
    ))?;

    let summary = stats.summary();
    info!(
        "processed {} messages in {:.1}s: {} pings sent, {} skipped",
        summary.messages_received, summary.elapsed_seconds, summary.pings_sent, summary.messages_skipped
    );
    Ok(())
}

/// The `dump-telemetry` command.
pub fn dump_telemetry() -> Result<()> {
    let cli = DumpTelemetryCli::parse();
    // stdout carries the ping itself.
    init_logging(cli.debug, std::io::stderr);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(repo) = cli.target_repo {
        settings.target_repo = repo;
    }
    let target_repo = settings.target_repo.clone();
    validate_node_id(&cli.node_id)?;

    debug!("checking repo {}", target_repo);

    let http = RetryClient::new()?;
    let hgmo = HgmoClient::new(http.clone());
    let bugs = BmoClient::new(http, settings.bmo_api_url.clone());

    // A missing changeset surfaces as "Error: changeset ... does not exist in
    // repository ..." from main.
    let ping = runtime()?.block_on(payload_for_changeset(&cli.node_id, &target_repo, &hgmo, &bugs))?;

    println!("{}", serde_json::to_string_pretty(&ping)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definitions_are_consistent() {
        ProcessQueueCli::command().debug_assert();
        DumpTelemetryCli::command().debug_assert();
    }

    #[test]
    fn timeout_defaults_to_one_second() {
        let cli = ProcessQueueCli::try_parse_from(["process-queue-messages", "--user", "bot"]).unwrap();
        assert_eq!(cli.timeout, 1.0);
        assert_eq!(cli.user.as_deref(), Some("bot"));
    }

    #[test]
    fn node_ids_must_be_hex() {
        assert!(validate_node_id("deafa2891c61").is_ok());
        assert!(validate_node_id("445d1a7b050419f0ea266b0c191001d788f7850d").is_ok());
        assert!(validate_node_id("deafa").is_err());
        assert!(validate_node_id("not-a-changeset-id").is_err());
    }
}
