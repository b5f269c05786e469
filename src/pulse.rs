//! Reading hg push notifications from the Mozilla Pulse service.
//!
//! Message bodies are described at
//! https://mozilla-version-control-tools.readthedocs.io/en/latest/hgmo/notifications.html

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bmo::BugTracker;
use crate::config::PulseSettings;
use crate::hgmo::ChangesetSource;
use crate::stats::ProcessingStats;
use crate::telemetry::{payload_for_changeset, PingSink};

const CHANGEGROUP_MESSAGE_TYPE: &str = "changegroup.1";
const CONSUMER_TAG: &str = "committelemetry";

#[derive(Debug, Deserialize)]
struct PushMessage {
    payload: PushPayload,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "type")]
    msgtype: String,
    #[serde(default)]
    data: PushData,
}

#[derive(Debug, Default, Deserialize)]
struct PushData {
    #[serde(default)]
    heads: Vec<String>,
    #[serde(default)]
    repo_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Undecodable(String),
    MessageType(String),
    HeadCount(usize),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Undecodable(e) => write!(f, "undecodable message body: {}", e),
            SkipReason::MessageType(t) => write!(f, "message of type {}", t),
            SkipReason::HeadCount(n) => write!(f, "message with {} heads (expected 1)", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Sent { changeset: String },
    Skipped(SkipReason),
}

impl PushMessage {
    fn changeset_to_process(&self) -> Result<(&str, &str), SkipReason> {
        if self.payload.msgtype != CHANGEGROUP_MESSAGE_TYPE {
            return Err(SkipReason::MessageType(self.payload.msgtype.clone()));
        }
        match self.payload.data.heads.as_slice() {
            [head] => Ok((head.as_str(), self.payload.data.repo_url.as_str())),
            heads => Err(SkipReason::HeadCount(heads.len())),
        }
    }
}

/// Turns push messages into pings.
pub struct MessageHandler {
    hgmo: Arc<dyn ChangesetSource>,
    bugs: Arc<dyn BugTracker>,
    sink: Arc<dyn PingSink>,
    stats: Arc<ProcessingStats>,
}

impl MessageHandler {
    pub fn new(
        hgmo: Arc<dyn ChangesetSource>,
        bugs: Arc<dyn BugTracker>,
        sink: Arc<dyn PingSink>,
        stats: Arc<ProcessingStats>,
    ) -> Self {
        Self { hgmo, bugs, sink, stats }
    }

    /// Handle one message body. Skipped messages are `Ok`; an error means the
    /// message must not be acknowledged.
    pub async fn handle(&self, body: &[u8]) -> Result<MessageOutcome> {
        self.stats.message_received();

        let target = serde_json::from_slice::<PushMessage>(body)
            .map_err(|e| SkipReason::Undecodable(e.to_string()))
            .and_then(|message| {
                debug!("received message: {:?}", message);
                message
                    .changeset_to_process()
                    .map(|(changeset, repo_url)| (changeset.to_string(), repo_url.to_string()))
            });

        let (changeset, repo_url) = match target {
            Ok(target) => target,
            Err(reason) => {
                match reason {
                    SkipReason::Undecodable(_) => warn!("skipped {}", reason),
                    _ => info!("skipped {}", reason),
                }
                self.stats.message_skipped();
                return Ok(MessageOutcome::Skipped(reason));
            }
        };

        debug!("message repo URL is {}", repo_url);
        info!("processing changeset {}", changeset);

        let ping = payload_for_changeset(&changeset, &repo_url, self.hgmo.as_ref(), self.bugs.as_ref())
            .await
            .with_context(|| format!("failed to build telemetry for changeset {}", changeset))?;

        // The changeset ID doubles as the ping's de-duplication key.
        self.sink.send_ping(&changeset, &ping).await?;
        self.stats.ping_sent();

        Ok(MessageOutcome::Sent { changeset })
    }
}

pub struct PulseCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for PulseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn pulse_uri(settings: &PulseSettings, credentials: &PulseCredentials) -> AMQPUri {
    AMQPUri {
        scheme: AMQPScheme::AMQPS,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            },
            host: settings.host.clone(),
            port: settings.port,
        },
        vhost: "/".to_string(),
        query: Default::default(),
    }
}

/// Connect to Pulse and handle queued messages until none arrives for
/// `idle_timeout`. The connection is closed before returning.
pub async fn run_pulse_listener(
    settings: &PulseSettings,
    credentials: &PulseCredentials,
    idle_timeout: Duration,
    handler: &MessageHandler,
) -> Result<()> {
    let queue_name = settings.queue_name_for(&credentials.username)?;
    settings.routing_key()?;

    info!("connecting to {}:{} as {}", settings.host, settings.port, credentials.username);

    // A single attempt so a bad connection fails fast.
    let connection = Connection::connect_uri(pulse_uri(settings, credentials), ConnectionProperties::default())
        .await
        .with_context(|| format!("failed to connect to Pulse at {}:{}", settings.host, settings.port))?;

    let result = drain_queue(&connection, settings, &queue_name, idle_timeout, handler).await;

    if let Err(e) = connection.close(200, "OK").await {
        warn!("failed to close Pulse connection cleanly: {}", e);
    }
    result
}

async fn bind_queue(channel: &Channel, settings: &PulseSettings, queue_name: &str) -> Result<()> {
    // The Pulse server forbids declaring exchanges; a passive declare only
    // asserts that it exists.
    channel
        .exchange_declare(
            &settings.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("exchange {} is not available", settings.exchange))?;

    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("failed to declare queue {}", queue_name))?;

    let routing_key = settings.routing_key()?;
    channel
        .queue_bind(
            queue_name,
            &settings.exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("failed to bind queue {} with key {}", queue_name, routing_key))?;

    Ok(())
}

async fn drain_queue(
    connection: &Connection,
    settings: &PulseSettings,
    queue_name: &str,
    idle_timeout: Duration,
    handler: &MessageHandler,
) -> Result<()> {
    let channel = connection.create_channel().await?;
    bind_queue(&channel, settings, queue_name).await?;

    channel.basic_qos(1, BasicQosOptions::default()).await?;
    let mut consumer = channel
        .basic_consume(
            queue_name,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("failed to consume from {}", queue_name))?;

    info!("reading messages from {}", queue_name);

    loop {
        let delivery = match tokio::time::timeout(idle_timeout, consumer.next()).await {
            Err(_) => {
                info!("no messages for {:?}, done", idle_timeout);
                break;
            }
            Ok(None) => {
                info!("consumer for {} was cancelled", queue_name);
                break;
            }
            Ok(Some(delivery)) => delivery.context("failed to receive message")?,
        };

        handler.handle(&delivery.data).await?;
        delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .context("failed to acknowledge message")?;
    }

    Ok(())
}
