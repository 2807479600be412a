use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{Level, warn};
use url::Url;

use super::config::ServiceContext;

/// Events logged from here are never turned into alerts themselves.
pub(crate) const ALERTS_TARGET: &str = module_path!();

const QUEUE_CAPACITY: usize = 256;
const CONTENT_LIMIT: usize = 2000;

#[derive(Debug, Clone)]
pub(crate) struct AlertEvent {
    pub(crate) level: Level,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) context: ServiceContext,
    pub(crate) target: String,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) spans: Vec<String>,
}

impl AlertEvent {
    pub(crate) fn render(&self) -> String {
        let mut lines = vec![format!(
            "**{}** `{}` `{}` `{}`",
            self.context.service_name,
            self.context.environment,
            self.context.component,
            self.level.as_str()
        )];
        lines.push(format!(
            "`{}` `{}`",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.target
        ));

        if let Some(message) = self.message.as_deref().filter(|m| !m.trim().is_empty()) {
            lines.push(format!("> {}", message.trim()));
        }
        if !self.spans.is_empty() {
            lines.push(format!("spans: `{}`", self.spans.join(" > ")));
        }
        for (key, value) in &self.fields {
            lines.push(format!("- `{}` = `{}`", key, value));
        }

        truncate(lines.join("\n"), CONTENT_LIMIT)
    }
}

#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Posts `{"content": ...}`, which Discord and Slack-compatible webhooks accept.
pub(crate) struct WebhookAlertSink {
    webhook_url: Url,
    client: Client,
}

impl WebhookAlertSink {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(3)).build()?;
        Ok(Self {
            webhook_url,
            client,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": event.render() }))
            .send()
            .await
            .map_err(|err| {
                // reqwest errors embed the URL, which embeds the webhook token.
                if err.is_timeout() {
                    anyhow!("alert webhook request timed out")
                } else if err.is_connect() {
                    anyhow!("alert webhook connection failed")
                } else {
                    anyhow!("alert webhook request failed")
                }
            })?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(anyhow!(
            "alert webhook returned non-success status: {}",
            response.status()
        ))
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Hands events to a background task so logging never waits on the network.
#[derive(Clone)]
pub(crate) struct AlertDispatcher {
    tx: mpsc::Sender<AlertEvent>,
}

impl AlertDispatcher {
    pub(crate) fn spawn(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for sink in &sinks {
                    if let Err(error) = sink.send(&event).await {
                        warn!(sink = sink.name(), error = %error, "observability: alert sink failed");
                    }
                }
            }
        });

        Self { tx }
    }

    pub(crate) fn dispatch(&self, event: AlertEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                eprintln!("observability: alert queue full; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                eprintln!("observability: alert queue closed; dropping event");
            }
        }
    }
}

fn truncate(content: String, limit: usize) -> String {
    const SUFFIX: &str = "\n… (truncated)";

    if content.chars().count() <= limit {
        return content;
    }
    let allowed = limit.saturating_sub(SUFFIX.chars().count());
    let mut truncated: String = content.chars().take(allowed).collect();
    truncated.push_str(SUFFIX);
    truncated
}
