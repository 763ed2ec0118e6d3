//! Discord webhook sender.
//!
//! Follows Discord's rate-limit guidance: no client-side limits, honor
//! `Retry-After` on 429 a bounded number of times.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::utils::http_client::truncate_body;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Team channels, each backed by its own webhook URL.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscordChannel {
    Signups,
    Payments,
    Feedback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl EmbedField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: false,
        }
    }

    pub fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            inline: true,
            ..Self::new(name, value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub timestamp: DateTime<Utc>,
}

/// Sends embeds to team channels.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// False when no webhook URL is set for `channel`.
    fn is_configured(&self, channel: DiscordChannel) -> bool;

    async fn send_webhook_message(&self, channel: DiscordChannel, embed: &Embed) -> Result<()>;
}

pub struct DiscordWebhookSender {
    client: Client,
    webhooks: HashMap<DiscordChannel, String>,
    username: Option<String>,
}

impl DiscordWebhookSender {
    pub fn new(client: Client, webhooks: HashMap<DiscordChannel, String>) -> Self {
        let webhooks = webhooks
            .into_iter()
            .filter(|(_, url)| !url.trim().is_empty())
            .collect();
        Self {
            client,
            webhooks,
            username: Some("ShotForge".to_string()),
        }
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    fn build_payload(&self, embed: &Embed) -> serde_json::Value {
        let fields: Vec<serde_json::Value> = embed
            .fields
            .iter()
            .map(|f| json!({"name": f.name, "value": f.value, "inline": f.inline}))
            .collect();
        let mut payload = json!({
            "embeds": [{
                "title": embed.title,
                "description": embed.description,
                "color": embed.color,
                "fields": fields,
                "timestamp": embed.timestamp.to_rfc3339(),
            }]
        });
        if let Some(username) = &self.username {
            payload["username"] = json!(username);
        }
        payload
    }

    async fn send_with_retry(&self, url: &str, payload: &serde_json::Value) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(url)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::remote("discord", e))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let retry_after = parse_retry_after(&response);
                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Discord rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::remote(
                        "discord",
                        format!("rate limited after {} attempts", MAX_RATE_LIMIT_RETRIES),
                    ));
                }
                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(
                "discord",
                format!("HTTP {}: {}", status, truncate_body(&body)),
            ));
        }
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .find_map(|header| {
            response
                .headers()
                .get(*header)?
                .to_str()
                .ok()?
                .parse::<f64>()
                .ok()
        })
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl WebhookSender for DiscordWebhookSender {
    fn is_configured(&self, channel: DiscordChannel) -> bool {
        self.webhooks.contains_key(&channel)
    }

    async fn send_webhook_message(&self, channel: DiscordChannel, embed: &Embed) -> Result<()> {
        let Some(url) = self.webhooks.get(&channel) else {
            return Err(Error::config(format!(
                "no Discord webhook configured for {} channel",
                channel
            )));
        };
        let payload = self.build_payload(embed);
        self.send_with_retry(url, &payload).await?;
        debug!(channel = %channel, title = %embed.title, "Discord notification sent");
        Ok(())
    }
}
