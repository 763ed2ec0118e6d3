//! Transactional email over an HTTP email API (Resend-compatible).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::utils::http_client::truncate_body;
use crate::{Error, Result};

/// A rendered email ready to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Template kind, e.g. `welcome`; sent as a tag for provider-side analytics.
    pub template: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// False when no API key is set; callers skip sending.
    fn is_configured(&self) -> bool;

    async fn send_email(&self, message: &EmailMessage) -> Result<()>;
}

pub struct HttpEmailSender {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpEmailSender {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        api_key: Option<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            from: from.into(),
        }
    }

    fn build_payload(&self, message: &EmailMessage) -> serde_json::Value {
        json!({
            "from": self.from,
            "to": [message.to],
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
            "tags": [{"name": "template", "value": message.template}],
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        let Some(api_key) = &self.api_key else {
            return Err(Error::config("EMAIL_API_KEY is not set"));
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&self.build_payload(message))
            .send()
            .await
            .map_err(|e| Error::remote("email", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(
                "email",
                format!("HTTP {}: {}", status, truncate_body(&body)),
            ));
        }

        debug!(template = %message.template, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_key_is_unconfigured() {
        crate::utils::http_client::install_rustls_provider();
        let sender = HttpEmailSender::new(
            Client::new(),
            "https://api.resend.com/emails",
            Some("  ".to_string()),
            "ShotForge <hello@shotforge.io>",
        );
        assert!(!sender.is_configured());
    }

    #[test]
    fn test_payload_includes_template_tag() {
        crate::utils::http_client::install_rustls_provider();
        let sender = HttpEmailSender::new(
            Client::new(),
            "https://api.resend.com/emails",
            Some("re_123".to_string()),
            "ShotForge <hello@shotforge.io>",
        );
        let payload = sender.build_payload(&EmailMessage {
            to: "ana@example.com".to_string(),
            subject: "Welcome".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: "Hi".to_string(),
            template: "welcome".to_string(),
        });
        assert_eq!(payload["to"][0], "ana@example.com");
        assert_eq!(payload["tags"][0]["value"], "welcome");
    }
}
