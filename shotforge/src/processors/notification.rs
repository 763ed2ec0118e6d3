//! Email and Discord notification processors.
//!
//! Missing configuration is not a failure: the job completes with a `skipped`
//! result. Send errors propagate so the worker retries them.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::notification::{EmailSender, EmailTemplates, WebhookSender, discord_message};
use crate::queue::payload::{JobPayload, QueueName};
use crate::utils::clock::Clock;
use crate::worker::{JobContext, Processor};
use crate::{Error, Result};

pub struct EmailProcessor {
    sender: Arc<dyn EmailSender>,
    templates: EmailTemplates,
}

impl EmailProcessor {
    pub fn new(sender: Arc<dyn EmailSender>, templates: EmailTemplates) -> Self {
        Self { sender, templates }
    }
}

#[async_trait]
impl Processor for EmailProcessor {
    fn name(&self) -> &'static str {
        "email"
    }

    fn queue(&self) -> QueueName {
        QueueName::Email
    }

    async fn process(&self, ctx: &JobContext, payload: JobPayload) -> Result<Option<Value>> {
        let JobPayload::Email(email) = payload else {
            return Err(Error::permanent(format!(
                "{} cannot run {} jobs",
                self.name(),
                payload.kind()
            )));
        };

        if !self.sender.is_configured() {
            warn!(
                job_id = %ctx.job_id,
                template = email.kind(),
                "Email sender not configured, skipping"
            );
            return Ok(Some(json!({"skipped": "email sender not configured"})));
        }

        let message = self.templates.render(&email);
        self.sender.send_email(&message).await?;
        info!(job_id = %ctx.job_id, template = email.kind(), "Email delivered");
        Ok(Some(json!({"sent": email.kind()})))
    }
}

pub struct DiscordProcessor {
    sender: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
}

impl DiscordProcessor {
    pub fn new(sender: Arc<dyn WebhookSender>, clock: Arc<dyn Clock>) -> Self {
        Self { sender, clock }
    }
}

#[async_trait]
impl Processor for DiscordProcessor {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn queue(&self) -> QueueName {
        QueueName::DiscordNotifications
    }

    async fn process(&self, ctx: &JobContext, payload: JobPayload) -> Result<Option<Value>> {
        let JobPayload::Discord(event) = payload else {
            return Err(Error::permanent(format!(
                "{} cannot run {} jobs",
                self.name(),
                payload.kind()
            )));
        };

        let (channel, embed) = discord_message(&event, self.clock.now());
        if !self.sender.is_configured(channel) {
            warn!(
                job_id = %ctx.job_id,
                kind = event.kind(),
                %channel,
                "Discord webhook not configured, skipping"
            );
            return Ok(Some(json!({
                "skipped": format!("no webhook configured for {}", channel)
            })));
        }

        self.sender.send_webhook_message(channel, &embed).await?;
        info!(job_id = %ctx.job_id, kind = event.kind(), %channel, "Discord notification sent");
        Ok(Some(json!({"sent": event.kind(), "channel": channel})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{DiscordChannel, EmailMessage, Embed};
    use crate::queue::payload::{DiscordJob, EmailJob};
    use crate::utils::clock::SystemClock;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingEmail {
        configured: bool,
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailSender for RecordingEmail {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn send_email(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    struct FailingWebhook;

    #[async_trait]
    impl WebhookSender for FailingWebhook {
        fn is_configured(&self, channel: DiscordChannel) -> bool {
            channel == DiscordChannel::Payments
        }

        async fn send_webhook_message(&self, _: DiscordChannel, _: &Embed) -> Result<()> {
            Err(Error::remote("discord", "HTTP 502"))
        }
    }

    fn welcome() -> JobPayload {
        JobPayload::Email(EmailJob::Welcome {
            to: "ana@example.com".to_string(),
            name: None,
        })
    }

    #[tokio::test]
    async fn test_unconfigured_email_is_skipped() {
        let sender = Arc::new(RecordingEmail::default());
        let processor = EmailProcessor::new(sender.clone(), EmailTemplates::new("https://x.io"));
        let ctx = JobContext::detached(QueueName::Email, "welcome");

        let result = processor.process(&ctx, welcome()).await.unwrap().unwrap();
        assert!(result.get("skipped").is_some());
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_configured_email_is_rendered_and_sent() {
        let sender = Arc::new(RecordingEmail {
            configured: true,
            ..Default::default()
        });
        let processor = EmailProcessor::new(sender.clone(), EmailTemplates::new("https://x.io"));
        let ctx = JobContext::detached(QueueName::Email, "welcome");

        processor.process(&ctx, welcome()).await.unwrap();
        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, "welcome");
    }

    #[tokio::test]
    async fn test_discord_skips_unconfigured_channel_but_propagates_send_errors() {
        let processor = DiscordProcessor::new(Arc::new(FailingWebhook), Arc::new(SystemClock));
        let ctx = JobContext::detached(QueueName::DiscordNotifications, "new_user");

        let signup = JobPayload::Discord(DiscordJob::NewUser {
            user_id: "u1".to_string(),
            email: "ana@example.com".to_string(),
            name: None,
        });
        let result = processor.process(&ctx, signup).await.unwrap().unwrap();
        assert!(result.get("skipped").is_some());

        let topup = JobPayload::Discord(DiscordJob::CreditTopup {
            user_id: "u1".to_string(),
            email: "ana@example.com".to_string(),
            credits: 100,
        });
        let err = processor.process(&ctx, topup).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_wrong_payload_is_permanent() {
        let processor = DiscordProcessor::new(Arc::new(FailingWebhook), Arc::new(SystemClock));
        let ctx = JobContext::detached(QueueName::DiscordNotifications, "welcome");
        let err = processor.process(&ctx, welcome()).await.unwrap_err();
        assert!(err.is_permanent());
    }
}
