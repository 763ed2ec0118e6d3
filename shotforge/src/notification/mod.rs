//! Outbound notifications: transactional email and team Discord webhooks.

pub mod discord;
pub mod email;
pub mod templates;

pub use discord::{DiscordChannel, DiscordWebhookSender, Embed, EmbedField, WebhookSender};
pub use email::{EmailMessage, EmailSender, HttpEmailSender};
pub use templates::{EmailTemplates, discord_message};
