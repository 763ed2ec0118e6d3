//! Queue names and the typed payload of every job kind.
//!
//! Payloads are stored as JSON but never handled as untyped values past the
//! enqueue boundary: [`JobPayload::decode`] is the schema check at enqueue time
//! and again before dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::PlanTier;
use crate::{Error, Result};

/// Logical queues.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    ImageGeneration,
    Cleanup,
    Email,
    DiscordNotifications,
    SubscriptionRenewal,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        Self::ImageGeneration,
        Self::Cleanup,
        Self::Email,
        Self::DiscordNotifications,
        Self::SubscriptionRenewal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageGeneration => "image-generation",
            Self::Cleanup => "cleanup",
            Self::Email => "email",
            Self::DiscordNotifications => "discord-notifications",
            Self::SubscriptionRenewal => "subscription-renewal",
        }
    }
}

/// Target image size.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Square,
    Portrait,
    Landscape,
}

impl OutputFormat {
    /// Pixel resolution as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Square => (1024, 1024),
            Self::Portrait => (832, 1216),
            Self::Landscape => (1216, 832),
        }
    }

    pub fn aspect_label(&self) -> &'static str {
        match self {
            Self::Square => "square 1:1",
            Self::Portrait => "vertical portrait",
            Self::Landscape => "horizontal landscape",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StylePreset {
    Studio,
    Lifestyle,
    Minimalist,
    Luxury,
    Outdoor,
    Seasonal,
}

impl StylePreset {
    /// Scene direction handed to the prompt writer.
    pub fn scene(&self) -> &'static str {
        match self {
            Self::Studio => {
                "clean studio set, seamless backdrop, soft key light with gentle fill, crisp shadows"
            }
            Self::Lifestyle => {
                "natural home or everyday setting, warm daylight, lived-in props that suggest real use"
            }
            Self::Minimalist => "sparse composition, neutral palette, generous negative space",
            Self::Luxury => "rich materials like marble and velvet, dramatic low-key lighting",
            Self::Outdoor => "outdoor location with natural scenery and golden-hour sunlight",
            Self::Seasonal => "festive seasonal decor and color accents appropriate to the season",
        }
    }
}

/// A preset style or free-text direction from the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleSelection {
    Preset(StylePreset),
    Custom(String),
}

const MAX_CUSTOM_STYLE_LEN: usize = 500;

impl StyleSelection {
    pub fn describe(&self) -> &str {
        match self {
            Self::Preset(preset) => preset.scene(),
            Self::Custom(text) => text.trim(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationJob {
    pub campaign_id: String,
    pub user_id: String,
    /// Object-storage key of the uploaded product photo.
    pub product_image_key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub style: StyleSelection,
    pub format: OutputFormat,
}

fn default_hours_old() -> u32 {
    24
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupJob {
    /// Minimum age of an orphaned upload before it is swept.
    #[serde(default = "default_hours_old")]
    pub hours_old: u32,
}

impl Default for CleanupJob {
    fn default() -> Self {
        Self {
            hours_old: default_hours_old(),
        }
    }
}

/// Transactional emails, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmailJob {
    Welcome {
        to: String,
        name: Option<String>,
    },
    SubscriptionConfirmation {
        to: String,
        name: Option<String>,
        plan: PlanTier,
        credits: u32,
    },
    CreditTopup {
        to: String,
        name: Option<String>,
        credits: u32,
        balance: i64,
    },
    PaymentFailure {
        to: String,
        name: Option<String>,
        plan: PlanTier,
        amount_cents: Option<i64>,
        retry_url: Option<String>,
    },
    SubscriptionSuspended {
        to: String,
        name: Option<String>,
        plan: PlanTier,
    },
}

impl EmailJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::SubscriptionConfirmation { .. } => "subscription_confirmation",
            Self::CreditTopup { .. } => "credit_topup",
            Self::PaymentFailure { .. } => "payment_failure",
            Self::SubscriptionSuspended { .. } => "subscription_suspended",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Self::Welcome { to, .. }
            | Self::SubscriptionConfirmation { to, .. }
            | Self::CreditTopup { to, .. }
            | Self::PaymentFailure { to, .. }
            | Self::SubscriptionSuspended { to, .. } => to,
        }
    }

    pub fn recipient_name(&self) -> Option<&str> {
        match self {
            Self::Welcome { name, .. }
            | Self::SubscriptionConfirmation { name, .. }
            | Self::CreditTopup { name, .. }
            | Self::PaymentFailure { name, .. }
            | Self::SubscriptionSuspended { name, .. } => name.as_deref(),
        }
    }
}

/// Team chat notifications, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscordJob {
    NewUser {
        user_id: String,
        email: String,
        name: Option<String>,
    },
    SubscriptionCreated {
        user_id: String,
        email: String,
        plan: PlanTier,
    },
    PaymentSuccess {
        user_id: String,
        email: String,
        plan: PlanTier,
        amount_cents: i64,
        currency: String,
    },
    PaymentFailure {
        user_id: String,
        email: String,
        plan: PlanTier,
        amount_cents: Option<i64>,
        reason: Option<String>,
    },
    SubscriptionSuspended {
        user_id: String,
        email: String,
        plan: PlanTier,
    },
    SubscriptionActivated {
        user_id: String,
        email: String,
        plan: PlanTier,
    },
    CreditTopup {
        user_id: String,
        email: String,
        credits: u32,
    },
    CampaignFeedback {
        user_id: String,
        campaign_id: String,
        rating: u8,
        comment: Option<String>,
    },
}

impl DiscordJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewUser { .. } => "new_user",
            Self::SubscriptionCreated { .. } => "subscription_created",
            Self::PaymentSuccess { .. } => "payment_success",
            Self::PaymentFailure { .. } => "payment_failure",
            Self::SubscriptionSuspended { .. } => "subscription_suspended",
            Self::SubscriptionActivated { .. } => "subscription_activated",
            Self::CreditTopup { .. } => "credit_topup",
            Self::CampaignFeedback { .. } => "campaign_feedback",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalJob {}

/// Every job kind, grouped by queue. Dispatch matches on this exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    GenerateImages(ImageGenerationJob),
    CleanupOrphanedUploads(CleanupJob),
    Email(EmailJob),
    Discord(DiscordJob),
    RenewSubscriptions(RenewalJob),
}

impl JobPayload {
    pub const GENERATE_IMAGES: &'static str = "generate-images";
    pub const CLEANUP_ORPHANED_UPLOADS: &'static str = "cleanup-orphaned-uploads";
    pub const RENEW_SUBSCRIPTIONS: &'static str = "renew-subscriptions";

    pub fn queue(&self) -> QueueName {
        match self {
            Self::GenerateImages(_) => QueueName::ImageGeneration,
            Self::CleanupOrphanedUploads(_) => QueueName::Cleanup,
            Self::Email(_) => QueueName::Email,
            Self::Discord(_) => QueueName::DiscordNotifications,
            Self::RenewSubscriptions(_) => QueueName::SubscriptionRenewal,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GenerateImages(_) => Self::GENERATE_IMAGES,
            Self::CleanupOrphanedUploads(_) => Self::CLEANUP_ORPHANED_UPLOADS,
            Self::Email(email) => email.kind(),
            Self::Discord(discord) => discord.kind(),
            Self::RenewSubscriptions(_) => Self::RENEW_SUBSCRIPTIONS,
        }
    }

    /// JSON body as stored on the job.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::GenerateImages(job) => serde_json::to_value(job)?,
            Self::CleanupOrphanedUploads(job) => serde_json::to_value(job)?,
            Self::Email(job) => serde_json::to_value(job)?,
            Self::Discord(job) => serde_json::to_value(job)?,
            Self::RenewSubscriptions(job) => serde_json::to_value(job)?,
        };
        Ok(value)
    }

    /// Parse and validate a stored or producer-supplied payload.
    pub fn decode(queue: QueueName, kind: &str, value: &Value) -> Result<Self> {
        let payload = match queue {
            QueueName::ImageGeneration => {
                expect_kind(queue, kind, Self::GENERATE_IMAGES)?;
                Self::GenerateImages(parse(queue, kind, value.clone())?)
            }
            QueueName::Cleanup => {
                expect_kind(queue, kind, Self::CLEANUP_ORPHANED_UPLOADS)?;
                Self::CleanupOrphanedUploads(parse(queue, kind, value.clone())?)
            }
            QueueName::Email => Self::Email(parse(queue, kind, with_type_tag(kind, value)?)?),
            QueueName::DiscordNotifications => {
                Self::Discord(parse(queue, kind, with_type_tag(kind, value)?)?)
            }
            QueueName::SubscriptionRenewal => {
                expect_kind(queue, kind, Self::RENEW_SUBSCRIPTIONS)?;
                Self::RenewSubscriptions(parse(queue, kind, value.clone())?)
            }
        };
        payload.validate()?;
        Ok(payload)
    }

    /// Field rules beyond shape.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::GenerateImages(job) => {
                require_non_empty("campaign_id", &job.campaign_id)?;
                require_non_empty("user_id", &job.user_id)?;
                require_non_empty("product_image_key", &job.product_image_key)?;
                require_non_empty("title", &job.title)?;
                if let StyleSelection::Custom(text) = &job.style {
                    require_non_empty("style.custom", text)?;
                    if text.chars().count() > MAX_CUSTOM_STYLE_LEN {
                        return Err(Error::validation(format!(
                            "style.custom exceeds {} characters",
                            MAX_CUSTOM_STYLE_LEN
                        )));
                    }
                }
                Ok(())
            }
            Self::CleanupOrphanedUploads(job) => {
                if job.hours_old == 0 {
                    return Err(Error::validation("hours_old must be greater than zero"));
                }
                Ok(())
            }
            Self::Email(job) => require_email("to", job.recipient()),
            Self::Discord(job) => match job {
                DiscordJob::CampaignFeedback {
                    user_id,
                    campaign_id,
                    rating,
                    ..
                } => {
                    require_non_empty("user_id", user_id)?;
                    require_non_empty("campaign_id", campaign_id)?;
                    if !(1..=5).contains(rating) {
                        return Err(Error::validation(format!(
                            "rating must be between 1 and 5, got {}",
                            rating
                        )));
                    }
                    Ok(())
                }
                DiscordJob::NewUser { user_id, email, .. }
                | DiscordJob::SubscriptionCreated { user_id, email, .. }
                | DiscordJob::PaymentSuccess { user_id, email, .. }
                | DiscordJob::PaymentFailure { user_id, email, .. }
                | DiscordJob::SubscriptionSuspended { user_id, email, .. }
                | DiscordJob::SubscriptionActivated { user_id, email, .. }
                | DiscordJob::CreditTopup { user_id, email, .. } => {
                    require_non_empty("user_id", user_id)?;
                    require_email("email", email)
                }
            },
            Self::RenewSubscriptions(_) => Ok(()),
        }
    }
}

fn expect_kind(queue: QueueName, kind: &str, expected: &str) -> Result<()> {
    if kind == expected {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "unknown job kind '{}' for queue {}",
            kind, queue
        )))
    }
}

/// Tagged queues carry their kind inside the payload as `type`.
fn with_type_tag(kind: &str, value: &Value) -> Result<Value> {
    let Value::Object(map) = value else {
        return Err(Error::validation(format!(
            "{} payload must be a JSON object",
            kind
        )));
    };
    match map.get("type") {
        Some(Value::String(tag)) if tag == kind => Ok(value.clone()),
        Some(other) => Err(Error::validation(format!(
            "payload type {} does not match job kind '{}'",
            other, kind
        ))),
        None => {
            let mut map = map.clone();
            map.insert("type".to_string(), Value::String(kind.to_string()));
            Ok(Value::Object(map))
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(queue: QueueName, kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::validation(format!("invalid '{}' payload for queue {}: {}", kind, queue, e))
    })
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

fn require_email(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(Error::validation(format!(
            "{} is not a valid email address: '{}'",
            field, value
        ))),
    }
}
