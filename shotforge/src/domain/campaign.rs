use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Campaign status, driven by image-generation job outcomes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A marketing campaign as seen by the job subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: CampaignStatus,
    pub generated_images: Vec<String>,
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
