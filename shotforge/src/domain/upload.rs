use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploaded,
    Deleted,
}

/// A product photo uploaded by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUpload {
    pub id: String,
    pub user_id: String,
    pub storage_key: String,
    pub campaign_id: Option<String>,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
}

impl ProductUpload {
    /// An upload is orphaned when it was never linked to a campaign and is older than `cutoff`.
    pub fn is_orphaned(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == UploadStatus::Uploaded
            && self.campaign_id.is_none()
            && self.created_at < cutoff
    }
}
