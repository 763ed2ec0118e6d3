use sqlx::FromRow;
use std::str::FromStr;

use crate::database::time::ms_to_datetime;
use crate::domain::{Campaign, CampaignStatus};
use crate::{Error, Result};

/// Row of the `campaigns` table.
#[derive(Debug, Clone, FromRow)]
pub struct CampaignDbModel {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: String,
    /// JSON array of storage keys
    pub generated_images: String,
    pub prompt: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CampaignDbModel {
    pub fn into_campaign(self) -> Result<Campaign> {
        let status = CampaignStatus::from_str(&self.status)
            .map_err(|_| Error::Other(format!("unknown campaign status '{}'", self.status)))?;
        Ok(Campaign {
            generated_images: serde_json::from_str(&self.generated_images)?,
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            status,
            prompt: self.prompt,
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
        })
    }
}
