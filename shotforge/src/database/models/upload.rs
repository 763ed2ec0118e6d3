use sqlx::FromRow;
use std::str::FromStr;

use crate::database::time::ms_to_datetime;
use crate::domain::{ProductUpload, UploadStatus};
use crate::{Error, Result};

/// Row of the `product_uploads` table.
#[derive(Debug, Clone, FromRow)]
pub struct ProductUploadDbModel {
    pub id: String,
    pub user_id: String,
    pub storage_key: String,
    pub campaign_id: Option<String>,
    pub status: String,
    pub created_at: i64,
}

impl ProductUploadDbModel {
    pub fn into_upload(self) -> Result<ProductUpload> {
        let status = UploadStatus::from_str(&self.status)
            .map_err(|_| Error::Other(format!("unknown upload status '{}'", self.status)))?;
        Ok(ProductUpload {
            id: self.id,
            user_id: self.user_id,
            storage_key: self.storage_key,
            campaign_id: self.campaign_id,
            status,
            created_at: ms_to_datetime(self.created_at),
        })
    }
}
