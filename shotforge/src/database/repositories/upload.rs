//! Product upload repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::ProductUploadDbModel;
use crate::database::time::now_ms;
use crate::domain::{ProductUpload, UploadStatus};
use crate::{Error, Result};

#[async_trait]
pub trait UploadRepository: Send + Sync {
    async fn get_upload(&self, id: &str) -> Result<Option<ProductUpload>>;
    /// Uploaded records with no campaign, created before `cutoff`, oldest first.
    async fn find_orphaned(&self, cutoff: DateTime<Utc>) -> Result<Vec<ProductUpload>>;
    async fn mark_deleted(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of UploadRepository.
pub struct SqlxUploadRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxUploadRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl UploadRepository for SqlxUploadRepository {
    async fn get_upload(&self, id: &str) -> Result<Option<ProductUpload>> {
        let row = sqlx::query_as::<_, ProductUploadDbModel>(
            "SELECT id, user_id, storage_key, campaign_id, status, created_at
             FROM product_uploads WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ProductUploadDbModel::into_upload).transpose()
    }

    async fn find_orphaned(&self, cutoff: DateTime<Utc>) -> Result<Vec<ProductUpload>> {
        let rows = sqlx::query_as::<_, ProductUploadDbModel>(
            "SELECT id, user_id, storage_key, campaign_id, status, created_at
             FROM product_uploads
             WHERE status = ? AND campaign_id IS NULL AND created_at < ?
             ORDER BY created_at, id",
        )
        .bind(UploadStatus::Uploaded.to_string())
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(ProductUploadDbModel::into_upload)
            .collect()
    }

    async fn mark_deleted(&self, id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE product_uploads SET status = ?, deleted_at = ? WHERE id = ?")
                .bind(UploadStatus::Deleted.to_string())
                .bind(now_ms())
                .bind(id)
                .execute(&self.write_pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("ProductUpload", id));
        }
        Ok(())
    }
}
