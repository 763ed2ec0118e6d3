//! Campaign repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::CampaignDbModel;
use crate::database::time::now_ms;
use crate::domain::{Campaign, CampaignStatus};
use crate::{Error, Result};

/// Campaign status updates driven by image-generation outcomes.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>>;
    async fn mark_processing(&self, id: &str) -> Result<()>;
    /// Store the generated images and prompt and flip the status to completed, in one write.
    async fn complete_campaign(&self, id: &str, images: &[String], prompt: &str) -> Result<()>;
    async fn mark_failed(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of CampaignRepository.
pub struct SqlxCampaignRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxCampaignRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }

    async fn set_status(&self, id: &str, status: CampaignStatus) -> Result<()> {
        let result = sqlx::query("UPDATE campaigns SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(now_ms())
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Campaign", id));
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignRepository for SqlxCampaignRepository {
    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignDbModel>(
            "SELECT id, user_id, title, status, generated_images, prompt, created_at, updated_at
             FROM campaigns WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CampaignDbModel::into_campaign).transpose()
    }

    async fn mark_processing(&self, id: &str) -> Result<()> {
        self.set_status(id, CampaignStatus::Processing).await
    }

    async fn complete_campaign(&self, id: &str, images: &[String], prompt: &str) -> Result<()> {
        let images = serde_json::to_string(images)?;
        let result = sqlx::query(
            "UPDATE campaigns SET status = ?, generated_images = ?, prompt = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(CampaignStatus::Completed.to_string())
        .bind(images)
        .bind(prompt)
        .bind(now_ms())
        .bind(id)
        .execute(&self.write_pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Campaign", id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str) -> Result<()> {
        self.set_status(id, CampaignStatus::Failed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlxCampaignRepository) {
        let (dir, pool) = test_pool().await;
        sqlx::query("INSERT INTO users (id, email, credits, created_at) VALUES ('u1', 'a@b.co', 0, 0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO campaigns (id, user_id, title, created_at, updated_at)
             VALUES ('c1', 'u1', 'Spring', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        (dir, SqlxCampaignRepository::new(pool.clone(), pool))
    }

    #[tokio::test]
    async fn test_complete_writes_images_and_prompt() {
        let (_dir, repo) = setup().await;
        repo.mark_processing("c1").await.unwrap();
        let images = vec!["generated/c1/1.png".to_string(), "generated/c1/2.png".to_string()];
        repo.complete_campaign("c1", &images, "a bottle on marble")
            .await
            .unwrap();

        let campaign = repo.get_campaign("c1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.generated_images, images);
        assert_eq!(campaign.prompt.as_deref(), Some("a bottle on marble"));
    }

    #[tokio::test]
    async fn test_unknown_campaign() {
        let (_dir, repo) = setup().await;
        assert!(repo.get_campaign("missing").await.unwrap().is_none());
        assert!(matches!(
            repo.mark_failed("missing").await,
            Err(Error::NotFound { .. })
        ));
    }
}
