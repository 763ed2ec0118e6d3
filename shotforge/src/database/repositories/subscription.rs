//! Subscription and credit repository.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::database::models::ActiveSubscriptionDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Credit transaction kind written by the monthly renewal.
pub const MONTHLY_RENEWAL_KIND: &str = "monthly_renewal";

/// Result of a monthly top-up attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopupOutcome {
    Applied { new_balance: i64 },
    AlreadyApplied,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<ActiveSubscriptionDbModel>>;
    async fn has_monthly_topup(&self, user_id: &str, granted_on: NaiveDate) -> Result<bool>;
    /// Add `credits` to the user and record the audit entry, atomically.
    /// At most one monthly top-up per user per `granted_on` date is ever applied.
    async fn apply_monthly_topup(
        &self,
        user_id: &str,
        credits: u32,
        granted_on: NaiveDate,
    ) -> Result<TopupOutcome>;
}

/// SQLx implementation of SubscriptionRepository.
pub struct SqlxSubscriptionRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn list_active(&self) -> Result<Vec<ActiveSubscriptionDbModel>> {
        let rows = sqlx::query_as::<_, ActiveSubscriptionDbModel>(
            "SELECT s.id AS subscription_id, s.user_id, u.email, u.name, s.plan
             FROM subscriptions s
             JOIN users u ON u.id = s.user_id
             WHERE s.status = 'active'
             ORDER BY s.created_at, s.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn has_monthly_topup(&self, user_id: &str, granted_on: NaiveDate) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM credit_transactions
             WHERE user_id = ? AND granted_on = ? AND kind = ?
             LIMIT 1",
        )
        .bind(user_id)
        .bind(granted_on.to_string())
        .bind(MONTHLY_RENEWAL_KIND)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn apply_monthly_topup(
        &self,
        user_id: &str,
        credits: u32,
        granted_on: NaiveDate,
    ) -> Result<TopupOutcome> {
        let mut tx = self.write_pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM credit_transactions
             WHERE user_id = ? AND granted_on = ? AND kind = ?
             LIMIT 1",
        )
        .bind(user_id)
        .bind(granted_on.to_string())
        .bind(MONTHLY_RENEWAL_KIND)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return Ok(TopupOutcome::AlreadyApplied);
        }

        let inserted = sqlx::query(
            "INSERT INTO credit_transactions (id, user_id, amount, kind, description, granted_on, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(credits as i64)
        .bind(MONTHLY_RENEWAL_KIND)
        .bind(format!("Monthly subscription renewal for {}", granted_on.format("%B %Y")))
        .bind(granted_on.to_string())
        .bind(now_ms())
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                return Ok(TopupOutcome::AlreadyApplied);
            }
            Err(err) => return Err(err.into()),
        }

        let balance: Option<(i64,)> =
            sqlx::query_as("UPDATE users SET credits = credits + ? WHERE id = ? RETURNING credits")
                .bind(credits as i64)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((new_balance,)) = balance else {
            tx.rollback().await?;
            return Err(Error::not_found("User", user_id));
        };

        tx.commit().await?;
        Ok(TopupOutcome::Applied { new_balance })
    }
}
