//! SQLite-backed durable job store.
//!
//! Every mutation loads the affected rows inside one `BEGIN IMMEDIATE`
//! transaction on the write pool, applies the shared [`Job`] transition in
//! Rust, and writes the row back. The immediate lock makes lease, ack and nack
//! atomic across every process sharing the database file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::{debug, warn};

use super::job::{Job, JobCounts, JobFailure, JobId, JobState, Lease, NackOutcome, NewJob};
use super::payload::QueueName;
use super::schedule::{RecurringSchedule, RecurringSpec};
use super::store::JobStore;
use crate::database::models::{JobDbModel, RecurringScheduleDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, WritePool, begin_immediate};
use crate::{Error, Result};

const JOB_COLUMNS: &str = "id, queue, kind, payload, priority, state, attempts_made, max_attempts, \
     backoff_base_ms, backoff_max_ms, keep_completed, keep_failed, delay_until, lease_token, \
     worker_id, lease_expires_at, progress, result, failed_reason, schedule_id, created_at, \
     updated_at, finished_at";

const SCHEDULE_COLUMNS: &str =
    "id, queue, kind, pattern, payload, options, next_fire_at, created_at, updated_at";

/// Durable job store over the `jobs` and `recurring_schedules` tables.
pub struct SqliteJobStore {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqliteJobStore {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }

    async fn enqueue_once(&self, job: &NewJob) -> Result<JobId> {
        let mut tx = begin_immediate(&self.write_pool).await?;
        let job = job.clone().into_job(Utc::now());
        if !insert_job(&mut tx, &job).await? {
            let owner: Option<String> = sqlx::query_scalar("SELECT queue FROM jobs WHERE id = ?")
                .bind(&job.id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(owner) = owner.filter(|owner| owner != job.queue.as_str()) {
                tx.rollback().await?;
                return Err(Error::validation(format!(
                    "job id {} is already used by queue {}",
                    job.id, owner
                )));
            }
            debug!(job_id = %job.id, queue = %job.queue, "Job already exists, enqueue skipped");
        }
        tx.commit().await?;
        Ok(job.id)
    }

    async fn reclaim_once(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut tx = begin_immediate(&self.write_pool).await?;
        let expired = sqlx::query_as::<_, JobDbModel>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE queue = ? AND state = 'active' AND lease_expires_at <= ?"
        ))
        .bind(queue.as_str())
        .bind(now.timestamp_millis())
        .fetch_all(&mut *tx)
        .await?;

        let mut dead_lettered = Vec::new();
        for row in expired {
            let mut job = row.into_job()?;
            let outcome = job.expire_lease(now)?;
            warn!(job_id = %job.id, queue = %queue, ?outcome, "Reclaimed job with expired lease");
            update_job(&mut tx, &job).await?;
            trim_retention(&mut tx, &job).await?;
            if matches!(outcome, NackOutcome::DeadLettered { .. }) {
                dead_lettered.push(job);
            }
        }
        tx.commit().await?;
        Ok(dead_lettered)
    }

    async fn lease_once(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease_for: Duration,
    ) -> Result<Option<Lease>> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let mut tx = begin_immediate(&self.write_pool).await?;

        sqlx::query(
            "UPDATE jobs SET state = 'waiting', updated_at = ?
             WHERE queue = ? AND state = 'delayed' AND delay_until <= ?",
        )
        .bind(now_ms)
        .bind(queue.as_str())
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        let candidate = sqlx::query_as::<_, JobDbModel>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE queue = ? AND state = 'waiting'
             ORDER BY priority, COALESCE(delay_until, created_at), created_at, rowid
             LIMIT 1"
        ))
        .bind(queue.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut job = row.into_job()?;
        let lease = job.begin_lease(worker_id, lease_for, now)?;
        update_job(&mut tx, &job).await?;
        tx.commit().await?;

        debug!(job_id = %job.id, queue = %queue, worker = worker_id, "Leased job");
        Ok(Some(lease))
    }

    /// Load a job inside a write transaction, apply `f`, write it back.
    async fn mutate<T, F>(&self, job_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> Result<T>,
    {
        let now = Utc::now();
        let mut tx = begin_immediate(&self.write_pool).await?;
        let Some(mut job) = load_job(&mut tx, job_id).await? else {
            tx.rollback().await?;
            return Err(Error::lease_lost(job_id));
        };
        let value = match f(&mut job, now) {
            Ok(value) => value,
            Err(err) => {
                tx.rollback().await?;
                return Err(err);
            }
        };
        update_job(&mut tx, &job).await?;
        trim_retention(&mut tx, &job).await?;
        tx.commit().await?;
        Ok(value)
    }

    async fn retry_failed_once(&self, queue: QueueName, job_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut tx = begin_immediate(&self.write_pool).await?;
        let mut job = match load_job(&mut tx, job_id).await? {
            Some(job) if job.queue == queue => job,
            _ => return Err(Error::not_found("Job", job_id)),
        };
        job.requeue_failed(now)?;
        update_job(&mut tx, &job).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn register_recurring_once(&self, spec: RecurringSpec) -> Result<RecurringSchedule> {
        let now = Utc::now();
        let mut tx = begin_immediate(&self.write_pool).await?;

        let existing = sqlx::query_as::<_, RecurringScheduleDbModel>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM recurring_schedules WHERE id = ?"
        ))
        .bind(spec.schedule_id())
        .fetch_optional(&mut *tx)
        .await?;

        let schedule = match existing {
            Some(row) => {
                let schedule = RecurringSchedule {
                    payload: spec.payload,
                    options: spec.options,
                    updated_at: now,
                    ..row.into_schedule()?
                };
                let row = RecurringScheduleDbModel::from_schedule(&schedule)?;
                sqlx::query(
                    "UPDATE recurring_schedules SET payload = ?, options = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&row.payload)
                .bind(&row.options)
                .bind(row.updated_at)
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
                schedule
            }
            None => {
                let schedule = spec.into_schedule(now)?;
                let row = RecurringScheduleDbModel::from_schedule(&schedule)?;
                sqlx::query(&format!(
                    "INSERT INTO recurring_schedules ({SCHEDULE_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ))
                .bind(&row.id)
                .bind(&row.queue)
                .bind(&row.kind)
                .bind(&row.pattern)
                .bind(&row.payload)
                .bind(&row.options)
                .bind(row.next_fire_at)
                .bind(row.created_at)
                .bind(row.updated_at)
                .execute(&mut *tx)
                .await?;
                schedule
            }
        };

        let firing = schedule.pending_firing().into_job(now);
        if !insert_job(&mut tx, &firing).await? {
            refresh_pending_firing(&mut tx, &firing).await?;
        }
        tx.commit().await?;
        Ok(schedule)
    }

    async fn materialize_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = begin_immediate(&self.write_pool).await?;
        let due = sqlx::query_as::<_, RecurringScheduleDbModel>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM recurring_schedules WHERE next_fire_at <= ?"
        ))
        .bind(now.timestamp_millis())
        .fetch_all(&mut *tx)
        .await?;

        let mut created = 0;
        for row in due {
            let mut schedule = row.into_schedule()?;
            if !schedule.advance(now)? {
                warn!(schedule = %schedule.id, "Recurring schedule has no future fire time");
                continue;
            }
            sqlx::query(
                "UPDATE recurring_schedules SET next_fire_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(schedule.next_fire_at.timestamp_millis())
            .bind(schedule.updated_at.timestamp_millis())
            .bind(&schedule.id)
            .execute(&mut *tx)
            .await?;
            if insert_job(&mut tx, &schedule.pending_firing().into_job(now)).await? {
                created += 1;
            }
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn purge_once(&self, older_than: DateTime<Utc>, batch: u32) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id IN (
                SELECT id FROM jobs
                WHERE state IN ('completed', 'failed') AND finished_at < ?
                LIMIT ?
             )",
        )
        .bind(older_than.timestamp_millis())
        .bind(batch as i64)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn load_job(conn: &mut SqliteConnection, job_id: &str) -> Result<Option<Job>> {
    let row = sqlx::query_as::<_, JobDbModel>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
    ))
    .bind(job_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(JobDbModel::into_job).transpose()
}

/// `INSERT OR IGNORE`; returns false if the id was already taken.
async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<bool> {
    let row = JobDbModel::from_job(job)?;
    let result = sqlx::query(&format!(
        "INSERT OR IGNORE INTO jobs ({JOB_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&row.id)
    .bind(&row.queue)
    .bind(&row.kind)
    .bind(&row.payload)
    .bind(row.priority)
    .bind(&row.state)
    .bind(row.attempts_made)
    .bind(row.max_attempts)
    .bind(row.backoff_base_ms)
    .bind(row.backoff_max_ms)
    .bind(row.keep_completed)
    .bind(row.keep_failed)
    .bind(row.delay_until)
    .bind(&row.lease_token)
    .bind(&row.worker_id)
    .bind(row.lease_expires_at)
    .bind(row.progress)
    .bind(&row.result)
    .bind(&row.failed_reason)
    .bind(&row.schedule_id)
    .bind(row.created_at)
    .bind(row.updated_at)
    .bind(row.finished_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn update_job(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let row = JobDbModel::from_job(job)?;
    sqlx::query(
        "UPDATE jobs SET state = ?, priority = ?, attempts_made = ?, max_attempts = ?,
            delay_until = ?, lease_token = ?, worker_id = ?, lease_expires_at = ?,
            progress = ?, result = ?, failed_reason = ?, updated_at = ?, finished_at = ?
         WHERE id = ?",
    )
    .bind(&row.state)
    .bind(row.priority)
    .bind(row.attempts_made)
    .bind(row.max_attempts)
    .bind(row.delay_until)
    .bind(&row.lease_token)
    .bind(&row.worker_id)
    .bind(row.lease_expires_at)
    .bind(row.progress)
    .bind(&row.result)
    .bind(&row.failed_reason)
    .bind(row.updated_at)
    .bind(row.finished_at)
    .bind(&row.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Carry a re-registered schedule's payload and options over to its firing,
/// unless that firing has already started.
async fn refresh_pending_firing(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let row = JobDbModel::from_job(job)?;
    let result = sqlx::query(
        "UPDATE jobs SET payload = ?, priority = ?, max_attempts = ?, backoff_base_ms = ?,
            backoff_max_ms = ?, keep_completed = ?, keep_failed = ?, updated_at = ?
         WHERE id = ? AND queue = ? AND state = 'delayed'",
    )
    .bind(&row.payload)
    .bind(row.priority)
    .bind(row.max_attempts)
    .bind(row.backoff_base_ms)
    .bind(row.backoff_max_ms)
    .bind(row.keep_completed)
    .bind(row.keep_failed)
    .bind(row.updated_at)
    .bind(&row.id)
    .bind(&row.queue)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        debug!(job_id = %job.id, queue = %job.queue, "Refreshed pending recurring firing");
    }
    Ok(())
}

/// Evict the oldest finished jobs beyond the retention limit of `job`'s terminal state.
async fn trim_retention(conn: &mut SqliteConnection, job: &Job) -> Result<u64> {
    let keep = match job.state {
        JobState::Completed => job.retention.keep_completed,
        JobState::Failed => job.retention.keep_failed,
        _ => return Ok(0),
    };
    let state = job.state.to_string();
    let result = sqlx::query(
        "DELETE FROM jobs
         WHERE queue = ? AND state = ? AND id NOT IN (
             SELECT id FROM jobs WHERE queue = ? AND state = ?
             ORDER BY finished_at DESC, rowid DESC
             LIMIT ?
         )",
    )
    .bind(job.queue.as_str())
    .bind(&state)
    .bind(job.queue.as_str())
    .bind(&state)
    .bind(keep as i64)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        debug!(queue = %job.queue, state = %state, evicted = result.rows_affected(), "Trimmed finished jobs");
    }
    Ok(result.rows_affected())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        retry_on_sqlite_busy("enqueue", || self.enqueue_once(&job)).await
    }

    async fn reclaim_expired(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Vec<Job>> {
        retry_on_sqlite_busy("reclaim_expired", || self.reclaim_once(queue, now)).await
    }

    async fn lease(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease_for: Duration,
    ) -> Result<Option<Lease>> {
        retry_on_sqlite_busy("lease", || self.lease_once(queue, worker_id, lease_for)).await
    }

    async fn extend_lease(
        &self,
        job_id: &str,
        token: &str,
        lease_for: Duration,
    ) -> Result<DateTime<Utc>> {
        retry_on_sqlite_busy("extend_lease", || {
            self.mutate(job_id, |job, now| job.extend_lease(token, lease_for, now))
        })
        .await
    }

    async fn update_progress(&self, job_id: &str, token: &str, progress: u8) -> Result<()> {
        retry_on_sqlite_busy("update_progress", || {
            self.mutate(job_id, |job, now| job.set_progress(token, progress, now))
        })
        .await
    }

    async fn ack(
        &self,
        job_id: &str,
        token: &str,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        retry_on_sqlite_busy("ack", || {
            let result = result.clone();
            self.mutate(job_id, move |job, now| job.complete(token, result, now))
        })
        .await
    }

    async fn nack(&self, job_id: &str, token: &str, failure: &JobFailure) -> Result<NackOutcome> {
        retry_on_sqlite_busy("nack", || {
            self.mutate(job_id, |job, now| job.fail_attempt(token, failure, now))
        })
        .await
    }

    async fn get_job(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobDbModel>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ? AND queue = ?"
        ))
        .bind(job_id)
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobDbModel::into_job).transpose()
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs WHERE queue = ? GROUP BY state")
                .bind(queue.as_str())
                .fetch_all(&self.pool)
                .await?;
        let mut counts = JobCounts::default();
        for (state, n) in rows {
            match state.parse::<JobState>() {
                Ok(state) => counts.add(state, n.max(0) as u64),
                Err(_) => warn!(queue = %queue, state = %state, "Ignoring unknown job state"),
            }
        }
        Ok(counts)
    }

    async fn list_failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobDbModel>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE queue = ? AND state = 'failed'
             ORDER BY finished_at DESC, rowid DESC
             LIMIT ?"
        ))
        .bind(queue.as_str())
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobDbModel::into_job).collect()
    }

    async fn retry_failed(&self, queue: QueueName, job_id: &str) -> Result<()> {
        retry_on_sqlite_busy("retry_failed", || self.retry_failed_once(queue, job_id)).await
    }

    async fn register_recurring(&self, spec: RecurringSpec) -> Result<RecurringSchedule> {
        retry_on_sqlite_busy("register_recurring", || {
            self.register_recurring_once(spec.clone())
        })
        .await
    }

    async fn list_recurring(&self, queue: QueueName) -> Result<Vec<RecurringSchedule>> {
        let rows = sqlx::query_as::<_, RecurringScheduleDbModel>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM recurring_schedules WHERE queue = ? ORDER BY id"
        ))
        .bind(queue.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(RecurringScheduleDbModel::into_schedule)
            .collect()
    }

    async fn remove_recurring(&self, schedule_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recurring_schedules WHERE id = ?")
            .bind(schedule_id)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn materialize_recurring(&self, now: DateTime<Utc>) -> Result<usize> {
        retry_on_sqlite_busy("materialize_recurring", || self.materialize_once(now)).await
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>, batch: u32) -> Result<u64> {
        retry_on_sqlite_busy("purge_finished", || self.purge_once(older_than, batch)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool, init_write_pool, run_migrations};
    use crate::queue::job::JobOptions;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteJobStore) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("jobs.db").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let write_pool = init_write_pool(&url).await.unwrap();
        (dir, SqliteJobStore::new(pool, write_pool))
    }

    fn welcome(id: &str) -> NewJob {
        NewJob {
            id: id.to_string(),
            queue: QueueName::Email,
            kind: "welcome".to_string(),
            payload: json!({"type": "welcome", "to": "a@b.co"}),
            options: JobOptions::for_queue(QueueName::Email),
            delay_until: None,
            schedule_id: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_lease_ack() {
        let (_dir, store) = setup().await;
        store.enqueue(welcome("a")).await.unwrap();
        store.enqueue(welcome("a")).await.unwrap();
        assert_eq!(store.counts(QueueName::Email).await.unwrap().waiting, 1);

        let lease = store
            .lease(QueueName::Email, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.job.state, JobState::Active);
        store.update_progress("a", &lease.token, 50).await.unwrap();
        store
            .ack("a", &lease.token, Some(json!({"sent": true})))
            .await
            .unwrap();

        let job = store.get_job(QueueName::Email, "a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(json!({"sent": true})));
        assert_eq!(job.progress, Some(50));
        assert!(
            store
                .lease(QueueName::Email, "w1", Duration::from_secs(30))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_nack_delays_then_dead_letters() {
        let (_dir, store) = setup().await;
        let mut job = welcome("a");
        job.options.attempts = 2;
        job.options.backoff.base_delay_ms = 1;
        store.enqueue(job).await.unwrap();

        let lease = store
            .lease(QueueName::Email, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let outcome = store
            .nack("a", &lease.token, &JobFailure::transient("smtp 503"))
            .await
            .unwrap();
        assert!(matches!(outcome, NackOutcome::Retrying { attempt: 1, .. }));
        assert_eq!(store.counts(QueueName::Email).await.unwrap().delayed, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let lease = store
            .lease(QueueName::Email, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let outcome = store
            .nack("a", &lease.token, &JobFailure::transient("smtp 503"))
            .await
            .unwrap();
        assert_eq!(outcome, NackOutcome::DeadLettered { attempts: 2 });

        let failed = store.list_failed(QueueName::Email, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failed_reason.as_deref(), Some("smtp 503"));

        store.retry_failed(QueueName::Email, "a").await.unwrap();
        let job = store.get_job(QueueName::Email, "a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 0);
    }

    #[tokio::test]
    async fn test_stale_token_does_not_mutate() {
        let (_dir, store) = setup().await;
        store.enqueue(welcome("a")).await.unwrap();
        let lease = store
            .lease(QueueName::Email, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let err = store.ack("a", "not-the-token", None).await.unwrap_err();
        assert!(matches!(err, Error::LeaseLost { .. }));
        let err = store.ack("missing", &lease.token, None).await.unwrap_err();
        assert!(matches!(err, Error::LeaseLost { .. }));

        let job = store.get_job(QueueName::Email, "a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts_made, 0);
    }

    #[tokio::test]
    async fn test_purge_finished_respects_cutoff() {
        let (_dir, store) = setup().await;
        store.enqueue(welcome("a")).await.unwrap();
        let lease = store
            .lease(QueueName::Email, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        store.ack("a", &lease.token, None).await.unwrap();

        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.purge_finished(past, 100).await.unwrap(), 0);
        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.purge_finished(future, 100).await.unwrap(), 1);
        assert!(store.get_job(QueueName::Email, "a").await.unwrap().is_none());
    }
}
