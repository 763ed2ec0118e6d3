//! The durable job store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::job::{Job, JobCounts, JobFailure, JobId, Lease, NackOutcome, NewJob};
use super::payload::QueueName;
use super::schedule::{RecurringSchedule, RecurringSpec};
use crate::Result;

/// Shared broker holding every queue's jobs.
///
/// All cross-worker coordination goes through these operations. Implementations
/// must make `lease`, `ack`, `nack` and `materialize_recurring` atomic with
/// respect to concurrent callers, including callers in other processes when
/// the backing storage is shared.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job. If a job with the same id already exists in the same queue,
    /// nothing is written and its id is returned. Ids are unique across queues, so
    /// an id taken by another queue is a validation error.
    async fn enqueue(&self, job: NewJob) -> Result<JobId>;

    /// Settle every active job in `queue` whose lease expired, counting the lost
    /// run as an attempt. Returns the jobs this dead-lettered.
    async fn reclaim_expired(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Lease the best eligible job in `queue`. Expired leases are not reclaimed
    /// here; workers call [`JobStore::reclaim_expired`] first.
    async fn lease(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease_for: Duration,
    ) -> Result<Option<Lease>>;

    /// Heartbeat: push the lease expiry out by `lease_for`.
    async fn extend_lease(
        &self,
        job_id: &str,
        token: &str,
        lease_for: Duration,
    ) -> Result<DateTime<Utc>>;

    async fn update_progress(&self, job_id: &str, token: &str, progress: u8) -> Result<()>;

    /// `active -> completed`, then trim completed jobs to the retention limit.
    async fn ack(&self, job_id: &str, token: &str, result: Option<serde_json::Value>)
    -> Result<()>;

    /// Record a failed attempt: back off and retry, or dead-letter.
    async fn nack(&self, job_id: &str, token: &str, failure: &JobFailure) -> Result<NackOutcome>;

    async fn get_job(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>>;

    async fn counts(&self, queue: QueueName) -> Result<JobCounts>;

    /// Dead-lettered jobs, most recently failed first.
    async fn list_failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>>;

    /// Give a dead-lettered job a fresh attempt budget.
    async fn retry_failed(&self, queue: QueueName, job_id: &str) -> Result<()>;

    /// Upsert a schedule and make sure its pending firing exists.
    async fn register_recurring(&self, spec: RecurringSpec) -> Result<RecurringSchedule>;

    async fn list_recurring(&self, queue: QueueName) -> Result<Vec<RecurringSchedule>>;

    /// Returns false if no such schedule existed. Already-created firings are kept.
    async fn remove_recurring(&self, schedule_id: &str) -> Result<bool>;

    /// Advance every schedule whose pending firing is due and create the next one.
    async fn materialize_recurring(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Delete terminal jobs finished before `older_than`, at most `batch` per call.
    async fn purge_finished(&self, older_than: DateTime<Utc>, batch: u32) -> Result<u64>;
}
