//! Producer-facing queue clients.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use super::job::{
    EnqueueOptions, Job, JobCounts, JobId, JobOptions, JobStatusReport, NewJob, add_duration,
};
use super::payload::{JobPayload, QueueName};
use super::schedule::{CronPattern, RecurringSchedule, RecurringSpec};
use super::store::JobStore;
use crate::{Error, Result};

/// Client for one queue. Cheap to clone; all clones share the store and the wake-up signal.
#[derive(Clone)]
pub struct QueueHandle {
    queue: QueueName,
    store: Arc<dyn JobStore>,
    notifier: Arc<Notify>,
    defaults: JobOptions,
}

impl QueueHandle {
    pub fn new(queue: QueueName, store: Arc<dyn JobStore>) -> Self {
        Self {
            queue,
            store,
            notifier: Arc::new(Notify::new()),
            defaults: JobOptions::for_queue(queue),
        }
    }

    pub fn with_defaults(mut self, defaults: JobOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Signalled after every local enqueue so idle workers lease without waiting for a poll.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notifier.clone()
    }

    pub fn defaults(&self) -> &JobOptions {
        &self.defaults
    }

    /// Validate and persist a job. Returns as soon as the job is stored.
    pub async fn enqueue(&self, payload: &JobPayload, options: EnqueueOptions) -> Result<JobId> {
        if payload.queue() != self.queue {
            return Err(Error::validation(format!(
                "{} job cannot be enqueued on queue {}",
                payload.kind(),
                self.queue
            )));
        }
        payload.validate()?;
        self.insert(payload.kind(), payload.to_value()?, options)
            .await
    }

    /// Enqueue an untyped payload; it must decode as a known kind of this queue.
    pub async fn enqueue_raw(
        &self,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId> {
        let decoded = JobPayload::decode(self.queue, kind, &payload)?;
        self.insert(decoded.kind(), decoded.to_value()?, options)
            .await
    }

    async fn insert(
        &self,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId> {
        let resolved = options.resolve(&self.defaults)?;
        let now = Utc::now();
        let delay_until = (resolved.delay_ms > 0).then(|| {
            add_duration(now, std::time::Duration::from_millis(resolved.delay_ms))
        });
        let id = options
            .job_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let job_id = self
            .store
            .enqueue(NewJob {
                id,
                queue: self.queue,
                kind: kind.to_string(),
                payload,
                options: resolved,
                delay_until,
                schedule_id: None,
            })
            .await?;

        debug!(job_id = %job_id, queue = %self.queue, kind, "Enqueued job");
        self.notifier.notify_one();
        Ok(job_id)
    }

    /// Idempotently register a repeating producer for `payload`.
    pub async fn register_recurring(
        &self,
        payload: &JobPayload,
        pattern: &str,
        options: EnqueueOptions,
    ) -> Result<RecurringSchedule> {
        if payload.queue() != self.queue {
            return Err(Error::validation(format!(
                "{} schedule cannot be registered on queue {}",
                payload.kind(),
                self.queue
            )));
        }
        payload.validate()?;
        self.store
            .register_recurring(RecurringSpec {
                queue: self.queue,
                kind: payload.kind().to_string(),
                pattern: CronPattern::parse(pattern)?,
                payload: payload.to_value()?,
                options: options.resolve(&self.defaults)?,
            })
            .await
    }

    pub async fn list_recurring(&self) -> Result<Vec<RecurringSchedule>> {
        self.store.list_recurring(self.queue).await
    }

    pub async fn remove_recurring(&self, schedule_id: &str) -> Result<bool> {
        self.store.remove_recurring(schedule_id).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.get_job(self.queue, job_id).await
    }

    /// Status of one job; unknown or evicted ids report `not_found`.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusReport> {
        let job = self.store.get_job(self.queue, job_id).await?;
        Ok(JobStatusReport::from_job(job_id, job.as_ref()))
    }

    pub async fn get_queue_stats(&self) -> Result<JobCounts> {
        self.store.counts(self.queue).await
    }

    pub async fn list_failed(&self, limit: usize) -> Result<Vec<Job>> {
        self.store.list_failed(self.queue, limit).await
    }

    pub async fn retry_failed(&self, job_id: &str) -> Result<()> {
        self.store.retry_failed(self.queue, job_id).await?;
        self.notifier.notify_one();
        Ok(())
    }
}

/// One handle per queue, sharing a single store.
#[derive(Clone)]
pub struct Queues {
    store: Arc<dyn JobStore>,
    handles: Arc<HashMap<QueueName, QueueHandle>>,
}

impl Queues {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        let handles = QueueName::ALL
            .iter()
            .map(|&queue| (queue, QueueHandle::new(queue, store.clone())))
            .collect();
        Self {
            store,
            handles: Arc::new(handles),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn get(&self, queue: QueueName) -> &QueueHandle {
        // Every QueueName is inserted in `new`.
        &self.handles[&queue]
    }

    /// Enqueue on whichever queue owns `payload`.
    pub async fn enqueue(&self, payload: &JobPayload, options: EnqueueOptions) -> Result<JobId> {
        self.get(payload.queue()).enqueue(payload, options).await
    }
}
