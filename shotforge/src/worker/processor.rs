//! Processor contract.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::Result;
use crate::queue::{Job, JobId, JobPayload, JobStore, QueueName};

/// Business logic for the job kinds of one queue.
///
/// Returning `Err` hands the job back to the retry policy; errors for which
/// [`crate::Error::is_permanent`] holds skip the remaining attempts.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn queue(&self) -> QueueName;

    async fn process(&self, ctx: &JobContext, payload: JobPayload) -> Result<Option<Value>>;

    /// Called once a job of this queue is dead-lettered, whatever ended its last
    /// attempt: a returned error, the job timeout, or a lease that expired after
    /// its worker died. `ctx.attempt` is the number of attempts made.
    async fn on_dead_letter(&self, _ctx: &JobContext, _payload: &JobPayload) -> Result<()> {
        Ok(())
    }
}

/// Writes progress for the leased job. Failures are logged and otherwise ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    target: Option<(Arc<dyn JobStore>, String)>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId, token: String) -> Self {
        Self {
            target: Some((store, token)),
            job_id,
        }
    }

    /// A reporter that drops every update.
    pub fn detached(job_id: impl Into<JobId>) -> Self {
        Self {
            target: None,
            job_id: job_id.into(),
        }
    }

    pub async fn report(&self, percent: u8) {
        let Some((store, token)) = &self.target else {
            return;
        };
        if let Err(e) = store
            .update_progress(&self.job_id, token, percent.min(100))
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "Failed to record job progress");
        }
    }
}

/// What a processor knows about the job it is running.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue: QueueName,
    pub kind: String,
    /// 1-based number of this run.
    pub attempt: u32,
    pub max_attempts: u32,
    pub progress: ProgressReporter,
}

impl JobContext {
    /// Context for running a processor outside a worker.
    pub fn detached(queue: QueueName, kind: impl Into<String>) -> Self {
        let job_id = format!("detached-{}", uuid::Uuid::new_v4());
        Self {
            progress: ProgressReporter::detached(job_id.clone()),
            job_id,
            queue,
            kind: kind.into(),
            attempt: 1,
            max_attempts: 1,
        }
    }

    /// Context for a job the store has already settled.
    pub fn settled(job: &Job) -> Self {
        Self {
            progress: ProgressReporter::detached(job.id.clone()),
            job_id: job.id.clone(),
            queue: job.queue,
            kind: job.kind.clone(),
            attempt: job.attempts_made,
            max_attempts: job.max_attempts,
        }
    }

    /// True when a failure of this run will dead-letter the job.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
