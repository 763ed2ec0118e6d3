//! Job entity, options and the state machine shared by every store.
//!
//! ```text
//! waiting ──lease──▶ active ──ack──▶ completed
//!    ▲                 │
//!    │                 ├──nack (attempts left)──▶ delayed ──due──▶ waiting
//!    │                 ├──nack (exhausted/permanent)──▶ failed
//!    └──lease expired──┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::payload::QueueName;
use crate::{Error, Result};

pub type JobId = String;

/// Persisted job state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible for lease.
    Waiting,
    /// Eligible once `delay_until` has passed.
    Delayed,
    /// Leased by exactly one worker.
    Active,
    Completed,
    /// Dead-lettered: no further attempts.
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Exponential backoff: the delay after failed attempt `k` is `base * 2^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60 * 60 * 1000
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base: Duration) -> Self {
        Self {
            base_delay_ms: base.as_millis().min(u64::MAX as u128) as u64,
            ..Default::default()
        }
    }

    /// Delay before the next run, given how many attempts have been made so far.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(32);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// How many finished jobs a queue keeps; the oldest are evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub keep_completed: u32,
    pub keep_failed: u32,
}

impl Retention {
    pub fn new(keep_completed: u32, keep_failed: u32) -> Self {
        Self {
            keep_completed,
            keep_failed,
        }
    }
}

/// Fully resolved options for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Lower values are leased first.
    pub priority: i32,
    pub delay_ms: u64,
    pub attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: Retention,
}

impl JobOptions {
    /// Queue defaults.
    pub fn for_queue(queue: QueueName) -> Self {
        let (attempts, base, retention) = match queue {
            QueueName::ImageGeneration => (3, Duration::from_secs(2), Retention::new(100, 50)),
            QueueName::Email | QueueName::DiscordNotifications => {
                (3, Duration::from_secs(5), Retention::new(100, 100))
            }
            QueueName::Cleanup => (2, Duration::from_secs(10), Retention::new(20, 20)),
            QueueName::SubscriptionRenewal => {
                (2, Duration::from_secs(60), Retention::new(30, 30))
            }
        };
        Self {
            priority: 0,
            delay_ms: 0,
            attempts,
            backoff: BackoffPolicy::exponential(base),
            retention,
        }
    }
}

/// Producer overrides, merged over the queue defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    pub priority: Option<i32>,
    pub delay: Option<Duration>,
    pub attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
    /// Caller-chosen id; enqueueing an id that already exists is a no-op.
    pub job_id: Option<String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn resolve(&self, defaults: &JobOptions) -> Result<JobOptions> {
        let attempts = self.attempts.unwrap_or(defaults.attempts);
        if attempts == 0 {
            return Err(Error::validation("attempts must be at least 1"));
        }
        Ok(JobOptions {
            priority: self.priority.unwrap_or(defaults.priority),
            delay_ms: self
                .delay
                .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
                .unwrap_or(defaults.delay_ms),
            attempts,
            backoff: self.backoff.unwrap_or(defaults.backoff),
            retention: defaults.retention,
        })
    }
}

/// A job about to be inserted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub queue: QueueName,
    pub kind: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
    /// Absolute eligibility time; `None` means immediately.
    pub delay_until: Option<DateTime<Utc>>,
    pub schedule_id: Option<String>,
}

impl NewJob {
    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        let state = match self.delay_until {
            Some(at) if at > now => JobState::Delayed,
            _ => JobState::Waiting,
        };
        Job {
            id: self.id,
            queue: self.queue,
            kind: self.kind,
            payload: self.payload,
            priority: self.options.priority,
            state,
            attempts_made: 0,
            max_attempts: self.options.attempts,
            backoff: self.options.backoff,
            retention: self.options.retention,
            delay_until: self.delay_until,
            lease_token: None,
            worker_id: None,
            lease_expires_at: None,
            progress: None,
            result: None,
            failed_reason: None,
            schedule_id: self.schedule_id,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: Retention,
    pub delay_until: Option<DateTime<Utc>>,
    pub lease_token: Option<String>,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    pub schedule_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Exclusive, time-bounded ownership of an active job.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: Job,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub reason: String,
    /// Skip remaining attempts.
    pub permanent: bool,
}

impl JobFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            permanent: false,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            permanent: true,
        }
    }
}

impl From<&Error> for JobFailure {
    fn from(err: &Error) -> Self {
        Self {
            reason: err.to_string(),
            permanent: err.is_permanent(),
        }
    }
}

/// What `nack` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Retrying { attempt: u32, delay: Duration },
    DeadLettered { attempts: u32 },
}

pub(crate) fn add_duration(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Job {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting => true,
            JobState::Delayed => self.delay_until.is_none_or(|at| at <= now),
            _ => false,
        }
    }

    /// Moment the job became (or becomes) eligible, used to order equal priorities.
    pub fn eligible_at(&self) -> DateTime<Utc> {
        self.delay_until.unwrap_or(self.created_at)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    fn transition_error(&self, to: JobState) -> Error {
        Error::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    fn clear_lease(&mut self) {
        self.lease_token = None;
        self.worker_id = None;
        self.lease_expires_at = None;
    }

    fn check_lease(&self, token: &str) -> Result<()> {
        if self.state == JobState::Active && self.lease_token.as_deref() == Some(token) {
            Ok(())
        } else {
            Err(Error::lease_lost(&self.id))
        }
    }

    pub fn begin_lease(
        &mut self,
        worker_id: &str,
        lease_for: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        if !self.is_eligible(now) {
            return Err(self.transition_error(JobState::Active));
        }
        let token = uuid::Uuid::new_v4().to_string();
        let expires_at = add_duration(now, lease_for);
        self.state = JobState::Active;
        self.lease_token = Some(token.clone());
        self.worker_id = Some(worker_id.to_string());
        self.lease_expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(Lease {
            job: self.clone(),
            token,
            expires_at,
        })
    }

    pub fn extend_lease(
        &mut self,
        token: &str,
        lease_for: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.check_lease(token)?;
        let expires_at = add_duration(now, lease_for);
        self.lease_expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(expires_at)
    }

    pub fn set_progress(&mut self, token: &str, progress: u8, now: DateTime<Utc>) -> Result<()> {
        self.check_lease(token)?;
        self.progress = Some(progress.min(100));
        self.updated_at = now;
        Ok(())
    }

    fn count_attempt(&mut self) {
        self.attempts_made = (self.attempts_made + 1).min(self.max_attempts);
    }

    pub fn complete(
        &mut self,
        token: &str,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check_lease(token)?;
        self.count_attempt();
        self.state = JobState::Completed;
        self.result = result;
        self.failed_reason = None;
        self.finished_at = Some(now);
        self.updated_at = now;
        self.clear_lease();
        Ok(())
    }

    fn settle_failure(
        &mut self,
        reason: String,
        permanent: bool,
        backoff: bool,
        now: DateTime<Utc>,
    ) -> NackOutcome {
        self.count_attempt();
        self.failed_reason = Some(reason);
        self.updated_at = now;
        self.clear_lease();

        if permanent || self.attempts_made >= self.max_attempts {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
            return NackOutcome::DeadLettered {
                attempts: self.attempts_made,
            };
        }

        let delay = if backoff {
            self.backoff.delay_for_attempt(self.attempts_made)
        } else {
            Duration::ZERO
        };
        if delay.is_zero() {
            self.state = JobState::Waiting;
            self.delay_until = None;
        } else {
            self.state = JobState::Delayed;
            self.delay_until = Some(add_duration(now, delay));
        }
        NackOutcome::Retrying {
            attempt: self.attempts_made,
            delay,
        }
    }

    pub fn fail_attempt(
        &mut self,
        token: &str,
        failure: &JobFailure,
        now: DateTime<Utc>,
    ) -> Result<NackOutcome> {
        self.check_lease(token)?;
        Ok(self.settle_failure(failure.reason.clone(), failure.permanent, true, now))
    }

    /// Reclaim a job whose worker stopped heartbeating. The lost run counts as an attempt.
    pub fn expire_lease(&mut self, now: DateTime<Utc>) -> Result<NackOutcome> {
        if !self.lease_expired(now) {
            return Err(self.transition_error(JobState::Waiting));
        }
        let reason = format!(
            "lease expired while held by {}",
            self.worker_id.as_deref().unwrap_or("unknown worker")
        );
        Ok(self.settle_failure(reason, false, false, now))
    }

    /// Put a dead-lettered job back in line with a fresh attempt budget.
    pub fn requeue_failed(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != JobState::Failed {
            return Err(self.transition_error(JobState::Waiting));
        }
        self.state = JobState::Waiting;
        self.attempts_made = 0;
        self.delay_until = None;
        self.progress = None;
        self.result = None;
        self.failed_reason = None;
        self.finished_at = None;
        self.updated_at = now;
        Ok(())
    }
}

/// Number of jobs per state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn add(&mut self, state: JobState, n: u64) {
        match state {
            JobState::Waiting => self.waiting += n,
            JobState::Delayed => self.delayed += n,
            JobState::Active => self.active += n,
            JobState::Completed => self.completed += n,
            JobState::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.waiting + self.delayed + self.active + self.completed + self.failed
    }
}

/// Status as reported to producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    NotFound,
}

impl From<JobState> for JobStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Waiting => Self::Waiting,
            JobState::Delayed => Self::Delayed,
            JobState::Active => Self::Active,
            JobState::Completed => Self::Completed,
            JobState::Failed => Self::Failed,
        }
    }
}

/// Producer-facing view of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl JobStatusReport {
    pub fn from_job(job_id: &str, job: Option<&Job>) -> Self {
        match job {
            Some(job) => Self {
                job_id: job.id.clone(),
                status: job.state.into(),
                progress: job.progress,
                result: job.result.clone(),
                failed_reason: job.failed_reason.clone(),
                attempts_made: job.attempts_made,
                max_attempts: job.max_attempts,
            },
            None => Self {
                job_id: job_id.to_string(),
                status: JobStatus::NotFound,
                progress: None,
                result: None,
                failed_reason: None,
                attempts_made: 0,
                max_attempts: 0,
            },
        }
    }
}
