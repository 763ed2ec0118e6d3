//! In-process job store.
//!
//! Every operation runs under one mutex, which makes lease/ack/nack atomic for
//! all workers sharing this instance. Used by tests and single-process setups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::job::{
    Job, JobCounts, JobFailure, JobId, JobState, Lease, NackOutcome, NewJob,
};
use super::payload::QueueName;
use super::schedule::{RecurringSchedule, RecurringSpec};
use super::store::JobStore;
use crate::{Error, Result};

struct Entry {
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
    schedules: HashMap<String, RecurringSchedule>,
}

impl MemoryState {
    /// Returns false if the id was already taken by a job of the same queue.
    fn insert(&mut self, new_job: NewJob, now: DateTime<Utc>) -> Result<bool> {
        if let Some(existing) = self.jobs.get(&new_job.id) {
            if existing.job.queue != new_job.queue {
                return Err(Error::validation(format!(
                    "job id {} is already used by queue {}",
                    new_job.id, existing.job.queue
                )));
            }
            return Ok(false);
        }
        let job = new_job.into_job(now);
        let id = job.id.clone();
        self.next_seq += 1;
        self.jobs.insert(
            id.clone(),
            Entry {
                seq: self.next_seq,
                job,
            },
        );
        Ok(true)
    }

    /// Carry a re-registered schedule's payload and options over to its firing,
    /// unless that firing has already started.
    fn refresh_pending_firing(&mut self, firing: NewJob, now: DateTime<Utc>) {
        let Some(entry) = self.jobs.get_mut(&firing.id) else {
            return;
        };
        let job = &mut entry.job;
        if job.queue != firing.queue || job.state != JobState::Delayed {
            return;
        }
        job.payload = firing.payload;
        job.priority = firing.options.priority;
        job.max_attempts = firing.options.attempts;
        job.backoff = firing.options.backoff;
        job.retention = firing.options.retention;
        job.updated_at = now;
    }

    fn active_mut(&mut self, job_id: &str) -> Result<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .map(|entry| &mut entry.job)
            .ok_or_else(|| Error::lease_lost(job_id))
    }

    /// Keep the `keep` most recently finished jobs of `state` in `queue`.
    fn trim(&mut self, queue: QueueName, state: JobState, keep: u32) {
        let mut finished: Vec<(DateTime<Utc>, u64, JobId)> = self
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == state)
            .map(|e| {
                (
                    e.job.finished_at.unwrap_or(e.job.updated_at),
                    e.seq,
                    e.job.id.clone(),
                )
            })
            .collect();
        if finished.len() <= keep as usize {
            return;
        }
        finished.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        for (_, _, id) in finished.into_iter().skip(keep as usize) {
            self.jobs.remove(&id);
        }
    }

    fn trim_after(&mut self, job: &Job) {
        match job.state {
            JobState::Completed => self.trim(job.queue, JobState::Completed, job.retention.keep_completed),
            JobState::Failed => self.trim(job.queue, JobState::Failed, job.retention.keep_failed),
            _ => {}
        }
    }

    fn reclaim_expired(&mut self, queue: QueueName, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.lease_expired(now))
            .map(|e| e.job.id.clone())
            .collect();

        let mut dead_lettered = Vec::new();
        for id in expired {
            let Some(entry) = self.jobs.get_mut(&id) else {
                continue;
            };
            let outcome = entry.job.expire_lease(now)?;
            warn!(job_id = %id, queue = %queue, ?outcome, "Reclaimed job with expired lease");
            let job = entry.job.clone();
            self.trim_after(&job);
            if matches!(outcome, NackOutcome::DeadLettered { .. }) {
                dead_lettered.push(job);
            }
        }
        Ok(dead_lettered)
    }

    fn promote_due(&mut self, queue: QueueName, now: DateTime<Utc>) {
        for entry in self.jobs.values_mut() {
            let job = &mut entry.job;
            if job.queue == queue && job.state == JobState::Delayed && job.is_eligible(now) {
                job.state = JobState::Waiting;
                job.updated_at = now;
            }
        }
    }
}

/// Job store kept entirely in memory.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        let now = Utc::now();
        let id = job.id.clone();
        self.state.lock().insert(job, now)?;
        Ok(id)
    }

    async fn reclaim_expired(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Vec<Job>> {
        self.state.lock().reclaim_expired(queue, now)
    }

    async fn lease(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease_for: Duration,
    ) -> Result<Option<Lease>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.promote_due(queue, now);

        let candidate = state
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.is_eligible(now))
            .min_by_key(|e| (e.job.priority, e.job.eligible_at(), e.seq))
            .map(|e| e.job.id.clone());

        let Some(job_id) = candidate else {
            return Ok(None);
        };
        let job = state.active_mut(&job_id)?;
        let lease = job.begin_lease(worker_id, lease_for, now)?;
        debug!(job_id = %job_id, queue = %queue, worker = worker_id, "Leased job");
        Ok(Some(lease))
    }

    async fn extend_lease(
        &self,
        job_id: &str,
        token: &str,
        lease_for: Duration,
    ) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.state
            .lock()
            .active_mut(job_id)?
            .extend_lease(token, lease_for, now)
    }

    async fn update_progress(&self, job_id: &str, token: &str, progress: u8) -> Result<()> {
        let now = Utc::now();
        self.state
            .lock()
            .active_mut(job_id)?
            .set_progress(token, progress, now)
    }

    async fn ack(
        &self,
        job_id: &str,
        token: &str,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let job = state.active_mut(job_id)?;
        job.complete(token, result, now)?;
        let job = job.clone();
        state.trim_after(&job);
        Ok(())
    }

    async fn nack(&self, job_id: &str, token: &str, failure: &JobFailure) -> Result<NackOutcome> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let job = state.active_mut(job_id)?;
        let outcome = job.fail_attempt(token, failure, now)?;
        let job = job.clone();
        state.trim_after(&job);
        Ok(outcome)
    }

    async fn get_job(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>> {
        Ok(self
            .state
            .lock()
            .jobs
            .get(job_id)
            .filter(|e| e.job.queue == queue)
            .map(|e| e.job.clone()))
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts> {
        let mut counts = JobCounts::default();
        for entry in self.state.lock().jobs.values() {
            if entry.job.queue == queue {
                counts.add(entry.job.state, 1);
            }
        }
        Ok(counts)
    }

    async fn list_failed(&self, queue: QueueName, limit: usize) -> Result<Vec<Job>> {
        let mut failed: Vec<Job> = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == JobState::Failed)
            .map(|e| e.job.clone())
            .collect();
        failed.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        failed.truncate(limit);
        Ok(failed)
    }

    async fn retry_failed(&self, queue: QueueName, job_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock();
        match state.jobs.get_mut(job_id) {
            Some(entry) if entry.job.queue == queue => entry.job.requeue_failed(now),
            _ => Err(Error::not_found("Job", job_id)),
        }
    }

    async fn register_recurring(&self, spec: RecurringSpec) -> Result<RecurringSchedule> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let id = spec.schedule_id();
        let schedule = match state.schedules.get(&id) {
            Some(existing) => RecurringSchedule {
                payload: spec.payload,
                options: spec.options,
                updated_at: now,
                ..existing.clone()
            },
            None => spec.into_schedule(now)?,
        };
        let firing = schedule.pending_firing();
        if !state.insert(firing.clone(), now)? {
            state.refresh_pending_firing(firing, now);
        }
        state.schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    async fn list_recurring(&self, queue: QueueName) -> Result<Vec<RecurringSchedule>> {
        let mut schedules: Vec<RecurringSchedule> = self
            .state
            .lock()
            .schedules
            .values()
            .filter(|s| s.queue == queue)
            .cloned()
            .collect();
        schedules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(schedules)
    }

    async fn remove_recurring(&self, schedule_id: &str) -> Result<bool> {
        Ok(self.state.lock().schedules.remove(schedule_id).is_some())
    }

    async fn materialize_recurring(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock();
        let due: Vec<String> = state
            .schedules
            .values()
            .filter(|s| s.next_fire_at <= now)
            .map(|s| s.id.clone())
            .collect();

        let mut created = 0;
        for id in due {
            let Some(mut schedule) = state.schedules.get(&id).cloned() else {
                continue;
            };
            if !schedule.advance(now)? {
                warn!(schedule = %id, "Recurring schedule has no future fire time");
                continue;
            }
            let created_firing = state.insert(schedule.pending_firing(), now)?;
            state.schedules.insert(id, schedule);
            if created_firing {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>, batch: u32) -> Result<u64> {
        let mut state = self.state.lock();
        let stale: Vec<JobId> = state
            .jobs
            .values()
            .filter(|e| e.job.state.is_terminal() && e.job.finished_at.is_some_and(|at| at < older_than))
            .map(|e| e.job.id.clone())
            .take(batch as usize)
            .collect();
        for id in &stale {
            state.jobs.remove(id);
        }
        Ok(stale.len() as u64)
    }
}
