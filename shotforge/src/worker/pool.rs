//! Leasing worker for one queue.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::processor::{JobContext, Processor, ProgressReporter};
use crate::queue::{Job, JobFailure, JobPayload, Lease, NackOutcome, QueueHandle, QueueName};
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// Configuration for a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Jobs processed at the same time.
    pub concurrency: usize,
    /// How long an idle lane sleeps between lease attempts without a wake-up.
    pub poll_interval_ms: u64,
    /// Lease length; renewed every half period while the job runs.
    pub lease_duration_secs: u64,
    /// Upper bound on one processor run. Exceeding it counts as a failed attempt.
    pub job_timeout_secs: u64,
    /// How long `stop` waits for in-flight jobs before aborting them.
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval_ms: 500,
            lease_duration_secs: 120,
            job_timeout_secs: 600,
            shutdown_grace_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn for_queue(queue: QueueName) -> Self {
        let (concurrency, lease_duration_secs, job_timeout_secs) = match queue {
            QueueName::ImageGeneration => (2, 600, 900),
            QueueName::Cleanup => (1, 120, 600),
            QueueName::Email => (4, 120, 120),
            QueueName::DiscordNotifications => (2, 120, 120),
            QueueName::SubscriptionRenewal => (1, 120, 1800),
        };
        Self {
            concurrency,
            lease_duration_secs,
            job_timeout_secs,
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_lease_duration_secs(mut self, secs: u64) -> Self {
        self.lease_duration_secs = secs;
        self
    }

    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }

    fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs.max(1))
    }

    fn heartbeat_interval(&self) -> Duration {
        (self.lease_duration() / 2).max(MIN_HEARTBEAT)
    }
}

/// Per-job outcome, published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Completed {
        job_id: String,
        queue: QueueName,
        attempt: u32,
        result: Option<Value>,
    },
    Retrying {
        job_id: String,
        queue: QueueName,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    DeadLettered {
        job_id: String,
        queue: QueueName,
        attempts: u32,
        reason: String,
    },
    /// Another worker owns the job now; this run's outcome was discarded.
    LeaseLost { job_id: String, queue: QueueName },
}

struct WorkerShared {
    handle: QueueHandle,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
    events: broadcast::Sender<WorkerEvent>,
    active_jobs: AtomicUsize,
}

enum RunOutcome {
    Finished(std::result::Result<Result<Option<Value>>, tokio::time::error::Elapsed>),
    LeaseLost,
}

/// Leases jobs from one queue and drives them through a processor.
pub struct Worker {
    id: String,
    shared: Arc<WorkerShared>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl Worker {
    pub fn new(handle: QueueHandle, processor: Arc<dyn Processor>, config: WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let id = format!(
            "{}-{}",
            handle.queue(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        Self {
            id,
            shared: Arc::new(WorkerShared {
                handle,
                processor,
                config,
                events,
                active_jobs: AtomicUsize::new(0),
            }),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> QueueName {
        self.shared.handle.queue()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.events.subscribe()
    }

    /// Jobs currently being processed.
    pub fn active_count(&self) -> usize {
        self.shared.active_jobs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled() && self.tasks.lock().is_some()
    }

    /// Spawn `concurrency` lanes.
    pub fn start(&self) -> Result<()> {
        let queue = self.queue();
        if self.shared.processor.queue() != queue {
            return Err(Error::config(format!(
                "processor {} handles {}, not {}",
                self.shared.processor.name(),
                self.shared.processor.queue(),
                queue
            )));
        }

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return Err(Error::Other(format!("worker {} was already stopped", self.id)));
        };
        if !join_set.is_empty() {
            warn!(worker = %self.id, "Worker already started");
            return Ok(());
        }

        let concurrency = self.shared.config.concurrency.max(1);
        info!(
            worker = %self.id,
            queue = %queue,
            processor = self.shared.processor.name(),
            concurrency,
            "Starting worker"
        );

        for lane in 0..concurrency {
            let shared = self.shared.clone();
            let cancellation_token = self.cancellation_token.clone();
            let lane_id = format!("{}/{}", self.id, lane);
            join_set.spawn(run_lane(shared, cancellation_token, lane_id));
        }
        Ok(())
    }

    /// Stop leasing and drain in-flight jobs, aborting whatever outlives the grace period.
    pub async fn stop(&self) {
        info!(worker = %self.id, "Stopping worker");
        self.cancellation_token.cancel();

        let join_set = self.tasks.lock().take();
        let Some(mut join_set) = join_set else {
            return;
        };

        let grace = Duration::from_secs(self.shared.config.shutdown_grace_secs);
        let drained = tokio::time::timeout(grace, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                worker = %self.id,
                in_flight = self.active_count(),
                "Grace period elapsed, aborting in-flight jobs; their leases will expire"
            );
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
        }

        info!(worker = %self.id, "Worker stopped");
    }
}

async fn run_lane(shared: Arc<WorkerShared>, cancellation_token: CancellationToken, lane_id: String) {
    let queue = shared.handle.queue();
    let notifier = shared.handle.notifier();
    let poll_interval = Duration::from_millis(shared.config.poll_interval_ms.max(1));
    debug!(lane = %lane_id, "Worker lane started");

    loop {
        if cancellation_token.is_cancelled() {
            break;
        }

        match shared.handle.store().reclaim_expired(queue, Utc::now()).await {
            Ok(dead_lettered) => {
                for job in dead_lettered {
                    after_dead_letter_reclaim(&shared, &job).await;
                }
            }
            Err(e) => warn!(lane = %lane_id, queue = %queue, error = %e, "Error reclaiming expired leases"),
        }

        let lease = match shared
            .handle
            .store()
            .lease(queue, &lane_id, shared.config.lease_duration())
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = notifier.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }
            Err(e) => {
                error!(lane = %lane_id, queue = %queue, error = %e, "Error leasing job");
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }
        };

        shared.active_jobs.fetch_add(1, Ordering::SeqCst);
        run_job(&shared, lease).await;
        shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    debug!(lane = %lane_id, "Worker lane shutting down");
}

/// Dead-letter hook for a job whose worker died holding its last lease.
async fn after_dead_letter_reclaim(shared: &WorkerShared, job: &Job) {
    let _ = shared.events.send(WorkerEvent::DeadLettered {
        job_id: job.id.clone(),
        queue: job.queue,
        attempts: job.attempts_made,
        reason: job.failed_reason.clone().unwrap_or_default(),
    });
    match JobPayload::decode(job.queue, &job.kind, &job.payload) {
        Ok(payload) => run_dead_letter_hook(shared, &JobContext::settled(job), &payload).await,
        Err(e) => warn!(job_id = %job.id, error = %e, "Undecodable payload on dead-lettered job"),
    }
}

async fn run_dead_letter_hook(shared: &WorkerShared, ctx: &JobContext, payload: &JobPayload) {
    if let Err(e) = shared.processor.on_dead_letter(ctx, payload).await {
        error!(
            job_id = %ctx.job_id,
            queue = %ctx.queue,
            processor = shared.processor.name(),
            error = %e,
            "Dead-letter hook failed"
        );
    }
}

async fn run_job(shared: &WorkerShared, lease: Lease) {
    let Lease { job, token, .. } = lease;
    let store = shared.handle.store().clone();
    let attempt = job.attempts_made + 1;

    let payload = match JobPayload::decode(job.queue, &job.kind, &job.payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(job_id = %job.id, queue = %job.queue, kind = %job.kind, error = %e, "Undecodable job payload");
            settle(shared, &job.id, &token, attempt, RunOutcome::Finished(Ok(Err(e)))).await;
            return;
        }
    };

    let ctx = JobContext {
        job_id: job.id.clone(),
        queue: job.queue,
        kind: job.kind.clone(),
        attempt,
        max_attempts: job.max_attempts,
        progress: ProgressReporter::new(store.clone(), job.id.clone(), token.clone()),
    };

    debug!(
        job_id = %job.id,
        queue = %job.queue,
        kind = %job.kind,
        attempt,
        max_attempts = job.max_attempts,
        "Processing job"
    );

    let job_timeout = Duration::from_secs(shared.config.job_timeout_secs.max(1));
    let work = tokio::time::timeout(job_timeout, shared.processor.process(&ctx, payload.clone()));
    tokio::pin!(work);

    let mut heartbeat = tokio::time::interval(shared.config.heartbeat_interval());
    heartbeat.tick().await;

    let outcome = loop {
        tokio::select! {
            result = &mut work => break RunOutcome::Finished(result),
            _ = heartbeat.tick() => {
                match store
                    .extend_lease(&job.id, &token, shared.config.lease_duration())
                    .await
                {
                    Ok(_) => {}
                    Err(Error::LeaseLost { .. }) => break RunOutcome::LeaseLost,
                    Err(e) => warn!(job_id = %job.id, error = %e, "Lease heartbeat failed"),
                }
            }
        }
    };

    if settle(shared, &job.id, &token, attempt, outcome).await {
        run_dead_letter_hook(shared, &ctx, &payload).await;
    }
}

/// Record the outcome of a run. Returns true if it dead-lettered the job.
async fn settle(
    shared: &WorkerShared,
    job_id: &str,
    token: &str,
    attempt: u32,
    outcome: RunOutcome,
) -> bool {
    let queue = shared.handle.queue();
    let store = shared.handle.store();

    let recorded = match outcome {
        RunOutcome::LeaseLost => Err(Error::lease_lost(job_id)),
        RunOutcome::Finished(Ok(Ok(result))) => {
            match store.ack(job_id, token, result.clone()).await {
                Ok(()) => {
                    info!(job_id, queue = %queue, attempt, "Job completed");
                    let _ = shared.events.send(WorkerEvent::Completed {
                        job_id: job_id.to_string(),
                        queue,
                        attempt,
                        result,
                    });
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        }
        RunOutcome::Finished(Ok(Err(e))) => nack(shared, job_id, token, JobFailure::from(&e)).await,
        RunOutcome::Finished(Err(_)) => {
            let reason = format!(
                "job timed out after {}s",
                shared.config.job_timeout_secs.max(1)
            );
            nack(shared, job_id, token, JobFailure::transient(reason)).await
        }
    };

    match recorded {
        Ok(dead_lettered) => dead_lettered,
        Err(Error::LeaseLost { .. }) => {
            warn!(job_id, queue = %queue, "Lease lost; discarding this run's outcome");
            let _ = shared.events.send(WorkerEvent::LeaseLost {
                job_id: job_id.to_string(),
                queue,
            });
            false
        }
        Err(e) => {
            error!(job_id, queue = %queue, error = %e, "Failed to record job outcome; lease will expire");
            false
        }
    }
}

/// Returns true if the job was dead-lettered.
async fn nack(shared: &WorkerShared, job_id: &str, token: &str, failure: JobFailure) -> Result<bool> {
    let queue = shared.handle.queue();
    let outcome = shared.handle.store().nack(job_id, token, &failure).await?;
    let dead_lettered = matches!(outcome, NackOutcome::DeadLettered { .. });
    let event = match outcome {
        NackOutcome::Retrying { attempt, delay } => {
            warn!(
                job_id,
                queue = %queue,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                reason = %failure.reason,
                "Job failed, will retry"
            );
            WorkerEvent::Retrying {
                job_id: job_id.to_string(),
                queue,
                attempt,
                delay,
                reason: failure.reason,
            }
        }
        NackOutcome::DeadLettered { attempts } => {
            error!(
                job_id,
                queue = %queue,
                attempts,
                permanent = failure.permanent,
                reason = %failure.reason,
                "Job dead-lettered"
            );
            WorkerEvent::DeadLettered {
                job_id: job_id.to_string(),
                queue,
                attempts,
                reason: failure.reason,
            }
        }
    };
    let _ = shared.events.send(event);
    Ok(dead_lettered)
}
