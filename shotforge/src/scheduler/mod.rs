//! Recurring job registration and materialization.
//!
//! Schedules live in the job store; this service only registers the configured
//! definitions at startup and turns due firings into delayed jobs on every tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::queue::payload::{CleanupJob, JobPayload, QueueName, RenewalJob};
use crate::queue::{EnqueueOptions, Queues, RecurringSchedule};
use crate::utils::clock::{Clock, SystemClock};

/// A job to produce on a cron pattern.
#[derive(Debug, Clone)]
pub struct ScheduleDefinition {
    pub payload: JobPayload,
    pub pattern: String,
    pub options: EnqueueOptions,
}

impl ScheduleDefinition {
    pub fn new(payload: JobPayload, pattern: impl Into<String>) -> Self {
        Self {
            payload,
            pattern: pattern.into(),
            options: EnqueueOptions::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub cleanup_cron: String,
    pub cleanup_hours_old: u32,
    pub renewal_cron: String,
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cleanup_cron: "0 */2 * * *".to_string(),
            cleanup_hours_old: 24,
            renewal_cron: "0 0 * * *".to_string(),
            tick_interval: Duration::from_secs(15),
        }
    }
}

impl SchedulerConfig {
    /// Orphan sweep and daily renewal.
    pub fn definitions(&self) -> Vec<ScheduleDefinition> {
        vec![
            ScheduleDefinition::new(
                JobPayload::CleanupOrphanedUploads(CleanupJob {
                    hours_old: self.cleanup_hours_old,
                }),
                &self.cleanup_cron,
            ),
            ScheduleDefinition::new(
                JobPayload::RenewSubscriptions(RenewalJob::default()),
                &self.renewal_cron,
            ),
        ]
    }
}

pub struct Scheduler {
    queues: Queues,
    definitions: Vec<ScheduleDefinition>,
    tick_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(queues: Queues, config: &SchedulerConfig) -> Self {
        Self {
            queues,
            definitions: config.definitions(),
            tick_interval: config.tick_interval,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn definitions(&self) -> &[ScheduleDefinition] {
        &self.definitions
    }

    /// Register every definition, then drop schedules for the same queue and
    /// kind whose pattern no longer matches the configuration.
    pub async fn register_all(&self) -> Result<Vec<RecurringSchedule>> {
        let mut registered = Vec::with_capacity(self.definitions.len());
        for definition in &self.definitions {
            let handle = self.queues.get(definition.payload.queue());
            let schedule = handle
                .register_recurring(
                    &definition.payload,
                    &definition.pattern,
                    definition.options.clone(),
                )
                .await?;
            info!(
                schedule_id = %schedule.id,
                next_fire_at = %schedule.next_fire_at,
                "Registered recurring job"
            );
            registered.push(schedule);
        }

        let keep: HashSet<&str> = registered.iter().map(|s| s.id.as_str()).collect();
        let owned: HashSet<(QueueName, &str)> = self
            .definitions
            .iter()
            .map(|d| (d.payload.queue(), d.payload.kind()))
            .collect();
        let queues: HashSet<QueueName> = owned.iter().map(|(q, _)| *q).collect();

        for queue in queues {
            let handle = self.queues.get(queue);
            for schedule in handle.list_recurring().await? {
                if owned.contains(&(queue, schedule.kind.as_str()))
                    && !keep.contains(schedule.id.as_str())
                {
                    handle.remove_recurring(&schedule.id).await?;
                    info!(schedule_id = %schedule.id, "Removed stale recurring job");
                }
            }
        }

        Ok(registered)
    }

    /// Materialize due firings once. Returns the number of jobs created.
    pub async fn tick(&self) -> Result<usize> {
        let created = self
            .queues
            .store()
            .materialize_recurring(self.clock.now())
            .await?;
        if created > 0 {
            debug!(created, "Materialized recurring firings");
        }
        Ok(created)
    }

    pub fn start(self: Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval.max(Duration::from_millis(100)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval = ?self.tick_interval, "Scheduler started");

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            error!("Scheduler tick failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
