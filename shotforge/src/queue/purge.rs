//! Age-based purge of finished jobs.
//!
//! Count-based retention already runs on every ack/nack; this service adds a
//! time ceiling so queues that never fill their retention counts still shed
//! old jobs.

use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::JobStore;
use crate::Result;

/// Configuration for job purging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Days to keep completed/failed jobs. 0 keeps them until count retention evicts them.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Optional "HH:MM-HH:MM" UTC window outside of which nothing is purged.
    #[serde(default)]
    pub time_window: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    14
}

fn default_batch_size() -> u32 {
    500
}

fn default_check_interval_secs() -> u64 {
    3600
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            time_window: None,
            batch_size: default_batch_size(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl PurgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_time_window(mut self, window: Option<String>) -> Self {
        self.time_window = window;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeWindow {
    fn parse(window: &str) -> Option<Self> {
        let (start, end) = window.split_once('-')?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        Some(Self { start, end })
    }

    fn is_within(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            // Wraps midnight, e.g. 23:00-02:00
            time >= self.start || time < self.end
        }
    }
}

/// Deletes finished jobs older than the retention period, in batches.
pub struct JobPurgeService {
    config: PurgeConfig,
    store: Arc<dyn JobStore>,
    time_window: Option<TimeWindow>,
}

impl JobPurgeService {
    pub fn new(config: PurgeConfig, store: Arc<dyn JobStore>) -> Self {
        let time_window = config.time_window.as_deref().and_then(TimeWindow::parse);
        if config.time_window.is_some() && time_window.is_none() {
            warn!(
                "Invalid purge window {:?}, expected HH:MM-HH:MM; purging at any time",
                config.time_window
            );
        }
        Self {
            config,
            store,
            time_window,
        }
    }

    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }

    pub fn is_purge_allowed(&self) -> bool {
        self.time_window
            .as_ref()
            .is_none_or(|window| window.is_within(Utc::now().time()))
    }

    /// One purge pass. Returns the number of jobs deleted.
    pub async fn run_purge(&self) -> Result<u64> {
        if self.config.retention_days == 0 {
            debug!("Job purging disabled (retention_days = 0)");
            return Ok(0);
        }
        if !self.is_purge_allowed() {
            debug!("Purge not allowed outside time window");
            return Ok(0);
        }

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.retention_days));
        let batch = self.config.batch_size.max(1);
        let mut total: u64 = 0;
        loop {
            let deleted = self.store.purge_finished(cutoff, batch).await?;
            total += deleted;
            if deleted < u64::from(batch) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if total > 0 {
            info!(
                deleted = total,
                retention_days = self.config.retention_days,
                "Purged finished jobs"
            );
        }
        Ok(total)
    }

    /// Run `run_purge` every `check_interval_secs` until `cancellation_token` fires.
    pub fn start_background_task(
        self: Arc<Self>,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut check_interval =
                interval(Duration::from_secs(self.config.check_interval_secs.max(1)));
            info!(
                retention_days = self.config.retention_days,
                interval_secs = self.config.check_interval_secs,
                "Job purge service started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Job purge service shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        if let Err(e) = self.run_purge().await {
                            error!("Purge cycle failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
