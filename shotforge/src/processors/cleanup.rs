//! Sweep of orphaned product uploads.
//!
//! Per-record failures are collected into the summary; the job itself only fails
//! when the orphan query does.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::repositories::UploadRepository;
use crate::queue::payload::{JobPayload, QueueName};
use crate::services::ObjectStorage;
use crate::utils::clock::Clock;
use crate::worker::{JobContext, Processor};
use crate::{Error, Result};

/// Result of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub cutoff: DateTime<Utc>,
    pub deleted_records: usize,
    pub deleted_keys: Vec<String>,
    /// One entry per upload that could not be removed, naming its storage key.
    pub errors: Vec<String>,
}

pub struct CleanupProcessor {
    uploads: Arc<dyn UploadRepository>,
    storage: Arc<dyn ObjectStorage>,
    clock: Arc<dyn Clock>,
}

impl CleanupProcessor {
    pub fn new(
        uploads: Arc<dyn UploadRepository>,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            uploads,
            storage,
            clock,
        }
    }

    /// Delete every upload orphaned for at least `hours_old` hours.
    pub async fn sweep(&self, ctx: &JobContext, hours_old: u32) -> Result<CleanupSummary> {
        let cutoff = self.clock.now() - Duration::hours(i64::from(hours_old));
        let orphans = self.uploads.find_orphaned(cutoff).await?;
        debug!(count = orphans.len(), %cutoff, "Found orphaned uploads");

        let mut summary = CleanupSummary {
            cutoff,
            deleted_records: 0,
            deleted_keys: Vec::new(),
            errors: Vec::new(),
        };
        let total = orphans.len();

        for (i, upload) in orphans.into_iter().enumerate() {
            let outcome = async {
                self.storage.delete(&upload.storage_key).await?;
                self.uploads.mark_deleted(&upload.id).await
            }
            .await;

            match outcome {
                Ok(()) => {
                    summary.deleted_records += 1;
                    summary.deleted_keys.push(upload.storage_key);
                }
                Err(e) => {
                    warn!(
                        upload_id = %upload.id,
                        key = %upload.storage_key,
                        error = %e,
                        "Failed to remove orphaned upload"
                    );
                    summary
                        .errors
                        .push(format!("{}: {}", upload.storage_key, e));
                }
            }

            let percent = ((i + 1) * 100 / total.max(1)) as u8;
            ctx.progress.report(percent).await;
        }

        info!(
            deleted = summary.deleted_records,
            failed = summary.errors.len(),
            hours_old,
            "Orphaned upload sweep finished"
        );
        Ok(summary)
    }
}

#[async_trait]
impl Processor for CleanupProcessor {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn queue(&self) -> QueueName {
        QueueName::Cleanup
    }

    async fn process(&self, ctx: &JobContext, payload: JobPayload) -> Result<Option<Value>> {
        let JobPayload::CleanupOrphanedUploads(job) = payload else {
            return Err(Error::permanent(format!(
                "{} cannot run {} jobs",
                self.name(),
                payload.kind()
            )));
        };
        let summary = self.sweep(ctx, job.hours_old).await?;
        Ok(Some(serde_json::to_value(summary)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_serializes_counts() {
        let summary = CleanupSummary {
            cutoff: Utc::now(),
            deleted_records: 1,
            deleted_keys: vec!["uploads/a.png".to_string()],
            errors: vec!["uploads/b.png: storage request failed: HTTP 500".to_string()],
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["deleted_records"], 1);
        assert_eq!(value["errors"].as_array().unwrap().len(), 1);
        let back: CleanupSummary = serde_json::from_value(value).unwrap();
        assert_eq!(back, summary);
    }
}
