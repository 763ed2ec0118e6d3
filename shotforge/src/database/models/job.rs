//! Job store row models.

use sqlx::FromRow;
use std::str::FromStr;

use crate::database::time::{ms_to_datetime, opt_datetime_to_ms, opt_ms_to_datetime};
use crate::queue::job::{BackoffPolicy, Job, JobOptions, JobState, Retention};
use crate::queue::payload::QueueName;
use crate::queue::schedule::RecurringSchedule;
use crate::{Error, Result};

/// Row of the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobDbModel {
    pub id: String,
    pub queue: String,
    pub kind: String,
    /// JSON payload
    pub payload: String,
    pub priority: i64,
    /// waiting, delayed, active, completed, failed
    pub state: String,
    pub attempts_made: i64,
    pub max_attempts: i64,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
    pub keep_completed: i64,
    pub keep_failed: i64,
    pub delay_until: Option<i64>,
    pub lease_token: Option<String>,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub progress: Option<i64>,
    /// JSON result of a completed job
    pub result: Option<String>,
    pub failed_reason: Option<String>,
    pub schedule_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

fn parse_queue(raw: &str) -> Result<QueueName> {
    QueueName::from_str(raw).map_err(|_| Error::Other(format!("unknown queue '{}' in store", raw)))
}

fn to_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

impl JobDbModel {
    pub fn into_job(self) -> Result<Job> {
        let state = JobState::from_str(&self.state)
            .map_err(|_| Error::Other(format!("unknown job state '{}'", self.state)))?;
        let result = match self.result {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Job {
            queue: parse_queue(&self.queue)?,
            payload: serde_json::from_str(&self.payload)?,
            id: self.id,
            kind: self.kind,
            priority: self.priority.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            state,
            attempts_made: to_u32(self.attempts_made),
            max_attempts: to_u32(self.max_attempts),
            backoff: BackoffPolicy {
                base_delay_ms: self.backoff_base_ms.max(0) as u64,
                max_delay_ms: self.backoff_max_ms.max(0) as u64,
            },
            retention: Retention::new(to_u32(self.keep_completed), to_u32(self.keep_failed)),
            delay_until: opt_ms_to_datetime(self.delay_until),
            lease_token: self.lease_token,
            worker_id: self.worker_id,
            lease_expires_at: opt_ms_to_datetime(self.lease_expires_at),
            progress: self.progress.map(|p| p.clamp(0, 100) as u8),
            result,
            failed_reason: self.failed_reason,
            schedule_id: self.schedule_id,
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
            finished_at: opt_ms_to_datetime(self.finished_at),
        })
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let result = match &job.result {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        Ok(Self {
            id: job.id.clone(),
            queue: job.queue.as_str().to_string(),
            kind: job.kind.clone(),
            payload: serde_json::to_string(&job.payload)?,
            priority: job.priority as i64,
            state: job.state.to_string(),
            attempts_made: job.attempts_made as i64,
            max_attempts: job.max_attempts as i64,
            backoff_base_ms: job.backoff.base_delay_ms.min(i64::MAX as u64) as i64,
            backoff_max_ms: job.backoff.max_delay_ms.min(i64::MAX as u64) as i64,
            keep_completed: job.retention.keep_completed as i64,
            keep_failed: job.retention.keep_failed as i64,
            delay_until: opt_datetime_to_ms(job.delay_until),
            lease_token: job.lease_token.clone(),
            worker_id: job.worker_id.clone(),
            lease_expires_at: opt_datetime_to_ms(job.lease_expires_at),
            progress: job.progress.map(i64::from),
            result,
            failed_reason: job.failed_reason.clone(),
            schedule_id: job.schedule_id.clone(),
            created_at: job.created_at.timestamp_millis(),
            updated_at: job.updated_at.timestamp_millis(),
            finished_at: opt_datetime_to_ms(job.finished_at),
        })
    }
}

/// Row of the `recurring_schedules` table.
#[derive(Debug, Clone, FromRow)]
pub struct RecurringScheduleDbModel {
    pub id: String,
    pub queue: String,
    pub kind: String,
    /// Seconds-first cron expression
    pub pattern: String,
    pub payload: String,
    /// JSON-encoded `JobOptions`
    pub options: String,
    pub next_fire_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RecurringScheduleDbModel {
    pub fn into_schedule(self) -> Result<RecurringSchedule> {
        let options: JobOptions = serde_json::from_str(&self.options)?;
        Ok(RecurringSchedule {
            queue: parse_queue(&self.queue)?,
            payload: serde_json::from_str(&self.payload)?,
            options,
            id: self.id,
            kind: self.kind,
            pattern: self.pattern,
            next_fire_at: ms_to_datetime(self.next_fire_at),
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
        })
    }

    pub fn from_schedule(schedule: &RecurringSchedule) -> Result<Self> {
        Ok(Self {
            id: schedule.id.clone(),
            queue: schedule.queue.as_str().to_string(),
            kind: schedule.kind.clone(),
            pattern: schedule.pattern.clone(),
            payload: serde_json::to_string(&schedule.payload)?,
            options: serde_json::to_string(&schedule.options)?,
            next_fire_at: schedule.next_fire_at.timestamp_millis(),
            created_at: schedule.created_at.timestamp_millis(),
            updated_at: schedule.updated_at.timestamp_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::NewJob;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_job_row_conversion_preserves_fields() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut job = NewJob {
            id: "job-1".to_string(),
            queue: QueueName::DiscordNotifications,
            kind: "new_user".to_string(),
            payload: json!({"type": "new_user", "user_id": "u1", "email": "a@b.co"}),
            options: JobOptions::for_queue(QueueName::DiscordNotifications),
            delay_until: Some(now + chrono::Duration::seconds(30)),
            schedule_id: None,
        }
        .into_job(now);
        job.progress = Some(40);
        job.result = Some(json!({"sent": true}));

        let row = JobDbModel::from_job(&job).unwrap();
        assert_eq!(row.queue, "discord-notifications");
        assert_eq!(row.state, "delayed");

        let back = row.into_job().unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let now = Utc::now();
        let job = NewJob {
            id: "job-1".to_string(),
            queue: QueueName::Email,
            kind: "welcome".to_string(),
            payload: json!({}),
            options: JobOptions::for_queue(QueueName::Email),
            delay_until: None,
            schedule_id: None,
        }
        .into_job(now);
        let mut row = JobDbModel::from_job(&job).unwrap();
        row.state = "paused".to_string();
        assert!(row.into_job().is_err());
    }
}
