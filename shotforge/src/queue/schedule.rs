//! Cron patterns and recurring schedule definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::job::{JobOptions, NewJob};
use super::payload::QueueName;
use crate::{Error, Result};

/// A parsed cron expression.
///
/// Accepts the classic 5-field form (`min hour dom mon dow`) as well as the
/// seconds-first 6/7-field form understood by the `cron` crate.
#[derive(Debug, Clone)]
pub struct CronPattern {
    normalized: String,
    schedule: cron::Schedule,
}

impl CronPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let fields: Vec<&str> = pattern.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 | 7 => fields.join(" "),
            n => {
                return Err(Error::validation(format!(
                    "cron pattern '{}' has {} fields, expected 5, 6 or 7",
                    pattern, n
                )));
            }
        };
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            Error::validation(format!("invalid cron pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            normalized,
            schedule,
        })
    }

    /// Seconds-first form, used as part of the schedule key.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// A registered repeating producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    /// `{queue}:{kind}:{normalized pattern}`
    pub id: String,
    pub queue: QueueName,
    pub kind: String,
    pub pattern: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
    pub next_fire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration request; the store turns it into a [`RecurringSchedule`].
#[derive(Debug, Clone)]
pub struct RecurringSpec {
    pub queue: QueueName,
    pub kind: String,
    pub pattern: CronPattern,
    pub payload: serde_json::Value,
    pub options: JobOptions,
}

impl RecurringSpec {
    pub fn schedule_id(&self) -> String {
        schedule_id(self.queue, &self.kind, self.pattern.as_str())
    }

    pub fn into_schedule(self, now: DateTime<Utc>) -> Result<RecurringSchedule> {
        let next_fire_at = self.pattern.next_after(now).ok_or_else(|| {
            Error::validation(format!(
                "cron pattern '{}' never fires again",
                self.pattern.as_str()
            ))
        })?;
        Ok(RecurringSchedule {
            id: self.schedule_id(),
            queue: self.queue,
            kind: self.kind,
            pattern: self.pattern.as_str().to_string(),
            payload: self.payload,
            options: self.options,
            next_fire_at,
            created_at: now,
            updated_at: now,
        })
    }
}

pub fn schedule_id(queue: QueueName, kind: &str, normalized_pattern: &str) -> String {
    format!("{}:{}:{}", queue, kind, normalized_pattern)
}

impl RecurringSchedule {
    /// Deterministic id of the firing at `fire_at`, so re-registration cannot duplicate it.
    pub fn firing_id(&self, fire_at: DateTime<Utc>) -> String {
        format!("repeat:{}:{}", self.id, fire_at.timestamp_millis())
    }

    /// The delayed job for the pending firing.
    pub fn pending_firing(&self) -> NewJob {
        NewJob {
            id: self.firing_id(self.next_fire_at),
            queue: self.queue,
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            options: self.options.clone(),
            delay_until: Some(self.next_fire_at),
            schedule_id: Some(self.id.clone()),
        }
    }

    /// Move past `now`. Returns false if the pattern has no future fire time.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let pattern = CronPattern::parse(&self.pattern)?;
        match pattern.next_after(now) {
            Some(next) => {
                self.next_fire_at = next;
                self.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_five_field_pattern_is_normalized() {
        let pattern = CronPattern::parse("0 */2 * * *").unwrap();
        assert_eq!(pattern.as_str(), "0 0 */2 * * *");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            CronPattern::parse("every two hours"),
            Err(Error::Validation(_))
        ));
        assert!(CronPattern::parse("0 99 * * *").is_err());
    }

    #[test]
    fn test_next_after_every_two_hours() {
        let pattern = CronPattern::parse("0 */2 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 3, 15, 0).unwrap();
        let next = pattern.next_after(at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 4, 0, 0).unwrap());
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_next_after_is_strict() {
        let pattern = CronPattern::parse("0 0 * * *").unwrap();
        let midnight = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            pattern.next_after(midnight).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_schedule_identity_and_firing_ids() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 3, 15, 0).unwrap();
        let spec = RecurringSpec {
            queue: QueueName::Cleanup,
            kind: "cleanup-orphaned-uploads".to_string(),
            pattern: CronPattern::parse("0 */2 * * *").unwrap(),
            payload: serde_json::json!({"hours_old": 24}),
            options: JobOptions::for_queue(QueueName::Cleanup),
        };
        let schedule = spec.into_schedule(now).unwrap();
        assert_eq!(schedule.id, "cleanup:cleanup-orphaned-uploads:0 0 */2 * * *");

        let firing = schedule.pending_firing();
        assert_eq!(firing.delay_until, Some(schedule.next_fire_at));
        assert_eq!(firing.id, schedule.firing_id(schedule.next_fire_at));
        assert_eq!(firing.schedule_id.as_deref(), Some(schedule.id.as_str()));
    }
}
