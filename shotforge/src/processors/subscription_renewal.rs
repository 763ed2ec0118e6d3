//! Monthly credit top-up for active subscriptions.
//!
//! Runs daily; only the first calendar day of the month (UTC) grants credits.
//! The repository guarantees at most one top-up per user per day, so repeated
//! firings and whole-run retries are safe. Users are processed independently:
//! one user's failure is recorded and the loop moves on.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::models::ActiveSubscriptionDbModel;
use crate::database::repositories::{SubscriptionRepository, TopupOutcome};
use crate::queue::QueueHandle;
use crate::queue::job::EnqueueOptions;
use crate::queue::payload::{EmailJob, JobPayload, QueueName};
use crate::utils::clock::Clock;
use crate::worker::{JobContext, Processor};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalSummary {
    pub run_date: NaiveDate,
    pub scanned: usize,
    pub topped_up: usize,
    pub already_applied: usize,
    /// `user_id: error` for every user whose top-up failed.
    pub errors: Vec<String>,
    /// Set when the run did nothing because it is not a renewal day.
    pub skipped: Option<String>,
}

impl RenewalSummary {
    fn new(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            scanned: 0,
            topped_up: 0,
            already_applied: 0,
            errors: Vec::new(),
            skipped: None,
        }
    }
}

enum UserOutcome {
    ToppedUp,
    AlreadyApplied,
}

pub struct SubscriptionRenewalProcessor {
    subscriptions: Arc<dyn SubscriptionRepository>,
    clock: Arc<dyn Clock>,
    email: Option<QueueHandle>,
}

impl SubscriptionRenewalProcessor {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            subscriptions,
            clock,
            email: None,
        }
    }

    /// Enqueue a `credit_topup` email on `handle` after each successful top-up.
    pub fn with_email(mut self, handle: QueueHandle) -> Self {
        self.email = Some(handle);
        self
    }

    pub async fn renew(&self, ctx: &JobContext) -> Result<RenewalSummary> {
        let today = self.clock.now().date_naive();
        let mut summary = RenewalSummary::new(today);

        if today.day() != 1 {
            debug!(%today, "Not a renewal day");
            summary.skipped = Some("not the first day of the month".to_string());
            return Ok(summary);
        }

        let subscriptions = self.subscriptions.list_active().await?;
        summary.scanned = subscriptions.len();
        info!(%today, active = summary.scanned, "Running monthly credit renewal");

        for (i, subscription) in subscriptions.iter().enumerate() {
            match self.renew_one(subscription, today).await {
                Ok(UserOutcome::ToppedUp) => summary.topped_up += 1,
                Ok(UserOutcome::AlreadyApplied) => summary.already_applied += 1,
                Err(e) => {
                    warn!(
                        user_id = %subscription.user_id,
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "Monthly top-up failed"
                    );
                    summary
                        .errors
                        .push(format!("{}: {}", subscription.user_id, e));
                }
            }
            let percent = ((i + 1) * 100 / summary.scanned.max(1)) as u8;
            ctx.progress.report(percent).await;
        }

        let attempted = summary.scanned - summary.already_applied;
        if attempted > 0 && summary.errors.len() == attempted {
            return Err(Error::remote(
                "renewal",
                format!(
                    "all {} top-ups failed; first error: {}",
                    attempted, summary.errors[0]
                ),
            ));
        }

        info!(
            %today,
            topped_up = summary.topped_up,
            already_applied = summary.already_applied,
            failed = summary.errors.len(),
            "Monthly credit renewal finished"
        );
        Ok(summary)
    }

    async fn renew_one(
        &self,
        subscription: &ActiveSubscriptionDbModel,
        today: NaiveDate,
    ) -> Result<UserOutcome> {
        let plan = subscription.plan_tier()?;
        if self
            .subscriptions
            .has_monthly_topup(&subscription.user_id, today)
            .await?
        {
            return Ok(UserOutcome::AlreadyApplied);
        }

        let credits = plan.monthly_credits();
        match self
            .subscriptions
            .apply_monthly_topup(&subscription.user_id, credits, today)
            .await?
        {
            TopupOutcome::AlreadyApplied => Ok(UserOutcome::AlreadyApplied),
            TopupOutcome::Applied { new_balance } => {
                debug!(
                    user_id = %subscription.user_id,
                    credits,
                    new_balance,
                    "Applied monthly top-up"
                );
                self.notify(subscription, credits, new_balance, today).await;
                Ok(UserOutcome::ToppedUp)
            }
        }
    }

    async fn notify(
        &self,
        subscription: &ActiveSubscriptionDbModel,
        credits: u32,
        balance: i64,
        today: NaiveDate,
    ) {
        let Some(email) = &self.email else {
            return;
        };
        let payload = JobPayload::Email(EmailJob::CreditTopup {
            to: subscription.email.clone(),
            name: subscription.name.clone(),
            credits,
            balance,
        });
        let options =
            EnqueueOptions::new().with_job_id(format!("topup:{}:{}", subscription.user_id, today));
        if let Err(e) = email.enqueue(&payload, options).await {
            warn!(user_id = %subscription.user_id, error = %e, "Failed to enqueue top-up email");
        }
    }
}

#[async_trait]
impl Processor for SubscriptionRenewalProcessor {
    fn name(&self) -> &'static str {
        "subscription_renewal"
    }

    fn queue(&self) -> QueueName {
        QueueName::SubscriptionRenewal
    }

    async fn process(&self, ctx: &JobContext, payload: JobPayload) -> Result<Option<Value>> {
        let JobPayload::RenewSubscriptions(_) = payload else {
            return Err(Error::permanent(format!(
                "{} cannot run {} jobs",
                self.name(),
                payload.kind()
            )));
        };
        let summary = self.renew(ctx).await?;
        Ok(Some(serde_json::to_value(summary)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::FixedClock;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct FakeSubscriptions {
        active: Vec<ActiveSubscriptionDbModel>,
        failing_users: HashSet<String>,
        applied: Mutex<HashSet<(String, NaiveDate)>>,
        balances: Mutex<HashMap<String, i64>>,
    }

    #[async_trait]
    impl SubscriptionRepository for FakeSubscriptions {
        async fn list_active(&self) -> Result<Vec<ActiveSubscriptionDbModel>> {
            Ok(self.active.clone())
        }

        async fn has_monthly_topup(&self, user_id: &str, granted_on: NaiveDate) -> Result<bool> {
            Ok(self
                .applied
                .lock()
                .contains(&(user_id.to_string(), granted_on)))
        }

        async fn apply_monthly_topup(
            &self,
            user_id: &str,
            credits: u32,
            granted_on: NaiveDate,
        ) -> Result<TopupOutcome> {
            if self.failing_users.contains(user_id) {
                return Err(Error::Other("database is locked".to_string()));
            }
            if !self.applied.lock().insert((user_id.to_string(), granted_on)) {
                return Ok(TopupOutcome::AlreadyApplied);
            }
            let mut balances = self.balances.lock();
            let balance = balances.entry(user_id.to_string()).or_insert(0);
            *balance += i64::from(credits);
            Ok(TopupOutcome::Applied {
                new_balance: *balance,
            })
        }
    }

    fn subscription(user: &str, plan: &str) -> ActiveSubscriptionDbModel {
        ActiveSubscriptionDbModel {
            subscription_id: format!("sub-{}", user),
            user_id: user.to_string(),
            email: format!("{}@example.com", user),
            name: None,
            plan: plan.to_string(),
        }
    }

    fn processor(repo: Arc<FakeSubscriptions>, day: u32) -> SubscriptionRenewalProcessor {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, day, 0, 5, 0).unwrap());
        SubscriptionRenewalProcessor::new(repo, Arc::new(clock))
    }

    fn ctx() -> JobContext {
        JobContext::detached(QueueName::SubscriptionRenewal, "renew-subscriptions")
    }

    #[tokio::test]
    async fn test_skips_outside_first_of_month() {
        let repo = Arc::new(FakeSubscriptions {
            active: vec![subscription("u1", "pro")],
            ..Default::default()
        });
        let summary = processor(repo.clone(), 2).renew(&ctx()).await.unwrap();
        assert!(summary.skipped.is_some());
        assert_eq!(summary.scanned, 0);
        assert!(repo.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_same_day_is_noop() {
        let repo = Arc::new(FakeSubscriptions {
            active: vec![subscription("u1", "pro"), subscription("u2", "starter")],
            ..Default::default()
        });
        let processor = processor(repo.clone(), 1);

        let first = processor.renew(&ctx()).await.unwrap();
        assert_eq!(first.topped_up, 2);
        let second = processor.renew(&ctx()).await.unwrap();
        assert_eq!(second.topped_up, 0);
        assert_eq!(second.already_applied, 2);
        assert_eq!(repo.balances.lock()["u1"], 200);
        assert_eq!(repo.balances.lock()["u2"], 50);
    }

    #[tokio::test]
    async fn test_one_user_failure_does_not_stop_the_run() {
        let repo = Arc::new(FakeSubscriptions {
            active: vec![
                subscription("u1", "pro"),
                subscription("u2", "business"),
                subscription("u3", "platinum"),
            ],
            failing_users: HashSet::from(["u2".to_string()]),
            ..Default::default()
        });
        let summary = processor(repo.clone(), 1).renew(&ctx()).await.unwrap();
        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.topped_up, 1);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[0].starts_with("u2:"));
        assert!(summary.errors[1].starts_with("u3:"));
    }

    #[tokio::test]
    async fn test_all_users_failing_fails_the_job() {
        let repo = Arc::new(FakeSubscriptions {
            active: vec![subscription("u1", "pro")],
            failing_users: HashSet::from(["u1".to_string()]),
            ..Default::default()
        });
        let err = processor(repo, 1).renew(&ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
    }
}
