use sqlx::FromRow;

/// An active subscription joined with its owner, as read by the renewal sweep.
#[derive(Debug, Clone, FromRow)]
pub struct ActiveSubscriptionDbModel {
    pub subscription_id: String,
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    /// starter, pro, business
    pub plan: String,
}

impl ActiveSubscriptionDbModel {
    pub fn plan_tier(&self) -> crate::Result<crate::domain::PlanTier> {
        self.plan.parse().map_err(|_| {
            crate::Error::validation(format!(
                "subscription {} has unknown plan '{}'",
                self.subscription_id, self.plan
            ))
        })
    }
}
