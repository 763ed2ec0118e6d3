use serde::{Deserialize, Serialize};

/// Subscription plan tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    Pro,
    Business,
}

impl PlanTier {
    /// Credits granted on each monthly renewal.
    pub fn monthly_credits(&self) -> u32 {
        match self {
            Self::Starter => 50,
            Self::Pro => 200,
            Self::Business => 600,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Starter => "Starter",
            Self::Pro => "Pro",
            Self::Business => "Business",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_monthly_credits_grow_with_tier() {
        assert!(PlanTier::Starter.monthly_credits() < PlanTier::Pro.monthly_credits());
        assert!(PlanTier::Pro.monthly_credits() < PlanTier::Business.monthly_credits());
    }

    #[test]
    fn test_plan_parse() {
        assert_eq!(PlanTier::from_str("pro").unwrap(), PlanTier::Pro);
        assert_eq!(PlanTier::Business.to_string(), "business");
        assert!(PlanTier::from_str("enterprise").is_err());
    }
}
