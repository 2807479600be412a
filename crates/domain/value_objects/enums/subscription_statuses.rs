use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Billing lifecycle of a user. `None` is the free tier nobody has paid for yet,
/// `Canceled` is a former subscriber downgraded back to free.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    None,
    Trialing,
    Active,
    Canceling,
    Canceled,
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceling => "canceling",
            SubscriptionStatus::Canceled => "canceled",
        };
        write!(f, "{}", status)
    }
}

impl SubscriptionStatus {
    pub fn from_str(value: &str) -> Self {
        match value {
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "canceling" => SubscriptionStatus::Canceling,
            "canceled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::None,
        }
    }

    /// Whether the user currently has paid access.
    pub fn has_access(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trialing | SubscriptionStatus::Active | SubscriptionStatus::Canceling
        )
    }
}
