use std::fmt::Display;

use chrono::{DateTime, Utc};

use super::enums::subscription_statuses::SubscriptionStatus;

/// The billing columns of a user record, detached from the row so transitions can
/// be computed without a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingState {
    pub stripe_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub subscription_id: Option<String>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// Every mutation the reconciler is allowed to make to a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingTransition {
    AttachCustomer {
        customer_id: String,
    },
    StartTrial {
        subscription_id: String,
    },
    Activate {
        subscription_id: String,
    },
    MarkCanceling {
        subscription_id: String,
        ends_at: DateTime<Utc>,
    },
    DowngradeToFree,
}

impl Display for BillingTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BillingTransition::AttachCustomer { .. } => "attach_customer",
            BillingTransition::StartTrial { .. } => "start_trial",
            BillingTransition::Activate { .. } => "activate",
            BillingTransition::MarkCanceling { .. } => "mark_canceling",
            BillingTransition::DowngradeToFree => "downgrade_to_free",
        };
        write!(f, "{}", name)
    }
}

impl BillingState {
    /// Computes the state after `transition`. Applying the same transition to its own
    /// output returns that output unchanged.
    pub fn apply(&self, transition: &BillingTransition) -> BillingState {
        let mut next = self.clone();

        match transition {
            BillingTransition::AttachCustomer { customer_id } => {
                // A customer id is assigned once and then stays put.
                if next.stripe_customer_id.is_none() {
                    next.stripe_customer_id = Some(customer_id.clone());
                }
            }
            BillingTransition::StartTrial { subscription_id } => {
                // A late `created` must not pull an already paying user back to trialing.
                if matches!(
                    self.status,
                    SubscriptionStatus::None
                        | SubscriptionStatus::Canceled
                        | SubscriptionStatus::Trialing
                ) {
                    next.status = SubscriptionStatus::Trialing;
                    next.subscription_id = Some(subscription_id.clone());
                    next.ends_at = None;
                }
            }
            BillingTransition::Activate { subscription_id } => {
                next.status = SubscriptionStatus::Active;
                next.subscription_id = Some(subscription_id.clone());
                next.ends_at = None;
            }
            BillingTransition::MarkCanceling {
                subscription_id,
                ends_at,
            } => {
                if matches!(
                    self.status,
                    SubscriptionStatus::Active
                        | SubscriptionStatus::Trialing
                        | SubscriptionStatus::Canceling
                ) {
                    next.status = SubscriptionStatus::Canceling;
                    next.subscription_id = Some(subscription_id.clone());
                    next.ends_at = Some(*ends_at);
                }
            }
            BillingTransition::DowngradeToFree => {
                next.status = SubscriptionStatus::Canceled;
                next.ends_at = None;
            }
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state(status: SubscriptionStatus, subscription_id: Option<&str>) -> BillingState {
        BillingState {
            stripe_customer_id: Some("cus_abc".to_string()),
            status,
            subscription_id: subscription_id.map(str::to_string),
            ends_at: None,
        }
    }

    fn period_end() -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600, 0).single().unwrap()
    }

    #[test]
    fn attach_customer_only_fills_an_empty_slot() {
        let empty = BillingState::default();
        let attached = empty.apply(&BillingTransition::AttachCustomer {
            customer_id: "cus_abc".to_string(),
        });
        assert_eq!(attached.stripe_customer_id.as_deref(), Some("cus_abc"));
        assert_eq!(attached.status, SubscriptionStatus::None);

        let overwritten = attached.apply(&BillingTransition::AttachCustomer {
            customer_id: "cus_other".to_string(),
        });
        assert_eq!(overwritten, attached);
    }

    #[test]
    fn start_trial_moves_a_free_user_to_trialing() {
        let next = state(SubscriptionStatus::None, None).apply(&BillingTransition::StartTrial {
            subscription_id: "sub_1".to_string(),
        });
        assert_eq!(next.status, SubscriptionStatus::Trialing);
        assert_eq!(next.subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn start_trial_does_not_demote_an_active_user() {
        let active = state(SubscriptionStatus::Active, Some("sub_1"));
        let next = active.apply(&BillingTransition::StartTrial {
            subscription_id: "sub_1".to_string(),
        });
        assert_eq!(next, active);
    }

    #[test]
    fn activate_supersedes_trialing_and_clears_end_date() {
        let mut canceling = state(SubscriptionStatus::Canceling, Some("sub_1"));
        canceling.ends_at = Some(period_end());

        let next = canceling.apply(&BillingTransition::Activate {
            subscription_id: "sub_1".to_string(),
        });
        assert_eq!(next.status, SubscriptionStatus::Active);
        assert_eq!(next.ends_at, None);
    }

    #[test]
    fn mark_canceling_records_the_period_end() {
        let next = state(SubscriptionStatus::Active, Some("sub_1")).apply(
            &BillingTransition::MarkCanceling {
                subscription_id: "sub_1".to_string(),
                ends_at: period_end(),
            },
        );
        assert_eq!(next.status, SubscriptionStatus::Canceling);
        assert_eq!(next.ends_at, Some(period_end()));
    }

    #[test]
    fn mark_canceling_ignores_users_without_a_subscription() {
        let free = state(SubscriptionStatus::None, None);
        let next = free.apply(&BillingTransition::MarkCanceling {
            subscription_id: "sub_1".to_string(),
            ends_at: period_end(),
        });
        assert_eq!(next, free);
    }

    #[test]
    fn downgrade_keeps_the_subscription_reference() {
        let next = state(SubscriptionStatus::Active, Some("sub_1"))
            .apply(&BillingTransition::DowngradeToFree);
        assert_eq!(next.status, SubscriptionStatus::Canceled);
        assert_eq!(next.subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn every_transition_is_idempotent() {
        let transitions = [
            BillingTransition::AttachCustomer {
                customer_id: "cus_abc".to_string(),
            },
            BillingTransition::StartTrial {
                subscription_id: "sub_1".to_string(),
            },
            BillingTransition::Activate {
                subscription_id: "sub_1".to_string(),
            },
            BillingTransition::MarkCanceling {
                subscription_id: "sub_1".to_string(),
                ends_at: period_end(),
            },
            BillingTransition::DowngradeToFree,
        ];
        let starts = [
            SubscriptionStatus::None,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::Canceling,
            SubscriptionStatus::Canceled,
        ];

        for start in starts {
            for transition in &transitions {
                let once = state(start, Some("sub_1")).apply(transition);
                let twice = once.apply(transition);
                assert_eq!(once, twice, "{transition} from {start}");
            }
        }

        for transition in &transitions {
            let once = state(SubscriptionStatus::None, None).apply(transition);
            let twice = once.apply(transition);
            assert_eq!(once, twice, "{transition} from a free user");
        }
    }

    #[test]
    fn downgrade_cancels_a_customer_that_never_subscribed() {
        let attached = BillingState {
            stripe_customer_id: Some("cus_abc".to_string()),
            ..Default::default()
        };
        let next = attached.apply(&BillingTransition::DowngradeToFree);
        assert_eq!(next.status, SubscriptionStatus::Canceled);
        assert_eq!(next.ends_at, None);
        assert_eq!(next.stripe_customer_id.as_deref(), Some("cus_abc"));
    }
}
