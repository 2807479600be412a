use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::{
    domain::value_objects::{
        billing::BillingState, enums::subscription_statuses::SubscriptionStatus,
    },
    infra::db::postgres::schema::users,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = users)]
pub struct UserEntity {
    pub id: i32,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub subscription_status: String,
    pub subscription_id: Option<String>,
    pub subscription_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserEntity {
    pub fn billing_state(&self) -> BillingState {
        BillingState {
            stripe_customer_id: self.stripe_customer_id.clone(),
            status: SubscriptionStatus::from_str(&self.subscription_status),
            subscription_id: self.subscription_id.clone(),
            ends_at: self.subscription_ends_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct InsertUserEntity {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub subscription_status: String,
}

/// Full billing column set; `None` writes NULL so a cleared end date really clears.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users, treat_none_as_null = true)]
pub struct UpdateUserBillingEntity {
    pub stripe_customer_id: Option<String>,
    pub subscription_status: String,
    pub subscription_id: Option<String>,
    pub subscription_ends_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateUserBillingEntity {
    pub fn from_state(state: &BillingState, now: DateTime<Utc>) -> Self {
        Self {
            stripe_customer_id: state.stripe_customer_id.clone(),
            subscription_status: state.status.to_string(),
            subscription_id: state.subscription_id.clone(),
            subscription_ends_at: state.ends_at,
            updated_at: now,
        }
    }
}
