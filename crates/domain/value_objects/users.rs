use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::domain::{
    entities::users::UserEntity, value_objects::enums::subscription_statuses::SubscriptionStatus,
};

/// What the browser gets to see of a user record.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: i32,
    pub email: String,
    pub name: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub subscription_ends_at: Option<String>,
    pub has_billing_account: bool,
}

impl From<UserEntity> for UserDto {
    fn from(value: UserEntity) -> Self {
        Self {
            id: value.id,
            subscription_status: SubscriptionStatus::from_str(&value.subscription_status),
            subscription_ends_at: value.subscription_ends_at.map(iso_timestamp),
            has_billing_account: value.stripe_customer_id.is_some(),
            email: value.email,
            name: value.name,
        }
    }
}

pub fn iso_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
