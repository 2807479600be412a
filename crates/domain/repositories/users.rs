use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

use crate::domain::{
    entities::users::{InsertUserEntity, UserEntity},
    value_objects::billing::BillingTransition,
};

/// Returned by `create_user` when the email is already registered.
#[derive(Debug, Error)]
#[error("email is already registered")]
pub struct EmailAlreadyRegistered;

#[automock]
#[async_trait]
pub trait UserRepository {
    async fn find_by_id(&self, user_id: i32) -> Result<Option<UserEntity>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>>;

    async fn find_by_stripe_customer_id(&self, customer_id: &str) -> Result<Option<UserEntity>>;

    async fn create_user(&self, insert_user_entity: InsertUserEntity) -> Result<UserEntity>;

    /// Applies `transition` to the user's current billing state atomically and returns
    /// the resulting record. Implementations must serialize concurrent calls for the
    /// same user and skip the write when nothing changes.
    async fn apply_billing_transition(
        &self,
        user_id: i32,
        transition: BillingTransition,
    ) -> Result<UserEntity>;
}
