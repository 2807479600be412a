use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use diesel::{
    OptionalExtension, RunQueryDsl, insert_into,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    update,
};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::users},
};
use domain::{
    entities::users::{InsertUserEntity, UpdateUserBillingEntity, UserEntity},
    repositories::users::{EmailAlreadyRegistered, UserRepository},
    value_objects::billing::BillingTransition,
};

pub struct UserPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UserPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserRepository for UserPostgres {
    async fn find_by_id(&self, user_id: i32) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = users::table
            .filter(users::id.eq(user_id))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = users::table
            .filter(users::email.eq(email.trim().to_lowercase()))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(user)
    }

    async fn find_by_stripe_customer_id(&self, customer_id: &str) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = users::table
            .filter(users::stripe_customer_id.eq(customer_id))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(user)
    }

    async fn create_user(&self, insert_user_entity: InsertUserEntity) -> Result<UserEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = insert_into(users::table)
            .values(&insert_user_entity)
            .returning(UserEntity::as_returning())
            .get_result::<UserEntity>(&mut conn)
            .map_err(create_user_error)?;

        Ok(user)
    }

    async fn apply_billing_transition(
        &self,
        user_id: i32,
        transition: BillingTransition,
    ) -> Result<UserEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        conn.transaction::<UserEntity, anyhow::Error, _>(|conn| {
            // Row lock serializes concurrent webhook deliveries for the same user.
            let current = users::table
                .filter(users::id.eq(user_id))
                .select(UserEntity::as_select())
                .for_update()
                .first::<UserEntity>(conn)
                .optional()?
                .with_context(|| format!("user {user_id} not found"))?;

            let state = current.billing_state();
            let next = state.apply(&transition);
            if next == state {
                return Ok(current);
            }

            let changes = UpdateUserBillingEntity::from_state(&next, Utc::now());
            let updated = update(users::table.filter(users::id.eq(user_id)))
                .set(&changes)
                .returning(UserEntity::as_returning())
                .get_result::<UserEntity>(conn)?;

            Ok(updated)
        })
    }
}

fn create_user_error(err: DieselError) -> anyhow::Error {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            EmailAlreadyRegistered.into()
        }
        other => other.into(),
    }
}
