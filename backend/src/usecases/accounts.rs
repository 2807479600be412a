use std::sync::Arc;

use anyhow::{Context, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::http::StatusCode;
use bff_core::domain::{
    entities::users::InsertUserEntity,
    repositories::users::{EmailAlreadyRegistered, UserRepository},
    value_objects::{enums::subscription_statuses::SubscriptionStatus, users::UserDto},
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::auth::SessionKeys;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserDto,
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("A valid email address is required")]
    InvalidEmail,
    #[error("Password must be at least 8 characters")]
    WeakPassword,
    #[error("An account with this email already exists")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AccountError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AccountError::InvalidEmail | AccountError::WeakPassword => StatusCode::BAD_REQUEST,
            AccountError::EmailTaken => StatusCode::CONFLICT,
            AccountError::InvalidCredentials | AccountError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            AccountError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, AccountError>;

pub struct AccountsUseCase<U>
where
    U: UserRepository + Send + Sync + 'static,
{
    user_repo: Arc<U>,
    session_keys: Arc<SessionKeys>,
}

impl<U> AccountsUseCase<U>
where
    U: UserRepository + Send + Sync + 'static,
{
    pub fn new(user_repo: Arc<U>, session_keys: Arc<SessionKeys>) -> Self {
        Self {
            user_repo,
            session_keys,
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> UseCaseResult<UserDto> {
        let email = normalize_email(&request.email).ok_or(AccountError::InvalidEmail)?;
        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::WeakPassword);
        }

        if self
            .user_repo
            .find_by_email(&email)
            .await
            .map_err(|err| {
                error!(db_error = ?err, "accounts: failed to check existing email");
                AccountError::Internal(err)
            })?
            .is_some()
        {
            info!("accounts: registration for an existing email refused");
            return Err(AccountError::EmailTaken);
        }

        let password_hash = hash_password(request.password).await?;
        let name = request
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let user = self
            .user_repo
            .create_user(InsertUserEntity {
                email,
                name,
                password_hash: Some(password_hash),
                subscription_status: SubscriptionStatus::None.to_string(),
            })
            .await
            .map_err(|err| {
                if err.is::<EmailAlreadyRegistered>() {
                    info!("accounts: concurrent registration for the same email refused");
                    return AccountError::EmailTaken;
                }
                error!(db_error = ?err, "accounts: failed to create user");
                AccountError::Internal(err)
            })?;

        info!(user_id = user.id, "accounts: user registered");
        Ok(UserDto::from(user))
    }

    pub async fn login(&self, request: LoginRequest) -> UseCaseResult<LoginResponse> {
        let email = normalize_email(&request.email).ok_or(AccountError::InvalidCredentials)?;

        let user = self
            .user_repo
            .find_by_email(&email)
            .await
            .map_err(|err| {
                error!(db_error = ?err, "accounts: failed to load user for login");
                AccountError::Internal(err)
            })?
            .ok_or(AccountError::InvalidCredentials)?;

        let Some(stored_hash) = user.password_hash.clone() else {
            warn!(user_id = user.id, "accounts: login for a user without a password");
            return Err(AccountError::InvalidCredentials);
        };

        if !verify_password(request.password, stored_hash).await? {
            info!(user_id = user.id, "accounts: login with wrong password");
            return Err(AccountError::InvalidCredentials);
        }

        let token = self
            .session_keys
            .issue(user.id, Some(user.email.clone()))
            .map_err(|err| {
                error!(user_id = user.id, error = %err, "accounts: failed to issue session token");
                AccountError::Internal(anyhow!(err))
            })?;

        info!(user_id = user.id, "accounts: user logged in");
        Ok(LoginResponse {
            token,
            user: UserDto::from(user),
        })
    }

    pub async fn current_user(&self, user_id: i32) -> UseCaseResult<UserDto> {
        self.user_repo
            .find_by_id(user_id)
            .await
            .map_err(|err| {
                error!(user_id, db_error = ?err, "accounts: failed to load session user");
                AccountError::Internal(err)
            })?
            .map(UserDto::from)
            .ok_or(AccountError::Unauthorized)
    }

    pub fn session_keys(&self) -> &SessionKeys {
        &self.session_keys
    }
}

fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
        return None;
    }
    Some(email)
}

/// Runs on the blocking pool.
async fn hash_password(password: String) -> UseCaseResult<String> {
    let hash = tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("failed to hash password: {err}"))
    })
    .await
    .context("password hashing task failed")??;

    Ok(hash)
}

async fn verify_password(password: String, stored_hash: String) -> UseCaseResult<bool> {
    let verified = tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored_hash)
            .map_err(|err| anyhow!("stored password hash is malformed: {err}"))?;
        Ok::<bool, anyhow::Error>(
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
        )
    })
    .await
    .context("password verification task failed")??;

    Ok(verified)
}
