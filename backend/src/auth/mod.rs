use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    pub sub: String,
    pub email: Option<String>,
    pub iat: usize,
    pub exp: usize,
}

/// The authenticated caller as far as this service is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub user_id: i32,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session token is invalid: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("session subject is not a user id")]
    InvalidSubject,
}

/// Resolves the caller of a request, or nothing.
pub trait SessionProvider: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<SessionUser>;
}

/// HS256 session tokens, carried either as a bearer token or in the session cookie.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    cookie_name: String,
    ttl_seconds: u64,
}

impl SessionKeys {
    pub fn new(secret: &str, cookie_name: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            cookie_name: cookie_name.into(),
            ttl_seconds,
        }
    }

    pub fn issue(&self, user_id: i32, email: Option<String>) -> Result<String, AuthError> {
        let now = Utc::now().timestamp().max(0) as usize;
        let claims = SessionClaims {
            sub: user_id.to_string(),
            email,
            iat: now,
            exp: now + self.ttl_seconds as usize,
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn validate(&self, token: &str) -> Result<SessionUser, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<SessionClaims>(token, &self.decoding, &validation)?;

        let user_id = token_data
            .claims
            .sub
            .parse::<i32>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(AuthError::InvalidSubject)?;

        Ok(SessionUser {
            user_id,
            email: token_data.claims.email,
        })
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), token))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .max_age(time_from_secs(self.ttl_seconds))
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), "")).path("/").build()
    }

    fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        bearer.or_else(|| {
            CookieJar::from_headers(headers)
                .get(&self.cookie_name)
                .map(|cookie| cookie.value().to_string())
                .filter(|token| !token.is_empty())
        })
    }
}

impl SessionProvider for SessionKeys {
    fn resolve(&self, headers: &HeaderMap) -> Option<SessionUser> {
        let token = self.token_from_headers(headers)?;
        match self.validate(&token) {
            Ok(user) => Some(user),
            Err(err) => {
                debug!(error = %err, "auth: rejected session token");
                None
            }
        }
    }
}

fn time_from_secs(secs: u64) -> cookie::time::Duration {
    cookie::time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}
