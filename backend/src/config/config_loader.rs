use anyhow::{Context, Result};

use super::config_model::{
    App, BackendServer, Database, DotEnvyConfig, InternalApi, Session, Stripe,
};

const DEFAULT_INTERNAL_API_URL: &str = "http://localhost:4000";
const DEFAULT_APP_URL: &str = "http://localhost:3000";
const THIRTY_DAYS_SECS: u64 = 30 * 24 * 60 * 60;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

/// Builds the config from any key lookup; `load` passes the process environment.
pub fn load_from<F>(lookup: F) -> Result<DotEnvyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let required = |key: &str| get(key).with_context(|| format!("{key} is invalid"));

    let backend_server = BackendServer {
        port: parse_or(&get, "SERVER_PORT", 3000)?,
        body_limit: parse_or(&get, "SERVER_BODY_LIMIT", 10)?,
        timeout: parse_or(&get, "SERVER_TIMEOUT", 60)?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
    };

    let session = Session {
        jwt_secret: required("SESSION_JWT_SECRET")?,
        cookie_name: get("SESSION_COOKIE_NAME").unwrap_or_else(|| "bff_session".to_string()),
        ttl_seconds: parse_or(&get, "SESSION_TTL_SECONDS", THIRTY_DAYS_SECS)?,
    };

    let internal_api = InternalApi {
        base_url: get("API_INTERNAL_URL")
            .or_else(|| get("NEXT_PUBLIC_API_URL"))
            .unwrap_or_else(|| DEFAULT_INTERNAL_API_URL.to_string()),
    };

    let stripe = Stripe {
        secret_key: required("STRIPE_SECRET_KEY")?,
        webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
        price_id: required("STRIPE_PRICE_ID")?,
        trial_days: parse_or(&get, "STRIPE_TRIAL_DAYS", 7)?,
    };

    let app = App {
        public_url: get("NEXT_PUBLIC_APP_URL")
            .or_else(|| get("APP_URL"))
            .unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        session,
        internal_api,
        stripe,
        app,
    })
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key} is invalid")),
        None => Ok(default),
    }
}
