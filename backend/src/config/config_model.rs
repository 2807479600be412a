#[derive(Debug, Clone, PartialEq)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub session: Session,
    pub internal_api: InternalApi,
    pub stripe: Stripe,
    pub app: App,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendServer {
    pub port: u16,
    /// MiB.
    pub body_limit: u64,
    /// Seconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub jwt_secret: String,
    pub cookie_name: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalApi {
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_id: String,
    pub trial_days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct App {
    pub public_url: String,
}

impl App {
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.public_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
