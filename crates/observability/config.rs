use tracing::Level;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AlertConfig {
    pub(crate) webhook_url: Url,
    pub(crate) min_level: Level,
}

#[derive(Debug, Clone)]
pub(crate) struct ObservabilityConfig {
    pub(crate) service_context: ServiceContext,
    pub(crate) alerts: Option<AlertConfig>,
    /// Parse problems, logged once tracing is up.
    pub(crate) warnings: Vec<String>,
}

impl ObservabilityConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        Self::from_lookup(component, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(component: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let component = component.trim().to_string();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let service_context = ServiceContext {
            service_name: non_empty("SERVICE_NAME").unwrap_or_else(|| component.clone()),
            environment: non_empty("STAGE").unwrap_or_else(|| "unknown".to_string()),
            component,
        };

        let mut warnings = Vec::new();
        let alerts = alerts_from_lookup(&non_empty, &mut warnings);

        Self {
            service_context,
            alerts,
            warnings,
        }
    }
}

fn alerts_from_lookup<F>(lookup: &F, warnings: &mut Vec<String>) -> Option<AlertConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let enabled = match lookup("ALERTS_ENABLED") {
        Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
            warnings.push(format!("ALERTS_ENABLED is invalid (value: {raw}); assuming true"));
            true
        }),
        None => true,
    };
    if !enabled {
        return None;
    }

    let raw_url = lookup("ALERT_WEBHOOK_URL")?;
    let webhook_url = match Url::parse(raw_url.trim()) {
        Ok(url) => url,
        Err(err) => {
            // The URL embeds a secret token, so only the parse error is reported.
            warnings.push(format!(
                "ALERT_WEBHOOK_URL is set but invalid; alerts disabled (parse error: {err})"
            ));
            return None;
        }
    };

    let min_level = match lookup("ALERT_MIN_LEVEL") {
        Some(raw) => parse_level(&raw).unwrap_or_else(|| {
            warnings.push(format!(
                "ALERT_MIN_LEVEL is invalid (value: {raw}); defaulting to ERROR"
            ));
            Level::ERROR
        }),
        None => Level::ERROR,
    };

    Some(AlertConfig {
        webhook_url,
        min_level,
    })
}

pub(crate) fn parse_level(input: &str) -> Option<Level> {
    match input.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> ObservabilityConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservabilityConfig::from_lookup("bff", |key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_alert_url() {
        let config = config(&[]);
        assert_eq!(config.service_context.service_name, "bff");
        assert_eq!(config.service_context.environment, "unknown");
        assert!(config.alerts.is_none());
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn alerts_enabled_with_valid_url() {
        let config = config(&[
            ("ALERT_WEBHOOK_URL", "https://hooks.example.com/services/T000/B000"),
            ("ALERT_MIN_LEVEL", "warn"),
            ("STAGE", "production"),
        ]);
        let alerts = config.alerts.expect("alerts configured");
        assert_eq!(alerts.min_level, Level::WARN);
        assert_eq!(config.service_context.environment, "production");
    }

    #[test]
    fn invalid_url_disables_alerts_with_a_warning() {
        let config = config(&[("ALERT_WEBHOOK_URL", "not a url")]);
        assert!(config.alerts.is_none());
        assert_eq!(config.warnings.len(), 1);
        assert!(!config.warnings[0].contains("not a url"));
    }

    #[test]
    fn explicit_opt_out_wins_over_url() {
        let config = config(&[
            ("ALERTS_ENABLED", "off"),
            ("ALERT_WEBHOOK_URL", "https://hooks.example.com/x"),
        ]);
        assert!(config.alerts.is_none());
    }

    #[test]
    fn bad_level_falls_back_to_error() {
        let config = config(&[
            ("ALERT_WEBHOOK_URL", "https://hooks.example.com/x"),
            ("ALERT_MIN_LEVEL", "loud"),
        ]);
        assert_eq!(config.alerts.unwrap().min_level, Level::ERROR);
        assert_eq!(config.warnings.len(), 1);
    }
}
