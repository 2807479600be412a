mod alerts;
mod config;
mod layer;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use alerts::{AlertDispatcher, AlertSink, WebhookAlertSink};
use config::ObservabilityConfig;
use layer::AlertLayer;

/// Installs the global subscriber: `RUST_LOG`-filtered fmt output plus the optional
/// alert webhook. Must run inside the tokio runtime.
pub fn init_observability(component: &str) -> Result<()> {
    let config = ObservabilityConfig::from_env(component);

    let alert_layer = match config.alerts.as_ref() {
        Some(alerts) => {
            let sink: Arc<dyn AlertSink> =
                Arc::new(WebhookAlertSink::new(alerts.webhook_url.clone())?);
            let dispatcher = AlertDispatcher::spawn(vec![sink]);
            Some(
                AlertLayer::new(dispatcher, config.service_context.clone(), alerts.min_level)
                    .with_filter(LevelFilter::from_level(alerts.min_level)),
            )
        }
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Local time so `TZ=...` deployments show their offset.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    let context = &config.service_context;
    for warning in &config.warnings {
        warn!(
            service = %context.service_name,
            environment = %context.environment,
            component = %context.component,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %context.service_name,
        environment = %context.environment,
        component = %context.component,
        alerts_enabled = config.alerts.is_some(),
        "observability: tracing initialized"
    );

    Ok(())
}
