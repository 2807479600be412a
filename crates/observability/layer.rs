use std::collections::BTreeMap;

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use super::alerts::{ALERTS_TARGET, AlertDispatcher, AlertEvent};
use super::config::ServiceContext;

const SENSITIVE_MARKERS: [&str; 7] = [
    "secret",
    "password",
    "token",
    "authorization",
    "cookie",
    "signature",
    "webhook_url",
];

/// Forwards events at or above `min_level` to the alert dispatcher.
pub(crate) struct AlertLayer {
    dispatcher: AlertDispatcher,
    context: ServiceContext,
    min_level: Level,
}

impl AlertLayer {
    pub(crate) fn new(dispatcher: AlertDispatcher, context: ServiceContext, min_level: Level) -> Self {
        Self {
            dispatcher,
            context,
            min_level,
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    values: BTreeMap<String, String>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        let name = field.name();
        let value = if is_sensitive(name) {
            "[REDACTED]".to_string()
        } else {
            value
        };
        self.values.insert(name.to_string(), value);
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Level ordering in tracing: ERROR is the "smallest".
        if *metadata.level() > self.min_level || metadata.target().starts_with(ALERTS_TARGET) {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let message = collector.values.remove("message");

        let spans = ctx
            .event_span(event)
            .map(|span| {
                span.scope()
                    .from_root()
                    .map(|s| s.metadata().name().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        self.dispatcher.dispatch(AlertEvent {
            level: *metadata.level(),
            timestamp: Utc::now(),
            context: self.context.clone(),
            target: metadata.target().to_string(),
            message,
            fields: collector.values,
            spans,
        });
    }
}

fn is_sensitive(field_name: &str) -> bool {
    let field = field_name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| field.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials_and_signatures() {
        for name in [
            "stripe_secret_key",
            "password",
            "session_token",
            "authorization",
            "cookie",
            "signature",
            "alert_webhook_url",
        ] {
            assert!(is_sensitive(name), "{name}");
        }
    }

    #[test]
    fn keeps_ordinary_fields() {
        for name in ["user_id", "event_type", "status", "customer_id", "url"] {
            assert!(!is_sensitive(name), "{name}");
        }
    }
}
