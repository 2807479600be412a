use crate::{
    auth::{SessionKeys, SessionProvider},
    axum_http::{
        default_routers,
        routers::{self, proxy::PROXY_PREFIX},
    },
    config::config_model::DotEnvyConfig,
    usecases::billing::BillingSettings,
};
use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use bff_core::{
    infra::db::postgres::postgres_connection::PgPoolSquad,
    internal_api::client::InternalApiClient, payments::stripe_client::StripeClient,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let session_keys = Arc::new(SessionKeys::new(
        &config.session.jwt_secret,
        config.session.cookie_name.clone(),
        config.session.ttl_seconds,
    ));
    let sessions: Arc<dyn SessionProvider> = session_keys.clone();

    let internal_api = Arc::new(InternalApiClient::new(config.internal_api.base_url.clone()));
    let stripe_client = Arc::new(StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.app.url("/dashboard?checkout=success"),
        config.app.url("/pricing?checkout=canceled"),
    ));
    let billing_settings = BillingSettings {
        price_id: config.stripe.price_id.clone(),
        trial_days: config.stripe.trial_days,
        portal_return_url: config.app.url("/dashboard"),
    };

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            PROXY_PREFIX,
            routers::proxy::routes(internal_api, Arc::clone(&sessions)),
        )
        .nest(
            "/api/stripe",
            routers::stripe::routes(
                Arc::clone(&db_pool),
                stripe_client,
                Arc::clone(&sessions),
                billing_settings,
                config.app.clone(),
            ),
        )
        .nest(
            "/api/auth",
            routers::auth::routes(Arc::clone(&db_pool), session_keys),
        )
        .route("/api/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::PUT,
                    Method::DELETE,
                ])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        port = config.backend_server.port,
        internal_api = %config.internal_api.base_url,
        "http: server is running"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "http: failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "http: failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("http: received ctrl+C signal"),
        _ = terminate => info!("http: received terminate signal"),
    }
}
