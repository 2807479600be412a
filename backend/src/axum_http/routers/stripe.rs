use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use bff_core::{
    domain::repositories::users::UserRepository,
    infra::db::{postgres::postgres_connection::PgPoolSquad, repositories::users::UserPostgres},
    payments::stripe_client::StripeClient,
};
use bytes::Bytes;
use serde_json::json;
use tracing::info;

use crate::{
    auth::SessionProvider,
    axum_http::error_responses::unauthorized,
    config::config_model::App,
    usecases::billing::{BillingSettings, BillingUseCase, StripeGateway},
};

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub struct StripeRouteState<U, G>
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    usecase: Arc<BillingUseCase<U, G>>,
    sessions: Arc<dyn SessionProvider>,
    app: App,
}

impl<U, G> Clone for StripeRouteState<U, G>
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    fn clone(&self) -> Self {
        Self {
            usecase: Arc::clone(&self.usecase),
            sessions: Arc::clone(&self.sessions),
            app: self.app.clone(),
        }
    }
}

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    stripe_client: Arc<StripeClient>,
    sessions: Arc<dyn SessionProvider>,
    settings: BillingSettings,
    app: App,
) -> Router {
    let user_repository = UserPostgres::new(Arc::clone(&db_pool));
    let usecase = BillingUseCase::new(Arc::new(user_repository), stripe_client, settings);

    router(Arc::new(usecase), sessions, app)
}

pub fn router<U, G>(
    usecase: Arc<BillingUseCase<U, G>>,
    sessions: Arc<dyn SessionProvider>,
    app: App,
) -> Router
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    Router::new()
        .route("/webhook", post(stripe_webhook::<U, G>))
        .route(
            "/portal",
            get(portal_redirect::<U, G>).post(portal_session::<U, G>),
        )
        .route("/checkout", post(checkout_session::<U, G>))
        .with_state(StripeRouteState {
            usecase,
            sessions,
            app,
        })
}

/// The body is taken as raw bytes: the signature covers the exact payload.
pub async fn stripe_webhook<U, G>(
    State(state): State<StripeRouteState<U, G>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.usecase.handle_stripe_webhook(&body, signature).await {
        Ok(_) => Json(json!({ "received": true })).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn portal_redirect<U, G>(
    State(state): State<StripeRouteState<U, G>>,
    headers: HeaderMap,
) -> Response
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let Some(session) = state.sessions.resolve(&headers) else {
        info!("stripe router: portal requested without session, redirecting to sign in");
        return Redirect::to(&state.app.url("/auth/signin")).into_response();
    };

    match state.usecase.create_portal_session(session.user_id).await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(err) => {
            let target = format!(
                "{}?error={}",
                state.app.url("/dashboard"),
                err.redirect_code()
            );
            Redirect::to(&target).into_response()
        }
    }
}

pub async fn portal_session<U, G>(
    State(state): State<StripeRouteState<U, G>>,
    headers: HeaderMap,
) -> Response
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let Some(session) = state.sessions.resolve(&headers) else {
        return unauthorized();
    };

    match state.usecase.create_portal_session(session.user_id).await {
        Ok(url) => Json(json!({ "url": url })).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn checkout_session<U, G>(
    State(state): State<StripeRouteState<U, G>>,
    headers: HeaderMap,
) -> Response
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    let Some(session) = state.sessions.resolve(&headers) else {
        return unauthorized();
    };

    match state.usecase.create_checkout_session(session.user_id).await {
        Ok(url) => Json(json!({ "url": url })).into_response(),
        Err(err) => err.into_response(),
    }
}
