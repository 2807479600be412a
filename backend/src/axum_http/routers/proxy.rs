use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, Method, Uri, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use bff_core::internal_api::client::InternalApiClient;
use bytes::Bytes;

use crate::{
    auth::SessionProvider,
    usecases::proxy::{BenchmarkBackend, InboundRequest, ProxyUseCase},
};

/// Everything under this prefix is forwarded to the benchmarking backend.
pub const PROXY_PREFIX: &str = "/api/router";

pub struct ProxyRouteState<B>
where
    B: BenchmarkBackend + 'static,
{
    usecase: Arc<ProxyUseCase<B>>,
    sessions: Arc<dyn SessionProvider>,
}

impl<B> Clone for ProxyRouteState<B>
where
    B: BenchmarkBackend + 'static,
{
    fn clone(&self) -> Self {
        Self {
            usecase: Arc::clone(&self.usecase),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

pub fn routes(backend: Arc<InternalApiClient>, sessions: Arc<dyn SessionProvider>) -> Router {
    router(Arc::new(ProxyUseCase::new(backend)), sessions)
}

pub fn router<B>(usecase: Arc<ProxyUseCase<B>>, sessions: Arc<dyn SessionProvider>) -> Router
where
    B: BenchmarkBackend + 'static,
{
    Router::new()
        .route(
            "/*path",
            get(forward::<B>)
                .post(forward::<B>)
                .put(forward::<B>)
                .delete(forward::<B>)
                .patch(forward::<B>),
        )
        .with_state(ProxyRouteState { usecase, sessions })
}

/// The nested router sees the URI with the prefix already stripped and the path
/// still percent-encoded.
pub async fn forward<B>(
    State(state): State<ProxyRouteState<B>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    B: BenchmarkBackend + 'static,
{
    let session = state.sessions.resolve(&headers);
    let inbound = InboundRequest {
        method,
        path: uri.path().trim_start_matches('/').to_string(),
        query: uri.query().map(str::to_string),
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    };

    match state.usecase.forward(session, inbound).await {
        Ok(response) => (response.status, Json(response.body)).into_response(),
        Err(err) => err.into_response(),
    }
}
