use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bff_core::internal_api::client::{
    BackendResponse, InternalApiClient, ProxyRequest, is_json_content_type,
};
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::auth::SessionUser;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BenchmarkBackend: Send + Sync {
    async fn forward(&self, request: ProxyRequest) -> AnyResult<BackendResponse>;
}

#[async_trait]
impl BenchmarkBackend for InternalApiClient {
    async fn forward(&self, request: ProxyRequest) -> AnyResult<BackendResponse> {
        self.forward(request).await
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Backend returned a non-JSON response")]
    UpstreamProtocol { status: StatusCode },
    #[error("{0}")]
    InvalidRequestBody(String),
    #[error("{0}")]
    UpstreamUnreachable(String),
    #[error("Backend returned malformed JSON")]
    MalformedUpstreamJson,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::UpstreamProtocol { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequestBody(_)
            | ProxyError::UpstreamUnreachable(_)
            | ProxyError::MalformedUpstreamJson => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An inbound `/api/router/*` call after routing, before authentication.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub struct ProxyUseCase<B>
where
    B: BenchmarkBackend + 'static,
{
    backend: Arc<B>,
}

impl<B> ProxyUseCase<B>
where
    B: BenchmarkBackend + 'static,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub async fn forward(
        &self,
        session: Option<SessionUser>,
        inbound: InboundRequest,
    ) -> Result<ProxiedResponse, ProxyError> {
        let Some(session) = session else {
            info!(
                method = %inbound.method,
                path = %inbound.path,
                "proxy: rejected request without session"
            );
            return Err(ProxyError::Unauthorized);
        };
        let user_id = session.user_id;

        let body = Self::forwarded_body(&inbound).map_err(|err| {
            warn!(
                user_id,
                method = %inbound.method,
                path = %inbound.path,
                error = %err,
                "proxy: inbound body is not valid JSON"
            );
            ProxyError::InvalidRequestBody("Request body is not valid JSON".to_string())
        })?;

        let request = ProxyRequest {
            user_id,
            method: inbound.method.clone(),
            path: inbound.path.clone(),
            query: inbound.query.clone(),
            body,
        };

        let response = self.backend.forward(request).await.map_err(|err| {
            error!(
                user_id,
                method = %inbound.method,
                path = %inbound.path,
                error = %err,
                "proxy: backend call failed"
            );
            ProxyError::UpstreamUnreachable(err.to_string())
        })?;

        // HEAD answers carry headers only.
        if inbound.method == Method::HEAD {
            return Ok(ProxiedResponse {
                status: response.status,
                body: Value::Null,
            });
        }

        if !response.is_json() {
            warn!(
                user_id,
                path = %inbound.path,
                backend_status = response.status.as_u16(),
                content_type = ?response.content_type,
                "proxy: backend answered with a non-JSON body"
            );
            return Err(ProxyError::UpstreamProtocol {
                status: response.status,
            });
        }

        let body: Value = serde_json::from_slice(&response.body).map_err(|err| {
            error!(
                user_id,
                path = %inbound.path,
                backend_status = response.status.as_u16(),
                error = %err,
                "proxy: backend JSON could not be parsed"
            );
            ProxyError::MalformedUpstreamJson
        })?;

        debug!(
            user_id,
            path = %inbound.path,
            status = response.status.as_u16(),
            "proxy: relayed backend response"
        );

        Ok(ProxiedResponse {
            status: response.status,
            body,
        })
    }

    /// Bodies only travel on non-GET/HEAD JSON requests; an empty body means none.
    fn forwarded_body(inbound: &InboundRequest) -> Result<Option<Value>, serde_json::Error> {
        if inbound.method == Method::GET || inbound.method == Method::HEAD {
            return Ok(None);
        }
        let is_json = inbound
            .content_type
            .as_deref()
            .is_some_and(is_json_content_type);
        if !is_json || inbound.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&inbound.body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::function;
    use serde_json::json;

    fn session(user_id: i32) -> Option<SessionUser> {
        Some(SessionUser {
            user_id,
            email: Some("ada@example.com".to_string()),
        })
    }

    fn inbound(method: Method, path: &str, content_type: Option<&str>, body: &str) -> InboundRequest {
        InboundRequest {
            method,
            path: path.to_string(),
            query: None,
            content_type: content_type.map(str::to_string),
            body: Bytes::from(body.to_string()),
        }
    }

    fn json_response(status: StatusCode, body: &str) -> BackendResponse {
        BackendResponse {
            status,
            content_type: Some("application/json; charset=utf-8".to_string()),
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn rejects_anonymous_calls_without_contacting_backend() {
        let mut backend = MockBenchmarkBackend::new();
        backend.expect_forward().times(0);

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let err = usecase
            .forward(None, inbound(Method::GET, "dashboard/scores", None, ""))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::Unauthorized));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forwards_identity_query_and_relays_status() {
        let mut backend = MockBenchmarkBackend::new();
        backend
            .expect_forward()
            .with(function(|request: &ProxyRequest| {
                request.user_id == 42
                    && request.method == Method::GET
                    && request.path == "dashboard/scores"
                    && request.query.as_deref() == Some("period=7d")
                    && request.body.is_none()
            }))
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::CREATED, r#"{"scores":[1,2]}"#)));

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let mut request = inbound(Method::GET, "dashboard/scores", None, "");
        request.query = Some("period=7d".to_string());

        let response = usecase.forward(session(42), request).await.unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, json!({ "scores": [1, 2] }));
    }

    #[tokio::test]
    async fn reserializes_json_bodies_on_writes() {
        let mut backend = MockBenchmarkBackend::new();
        backend
            .expect_forward()
            .with(function(|request: &ProxyRequest| {
                request.method == Method::POST && request.body == Some(json!({ "model": "gpt" }))
            }))
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, r#"{"ok":true}"#)));

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let response = usecase
            .forward(
                session(42),
                inbound(
                    Method::POST,
                    "benchmarks",
                    Some("application/json"),
                    r#"  {"model": "gpt"} "#,
                ),
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_json_body_is_forwarded_as_no_body() {
        let mut backend = MockBenchmarkBackend::new();
        backend
            .expect_forward()
            .with(function(|request: &ProxyRequest| request.body.is_none()))
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, "{}")));

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let result = usecase
            .forward(
                session(42),
                inbound(Method::DELETE, "alerts/7", Some("application/json"), ""),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn malformed_inbound_json_fails_before_forwarding() {
        let mut backend = MockBenchmarkBackend::new();
        backend.expect_forward().times(0);

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let err = usecase
            .forward(
                session(42),
                inbound(Method::PUT, "alerts/7", Some("application/json"), "{oops"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn non_json_backend_response_is_bad_gateway() {
        let mut backend = MockBenchmarkBackend::new();
        backend.expect_forward().times(1).returning(|_| {
            Ok(BackendResponse {
                status: StatusCode::OK,
                content_type: Some("text/html".to_string()),
                body: Bytes::from_static(b"<html>not json{"),
            })
        });

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let err = usecase
            .forward(session(42), inbound(Method::GET, "dashboard", None, ""))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProxyError::UpstreamProtocol {
                status: StatusCode::OK
            }
        ));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unreachable_backend_is_internal_error_with_sanitized_message() {
        let mut backend = MockBenchmarkBackend::new();
        backend
            .expect_forward()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("benchmark backend is unreachable")));

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let err = usecase
            .forward(session(42), inbound(Method::GET, "dashboard", None, ""))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "benchmark backend is unreachable");
    }

    #[tokio::test]
    async fn head_requests_relay_status_without_parsing_the_body() {
        let mut backend = MockBenchmarkBackend::new();
        backend
            .expect_forward()
            .with(function(|request: &ProxyRequest| {
                request.method == Method::HEAD && request.body.is_none()
            }))
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, "")));

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let response = usecase
            .forward(
                session(42),
                inbound(Method::HEAD, "dashboard", Some("application/json"), ""),
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn malformed_backend_json_is_internal_error() {
        let mut backend = MockBenchmarkBackend::new();
        backend
            .expect_forward()
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, "{not json")));

        let usecase = ProxyUseCase::new(Arc::new(backend));
        let err = usecase
            .forward(session(42), inbound(Method::GET, "dashboard", None, ""))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::MalformedUpstreamJson));
    }
}
