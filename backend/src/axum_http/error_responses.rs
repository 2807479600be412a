use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::usecases::{accounts::AccountError, billing::BillingError, proxy::ProxyError};

#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    message: Option<String>,
) -> Response {
    let body = Json(ErrorResponse {
        error: error.into(),
        message,
    });
    (status, body).into_response()
}

pub fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "Unauthorized", None)
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            ProxyError::Unauthorized => unauthorized(),
            ProxyError::UpstreamProtocol { status: upstream } => error_response(
                status,
                "Backend Error",
                Some(format!(
                    "Backend responded with status {} and a non-JSON body",
                    upstream.as_u16()
                )),
            ),
            other => error_response(status, "Internal Server Error", Some(other.to_string())),
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        // Display strings are client-safe; causes stay in the logs.
        error_response(self.status_code(), self.to_string(), None)
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), self.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{Value, json};

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn non_json_upstream_becomes_backend_error() {
        let response = ProxyError::UpstreamProtocol {
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_json(response).await,
            json!({
                "error": "Backend Error",
                "message": "Backend responded with status 503 and a non-JSON body",
            })
        );
    }

    #[tokio::test]
    async fn unreachable_upstream_is_internal_server_error() {
        let response =
            ProxyError::UpstreamUnreachable("benchmark backend is unreachable".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({
                "error": "Internal Server Error",
                "message": "benchmark backend is unreachable",
            })
        );
    }

    #[tokio::test]
    async fn billing_internal_errors_hide_their_cause() {
        let response =
            BillingError::Internal(anyhow::anyhow!("password authentication failed for user"))
                .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Internal server error" })
        );
    }
}
