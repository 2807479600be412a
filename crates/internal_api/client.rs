use anyhow::{Result, anyhow};
use bytes::Bytes;
use http::{Method, StatusCode};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error};

/// Header the benchmarking backend trusts as the caller's identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// One proxied call, already stripped of everything the backend must not see.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    pub user_id: i32,
    pub method: Method,
    /// Path below `/router/`, still percent-encoded.
    pub path: String,
    pub query: Option<String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn is_json(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_json_content_type)
    }
}

pub fn is_json_content_type(value: &str) -> bool {
    let media_type = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_type == "application/json" || media_type.ends_with("+json")
}

/// HTTP client for the internal benchmarking backend.
pub struct InternalApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl InternalApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}/router/{}", self.base_url, path.trim_start_matches('/'));
        if let Some(query) = query.filter(|query| !query.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    pub async fn forward(&self, request: ProxyRequest) -> Result<BackendResponse> {
        let url = self.target_url(&request.path, request.query.as_deref());
        debug!(
            user_id = request.user_id,
            method = %request.method,
            %url,
            "internal_api: forwarding request"
        );

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(USER_ID_HEADER, request.user_id.to_string());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|err| {
            error!(
                user_id = request.user_id,
                method = %request.method,
                %url,
                error = %err,
                "internal_api: request failed"
            );
            sanitize_reqwest_error(err)
        })?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let body = resp.bytes().await.map_err(|err| {
            error!(%url, error = %err, "internal_api: failed to read response body");
            sanitize_reqwest_error(err)
        })?;

        Ok(BackendResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Client-safe summary; the full error has already been logged.
fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("benchmark backend request timed out");
    }
    if error.is_connect() {
        return anyhow!("benchmark backend is unreachable");
    }
    if error.is_body() || error.is_decode() {
        return anyhow!("benchmark backend response could not be read");
    }
    anyhow!("benchmark backend request failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_joins_base_path_and_query() {
        let client = InternalApiClient::new("http://localhost:4000/");

        assert_eq!(
            client.target_url("dashboard/scores", Some("period=7d&sort=asc")),
            "http://localhost:4000/router/dashboard/scores?period=7d&sort=asc"
        );
        assert_eq!(
            client.target_url("/models", None),
            "http://localhost:4000/router/models"
        );
        assert_eq!(
            client.target_url("models", Some("")),
            "http://localhost:4000/router/models"
        );
    }

    #[test]
    fn target_url_keeps_encoded_segments() {
        let client = InternalApiClient::new("http://backend:4000");

        assert_eq!(
            client.target_url("models/gpt%2F4o/history", None),
            "http://backend:4000/router/models/gpt%2F4o/history"
        );
    }

    #[test]
    fn recognizes_json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/html; charset=utf-8"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn response_without_content_type_is_not_json() {
        let response = BackendResponse {
            status: StatusCode::OK,
            content_type: None,
            body: Bytes::from_static(b"{}"),
        };
        assert!(!response.is_json());
    }
}
