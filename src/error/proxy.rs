use super::IsRetryable;
use super::oauth::OauthError;
use axum::{Json, http::StatusCode, response::IntoResponse};
use gravitas_schema::anthropic::ErrorBody;
use std::time::Duration;
use thiserror::Error as ThisError;

/// Proxy-wide error taxonomy.
///
/// Every error visible to a client carries an HTTP status (or, once a
/// stream is committed, an in-band `stop_reason:"error"`), a short
/// machine-readable type, and a human message.
#[derive(Debug, ThisError)]
pub enum ProxyError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Failed to bind listener: {0}")]
    BindFailed(String),

    #[error("No authenticated account; run the OAuth login flow first")]
    AuthRequired,

    #[error("Upstream authentication failed: {0}")]
    AuthFailed(String),

    #[error("Token store is corrupt: {0}")]
    TokenStoreCorrupt(String),

    #[error("Upstream rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("No upstream endpoint currently available")]
    EndpointUnavailable,

    #[error("Upstream error with status {status}: {body:.200}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("Malformed upstream chunk: {0}")]
    MalformedChunk(String),

    #[error("Tool '{tool}' has an invalid input schema: {message}")]
    SchemaInvalid { tool: String, message: String },

    #[error("Tool call arguments invalid: {0}")]
    ToolArgsInvalid(String),

    #[error("Client cancelled the request")]
    ClientCancelled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Unknown model alias: {0}")]
    UnknownModel(String),

    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Account actor error: {0}")]
    Actor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Stable machine-readable kind for logs and status endpoints.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::ConfigInvalid(_) => "config_invalid",
            ProxyError::BindFailed(_) => "bind_failed",
            ProxyError::AuthRequired => "auth_required",
            ProxyError::AuthFailed(_) | ProxyError::Oauth(_) => "auth_failed",
            ProxyError::TokenStoreCorrupt(_) => "token_store_corrupt",
            ProxyError::RateLimited { .. } => "rate_limited",
            ProxyError::EndpointUnavailable => "endpoint_unavailable",
            ProxyError::UpstreamStatus { status, .. } if status.is_server_error() => "upstream_5xx",
            ProxyError::UpstreamStatus { .. } => "upstream_4xx_other",
            ProxyError::MalformedChunk(_) => "malformed_chunk",
            ProxyError::SchemaInvalid { .. } => "schema_invalid",
            ProxyError::ToolArgsInvalid(_) => "tool_args_invalid",
            ProxyError::ClientCancelled => "client_cancelled",
            ProxyError::DeadlineExceeded => "deadline_exceeded",
            ProxyError::UnknownModel(_) => "config_invalid",
            _ => "internal",
        }
    }

    /// Seconds to advertise in `Retry-After`, when applicable.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProxyError::RateLimited { retry_after } => {
                Some(retry_after.as_secs().max(1))
            }
            _ => None,
        }
    }

    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            ProxyError::UnknownModel(alias) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new(
                    "invalid_request_error",
                    format!(
                        "Unknown model alias '{alias}'. Use an antigravity-* id or an alias containing haiku, sonnet or opus."
                    ),
                ),
            ),
            ProxyError::SchemaInvalid { tool, message } => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new(
                    "invalid_request_error",
                    format!("Tool '{tool}' input_schema rejected: {message}"),
                ),
            ),
            ProxyError::ToolArgsInvalid(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("invalid_request_error", message.clone()),
            ),
            ProxyError::AuthRequired => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::new(
                    "authentication_error",
                    "No authenticated Antigravity account is available.",
                ),
            ),
            ProxyError::AuthFailed(_) | ProxyError::Oauth(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::new(
                    "authentication_error",
                    "Upstream authentication failed; re-run the OAuth login flow.",
                ),
            ),
            ProxyError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody::new(
                    "rate_limit_error",
                    format!(
                        "All Antigravity endpoints are rate limited; retry in {}s.",
                        retry_after.as_secs().max(1)
                    ),
                ),
            ),
            ProxyError::EndpointUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody::new(
                    "overloaded_error",
                    "No Antigravity endpoint is currently available.",
                ),
            ),
            ProxyError::UpstreamStatus { status, .. } if status.is_server_error() => (
                StatusCode::BAD_GATEWAY,
                ErrorBody::new("api_error", "Upstream service error."),
            ),
            ProxyError::UpstreamStatus { status, .. } => (
                *status,
                ErrorBody::new("api_error", "Upstream rejected the request."),
            ),
            ProxyError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorBody::new("api_error", "Request deadline exceeded."),
            ),
            ProxyError::MalformedChunk(_) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody::new("api_error", "Upstream produced an unreadable stream."),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new("api_error", "An internal server error occurred."),
            ),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let retry_after = self.retry_after_secs();
        let kind = self.kind();
        let (status, body) = self.status_and_body();

        if status.is_server_error() {
            tracing::error!(%status, kind, error = %self, "request failed");
        } else {
            tracing::warn!(%status, kind, error = %self, "request rejected");
        }

        let mut resp = (status, Json(body)).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string())
        {
            resp.headers_mut().insert("retry-after", value);
        }
        resp
    }
}

impl IsRetryable for ProxyError {
    fn is_retryable(&self) -> bool {
        match self {
            ProxyError::Reqwest(_) => true,
            ProxyError::UpstreamStatus { status, .. } => status.is_server_error(),
            ProxyError::Oauth(oauth) => oauth.is_retryable(),
            _ => false,
        }
    }
}
