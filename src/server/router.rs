use crate::accounts::AccountHandle;
use crate::config::{Config, UpstreamConfig};
use crate::server::routes::{messages, oauth, status};
use crate::upstream::{AntigravityClient, EndpointPool};
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use gravitas_schema::anthropic::ErrorBody;
use rand::RngCore;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    // 96 bits => 16 chars base64url (no padding).
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

/// Streaming counters surfaced by `/health`.
#[derive(Debug, Default)]
pub struct StreamingStats {
    pub streams_started: AtomicU64,
    pub streams_errored: AtomicU64,
    pub malformed_chunks: AtomicU64,
}

#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<Config>,
    pub upstream_cfg: Arc<UpstreamConfig>,
    pub account: AccountHandle,
    pub pool: Arc<EndpointPool>,
    pub client: Arc<AntigravityClient>,
    /// Separate client for token-endpoint calls; redirects stay disabled.
    pub oauth_http: reqwest::Client,
    pub stats: Arc<StreamingStats>,
}

impl ProxyState {
    pub fn new(
        config: Arc<Config>,
        upstream_cfg: Arc<UpstreamConfig>,
        account: AccountHandle,
    ) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.streaming.connect_timeout_secs))
            .timeout(config.streaming.total_deadline())
            .build()
            .expect("failed to build upstream HTTP client");

        let pool = Arc::new(EndpointPool::new(upstream_cfg.endpoints.clone()));
        let client = Arc::new(AntigravityClient::new(
            http,
            upstream_cfg.clone(),
            pool.clone(),
            account.clone(),
        ));
        let oauth_http = crate::oauth::oauth_http_client(Duration::from_secs(
            config.streaming.connect_timeout_secs,
        ));

        Self {
            config,
            upstream_cfg,
            account,
            pool,
            client,
            oauth_http,
            stats: Arc::new(StreamingStats::default()),
        }
    }
}

async fn not_found_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new("not_found_error", "Unknown route.")),
    )
        .into_response()
}

/// Loopback `Host` guard: the proxy serves a local client; anything else
/// is rejected unless the operator explicitly opted out.
async fn host_guard(State(state): State<ProxyState>, req: Request, next: Next) -> Response {
    let relaxed =
        state.config.proxy.allow_remote_hosts || !state.config.proxy.host.is_loopback();
    if !relaxed {
        let host = req
            .headers()
            .get(axum::http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !host_is_loopback(host) {
            warn!(host, "rejecting request with non-loopback Host header");
            return (
                StatusCode::FORBIDDEN,
                Json(ErrorBody::new(
                    "permission_error",
                    format!(
                        "Host '{host}' is not loopback; set proxy.allow_remote_hosts to serve it"
                    ),
                )),
            )
                .into_response();
        }
    }
    next.run(req).await
}

fn host_is_loopback(host: &str) -> bool {
    let bare = if let Some(rest) = host.strip_prefix('[') {
        // Bracketed IPv6, with or without a port.
        rest.split(']').next().unwrap_or("")
    } else {
        host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
    };
    matches!(bare, "localhost" | "127.0.0.1" | "::1") || bare.parse::<std::net::Ipv4Addr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

async fn access_log(req: Request, next: Next) -> Response {
    // Capture request metadata before moving `req` into the handler stack.
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Always reflect `x-request-id` for easier correlation, even if the client didn't send one.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    // Note: for SSE responses, `latency_ms` is time-to-first-byte (handler
    // return), not the full stream duration.
    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    }

    resp
}

pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route("/v1/messages", post(messages::messages_handler))
        .route(
            "/v1/messages/count_tokens",
            post(messages::count_tokens_handler),
        )
        .route("/health", get(status::health_handler))
        .route("/antigravity-status", get(status::antigravity_status_handler))
        .route("/oauth/login", post(oauth::oauth_login_handler))
        .route("/oauth/logout", post(oauth::oauth_logout_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(state.clone(), host_guard))
        .with_state(state)
        .layer(middleware::from_fn(access_log))
}
