use super::quota::EndpointPool;
use crate::accounts::{AccountHandle, AccountSnapshot};
use crate::config::{CLIENT_METADATA_HEADER, UpstreamConfig, X_GOOG_API_CLIENT};
use crate::error::ProxyError;
use crate::oauth::discover_project_id;
use crate::utils::logging::with_pretty_json_debug;
use gravitas_schema::antigravity::{GenerateContentRequest, UpstreamEnvelope};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const GENERATE_PATH: &str = "/v1internal:generateContent";
const STREAM_PATH: &str = "/v1internal:streamGenerateContent?alt=sse";

/// Interleaved-thinking contract expected by the upstream for Claude
/// thinking models; omitting it causes thoughts to be elided.
const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

/// Total 5xx retries across the endpoint list per call.
const MAX_SERVER_ERROR_RETRIES: u32 = 3;

/// Per-call routing facts the client needs beyond the request body.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Upstream model id (routing prefix already stripped).
    pub upstream_model: String,
    pub stream: bool,
    pub is_claude_thinking: bool,
}

/// Upstream caller: endpoint failover, bearer attachment, retry policy.
///
/// One instance is shared by all request tasks; per-call state lives on
/// the stack of [`AntigravityClient::call`].
pub struct AntigravityClient {
    http: reqwest::Client,
    cfg: Arc<UpstreamConfig>,
    pool: Arc<EndpointPool>,
    account: AccountHandle,
    /// Project-id re-discovery runs once per process, after the first
    /// successful upstream call.
    discovery_pending: AtomicBool,
}

impl AntigravityClient {
    pub fn new(
        http: reqwest::Client,
        cfg: Arc<UpstreamConfig>,
        pool: Arc<EndpointPool>,
        account: AccountHandle,
    ) -> Self {
        Self {
            http,
            cfg,
            pool,
            account,
            discovery_pending: AtomicBool::new(true),
        }
    }

    /// Issue one generate call with failover.
    ///
    /// - 429 marks only the current endpoint and the next available one is
    ///   tried immediately.
    /// - 401 marks the endpoint, coalesces into a single token refresh,
    ///   and is retried once.
    /// - 5xx and transport errors rotate endpoints with backoff, at most
    ///   [`MAX_SERVER_ERROR_RETRIES`] times.
    ///
    /// On success the raw `reqwest::Response` is returned so streaming
    /// callers can consume the body incrementally.
    pub async fn call(
        &self,
        ctx: &CallContext,
        request: &GenerateContentRequest,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut snapshot = self.account.snapshot().await?;
        let mut refreshed_once = false;
        let mut server_error_retries = 0u32;
        let mut last_server_error: Option<(StatusCode, String)> = None;

        loop {
            let picked = self
                .pool
                .pick()
                .map_err(|retry_after| ProxyError::RateLimited { retry_after })?;

            let path = if ctx.stream { STREAM_PATH } else { GENERATE_PATH };
            let url = picked.url.join(path).map_err(|e| {
                ProxyError::Internal(format!("invalid upstream URL {}: {e}", picked.url))
            })?;

            let envelope = UpstreamEnvelope::agent(
                snapshot.project_id.clone(),
                ctx.upstream_model.clone(),
                format!("agent-{}", Uuid::new_v4()),
                request.clone(),
            );

            with_pretty_json_debug(&envelope, |pretty| {
                debug!(
                    endpoint = %picked.url,
                    model = %ctx.upstream_model,
                    stream = ctx.stream,
                    body = %pretty,
                    "prepared upstream payload"
                );
            });

            let sent = self
                .http
                .post(url)
                .headers(self.headers(ctx, &snapshot))
                .json(&envelope)
                .send()
                .await;

            let resp = match sent {
                Ok(resp) => resp,
                Err(err) => {
                    // Transport failures count against the 5xx budget so a
                    // dead endpoint rotates out instead of looping forever.
                    let cooldown = self.pool.mark_unavailable(picked.index);
                    warn!(endpoint = %picked.url, error = %err, "upstream transport error");
                    server_error_retries += 1;
                    if server_error_retries > MAX_SERVER_ERROR_RETRIES {
                        // Exhausting retries without ever reaching an
                        // endpoint is distinct from a 5xx reply.
                        return Err(ProxyError::EndpointUnavailable);
                    }
                    tokio::time::sleep(cooldown.min(Duration::from_secs(2))).await;
                    continue;
                }
            };

            let status = resp.status();

            if status.is_success() {
                self.pool.mark_success(picked.index);
                self.maybe_rediscover_project(&snapshot);
                return Ok(resp);
            }

            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = retry_after_from_parts(&headers, &body);
                    let applied = self.pool.mark_rate_limited(picked.index, retry_after);
                    info!(
                        endpoint = %picked.url,
                        cooldown_secs = applied.as_secs(),
                        "endpoint rate limited, trying next"
                    );
                    continue;
                }

                StatusCode::UNAUTHORIZED => {
                    self.pool.mark_auth_failed(picked.index);
                    if refreshed_once {
                        return Err(ProxyError::AuthFailed(
                            "upstream still rejects credentials after refresh".to_string(),
                        ));
                    }
                    info!(endpoint = %picked.url, "upstream 401, refreshing access token");
                    snapshot = self.account.refresh_stale(&snapshot.access_token).await?;
                    refreshed_once = true;
                    continue;
                }

                status if status.is_server_error() => {
                    let cooldown = self.pool.mark_unavailable(picked.index);
                    warn!(
                        endpoint = %picked.url,
                        %status,
                        body = %format!("{body:.200}"),
                        "upstream server error"
                    );
                    last_server_error = Some((status, body));
                    server_error_retries += 1;
                    if server_error_retries > MAX_SERVER_ERROR_RETRIES {
                        let (status, body) = last_server_error.expect("recorded above");
                        return Err(ProxyError::UpstreamStatus { status, body });
                    }
                    tokio::time::sleep(cooldown.min(Duration::from_secs(2))).await;
                    continue;
                }

                status => {
                    warn!(
                        endpoint = %picked.url,
                        %status,
                        body = %format!("{body:.200}"),
                        "upstream rejected request"
                    );
                    return Err(ProxyError::UpstreamStatus { status, body });
                }
            }
        }
    }

    fn headers(&self, ctx: &CallContext, snapshot: &AccountSnapshot) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", snapshot.access_token))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        if let Ok(ua) = HeaderValue::from_str(&self.cfg.user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(
            "x-goog-api-client",
            HeaderValue::from_static(X_GOOG_API_CLIENT),
        );
        headers.insert(
            "client-metadata",
            HeaderValue::from_static(CLIENT_METADATA_HEADER),
        );
        if ctx.stream {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        if ctx.is_claude_thinking {
            headers.insert(
                "anthropic-beta",
                HeaderValue::from_static(INTERLEAVED_THINKING_BETA),
            );
        }
        headers
    }

    /// First successful call after startup re-runs project discovery and
    /// replaces the stored id unconditionally.
    fn maybe_rediscover_project(&self, snapshot: &AccountSnapshot) {
        if !self.discovery_pending.swap(false, Ordering::SeqCst) {
            return;
        }

        let cfg = self.cfg.clone();
        let http = self.http.clone();
        let account = self.account.clone();
        let snapshot = snapshot.clone();
        tokio::spawn(async move {
            let hint = (!snapshot.needs_discovery).then_some(snapshot.project_id.as_str());
            match discover_project_id(&cfg, &snapshot.access_token, hint, &http).await {
                Ok(Some(project_id)) => {
                    if project_id != snapshot.project_id {
                        account.update_project_id(snapshot.email.clone(), project_id);
                    }
                }
                Ok(None) => debug!("project re-discovery returned no id; keeping stored value"),
                Err(err) => warn!("project re-discovery failed: {err}"),
            }
        });
    }
}

/// Cooldown hint for a 429, in priority order: `Retry-After` header, then
/// a `retryDelay` inside a `google.rpc.RetryInfo` error detail.
pub fn retry_after_from_parts(headers: &HeaderMap, body: &str) -> Option<Duration> {
    if let Some(secs) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(secs));
    }

    let parsed: Value = serde_json::from_str(body).ok()?;
    let details = parsed.get("error")?.get("details")?.as_array()?;
    for detail in details {
        let is_retry_info = detail
            .get("@type")
            .and_then(Value::as_str)
            .is_some_and(|t| t.ends_with("google.rpc.RetryInfo"));
        if !is_retry_info {
            continue;
        }
        let delay = detail.get("retryDelay").and_then(Value::as_str)?;
        let secs = delay.strip_suffix('s')?.parse::<f64>().ok()?;
        if secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
    }
    None
}
