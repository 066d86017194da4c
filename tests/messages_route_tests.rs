use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::{Duration as ChronoDuration, Utc};
use gravitas::accounts::{Account, TokenStore};
use gravitas::config::{Config, UpstreamConfig};
use gravitas::server::router::{ProxyState, proxy_router};
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tower::ServiceExt;
use url::Url;

#[derive(Clone, Default)]
struct UpstreamState {
    generate_calls: Arc<AtomicUsize>,
    stream_calls: Arc<AtomicUsize>,
    token_calls: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
    /// Behavior script for generateContent, popped per call.
    script: Arc<Mutex<Vec<UpstreamBehavior>>>,
}

#[derive(Clone)]
enum UpstreamBehavior {
    TextReply(&'static str),
    RateLimited { retry_after_secs: u64 },
    Unauthorized,
    ServerError,
}

fn unique_store_path(tag: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "gravitas-{tag}-{}-{nanos}.json",
        std::process::id()
    ))
}

async fn spawn_test_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let base = Url::parse(&format!("http://{}", addr)).expect("valid base url");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    base
}

fn text_reply_body(text: &str) -> Value {
    json!({
        "response": {
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
        },
        "traceId": "trace-test"
    })
}

async fn generate_handler(
    State(state): State<UpstreamState>,
    Json(body): Json<Value>,
) -> Response {
    state.generate_calls.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().unwrap().push(body);

    let behavior = state
        .script
        .lock()
        .unwrap()
        .pop()
        .unwrap_or(UpstreamBehavior::TextReply("pong"));

    match behavior {
        UpstreamBehavior::TextReply(text) => Json(text_reply_body(text)).into_response(),
        UpstreamBehavior::RateLimited { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", retry_after_secs.to_string())],
            Json(json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}})),
        )
            .into_response(),
        UpstreamBehavior::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"code": 401, "status": "UNAUTHENTICATED"}})),
        )
            .into_response(),
        UpstreamBehavior::ServerError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"code": 500, "status": "INTERNAL"}})),
        )
            .into_response(),
    }
}

async fn token_handler(State(state): State<UpstreamState>) -> Json<Value> {
    state.token_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "access_token": "refreshed-token",
        "token_type": "bearer",
        "expires_in": 3600
    }))
}

async fn load_code_assist_handler() -> Json<Value> {
    Json(json!({"cloudaicompanionProject": "project-test"}))
}

fn upstream_router(state: UpstreamState, stream_body: Option<String>) -> Router {
    let stream_state = state.clone();
    Router::new()
        .route("/v1internal:generateContent", post(generate_handler))
        .route(
            "/v1internal:streamGenerateContent",
            post(move |State(state): State<UpstreamState>| {
                let body = stream_body.clone();
                async move {
                    state.stream_calls.fetch_add(1, Ordering::SeqCst);
                    match body {
                        Some(body) => (
                            StatusCode::OK,
                            [("content-type", "text/event-stream")],
                            body,
                        )
                            .into_response(),
                        None => StatusCode::NOT_FOUND.into_response(),
                    }
                }
            }),
        )
        .route("/token", post(token_handler))
        .route("/v1internal:loadCodeAssist", post(load_code_assist_handler))
        .with_state(stream_state)
}

fn seeded_store(tag: &str, expires_in: ChronoDuration) -> TokenStore {
    let mut store = TokenStore::empty(unique_store_path(tag));
    store.upsert(Account {
        email: "dev@example.com".to_string(),
        access_token: "test-token".to_string(),
        refresh_token: "test-refresh".to_string(),
        expires_at: Utc::now() + expires_in,
        project_id: Some("project-test".to_string()),
        scopes: vec!["openid".to_string()],
        created_at: Utc::now(),
        last_refresh: None,
    });
    store.save().expect("seed token store");
    store
}

async fn proxy_app(upstream_cfg: UpstreamConfig, store: TokenStore) -> Router {
    let upstream_cfg = Arc::new(upstream_cfg);
    let oauth_http = gravitas::oauth::oauth_http_client(std::time::Duration::from_secs(2));
    let account = gravitas::accounts::spawn(store, upstream_cfg.clone(), oauth_http, None).await;

    let mut config = Config::default();
    config.auth.enabled = true;
    let state = ProxyState::new(Arc::new(config), upstream_cfg, account);
    proxy_router(state)
}

fn messages_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("host", "127.0.0.1:8082")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

async fn body_json(resp: Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("body was not json")
}

/// Parse an SSE body into `(event_name, data_json)` pairs.
async fn sse_events(resp: Response) -> Vec<(String, Value)> {
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let text = String::from_utf8(bytes.to_vec()).expect("body was not utf-8");

    let mut events = Vec::new();
    for block in text.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let mut name = String::new();
        let mut data = String::new();
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                name = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                data.push_str(rest.trim());
            }
        }
        if !name.is_empty() {
            let value = serde_json::from_str(&data).unwrap_or(Value::Null);
            events.push((name, value));
        }
    }
    events
}

#[tokio::test]
async fn text_ping_round_trips_non_streaming() {
    let upstream = UpstreamState::default();
    let base = spawn_test_server(upstream_router(upstream.clone(), None)).await;
    let app = proxy_app(
        UpstreamConfig::with_base(base),
        seeded_store("ping", ChronoDuration::hours(1)),
    )
    .await;

    let resp = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku-x",
            "stream": false,
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "ping"}]
        })))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["role"], json!("assistant"));
    assert_eq!(body["type"], json!("message"));
    // The client sees the alias it asked for, not the upstream id.
    assert_eq!(body["model"], json!("claude-3-haiku-x"));
    assert_eq!(body["content"], json!([{"type": "text", "text": "pong"}]));
    assert_eq!(body["stop_reason"], json!("end_turn"));
    assert_eq!(body["usage"], json!({"input_tokens": 3, "output_tokens": 1}));

    // Upstream saw the translated envelope.
    let bodies = upstream.bodies.lock().unwrap();
    let envelope = &bodies[0];
    assert_eq!(envelope["project"], json!("project-test"));
    assert_eq!(envelope["model"], json!("gemini-3-flash"));
    assert_eq!(envelope["requestType"], json!("agent"));
    assert!(
        envelope["requestId"]
            .as_str()
            .is_some_and(|id| id.starts_with("agent-"))
    );
    assert_eq!(
        envelope["request"]["contents"][0]["parts"][0]["text"],
        json!("ping")
    );
}

#[tokio::test]
async fn streaming_tool_call_emits_conformant_event_sequence() {
    let stream_body = concat!(
        "data: {\"response\": {\"candidates\": [{\"content\": {\"parts\": ",
        "[{\"thought\": true, \"text\": \"planning\"}]}}]}}\n\n",
        "data: {\"response\": {\"candidates\": [{\"content\": {\"parts\": ",
        "[{\"functionCall\": {\"name\": \"read_file\", \"args\": {}}}]}, ",
        "\"finishReason\": \"STOP\"}]}}\n\n",
    )
    .to_string();

    let upstream = UpstreamState::default();
    let base = spawn_test_server(upstream_router(upstream.clone(), Some(stream_body))).await;
    let app = proxy_app(
        UpstreamConfig::with_base(base),
        seeded_store("stream-tool", ChronoDuration::hours(1)),
    )
    .await;

    let resp = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku-x",
            "stream": true,
            "max_tokens": 16,
            "tools": [{
                "name": "read_file",
                "input_schema": {
                    "type": "object",
                    "properties": {"file_path": {"type": "string"}},
                    "required": ["file_path"]
                }
            }],
            "messages": [{"role": "user", "content": "read README.md"}]
        })))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"))
    );

    let events = sse_events(resp).await;
    let names: Vec<&str> = events
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| *name != "ping")
        .collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    let (_, message_start) = &events[0];
    assert_eq!(message_start["message"]["model"], json!("claude-3-haiku-x"));

    let block_starts: Vec<&Value> = events
        .iter()
        .filter(|(name, _)| name == "content_block_start")
        .map(|(_, data)| data)
        .collect();
    assert_eq!(block_starts[0]["content_block"]["type"], json!("thinking"));
    assert_eq!(block_starts[1]["content_block"]["type"], json!("tool_use"));
    assert_eq!(
        block_starts[1]["content_block"]["name"],
        json!("read_file")
    );
    assert_eq!(block_starts[1]["content_block"]["input"], json!({}));

    // Arguments arrive solely via input_json_delta, healed from user text.
    let input_json: String = events
        .iter()
        .filter(|(name, _)| name == "content_block_delta")
        .filter_map(|(_, data)| {
            (data["delta"]["type"] == json!("input_json_delta"))
                .then(|| data["delta"]["partial_json"].as_str().unwrap().to_string())
        })
        .collect();
    let args: Value = serde_json::from_str(&input_json).expect("args JSON reassembles");
    assert_eq!(args, json!({"file_path": "README.md"}));

    let (_, message_delta) = events
        .iter()
        .find(|(name, _)| name == "message_delta")
        .unwrap();
    assert_eq!(message_delta["delta"]["stop_reason"], json!("tool_use"));
}

#[tokio::test]
async fn rate_limited_endpoint_fails_over_and_is_skipped_while_cooling() {
    let upstream_a = UpstreamState::default();
    upstream_a.script.lock().unwrap().extend([
        UpstreamBehavior::RateLimited { retry_after_secs: 30 },
    ]);
    let upstream_b = UpstreamState::default();

    let base_a = spawn_test_server(upstream_router(upstream_a.clone(), None)).await;
    let base_b = spawn_test_server(upstream_router(upstream_b.clone(), None)).await;

    let upstream_cfg = UpstreamConfig {
        endpoints: vec![base_a.clone(), base_b.clone()],
        discovery_base: base_b.clone(),
        oauth_token_url: base_b.join("/token").unwrap(),
        ..UpstreamConfig::default()
    };
    let app = proxy_app(
        upstream_cfg,
        seeded_store("failover", ChronoDuration::hours(1)),
    )
    .await;

    let request_body = json!({
        "model": "claude-3-haiku-x",
        "stream": false,
        "max_tokens": 16,
        "messages": [{"role": "user", "content": "ping"}]
    });

    // First request: A is rate limited, B answers.
    let resp = app
        .clone()
        .oneshot(messages_request(request_body.clone()))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["content"][0]["text"], json!("pong"));
    assert_eq!(upstream_a.generate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream_b.generate_calls.load(Ordering::SeqCst), 1);

    // Second request within the cooldown: goes straight to B.
    let resp = app
        .oneshot(messages_request(request_body))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(upstream_a.generate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream_b.generate_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn upstream_401_triggers_exactly_one_refresh_and_retry() {
    let upstream = UpstreamState::default();
    // Script pops from the back: 401 first, success on retry.
    upstream.script.lock().unwrap().extend([
        UpstreamBehavior::TextReply("pong"),
        UpstreamBehavior::Unauthorized,
    ]);

    let base = spawn_test_server(upstream_router(upstream.clone(), None)).await;
    let store = seeded_store("refresh-401", ChronoDuration::hours(1));
    let store_path = store.path().to_path_buf();
    let app = proxy_app(UpstreamConfig::with_base(base), store).await;

    let resp = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku-x",
            "stream": false,
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "ping"}]
        })))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(upstream.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.generate_calls.load(Ordering::SeqCst), 2);

    // The refreshed token and expiry were persisted.
    let reloaded = TokenStore::load(&store_path).expect("reload store");
    let account = reloaded.get("dev@example.com").expect("account kept");
    assert_eq!(account.access_token, "refreshed-token");
    assert!(account.expires_at > Utc::now() + ChronoDuration::minutes(30));
    assert!(account.last_refresh.is_some());

    let _ = std::fs::remove_file(&store_path);
}

#[tokio::test]
async fn all_endpoints_rate_limited_yields_http_429_with_retry_after() {
    let upstream = UpstreamState::default();
    upstream.script.lock().unwrap().extend([
        UpstreamBehavior::RateLimited { retry_after_secs: 45 },
    ]);
    let base = spawn_test_server(upstream_router(upstream.clone(), None)).await;
    let app = proxy_app(
        UpstreamConfig::with_base(base),
        seeded_store("all-limited", ChronoDuration::hours(1)),
    )
    .await;

    let resp = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku-x",
            "stream": true,
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "ping"}]
        })))
        .await
        .expect("request failed");

    // A 429 before message_start is a plain HTTP error, not an SSE stream.
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after header present");
    assert!(retry_after > 0 && retry_after <= 45);

    let body = body_json(resp).await;
    assert_eq!(body["type"], json!("error"));
    assert_eq!(body["error"]["type"], json!("rate_limit_error"));
}

#[tokio::test]
async fn mid_stream_failure_ends_with_error_stop_reason_and_message_stop() {
    // A body that emits one valid delta and then dies mid-frame.
    let upstream = UpstreamState::default();
    let broken_stream = Router::new().route(
        "/v1internal:streamGenerateContent",
        post(|| async {
            let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
                Ok("data: {\"response\": {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"par\"}]}}]}}\n\n"),
                Err(std::io::Error::other("upstream connection reset")),
            ];
            (
                StatusCode::OK,
                [("content-type", "text/event-stream")],
                Body::from_stream(futures::stream::iter(chunks)),
            )
        }),
    )
    .route("/v1internal:loadCodeAssist", post(load_code_assist_handler))
    .route("/token", post(token_handler))
    .with_state(upstream);

    let base = spawn_test_server(broken_stream).await;
    let app = proxy_app(
        UpstreamConfig::with_base(base),
        seeded_store("mid-stream", ChronoDuration::hours(1)),
    )
    .await;

    let resp = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku-x",
            "stream": true,
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "ping"}]
        })))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let events = sse_events(resp).await;
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names.first(), Some(&"message_start"));
    assert_eq!(names.last(), Some(&"message_stop"));

    let (_, message_delta) = events
        .iter()
        .find(|(name, _)| name == "message_delta")
        .expect("message_delta present");
    assert_eq!(message_delta["delta"]["stop_reason"], json!("error"));

    // The partial text made it out before the failure.
    assert!(events.iter().any(|(name, data)| {
        name == "content_block_delta" && data["delta"]["text"] == json!("par")
    }));
}

#[tokio::test]
async fn unknown_model_and_bad_schema_are_client_errors() {
    let upstream = UpstreamState::default();
    let base = spawn_test_server(upstream_router(upstream.clone(), None)).await;
    let app = proxy_app(
        UpstreamConfig::with_base(base),
        seeded_store("client-errors", ChronoDuration::hours(1)),
    )
    .await;

    let resp = app
        .clone()
        .oneshot(messages_request(json!({
            "model": "gpt-4o",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku-x",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "bad", "input_schema": {"type": "string"}}]
        })))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], json!("invalid_request_error"));

    // No upstream call was made for either rejection.
    assert_eq!(upstream.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn count_tokens_health_and_status_endpoints_respond() {
    let upstream = UpstreamState::default();
    let base = spawn_test_server(upstream_router(upstream.clone(), None)).await;
    let app = proxy_app(
        UpstreamConfig::with_base(base),
        seeded_store("status", ChronoDuration::hours(1)),
    )
    .await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages/count_tokens")
                .header("content-type", "application/json")
                .header("host", "localhost")
                .body(Body::from(
                    json!({
                        "model": "claude-3-haiku-x",
                        "max_tokens": 1,
                        "messages": [{"role": "user", "content": "how many tokens is this?"}]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body["input_tokens"].as_u64().unwrap() > 0);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("host", "localhost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["antigravity"]["accounts"], json!(1));
    assert_eq!(body["antigravity"]["available"], json!(true));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/antigravity-status")
                .header("host", "localhost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["accounts"][0]["email"], json!("dev@example.com"));
    assert_eq!(body["accounts"][0]["project_id"], json!("project-test"));
    // Token material never appears in status output.
    assert!(!text.contains("test-token"));
    assert!(!text.contains("test-refresh"));
}

#[tokio::test]
async fn non_loopback_host_header_is_rejected() {
    let upstream = UpstreamState::default();
    let base = spawn_test_server(upstream_router(upstream.clone(), None)).await;
    let app = proxy_app(
        UpstreamConfig::with_base(base),
        seeded_store("host-guard", ChronoDuration::hours(1)),
    )
    .await;

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("host", "evil.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], json!("permission_error"));
    assert_eq!(upstream.generate_calls.load(Ordering::SeqCst), 0);
}
