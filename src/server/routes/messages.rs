use crate::error::ProxyError;
use crate::server::router::ProxyState;
use crate::stream::{FrameDecoder, StreamBridge, events_from_message};
use crate::tokens::count_input_tokens;
use crate::translate::{
    UserContext, build_upstream_request, coerce_tools, message_from_response,
    session_id_for_client,
};
use crate::upstream::CallContext;
use crate::utils::logging::with_pretty_json_debug;
use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, State},
    http::request::Parts,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use gravitas_schema::anthropic::{MessagesRequest, StreamEvent};
use gravitas_schema::antigravity::GenerateContentResponse;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Outbound event queue depth. Bounded so a slow client stalls upstream
/// reads instead of buffering without limit.
const EVENT_CHANNEL_DEPTH: usize = 64;

/// Peer address when the listener was set up with connect info; absent
/// under direct service calls (tests).
pub struct ClientAddr(Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0),
        ))
    }
}

/// POST /v1/messages
pub async fn messages_handler(
    State(state): State<ProxyState>,
    ClientAddr(client_addr): ClientAddr,
    Json(req): Json<MessagesRequest>,
) -> Result<Response, ProxyError> {
    let model = state.config.models.resolve(&req.model)?;
    let (coerced_tools, tool_schemas) = coerce_tools(req.tools.as_deref().unwrap_or(&[]))?;
    let user = UserContext::from_text(req.last_user_text());
    let session_id = session_id_for_client(client_addr);

    let upstream_request = build_upstream_request(&req, &model, &coerced_tools, session_id);
    with_pretty_json_debug(&upstream_request, |pretty| {
        debug!(
            alias = %model.alias,
            upstream_model = %model.upstream_id,
            body = %pretty,
            "translated inbound request"
        );
    });

    let wants_stream = req.wants_stream();
    let stream_upstream = wants_stream && !state.config.streaming.force_disable;

    let ctx = CallContext {
        upstream_model: model.upstream_id.clone(),
        stream: stream_upstream,
        is_claude_thinking: model.is_claude_thinking,
    };

    // Failures here happen before `message_start`: they surface as plain
    // HTTP errors (429 with Retry-After, 401, 502, ...), never as SSE.
    let upstream_resp = state.client.call(&ctx, &upstream_request).await?;

    if stream_upstream {
        let bridge = StreamBridge::new(
            model.alias.clone(),
            tool_schemas,
            user,
            state.config.repair.clone(),
        );
        return Ok(stream_response(state, upstream_resp, bridge));
    }

    let body = upstream_resp.json::<GenerateContentResponse>().await?;
    let message = message_from_response(
        &body,
        &model.alias,
        &tool_schemas,
        &user,
        &state.config.repair,
    );

    if wants_stream {
        // Streaming is force-disabled: the client still gets a valid
        // event-stream shape, replayed from the buffered message.
        let events = events_from_message(&message);
        let stream = futures::stream::iter(events.into_iter().map(to_sse_event));
        return Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response());
    }

    Ok(Json(message).into_response())
}

/// POST /v1/messages/count_tokens
pub async fn count_tokens_handler(
    State(state): State<ProxyState>,
    Json(req): Json<MessagesRequest>,
) -> Json<serde_json::Value> {
    let tokens = count_input_tokens(&req, state.config.models.token_counter.as_deref());
    Json(json!({ "input_tokens": tokens }))
}

fn to_sse_event(event: StreamEvent) -> Result<Event, Infallible> {
    let sse = Event::default().event(event.name());
    Ok(sse
        .json_data(&event)
        .unwrap_or_else(|_| Event::default().event("ping").data("{}")))
}

/// Build the SSE response and spawn the reader task that pumps upstream
/// chunks through the decoder and bridge.
fn stream_response(
    state: ProxyState,
    upstream_resp: reqwest::Response,
    bridge: StreamBridge,
) -> Response {
    let (tx, rx) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_DEPTH);
    state.stats.streams_started.fetch_add(1, Ordering::Relaxed);

    tokio::spawn(run_stream_reader(state, upstream_resp, bridge, tx));

    let stream = ReceiverStream::new(rx).map(to_sse_event);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Reader task: owns the upstream body for the lifetime of the request.
///
/// Client disconnect closes the event channel; the send error below tears
/// the task down, dropping (and thereby cancelling) the upstream read.
async fn run_stream_reader(
    state: ProxyState,
    upstream_resp: reqwest::Response,
    mut bridge: StreamBridge,
    tx: mpsc::Sender<StreamEvent>,
) {
    let started = Instant::now();
    let deadline = state.config.streaming.total_deadline();
    let idle_timeout = state.config.streaming.read_idle_timeout();
    let mut decoder = FrameDecoder::new(
        state.config.streaming.max_streaming_retries,
        state.config.streaming.buffer_cap_bytes,
    );

    let mut body = Box::pin(upstream_resp.bytes_stream());

    macro_rules! emit {
        ($events:expr) => {
            for event in $events {
                if tx.send(event).await.is_err() {
                    // Client went away; unwind and cancel the upstream read.
                    return;
                }
            }
        };
    }

    emit!(bridge.start_events());

    loop {
        if started.elapsed() >= deadline {
            warn!("stream exceeded total request deadline");
            state.stats.streams_errored.fetch_add(1, Ordering::Relaxed);
            emit!(bridge.fail());
            break;
        }

        let chunk = match tokio::time::timeout(idle_timeout, body.next()).await {
            Err(_) => {
                warn!("upstream read idle timeout");
                state.stats.streams_errored.fetch_add(1, Ordering::Relaxed);
                emit!(bridge.fail());
                break;
            }
            Ok(None) => {
                // Upstream closed. Flush whatever the decoder still holds,
                // then end the message cleanly.
                for frame in decoder.finish() {
                    if let Ok(delta) = serde_json::from_value::<GenerateContentResponse>(frame) {
                        emit!(bridge.on_delta(&delta));
                    }
                }
                emit!(bridge.finish());
                break;
            }
            Ok(Some(Err(err))) => {
                warn!("upstream stream error: {err}");
                state.stats.streams_errored.fetch_add(1, Ordering::Relaxed);
                emit!(bridge.fail());
                break;
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        let frames = match decoder.push(&chunk) {
            Ok(frames) => frames,
            Err(err) => {
                warn!("stream decoding failed: {err}");
                state.stats.streams_errored.fetch_add(1, Ordering::Relaxed);
                emit!(bridge.fail());
                break;
            }
        };

        for frame in frames {
            match serde_json::from_value::<GenerateContentResponse>(frame) {
                Ok(delta) => emit!(bridge.on_delta(&delta)),
                Err(err) => debug!("skipping undecodable frame: {err}"),
            }
        }

        if bridge.saw_finish() {
            emit!(bridge.finish());
            break;
        }
    }

    state
        .stats
        .malformed_chunks
        .fetch_add(decoder.malformed_chunks(), Ordering::Relaxed);
}
