use crate::error::ProxyError;
use crate::server::router::ProxyState;
use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::atomic::Ordering;

/// GET /health
pub async fn health_handler(
    State(state): State<ProxyState>,
) -> Result<Json<Value>, ProxyError> {
    let accounts = state.account.status().await?;

    Ok(Json(json!({
        "ok": true,
        "antigravity": {
            "enabled": state.config.auth.enabled,
            "available": state.pool.available(),
            "accounts": accounts.len(),
        },
        "streaming": {
            "force_disabled": state.config.streaming.force_disable,
            "streams_started": state.stats.streams_started.load(Ordering::Relaxed),
            "streams_errored": state.stats.streams_errored.load(Ordering::Relaxed),
            "malformed_chunks": state.stats.malformed_chunks.load(Ordering::Relaxed),
        },
    })))
}

/// GET /antigravity-status
///
/// Per-account and per-endpoint summary. Token material never leaves the
/// account actor; [`crate::accounts::AccountStatus`] carries none.
pub async fn antigravity_status_handler(
    State(state): State<ProxyState>,
) -> Result<Json<Value>, ProxyError> {
    let accounts = state.account.status().await?;

    Ok(Json(json!({
        "accounts": accounts,
        "endpoints": state.pool.status(),
    })))
}
