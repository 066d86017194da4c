use crate::error::ProxyError;
use crate::server::router::ProxyState;
use axum::{Json, extract::State};
use serde_json::{Value, json};
use tracing::info;

/// POST /oauth/login
///
/// Runs the interactive PKCE flow: binds the loopback callback listener,
/// prints the authorization URL for the operator's browser, waits for the
/// redirect, exchanges the code and persists the account. Responds once
/// the flow finishes (or times out waiting for the callback).
pub async fn oauth_login_handler(
    State(state): State<ProxyState>,
) -> Result<Json<Value>, ProxyError> {
    let account = crate::oauth::login(&state.upstream_cfg, &state.oauth_http).await?;
    let email = account.email.clone();
    let project_id = account.project_id.clone();

    state.account.upsert(account).await?;
    info!(%email, "account authenticated via /oauth/login");

    Ok(Json(json!({
        "ok": true,
        "email": email,
        "project_id": project_id,
    })))
}

/// POST /oauth/logout
///
/// Removes the named account from the token store.
pub async fn oauth_logout_handler(
    State(state): State<ProxyState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ProxyError> {
    let email = body
        .get("email")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::ToolArgsInvalid("body must carry an email".to_string()))?;

    let removed = state.account.remove(email).await?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}
