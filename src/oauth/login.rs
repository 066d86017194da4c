use crate::accounts::Account;
use crate::config::{OAUTH_CALLBACK_PORT, UpstreamConfig};
use crate::error::{OauthError, ProxyError};
use crate::oauth::discovery::discover_project_id;
use crate::oauth::endpoints::GoogleOauthEndpoints;
use crate::utils::jwt::email_from_id_token;
use axum::{Router, extract::Query, extract::State, response::Html, routing::get};
use chrono::{Duration as ChronoDuration, Utc};
use oauth2::{AuthorizationCode, PkceCodeChallenge, TokenResponse};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);
const FALLBACK_EMAIL: &str = "unknown@antigravity.google.com";

/// PKCE verifier entropy in bytes (spec'd 64 → 86-char verifier).
const PKCE_VERIFIER_BYTES: u32 = 64;

#[derive(Clone)]
struct CallbackState {
    tx: Arc<Mutex<Option<mpsc::Sender<CallbackOutcome>>>>,
}

#[derive(Debug)]
enum CallbackOutcome {
    Code { code: String, state: String },
    Error(String),
}

async fn oauth_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    let outcome = match (params.get("code"), params.get("state")) {
        (Some(code), Some(csrf)) if !code.is_empty() => CallbackOutcome::Code {
            code: code.clone(),
            state: csrf.clone(),
        },
        _ => CallbackOutcome::Error(
            params
                .get("error")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
        ),
    };

    let ok = matches!(outcome, CallbackOutcome::Code { .. });
    if let Some(tx) = state.tx.lock().expect("callback channel poisoned").take() {
        let _ = tx.try_send(outcome);
    }

    if ok {
        Html("<html><body><h1>Authentication successful!</h1><p>You can close this window and return to the terminal.</p></body></html>")
    } else {
        Html("<html><body><h1>Authentication failed</h1><p>Check the terminal for details.</p></body></html>")
    }
}

/// Run the interactive PKCE login flow and return the authenticated
/// account (including the discovered project id). The caller persists it
/// through the account actor.
pub async fn login(cfg: &UpstreamConfig, http_client: &reqwest::Client) -> Result<Account, ProxyError> {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256_len(PKCE_VERIFIER_BYTES);
    let (auth_url, csrf_token) = GoogleOauthEndpoints::build_authorize_url(cfg, challenge)?;

    let (tx, mut rx) = mpsc::channel(1);
    let state = CallbackState {
        tx: Arc::new(Mutex::new(Some(tx))),
    };
    let app = Router::new()
        .route("/oauth-callback", get(oauth_callback))
        .with_state(state);

    let listener = TcpListener::bind(("127.0.0.1", OAUTH_CALLBACK_PORT))
        .await
        .map_err(|e| {
            ProxyError::BindFailed(format!("OAuth callback port {OAUTH_CALLBACK_PORT}: {e}"))
        })?;
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    info!("Open this URL to authenticate:\n\n{auth_url}\n");
    println!("Open this URL to authenticate:\n\n{auth_url}\n");

    let outcome = tokio::time::timeout(CALLBACK_TIMEOUT, rx.recv()).await;
    server.abort();

    let outcome = match outcome {
        Ok(Some(outcome)) => outcome,
        Ok(None) | Err(_) => {
            return Err(OauthError::Flow {
                code: "CALLBACK_TIMEOUT".to_string(),
                message: "Timed out waiting for the OAuth callback".to_string(),
            }
            .into());
        }
    };

    let (code, returned_state) = match outcome {
        CallbackOutcome::Code { code, state } => (code, state),
        CallbackOutcome::Error(error) => {
            return Err(OauthError::Flow {
                code: "AUTHORIZATION_DENIED".to_string(),
                message: format!("Authorization failed: {error}"),
            }
            .into());
        }
    };

    if returned_state != *csrf_token.secret() {
        return Err(OauthError::Flow {
            code: "CSRF_MISMATCH".to_string(),
            message: "OAuth state parameter mismatch".to_string(),
        }
        .into());
    }

    let token = GoogleOauthEndpoints::exchange_authorization_code(
        cfg,
        AuthorizationCode::new(code),
        verifier,
        http_client,
    )
    .await?;

    let email = token
        .extra_fields()
        .id_token
        .as_deref()
        .and_then(email_from_id_token)
        .unwrap_or_else(|| FALLBACK_EMAIL.to_string());

    let access_token = token.access_token().secret().to_string();
    let refresh_token = token
        .refresh_token()
        .map(|t| t.secret().to_string())
        .unwrap_or_default();
    if refresh_token.trim().is_empty() {
        return Err(OauthError::Flow {
            code: "MISSING_REFRESH_TOKEN".to_string(),
            message: "Token response carried no refresh_token (check access_type=offline)"
                .to_string(),
        }
        .into());
    }

    let expires_at = Utc::now()
        + token
            .expires_in()
            .map(|d| ChronoDuration::seconds(d.as_secs() as i64))
            .unwrap_or_else(|| ChronoDuration::seconds(3600));

    let project_id = match discover_project_id(cfg, &access_token, None, http_client).await {
        Ok(found) => found,
        Err(err) => {
            warn!("project id discovery failed during login: {err}");
            None
        }
    };

    info!(%email, project_id = ?project_id, "OAuth login completed");

    Ok(Account {
        email,
        access_token,
        refresh_token,
        expires_at,
        project_id,
        scopes: cfg.oauth_scopes.clone(),
        created_at: Utc::now(),
        last_refresh: None,
    })
}
