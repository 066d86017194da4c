use super::store::{Account, TokenStore};
use crate::config::UpstreamConfig;
use crate::error::{OauthError, ProxyError};
use crate::oauth::{GoogleOauthEndpoints, OauthTokenResponse};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use oauth2::TokenResponse;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tokens within this window of expiry are treated as already stale.
const REFRESH_SKEW_SECS: i64 = 60;

/// Read-only copy handed to request tasks. One-cycle staleness is
/// tolerated; a snapshot-refresh-retry loop on 401 handles the race.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub email: String,
    pub access_token: String,
    pub project_id: String,
    pub expires_at: DateTime<Utc>,
    /// True while the project id is a transient placeholder that should be
    /// replaced by `loadCodeAssist` discovery on first use.
    pub needs_discovery: bool,
}

/// Token-free per-account summary for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum SnapshotError {
    NoAccount,
    RefreshFailed(String),
}

/// Public messages handled by the account actor.
///
/// The actor owns the token store exclusively; processing messages one at
/// a time is what serializes refreshes per account.
pub enum AccountActorMessage {
    /// A fresh snapshot, refreshing first when the token is stale.
    Snapshot(RpcReplyPort<Result<AccountSnapshot, SnapshotError>>),

    /// A 401 was observed with the given access token. Refreshes only if
    /// that token is still current, so a concurrent pair of 401s triggers
    /// exactly one refresh network call.
    RefreshStale(String, RpcReplyPort<Result<AccountSnapshot, SnapshotError>>),

    /// Persist a freshly authenticated account (login flow outcome).
    Upsert(Account, RpcReplyPort<Result<(), String>>),

    /// Replace the stored project id unconditionally (re-discovery).
    UpdateProjectId { email: String, project_id: String },

    /// Explicit logout.
    Remove(String, RpcReplyPort<bool>),

    Status(RpcReplyPort<Vec<AccountStatus>>),
}

impl std::fmt::Debug for AccountActorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccountActorMessage::Snapshot(_) => "Snapshot",
            AccountActorMessage::RefreshStale(..) => "RefreshStale",
            AccountActorMessage::Upsert(..) => "Upsert",
            AccountActorMessage::UpdateProjectId { .. } => "UpdateProjectId",
            AccountActorMessage::Remove(..) => "Remove",
            AccountActorMessage::Status(_) => "Status",
        };
        f.write_str(name)
    }
}

/// Handle for interacting with the account actor.
#[derive(Clone)]
pub struct AccountHandle {
    actor: ActorRef<AccountActorMessage>,
}

impl AccountHandle {
    pub async fn snapshot(&self) -> Result<AccountSnapshot, ProxyError> {
        let reply = ractor::call!(self.actor, AccountActorMessage::Snapshot)
            .map_err(|e| ProxyError::Actor(format!("Snapshot RPC failed: {e}")))?;
        reply.map_err(map_snapshot_error)
    }

    /// Report an upstream 401 and obtain a (possibly rotated) snapshot.
    pub async fn refresh_stale(
        &self,
        seen_access_token: &str,
    ) -> Result<AccountSnapshot, ProxyError> {
        let reply = ractor::call!(
            self.actor,
            AccountActorMessage::RefreshStale,
            seen_access_token.to_string()
        )
        .map_err(|e| ProxyError::Actor(format!("RefreshStale RPC failed: {e}")))?;
        reply.map_err(map_snapshot_error)
    }

    pub async fn upsert(&self, account: Account) -> Result<(), ProxyError> {
        let reply = ractor::call!(self.actor, AccountActorMessage::Upsert, account)
            .map_err(|e| ProxyError::Actor(format!("Upsert RPC failed: {e}")))?;
        reply.map_err(ProxyError::Internal)
    }

    pub fn update_project_id(&self, email: String, project_id: String) {
        let _ = ractor::cast!(
            self.actor,
            AccountActorMessage::UpdateProjectId { email, project_id }
        );
    }

    pub async fn remove(&self, email: &str) -> Result<bool, ProxyError> {
        ractor::call!(self.actor, AccountActorMessage::Remove, email.to_string())
            .map_err(|e| ProxyError::Actor(format!("Remove RPC failed: {e}")))
    }

    pub async fn status(&self) -> Result<Vec<AccountStatus>, ProxyError> {
        ractor::call!(self.actor, AccountActorMessage::Status)
            .map_err(|e| ProxyError::Actor(format!("Status RPC failed: {e}")))
    }
}

fn map_snapshot_error(err: SnapshotError) -> ProxyError {
    match err {
        SnapshotError::NoAccount => ProxyError::AuthRequired,
        SnapshotError::RefreshFailed(message) => ProxyError::AuthFailed(message),
    }
}

struct AccountActorState {
    store: TokenStore,
    cfg: Arc<UpstreamConfig>,
    http: reqwest::Client,
    preferred_email: Option<String>,
    /// Stable placeholder project id used until discovery succeeds.
    transient_project: String,
}

impl AccountActorState {
    fn active_index(&self) -> Option<usize> {
        if let Some(preferred) = &self.preferred_email
            && let Some(idx) = self
                .store
                .accounts
                .iter()
                .position(|a| &a.email == preferred)
        {
            return Some(idx);
        }
        self.store
            .accounts
            .iter()
            .position(|a| !a.refresh_token.trim().is_empty())
    }

    fn snapshot_of(&self, idx: usize) -> AccountSnapshot {
        let account = &self.store.accounts[idx];
        let (project_id, needs_discovery) = match &account.project_id {
            Some(id) if !id.is_empty() => (id.clone(), false),
            _ => (self.transient_project.clone(), true),
        };
        AccountSnapshot {
            email: account.email.clone(),
            access_token: account.access_token.clone(),
            project_id,
            expires_at: account.expires_at,
            needs_discovery,
        }
    }

    async fn refresh(&mut self, idx: usize) -> Result<(), SnapshotError> {
        let (email, refresh_token) = {
            let account = &self.store.accounts[idx];
            (account.email.clone(), account.refresh_token.clone())
        };

        let token: OauthTokenResponse = GoogleOauthEndpoints::refresh_access_token_with_retry(
            &self.cfg,
            &refresh_token,
            &self.http,
        )
        .await
        .map_err(|err| {
            if matches!(err, OauthError::ServerResponse { .. }) {
                error!(%email, "token refresh rejected by server: {err}");
            } else {
                warn!(%email, "token refresh failed: {err}");
            }
            SnapshotError::RefreshFailed(err.to_string())
        })?;

        let account = &mut self.store.accounts[idx];
        account.access_token = token.access_token().secret().to_string();
        account.expires_at = Utc::now()
            + token
                .expires_in()
                .map(|d| ChronoDuration::seconds(d.as_secs() as i64))
                .unwrap_or_else(|| ChronoDuration::seconds(3600));
        // Google often omits the refresh token on refresh; keep the old one.
        if let Some(new_refresh) = token.refresh_token() {
            account.refresh_token = new_refresh.secret().to_string();
        }
        account.last_refresh = Some(Utc::now());

        info!(%email, expires_at = %account.expires_at, "access token refreshed");
        self.persist();
        Ok(())
    }

    async fn fresh_snapshot(&mut self) -> Result<AccountSnapshot, SnapshotError> {
        let idx = self.active_index().ok_or(SnapshotError::NoAccount)?;
        if self.store.accounts[idx].is_stale(ChronoDuration::seconds(REFRESH_SKEW_SECS)) {
            self.refresh(idx).await?;
        }
        Ok(self.snapshot_of(idx))
    }

    fn persist(&self) {
        if let Err(err) = self.store.save() {
            error!("failed to persist token store: {err}");
        }
    }
}

struct AccountActor;

impl Actor for AccountActor {
    type Msg = AccountActorMessage;
    type State = AccountActorState;
    type Arguments = (TokenStore, Arc<UpstreamConfig>, reqwest::Client, Option<String>);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (store, cfg, http, preferred_email) = args;
        info!(
            accounts = store.accounts.len(),
            preferred = preferred_email.as_deref().unwrap_or("-"),
            "account actor starting"
        );
        Ok(AccountActorState {
            store,
            cfg,
            http,
            preferred_email,
            transient_project: format!("transient-{}", Uuid::new_v4()),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AccountActorMessage::Snapshot(reply) => {
                let _ = reply.send(state.fresh_snapshot().await);
            }

            AccountActorMessage::RefreshStale(seen_access_token, reply) => {
                let result = match state.active_index() {
                    None => Err(SnapshotError::NoAccount),
                    Some(idx) => {
                        let current = &state.store.accounts[idx];
                        let already_rotated = current.access_token != seen_access_token
                            && !current.is_stale(ChronoDuration::seconds(REFRESH_SKEW_SECS));
                        if already_rotated {
                            debug!("skipping refresh; token already rotated");
                            Ok(state.snapshot_of(idx))
                        } else {
                            match state.refresh(idx).await {
                                Ok(()) => Ok(state.snapshot_of(idx)),
                                Err(err) => Err(err),
                            }
                        }
                    }
                };
                let _ = reply.send(result);
            }

            AccountActorMessage::Upsert(account, reply) => {
                let email = account.email.clone();
                state.store.upsert(account);
                let result = state
                    .store
                    .save()
                    .map_err(|err| format!("failed to persist account {email}: {err}"));
                if result.is_ok() {
                    info!(%email, "account stored");
                }
                let _ = reply.send(result);
            }

            AccountActorMessage::UpdateProjectId { email, project_id } => {
                if let Some(account) =
                    state.store.accounts.iter_mut().find(|a| a.email == email)
                {
                    if account.project_id.as_deref() != Some(project_id.as_str()) {
                        info!(%email, %project_id, "project id updated from discovery");
                        account.project_id = Some(project_id);
                        state.persist();
                    }
                }
            }

            AccountActorMessage::Remove(email, reply) => {
                let removed = state.store.remove(&email);
                if removed {
                    state.persist();
                    info!(%email, "account removed");
                }
                let _ = reply.send(removed);
            }

            AccountActorMessage::Status(reply) => {
                let statuses = state
                    .store
                    .accounts
                    .iter()
                    .map(|a| AccountStatus {
                        email: a.email.clone(),
                        expires_at: a.expires_at,
                        project_id: a.project_id.clone(),
                        last_refresh: a.last_refresh,
                        scopes: a.scopes.clone(),
                    })
                    .collect();
                let _ = reply.send(statuses);
            }
        }
        Ok(())
    }
}

/// Spawn the account actor and return its handle.
pub async fn spawn(
    store: TokenStore,
    cfg: Arc<UpstreamConfig>,
    http: reqwest::Client,
    preferred_email: Option<String>,
) -> AccountHandle {
    let (actor, _jh) = Actor::spawn(
        Some(format!("account-{}", Uuid::new_v4())),
        AccountActor,
        (store, cfg, http, preferred_email),
    )
    .await
    .expect("failed to spawn AccountActor");

    AccountHandle { actor }
}
