use crate::error::ProxyError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A single authenticated Google account.
///
/// Created by the OAuth login flow, mutated only through the account
/// actor, removed by explicit logout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,

    pub access_token: String,

    pub refresh_token: String,

    /// Access token expiry.
    pub expires_at: DateTime<Utc>,

    /// Managed Google Cloud project id discovered via `loadCodeAssist`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Account {
    /// Token freshness with the refresh skew applied: a token within
    /// `skew` of expiry is treated as already stale.
    pub fn is_stale(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }
}

/// The on-disk account collection: a single JSON document with an
/// `accounts` list, owner-only permissions, atomic writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStore {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub accounts: Vec<Account>,

    #[serde(skip)]
    path: PathBuf,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl TokenStore {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            version: default_version(),
            accounts: Vec::new(),
            path: path.into(),
        }
    }

    /// Load the store from disk. A missing file is an empty store; an
    /// unreadable or unparsable file is `token_store_corrupt` (the server
    /// binary exits 2 on it rather than silently discarding credentials).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProxyError> {
        let path = path.into();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(err) => return Err(ProxyError::TokenStoreCorrupt(err.to_string())),
        };

        let mut store: TokenStore = serde_json::from_slice(&raw)
            .map_err(|err| ProxyError::TokenStoreCorrupt(err.to_string()))?;
        store.path = path;
        Ok(store)
    }

    /// Atomic persist: serialize to a sibling temp file, fsync, rename
    /// over the canonical path. The file is created owner-only.
    pub fn save(&self) -> Result<(), ProxyError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(&serde_json::to_vec_pretty(self)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn get(&self, email: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.email == email)
    }

    /// Insert or replace by email; at most one account per email.
    pub fn upsert(&mut self, account: Account) {
        match self.accounts.iter_mut().find(|a| a.email == account.email) {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }
    }

    pub fn remove(&mut self, email: &str) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| a.email != email);
        self.accounts.len() != before
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
