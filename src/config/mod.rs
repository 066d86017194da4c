mod basic;
mod models;
mod upstream;

pub use basic::{AuthConfig, ProxyListenConfig, RepairConfig, StreamingConfig};
pub use models::{ModelRoute, ModelRoutes, ResolvedModel};
pub use upstream::{
    ANTIGRAVITY_ENDPOINTS, CLIENT_METADATA_HEADER, OAUTH_CALLBACK_PORT, PRODUCTION_ENDPOINT,
    UpstreamConfig, X_GOOG_API_CLIENT,
};

use crate::error::ProxyError;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration: defaults, then the operator's JSON config
/// file, then documented environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub proxy: ProxyListenConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub models: ModelRoutes,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub repair: RepairConfig,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Config {
    /// Builds a Figment that merges defaults and an optional config JSON file.
    pub fn figment(config_path: Option<&PathBuf>) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        match config_path {
            Some(path) if path.is_file() => figment.merge(Json::file(path)),
            _ => figment,
        }
    }

    /// Loads configuration from the default location, then applies
    /// environment overrides.
    pub fn load() -> Result<Self, ProxyError> {
        let path = Self::default_config_path();
        let mut cfg: Config = Self::figment(path.as_ref())
            .extract()
            .map_err(|err| ProxyError::ConfigInvalid(err.to_string()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// `~/.config/gravitas/config.json`, if the home directory resolves.
    pub fn default_config_path() -> Option<PathBuf> {
        std::env::home_dir().map(|home| home.join(".config").join("gravitas").join("config.json"))
    }

    /// `~/.config/gravitas/accounts.json` unless the config names a path.
    pub fn accounts_path(&self) -> PathBuf {
        self.auth.accounts_path.clone().unwrap_or_else(|| {
            std::env::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
                .join("gravitas")
                .join("accounts.json")
        })
    }

    /// Documented operator environment overrides. Each variable maps onto
    /// one config field; unparsable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            let raw = std::env::var(key).ok()?;
            match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, raw, "ignoring unparsable environment override");
                    None
                }
            }
        }
        fn flag(key: &str) -> Option<bool> {
            let raw = std::env::var(key).ok()?;
            Some(matches!(
                raw.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ))
        }

        if let Some(host) = parsed("HOST") {
            self.proxy.host = host;
        }
        if let Some(port) = parsed("PORT") {
            self.proxy.port = port;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.proxy.log_level = level;
        }
        if let Some(secs) = parsed("REQUEST_TIMEOUT") {
            self.streaming.read_idle_timeout_secs = secs;
        }
        if let Some(n) = parsed("MAX_STREAMING_RETRIES") {
            self.streaming.max_streaming_retries = n;
        }
        if let Some(force) = flag("FORCE_DISABLE_STREAMING") {
            self.streaming.force_disable = force;
        }
        // Emergency alias for the same switch.
        if let Some(force) = flag("EMERGENCY_DISABLE_STREAMING") {
            self.streaming.force_disable = self.streaming.force_disable || force;
        }
        if let Ok(target) = std::env::var("HAIKU_MODEL") {
            self.models.haiku.target = target;
        }
        if let Ok(target) = std::env::var("SONNET_MODEL") {
            self.models.sonnet.target = target;
        }
        if let Ok(target) = std::env::var("OPUS_MODEL") {
            self.models.opus.target = target;
        }
        if let Ok(model) = std::env::var("TOKEN_COUNTER_MODEL") {
            self.models.token_counter = Some(model);
        }
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.proxy.port == 0 {
            return Err(ProxyError::ConfigInvalid(
                "proxy.port must be non-zero".to_string(),
            ));
        }
        for (name, route) in [
            ("haiku", &self.models.haiku),
            ("sonnet", &self.models.sonnet),
            ("opus", &self.models.opus),
        ] {
            if route.target.trim().is_empty() {
                return Err(ProxyError::ConfigInvalid(format!(
                    "models.{name}.target must be non-empty"
                )));
            }
        }
        Ok(())
    }
}
