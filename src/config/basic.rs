use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP listener configuration (`proxy` table in config.json).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyListenConfig {
    /// Listen address. Loopback by default; binding elsewhere also relaxes
    /// the `Host` header guard.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Accept requests whose `Host` header is not loopback even when
    /// listening on loopback.
    #[serde(default)]
    pub allow_remote_hosts: bool,
}

impl Default for ProxyListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            allow_remote_hosts: false,
        }
    }
}

fn default_host() -> IpAddr {
    Ipv4Addr::new(127, 0, 0, 1).into()
}

fn default_port() -> u16 {
    8082
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OAuth account configuration (`auth` table in config.json).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Preferred account when the token store holds several.
    #[serde(default)]
    pub account_email: Option<String>,

    /// Token store location override (defaults under ~/.config/gravitas).
    #[serde(default)]
    pub accounts_path: Option<PathBuf>,
}

/// Streaming bridge tuning (`streaming` table in config.json).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Consecutive parse failures tolerated on the same buffer prefix
    /// before discarding to the next framing boundary.
    #[serde(default = "default_max_streaming_retries")]
    pub max_streaming_retries: u32,

    /// Per-read idle timeout in seconds.
    #[serde(default = "default_read_idle_timeout_secs")]
    pub read_idle_timeout_secs: u64,

    /// Total request deadline in milliseconds. Large because thinking
    /// models stream slowly.
    #[serde(default = "default_total_deadline_ms")]
    pub total_deadline_ms: u64,

    /// Per-endpoint connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Rolling chunk buffer cap in bytes; overflow is a hard error.
    #[serde(default = "default_buffer_cap_bytes")]
    pub buffer_cap_bytes: usize,

    /// Answer streaming requests with a buffered non-streaming upstream
    /// call, replayed as events.
    #[serde(default)]
    pub force_disable: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_streaming_retries: default_max_streaming_retries(),
            read_idle_timeout_secs: default_read_idle_timeout_secs(),
            total_deadline_ms: default_total_deadline_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            buffer_cap_bytes: default_buffer_cap_bytes(),
            force_disable: false,
        }
    }
}

impl StreamingConfig {
    pub fn read_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.read_idle_timeout_secs)
    }

    pub fn total_deadline(&self) -> Duration {
        Duration::from_millis(self.total_deadline_ms)
    }
}

fn default_max_streaming_retries() -> u32 {
    12
}

fn default_read_idle_timeout_secs() -> u64 {
    90
}

fn default_total_deadline_ms() -> u64 {
    3_000_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_buffer_cap_bytes() -> usize {
    1024 * 1024
}

/// Best-effort tool-argument repair switches (`repair` table).
///
/// Both heuristics are documented fall-backs; a well-formed client never
/// needs them and all behavior is correct with both off.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepairConfig {
    /// Heal obvious key mismatches (url↔link, query↔prompt, …) when the
    /// target key is required by the declared schema.
    #[serde(default = "default_true")]
    pub alias_healing: bool,

    /// Fill a missing required string parameter from the most recent user
    /// text when the parameter name signals url/path/query semantics.
    #[serde(default = "default_true")]
    pub fill_from_user_text: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            alias_healing: true,
            fill_from_user_text: true,
        }
    }
}

fn default_true() -> bool {
    true
}
