use url::Url;

/// Ordered Antigravity endpoint list. Sandbox quota buckets first,
/// production last.
pub const ANTIGRAVITY_ENDPOINTS: [&str; 3] = [
    "https://daily-cloudcode-pa.sandbox.googleapis.com",
    "https://autopush-cloudcode-pa.sandbox.googleapis.com",
    "https://cloudcode-pa.googleapis.com",
];

/// Production endpoint; project discovery is pinned here because the
/// sandbox endpoints return inconsistent project metadata.
pub const PRODUCTION_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";

pub const X_GOOG_API_CLIENT: &str = "google-cloud-sdk vscode_cloudshelleditor/0.1";

pub const CLIENT_METADATA_HEADER: &str =
    r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Fixed, documented loopback port for the OAuth redirect.
pub const OAUTH_CALLBACK_PORT: u16 = 51121;

/// Default OAuth client registered for Antigravity; overridable via
/// environment for operators bringing their own credentials.
const DEFAULT_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
const DEFAULT_CLIENT_SECRET: &str = "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";

pub const OAUTH_SCOPES: [&str; 6] = [
    "openid",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/cclog",
    "https://www.googleapis.com/auth/experimentsandconfigs",
];

/// Resolved upstream and OAuth parameters.
///
/// Production values come from the constants above; tests override the
/// URLs to point at local fakes.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub endpoints: Vec<Url>,

    /// Where `loadCodeAssist` discovery goes, regardless of pool state.
    pub discovery_base: Url,

    pub oauth_auth_url: Url,
    pub oauth_token_url: Url,
    pub oauth_redirect_url: Url,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_scopes: Vec<String>,

    /// Value of the upstream `User-Agent` header.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        let parse = |s: &str| Url::parse(s).expect("invalid fixed upstream URL");
        Self {
            endpoints: ANTIGRAVITY_ENDPOINTS.iter().map(|e| parse(e)).collect(),
            discovery_base: parse(PRODUCTION_ENDPOINT),
            oauth_auth_url: parse(GOOGLE_AUTH_URL),
            oauth_token_url: parse(GOOGLE_TOKEN_URL),
            oauth_redirect_url: parse(&format!(
                "http://localhost:{OAUTH_CALLBACK_PORT}/oauth-callback"
            )),
            oauth_client_id: std::env::var("ANTIGRAVITY_CLIENT_ID")
                .unwrap_or_else(|_| DEFAULT_CLIENT_ID.to_string()),
            oauth_client_secret: std::env::var("ANTIGRAVITY_CLIENT_SECRET")
                .unwrap_or_else(|_| DEFAULT_CLIENT_SECRET.to_string()),
            oauth_scopes: OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
            user_agent: format!(
                "antigravity/1.11.5 {}/{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        }
    }
}

impl UpstreamConfig {
    /// Point every upstream URL at one base. Test seam, mirrored from the
    /// production constructor so the pool ordering still holds.
    pub fn with_base(base: Url) -> Self {
        Self {
            endpoints: vec![base.clone()],
            discovery_base: base.clone(),
            oauth_token_url: base
                .join("/token")
                .expect("base URL must accept a /token path"),
            ..Self::default()
        }
    }
}
