use crate::config::UpstreamConfig;
use crate::error::{IsRetryable, OauthError, ProxyError};
use backon::{ExponentialBuilder, Retryable};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, CsrfToken,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

static OAUTH_RETRY_POLICY: LazyLock<ExponentialBuilder> = LazyLock::new(|| {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(2)
        .with_jitter()
});

/// Extra (non-standard) OAuth token response fields.
///
/// Keeps OpenID Connect's `id_token` (the email label source) plus any
/// additional JSON via `flatten`.
#[derive(Clone, Deserialize, Serialize)]
pub struct CustomTokenFields {
    pub id_token: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ExtraTokenFields for CustomTokenFields {}

/// Token responses end up in actor/debug logs; none of their contents are
/// safe to print, so Debug collapses the whole struct.
impl std::fmt::Debug for CustomTokenFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CustomTokenFields(id_token: {}, {} extra field(s) hidden)",
            if self.id_token.is_some() { "set" } else { "unset" },
            self.extra.len()
        )
    }
}

pub type OauthTokenResponse = StandardTokenResponse<CustomTokenFields, BasicTokenType>;

type StandardClient<
    HasAuthUrl = oauth2::EndpointSet,
    HasDeviceAuthUrl = oauth2::EndpointNotSet,
    HasIntrospectionUrl = oauth2::EndpointNotSet,
    HasRevocationUrl = oauth2::EndpointNotSet,
    HasTokenUrl = oauth2::EndpointSet,
> = OAuth2Client<
    BasicErrorResponse,
    OauthTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    HasDeviceAuthUrl,
    HasIntrospectionUrl,
    HasRevocationUrl,
    HasTokenUrl,
>;

/// HTTP client for token-endpoint calls. Redirects must stay disabled for
/// the oauth2 crate to accept the client.
pub fn oauth_http_client(connect_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("gravitas-oauth/1.0")
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .timeout(Duration::from_secs(15))
        .build()
        .expect("failed to build OAuth HTTP client")
}

/// Stateless Google OAuth operations built from resolved config.
pub struct GoogleOauthEndpoints;

impl GoogleOauthEndpoints {
    fn build_client(cfg: &UpstreamConfig) -> Result<StandardClient, ProxyError> {
        let client = OAuth2Client::<
            BasicErrorResponse,
            OauthTokenResponse,
            BasicTokenIntrospectionResponse,
            StandardRevocableToken,
            BasicRevocationErrorResponse,
        >::new(ClientId::new(cfg.oauth_client_id.clone()))
        .set_client_secret(ClientSecret::new(cfg.oauth_client_secret.clone()))
        .set_auth_uri(AuthUrl::from_url(cfg.oauth_auth_url.clone()))
        .set_token_uri(TokenUrl::from_url(cfg.oauth_token_url.clone()))
        .set_redirect_uri(RedirectUrl::from_url(cfg.oauth_redirect_url.clone()));

        Ok(client)
    }

    /// Authorize URL with scopes, S256 challenge and a random CSRF state.
    pub fn build_authorize_url(
        cfg: &UpstreamConfig,
        pkce_challenge: PkceCodeChallenge,
    ) -> Result<(url::Url, CsrfToken), ProxyError> {
        let client = Self::build_client(cfg)?;
        let mut req = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            // Google knobs: offline access yields a refresh token, consent
            // forces one even for re-authorized accounts.
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");

        for scope in cfg.oauth_scopes.iter() {
            req = req.add_scope(Scope::new(scope.to_string()));
        }

        Ok(req.url())
    }

    /// Exchange an authorization code (PKCE) for tokens.
    pub async fn exchange_authorization_code(
        cfg: &UpstreamConfig,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
        http_client: &reqwest::Client,
    ) -> Result<OauthTokenResponse, OauthError> {
        let client = Self::build_client(cfg).map_err(|e| OauthError::Other {
            message: format!("failed to build oauth2 client: {e}"),
        })?;

        let token = client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(http_client)
            .await?;
        Ok(token)
    }

    pub async fn refresh_access_token(
        cfg: &UpstreamConfig,
        refresh_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<OauthTokenResponse, OauthError> {
        let client = Self::build_client(cfg).map_err(|e| OauthError::Other {
            message: format!("failed to build oauth2 client: {e}"),
        })?;

        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(http_client)
            .await?;
        Ok(token)
    }

    /// Refresh with network-aware retries.
    pub async fn refresh_access_token_with_retry(
        cfg: &UpstreamConfig,
        refresh_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<OauthTokenResponse, OauthError> {
        let retry_policy = *OAUTH_RETRY_POLICY;
        (|| async { Self::refresh_access_token(cfg, refresh_token, http_client).await })
            .retry(retry_policy)
            .when(|e: &OauthError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("token refresh retrying after error {err}, sleeping {dur:?}");
            })
            .await
    }
}
