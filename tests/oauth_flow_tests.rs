use gravitas::config::UpstreamConfig;
use gravitas::oauth::GoogleOauthEndpoints;
use oauth2::PkceCodeChallenge;
use std::collections::HashMap;

#[test]
fn authorize_url_carries_pkce_scopes_and_offline_access() {
    let cfg = UpstreamConfig::default();
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256_len(64);
    let (url, csrf) =
        GoogleOauthEndpoints::build_authorize_url(&cfg, challenge).expect("authorize url");

    assert_eq!(url.host_str(), Some("accounts.google.com"));

    let params: HashMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
    assert_eq!(
        params.get("code_challenge_method").map(String::as_str),
        Some("S256")
    );
    assert!(params.get("code_challenge").is_some_and(|c| !c.is_empty()));
    assert_eq!(
        params.get("access_type").map(String::as_str),
        Some("offline")
    );
    assert_eq!(params.get("prompt").map(String::as_str), Some("consent"));
    assert_eq!(params.get("state"), Some(csrf.secret()));
    assert_eq!(
        params.get("redirect_uri").map(String::as_str),
        Some("http://localhost:51121/oauth-callback")
    );

    let scopes = params.get("scope").expect("scope param");
    for required in [
        "openid",
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
        "https://www.googleapis.com/auth/cloud-platform",
        "https://www.googleapis.com/auth/cclog",
        "https://www.googleapis.com/auth/experimentsandconfigs",
    ] {
        assert!(scopes.contains(required), "missing scope {required}");
    }

    // A 64-byte verifier yields an 86-char base64url string.
    assert_eq!(verifier.secret().len(), 86);
}
