use base64::Engine as _;
use serde_json::Value;

/// Decode the payload JSON ("claims") from a JWT.
///
/// This is intentionally signature-agnostic: it does not validate the JWT,
/// it only base64url-decodes the payload segment and parses it as JSON.
/// The email extracted this way is a best-effort account label, nothing
/// security-relevant hangs off it.
pub(crate) fn decode_jwt_claims(jwt: &str) -> Option<Value> {
    let payload_b64 = jwt.split('.').nth(1)?;

    // Most JWTs are base64url without padding, but some toolchains may include padding.
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(payload_b64))
        .ok()?;

    serde_json::from_slice(&bytes).ok()
}

/// Best-effort email claim from an OpenID Connect `id_token`.
pub(crate) fn email_from_id_token(id_token: &str) -> Option<String> {
    decode_jwt_claims(id_token)?
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn fake_jwt(claims: &serde_json::Value) -> String {
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(claims).unwrap());
        format!("eyJhbGciOiJub25lIn0.{payload}.sig")
    }

    #[test]
    fn extracts_email_claim() {
        let jwt = fake_jwt(&serde_json::json!({"email": "dev@example.com", "sub": "1"}));
        assert_eq!(
            email_from_id_token(&jwt).as_deref(),
            Some("dev@example.com")
        );
    }

    #[test]
    fn malformed_token_yields_none() {
        assert!(email_from_id_token("not-a-jwt").is_none());
        assert!(email_from_id_token("a.%%%.c").is_none());
    }
}
