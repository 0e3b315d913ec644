//! OpenID Connect discovery and JWKS endpoints.
//!
//! Exposes the provider metadata document and the RS256 verification key so
//! relying parties can configure themselves from the issuer URL alone.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::debug;
use rocket::serde::json::{json, Json, Value};
use rocket::{get, State};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::{Digest, Sha256};
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// OpenID Provider Configuration document, per OpenID Connect Discovery 1.0.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenIdConfiguration {
    /// Issuer identifier the provider asserts for itself.
    pub issuer: String,

    /// URL of the authorization endpoint.
    pub authorization_endpoint: String,

    /// URL of the token endpoint.
    pub token_endpoint: String,

    /// URL of the userinfo endpoint.
    pub userinfo_endpoint: String,

    /// URL of the RP-initiated logout endpoint.
    pub end_session_endpoint: String,

    /// URL of the JSON Web Key Set document.
    pub jwks_uri: String,

    /// OAuth 2.0 response_type values this provider supports.
    pub response_types_supported: Vec<String>,

    /// OAuth 2.0 grant type values this provider supports.
    pub grant_types_supported: Vec<String>,

    /// Subject identifier types this provider supports.
    pub subject_types_supported: Vec<String>,

    /// JWS signing algorithms supported for issued tokens.
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Scopes this provider understands.
    pub scopes_supported: Vec<String>,

    /// Claim names the provider may supply.
    pub claims_supported: Vec<String>,

    /// PKCE code challenge methods supported at the authorization endpoint.
    pub code_challenge_methods_supported: Vec<String>,
}

fn generate_openid_configuration(issuer: &str) -> OpenIdConfiguration {
    OpenIdConfiguration {
        issuer: issuer.to_string(),
        authorization_endpoint: format!("{}/authorize", issuer),
        token_endpoint: format!("{}/token", issuer),
        userinfo_endpoint: format!("{}/userinfo", issuer),
        end_session_endpoint: format!("{}/session/end", issuer),
        jwks_uri: format!("{}/.well-known/jwks.json", issuer),
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        subject_types_supported: vec!["public".to_string()],
        id_token_signing_alg_values_supported: vec!["RS256".to_string()],
        scopes_supported: vec![
            "openid".to_string(),
            "email".to_string(),
            "profile".to_string(),
        ],
        claims_supported: vec![
            "sub".to_string(),
            "email".to_string(),
            "name".to_string(),
            "iss".to_string(),
            "aud".to_string(),
            "exp".to_string(),
            "iat".to_string(),
            "scope".to_string(),
        ],
        code_challenge_methods_supported: vec!["S256".to_string()],
    }
}

/// OpenID Connect discovery endpoint.
///
/// `GET /oidc/.well-known/openid-configuration`
#[get("/.well-known/openid-configuration")]
pub async fn openid_configuration(config: &State<Config>) -> Json<OpenIdConfiguration> {
    let issuer = format!("{}/oidc", config.gateway.issuer_url());
    debug!("Issuer for OpenID configuration: {}", issuer);
    Json(generate_openid_configuration(&issuer))
}

/// JSON Web Key Set endpoint.
///
/// Exposes the RS256 verification key in JWKS format (RFC 7517) so clients
/// can verify token signatures.
///
/// `GET /oidc/.well-known/jwks.json`
#[get("/.well-known/jwks.json")]
pub async fn jwks(config: &State<Config>) -> Json<Value> {
    let mut keys = vec![];

    if let Ok(pem) =
        base64::engine::general_purpose::STANDARD.decode(&config.gateway.rs256_public_key)
    {
        if let Some(jwk) = create_jwk_from_pem(&pem) {
            keys.push(jwk);
        }
    }

    Json(json!({ "keys": keys }))
}

/// Convert a PEM-encoded RSA public key into its JWK representation.
fn create_jwk_from_pem(pem_data: &[u8]) -> Option<Value> {
    let pem_str = std::str::from_utf8(pem_data).ok()?;
    let public_key = RsaPublicKey::from_public_key_pem(pem_str).ok()?;

    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    let kid = jwk_thumbprint(&n, &e)?;

    Some(json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": kid,
        "n": n,
        "e": e,
    }))
}

/// Calculate the RFC 7638 thumbprint of an RSA JWK, used as the key ID.
fn jwk_thumbprint(n: &str, e: &str) -> Option<String> {
    // Canonical member ordering is lexicographic: e, kty, n.
    let canonical = json!({
        "e": e,
        "kty": "RSA",
        "n": n
    });
    let canonical_bytes = serde_json::to_vec(&canonical).ok()?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical_bytes);
    let hash = hasher.finalize();

    Some(URL_SAFE_NO_PAD.encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_endpoints_live_under_issuer() {
        let config = generate_openid_configuration("http://localhost:3000/oidc");
        assert_eq!(config.issuer, "http://localhost:3000/oidc");
        assert_eq!(
            config.authorization_endpoint,
            "http://localhost:3000/oidc/authorize"
        );
        assert_eq!(
            config.jwks_uri,
            "http://localhost:3000/oidc/.well-known/jwks.json"
        );
    }

    #[test]
    fn embedded_public_key_converts_to_jwk() {
        let jwk = create_jwk_from_pem(include_str!("../../resources/pub.key").as_bytes())
            .expect("embedded key should convert");
        assert_eq!(jwk["kty"], "RSA");
        assert_eq!(jwk["alg"], "RS256");
        assert!(jwk["kid"].as_str().is_some_and(|kid| !kid.is_empty()));
    }
}
