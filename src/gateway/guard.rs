//! Rocket request guard for validating Bearer access tokens.

use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;
use std::sync::Arc;

use crate::config::Config;
use crate::gateway::jwt::AccessClaims;

/// Verifies access tokens against the gateway's signing material.
///
/// Tries the RS256 public key first, then the HS256 shared secret, so the
/// guard accepts tokens regardless of which key material the issuer was
/// built with. Built once at startup and shared through Rocket state.
pub struct BearerValidator {
    rs256_key: Option<DecodingKey>,
    rs256_validation: Validation,
    hs256_key: DecodingKey,
    hs256_validation: Validation,
}

impl BearerValidator {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let rs256_key = if config.gateway.rs256_public_key.is_empty() {
            None
        } else {
            let public_pem = base64::engine::general_purpose::STANDARD
                .decode(&config.gateway.rs256_public_key)
                .map_err(|e| anyhow::anyhow!("RS256 public key is not valid base64: {}", e))?;
            Some(
                DecodingKey::from_rsa_pem(&public_pem)
                    .map_err(|e| anyhow::anyhow!("invalid RS256 public key: {}", e))?,
            )
        };

        let issuer = format!("{}/oidc", config.gateway.issuer_url());
        let build_validation = |algorithm: Algorithm| {
            let mut validation = Validation::new(algorithm);
            validation.validate_exp = true;
            validation.validate_nbf = true;
            // The audience is the client the token was issued to, which this
            // endpoint cannot know up front.
            validation.validate_aud = false;
            validation.set_issuer(&[issuer.clone()]);
            validation
        };

        Ok(BearerValidator {
            rs256_key,
            rs256_validation: build_validation(Algorithm::RS256),
            hs256_key: DecodingKey::from_secret(config.gateway.hmac_secret.as_bytes()),
            hs256_validation: build_validation(Algorithm::HS256),
        })
    }

    /// Decode and verify a token, returning its claims.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        if let Some(rs256_key) = &self.rs256_key {
            if let Ok(data) = decode::<AccessClaims>(token, rs256_key, &self.rs256_validation) {
                return Ok(data.claims);
            }
        }
        Ok(decode::<AccessClaims>(token, &self.hs256_key, &self.hs256_validation)?.claims)
    }
}

/// Request guard extracting a validated Bearer JWT from the Authorization
/// header.
pub struct OAuthBearer {
    pub claims: AccessClaims,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for OAuthBearer {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_header = request.headers().get_one("Authorization");

        let token = match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
            Some(token) => token,
            None => return Outcome::Error((Status::Unauthorized, "Missing Bearer token")),
        };

        let validator = match request.guard::<&State<Arc<BearerValidator>>>().await {
            Outcome::Success(validator) => validator,
            _ => return Outcome::Error((Status::InternalServerError, "Missing validator state")),
        };

        match validator.decode(token) {
            Ok(claims) => Outcome::Success(OAuthBearer { claims }),
            Err(_) => Outcome::Error((Status::Unauthorized, "Invalid token")),
        }
    }
}
