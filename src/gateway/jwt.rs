//! JWT access token issuance for the provider engine.
//!
//! Implements the engine's `Issuer` trait on top of `jsonwebtoken`. Access
//! tokens are RS256-signed JWTs carrying the standard claims plus the
//! account claims resolved at login; refresh tokens are opaque random
//! values kept in an in-memory map.

use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use oxide_auth::primitives::generator::{RandomGenerator, TagGrant};
use oxide_auth::primitives::grant::{Extensions, Grant, Value};
use oxide_auth::primitives::issuer::{IssuedToken, Issuer, RefreshedToken, TokenType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Profile claims attached to an account at login time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountClaims {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Claims carried by an issued access token.
///
/// Standard RFC 7519 claims plus the `scope` extension and the profile
/// claims of the token's subject.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject, the account identifier the token was issued for.
    pub sub: String,
    /// Issued-at, Unix time.
    pub iat: i64,
    /// Expiration, Unix time.
    pub exp: i64,
    /// Not-before, Unix time.
    pub nbf: i64,
    /// Unique token identifier.
    pub jti: String,
    /// Audience, the client the token was issued to.
    pub aud: String,
    /// Issuer identifier URL.
    pub iss: String,
    /// Space-delimited granted scope.
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Additional grant extension data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Token entry storing both access and refresh tokens for one grant.
struct TokenEntry {
    access_token: String,
    refresh_token: Option<String>,
    grant: Grant,
    expiry: DateTime<Utc>,
}

/// JWT-backed token issuer.
///
/// Not thread-safe on its own; the provider state wraps it in a mutex and
/// hands out guards to the engine.
pub struct JwtIssuer {
    /// Maps access token strings to their entries, for recovery.
    access_tokens: HashMap<String, Arc<TokenEntry>>,
    /// Maps refresh token strings to the same entries.
    refresh_tokens: HashMap<String, Arc<TokenEntry>>,
    signing_key: EncodingKey,
    verification_key: DecodingKey,
    /// Random generator for opaque refresh tokens.
    refresh_generator: RandomGenerator,
    token_duration: Option<Duration>,
    issuer: String,
    /// Ensures unique jti values across issued tokens.
    usage_counter: u64,
    algorithm: Algorithm,
    /// Profile claims registered per account at login.
    accounts: HashMap<String, AccountClaims>,
}

impl JwtIssuer {
    /// Create an issuer signing with HMAC-SHA256.
    pub fn new(secret: &[u8]) -> Self {
        JwtIssuer {
            access_tokens: HashMap::new(),
            refresh_tokens: HashMap::new(),
            signing_key: EncodingKey::from_secret(secret),
            verification_key: DecodingKey::from_secret(secret),
            refresh_generator: RandomGenerator::new(16),
            token_duration: Some(Duration::hours(1)),
            issuer: "login-gateway".to_string(),
            usage_counter: 0,
            algorithm: Algorithm::HS256,
            accounts: HashMap::new(),
        }
    }

    /// Create an issuer signing with RS256 from base64-encoded PEM keys.
    pub fn with_rs256_pem(private_key_b64: &str, public_key_b64: &str) -> anyhow::Result<Self> {
        let private_pem = base64::engine::general_purpose::STANDARD
            .decode(private_key_b64)
            .map_err(|e| anyhow::anyhow!("RS256 private key is not valid base64: {}", e))?;
        let public_pem = base64::engine::general_purpose::STANDARD
            .decode(public_key_b64)
            .map_err(|e| anyhow::anyhow!("RS256 public key is not valid base64: {}", e))?;

        let signing_key = EncodingKey::from_rsa_pem(&private_pem)
            .map_err(|e| anyhow::anyhow!("invalid RS256 private key: {}", e))?;
        let verification_key = DecodingKey::from_rsa_pem(&public_pem)
            .map_err(|e| anyhow::anyhow!("invalid RS256 public key: {}", e))?;

        Ok(JwtIssuer {
            access_tokens: HashMap::new(),
            refresh_tokens: HashMap::new(),
            signing_key,
            verification_key,
            refresh_generator: RandomGenerator::new(16),
            token_duration: Some(Duration::hours(1)),
            issuer: "login-gateway".to_string(),
            usage_counter: 0,
            algorithm: Algorithm::RS256,
            accounts: HashMap::new(),
        })
    }

    /// Sets the issuer identifier placed in the `iss` claim.
    pub fn with_issuer(&mut self, issuer: impl Into<String>) -> &mut Self {
        self.issuer = issuer.into();
        self
    }

    /// Set the validity of all issued tokens to the specified duration.
    pub fn valid_for(&mut self, duration: Duration) -> &mut Self {
        self.token_duration = Some(duration);
        self
    }

    /// Remember the profile claims resolved for an account.
    ///
    /// Tokens issued for this subject afterwards carry the claims.
    pub fn register_account_claims(&mut self, account_id: impl Into<String>, claims: AccountClaims) {
        self.accounts.insert(account_id.into(), claims);
    }

    /// Create token claims from a grant.
    fn create_claims(&self, grant: &Grant, now: DateTime<Utc>, expiry: DateTime<Utc>) -> AccessClaims {
        let mut metadata = HashMap::new();

        for (key, value) in grant.extensions.public() {
            if let Some(val) = value {
                metadata.insert(key.to_string(), val.to_string());
            } else {
                metadata.insert(key.to_string(), "true".to_string());
            }
        }

        // Needed to reconstruct the grant when a token is recovered after a
        // restart of the in-memory maps.
        metadata.insert("redirect_uri".to_string(), grant.redirect_uri.to_string());

        let jti = format!("{}-{}", grant.client_id, self.usage_counter);
        let account = self.accounts.get(&grant.owner_id).cloned().unwrap_or_default();

        AccessClaims {
            sub: grant.owner_id.clone(),
            iat: now.timestamp(),
            exp: expiry.timestamp(),
            nbf: now.timestamp(),
            jti,
            aud: grant.client_id.clone(),
            iss: self.issuer.clone(),
            scope: grant.scope.to_string(),
            email: account.email,
            name: account.name,
            metadata: if metadata.is_empty() {
                None
            } else {
                Some(metadata)
            },
        }
    }
}

impl Issuer for JwtIssuer {
    fn issue(&mut self, mut grant: Grant) -> Result<IssuedToken, ()> {
        let now = Utc::now();
        if let Some(duration) = self.token_duration {
            grant.until = now + duration;
        }

        let claims = self.create_claims(&grant, now, grant.until);

        let header = Header::new(self.algorithm);
        let access_token = encode(&header, &claims, &self.signing_key).map_err(|_| ())?;

        self.usage_counter += 1;
        let refresh_token = self.refresh_generator.tag(self.usage_counter, &grant).ok();

        let token_entry = Arc::new(TokenEntry {
            access_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            grant: grant.clone(),
            expiry: grant.until,
        });

        self.access_tokens
            .insert(access_token.clone(), Arc::clone(&token_entry));
        if let Some(ref refresh) = refresh_token {
            self.refresh_tokens
                .insert(refresh.clone(), Arc::clone(&token_entry));
        }

        Ok(IssuedToken {
            token: access_token,
            refresh: refresh_token,
            until: grant.until,
            token_type: TokenType::Bearer,
        })
    }

    fn refresh(&mut self, refresh: &str, mut grant: Grant) -> Result<RefreshedToken, ()> {
        // Copy what we need out of the entry before mutating the maps.
        let (old_access_token, old_refresh_token) = {
            let token_entry = self.refresh_tokens.get(refresh).ok_or(())?;

            if token_entry.grant.client_id != grant.client_id
                || token_entry.grant.owner_id != grant.owner_id
            {
                return Err(());
            }

            (
                token_entry.access_token.clone(),
                token_entry.refresh_token.clone(),
            )
        };

        let now = Utc::now();
        if let Some(duration) = self.token_duration {
            grant.until = now + duration;
        }

        let claims = self.create_claims(&grant, now, grant.until);

        let header = Header::new(self.algorithm);
        let new_access_token = encode(&header, &claims, &self.signing_key).map_err(|_| ())?;

        self.usage_counter += 1;
        let new_refresh_token = self.refresh_generator.tag(self.usage_counter, &grant).ok();

        self.access_tokens.remove(&old_access_token);
        if let Some(ref old_refresh) = old_refresh_token {
            self.refresh_tokens.remove(old_refresh);
        }

        let new_token_entry = Arc::new(TokenEntry {
            access_token: new_access_token.clone(),
            refresh_token: new_refresh_token.clone(),
            grant: grant.clone(),
            expiry: grant.until,
        });

        self.access_tokens
            .insert(new_access_token.clone(), Arc::clone(&new_token_entry));
        if let Some(ref refresh) = new_refresh_token {
            self.refresh_tokens
                .insert(refresh.clone(), Arc::clone(&new_token_entry));
        }

        Ok(RefreshedToken {
            token: new_access_token,
            refresh: new_refresh_token,
            until: grant.until,
            token_type: TokenType::Bearer,
        })
    }

    fn recover_token<'a>(&'a self, token: &'a str) -> Result<Option<Grant>, ()> {
        if let Some(entry) = self.access_tokens.get(token) {
            if entry.expiry < Utc::now() {
                return Ok(None);
            }
            return Ok(Some(entry.grant.clone()));
        }

        // Not in the map, fall back to verifying the JWT itself.
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);

        let token_data = match decode::<AccessClaims>(token, &self.verification_key, &validation) {
            Ok(data) => data,
            Err(err) => {
                log::debug!("JWT validation failed: {:?}", err);
                return Ok(None);
            }
        };

        let exp_time = Utc
            .timestamp_opt(token_data.claims.exp, 0)
            .single()
            .ok_or(())?;

        let mut extensions = Extensions::new();
        let mut redirect_uri_str = String::new();

        if let Some(metadata) = &token_data.claims.metadata {
            for (key, value) in metadata {
                if key == "redirect_uri" {
                    redirect_uri_str = value.clone();
                } else {
                    extensions.set_raw(key.clone(), Value::public(Some(value.clone())));
                }
            }
        }

        let redirect_uri = match redirect_uri_str.parse::<Url>() {
            Ok(url) => url,
            Err(e) => {
                log::debug!("Token metadata has no usable redirect URI: {}", e);
                return Ok(None);
            }
        };

        let grant = Grant {
            owner_id: token_data.claims.sub,
            client_id: token_data.claims.aud,
            scope: token_data.claims.scope.parse().map_err(|e| {
                log::error!("Failed to parse scope from token: {}", e);
            })?,
            redirect_uri,
            until: exp_time,
            extensions,
        };

        Ok(Some(grant))
    }

    fn recover_refresh<'a>(&'a self, token: &'a str) -> Result<Option<Grant>, ()> {
        match self.refresh_tokens.get(token) {
            Some(entry) => {
                if entry.expiry < Utc::now() {
                    Ok(None)
                } else {
                    Ok(Some(entry.grant.clone()))
                }
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_grant() -> Grant {
        Grant {
            owner_id: "alice@example.com".to_string(),
            client_id: "foo".to_string(),
            scope: "openid email profile".parse().unwrap(),
            redirect_uri: "http://localhost:3000/callback".parse().unwrap(),
            until: Utc::now(),
            extensions: Extensions::new(),
        }
    }

    #[test]
    fn issued_token_recovers_to_same_grant() {
        let mut issuer = JwtIssuer::new(b"test-secret-key");
        issuer.valid_for(Duration::minutes(5));

        let issued = issuer.issue(test_grant()).unwrap();
        let grant = issuer.recover_token(&issued.token).unwrap().unwrap();
        assert_eq!(grant.owner_id, "alice@example.com");
        assert_eq!(grant.client_id, "foo");
    }

    #[test]
    fn registered_claims_end_up_in_token() {
        let mut issuer = JwtIssuer::new(b"test-secret-key");
        issuer.register_account_claims(
            "alice@example.com",
            AccountClaims {
                email: Some("alice@example.com".to_string()),
                name: None,
            },
        );

        let issued = issuer.issue(test_grant()).unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        let data = decode::<AccessClaims>(
            &issued.token,
            &DecodingKey::from_secret(b"test-secret-key"),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(data.claims.sub, "alice@example.com");
    }

    #[test]
    fn refresh_rotates_both_tokens() {
        let mut issuer = JwtIssuer::new(b"test-secret-key");
        let issued = issuer.issue(test_grant()).unwrap();
        let refresh = issued.refresh.clone().unwrap();

        let renewed = issuer.refresh(&refresh, test_grant()).unwrap();
        assert_ne!(renewed.token, issued.token);
        assert!(issuer.recover_refresh(&refresh).unwrap().is_none());
    }
}
