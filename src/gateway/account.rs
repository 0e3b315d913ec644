//! Account resolution and the browser session cookie.
//!
//! The gateway has no user store: any syntactically valid email combined
//! with the configured password is accepted, and an account is synthesized
//! from the email itself. A configurable resolver delay mimics the latency
//! of a real directory lookup.

use base64::Engine;
use log::debug;
use pwhash::unix;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use serde_json::json;
use std::time::Duration;

use crate::config::Config;
use crate::gateway::jwt::AccountClaims;

/// Name of the private cookie holding the authenticated browser session.
pub const SESSION_COOKIE: &str = "account_session";

/// A resolved account.
#[derive(Debug, Clone)]
pub struct Account {
    /// Stable account identifier, the login email.
    pub account_id: String,
    /// Profile claims for token issuance.
    pub claims: AccountClaims,
}

/// Maps a login identifier to an account.
pub trait AccountResolver {
    /// Simulated lookup latency to apply before resolving.
    fn latency(&self) -> Duration;

    /// Resolve an identifier to an account, or `None` if it is not a
    /// usable login.
    fn resolve(&self, id: &str) -> Option<Account>;
}

/// Resolver that synthesizes an account from the email itself.
pub struct SimulatedDirectory {
    delay: Duration,
}

impl SimulatedDirectory {
    pub fn from_config(config: &Config) -> Self {
        SimulatedDirectory {
            delay: Duration::from_millis(config.access.resolver_delay_ms),
        }
    }
}

impl AccountResolver for SimulatedDirectory {
    fn latency(&self) -> Duration {
        self.delay
    }

    fn resolve(&self, id: &str) -> Option<Account> {
        if !is_plausible_email(id) {
            return None;
        }
        Some(Account {
            account_id: id.to_string(),
            claims: AccountClaims {
                email: Some(id.to_string()),
                name: None,
            },
        })
    }
}

/// Minimal email shape check: one `@` with non-empty parts, no whitespace.
fn is_plausible_email(id: &str) -> bool {
    if id.chars().any(char::is_whitespace) {
        return false;
    }
    match id.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

/// Verify a submitted password against the configured base64-encoded hash.
///
/// The decoded value is a Unix crypt style hash (`$algo$salt$hash`);
/// trailing newline bytes from `openssl passwd | base64` piping are
/// stripped before verification.
pub fn verify_password(password: &str, password_hash_b64: &str) -> bool {
    let Ok(hash_bytes) = base64::engine::general_purpose::STANDARD.decode(password_hash_b64) else {
        return false;
    };
    let hash_bytes = if hash_bytes.last() == Some(&b'\n') {
        &hash_bytes[..hash_bytes.len() - 1]
    } else {
        &hash_bytes[..]
    };
    let hash_bytes = if hash_bytes.last() == Some(&b'\r') {
        &hash_bytes[..hash_bytes.len() - 1]
    } else {
        hash_bytes
    };
    let Ok(stored_hash) = std::str::from_utf8(hash_bytes) else {
        return false;
    };
    unix::verify(password, stored_hash)
}

/// Encode an account into the session cookie value.
///
/// Base64 over a small JSON object; confidentiality and integrity come
/// from Rocket's private cookie encryption, not from this encoding.
pub fn encode_session(account: &Account) -> String {
    let data = json!({
        "sub": account.account_id,
        "email": account.claims.email,
        "name": account.claims.name,
    });
    base64::engine::general_purpose::STANDARD.encode(data.to_string())
}

fn decode_session(cookie_value: &str) -> Option<Account> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(cookie_value)
        .ok()?;
    let data: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let sub = data.get("sub").and_then(|v| v.as_str())?;
    Some(Account {
        account_id: sub.to_string(),
        claims: AccountClaims {
            email: data
                .get("email")
                .and_then(|v| v.as_str())
                .map(String::from),
            name: data.get("name").and_then(|v| v.as_str()).map(String::from),
        },
    })
}

/// Request guard for the authenticated browser session.
///
/// Forwards rather than fails when no session is present, so handlers can
/// fall back to the login detour.
pub struct SessionAccount {
    pub account_id: String,
    pub email: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionAccount {
    type Error = ();

    async fn from_request(request: &'r rocket::Request<'_>) -> Outcome<Self, Self::Error> {
        let cookies = request.cookies();

        if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
            if let Some(account) = decode_session(cookie.value()) {
                debug!("Session resolved for {}", account.account_id);
                return Outcome::Success(SessionAccount {
                    account_id: account.account_id,
                    email: account.claims.email,
                });
            }
        }
        Outcome::Forward(Status::Unauthorized)
    }
}
