//! # Gateway Module
//!
//! HTTP surface of the login gateway: the Rocket server with its embedded
//! single-page application, the OIDC provider engine wiring, the login
//! interaction controller and the small JSON convenience API.
//!
//! ## Submodules
//!
//! - [`server`]: Rocket construction, static file serving and SPA fallback
//! - [`provider`]: OIDC endpoints backed by the `oxide-auth` engine
//! - [`interaction`]: pending login interactions and their controller routes
//! - [`account`]: account resolution and the private session cookie
//! - [`jwt`]: JWT access token issuance
//! - [`guard`]: bearer token request guard
//! - [`discovery`]: OIDC discovery document and JWKS endpoints
//! - [`api`]: authorization-URL helper and forgot-password endpoints

pub mod account;
pub mod api;
pub mod discovery;
pub mod guard;
pub mod interaction;
pub mod jwt;
pub mod provider;
pub mod server;

pub use server::{build_rocket, figment_for};

/// Percent-encode key/value pairs for use in a URL fragment.
///
/// The SPA reads feedback out of `location.hash`, so human-readable
/// messages travel as fragment parameters. `serde_urlencoded` emits `+`
/// for spaces, which fragment parsing does not decode, hence the
/// substitution.
pub(crate) fn fragment_pairs(pairs: &[(&str, &str)]) -> String {
    serde_urlencoded::to_string(pairs)
        .unwrap_or_default()
        .replace('+', "%20")
}

/// Build the SPA error-page location for a human-readable message.
pub(crate) fn error_location(message: &str) -> String {
    format!("/error#{}", fragment_pairs(&[("error", message)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_encoding_uses_percent_twenty_for_spaces() {
        assert_eq!(
            error_location("Invalid Credentials"),
            "/error#error=Invalid%20Credentials"
        );
    }

    #[test]
    fn fragment_pairs_joins_with_ampersand() {
        let encoded = fragment_pairs(&[("error", "Not Found"), ("message", "no route")]);
        assert_eq!(encoded, "error=Not%20Found&message=no%20route");
    }
}
