//! JSON convenience API for the SPA.
//!
//! Two endpoints: a helper that builds a ready-to-use authorization URL by
//! performing real OIDC discovery against the gateway's own issuer, and the
//! forgot-password submission target.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::debug;
use rand::Rng;
use rocket::form::{Form, FromForm};
use rocket::http::Status;
use rocket::response::{Redirect, Responder};
use rocket::{get, post, Request, State};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::gateway::fragment_pairs;

/// Failures while constructing the authorization URL.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("discovery request failed: {0}")]
    Discovery(#[from] reqwest::Error),
    #[error("discovered endpoint is not a valid URL: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'static> {
        log::error!("Authorization URL construction failed: {}", self);
        // Hand off to the default catcher, which lands on the error page.
        Err(Status::InternalServerError)
    }
}

/// The subset of the discovery document the URL helper needs.
#[derive(Debug, Deserialize)]
struct DiscoveredEndpoints {
    authorization_endpoint: String,
}

/// Build an authorization URL for the configured relying party.
///
/// Performs discovery against the gateway's own issuer over HTTP rather
/// than assembling the URL from configuration, so the returned URL always
/// reflects what the provider actually advertises. A fresh nonce is
/// generated on every call.
///
/// `GET /api/url`
#[get("/url")]
pub async fn authorization_url(config: &State<Config>) -> Result<String, ApiError> {
    let discovery_url = format!(
        "{}/oidc/.well-known/openid-configuration",
        config.gateway.issuer_url()
    );
    debug!("Discovering issuer metadata at {}", discovery_url);

    let endpoints: DiscoveredEndpoints = reqwest::get(&discovery_url)
        .await?
        .error_for_status()?
        .json()
        .await?;

    let nonce = URL_SAFE_NO_PAD.encode(rand::rng().random::<[u8; 32]>());

    let helper = &config.url_helper;
    let mut url = Url::parse(&endpoints.authorization_endpoint)?;
    url.query_pairs_mut()
        .append_pair("client_id", &helper.client_id)
        .append_pair("response_type", &helper.response_type)
        .append_pair("redirect_uri", &helper.redirect_uri)
        .append_pair("scope", &helper.scope)
        .append_pair("nonce", &nonce);

    Ok(url.to_string())
}

/// Forgot-password submission.
#[derive(FromForm, Debug)]
pub struct ForgotPasswordForm {
    email: String,
}

/// Accept a forgot-password request and land the browser on the SPA
/// confirmation page, echoing the email in the fragment.
///
/// `POST /api/forgot-password`
#[post("/forgot-password", data = "<form>")]
pub async fn forgot_password(form: Form<ForgotPasswordForm>) -> Redirect {
    Redirect::found(format!(
        "/password-change-success#{}",
        fragment_pairs(&[("email", &form.email)])
    ))
}
