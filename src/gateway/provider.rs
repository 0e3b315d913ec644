//! OIDC provider endpoints backed by the `oxide-auth` engine.
//!
//! The gateway itself performs no protocol logic: client registration,
//! authorization codes and token issuance all live inside the engine. The
//! handlers here wire Rocket requests into the engine's flows and translate
//! its outcomes into the gateway's browser-facing conventions.
//!
//! ## Endpoints
//!
//! - `GET /oidc/authorize`: authorization entry point; unauthenticated
//!   browsers are detoured through a login interaction
//! - `POST /oidc/authorize`: consent decision submission
//! - `POST /oidc/token`: code-for-token exchange and token refresh
//! - `POST /oidc/refresh`: dedicated refresh endpoint
//! - `GET /oidc/userinfo`: claims for a bearer access token
//! - `GET /oidc/session/end`: RP-initiated logout
//!
//! Machine-facing endpoints answer with standard OAuth error responses;
//! browser-facing failures redirect to the SPA error page instead.

use std::sync::{Arc, Mutex};

use handlebars::Handlebars;
use log::debug;
use oxide_auth::endpoint::{
    AccessTokenFlow, AuthorizationFlow, OwnerConsent, Solicitation, WebRequest,
};
use oxide_auth::frontends::simple::endpoint::{Error as EndpointError, FnSolicitor, Generic, Vacant};
use oxide_auth::frontends::simple::extensions::{AddonList, Extended, Pkce};
use oxide_auth::primitives::prelude::*;
use oxide_auth::primitives::registrar::RegisteredUrl;
use oxide_auth_rocket::{OAuthFailure, OAuthRequest, OAuthResponse};
use rocket::http::{Cookie, CookieJar};
use rocket::response::{Redirect, Responder};
use rocket::serde::json::Json;
use rocket::{get, post, Request, State};
use serde::Serialize;
use serde_json::json;
use url::Url;

use crate::config::Config;
use crate::gateway::account::{SessionAccount, SESSION_COOKIE};
use crate::gateway::guard::OAuthBearer;
use crate::gateway::interaction::{InteractionStore, Prompt};
use crate::gateway::jwt::JwtIssuer;
use crate::gateway::{error_location, fragment_pairs};

/// Central state container for the provider engine.
///
/// Holds the registrar, authorizer and issuer shared by every engine flow,
/// plus the pre-consented scope set fixed at construction time. Cloning is
/// cheap and shares the underlying state.
pub struct ProviderState {
    /// Registered relying-party clients.
    registrar: Arc<Mutex<ClientMap>>,

    /// Authorization code storage, 16 byte random keys to a memory map.
    authorizer: Arc<Mutex<AuthMap<RandomGenerator>>>,

    /// JWT access token issuer.
    pub issuer: Arc<Mutex<JwtIssuer>>,

    /// Scopes granted without asking, decided at construction time.
    auto_consent: Option<Scope>,

    /// Code-grant addons, currently the PKCE challenge/verifier check.
    addons: AddonList,
}

impl Clone for ProviderState {
    fn clone(&self) -> Self {
        ProviderState {
            registrar: Arc::clone(&self.registrar),
            authorizer: Arc::clone(&self.authorizer),
            issuer: Arc::clone(&self.issuer),
            auto_consent: self.auto_consent.clone(),
            addons: self.addons.clone(),
        }
    }
}

impl ProviderState {
    /// Build the engine state from the configuration.
    ///
    /// Clients carrying a secret are registered as confidential, the rest
    /// as public. The first allowed callback is the registered redirect
    /// URI; the remainder become additional redirect URIs.
    pub fn preconfigured(config: &Config) -> anyhow::Result<Self> {
        let mut client_map: Vec<Client> = vec![];
        for client in &config.access.clients {
            debug!("Registering client: {:?}", client.client_id);
            let registered =
                RegisteredUrl::Semantic(client.allowed_callbacks[0].parse::<Url>()?);
            let scope = client.default_scope.parse::<Scope>().map_err(|e| {
                anyhow::anyhow!("invalid scope for client {}: {:?}", client.client_id, e)
            })?;
            let mut oauth_client = match &client.client_secret {
                Some(secret) => Client::confidential(
                    client.client_id.as_str(),
                    registered,
                    scope,
                    secret.as_bytes(),
                ),
                None => Client::public(client.client_id.as_str(), registered, scope),
            };
            for callback in &client.allowed_callbacks[1..] {
                oauth_client = oauth_client.with_additional_redirect_uris(vec![
                    RegisteredUrl::Semantic(callback.parse::<Url>()?),
                ]);
                debug!("  - additional redirect uri: {:?}", callback);
            }
            client_map.push(oauth_client);
        }

        // RS256 when a key pair is configured, HS256 on the shared secret
        // otherwise.
        let mut jwt_issuer = if config.gateway.rs256_private_key.is_empty()
            || config.gateway.rs256_public_key.is_empty()
        {
            JwtIssuer::new(config.gateway.hmac_secret.as_bytes())
        } else {
            JwtIssuer::with_rs256_pem(
                &config.gateway.rs256_private_key,
                &config.gateway.rs256_public_key,
            )?
        };
        jwt_issuer
            .with_issuer(format!("{}/oidc", config.gateway.issuer_url()))
            .valid_for(chrono::Duration::seconds(config.provider.token_ttl_secs as i64));

        let auto_consent = match &config.provider.auto_consent_scopes {
            Some(scopes) => Some(
                scopes
                    .parse::<Scope>()
                    .map_err(|e| anyhow::anyhow!("invalid auto-consent scope: {:?}", e))?,
            ),
            None => None,
        };

        // S256 is enforced whenever the client sent a challenge; clients
        // without one are still accepted.
        let mut addons = AddonList::new();
        addons.push_code(Pkce::optional());

        Ok(ProviderState {
            registrar: Arc::new(Mutex::new(client_map.into_iter().collect::<ClientMap>())),
            authorizer: Arc::new(Mutex::new(AuthMap::new(RandomGenerator::new(16)))),
            issuer: Arc::new(Mutex::new(jwt_issuer)),
            auto_consent,
            addons,
        })
    }

    /// Create an engine endpoint over this state.
    ///
    /// # Panics
    ///
    /// Panics if one of the internal mutexes is poisoned.
    pub fn endpoint(&self) -> Generic<impl Registrar + '_, impl Authorizer + '_, impl Issuer + '_> {
        Generic {
            registrar: self.registrar.lock().unwrap(),
            authorizer: self.authorizer.lock().unwrap(),
            issuer: self.issuer.lock().unwrap(),
            // Solicitor configured later.
            solicitor: Vacant,
            // Scope configured later.
            scopes: Vacant,
            // `rocket::Response` is `Default`, so we don't need more configuration.
            response: Vacant,
        }
    }

    /// Wrap an endpoint with the code-grant addons.
    fn extended<Inner>(&self, inner: Inner) -> Extended<Inner, AddonList> {
        Extended {
            inner,
            addons: self.addons.clone(),
        }
    }
}

/// Responder for the authorization endpoint.
///
/// The endpoint either continues an engine flow, detours the browser to a
/// login interaction, or reports a failure on the SPA error page.
pub enum AuthorizeOutcome {
    Flow(OAuthResponse),
    Redirect(Redirect),
}

impl<'r> Responder<'r, 'r> for AuthorizeOutcome {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'r> {
        match self {
            AuthorizeOutcome::Flow(response) => response.respond_to(request),
            AuthorizeOutcome::Redirect(redirect) => redirect.respond_to(request),
        }
    }
}

/// OAuth 2.0 / OIDC authorization endpoint.
///
/// With a valid session cookie the request goes straight into the engine's
/// authorization flow; the solicitor consents on the user's behalf when the
/// requested scope is covered by the pre-consented set and renders the
/// consent form otherwise. Without a session the original query string is
/// parked in a pending interaction and the browser is sent to the login
/// controller.
#[get("/authorize")]
pub fn authorize<'r>(
    mut oauth: OAuthRequest<'r>,
    session: Option<SessionAccount>,
    state: &State<ProviderState>,
    interactions: &State<InteractionStore>,
) -> AuthorizeOutcome {
    // Pull the parameters out before the request is moved into the flow.
    let params = {
        let query = match oauth.query() {
            Ok(query) => query,
            Err(_) => {
                return AuthorizeOutcome::Redirect(Redirect::found(error_location("Bad Request")))
            }
        };
        let mut pairs: Vec<(String, String)> = Vec::new();
        for key in [
            "response_type",
            "client_id",
            "redirect_uri",
            "scope",
            "state",
            "nonce",
            "code_challenge",
            "code_challenge_method",
        ] {
            if let Some(value) = query.unique_value(key) {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
        pairs
    };

    let session = match session {
        Some(session) => session,
        None => {
            // No authenticated browser session: park the request and send
            // the user agent through the login interaction.
            // %20 instead of + so the string replays identically whether it
            // is parsed as a query or shown to the user.
            let query_string = serde_urlencoded::to_string(&params)
                .unwrap_or_default()
                .replace('+', "%20");
            let uid = interactions.create(Prompt::Login, query_string);
            debug!("Authorization detoured to interaction {}", uid);
            return AuthorizeOutcome::Redirect(Redirect::found(format!("/interaction/{}", uid)));
        }
    };

    let account_id = session.account_id.clone();
    let email = session.email.clone().unwrap_or_else(|| session.account_id.clone());
    let auto_consent = state.auto_consent.clone();
    let replay = params;
    let endpoint = state.endpoint().with_solicitor(FnSolicitor(
        move |_: &mut OAuthRequest<'r>, solicitation: Solicitation<'_>| {
            let covered = auto_consent
                .as_ref()
                .map(|auto| auto.priviledged_to(&solicitation.pre_grant().scope))
                .unwrap_or(false);
            if covered {
                OwnerConsent::Authorized(account_id.clone())
            } else {
                let output = consent_page_html("/oidc/authorize", solicitation, &email, &replay);
                OwnerConsent::InProgress(OAuthResponse::new().body_html(&output).to_owned())
            }
        },
    ));
    let result = AuthorizationFlow::prepare(state.extended(endpoint))
        .and_then(|mut flow| flow.execute(oauth));

    match result {
        Ok(response) => AuthorizeOutcome::Flow(response),
        Err(err) => AuthorizeOutcome::Redirect(Redirect::found(flow_error_location(err))),
    }
}

/// Consent decision submission endpoint.
///
/// Completes a pending authorization after an explicit Accept or Deny on
/// the consent form. Requires the session that started the flow.
#[post("/authorize?<allow>")]
pub fn authorize_consent<'r>(
    oauth: OAuthRequest<'r>,
    allow: Option<bool>,
    session: Option<SessionAccount>,
    state: &State<ProviderState>,
) -> AuthorizeOutcome {
    let session = match session {
        Some(session) => session,
        None => return AuthorizeOutcome::Redirect(Redirect::found(error_location("Bad Request"))),
    };

    let allowed = allow.unwrap_or(false);
    let account_id = session.account_id.clone();
    let endpoint = state.endpoint().with_solicitor(FnSolicitor(
        move |_: &mut OAuthRequest<'r>, _: Solicitation<'_>| {
            if allowed {
                OwnerConsent::Authorized(account_id.clone())
            } else {
                OwnerConsent::Denied
            }
        },
    ));
    let result = AuthorizationFlow::prepare(state.extended(endpoint))
        .and_then(|mut flow| flow.execute(oauth));

    match result {
        Ok(response) => AuthorizeOutcome::Flow(response),
        Err(err) => AuthorizeOutcome::Redirect(Redirect::found(flow_error_location(err))),
    }
}

/// OAuth 2.0 token endpoint.
///
/// Exchanges an authorization code for tokens, or refreshes an access token
/// when `grant_type=refresh_token` is submitted. This endpoint is spoken to
/// by client software, so failures stay standard OAuth error responses.
#[post("/token", data = "<oauth>")]
pub async fn token<'r>(
    mut oauth: OAuthRequest<'r>,
    state: &State<ProviderState>,
) -> Result<OAuthResponse, OAuthFailure> {
    let is_refresh = {
        let body = oauth.urlbody()?;
        body.unique_value("grant_type").as_deref() == Some("refresh_token")
    };

    if is_refresh {
        state
            .endpoint()
            .refresh_flow()
            .execute(oauth)
            .map_err(|err| err.pack::<OAuthFailure>())
    } else {
        AccessTokenFlow::prepare(state.extended(state.endpoint()))
            .and_then(|mut flow| flow.execute(oauth))
            .map_err(|err| err.pack::<OAuthFailure>())
    }
}

/// Dedicated token refresh endpoint.
///
/// Accepts the same `grant_type=refresh_token` form as the token endpoint,
/// for clients that prefer a separate refresh URL.
#[post("/refresh", data = "<oauth>")]
pub async fn refresh<'r>(
    oauth: OAuthRequest<'r>,
    state: &State<ProviderState>,
) -> Result<OAuthResponse, OAuthFailure> {
    state
        .endpoint()
        .refresh_flow()
        .execute(oauth)
        .map_err(|err| err.pack::<OAuthFailure>())
}

/// Claims returned from the userinfo endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// OIDC userinfo endpoint.
///
/// Returns the claims embedded in the presented bearer access token.
#[get("/userinfo")]
pub async fn userinfo(auth_bearer: OAuthBearer) -> Json<UserInfoResponse> {
    debug!("Userinfo accessed by {}", auth_bearer.claims.sub);
    Json(UserInfoResponse {
        sub: auth_bearer.claims.sub.clone(),
        email: auth_bearer.claims.email.clone(),
        name: auth_bearer.claims.name.clone(),
    })
}

/// RP-initiated logout endpoint.
///
/// Drops the browser session and lands the user on the SPA logout
/// confirmation page.
#[get("/session/end")]
pub async fn end_session(cookies: &CookieJar<'_>) -> Redirect {
    cookies.remove_private(Cookie::from(SESSION_COOKIE));
    Redirect::found("/logout-success")
}

/// Translate an engine flow failure into an SPA error-page location.
///
/// Mirrors the `error` and `message` fragment parameters the error page
/// knows how to display.
fn flow_error_location(err: EndpointError<OAuthRequest<'_>>) -> String {
    let (error, message) = match &err {
        EndpointError::OAuth(oauth_err) => match oauth_err {
            oxide_auth::endpoint::OAuthError::DenySilently => {
                ("access_denied", "the request was rejected")
            }
            oxide_auth::endpoint::OAuthError::BadRequest => {
                ("invalid_request", "the request is malformed")
            }
            oxide_auth::endpoint::OAuthError::PrimitiveError => {
                ("server_error", "an internal component failed")
            }
        },
        EndpointError::Web(_) => ("invalid_request", "the request could not be read"),
    };
    debug!("Authorization flow failed: {:?}", error);
    format!(
        "/error#{}",
        fragment_pairs(&[("error", error), ("message", message)])
    )
}

/// Render the consent page for an authorization solicitation.
///
/// The decision form replays the full original request query, so state,
/// nonce and PKCE parameters survive the consent round trip.
fn consent_page_html(
    route: &str,
    solicitation: Solicitation,
    email: &str,
    params: &[(String, String)],
) -> String {
    let mut handlebars = Handlebars::new();

    handlebars
        .register_template_string("consent", include_str!("../../resources/forms/consent.hbs"))
        .expect("Failed to register consent template");

    let grant = solicitation.pre_grant();
    let query_params = serde_urlencoded::to_string(params).unwrap_or_default();
    let formatted_scopes = format_scopes(&grant.scope.to_string());

    let data = json!({
        "client_id": grant.client_id.as_str(),
        "redirect_uri": grant.redirect_uri.as_str(),
        "email": email,
        "formatted_scopes": formatted_scopes,
        "route": route,
        "query_params": query_params
    });

    handlebars
        .render("consent", &data)
        .expect("Failed to render consent template")
}

/// Format scope string into HTML list items with icons and descriptions
fn format_scopes(scope: &str) -> String {
    scope
        .split_whitespace()
        .map(|s| {
            let (icon, description) = match s {
                "openid" => ("*", "Verify your identity"),
                "profile" => ("*", "Access your profile information"),
                "email" => ("*", "Access your email address"),
                _ => ("*", s),
            };
            format!(
                r#"<div class="scope-item">
    <span class="icon">{}</span>
    <span class="description">{}</span>
</div>"#,
                icon, description
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}
