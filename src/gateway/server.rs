//! Rocket server construction and the embedded single-page application.
//!
//! The compiled SPA in `web/dist` is embedded in the binary at build time.
//! Every path that is not an `oidc/` or `api/` route falls back to the
//! application shell, so browser history navigation deep-links resolve to
//! the client-side router.

use include_dir::{include_dir, Dir};
use log::info;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::{ContentType, Header, Status};
use rocket::response::{Redirect, Responder};
use rocket::{async_trait, catch, catchers, get, options, routes, Build, Rocket};
use rocket::{Request, Response};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::gateway::account::SimulatedDirectory;
use crate::gateway::guard::BearerValidator;
use crate::gateway::interaction::InteractionStore;
use crate::gateway::provider::ProviderState;
use crate::gateway::{api, discovery, error_location, interaction, provider};

const STATIC_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/web/dist");

#[derive(Debug)]
struct StaticFileResponse(Vec<u8>, ContentType);

#[async_trait]
impl<'r> Responder<'r, 'r> for StaticFileResponse {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'static> {
        Response::build()
            .header(self.1)
            .header(Header {
                name: "Cache-Control".into(),
                value: "max-age=604800".into(), // 1 week
            })
            .sized_body(self.0.len(), Cursor::new(self.0))
            .ok()
    }
}

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, PUT, DELETE, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/// Baseline hardening headers on every response.
pub struct SecurityHeaders;

#[rocket::async_trait]
impl Fairing for SecurityHeaders {
    fn info(&self) -> Info {
        Info {
            name: "Add security headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("X-Content-Type-Options", "nosniff"));
        response.set_header(Header::new("X-Frame-Options", "SAMEORIGIN"));
        response.set_header(Header::new("Referrer-Policy", "no-referrer"));
    }
}

/// One log line per handled request, with method, path and status.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Log handled requests",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        info!(
            "{} {} -> {}",
            request.method(),
            request.uri().path(),
            response.status()
        );
    }
}

/// Answers to OPTIONS requests
#[options("/<_path..>")]
async fn all_options(_path: PathBuf) -> Result<(), std::io::Error> {
    Ok(())
}

/// Build the Rocket figment for the given configuration.
///
/// The session secret from the configuration becomes Rocket's cookie
/// `secret_key`, so private cookies survive a restart with the same
/// configuration file.
pub fn figment_for(config: &Config) -> Figment {
    rocket::Config::figment()
        .merge(("port", config.gateway.port))
        .merge(("address", config.gateway.address.clone()))
        .merge(("secret_key", config.gateway.session_secret.clone()))
        .merge(("ident", config.gateway.name.clone()))
}

/// Assemble the gateway Rocket instance.
///
/// Mounts the SPA shell at the root, the provider engine under `/oidc`, the
/// login interaction controller under `/interaction` and the convenience
/// API under `/api`.
pub async fn build_rocket(figment: Figment, config: &Config) -> anyhow::Result<Rocket<Build>> {
    let provider_state = ProviderState::preconfigured(config)?;
    let bearer_validator = Arc::new(BearerValidator::from_config(config)?);
    let interactions = InteractionStore::with_ttl(config.provider.interaction_ttl_secs);
    let directory = SimulatedDirectory::from_config(config);

    let rocket = rocket::custom(figment)
        .attach(SecurityHeaders)
        .attach(CORS)
        .attach(RequestLogger)
        .mount("/", routes![index, favicon, spa_fallback, all_options])
        .mount(
            "/oidc",
            routes![
                provider::authorize,
                provider::authorize_consent,
                provider::token,
                provider::refresh,
                provider::userinfo,
                provider::end_session,
                discovery::openid_configuration,
                discovery::jwks,
            ],
        )
        .mount(
            "/interaction",
            routes![interaction::interaction_prompt, interaction::interaction_login],
        )
        .mount("/api", routes![api::authorization_url, api::forgot_password])
        .register("/", catchers![not_found, internal_error])
        .manage(provider_state)
        .manage(bearer_validator)
        .manage(interactions)
        .manage(directory)
        .manage(config.clone());
    Ok(rocket)
}

fn static_file(path: &str) -> Option<StaticFileResponse> {
    STATIC_DIR.get_file(path).map(|file| {
        let content_type = file
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ContentType::from_extension)
            .unwrap_or(ContentType::Binary);
        StaticFileResponse(file.contents().to_vec(), content_type)
    })
}

/// Serve the application shell at the site root.
#[get("/")]
async fn index() -> Option<StaticFileResponse> {
    static_file("index.html")
}

#[get("/favicon.ico")]
async fn favicon() -> Option<StaticFileResponse> {
    static_file("favicon.ico")
}

/// Serve a static asset, falling back to the application shell.
///
/// Unknown `oidc/` and `api/` paths are excluded from the fallback so they
/// reach the 404 catcher instead of rendering the SPA.
#[get("/<path..>", rank = 20)]
async fn spa_fallback(path: PathBuf) -> Option<StaticFileResponse> {
    let first = path.iter().next().and_then(|s| s.to_str()).unwrap_or("");
    if first == "oidc" || first == "api" {
        return None;
    }

    let path = path.to_str().unwrap_or("");
    static_file(path).or_else(|| static_file("index.html"))
}

/// Unroutable requests land on the SPA error page.
#[catch(404)]
fn not_found(_req: &Request) -> Redirect {
    Redirect::found(error_location("Not Found"))
}

#[catch(default)]
fn internal_error(status: Status, _req: &Request) -> Redirect {
    Redirect::found(error_location(status.reason().unwrap_or("Unknown Error")))
}
