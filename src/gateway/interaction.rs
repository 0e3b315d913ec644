//! Pending login interactions and their controller routes.
//!
//! When an authorization request arrives without a browser session, the
//! original query string is parked here under a random interaction id and
//! the browser is detoured to the SPA login page. Submitting credentials
//! resolves the login prompt, re-parks the request as a consent prompt and
//! routes the browser back through the controller, which replays the
//! request against the authorization endpoint.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use rand::Rng;
use rocket::form::{Form, FromForm};
use rocket::http::{Cookie, CookieJar};
use rocket::response::Redirect;
use rocket::{get, post, State};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::Config;
use crate::gateway::account::{
    encode_session, verify_password, AccountResolver, SimulatedDirectory, SESSION_COOKIE,
};
use crate::gateway::error_location;
use crate::gateway::provider::ProviderState;

/// Readable cookie telling the SPA which interaction its login form
/// belongs to.
pub const INTERACTION_COOKIE: &str = "interaction";

/// What a pending interaction is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// The user must authenticate.
    Login,
    /// The user must decide on a consent request.
    Consent,
}

/// A parked authorization request.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub prompt: Prompt,
    /// Original authorization query string, replayed once resolved.
    pub params: String,
    created: DateTime<Utc>,
}

/// In-memory store of pending interactions.
///
/// Entries expire after the configured TTL; expired entries are swept on
/// every access.
pub struct InteractionStore {
    inner: Mutex<HashMap<String, Interaction>>,
    ttl: Duration,
}

impl InteractionStore {
    pub fn with_ttl(ttl_secs: u64) -> Self {
        InteractionStore {
            inner: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Park a request and hand back its interaction id.
    pub fn create(&self, prompt: Prompt, params: String) -> String {
        let uid = URL_SAFE_NO_PAD.encode(rand::rng().random::<[u8; 16]>());
        let mut inner = self.inner.lock().unwrap();
        let cutoff = Utc::now() - self.ttl;
        inner.retain(|_, interaction| interaction.created > cutoff);
        inner.insert(
            uid.clone(),
            Interaction {
                prompt,
                params,
                created: Utc::now(),
            },
        );
        uid
    }

    /// Look up a live interaction without consuming it.
    pub fn get(&self, uid: &str) -> Option<Interaction> {
        let inner = self.inner.lock().unwrap();
        inner
            .get(uid)
            .filter(|interaction| interaction.created > Utc::now() - self.ttl)
            .cloned()
    }

    /// Consume a resolved interaction.
    pub fn remove(&self, uid: &str) -> Option<Interaction> {
        self.inner.lock().unwrap().remove(uid)
    }
}

/// Credentials submitted by the SPA login form.
#[derive(FromForm, Debug)]
pub struct LoginForm {
    email: String,
    password: String,
}

/// Interaction landing endpoint.
///
/// A login prompt marks the browser with the interaction cookie and sends
/// it to the SPA, whose router shows the login form. A consent prompt
/// replays the parked request, which the authorization endpoint answers
/// with the consent form.
#[get("/<uid>")]
pub async fn interaction_prompt(
    uid: &str,
    interactions: &State<InteractionStore>,
    cookies: &CookieJar<'_>,
) -> Redirect {
    let Some(interaction) = interactions.get(uid) else {
        return Redirect::found(error_location("interaction session not found"));
    };

    match interaction.prompt {
        Prompt::Login => {
            let mut cookie = Cookie::new(INTERACTION_COOKIE, uid.to_string());
            cookie.set_path("/");
            cookies.add(cookie);
            Redirect::found("/")
        }
        Prompt::Consent => {
            // Consent prompts are single-use; the authorization endpoint
            // decides whether a form is shown or consent is automatic.
            interactions.remove(uid);
            Redirect::found(format!("/oidc/authorize?{}", interaction.params))
        }
    }
}

/// Login submission endpoint.
///
/// Verifies the credential, resolves the account (after the simulated
/// directory delay), establishes the private session cookie and advances
/// the parked request to a consent prompt.
#[post("/<uid>/login", data = "<form>")]
pub async fn interaction_login(
    uid: &str,
    form: Form<LoginForm>,
    interactions: &State<InteractionStore>,
    directory: &State<SimulatedDirectory>,
    provider: &State<ProviderState>,
    config: &State<Config>,
    cookies: &CookieJar<'_>,
) -> Redirect {
    let Some(interaction) = interactions.get(uid) else {
        return Redirect::found(error_location("interaction session not found"));
    };

    if !verify_password(&form.password, &config.access.password_hash) {
        debug!("Login rejected for interaction {}", uid);
        return Redirect::found(error_location("Invalid Credentials"));
    }

    rocket::tokio::time::sleep(directory.latency()).await;
    let Some(account) = directory.resolve(&form.email) else {
        return Redirect::found(error_location("Invalid Credentials"));
    };

    if let Ok(mut issuer) = provider.issuer.lock() {
        issuer.register_account_claims(account.account_id.clone(), account.claims.clone());
    }

    let mut session = Cookie::new(SESSION_COOKIE, encode_session(&account));
    session.set_http_only(true);
    session.set_path("/");
    session.set_max_age(rocket::time::Duration::hours(1));
    cookies.add_private(session);

    // The login prompt is resolved; the request is re-parked as a consent
    // prompt and the browser routed back through the interaction controller.
    let next = interactions.create(Prompt::Consent, interaction.params);
    interactions.remove(uid);
    cookies.remove(Cookie::build(INTERACTION_COOKIE).path("/"));

    debug!("Interaction {} resolved for {}", uid, account.account_id);
    Redirect::found(format!("/interaction/{}", next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parked_params_survive_the_round_trip() {
        let store = InteractionStore::with_ttl(600);
        let uid = store.create(Prompt::Login, "client_id=foo&scope=openid".to_string());

        let interaction = store.get(&uid).unwrap();
        assert_eq!(interaction.prompt, Prompt::Login);
        assert_eq!(interaction.params, "client_id=foo&scope=openid");

        store.remove(&uid);
        assert!(store.get(&uid).is_none());
    }

    #[test]
    fn expired_interactions_are_not_returned() {
        let store = InteractionStore::with_ttl(0);
        let uid = store.create(Prompt::Login, String::new());
        assert!(store.get(&uid).is_none());
    }

    #[test]
    fn interaction_ids_are_unique() {
        let store = InteractionStore::with_ttl(600);
        let a = store.create(Prompt::Login, String::new());
        let b = store.create(Prompt::Login, String::new());
        assert_ne!(a, b);
    }
}
