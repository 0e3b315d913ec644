//! Tests for the authorization-URL helper endpoint.
//!
//! The helper performs real HTTP discovery against the configured issuer,
//! so these tests point the issuer at a mock server.

use login_gateway::config::Config;
use login_gateway::gateway;
use rocket::http::Status;
use rocket::local::asynchronous::Client;
use std::collections::HashMap;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_client_with_issuer(issuer: &str) -> Client {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut config = Config::default();
    config.gateway.issuer_url_dev = issuer.to_string();

    let figment = gateway::figment_for(&config)
        .merge(("port", 0))
        .merge(("log_level", rocket::config::LogLevel::Off));
    let rocket = gateway::build_rocket(figment, &config)
        .await
        .expect("valid gateway");
    Client::tracked(rocket).await.expect("valid rocket instance")
}

async fn discovery_mock() -> MockServer {
    let server = MockServer::start().await;
    let authorization_endpoint = format!("{}/oidc/authorize", server.uri());

    Mock::given(method("GET"))
        .and(path("/oidc/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": format!("{}/oidc", server.uri()),
            "authorization_endpoint": authorization_endpoint,
            "token_endpoint": format!("{}/oidc/token", server.uri()),
            "jwks_uri": format!("{}/oidc/.well-known/jwks.json", server.uri()),
        })))
        .mount(&server)
        .await;

    server
}

fn query_map(url: &str) -> HashMap<String, String> {
    url::Url::parse(url)
        .expect("helper returns a valid URL")
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[rocket::async_test]
async fn helper_builds_url_from_discovered_endpoint() {
    let server = discovery_mock().await;
    let client = test_client_with_issuer(&server.uri()).await;

    let response = client.get("/api/url").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let url = response.into_string().await.expect("URL body");
    assert!(
        url.starts_with(&format!("{}/oidc/authorize?", server.uri())),
        "URL should target the discovered endpoint, got {url}"
    );

    let params = query_map(&url);
    assert_eq!(params.get("client_id").map(String::as_str), Some("foo"));
    assert_eq!(
        params.get("response_type").map(String::as_str),
        Some("code")
    );
    assert_eq!(
        params.get("redirect_uri").map(String::as_str),
        Some("http://localhost:3000/callback")
    );
    assert_eq!(
        params.get("scope").map(String::as_str),
        Some("openid email profile")
    );
    assert!(
        params.get("nonce").is_some_and(|nonce| !nonce.is_empty()),
        "a nonce must be present"
    );
}

#[rocket::async_test]
async fn every_call_gets_a_fresh_nonce() {
    let server = discovery_mock().await;
    let client = test_client_with_issuer(&server.uri()).await;

    let first = client.get("/api/url").dispatch().await;
    let second = client.get("/api/url").dispatch().await;

    let first_nonce = query_map(&first.into_string().await.expect("body"))
        .remove("nonce")
        .expect("nonce in first URL");
    let second_nonce = query_map(&second.into_string().await.expect("body"))
        .remove("nonce")
        .expect("nonce in second URL");

    assert_ne!(first_nonce, second_nonce);
}

#[rocket::async_test]
async fn unreachable_issuer_lands_on_the_error_page() {
    // Nothing is listening on this port.
    let client = test_client_with_issuer("http://127.0.0.1:9").await;

    let response = client.get("/api/url").dispatch().await;
    assert_eq!(response.status(), Status::Found);
    let location = response.headers().get_one("Location").expect("redirect");
    assert!(
        location.starts_with("/error#error="),
        "expected the error page, got {location}"
    );
}
