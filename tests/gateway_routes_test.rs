//! Tests for the SPA shell, static assets, fallback routing and the
//! convenience endpoints.

use login_gateway::config::Config;
use login_gateway::gateway;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;

async fn test_client() -> Client {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = Config::default();
    let figment = gateway::figment_for(&config)
        .merge(("port", 0))
        .merge(("log_level", rocket::config::LogLevel::Off));
    let rocket = gateway::build_rocket(figment, &config)
        .await
        .expect("valid gateway");
    Client::tracked(rocket).await.expect("valid rocket instance")
}

#[rocket::async_test]
async fn spa_shell_is_served_at_the_root() {
    let client = test_client().await;

    let response = client.get("/").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::HTML));

    let body = response.into_string().await.expect("body");
    assert!(body.contains("<div id=\"app\">"));
}

#[rocket::async_test]
async fn history_deep_links_fall_back_to_the_shell() {
    let client = test_client().await;

    for path in [
        "/forgot-password",
        "/password-change-success",
        "/logout-success",
        "/error",
        "/some/nested/route",
    ] {
        let response = client.get(path).dispatch().await;
        assert_eq!(response.status(), Status::Ok, "{path} should serve the shell");
        let body = response.into_string().await.expect("body");
        assert!(body.contains("<div id=\"app\">"), "{path} should serve the shell");
    }
}

#[rocket::async_test]
async fn static_assets_are_served_with_their_content_type() {
    let client = test_client().await;

    let response = client.get("/app.js").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::JavaScript));

    let response = client.get("/app.css").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::CSS));
}

#[rocket::async_test]
async fn unknown_api_paths_do_not_fall_back_to_the_shell() {
    let client = test_client().await;

    let response = client.get("/api/nope").dispatch().await;
    assert_eq!(response.status(), Status::Found);
    assert_eq!(
        response.headers().get_one("Location"),
        Some("/error#error=Not%20Found")
    );

    let response = client.get("/oidc/nope").dispatch().await;
    assert_eq!(response.status(), Status::Found);
    assert_eq!(
        response.headers().get_one("Location"),
        Some("/error#error=Not%20Found")
    );
}

#[rocket::async_test]
async fn responses_carry_hardening_and_cors_headers() {
    let client = test_client().await;

    let response = client.get("/").dispatch().await;
    assert_eq!(
        response.headers().get_one("X-Content-Type-Options"),
        Some("nosniff")
    );
    assert_eq!(
        response.headers().get_one("Access-Control-Allow-Origin"),
        Some("*")
    );
}

#[rocket::async_test]
async fn forgot_password_lands_on_the_confirmation_page() {
    let client = test_client().await;

    let response = client
        .post("/api/forgot-password")
        .header(ContentType::Form)
        .body("email=carol@example.com")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Found);
    assert_eq!(
        response.headers().get_one("Location"),
        Some("/password-change-success#email=carol%40example.com")
    );
}
