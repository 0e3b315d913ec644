//! Tests for configuration loading, validation and command line overrides.

use login_gateway::config::Config;
use tempfile::TempDir;

#[test]
fn missing_file_creates_default_and_reloads() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("config.yaml");

    let config = Config::from_file(&path).expect("default config should be created");
    assert!(path.exists(), "a default configuration file should be written");
    assert_eq!(config.gateway.port, 3000);
    assert_eq!(config.gateway.address, "127.0.0.1");
    assert_eq!(config.access.clients[0].client_id, "foo");
    assert_eq!(config.url_helper.scope, "openid email profile");

    // The written file must round-trip through validation.
    let reloaded = Config::from_file(&path).expect("written default should reload");
    assert_eq!(reloaded.gateway.port, config.gateway.port);
    assert_eq!(reloaded.access.password_hash, config.access.password_hash);
}

#[test]
fn apply_args_overrides_network_settings() {
    let mut config = Config::default();
    config.apply_args(Some(8081), Some("0.0.0.0".to_string()), true);

    assert_eq!(config.gateway.port, 8081);
    assert_eq!(config.gateway.address, "0.0.0.0");
    assert!(config.gateway.production);
    assert_eq!(config.gateway.issuer_url(), "https://login.example.com");
}

#[test]
fn apply_args_without_overrides_keeps_file_values() {
    let mut config = Config::default();
    config.apply_args(None, None, false);

    assert_eq!(config.gateway.port, 3000);
    assert!(!config.gateway.production);
    assert_eq!(config.gateway.issuer_url(), "http://localhost:3000");
}

#[test]
fn rejects_password_hash_that_is_not_a_crypt_hash() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("config.yaml");

    // base64 of "notahash"
    let yaml = "access:\n  password_hash: \"bm90YWhhc2g=\"\n";
    std::fs::write(&path, yaml).expect("write config");

    let err = Config::from_file(&path).expect_err("plain strings must be rejected");
    assert!(
        err.to_string().contains("password"),
        "error should mention the password: {err}"
    );
}

#[test]
fn rejects_schema_violations() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("config.yaml");

    std::fs::write(&path, "gateway:\n  port: \"not-a-port\"\n").expect("write config");

    assert!(Config::from_file(&path).is_err());
    assert!(
        dir.path().join("config.sample.yaml").exists(),
        "a sample config should be written next to the invalid one"
    );
}

#[test]
fn rejects_url_helper_pointing_at_unregistered_client() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("config.yaml");

    std::fs::write(&path, "url_helper:\n  client_id: \"nope\"\n").expect("write config");

    let err = Config::from_file(&path).expect_err("unregistered helper client must be rejected");
    assert!(err.to_string().contains("nope"), "unexpected error: {err}");
}

#[test]
fn rejects_url_helper_redirect_outside_client_callbacks() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("config.yaml");

    std::fs::write(
        &path,
        "url_helper:\n  redirect_uri: \"http://evil.example.com/cb\"\n",
    )
    .expect("write config");

    assert!(Config::from_file(&path).is_err());
}
