//! # Configuration Management
//!
//! Configuration handling for the login gateway. Settings are loaded from a
//! YAML file, validated against an embedded JSON Schema, and may be
//! overridden from the command line.
//!
//! ## Configuration Structure
//!
//! - `gateway`: web server binding, issuer base URLs and key material
//! - `provider`: engine construction options (pre-consented scopes, TTLs)
//! - `access`: relying-party client registrations and the login credential
//! - `url_helper`: parameters for the authorization-URL convenience endpoint
//!
//! ## Usage
//!
//! ```no_run
//! use login_gateway::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(Some(3001), Some("0.0.0.0".to_string()), false);
//!
//! println!("Server port: {}", config.gateway.port);
//! ```

use anyhow::{Context, Result};
use base64::Engine;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

/// Root configuration structure for the login gateway.
///
/// Deserialized from YAML with serde and validated against the JSON schema
/// embedded from `resources/config.schema.json`. Every section falls back to
/// defaults when absent, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Web server and issuer settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider engine construction options.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Relying-party registrations and login credential settings.
    #[serde(default)]
    pub access: AccessConfig,

    /// Settings for the `/api/url` convenience endpoint.
    #[serde(default)]
    pub url_helper: UrlHelperConfig,
}

/// Configuration for the gateway web server.
///
/// Holds network binding parameters, the environment-mode switch between the
/// development and production issuer base URLs, and the JWT key material
/// handed to the provider engine. RS256 keys are stored base64 encoded and
/// default to the development pair embedded from `resources/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// The TCP port the gateway will listen on.
    ///
    /// Valid range is 1-65534. Default value is 3000.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The network address the server will bind to.
    ///
    /// Can be an IPv4/IPv6 address or a hostname. Default is "127.0.0.1".
    /// Use "0.0.0.0" to bind to all IPv4 interfaces.
    #[serde(default = "default_address")]
    pub address: String,

    /// The server name reported in HTTP headers and logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// Selects the production issuer base URL instead of the development one.
    #[serde(default)]
    pub production: bool,

    /// Issuer base URL used while `production` is false.
    #[serde(default = "default_issuer_url_dev")]
    pub issuer_url_dev: String,

    /// Issuer base URL used while `production` is true.
    #[serde(default = "default_issuer_url_prod")]
    pub issuer_url_prod: String,

    /// Secret key for HMAC-based JWT token signing and verification.
    ///
    /// Used when RS256 keys are not available. Not recommended for
    /// production deployments.
    #[serde(default = "default_hmac_secret")]
    pub hmac_secret: String,

    /// RS256 private key in PEM format, Base64 encoded.
    #[serde(default = "default_rs256_private_key")]
    pub rs256_private_key: String,

    /// RS256 public key in PEM format, Base64 encoded.
    #[serde(default = "default_rs256_public_key")]
    pub rs256_public_key: String,

    /// Secret key for the private session cookie (64 bytes, base64).
    #[serde(default = "default_session_secret")]
    pub session_secret: String,
}

impl GatewayConfig {
    /// The environment-selected issuer base URL, without a trailing slash.
    pub fn issuer_url(&self) -> &str {
        let url = if self.production {
            &self.issuer_url_prod
        } else {
            &self.issuer_url_dev
        };
        url.trim_end_matches('/')
    }
}

/// Provider engine construction options.
///
/// Scopes covered by `auto_consent_scopes` are considered pre-consented,
/// so the consent prompt is skipped for requests they cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Scopes considered pre-consented at engine construction time.
    ///
    /// Set to null to require an explicit consent decision for every
    /// authorization request.
    #[serde(default = "default_auto_consent_scopes")]
    pub auto_consent_scopes: Option<String>,

    /// Access token validity in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// How long a pending login interaction stays resolvable, in seconds.
    #[serde(default = "default_interaction_ttl_secs")]
    pub interaction_ttl_secs: u64,
}

/// Relying-party client registrations and the gateway login credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Base64-encoded password hash accepted at the login prompt.
    ///
    /// Should be created using: `openssl passwd -5 <password> | base64 -w0`.
    /// Any syntactically valid email combined with this password is accepted;
    /// accounts are synthesized on demand and never looked up in a store.
    #[serde(default = "default_password_hash")]
    pub password_hash: String,

    /// Simulated directory latency applied by the account resolver, in
    /// milliseconds. Default is 0.
    #[serde(default)]
    pub resolver_delay_ms: u64,

    /// Registered relying-party clients.
    #[serde(default = "default_clients")]
    pub clients: Vec<ClientConfig>,
}

/// Static registration record for one relying-party client.
///
/// Immutable for the process lifetime; loaded into the engine's registrar at
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The client identifier.
    pub client_id: String,

    /// Client secret; omit for public clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Allowed redirect URIs. The first entry is the default callback.
    pub allowed_callbacks: Vec<String>,

    /// Default scope granted to this client.
    pub default_scope: String,

    /// Response types this client may use.
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
}

/// Parameters for the `/api/url` authorization-URL helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlHelperConfig {
    /// Client the URL is constructed for. Must be registered in
    /// `access.clients`.
    #[serde(default = "default_helper_client_id")]
    pub client_id: String,

    /// Redirect URI placed in the constructed URL.
    #[serde(default = "default_helper_redirect_uri")]
    pub redirect_uri: String,

    /// Scope placed in the constructed URL.
    #[serde(default = "default_helper_scope")]
    pub scope: String,

    /// Response type placed in the constructed URL.
    #[serde(default = "default_helper_response_type")]
    pub response_type: String,
}

fn default_port() -> u16 {
    3000
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_name() -> String {
    format!("LoginGateway/{}", env!("CARGO_PKG_VERSION"))
}

fn default_issuer_url_dev() -> String {
    "http://localhost:3000".to_string()
}

fn default_issuer_url_prod() -> String {
    "https://login.example.com".to_string()
}

/// Placeholder HMAC secret; replace with a randomly generated key in
/// production environments. At least 256 bits recommended.
fn default_hmac_secret() -> String {
    "my-super-secret-jwt-key-for-login-gateway".to_string()
}

fn default_rs256_private_key() -> String {
    let key_str = include_str!("../resources/private.key");
    base64::engine::general_purpose::STANDARD.encode(key_str.as_bytes())
}

fn default_rs256_public_key() -> String {
    let key_str = include_str!("../resources/pub.key");
    base64::engine::general_purpose::STANDARD.encode(key_str.as_bytes())
}

/// Generate a random session secret key for private cookies.
fn default_session_secret() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let secret: [u8; 64] = rng.random();
    base64::engine::general_purpose::STANDARD.encode(secret)
}

fn default_auto_consent_scopes() -> Option<String> {
    Some("openid email profile".to_string())
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_interaction_ttl_secs() -> u64 {
    600
}

/// Default password hash for "admin123" (should be changed in production).
fn default_password_hash() -> String {
    "JDUkclEuQTc0YS9zeER3WERCQiR4cnpvYUFPV2kxQnFFd3hGdWdZc1BQU0R0OXZRdEtHdlcuaDZISUFTYlY0Cg==".to_string()
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_clients() -> Vec<ClientConfig> {
    vec![ClientConfig {
        client_id: "foo".to_string(),
        client_secret: Some("bar".to_string()),
        allowed_callbacks: vec![
            "http://localhost:3000/callback".to_string(),
            "http://localhost:3000/".to_string(),
            "http://localhost:3000/about".to_string(),
        ],
        default_scope: "openid email profile".to_string(),
        response_types: default_response_types(),
    }]
}

fn default_helper_client_id() -> String {
    "foo".to_string()
}

fn default_helper_redirect_uri() -> String {
    "http://localhost:3000/callback".to_string()
}

fn default_helper_scope() -> String {
    "openid email profile".to_string()
}

fn default_helper_response_type() -> String {
    "code".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            address: default_address(),
            name: default_name(),
            production: false,
            issuer_url_dev: default_issuer_url_dev(),
            issuer_url_prod: default_issuer_url_prod(),
            hmac_secret: default_hmac_secret(),
            rs256_private_key: default_rs256_private_key(),
            rs256_public_key: default_rs256_public_key(),
            session_secret: default_session_secret(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auto_consent_scopes: default_auto_consent_scopes(),
            token_ttl_secs: default_token_ttl_secs(),
            interaction_ttl_secs: default_interaction_ttl_secs(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            password_hash: default_password_hash(),
            resolver_delay_ms: 0,
            clients: default_clients(),
        }
    }
}

impl Default for UrlHelperConfig {
    fn default() -> Self {
        Self {
            client_id: default_helper_client_id(),
            redirect_uri: default_helper_redirect_uri(),
            scope: default_helper_scope(),
            response_type: default_helper_response_type(),
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Creating sample configuration file at {:?}", sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory for sample config at {:?}", parent)
                })?;
            }
        }

        let sample_config = Self::default();
        sample_config
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is replaced by a freshly written default configuration.
    /// An invalid file fails with a descriptive error after writing a
    /// `*.sample.yaml` next to it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Configuration file not found at {:?}, creating default", path);
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        // Load and validate with the schema
        let schema_str = include_str!("../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = Self::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// # Parameters
    ///
    /// * `port` - TCP port for the gateway
    /// * `address` - network address to bind to
    /// * `production` - if true, selects the production issuer base URL
    pub fn apply_args(&mut self, port: Option<u16>, address: Option<String>, production: bool) {
        if let Some(port) = port {
            debug!("Overriding port from command line: {}", port);
            self.gateway.port = port;
        }

        if let Some(address) = address {
            debug!("Overriding address from command line: {}", address);
            self.gateway.address = address;
        }

        if production {
            debug!("Production issuer selected from command line");
            self.gateway.production = true;
        }
    }

    /// Validates the configuration against rules the JSON schema cannot
    /// express: base64 key material, URL syntax of issuer bases and redirect
    /// URIs, the password hash format, and the helper client registration.
    fn validate_specific_rules(config: &Config) -> Result<()> {
        debug!("Performing additional validation checks");

        if config.gateway.port < 1 || config.gateway.port > 65534 {
            anyhow::bail!("Invalid port number: {}", config.gateway.port);
        }

        if !is_valid_ip_address(&config.gateway.address) {
            debug!("Potentially invalid address format: {}", config.gateway.address);
            // Just issue a warning but don't block
        }

        for issuer in [&config.gateway.issuer_url_dev, &config.gateway.issuer_url_prod] {
            issuer
                .parse::<url::Url>()
                .with_context(|| format!("Issuer base URL is not a valid URL: {}", issuer))?;
        }

        // RS256 keys must be valid base64 encoded PEM strings
        let _ = base64::engine::general_purpose::STANDARD
            .decode(&config.gateway.rs256_private_key)
            .context("RS256 private key is not valid base64")?;
        let _ = base64::engine::general_purpose::STANDARD
            .decode(&config.gateway.rs256_public_key)
            .context("RS256 public key is not valid base64")?;

        // The login password must decode to a SHA-crypt style hash
        let decoded_pass = base64::engine::general_purpose::STANDARD
            .decode(&config.access.password_hash)
            .context("Login password hash is not valid base64")?;
        if !decoded_pass.starts_with(b"$1$")
            && !decoded_pass.starts_with(b"$5$")
            && !decoded_pass.starts_with(b"$6$")
            && !decoded_pass.starts_with(b"$apr1$")
        {
            anyhow::bail!(
                "Login password is not a valid hash, you should use openssl passwd -5 <password> | base64 -w0"
            );
        }

        if config.access.clients.is_empty() {
            anyhow::bail!("At least one relying-party client must be registered");
        }
        for client in &config.access.clients {
            if client.allowed_callbacks.is_empty() {
                anyhow::bail!("Client {} has no allowed callbacks", client.client_id);
            }
            for callback in &client.allowed_callbacks {
                callback.parse::<url::Url>().with_context(|| {
                    format!(
                        "Client {} callback is not a valid URL: {}",
                        client.client_id, callback
                    )
                })?;
            }
            client.default_scope.parse::<oxide_auth::primitives::scope::Scope>().map_err(|e| {
                anyhow::anyhow!("Client {} default scope is invalid: {:?}", client.client_id, e)
            })?;
        }

        // The URL helper must reference a registered client and callback
        let helper = &config.url_helper;
        let registered = config
            .access
            .clients
            .iter()
            .find(|c| c.client_id == helper.client_id)
            .ok_or_else(|| {
                anyhow::anyhow!("url_helper client {} is not registered", helper.client_id)
            })?;
        if !registered
            .allowed_callbacks
            .iter()
            .any(|c| c == &helper.redirect_uri)
        {
            anyhow::bail!(
                "url_helper redirect URI {} is not an allowed callback of client {}",
                helper.redirect_uri,
                helper.client_id
            );
        }

        Ok(())
    }
}

/// Check if a string is a valid IP address
fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Output the embedded JSON schema to the console.
///
/// Called when the `--show-config-schema` flag is provided on the command
/// line.
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../resources/config.schema.json");

    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}
