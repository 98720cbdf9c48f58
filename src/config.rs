//! Configuration management
//!
//! Configuration is read once by the binary (YAML file + `REWARDS_AUTH_`
//! environment variables) and handed to each component by reference.
//! Components never read the environment themselves.

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::oauth::ClientCredentials;
use crate::{Error, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "REWARDS_AUTH_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Console client (token acquirer) configuration
    pub client: ClientConfig,
    /// Protected resource gate configuration
    pub resource: GateConfig,
    /// Resource server configuration
    pub server: ServerConfig,
    /// Discovery and key cache configuration
    pub discovery: DiscoveryConfig,
}

/// Console client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Authorization server issuer URL
    pub issuer: String,
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret. Supports a literal value or `env:VAR_NAME`.
    pub client_secret: String,
    /// Scopes to request
    pub scopes: Vec<String>,
    /// Base URL of the protected API
    pub api_base_url: String,
    /// Path of the protected endpoint
    pub api_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            issuer: "https://localhost:44310/".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: vec!["rewardsApi.read".to_string()],
            api_base_url: "https://localhost:7019".to_string(),
            api_path: "/api/rewards".to_string(),
        }
    }
}

impl ClientConfig {
    /// Build client credentials, resolving `env:` indirection for the secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret references an unset variable.
    pub fn credentials(&self) -> Result<ClientCredentials> {
        let secret = resolve_secret(&self.client_secret)?;
        Ok(ClientCredentials::new(
            self.client_id.clone(),
            secret,
            self.scopes.clone(),
        ))
    }

    /// Full URL of the protected endpoint
    #[must_use]
    pub fn api_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.api_path.trim_start_matches('/')
        )
    }
}

/// Protected resource gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Expected issuer (authority) of accepted tokens
    pub authority: String,
    /// Scope every request must carry. `None` accepts any scope.
    pub required_scope: Option<String>,
    /// API resource name. Checked against `aud` and used as the
    /// introspection client id.
    pub api_name: Option<String>,
    /// API secret for introspection. Supports `env:VAR_NAME`.
    /// Reference (opaque) tokens are rejected when unset.
    pub api_secret: Option<String>,
    /// Grace period added to token expiry before rejecting as expired
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            authority: "https://localhost:44310/".to_string(),
            required_scope: Some("rewardsApi.read".to_string()),
            api_name: Some("rewards_api".to_string()),
            api_secret: None,
            clock_skew: Duration::ZERO,
        }
    }
}

impl GateConfig {
    /// Resolve the API secret (expand `env:` references)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret references an unset variable.
    pub fn resolve_api_secret(&self) -> Result<Option<String>> {
        self.api_secret.as_deref().map(resolve_secret).transpose()
    }
}

/// Resource server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7019,
        }
    }
}

/// Discovery, key cache and outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Require HTTPS for issuer metadata. Disable for local development only.
    pub require_https: bool,
    /// How long a discovery document is reused
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// How long a key set is reused before refetching
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,
    /// Minimum interval between forced refreshes of one document or key
    /// set, triggered by unknown key ids
    #[serde(with = "humantime_serde")]
    pub refresh_cooldown: Duration,
    /// Outbound HTTP request timeout
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Retry policy for transient discovery failures
    pub retry: RetryConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            require_https: true,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            jwks_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_cooldown: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Initial backoff
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in URL settings
    fn expand_env_vars(&mut self) {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        for value in [
            &mut self.client.issuer,
            &mut self.client.api_base_url,
            &mut self.resource.authority,
        ] {
            *value = expand_string(&re, value);
        }
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Resolve a secret value: `env:VAR_NAME` reads the variable, anything else
/// is taken literally.
fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).map_err(|_| {
            Error::Config(format!("Environment variable {var_name} is not set"))
        }),
        None => Ok(value.to_string()),
    }
}
