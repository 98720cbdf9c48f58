//! Authorization server metadata discovery
//!
//! Fetches `{issuer}/.well-known/openid-configuration`, checks that the
//! document really belongs to the issuer that was asked for, and caches it
//! per issuer with a single-flight refresh policy.

use std::sync::Arc;

use oauth_wire::{DISCOVERY_PATH, DiscoveryDocument};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheStatsSnapshot, SingleFlightCache};
use crate::config::DiscoveryConfig;
use crate::failsafe::{RetryPolicy, Transient, with_retry};

/// Discovery failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// The issuer is not a well-formed URL or uses an insecure scheme
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Connection failure or timeout
    #[error("Authorization server unreachable: {0}")]
    Unreachable(String),

    /// The server answered, but not with a usable response
    #[error("Discovery request failed: {message}")]
    Network {
        /// HTTP status, if the server responded
        status: Option<u16>,
        /// Failure detail
        message: String,
    },

    /// The document is not valid metadata
    #[error("Malformed discovery document: {0}")]
    Malformed(String),

    /// The document names a different issuer than the one requested
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Issuer that was requested
        expected: String,
        /// Issuer found in the document
        actual: String,
    },
}

impl Transient for DiscoveryError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Network { status, .. } => status.is_none_or(|s| s >= 500),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unreachable(e.to_string())
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Network {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

/// Resolves and caches discovery documents
pub struct DiscoveryResolver {
    http: Client,
    cache: SingleFlightCache<Arc<DiscoveryDocument>, DiscoveryError>,
    require_https: bool,
    retry: RetryPolicy,
}

impl DiscoveryResolver {
    /// Create a resolver that shares `http` with the other components
    #[must_use]
    pub fn new(http: Client, config: &DiscoveryConfig) -> Self {
        Self {
            http,
            cache: SingleFlightCache::new(config.cache_ttl).with_refresh_cooldown(config.refresh_cooldown),
            require_https: config.require_https,
            retry: RetryPolicy::new(&config.retry),
        }
    }

    /// The HTTP client used for metadata requests
    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.http
    }

    /// Whether metadata must be served over HTTPS
    #[must_use]
    pub fn require_https(&self) -> bool {
        self.require_https
    }

    /// Resolve the discovery document for `issuer`, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the issuer is invalid, the server cannot
    /// be reached after bounded retries, or the document is unusable.
    pub async fn resolve(&self, issuer: &str) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        self.resolve_inner(issuer, false).await
    }

    /// Resolve the discovery document for `issuer`, ignoring the cache TTL.
    /// A document younger than the refresh cooldown is still served.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub async fn resolve_fresh(&self, issuer: &str) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        self.resolve_inner(issuer, true).await
    }

    /// Discovery cache statistics
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    async fn resolve_inner(
        &self,
        issuer: &str,
        force_refresh: bool,
    ) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        let issuer_url = parse_issuer(issuer, self.require_https)?;
        let key = normalize_issuer(issuer).to_string();
        let url = discovery_url(&issuer_url);

        self.cache
            .get_or_fetch(&key, force_refresh, || async {
                let doc = with_retry(&self.retry, "discovery", || {
                    fetch_document(&self.http, &url)
                })
                .await
                .inspect_err(|e| warn!(issuer = %key, error = %e, "Discovery failed"))?;

                check_document(&doc, &key, self.require_https)?;
                debug!(
                    issuer = %doc.issuer,
                    token_endpoint = %doc.token_endpoint,
                    "Discovered authorization server"
                );
                Ok(Arc::new(doc))
            })
            .await
    }
}

/// Strip a trailing slash so `https://a/` and `https://a` compare equal
pub(crate) fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

/// Compare issuers ignoring a trailing slash
pub(crate) fn same_issuer(a: &str, b: &str) -> bool {
    normalize_issuer(a) == normalize_issuer(b)
}

fn parse_issuer(issuer: &str, require_https: bool) -> Result<Url, DiscoveryError> {
    let url = Url::parse(issuer).map_err(|e| DiscoveryError::InvalidIssuer(format!("{issuer}: {e}")))?;

    match url.scheme() {
        "https" => {}
        "http" if !require_https => {}
        "http" => {
            return Err(DiscoveryError::InvalidIssuer(format!(
                "{issuer}: HTTPS is required"
            )));
        }
        other => {
            return Err(DiscoveryError::InvalidIssuer(format!(
                "{issuer}: unsupported scheme {other}"
            )));
        }
    }

    if url.host_str().is_none() || url.query().is_some() || url.fragment().is_some() {
        return Err(DiscoveryError::InvalidIssuer(format!(
            "{issuer}: issuer must be a host URL without query or fragment"
        )));
    }

    Ok(url)
}

fn discovery_url(issuer: &Url) -> String {
    format!("{}{DISCOVERY_PATH}", normalize_issuer(issuer.as_str()))
}

async fn fetch_document(http: &Client, url: &str) -> Result<DiscoveryDocument, DiscoveryError> {
    debug!(url = %url, "Fetching discovery document");

    let response = http.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::Network {
            status: Some(status.as_u16()),
            message: format!("HTTP {status}"),
        });
    }

    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| DiscoveryError::Malformed(e.to_string()))
}

fn check_document(doc: &DiscoveryDocument, issuer: &str, require_https: bool) -> Result<(), DiscoveryError> {
    if !same_issuer(&doc.issuer, issuer) {
        return Err(DiscoveryError::IssuerMismatch {
            expected: issuer.to_string(),
            actual: doc.issuer.clone(),
        });
    }

    let endpoints = [
        ("token_endpoint", Some(doc.token_endpoint.as_str())),
        ("jwks_uri", Some(doc.jwks_uri.as_str())),
        ("introspection_endpoint", doc.introspection_endpoint.as_deref()),
    ];
    for (name, value) in endpoints {
        let Some(value) = value else { continue };
        let url = Url::parse(value).map_err(|e| DiscoveryError::Malformed(format!("{name}: {e}")))?;
        if require_https && url.scheme() != "https" {
            return Err(DiscoveryError::Malformed(format!("{name} must use HTTPS")));
        }
    }

    if !doc.supports_client_credentials() {
        warn!(issuer = %issuer, "Issuer does not advertise the client_credentials grant");
    }

    Ok(())
}
