//! JWKS cache, one entry per key set URI.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, JwkSet},
};
use reqwest::Client;
use tracing::{debug, warn};

use super::ValidationError;
use crate::cache::SingleFlightCache;

/// Cached key sets, refreshed single-flight per URI
pub struct JwksCache {
    inner: SingleFlightCache<Arc<JwkSet>, ValidationError>,
    http: Client,
}

impl JwksCache {
    /// Create a cache that reuses a key set for `ttl` and refetches it on
    /// demand at most once per `refresh_cooldown`
    #[must_use]
    pub fn new(http: Client, ttl: Duration, refresh_cooldown: Duration) -> Self {
        Self {
            inner: SingleFlightCache::new(ttl).with_refresh_cooldown(refresh_cooldown),
            http,
        }
    }

    /// Look up `kid` in the cached key set, fetching it only when stale
    pub(crate) async fn cached_key(&self, jwks_uri: &str, kid: &str) -> Result<Option<DecodingKey>, ValidationError> {
        let jwks = self.get_or_fetch(jwks_uri, false).await?;
        Ok(find_key_in_jwks(&jwks, kid))
    }

    /// Refetch the key set (subject to the refresh cooldown) and look up `kid`
    pub(crate) async fn refreshed_key(&self, jwks_uri: &str, kid: &str) -> Result<Option<DecodingKey>, ValidationError> {
        debug!(kid = %kid, jwks_uri = %jwks_uri, "Refreshing JWKS for unknown key");
        let jwks = self.get_or_fetch(jwks_uri, true).await?;
        Ok(find_key_in_jwks(&jwks, kid))
    }

    async fn get_or_fetch(&self, jwks_uri: &str, force_refresh: bool) -> Result<Arc<JwkSet>, ValidationError> {
        self.inner
            .get_or_fetch(jwks_uri, force_refresh, || async {
                debug!(jwks_uri = %jwks_uri, "Fetching JWKS");
                let response = self
                    .http
                    .get(jwks_uri)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| {
                        warn!(jwks_uri = %jwks_uri, error = %e, "JWKS fetch failed");
                        ValidationError::Unavailable
                    })?;
                let jwks: JwkSet = response.json().await.map_err(|e| {
                    warn!(jwks_uri = %jwks_uri, error = %e, "JWKS response is not a key set");
                    ValidationError::Unavailable
                })?;
                Ok(Arc::new(jwks))
            })
            .await
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y).ok(),
        // Symmetric and OKP keys are never accepted from a published key set
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}
