//! Protected resource gate: bearer token validation
//!
//! # Validation flow
//!
//! 1. Signed tokens (three dot-separated segments) are verified locally:
//!    the signing key is looked up by `kid` in the authority's JWKS
//!    (cached; refreshed on an unknown `kid`, at most once per refresh
//!    cooldown, re-resolving discovery if the key is still missing).
//! 2. Anything else is treated as a reference token and sent to the
//!    authority's introspection endpoint, authenticated with the API name
//!    and secret. Without an API secret, reference tokens are refused.
//! 3. The resulting claims are checked in order: issuer, lifetime
//!    (`nbf` and `exp`, both widened by the clock skew), audience, required
//!    scope.
//!
//! Every request is validated from scratch; only metadata and keys are
//! cached, never validation outcomes.

mod introspection;
mod jwks;
mod jwt;
pub mod middleware;

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{DiscoveryConfig, GateConfig};
use crate::oauth::{DiscoveryResolver, same_issuer};
use crate::{Error, Result};

use jwks::JwksCache;
pub use middleware::require_bearer;

/// Reasons a bearer token is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The token is at or past its expiry
    #[error("token expired")]
    Expired,

    /// The token's `nbf` lies in the future
    #[error("token not yet valid")]
    NotYetValid,

    /// Signature verification failed, or no usable key was found
    #[error("bad signature")]
    BadSignature,

    /// The token was issued by someone other than the configured authority
    #[error("wrong issuer")]
    WrongIssuer,

    /// The token is not meant for this API
    #[error("wrong audience")]
    WrongAudience,

    /// The required scope was not granted
    #[error("missing scope")]
    MissingScope,

    /// The authorization server reports the token as inactive
    #[error("token inactive")]
    Inactive,

    /// Keys or introspection could not be obtained from the authority
    #[error("authority unavailable")]
    Unavailable,

    /// The token or its claims could not be parsed
    #[error("malformed token")]
    Malformed,
}

impl ValidationError {
    /// Whether this is an authorization (403) rather than authentication
    /// (401) failure
    #[must_use]
    pub fn is_forbidden(self) -> bool {
        matches!(self, Self::MissingScope)
    }
}

/// A token that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    /// Issuer
    pub issuer: String,
    /// Subject, absent for pure client tokens
    pub subject: Option<String>,
    /// Client the token was issued to
    pub client_id: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// All claims as received
    pub claims: Map<String, Value>,
}

/// Outcome of validating one bearer token
#[derive(Debug, Clone)]
pub enum ValidationResult {
    /// Authorized, with extracted claims
    Valid(ValidatedToken),
    /// Rejected, with the reason
    Invalid(ValidationError),
}

impl ValidationResult {
    /// `true` for [`ValidationResult::Valid`]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The rejection reason, if any
    #[must_use]
    pub fn error(&self) -> Option<ValidationError> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid(e) => Some(*e),
        }
    }
}

impl From<std::result::Result<ValidatedToken, ValidationError>> for ValidationResult {
    fn from(result: std::result::Result<ValidatedToken, ValidationError>) -> Self {
        match result {
            Ok(token) => Self::Valid(token),
            Err(e) => Self::Invalid(e),
        }
    }
}

/// Per-request gate states
///
/// `Received -> ExtractingToken -> Validating -> {Authorized, Rejected}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Request arrived
    Received,
    /// Reading the `Authorization` header
    ExtractingToken,
    /// Token handed to the validator
    Validating,
    /// Request may proceed
    Authorized,
    /// Request refused
    Rejected,
}

impl GateState {
    /// Terminal states end the request's pass through the gate
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Authorized | Self::Rejected)
    }
}

/// Claims common to signed and introspected tokens
#[derive(Debug, Default)]
pub(crate) struct TokenClaims {
    pub(crate) issuer: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) expires_at: Option<i64>,
    pub(crate) not_before: Option<i64>,
    pub(crate) audience: Option<Value>,
    pub(crate) scopes: Vec<String>,
    pub(crate) raw: Map<String, Value>,
}

/// Validates bearer tokens issued by one authority
pub struct ResourceGate {
    authority: String,
    required_scope: Option<String>,
    api_name: Option<String>,
    api_secret: Option<String>,
    clock_skew: TimeDelta,
    resolver: Arc<DiscoveryResolver>,
    keys: JwksCache,
}

impl ResourceGate {
    /// Create a gate for `config.authority`, caching key sets as `discovery`
    /// prescribes
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the API secret cannot be resolved or the
    /// clock skew is out of range.
    pub fn new(config: &GateConfig, resolver: Arc<DiscoveryResolver>, discovery: &DiscoveryConfig) -> Result<Self> {
        let clock_skew = TimeDelta::from_std(config.clock_skew)
            .map_err(|e| Error::Config(format!("clock_skew out of range: {e}")))?;
        let keys = JwksCache::new(
            resolver.http_client().clone(),
            discovery.jwks_ttl,
            discovery.refresh_cooldown,
        );

        Ok(Self {
            authority: config.authority.clone(),
            required_scope: config.required_scope.clone(),
            api_name: config.api_name.clone(),
            api_secret: config.resolve_api_secret()?,
            clock_skew,
            resolver,
            keys,
        })
    }

    /// The authority whose tokens this gate accepts
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Validate a bearer token against the current time
    pub async fn validate(&self, bearer: &str) -> ValidationResult {
        self.validate_at(bearer, Utc::now()).await
    }

    /// Validate a bearer token as of `now`
    pub async fn validate_at(&self, bearer: &str, now: DateTime<Utc>) -> ValidationResult {
        let result = self.check(bearer.trim(), now).await;
        if let Err(reason) = &result {
            debug!(reason = %reason, "Bearer token rejected");
        }
        result.into()
    }

    async fn check(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<ValidatedToken, ValidationError> {
        if token.is_empty() {
            return Err(ValidationError::Malformed);
        }

        let claims = if jwt::looks_like_jwt(token) {
            jwt::verify(token, &self.authority, &self.resolver, &self.keys).await?
        } else {
            self.introspect(token).await?
        };

        self.check_claims(claims, now)
    }

    async fn introspect(&self, token: &str) -> std::result::Result<TokenClaims, ValidationError> {
        let (Some(api_name), Some(api_secret)) = (&self.api_name, &self.api_secret) else {
            debug!("Reference token received but introspection is not configured");
            return Err(ValidationError::Malformed);
        };
        introspection::introspect(token, &self.authority, &self.resolver, api_name, api_secret).await
    }

    fn check_claims(&self, claims: TokenClaims, now: DateTime<Utc>) -> std::result::Result<ValidatedToken, ValidationError> {
        let issuer = claims
            .issuer
            .filter(|iss| same_issuer(iss, &self.authority))
            .ok_or(ValidationError::WrongIssuer)?;

        let expires_at = claims
            .expires_at
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .ok_or(ValidationError::Malformed)?;
        let deadline = expires_at
            .checked_add_signed(self.clock_skew)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now >= deadline {
            return Err(ValidationError::Expired);
        }

        if let Some(nbf) = claims.not_before {
            let valid_from = DateTime::from_timestamp(nbf, 0).ok_or(ValidationError::Malformed)?;
            let skewed_now = now.checked_add_signed(self.clock_skew).unwrap_or(DateTime::<Utc>::MAX_UTC);
            if skewed_now < valid_from {
                return Err(ValidationError::NotYetValid);
            }
        }

        if let Some(api_name) = &self.api_name {
            if !audience_contains(claims.audience.as_ref(), api_name) {
                return Err(ValidationError::WrongAudience);
            }
        }

        if let Some(required) = &self.required_scope {
            if !claims.scopes.iter().any(|s| s == required) {
                return Err(ValidationError::MissingScope);
            }
        }

        Ok(ValidatedToken {
            issuer,
            subject: claims.subject,
            client_id: claims.client_id,
            scopes: claims.scopes,
            expires_at,
            claims: claims.raw,
        })
    }
}

/// `aud` may be a single string or an array of strings
fn audience_contains(aud: Option<&Value>, expected: &str) -> bool {
    match aud {
        Some(Value::String(s)) => s == expected,
        Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    }
}
