//! Signed (JWT) access token verification

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, errors::ErrorKind};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::jwks::JwksCache;
use super::{TokenClaims, ValidationError};
use crate::oauth::DiscoveryResolver;

/// Asymmetric algorithms accepted from the authority
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

#[derive(Debug, Deserialize)]
struct JwtClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    aud: Option<Value>,
    #[serde(default, deserialize_with = "oauth_wire::deserialize_scopes")]
    scope: Vec<String>,
}

/// Compact serialization: three non-empty base64url segments
pub(crate) fn looks_like_jwt(token: &str) -> bool {
    let mut segments = 0;
    for part in token.split('.') {
        if part.is_empty() {
            return false;
        }
        segments += 1;
    }
    segments == 3
}

/// Verify the signature of `token` against the authority's published keys
/// and return its claims. Claim checks happen in the caller.
pub(crate) async fn verify(
    token: &str,
    authority: &str,
    resolver: &DiscoveryResolver,
    keys: &JwksCache,
) -> Result<TokenClaims, ValidationError> {
    let header = decode_header(token).map_err(|e| {
        debug!(error = %e, "Unreadable JWT header");
        ValidationError::Malformed
    })?;

    if !ALLOWED_ALGORITHMS.contains(&header.alg) {
        warn!(alg = ?header.alg, "Refusing JWT signed with disallowed algorithm");
        return Err(ValidationError::BadSignature);
    }

    let Some(kid) = header.kid.as_deref() else {
        debug!("JWT has no kid");
        return Err(ValidationError::BadSignature);
    };

    let document = resolver.resolve(authority).await.map_err(|e| {
        warn!(authority = %authority, error = %e, "Cannot resolve authority metadata");
        ValidationError::Unavailable
    })?;

    let key = match keys.cached_key(&document.jwks_uri, kid).await? {
        Some(key) => key,
        None => refresh_key(authority, &document.jwks_uri, kid, resolver, keys).await?,
    };

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    let data = decode::<Map<String, Value>>(token, &key, &validation).map_err(|e| {
        let reason = map_jwt_error(e.kind());
        debug!(error = %e, reason = %reason, "JWT verification failed");
        reason
    })?;

    claims_from_map(data.claims)
}

/// Handle a `kid` missing from the cached key set: refetch the key set, and
/// if the key is still unknown, re-resolve discovery in case the authority
/// now publishes its keys somewhere else.
async fn refresh_key(
    authority: &str,
    jwks_uri: &str,
    kid: &str,
    resolver: &DiscoveryResolver,
    keys: &JwksCache,
) -> Result<DecodingKey, ValidationError> {
    if let Some(key) = keys.refreshed_key(jwks_uri, kid).await? {
        return Ok(key);
    }

    match resolver.resolve_fresh(authority).await {
        Ok(document) if document.jwks_uri != jwks_uri => {
            debug!(jwks_uri = %document.jwks_uri, "Authority moved its key set");
            if let Some(key) = keys.refreshed_key(&document.jwks_uri, kid).await? {
                return Ok(key);
            }
        }
        Ok(_) => {}
        Err(e) => debug!(authority = %authority, error = %e, "Re-resolving authority metadata failed"),
    }

    warn!(kid = %kid, "Unknown signing key");
    Err(ValidationError::BadSignature)
}

fn claims_from_map(raw: Map<String, Value>) -> Result<TokenClaims, ValidationError> {
    let claims: JwtClaims =
        serde_json::from_value(Value::Object(raw.clone())).map_err(|_| ValidationError::Malformed)?;

    Ok(TokenClaims {
        issuer: claims.iss,
        subject: claims.sub,
        client_id: claims.client_id,
        expires_at: claims.exp,
        not_before: claims.nbf,
        audience: claims.aud,
        scopes: claims.scope,
        raw,
    })
}

fn map_jwt_error(kind: &ErrorKind) -> ValidationError {
    match kind {
        ErrorKind::ExpiredSignature => ValidationError::Expired,
        ErrorKind::ImmatureSignature => ValidationError::NotYetValid,
        ErrorKind::InvalidIssuer => ValidationError::WrongIssuer,
        ErrorKind::InvalidAudience => ValidationError::WrongAudience,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_) => ValidationError::BadSignature,
        _ => ValidationError::Malformed,
    }
}
