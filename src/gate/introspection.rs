//! Reference token introspection (RFC 7662)

use oauth_wire::IntrospectionResponse;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{TokenClaims, ValidationError};
use crate::oauth::DiscoveryResolver;

/// Ask the authority whether `token` is active, authenticating as the API.
pub(crate) async fn introspect(
    token: &str,
    authority: &str,
    resolver: &DiscoveryResolver,
    api_name: &str,
    api_secret: &str,
) -> Result<TokenClaims, ValidationError> {
    let document = resolver.resolve(authority).await.map_err(|e| {
        warn!(authority = %authority, error = %e, "Cannot resolve authority metadata");
        ValidationError::Unavailable
    })?;

    let Some(endpoint) = document.introspection_endpoint.as_deref() else {
        debug!(authority = %authority, "Authority publishes no introspection endpoint");
        return Err(ValidationError::Malformed);
    };

    let response = resolver
        .http_client()
        .post(endpoint)
        .basic_auth(api_name, Some(api_secret))
        .form(&[("token", token), ("token_type_hint", "access_token")])
        .send()
        .await
        .map_err(|e| {
            warn!(endpoint = %endpoint, error = %e, "Introspection request failed");
            ValidationError::Unavailable
        })?;

    let status = response.status();
    if !status.is_success() {
        warn!(endpoint = %endpoint, status = %status, "Introspection rejected");
        return Err(ValidationError::Unavailable);
    }

    let raw: Map<String, Value> = response.json().await.map_err(|e| {
        warn!(endpoint = %endpoint, error = %e, "Introspection response is not a JSON object");
        ValidationError::Unavailable
    })?;

    claims_from_introspection(raw)
}

fn claims_from_introspection(raw: Map<String, Value>) -> Result<TokenClaims, ValidationError> {
    let body: IntrospectionResponse =
        serde_json::from_value(Value::Object(raw.clone())).map_err(|e| {
            warn!(error = %e, "Unusable introspection response");
            ValidationError::Unavailable
        })?;

    if !body.active {
        return Err(ValidationError::Inactive);
    }

    Ok(TokenClaims {
        issuer: body.iss,
        subject: body.sub,
        client_id: body.client_id,
        expires_at: body.exp,
        not_before: body.nbf,
        audience: body.aud,
        scopes: body.scope,
        raw,
    })
}
