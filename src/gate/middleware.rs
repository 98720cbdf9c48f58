//! Bearer authentication middleware
//!
//! Protected routes pass through [`require_bearer`]. A request without a
//! bearer token, or with one the gate refuses, never reaches the handler:
//!
//! - no token: `401` with `WWW-Authenticate: Bearer`
//! - missing scope: `403` with `error="insufficient_scope"`
//! - anything else: `401` with `error="invalid_token"`
//!
//! Rejections carry no body. On success the [`ValidatedToken`] is placed in
//! the request extensions.
//!
//! [`ValidatedToken`]: super::ValidatedToken

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, trace, warn};

use super::{GateState, ResourceGate, ValidationError, ValidationResult};

/// Authentication middleware for protected routes
pub async fn require_bearer(
    State(gate): State<Arc<ResourceGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let mut state = GateState::Received;
    trace!(path = %path, state = ?state);

    state = GateState::ExtractingToken;
    trace!(path = %path, state = ?state);
    let Some(token) = extract_bearer(request.headers()) else {
        state = GateState::Rejected;
        debug!(path = %path, state = ?state, "Missing bearer token");
        return challenge(StatusCode::UNAUTHORIZED, "Bearer");
    };

    state = GateState::Validating;
    trace!(path = %path, state = ?state);
    match gate.validate(&token).await {
        ValidationResult::Valid(validated) => {
            state = GateState::Authorized;
            debug!(
                path = %path,
                state = ?state,
                client_id = validated.client_id.as_deref().unwrap_or("-"),
                "Authorized request"
            );
            request.extensions_mut().insert(validated);
            next.run(request).await
        }
        ValidationResult::Invalid(reason) => {
            state = GateState::Rejected;
            warn!(path = %path, state = ?state, reason = %reason, "Rejected request");
            rejection(reason)
        }
    }
}

/// Read `Authorization: Bearer <token>`, scheme matched case-insensitively
fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn rejection(reason: ValidationError) -> Response {
    if reason.is_forbidden() {
        challenge(StatusCode::FORBIDDEN, r#"Bearer error="insufficient_scope""#)
    } else {
        challenge(StatusCode::UNAUTHORIZED, r#"Bearer error="invalid_token""#)
    }
}

fn challenge(status: StatusCode, www_authenticate: &'static str) -> Response {
    (
        status,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(www_authenticate))],
    )
        .into_response()
}
