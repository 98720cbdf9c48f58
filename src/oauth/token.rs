//! Client credentials token acquisition (RFC 6749 §4.4)
//!
//! Exchanges a client id, secret and scope for an access token at the token
//! endpoint advertised by the issuer's discovery document. Tokens are only
//! ever held in memory. Retrying is left to the caller.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use oauth_wire::{CLIENT_CREDENTIALS_GRANT, TokenResponse, split_scopes};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::discovery::DiscoveryResolver;
use crate::Result;

/// Token endpoint error codes that mean the request or client was refused
const GRANT_ERRORS: &[&str] = &[
    "invalid_client",
    "invalid_grant",
    "invalid_request",
    "invalid_scope",
    "unauthorized_client",
    "unsupported_grant_type",
];

/// Token request failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The credentials were rejected locally before any request was sent
    #[error("Invalid token request: {0}")]
    InvalidRequest(String),

    /// Transport failure talking to the token endpoint
    #[error("Token request failed: {0}")]
    Network(String),

    /// The server refused the client or grant
    #[error("Token request rejected: {error}{}", describe(description.as_deref()))]
    InvalidGrant {
        /// OAuth error code
        error: String,
        /// Optional error description
        description: Option<String>,
    },

    /// The server failed or answered with an unexpected status
    #[error(
        "Token endpoint error (HTTP {status}): {}{}",
        error.as_deref().unwrap_or("no error code"),
        describe(description.as_deref())
    )]
    ServerError {
        /// HTTP status
        status: u16,
        /// OAuth error code, if any
        error: Option<String>,
        /// Optional error description
        description: Option<String>,
    },

    /// The success response could not be turned into a token
    #[error("Malformed token response: {0}")]
    Malformed(String),
}

fn describe(description: Option<&str>) -> String {
    description.map(|d| format!(" ({d})")).unwrap_or_default()
}

/// Credentials for the client credentials grant
///
/// The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
}

impl ClientCredentials {
    /// Create credentials
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes,
        }
    }

    /// Client identifier
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Requested scopes
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Space-delimited `scope` parameter, blank entries skipped
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scopes
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn validate(&self) -> std::result::Result<(), TokenError> {
        if self.client_id.trim().is_empty() {
            return Err(TokenError::InvalidRequest("client_id is empty".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(TokenError::InvalidRequest("client_secret is empty".to_string()));
        }
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(TokenError::InvalidRequest("scope is empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// An access token obtained from the token endpoint
///
/// The token string never appears in `Debug` output.
#[derive(Clone)]
pub struct AccessToken {
    token: String,
    token_type: String,
    issuer: Option<String>,
    expires_at: DateTime<Utc>,
    scopes: Vec<String>,
    raw: serde_json::Value,
}

impl AccessToken {
    /// The token string, for use in an `Authorization` header
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.token
    }

    /// Token type as reported by the server
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Issuer the token was obtained from
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Expiry timestamp
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Granted scopes
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// The token response body as received
    #[must_use]
    pub fn raw_json(&self) -> &serde_json::Value {
        &self.raw
    }

    /// Whether the token is expired at `now`. The expiry instant itself
    /// counts as expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the token is expired now
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// `Authorization` header value
    #[must_use]
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Decode the payload of a JWT access token without verifying it.
    ///
    /// Returns `None` for reference tokens. For display only; the resource
    /// gate performs the real verification.
    #[must_use]
    pub fn unverified_claims(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        let mut parts = self.token.split('.');
        let (Some(_), Some(payload), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("issuer", &self.issuer)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Requests tokens with the client credentials grant
#[derive(Clone)]
pub struct TokenAcquirer {
    http: Client,
}

impl TokenAcquirer {
    /// Create an acquirer that shares `http` with the other components
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Exchange `credentials` for an access token at `token_endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] for empty credentials, transport failures,
    /// server-reported errors and unusable success bodies. A token is only
    /// returned for HTTP 200 without an `error` member.
    #[tracing::instrument(skip_all, fields(token_endpoint = %token_endpoint, client_id = %credentials.client_id()))]
    pub async fn request_token(
        &self,
        token_endpoint: &str,
        credentials: &ClientCredentials,
    ) -> std::result::Result<AccessToken, TokenError> {
        credentials.validate()?;

        let scope = credentials.scope_param();
        debug!(scope = %scope, "Requesting client credentials token");

        let params = [
            ("grant_type", CLIENT_CREDENTIALS_GRANT),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        let result = parse_token_response(status, &body, credentials.scopes(), Utc::now());
        match &result {
            Ok(token) => info!(
                expires_at = %token.expires_at,
                scopes = ?token.scopes,
                "Access token acquired"
            ),
            Err(e) => warn!(error = %e, "Token request failed"),
        }
        result
    }

    /// Discover the issuer's token endpoint and request a token there.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Discovery`] if discovery fails (no token
    /// request is attempted) or [`crate::Error::Token`] if the exchange fails.
    pub async fn acquire(
        &self,
        resolver: &DiscoveryResolver,
        issuer: &str,
        credentials: &ClientCredentials,
    ) -> Result<AccessToken> {
        let discovery = resolver.resolve(issuer).await?;
        let mut token = self
            .request_token(&discovery.token_endpoint, credentials)
            .await?;
        token.issuer = Some(discovery.issuer.clone());
        Ok(token)
    }
}

/// Turn a token endpoint response into an [`AccessToken`] or a [`TokenError`]
fn parse_token_response(
    status: StatusCode,
    body: &[u8],
    requested_scopes: &[String],
    received_at: DateTime<Utc>,
) -> std::result::Result<AccessToken, TokenError> {
    let raw: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) if status == StatusCode::OK => {
            return Err(TokenError::Malformed(format!("invalid JSON: {e}")));
        }
        Err(_) => {
            return Err(TokenError::ServerError {
                status: status.as_u16(),
                error: None,
                description: None,
            });
        }
    };

    let response: TokenResponse = match serde_json::from_value(raw.clone()) {
        Ok(r) => r,
        Err(e) if status == StatusCode::OK => {
            return Err(TokenError::Malformed(e.to_string()));
        }
        Err(_) => TokenResponse::default(),
    };

    if let Some(error) = response.error {
        return Err(classify_error(status, error, response.error_description));
    }

    if status != StatusCode::OK {
        return Err(TokenError::ServerError {
            status: status.as_u16(),
            error: None,
            description: None,
        });
    }

    let token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TokenError::Malformed("missing access_token".to_string()))?;

    let token_type = response
        .token_type
        .ok_or_else(|| TokenError::Malformed("missing token_type".to_string()))?;
    if !token_type.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::Malformed(format!(
            "unsupported token_type {token_type}"
        )));
    }

    let expires_at = response
        .expires_in
        .filter(|secs| *secs > 0)
        .and_then(TimeDelta::try_seconds)
        .and_then(|lifetime| received_at.checked_add_signed(lifetime))
        .ok_or_else(|| TokenError::Malformed("missing or invalid expires_in".to_string()))?;

    let scopes = response
        .scope
        .map(|s| split_scopes(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| requested_scopes.to_vec());

    Ok(AccessToken {
        token,
        token_type,
        issuer: None,
        expires_at,
        scopes,
        raw,
    })
}

fn classify_error(status: StatusCode, error: String, description: Option<String>) -> TokenError {
    if GRANT_ERRORS.contains(&error.as_str()) {
        TokenError::InvalidGrant { error, description }
    } else {
        TokenError::ServerError {
            status: status.as_u16(),
            error: Some(error),
            description,
        }
    }
}
