//! OAuth 2.0 wire types
//!
//! Plain serde shapes for the documents exchanged with an authorization
//! server: OIDC discovery metadata, token endpoint success and error bodies,
//! and RFC 7662 introspection responses. No I/O happens here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Deserializer, Serialize};

/// Path of the OIDC discovery document, relative to the issuer.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// The `client_credentials` grant type identifier.
pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

/// Authorization server metadata (OIDC discovery / RFC 8414)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier
    pub issuer: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// JSON Web Key Set URL
    pub jwks_uri: String,

    /// Supported scopes (may be string or array)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Token introspection endpoint (RFC 7662), if published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,

    /// Supported grant types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_types_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Whether the server advertises the client credentials grant.
    ///
    /// Servers that omit `grant_types_supported` are assumed to support it.
    #[must_use]
    pub fn supports_client_credentials(&self) -> bool {
        self.grant_types_supported.is_empty()
            || self
                .grant_types_supported
                .iter()
                .any(|g| g == CLIENT_CREDENTIALS_GRANT)
    }
}

/// Successful token endpoint response (RFC 6749 §5.1)
///
/// Every field is optional so that a body with missing members still parses
/// and can be rejected with a precise reason by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The issued access token
    #[serde(default)]
    pub access_token: Option<String>,

    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,

    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,

    /// Granted scope (space-delimited)
    #[serde(default)]
    pub scope: Option<String>,

    /// Error code, present when the server reports a failure with HTTP 200
    #[serde(default)]
    pub error: Option<String>,

    /// Human-readable error description
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Token introspection response (RFC 7662 §2.2)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently active
    pub active: bool,

    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,

    /// Subject
    #[serde(default)]
    pub sub: Option<String>,

    /// Client the token was issued to
    #[serde(default)]
    pub client_id: Option<String>,

    /// Expiry (Unix seconds)
    #[serde(default)]
    pub exp: Option<i64>,

    /// Not valid before (Unix seconds)
    #[serde(default)]
    pub nbf: Option<i64>,

    /// Audience, a string or an array of strings
    #[serde(default)]
    pub aud: Option<serde_json::Value>,

    /// Granted scopes (may be string or array)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scope: Vec<String>,
}

/// Deserialize scopes that may be either a space-delimited string or an array.
///
/// IdentityServer emits `scope` as an array in JWTs, RFC 7662 and RFC 6749
/// use a space-delimited string.
///
/// # Errors
///
/// Fails if the value is neither a string nor an array of strings.
pub fn deserialize_scopes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match Option::<StringOrVec>::deserialize(deserializer)? {
        Some(StringOrVec::String(s)) => Ok(split_scopes(&s)),
        Some(StringOrVec::Vec(v)) => Ok(v),
        None => Ok(Vec::new()),
    }
}

/// Split a space-delimited scope string.
#[must_use]
pub fn split_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(String::from).collect()
}
