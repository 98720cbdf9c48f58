//! rewards-auth
//!
//! OAuth 2.0 client credentials flow between a confidential client and a
//! bearer-protected API.
//!
//! # Components
//!
//! - **Discovery**: resolves and caches `/.well-known/openid-configuration`
//!   per issuer, single-flight, with bounded retry
//! - **Token acquisition**: exchanges client id, secret and scopes for an
//!   access token
//! - **Resource gate**: validates bearer tokens (JWT via JWKS, reference
//!   tokens via introspection) and enforces issuer, expiry, audience and
//!   scope
//! - **Server / console**: the protected rewards API and the client that
//!   calls it

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod failsafe;
pub mod gate;
pub mod oauth;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Internal(e.to_string()))
}
