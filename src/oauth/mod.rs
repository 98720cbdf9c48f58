//! OAuth 2.0 client side
//!
//! - Authorization server metadata discovery with a per-issuer
//!   single-flight cache
//! - Client credentials token acquisition

mod discovery;
mod token;

pub use discovery::{DiscoveryError, DiscoveryResolver};
pub(crate) use discovery::same_issuer;
pub use oauth_wire::DiscoveryDocument;
pub use token::{AccessToken, ClientCredentials, TokenAcquirer, TokenError};

use reqwest::Client;

use crate::Result;
use crate::config::DiscoveryConfig;

/// Build the HTTP client shared by discovery, token and gate requests
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client(config: &DiscoveryConfig) -> Result<Client> {
    Ok(Client::builder()
        .timeout(config.http_timeout)
        .user_agent(concat!("rewards-auth/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
