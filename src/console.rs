//! Console client flows
//!
//! Discover the authorization server, obtain a client credentials token and
//! call the protected rewards API with it. Output goes to the supplied
//! writer so the flows can be driven from tests.

use std::io::Write;
use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, info};

use crate::config::{ClientConfig, Config};
use crate::oauth::{AccessToken, DiscoveryResolver, TokenAcquirer, http_client};
use crate::{Error, Result};

/// Client side of the demo: discovery, token, API call
pub struct Console {
    client: ClientConfig,
    http: Client,
    resolver: Arc<DiscoveryResolver>,
    acquirer: TokenAcquirer,
}

impl Console {
    /// Create a console client from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http = http_client(&config.discovery)?;
        Ok(Self {
            client: config.client.clone(),
            resolver: Arc::new(DiscoveryResolver::new(http.clone(), &config.discovery)),
            acquirer: TokenAcquirer::new(http.clone()),
            http,
        })
    }

    /// Print the issuer's discovery document
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if discovery fails.
    pub async fn discover(&self, out: &mut impl Write) -> Result<()> {
        let document = self.resolver.resolve(&self.client.issuer).await?;
        writeln!(out, "{}", serde_json::to_string_pretty(document.as_ref())?)?;
        Ok(())
    }

    /// Request a token and print the token response
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing, discovery fails or the
    /// token request is refused.
    pub async fn token(&self, out: &mut impl Write) -> Result<AccessToken> {
        let credentials = self.client.credentials()?;
        let token = self
            .acquirer
            .acquire(&self.resolver, &self.client.issuer, &credentials)
            .await?;

        writeln!(out, "{}", serde_json::to_string_pretty(token.raw_json())?)?;
        if let Some(claims) = token.unverified_claims() {
            writeln!(out, "{}", serde_json::to_string_pretty(&claims)?)?;
        }
        Ok(token)
    }

    /// Obtain a token, then call the protected API with it
    ///
    /// Prints the response body on success, the status code otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] when the API answers with a non-success
    /// status, plus any error from [`token`](Self::token).
    pub async fn call(&self, out: &mut impl Write) -> Result<()> {
        let token = self.token(out).await?;
        let url = self.client.api_url();

        debug!(url = %url, "Calling protected API");
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, token.bearer_header())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            writeln!(out, "{}", status.as_u16())?;
            return Err(Error::Api(status.as_u16()));
        }

        let body = response.text().await?;
        info!(url = %url, status = %status, "API call succeeded");
        writeln!(out, "{body}")?;
        Ok(())
    }
}
