//! Issuer key resolution via `.well-known/email-verification` metadata.

use std::sync::Arc;

use tracing::{debug, instrument};
use url::Url;

use crate::{
    crypto::Jwk,
    error::{EvpError, Result},
    keys::{IssuerMetadata, JwksFetcher, KeyResolver},
};

/// Path of the issuer metadata document.
pub const ISSUER_METADATA_PATH: &str = "/.well-known/email-verification";

/// Resolves issuer keys from the issuer's published metadata and JWKS.
///
/// For issuer `issuer.example` the resolver fetches
/// `https://issuer.example/.well-known/email-verification`, checks that
/// both `issuance_endpoint` and `jwks_uri` are hosted on the issuer domain
/// or one of its subdomains, then looks up `kid` in the JWKS.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use email_verification::keys::{IssuerKeyResolver, JwksFetcher, KeyResolver};
///
/// # async fn example() -> email_verification::error::Result<()> {
/// let resolver = IssuerKeyResolver::new(Arc::new(JwksFetcher::new()?));
/// let key = resolver.resolve("issuer-key-1", "issuer.example").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct IssuerKeyResolver {
    fetcher: Arc<JwksFetcher>,
}

impl IssuerKeyResolver {
    /// Creates a resolver sharing `fetcher` and its caches.
    #[must_use]
    pub const fn new(fetcher: Arc<JwksFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches and validates the metadata of `issuer`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Discovery`] if the issuer is not a bare domain,
    /// the document cannot be fetched, or its URLs point outside the
    /// issuer domain.
    #[instrument(skip(self))]
    pub async fn metadata(&self, issuer: &str) -> Result<IssuerMetadata> {
        let issuer_host = issuer_host(issuer)?;
        let scheme = if self.fetcher.requires_https() { "https" } else { "http" };
        let url = format!("{scheme}://{issuer}{ISSUER_METADATA_PATH}");

        let metadata = self.fetcher.fetch_issuer_metadata(&url).await?;
        check_same_site("issuance_endpoint", &metadata.issuance_endpoint, &issuer_host)?;
        check_same_site("jwks_uri", &metadata.jwks_uri, &issuer_host)?;
        Ok(metadata)
    }

    async fn resolve_key(&self, kid: &str, issuer: &str) -> Result<Jwk> {
        let metadata = self.metadata(issuer).await?;
        let jwks = self.fetcher.fetch_jwks(&metadata.jwks_uri).await?;
        let key = jwks.find(kid).cloned().ok_or_else(|| {
            EvpError::JwksFetch(format!("issuer '{issuer}' has no key '{kid}'"))
        })?;
        debug!(issuer, kid, "issuer key resolved");
        Ok(key)
    }
}

impl KeyResolver for IssuerKeyResolver {
    fn resolve(&self, kid: &str, issuer: &str) -> impl Future<Output = Result<Jwk>> + Send {
        self.resolve_key(kid, issuer)
    }
}

/// Validates that `issuer` is a bare domain (optionally with a port) and
/// returns its lowercased host.
fn issuer_host(issuer: &str) -> Result<String> {
    if issuer.is_empty() || issuer.contains(['/', '@', '?', '#']) || issuer.contains(char::is_whitespace)
    {
        return Err(EvpError::Discovery(format!("issuer '{issuer}' is not a domain")));
    }
    let url = Url::parse(&format!("https://{issuer}"))
        .map_err(|e| EvpError::Discovery(format!("issuer '{issuer}' is not a domain: {e}")))?;
    url.host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| EvpError::Discovery(format!("issuer '{issuer}' has no host")))
}

/// Requires the host of `url` to equal `issuer_host` or be a subdomain of it.
fn check_same_site(field: &str, url: &str, issuer_host: &str) -> Result<()> {
    let parsed =
        Url::parse(url).map_err(|e| EvpError::Discovery(format!("invalid {field} '{url}': {e}")))?;
    let host = parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| EvpError::Discovery(format!("{field} '{url}' has no host")))?;

    if host == issuer_host || host.ends_with(&format!(".{issuer_host}")) {
        Ok(())
    } else {
        Err(EvpError::Discovery(format!(
            "{field} host '{host}' is outside issuer domain '{issuer_host}'"
        )))
    }
}
