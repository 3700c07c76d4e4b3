//! JWKS and metadata fetching over HTTPS.
//!
//! [`JwksFetcher`] owns a `reqwest` client and two [`TtlCache`]s, one for
//! key sets and one for metadata documents, both keyed by URL. Network,
//! status and JSON failures become [`EvpError::JwksFetch`] for key sets and
//! [`EvpError::Discovery`] for metadata. Nothing is retried here.
//!
//! Two concurrent misses for the same URL both go to the network; the
//! later response replaces the earlier snapshot. Each cache holds at most
//! [`DEFAULT_CACHE_CAPACITY`](crate::keys::cache::DEFAULT_CACHE_CAPACITY)
//! documents unless [`JwksFetcher::with_cache_capacity`] says otherwise.

use std::{sync::Arc, time::Duration};

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    crypto::{Jwk, Jwks},
    error::{EvpError, Result},
    keys::TtlCache,
};

/// Default timeout for a single fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of cached documents.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Issuer metadata served at `/.well-known/email-verification`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuerMetadata {
    /// Endpoint that mints IssuanceTokens.
    pub issuance_endpoint: String,
    /// Location of the issuer's JWKS.
    pub jwks_uri: String,
    /// Algorithms the issuer signs with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_alg_values_supported: Option<Vec<String>>,
}

/// Which error kind a failed fetch maps to.
#[derive(Debug, Clone, Copy)]
enum Document {
    Jwks,
    Metadata,
}

impl Document {
    fn error(self, message: String) -> EvpError {
        match self {
            Self::Jwks => EvpError::JwksFetch(message),
            Self::Metadata => EvpError::Discovery(message),
        }
    }
}

/// Fetches and caches JWKS and metadata documents.
///
/// # Examples
///
/// ```no_run
/// use email_verification::keys::JwksFetcher;
///
/// # async fn example() -> email_verification::error::Result<()> {
/// let fetcher = JwksFetcher::new()?;
/// let jwks = fetcher.fetch_jwks("https://issuer.example/jwks.json").await?;
/// println!("{} keys", jwks.keys.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JwksFetcher {
    client: Client,
    require_https: bool,
    jwks_cache: TtlCache<Jwks>,
    metadata_cache: TtlCache<serde_json::Value>,
}

impl JwksFetcher {
    /// Creates a fetcher with a 10 second timeout and a one hour cache TTL.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_settings(DEFAULT_FETCH_TIMEOUT, DEFAULT_CACHE_TTL)
    }

    /// Creates a fetcher with the given per-request timeout and cache TTL.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] if the HTTP client cannot be built.
    pub fn with_settings(timeout: Duration, cache_ttl: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| EvpError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            require_https: true,
            jwks_cache: TtlCache::new(cache_ttl),
            metadata_cache: TtlCache::new(cache_ttl),
        })
    }

    /// Bounds each cache to `capacity` documents, dropping what is cached.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        let ttl = self.jwks_cache.ttl();
        self.jwks_cache = TtlCache::with_capacity(ttl, capacity);
        self.metadata_cache = TtlCache::with_capacity(ttl, capacity);
        self
    }

    /// Number of cached key sets, expired ones not yet purged included.
    #[must_use]
    pub fn cached_jwks(&self) -> usize {
        self.jwks_cache.len()
    }

    /// Allows plain `http` URLs. Only meant for local testing.
    #[must_use]
    pub const fn allow_http(mut self) -> Self {
        self.require_https = false;
        self
    }

    /// Returns `true` if only `https` URLs are fetched.
    #[must_use]
    pub const fn requires_https(&self) -> bool {
        self.require_https
    }

    /// Fetches the key set at `url`, served from cache while fresh.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwksFetch`] on invalid URL, network failure or
    /// timeout, non-success status, or malformed JSON.
    #[instrument(skip(self))]
    pub async fn fetch_jwks(&self, url: &str) -> Result<Arc<Jwks>> {
        if let Some(jwks) = self.jwks_cache.get(url) {
            debug!("JWKS cache hit");
            return Ok(jwks);
        }
        let jwks: Jwks = self.get_json(url, Document::Jwks).await?;
        debug!(keys = jwks.keys.len(), "JWKS fetched");
        Ok(self.jwks_cache.insert(url, jwks))
    }

    /// Fetches the metadata document at `url`, served from cache while fresh.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Discovery`] on invalid URL, network failure or
    /// timeout, non-success status, or malformed JSON.
    #[instrument(skip(self))]
    pub async fn fetch_metadata(&self, url: &str) -> Result<Arc<serde_json::Value>> {
        if let Some(metadata) = self.metadata_cache.get(url) {
            debug!("metadata cache hit");
            return Ok(metadata);
        }
        let metadata: serde_json::Value = self.get_json(url, Document::Metadata).await?;
        if !metadata.is_object() {
            return Err(EvpError::Discovery(format!("metadata at {url} is not a JSON object")));
        }
        Ok(self.metadata_cache.insert(url, metadata))
    }

    /// Fetches and parses issuer metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Discovery`] if the document cannot be fetched or
    /// lacks `issuance_endpoint` / `jwks_uri`.
    pub async fn fetch_issuer_metadata(&self, url: &str) -> Result<IssuerMetadata> {
        let metadata = self.fetch_metadata(url).await?;
        IssuerMetadata::deserialize(metadata.as_ref())
            .map_err(|e| EvpError::Discovery(format!("invalid issuer metadata at {url}: {e}")))
    }

    /// Resolves the key referenced by a `jwks` Signature-Key.
    ///
    /// With `well_known`, `id` is an origin whose
    /// `/.well-known/<well_known>` document names the `jwks_uri`. Without
    /// it, `id` is the JWKS URL itself.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Discovery`] for metadata failures and
    /// [`EvpError::JwksFetch`] if the key set cannot be fetched or does not
    /// contain `kid`.
    #[instrument(skip(self))]
    pub async fn resolve_jwks_key(
        &self,
        id: &str,
        kid: &str,
        well_known: Option<&str>,
    ) -> Result<Jwk> {
        let jwks_url = match well_known {
            Some(name) => {
                let metadata_url = well_known_url(id, name)?;
                let metadata = self.fetch_metadata(metadata_url.as_str()).await?;
                metadata
                    .get("jwks_uri")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| {
                        EvpError::Discovery(format!("metadata at {metadata_url} has no jwks_uri"))
                    })?
                    .to_owned()
            }
            None => id.to_owned(),
        };

        let jwks = self.fetch_jwks(&jwks_url).await?;
        jwks.find(kid)
            .cloned()
            .ok_or_else(|| EvpError::JwksFetch(format!("key '{kid}' not found at {jwks_url}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, document: Document) -> Result<T> {
        let parsed = Url::parse(url).map_err(|e| document.error(format!("invalid URL {url}: {e}")))?;
        let scheme_ok = match parsed.scheme() {
            "https" => true,
            "http" => !self.require_https,
            _ => false,
        };
        if !scheme_ok {
            return Err(document.error(format!("refusing non-HTTPS URL {url}")));
        }

        let response = self.client.get(parsed).send().await.map_err(|e| {
            let reason = if e.is_timeout() { "timed out" } else { "request failed" };
            warn!(url, error = %e, "{reason}");
            document.error(format!("{reason} for {url}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(document.error(format!("{url} returned HTTP {}", status.as_u16())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| document.error(format!("invalid JSON from {url}: {e}")))
    }
}

/// Builds `<origin of id>/.well-known/<name>`.
fn well_known_url(id: &str, name: &str) -> Result<Url> {
    if name.is_empty() || name.contains(['/', '?', '#']) || name.contains("..") {
        return Err(EvpError::Discovery(format!("invalid well-known name '{name}'")));
    }
    let base = Url::parse(id).map_err(|e| EvpError::Discovery(format!("invalid id {id}: {e}")))?;
    base.join(&format!("/.well-known/{name}"))
        .map_err(|e| EvpError::Discovery(format!("cannot build metadata URL: {e}")))
}
