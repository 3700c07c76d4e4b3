//! TOML configuration.
//!
//! One [`EvpConfig`] is loaded at startup and handed to the components
//! that need it; nothing reads configuration globally.
//!
//! # Examples
//!
//! ```toml
//! [tokens]
//! iat_max_age_secs = 60
//! iat_max_future_secs = 60
//!
//! [http_signatures]
//! strict_aauth = true
//! max_clock_skew_secs = 60
//! replay_cache_capacity = 10000
//!
//! [jwks]
//! cache_ttl_secs = 3600
//! cache_capacity = 1024
//! fetch_timeout_secs = 10
//! ```

use std::{path::Path, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{
    error::{EvpError, Result},
    httpsig::{HttpSignatureVerifier, VerifyOptions},
    keys::JwksFetcher,
    token::TokenValidation,
    validation::IatWindow,
};

/// Complete configuration. Every section and field has a default.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EvpConfig {
    /// Token verification.
    pub tokens: TokenConfig,
    /// HTTP signature verification.
    pub http_signatures: HttpSignatureConfig,
    /// JWKS and metadata fetching.
    pub jwks: JwksConfig,
}

impl EvpConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] if the TOML is invalid or a value is out
    /// of bounds.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| EvpError::Config(format!("invalid TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] if the file cannot be read or is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EvpError::Config(format!("cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.tokens.validate()?;
        self.http_signatures.validate()?;
        self.jwks.validate()
    }

    /// Token verification options.
    #[must_use]
    pub fn token_validation(&self) -> TokenValidation {
        TokenValidation {
            iat_window: IatWindow {
                max_age: Duration::from_secs(self.tokens.iat_max_age_secs),
                max_future: Duration::from_secs(self.tokens.iat_max_future_secs),
            },
        }
    }

    /// HTTP signature verification options.
    #[must_use]
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            strict_aauth: self.http_signatures.strict_aauth,
            max_clock_skew: Duration::from_secs(self.http_signatures.max_clock_skew_secs),
        }
    }

    /// Builds a fetcher with the configured timeout, cache TTL and cache
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] if the HTTP client cannot be built.
    pub fn jwks_fetcher(&self) -> Result<JwksFetcher> {
        JwksFetcher::with_settings(
            Duration::from_secs(self.jwks.fetch_timeout_secs),
            Duration::from_secs(self.jwks.cache_ttl_secs),
        )
        .map(|fetcher| fetcher.with_cache_capacity(self.jwks.cache_capacity))
    }

    /// Builds a verifier with a replay cache and JWKS support through
    /// `fetcher`.
    #[must_use]
    pub fn http_verifier(&self, fetcher: Arc<JwksFetcher>) -> HttpSignatureVerifier {
        HttpSignatureVerifier::new()
            .with_jwks_fetcher(fetcher)
            .with_replay_cache(self.http_signatures.replay_cache_capacity)
    }
}

/// `[tokens]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    /// Oldest accepted `iat`, in seconds.
    pub iat_max_age_secs: u64,
    /// Furthest accepted future `iat`, in seconds.
    pub iat_max_future_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            iat_max_age_secs: default_iat_secs(),
            iat_max_future_secs: default_iat_secs(),
        }
    }
}

impl TokenConfig {
    /// Both windows must be 1-3600 seconds.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        check_range("tokens.iat_max_age_secs", self.iat_max_age_secs, 1, 3600)?;
        check_range("tokens.iat_max_future_secs", self.iat_max_future_secs, 1, 3600)
    }
}

/// `[http_signatures]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSignatureConfig {
    /// Require `signature-key` to be covered.
    pub strict_aauth: bool,
    /// Accepted distance between `created` and now, in seconds.
    pub max_clock_skew_secs: u64,
    /// Nonces remembered by the replay guard.
    pub replay_cache_capacity: usize,
}

impl Default for HttpSignatureConfig {
    fn default() -> Self {
        Self {
            strict_aauth: true,
            max_clock_skew_secs: default_clock_skew_secs(),
            replay_cache_capacity: default_replay_cache_capacity(),
        }
    }
}

impl HttpSignatureConfig {
    /// Validates configuration values are within acceptable bounds:
    /// - `max_clock_skew_secs`: 1-600
    /// - `replay_cache_capacity`: at least 1
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        check_range("http_signatures.max_clock_skew_secs", self.max_clock_skew_secs, 1, 600)?;
        if self.replay_cache_capacity == 0 {
            return Err(EvpError::Config(
                "http_signatures.replay_cache_capacity must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// `[jwks]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct JwksConfig {
    /// Lifetime of cached documents, in seconds.
    pub cache_ttl_secs: u64,
    /// Maximum number of cached documents per cache.
    pub cache_capacity: usize,
    /// Timeout of a single fetch, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl JwksConfig {
    /// Validates configuration values are within acceptable bounds:
    /// - `cache_ttl_secs`: 1-86400
    /// - `cache_capacity`: 1-100000
    /// - `fetch_timeout_secs`: 1-60
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::Config`] for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        check_range("jwks.cache_ttl_secs", self.cache_ttl_secs, 1, 86_400)?;
        let capacity = u64::try_from(self.cache_capacity).unwrap_or(u64::MAX);
        check_range("jwks.cache_capacity", capacity, 1, 100_000)?;
        check_range("jwks.fetch_timeout_secs", self.fetch_timeout_secs, 1, 60)
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(EvpError::Config(format!("{field} must be between {min} and {max}")))
    }
}

const fn default_iat_secs() -> u64 {
    60
}

const fn default_clock_skew_secs() -> u64 {
    60
}

const fn default_replay_cache_capacity() -> usize {
    10_000
}

const fn default_cache_ttl_secs() -> u64 {
    3600
}

const fn default_cache_capacity() -> usize {
    1024
}

const fn default_fetch_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EvpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_validation(), TokenValidation::default());
        assert_eq!(config.verify_options(), VerifyOptions::default());
        assert_eq!(config.http_signatures.replay_cache_capacity, 10_000);
        assert_eq!(config.jwks.cache_ttl_secs, 3600);
        assert_eq!(config.jwks.fetch_timeout_secs, 10);
        assert_eq!(config.jwks.cache_capacity, 1024);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        assert_eq!(EvpConfig::from_toml("").unwrap(), EvpConfig::default());
    }

    #[test]
    fn test_from_toml() {
        let toml = "
            [tokens]
            iat_max_age_secs = 120

            [http_signatures]
            strict_aauth = false
            max_clock_skew_secs = 30

            [jwks]
            fetch_timeout_secs = 5
        ";
        let config = EvpConfig::from_toml(toml).unwrap();
        assert_eq!(config.tokens.iat_max_age_secs, 120);
        assert_eq!(config.tokens.iat_max_future_secs, 60);
        assert!(!config.verify_options().strict_aauth);
        assert_eq!(config.verify_options().max_clock_skew, Duration::from_secs(30));
        assert_eq!(config.jwks.fetch_timeout_secs, 5);
        assert_eq!(config.jwks.cache_ttl_secs, 3600);
        assert_eq!(config.token_validation().iat_window.max_age, Duration::from_secs(120));
    }

    #[test]
    fn test_bounds() {
        for toml in [
            "[http_signatures]\nmax_clock_skew_secs = 0",
            "[http_signatures]\nmax_clock_skew_secs = 601",
            "[http_signatures]\nreplay_cache_capacity = 0",
            "[jwks]\nfetch_timeout_secs = 0",
            "[jwks]\nfetch_timeout_secs = 61",
            "[jwks]\ncache_ttl_secs = 0",
            "[jwks]\ncache_ttl_secs = 86401",
            "[jwks]\ncache_capacity = 0",
            "[jwks]\ncache_capacity = 100001",
            "[tokens]\niat_max_age_secs = 0",
        ] {
            assert!(matches!(EvpConfig::from_toml(toml), Err(EvpError::Config(_))), "{toml}");
        }
    }

    #[test]
    fn test_cache_ttl_upper_bound() {
        let err = EvpConfig::from_toml("[jwks]\ncache_ttl_secs = 9223372036854775807").unwrap_err();
        assert!(matches!(err, EvpError::Config(ref m) if m.contains("cache_ttl_secs")), "{err}");

        let config = EvpConfig::from_toml("[jwks]\ncache_ttl_secs = 86400").unwrap();
        assert_eq!(config.jwks.cache_ttl_secs, 86_400);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(EvpConfig::from_toml("[jwks]\nttl = 5").is_err());
        assert!(EvpConfig::from_toml("[unknown]").is_err());
    }

    #[test]
    fn test_builds_components() {
        let config = EvpConfig::default();
        let fetcher = Arc::new(config.jwks_fetcher().unwrap());
        assert!(fetcher.requires_https());
        let _verifier = config.http_verifier(fetcher);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            EvpConfig::from_file("/nonexistent/evp.toml"),
            Err(EvpError::Config(_))
        ));
    }
}
