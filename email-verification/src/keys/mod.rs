//! Verification key resolution.
//!
//! Issuance and presentation verification only depend on the
//! [`KeyResolver`] capability: given the header `kid` and the payload
//! `iss`, produce the issuer's public key. Where the key comes from is up
//! to the implementation:
//!
//! - [`StaticKeyResolver`]: fixed keys, for tests and pinned deployments
//! - [`IssuerKeyResolver`]: `.well-known/email-verification` metadata and
//!   the issuer's JWKS, fetched over HTTPS and cached
//! - any `Fn(String, String) -> impl Future<Output = Result<Jwk>>`
//!
//! # Examples
//!
//! ```
//! use ed25519_dalek::SigningKey;
//! use email_verification::{
//!     crypto::Jwk,
//!     keys::{KeyResolver, StaticKeyResolver},
//! };
//!
//! # async fn example() -> email_verification::error::Result<()> {
//! let issuer_key = Jwk::from_verifying_key(&SigningKey::from_bytes(&[1u8; 32]).verifying_key());
//! let kid = issuer_key.kid.clone().unwrap_or_default();
//!
//! let resolver = StaticKeyResolver::new().with_issuer_key("issuer.example", issuer_key);
//! let key = resolver.resolve(&kid, "issuer.example").await?;
//! assert_eq!(key.kty, "OKP");
//! # Ok(())
//! # }
//! ```

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::{collections::HashMap, future};

use crate::{
    crypto::Jwk,
    error::{EvpError, Result},
};

pub mod cache;
pub mod fetch;
pub mod issuer;

pub use cache::TtlCache;
pub use fetch::{IssuerMetadata, JwksFetcher};
pub use issuer::IssuerKeyResolver;

/// Resolves the public key that verifies an issuer's tokens.
pub trait KeyResolver: Send + Sync {
    /// Returns the key identified by `kid` for `issuer`.
    ///
    /// # Errors
    ///
    /// Implementations return [`EvpError::JwksFetch`] or
    /// [`EvpError::Discovery`] when the key cannot be obtained.
    fn resolve(&self, kid: &str, issuer: &str) -> impl Future<Output = Result<Jwk>> + Send;
}

impl<F, Fut> KeyResolver for F
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Jwk>> + Send,
{
    fn resolve(&self, kid: &str, issuer: &str) -> impl Future<Output = Result<Jwk>> + Send {
        self(kid.to_owned(), issuer.to_owned())
    }
}

/// Key resolver backed by a fixed set of keys.
///
/// Keys registered for an issuer are looked up by `(issuer, kid)`; keys
/// registered without an issuer match any issuer with that `kid`.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    by_issuer: HashMap<(String, String), Jwk>,
    by_kid: HashMap<String, Jwk>,
}

impl StaticKeyResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `jwk` for `issuer` under its own `kid`.
    ///
    /// Private members are dropped.
    #[must_use]
    pub fn with_issuer_key(mut self, issuer: &str, jwk: Jwk) -> Self {
        let kid = jwk.kid.clone().unwrap_or_default();
        self.by_issuer.insert((issuer.to_owned(), kid), jwk.to_public());
        self
    }

    /// Registers `jwk` under `kid` for every issuer.
    ///
    /// Private members are dropped.
    #[must_use]
    pub fn with_key(mut self, kid: &str, jwk: Jwk) -> Self {
        self.by_kid.insert(kid.to_owned(), jwk.to_public());
        self
    }

    fn lookup(&self, kid: &str, issuer: &str) -> Result<Jwk> {
        self.by_issuer
            .get(&(issuer.to_owned(), kid.to_owned()))
            .or_else(|| self.by_kid.get(kid))
            .cloned()
            .ok_or_else(|| EvpError::JwksFetch(format!("no key '{kid}' for issuer '{issuer}'")))
    }
}

impl KeyResolver for StaticKeyResolver {
    fn resolve(&self, kid: &str, issuer: &str) -> impl Future<Output = Result<Jwk>> + Send {
        future::ready(self.lookup(kid, issuer))
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;

    fn key(seed: u8) -> Jwk {
        Jwk::from_signing_key(&SigningKey::from_bytes(&[seed; 32]))
    }

    #[tokio::test]
    async fn test_static_resolver_by_issuer() {
        let jwk = key(1);
        let kid = jwk.kid.clone().unwrap();
        let resolver = StaticKeyResolver::new().with_issuer_key("issuer.example", jwk.clone());

        let resolved = resolver.resolve(&kid, "issuer.example").await.unwrap();
        assert_eq!(resolved, jwk.to_public());
        assert!(!resolved.is_private());

        let err = resolver.resolve(&kid, "other.example").await.unwrap_err();
        assert!(matches!(err, EvpError::JwksFetch(_)));
    }

    #[tokio::test]
    async fn test_static_resolver_kid_only() {
        let resolver = StaticKeyResolver::new().with_key("k1", key(2));
        assert!(resolver.resolve("k1", "any.example").await.is_ok());
        assert!(resolver.resolve("k2", "any.example").await.is_err());
    }

    #[tokio::test]
    async fn test_closure_resolver() {
        let jwk = key(3).to_public();
        let expected = jwk.clone();
        let resolver = move |kid: String, issuer: String| {
            let jwk = jwk.clone();
            async move {
                if kid == "k1" && issuer == "issuer.example" {
                    Ok(jwk)
                } else {
                    Err(EvpError::JwksFetch("unknown".into()))
                }
            }
        };

        assert_eq!(resolver.resolve("k1", "issuer.example").await.unwrap(), expected);
        assert!(resolver.resolve("k9", "issuer.example").await.is_err());
    }
}
