//! Error types for the Email Verification Protocol core.
//!
//! Every failure the token codec, key resolvers or configuration loader can
//! produce is an [`EvpError`] variant. Variants are deliberately coarse and
//! map one-to-one onto the protocol's error taxonomy so callers can tell a
//! stale token from a forged one, or a network hiccup from a bad key.
//!
//! The HTTP signature engine does not surface these errors directly: its
//! verifier folds them into a
//! [`SignatureVerification`](crate::httpsig::SignatureVerification) result.
//!
//! # Error Categories
//!
//! - **Claim errors** ([`EvpError::MissingClaim`], [`EvpError::InvalidClaim`]):
//!   a token is well-formed but its claims are absent or wrong
//! - **Cryptographic errors** ([`EvpError::InvalidSignature`],
//!   [`EvpError::JwkValidation`]): signature or key material problems
//! - **Time errors** ([`EvpError::TimeValidation`]): `iat` outside the window
//! - **Format errors** ([`EvpError::TokenFormat`]): malformed JWTs, structured
//!   fields or compact serializations
//! - **Network errors** ([`EvpError::Discovery`], [`EvpError::JwksFetch`]):
//!   failures of the metadata/JWKS collaborators, safe to retry
//!
//! # Examples
//!
//! ```
//! use email_verification::error::{EvpError, Result};
//!
//! fn require_nonce(nonce: Option<&str>) -> Result<&str> {
//!     nonce.ok_or(EvpError::MissingClaim("nonce"))
//! }
//!
//! assert!(require_nonce(None).is_err());
//! ```

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, EvpError>;

/// Errors produced by the protocol core.
///
/// # Error Recovery
///
/// - **Network errors** ([`Discovery`](Self::Discovery),
///   [`JwksFetch`](Self::JwksFetch)): retry later; the token itself may be fine
/// - **Time errors** ([`TimeValidation`](Self::TimeValidation)): restart the
///   flow and obtain a fresh token
/// - **Everything else**: the input is invalid and retrying will not help
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum EvpError {
    /// A required claim or header field is absent.
    #[error("missing required claim: {0}")]
    MissingClaim(&'static str),

    /// A claim is present but does not hold the expected value.
    ///
    /// Covers audience and nonce mismatches, `sd_hash` mismatches and an
    /// `email_verified` value other than `true`.
    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    /// Signature verification failed.
    ///
    /// The token or request was tampered with, signed by a different key, or
    /// declares an algorithm the key cannot verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The `iat` claim lies outside the accepted window.
    ///
    /// Distinct from [`InvalidSignature`](Self::InvalidSignature) so callers
    /// can tell a stale token from a forged one.
    #[error("time validation failed: {0}")]
    TimeValidation(String),

    /// Malformed compact serialization, JSON or structured field.
    #[error("malformed token: {0}")]
    TokenFormat(String),

    /// Key material has the wrong shape or an unsupported algorithm.
    #[error("invalid JWK: {0}")]
    JwkValidation(String),

    /// The email address failed syntax or security validation.
    #[error("invalid email: {0}")]
    EmailValidation(String),

    /// Issuer or agent metadata could not be discovered.
    #[error("metadata discovery failed: {0}")]
    Discovery(String),

    /// A JWKS document could not be fetched or does not contain the key.
    #[error("JWKS fetch failed: {0}")]
    JwksFetch(String),

    /// Configuration could not be parsed or is out of bounds.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EvpError {
    /// Returns `true` for failures of external collaborators (metadata or
    /// JWKS fetching), which can be retried without re-deriving tokens.
    ///
    /// # Examples
    ///
    /// ```
    /// use email_verification::error::EvpError;
    ///
    /// assert!(EvpError::JwksFetch("timeout".into()).is_network());
    /// assert!(!EvpError::InvalidSignature("bad".into()).is_network());
    /// ```
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Discovery(_) | Self::JwksFetch(_))
    }
}

impl From<serde_json::Error> for EvpError {
    fn from(e: serde_json::Error) -> Self {
        Self::TokenFormat(format!("invalid JSON: {e}"))
    }
}
