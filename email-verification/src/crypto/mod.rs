//! Cryptographic primitives shared by the token codec and the HTTP signature
//! engine.
//!
//! - [`Jwk`] / [`Jwks`]: JSON Web Key model (RFC 7517) with RFC 7638
//!   thumbprints and public-only projection
//! - [`JwsAlgorithm`]: JWS algorithm identifiers bound to key types, backed by
//!   `josekit` signers and verifiers
//! - base64url / base64 codecs and SHA-256 digests

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{EvpError, Result};

pub mod alg;
pub mod jwk;

pub use alg::JwsAlgorithm;
pub use jwk::{Jwk, Jwks, KeyType};

/// Encodes bytes as base64url (RFC 4648 §5) without padding.
///
/// # Examples
///
/// ```
/// use email_verification::crypto::base64url_encode;
///
/// assert_eq!(base64url_encode(b"hello"), "aGVsbG8");
/// ```
#[must_use]
pub fn base64url_encode(data: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

/// Decodes unpadded base64url.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] if the input is not valid base64url.
pub fn base64url_decode(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| EvpError::TokenFormat(format!("invalid base64url: {e}")))
}

/// Encodes bytes as standard padded base64, the alphabet used by structured
/// field byte sequences.
#[must_use]
pub fn base64_encode(data: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decodes standard padded base64.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] if the input is not valid base64.
pub fn base64_decode(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| EvpError::TokenFormat(format!("invalid base64: {e}")))
}

/// Computes the SHA-256 digest of `data`.
#[must_use]
pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Computes base64url(SHA-256(`data`)).
///
/// This is the encoding used for `sd_hash` and JWK thumbprints.
///
/// # Examples
///
/// ```
/// use email_verification::crypto::sha256_base64url;
///
/// // SHA-256 output is always 43 characters in unpadded base64url
/// assert_eq!(sha256_base64url("header.payload.signature").len(), 43);
/// ```
#[must_use]
pub fn sha256_base64url(data: impl AsRef<[u8]>) -> String {
    base64url_encode(sha256(data))
}
