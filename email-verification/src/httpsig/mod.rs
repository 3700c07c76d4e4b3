//! RFC 9421 HTTP Message Signatures with a `Signature-Key` header.
//!
//! A signed request carries three headers sharing one label:
//!
//! ```text
//! Signature-Key:   sig1=hwk;kty="OKP";crv="Ed25519";x="..."
//! Signature-Input: sig1=("@method" "@authority" "@path" "signature-key");created=1700000000
//! Signature:       sig1=:<base64 signature>:
//! ```
//!
//! plus `Content-Digest: sha-256=:<base64>:` when the request has a body.
//! What is signed is the [`SignatureBase`] rebuilt from the request, never
//! the raw headers.
//!
//! # Key schemes
//!
//! - `hwk`: the public key inline
//! - `jwt`: a JWT whose `cnf.jwk` is the signing key; its claims are handed
//!   to the caller unvalidated
//! - `jwks`: `id` + `kid` (+ `well-known`) reference, fetched through a
//!   [`JwksFetcher`](crate::keys::JwksFetcher)
//!
//! The signature algorithm follows from the key type: Ed25519, ECDSA P-256
//! with SHA-256, or RSA-PSS with SHA-256.
//!
//! # Examples
//!
//! ```
//! use ed25519_dalek::SigningKey;
//! use email_verification::{
//!     crypto::Jwk,
//!     httpsig::{HttpRequest, HttpSignOptions, HttpSignatureVerifier, HttpSigner, VerifyOptions},
//! };
//!
//! # async fn example() -> email_verification::error::Result<()> {
//! let browser_key = Jwk::from_signing_key(&SigningKey::from_bytes(&[7u8; 32]));
//! let signer = HttpSigner::hwk(browser_key)?;
//!
//! let mut request = HttpRequest::new("POST", "issuer.example", "/issue")
//!     .with_header("Content-Type", "application/json")
//!     .with_body(br#"{"email":"user@example.com"}"#.to_vec());
//! signer.sign_request(&mut request, &HttpSignOptions::default())?;
//!
//! let verification = HttpSignatureVerifier::new()
//!     .verify(&request, &VerifyOptions::default())
//!     .await;
//! assert!(verification.is_verified());
//! # Ok(())
//! # }
//! ```

pub mod base;
pub mod keys;
pub mod sfv;
pub mod signer;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use base::{
    CONTENT_DIGEST_HEADER, Component, HttpRequest, SIGNATURE_HEADER, SIGNATURE_INPUT_HEADER,
    SIGNATURE_KEY_HEADER, SignatureBase, SignatureParams, content_digest, default_components,
    verify_content_digest,
};
pub use keys::{HttpSignatureAlgorithm, JwksReference, JwtKey, KeyScheme, SignatureKey};
pub use signer::{HttpSignOptions, HttpSigner, SignedHeaders, signature_input_header};
pub use verifier::{
    DEFAULT_MAX_CLOCK_SKEW, DEFAULT_REPLAY_CACHE_CAPACITY, HttpSignatureVerifier,
    SignatureVerification, VerifiedSignature, VerifyOptions,
};
