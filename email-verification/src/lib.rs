//! Email Verification Protocol: token chain and HTTP Message Signatures
//!
//! A browser proves to a relying party (RP) that an issuer has verified
//! ownership of an email address, without the RP trusting the browser.
//!
//! # How the pieces fit
//!
//! ```text
//! ┌──────────┐  RequestToken / signed issuance request  ┌──────────┐
//! │ Browser  │─────────────────────────────────────────▶│  Issuer  │
//! │ (key B)  │◀─────────────────────────────────────────│ (key I)  │
//! └────┬─────┘   IssuanceToken (evt+jwt, cnf.jwk = B)   └──────────┘
//!      │
//!      │ PresentationToken  SD-JWT~KB-JWT (kb+jwt, signed with B)
//!      ▼
//! ┌──────────┐  resolves key I through a KeyResolver,
//! │    RP    │  checks aud / nonce / sd_hash, verifies KB-JWT with B
//! └──────────┘
//! ```
//!
//! Any HTTP request in the flow, the issuance request in particular, can
//! carry an RFC 9421 signature with a `Signature-Key` header; the issuer
//! verifies it with [`httpsig::HttpSignatureVerifier`] before trusting the
//! body, and binds the token to the key that signed it.
//!
//! # Quick Start
//!
//! ## Issue and present a token
//!
//! ```rust
//! use ed25519_dalek::SigningKey;
//! use email_verification::{
//!     crypto::Jwk,
//!     keys::StaticKeyResolver,
//!     token::{
//!         IssuanceTokenPayload, SignOptions, generate_issuance_token,
//!         generate_presentation_token, verify_presentation_token,
//!     },
//! };
//!
//! # async fn example() -> email_verification::error::Result<()> {
//! let issuer_key = Jwk::from_signing_key(&SigningKey::from_bytes(&[1u8; 32]));
//! let browser_key = Jwk::from_signing_key(&SigningKey::from_bytes(&[2u8; 32]));
//!
//! // Issuer: attest the address for the browser key
//! let payload = IssuanceTokenPayload::new("issuer.example", "user@example.com", browser_key.clone());
//! let sd_jwt = generate_issuance_token(&payload, &issuer_key, &SignOptions::default())?;
//!
//! // Browser: bind the token to the RP's challenge
//! let token = generate_presentation_token(
//!     &sd_jwt,
//!     "https://rp.example",
//!     "259c5eae-486d",
//!     &browser_key,
//!     &SignOptions::default(),
//! )?;
//!
//! // RP: verify the whole chain
//! let resolver = StaticKeyResolver::new().with_issuer_key("issuer.example", issuer_key);
//! let verified =
//!     verify_presentation_token(&token, &resolver, "https://rp.example", "259c5eae-486d").await?;
//! assert_eq!(verified.sd_jwt.email, "user@example.com");
//! # Ok(())
//! # }
//! ```
//!
//! ## Sign and verify a request
//!
//! See [`httpsig`].
//!
//! # Module Organization
//!
//! - [`crypto`]: base64url, SHA-256, JWK model, JWS algorithms
//! - [`validation`]: email syntax, required claims, `iat` window
//! - [`token`]: RequestToken, IssuanceToken, PresentationToken
//! - [`httpsig`]: structured fields, signature base, signer, verifier
//! - [`keys`]: key resolvers, TTL cache, JWKS/metadata fetcher
//! - [`issuer`]: issuance request handling and protocol error responses
//! - [`config`]: TOML configuration
//!
//! # Security Considerations
//!
//! - Signatures are checked against the algorithm the token declares and
//!   only with keys that fit it; `none` and HMAC are never accepted.
//! - Keys placed in `cnf` are always stripped of private members.
//! - The HTTP authority comes from the caller, never from `Host`.
//! - Metadata and JWKS are fetched over HTTPS only, with timeouts.
//!
//! # Standards Compliance
//!
//! - RFC 7515 (JWS compact serialization), RFC 7638 (JWK thumbprints)
//! - RFC 7800 (`cnf` claim), SD-JWT key binding (`sd_hash`)
//! - RFC 8941 (Structured Field Values), RFC 9421 (HTTP Message Signatures)
//! - RFC 9530 (`Content-Digest`)
//!
//! # Error Handling
//!
//! Token and key operations return [`Result`] with a typed [`EvpError`].
//! HTTP signature verification returns a
//! [`SignatureVerification`](httpsig::SignatureVerification) instead, and
//! the [`issuer`] maps failures to stable public error codes.
//!
//! ```rust
//! use email_verification::{error::EvpError, token::verify_request_token};
//!
//! match verify_request_token("not.a.token") {
//!     Err(EvpError::TokenFormat(reason)) => println!("malformed: {reason}"),
//!     Err(EvpError::TimeValidation(_)) => println!("stale, request a new token"),
//!     Err(e) => println!("rejected: {e}"),
//!     Ok(_) => unreachable!(),
//! }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from josekit and reqwest"
)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod httpsig;
pub mod issuer;
pub mod keys;
pub mod token;
pub mod validation;

pub use config::EvpConfig;
pub use error::{EvpError, Result};
