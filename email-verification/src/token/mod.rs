//! Token chain of the Email Verification Protocol.
//!
//! Three compact JWTs carry an email attestation from the issuer to the
//! relying party (RP):
//!
//! 1. [`request`]: the browser's self-signed RequestToken (`typ: JWT`),
//!    with its public key embedded in the header.
//! 2. [`issuance`]: the issuer's IssuanceToken, an SD-JWT (`typ: evt+jwt`)
//!    that binds the browser key through the `cnf` claim.
//! 3. [`presentation`]: the PresentationToken `SD-JWT~KB-JWT`, where the
//!    KB-JWT (`typ: kb+jwt`) proves possession of the `cnf` key and pins
//!    the exact SD-JWT bytes through `sd_hash`.
//!
//! Generation is synchronous. Verification of issuance and presentation
//! tokens awaits a [`KeyResolver`](crate::keys::KeyResolver) for the issuer
//! key.
//!
//! # Examples
//!
//! ```
//! use ed25519_dalek::SigningKey;
//! use email_verification::{
//!     crypto::Jwk,
//!     token::{RequestTokenPayload, SignOptions, generate_request_token, verify_request_token},
//! };
//!
//! # fn example() -> email_verification::error::Result<()> {
//! let browser_key = Jwk::from_signing_key(&SigningKey::from_bytes(&[42u8; 32]));
//! let payload = RequestTokenPayload::new("issuer.example", "259c5eae-486d", "user@example.com");
//!
//! let token = generate_request_token(&payload, &browser_key, &SignOptions::default())?;
//! let verified = verify_request_token(&token)?;
//!
//! assert_eq!(verified.email, "user@example.com");
//! assert!(verified.iat.is_some());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod issuance;
pub mod jws;
pub mod presentation;
pub mod request;


pub use issuance::{
    Confirmation, IssuanceTokenPayload, generate_issuance_token, verify_issuance_token,
    verify_issuance_token_with,
};
pub use jws::{JwsHeader, UnverifiedJws};
pub use presentation::{
    KbJwtPayload, PresentationTokenPayload, generate_presentation_token,
    verify_presentation_token, verify_presentation_token_with,
};
pub use request::{
    RequestTokenPayload, generate_request_token, verify_request_token, verify_request_token_with,
};

use crate::{
    crypto::{Jwk, JwsAlgorithm},
    error::Result,
    validation::{IatWindow, require_str},
};

/// `typ` header of RequestTokens.
pub const REQUEST_TOKEN_TYPE: &str = "JWT";

/// `typ` header of IssuanceTokens (SD-JWTs).
pub const ISSUANCE_TOKEN_TYPE: &str = "evt+jwt";

/// `typ` header of key-binding JWTs.
pub const KB_JWT_TYPE: &str = "kb+jwt";

/// Separator between the SD-JWT and the KB-JWT in a PresentationToken.
pub const PRESENTATION_SEPARATOR: char = '~';

/// Options for token generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignOptions {
    /// Algorithm to sign with instead of the key's `alg` member.
    ///
    /// Still checked against the key type and curve.
    pub algorithm: Option<JwsAlgorithm>,
}

impl SignOptions {
    /// Picks the signing algorithm for `jwk` and checks it fits the key.
    fn resolve_algorithm(&self, jwk: &Jwk) -> Result<JwsAlgorithm> {
        let alg = match self.algorithm {
            Some(alg) => alg,
            None => require_str(jwk.alg.as_deref(), "alg")?.parse()?,
        };
        alg.check_key(jwk)?;
        Ok(alg)
    }
}

/// Options for token verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenValidation {
    /// Accepted `iat` range for every token in the chain.
    pub iat_window: IatWindow,
}
