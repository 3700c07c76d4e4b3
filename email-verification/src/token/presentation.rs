//! PresentationToken: `SD-JWT~KB-JWT`.
//!
//! The browser appends a key-binding JWT to the IssuanceToken it received.
//! The KB-JWT is signed with the key in the SD-JWT's `cnf.jwk` and carries
//! `sd_hash = base64url(SHA-256(raw SD-JWT))`, which ties it to one exact
//! SD-JWT string.
//!
//! Verification runs in a fixed order and stops at the first failure:
//!
//! ```text
//! Unverified -> SD-JWT verified -> aud/nonce/iat/sd_hash checked
//!            -> KB-JWT signature verified -> Trusted
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    crypto::{Jwk, sha256_base64url},
    error::{EvpError, Result},
    keys::KeyResolver,
    token::{
        IssuanceTokenPayload, KB_JWT_TYPE, PRESENTATION_SEPARATOR, SignOptions, TokenValidation,
        issuance::verify_issuance_token_with, jws,
    },
    validation::{now_epoch_secs, require, require_str, validate_iat_at},
};

/// Claims of a key-binding JWT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KbJwtPayload {
    /// Relying party origin.
    pub aud: String,
    /// Relying party challenge.
    pub nonce: String,
    /// Issued-at (Unix seconds).
    pub iat: u64,
    /// base64url(SHA-256) of the SD-JWT this KB-JWT is bound to.
    pub sd_hash: String,
}

/// Result of a successful presentation verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresentationTokenPayload {
    /// Verified IssuanceToken claims.
    #[serde(rename = "sdJwt")]
    pub sd_jwt: IssuanceTokenPayload,
    /// Verified key-binding claims.
    #[serde(rename = "kbJwt")]
    pub kb_jwt: KbJwtPayload,
}

#[derive(Deserialize)]
struct RawKbClaims {
    aud: Option<String>,
    nonce: Option<String>,
    iat: Option<u64>,
    sd_hash: Option<String>,
}

/// Builds a PresentationToken for the relying party at `audience`.
///
/// # Errors
///
/// - [`EvpError::TokenFormat`] if `sd_jwt` is not a compact JWS
/// - [`EvpError::MissingClaim`] for an empty `audience` or `nonce`
/// - [`EvpError::JwkValidation`] for an unusable browser key
#[instrument(skip(sd_jwt, browser_private_jwk), fields(sd_jwt_len = sd_jwt.len()))]
pub fn generate_presentation_token(
    sd_jwt: &str,
    audience: &str,
    nonce: &str,
    browser_private_jwk: &Jwk,
    options: &SignOptions,
) -> Result<String> {
    if sd_jwt.contains(PRESENTATION_SEPARATOR) {
        return Err(EvpError::TokenFormat("SD-JWT must not contain '~'".into()));
    }
    jws::UnverifiedJws::parse(sd_jwt)?;
    require_str(Some(audience), "aud")?;
    require_str(Some(nonce), "nonce")?;

    // The KB-JWT header carries no kid, so only kty and a private key matter
    browser_private_jwk.validate()?;
    if browser_private_jwk.d.is_none() {
        return Err(EvpError::JwkValidation("browser JWK has no private key".into()));
    }
    let alg = options.resolve_algorithm(browser_private_jwk)?;

    let claims = KbJwtPayload {
        aud: audience.to_owned(),
        nonce: nonce.to_owned(),
        iat: now_epoch_secs()?,
        sd_hash: sha256_base64url(sd_jwt),
    };
    let header = jws::JwsHeader {
        alg: Some(alg.as_str().to_owned()),
        typ: Some(KB_JWT_TYPE.to_owned()),
        kid: None,
        jwk: None,
    };

    let kb_jwt = jws::encode(&header, &claims, alg, browser_private_jwk)?;
    debug!(%alg, "presentation token generated");
    Ok(format!("{sd_jwt}{PRESENTATION_SEPARATOR}{kb_jwt}"))
}

/// Verifies a PresentationToken with the default `iat` window.
///
/// # Errors
///
/// See [`verify_presentation_token_with`].
pub async fn verify_presentation_token<R: KeyResolver>(
    token: &str,
    key_resolver: &R,
    expected_audience: &str,
    expected_nonce: &str,
) -> Result<PresentationTokenPayload> {
    verify_presentation_token_with(
        token,
        key_resolver,
        expected_audience,
        expected_nonce,
        &TokenValidation::default(),
    )
    .await
}

/// Verifies a PresentationToken for the relying party at
/// `expected_audience` with its session challenge `expected_nonce`.
///
/// # Errors
///
/// - [`EvpError::TokenFormat`] unless the token is exactly two non-empty
///   parts joined by one `~`, or if the KB-JWT `typ` is not `kb+jwt`
/// - any error of [`verify_issuance_token_with`] for the SD-JWT half
/// - [`EvpError::MissingClaim`] for an absent KB-JWT claim
/// - [`EvpError::InvalidClaim`] on an `aud`, `nonce` or `sd_hash` mismatch
/// - [`EvpError::TimeValidation`] for a KB-JWT outside the `iat` window
/// - [`EvpError::InvalidSignature`] if the KB-JWT was not signed by the
///   `cnf` key
#[instrument(skip(token, key_resolver, validation), fields(token_len = token.len()))]
pub async fn verify_presentation_token_with<R: KeyResolver>(
    token: &str,
    key_resolver: &R,
    expected_audience: &str,
    expected_nonce: &str,
    validation: &TokenValidation,
) -> Result<PresentationTokenPayload> {
    let result =
        verify_inner(token, key_resolver, expected_audience, expected_nonce, validation).await;
    if let Err(e) = &result {
        warn!(error = %e, "presentation token rejected");
    }
    result
}

async fn verify_inner<R: KeyResolver>(
    token: &str,
    key_resolver: &R,
    expected_audience: &str,
    expected_nonce: &str,
    validation: &TokenValidation,
) -> Result<PresentationTokenPayload> {
    let mut parts = token.split(PRESENTATION_SEPARATOR);
    let (Some(sd_jwt), Some(kb_jwt), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(EvpError::TokenFormat("presentation token must be SD-JWT~KB-JWT".into()));
    };
    if sd_jwt.is_empty() || kb_jwt.is_empty() {
        return Err(EvpError::TokenFormat("presentation token parts must not be empty".into()));
    }

    let sd_jwt_payload = verify_issuance_token_with(sd_jwt, key_resolver, validation).await?;

    let kb = jws::UnverifiedJws::parse(kb_jwt)?;
    kb.header.expect_typ(KB_JWT_TYPE)?;
    kb.header.algorithm()?;

    let raw: RawKbClaims = kb.claims()?;
    let aud = require(raw.aud, "aud")?;
    let nonce = require(raw.nonce, "nonce")?;
    let iat = require(raw.iat, "iat")?;
    let sd_hash = require(raw.sd_hash, "sd_hash")?;

    if aud != expected_audience {
        return Err(EvpError::InvalidClaim(format!(
            "KB-JWT audience '{aud}' does not match expected audience"
        )));
    }
    if nonce != expected_nonce {
        return Err(EvpError::InvalidClaim("KB-JWT nonce does not match".into()));
    }
    validate_iat_at(iat, now_epoch_secs()?, validation.iat_window)?;
    if sd_hash != sha256_base64url(sd_jwt) {
        return Err(EvpError::InvalidClaim("sd_hash does not match the SD-JWT".into()));
    }

    let holder_key = require(sd_jwt_payload.cnf.jwk.as_ref(), "cnf.jwk")?;
    kb.verify(holder_key)?;

    debug!(iss = %sd_jwt_payload.iss, %aud, "presentation token verified");
    Ok(PresentationTokenPayload {
        sd_jwt: sd_jwt_payload,
        kb_jwt: KbJwtPayload { aud, nonce, iat, sd_hash },
    })
}
