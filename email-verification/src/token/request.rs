//! RequestToken: the browser's self-signed request to an issuer.
//!
//! The header embeds the browser's public key (`jwk`), so verification
//! needs no key lookup. The issuer later copies that key into the
//! IssuanceToken's `cnf` claim.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    crypto::Jwk,
    error::{EvpError, Result},
    token::{REQUEST_TOKEN_TYPE, SignOptions, TokenValidation, jws},
    validation::{now_epoch_secs, require, require_str, validate_email, validate_iat_at},
};

/// Claims of a RequestToken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestTokenPayload {
    /// Issuer the request is addressed to.
    pub aud: String,
    /// Challenge supplied by the relying party.
    pub nonce: String,
    /// Address the browser wants verified.
    pub email: String,
    /// Issued-at (Unix seconds). Set on generation when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Optional unique token identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl RequestTokenPayload {
    /// Creates a payload without `iat` or `jti`.
    #[must_use]
    pub fn new(aud: &str, nonce: &str, email: &str) -> Self {
        Self {
            aud: aud.to_owned(),
            nonce: nonce.to_owned(),
            email: email.to_owned(),
            iat: None,
            jti: None,
        }
    }
}

/// Wire shape before required claims are checked.
#[derive(Deserialize)]
struct RawClaims {
    aud: Option<String>,
    nonce: Option<String>,
    email: Option<String>,
    iat: Option<u64>,
    jti: Option<String>,
}

/// Generates a RequestToken signed with `signing_jwk`.
///
/// The header carries `{alg, typ: "JWT", kid, jwk}` where `jwk` is the
/// public half of the signing key.
///
/// # Errors
///
/// - [`EvpError::EmailValidation`] for an invalid email
/// - [`EvpError::MissingClaim`] for an empty `aud` or `nonce`
/// - [`EvpError::JwkValidation`] if the key lacks `kty`/`alg`/`kid`, has an
///   unsupported type or curve, or holds no private material
#[instrument(skip(payload, signing_jwk), fields(aud = %payload.aud, kid = ?signing_jwk.kid))]
pub fn generate_request_token(
    payload: &RequestTokenPayload,
    signing_jwk: &Jwk,
    options: &SignOptions,
) -> Result<String> {
    validate_email(&payload.email)?;
    require_str(Some(payload.aud.as_str()), "aud")?;
    require_str(Some(payload.nonce.as_str()), "nonce")?;
    signing_jwk.validate_signing_key()?;
    let alg = options.resolve_algorithm(signing_jwk)?;

    let claims = RequestTokenPayload {
        iat: Some(match payload.iat {
            Some(iat) => iat,
            None => now_epoch_secs()?,
        }),
        ..payload.clone()
    };

    let header = jws::JwsHeader {
        alg: Some(alg.as_str().to_owned()),
        typ: Some(REQUEST_TOKEN_TYPE.to_owned()),
        kid: signing_jwk.kid.clone(),
        jwk: Some(signing_jwk.to_public()),
    };

    let token = jws::encode(&header, &claims, alg, signing_jwk)?;
    debug!(%alg, "request token generated");
    Ok(token)
}

/// Verifies a RequestToken with the default `iat` window.
///
/// # Errors
///
/// See [`verify_request_token_with`].
pub fn verify_request_token(token: &str) -> Result<RequestTokenPayload> {
    verify_request_token_with(token, &TokenValidation::default())
}

/// Verifies a RequestToken against its embedded header key.
///
/// The signature is checked before any claim is trusted, pinned to the
/// header's `alg`.
///
/// # Errors
///
/// - [`EvpError::TokenFormat`] for a malformed token
/// - [`EvpError::MissingClaim`] if `jwk`, `alg`, `aud`, `nonce`, `email` or
///   `iat` is absent
/// - [`EvpError::InvalidSignature`] if the signature does not verify
/// - [`EvpError::EmailValidation`] for an invalid email
/// - [`EvpError::TimeValidation`] if `iat` is outside the window
#[instrument(skip(token, validation), fields(token_len = token.len()))]
pub fn verify_request_token_with(
    token: &str,
    validation: &TokenValidation,
) -> Result<RequestTokenPayload> {
    let result = verify_inner(token, validation);
    if let Err(e) = &result {
        warn!(error = %e, "request token rejected");
    }
    result
}

fn verify_inner(token: &str, validation: &TokenValidation) -> Result<RequestTokenPayload> {
    let jws = jws::UnverifiedJws::parse(token)?;
    let header_jwk = require(jws.header.jwk.as_ref(), "jwk")?;
    jws.header.algorithm()?;
    if header_jwk.is_private() {
        return Err(EvpError::JwkValidation("embedded header key must be public".into()));
    }

    jws.verify(header_jwk)?;

    let raw: RawClaims = jws.claims()?;
    let aud = require(raw.aud.filter(|v| !v.is_empty()), "aud")?;
    let nonce = require(raw.nonce.filter(|v| !v.is_empty()), "nonce")?;
    let email = require(raw.email.filter(|v| !v.is_empty()), "email")?;
    validate_email(&email)?;
    let iat = require(raw.iat, "iat")?;
    validate_iat_at(iat, now_epoch_secs()?, validation.iat_window)?;

    debug!(%aud, "request token verified");
    Ok(RequestTokenPayload { aud, nonce, email, iat: Some(iat), jti: raw.jti })
}
