//! IssuanceToken: the issuer's attestation that an address is verified.
//!
//! An SD-JWT with `typ: evt+jwt`, signed by the issuer key named in `kid`.
//! The `cnf.jwk` claim carries the browser's public key; only the holder of
//! the matching private key can later present the token.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    crypto::Jwk,
    error::{EvpError, Result},
    keys::KeyResolver,
    token::{ISSUANCE_TOKEN_TYPE, SignOptions, TokenValidation, jws},
    validation::{now_epoch_secs, require, require_str, validate_email, validate_iat_at},
};

/// Confirmation claim (RFC 7800) holding the key the token is bound to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Confirmation {
    /// Public key of the holder. Always public-only inside a token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
}

impl Confirmation {
    /// Creates a confirmation claim for `jwk`.
    #[must_use]
    pub fn new(jwk: Jwk) -> Self {
        Self { jwk: Some(jwk) }
    }
}

/// Claims of an IssuanceToken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuanceTokenPayload {
    /// Issuer domain.
    pub iss: String,
    /// Key binding for the browser.
    pub cnf: Confirmation,
    /// Verified address.
    pub email: String,
    /// Must be `true`; tokens for unverified addresses are never issued.
    pub email_verified: bool,
    /// Issued-at (Unix seconds). Set on generation when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Whether `email` is a private (directed) address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private_email: Option<bool>,
}

impl IssuanceTokenPayload {
    /// Creates a payload attesting `email` for the holder of `browser_jwk`.
    #[must_use]
    pub fn new(iss: &str, email: &str, browser_jwk: Jwk) -> Self {
        Self {
            iss: iss.to_owned(),
            cnf: Confirmation::new(browser_jwk),
            email: email.to_owned(),
            email_verified: true,
            iat: None,
            is_private_email: None,
        }
    }
}

#[derive(Deserialize)]
struct RawClaims {
    iss: Option<String>,
    cnf: Option<Confirmation>,
    email: Option<String>,
    email_verified: Option<bool>,
    iat: Option<u64>,
    is_private_email: Option<bool>,
}

/// Generates an IssuanceToken signed with the issuer key.
///
/// Private members of `payload.cnf.jwk` are removed before signing.
///
/// # Errors
///
/// - [`EvpError::InvalidClaim`] if `email_verified` is not `true`
/// - [`EvpError::EmailValidation`] for an invalid email
/// - [`EvpError::MissingClaim`] for an empty `iss` or absent `cnf.jwk`
/// - [`EvpError::JwkValidation`] for an unusable issuer key
#[instrument(skip(payload, issuer_private_jwk), fields(iss = %payload.iss, kid = ?issuer_private_jwk.kid))]
pub fn generate_issuance_token(
    payload: &IssuanceTokenPayload,
    issuer_private_jwk: &Jwk,
    options: &SignOptions,
) -> Result<String> {
    if !payload.email_verified {
        return Err(EvpError::InvalidClaim(
            "email_verified must be true to issue a token".into(),
        ));
    }
    validate_email(&payload.email)?;
    require_str(Some(payload.iss.as_str()), "iss")?;
    let holder_key = require(payload.cnf.jwk.as_ref(), "cnf.jwk")?;
    holder_key.validate()?;
    issuer_private_jwk.validate_signing_key()?;
    let alg = options.resolve_algorithm(issuer_private_jwk)?;

    let claims = IssuanceTokenPayload {
        cnf: Confirmation::new(holder_key.to_public()),
        iat: Some(match payload.iat {
            Some(iat) => iat,
            None => now_epoch_secs()?,
        }),
        ..payload.clone()
    };

    let header = jws::JwsHeader {
        alg: Some(alg.as_str().to_owned()),
        typ: Some(ISSUANCE_TOKEN_TYPE.to_owned()),
        kid: issuer_private_jwk.kid.clone(),
        jwk: None,
    };

    let token = jws::encode(&header, &claims, alg, issuer_private_jwk)?;
    debug!(%alg, "issuance token generated");
    Ok(token)
}

/// Verifies an IssuanceToken with the default `iat` window.
///
/// # Errors
///
/// See [`verify_issuance_token_with`].
pub async fn verify_issuance_token<R: KeyResolver>(
    token: &str,
    key_resolver: &R,
) -> Result<IssuanceTokenPayload> {
    verify_issuance_token_with(token, key_resolver, &TokenValidation::default()).await
}

/// Verifies an IssuanceToken, resolving the issuer key through
/// `key_resolver` with the header `kid` and the payload `iss`.
///
/// # Errors
///
/// - [`EvpError::TokenFormat`] for a malformed token or a `typ` other than
///   `evt+jwt`
/// - [`EvpError::MissingClaim`] for an absent `kid`, `alg`, `iss`, `cnf`,
///   `cnf.jwk`, `email`, `email_verified` or `iat`
/// - [`EvpError::InvalidClaim`] if `email_verified` is not `true` or
///   `cnf.jwk` holds private material
/// - [`EvpError::EmailValidation`] or [`EvpError::TimeValidation`]
/// - any error of the resolver, then [`EvpError::InvalidSignature`]
#[instrument(skip(token, key_resolver, validation), fields(token_len = token.len()))]
pub async fn verify_issuance_token_with<R: KeyResolver>(
    token: &str,
    key_resolver: &R,
    validation: &TokenValidation,
) -> Result<IssuanceTokenPayload> {
    let result = verify_inner(token, key_resolver, validation).await;
    if let Err(e) = &result {
        warn!(error = %e, "issuance token rejected");
    }
    result
}

async fn verify_inner<R: KeyResolver>(
    token: &str,
    key_resolver: &R,
    validation: &TokenValidation,
) -> Result<IssuanceTokenPayload> {
    let jws = jws::UnverifiedJws::parse(token)?;
    jws.header.expect_typ(ISSUANCE_TOKEN_TYPE)?;
    let kid = require_str(jws.header.kid.as_deref(), "kid")?;
    jws.header.algorithm()?;

    let payload = check_claims(jws.claims()?, validation)?;

    let issuer_key = key_resolver.resolve(kid, &payload.iss).await?;
    jws.verify(&issuer_key)?;

    debug!(iss = %payload.iss, kid, "issuance token verified");
    Ok(payload)
}

fn check_claims(raw: RawClaims, validation: &TokenValidation) -> Result<IssuanceTokenPayload> {
    let iss = require(raw.iss.filter(|v| !v.is_empty()), "iss")?;
    let cnf = require(raw.cnf, "cnf")?;
    let email = require(raw.email.filter(|v| !v.is_empty()), "email")?;
    let email_verified = require(raw.email_verified, "email_verified")?;

    validate_email(&email)?;
    if !email_verified {
        return Err(EvpError::InvalidClaim("email_verified must be true".into()));
    }
    let iat = require(raw.iat, "iat")?;
    validate_iat_at(iat, now_epoch_secs()?, validation.iat_window)?;

    let holder_key = require(cnf.jwk.as_ref(), "cnf.jwk")?;
    if holder_key.is_private() {
        return Err(EvpError::InvalidClaim("cnf.jwk must not contain private key material".into()));
    }
    holder_key.validate()?;

    Ok(IssuanceTokenPayload {
        iss,
        cnf,
        email,
        email_verified,
        iat: Some(iat),
        is_private_email: raw.is_private_email,
    })
}
