//! Compact JWS serialization (RFC 7515 §7.1).
//!
//! Tokens are built by hand, the same way for every token type:
//!
//! ```text
//! base64url(header JSON) . base64url(payload JSON) . base64url(signature)
//! ```
//!
//! Decoding yields an [`UnverifiedJws`]: the header and claims can be read
//! before the signature is checked (the issuance flow needs `kid` and `iss`
//! to find the key), but nothing in it is trusted until
//! [`UnverifiedJws::verify`] succeeds.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    crypto::{Jwk, JwsAlgorithm, base64url_decode, base64url_encode},
    error::{EvpError, Result},
    validation::require_str,
};

/// JOSE header fields used by the protocol's tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwsHeader {
    /// Signature algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Token type (`JWT`, `evt+jwt` or `kb+jwt`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Identifier of the signing key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Embedded public signing key (request tokens only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
}

impl JwsHeader {
    /// Returns the declared algorithm, which must be present and supported.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::MissingClaim`] if `alg` is absent, or
    /// [`EvpError::JwkValidation`] if it names an unsupported algorithm.
    pub fn algorithm(&self) -> Result<JwsAlgorithm> {
        require_str(self.alg.as_deref(), "alg")?.parse()
    }

    /// Fails with [`EvpError::TokenFormat`] unless `typ` equals `expected`.
    pub(crate) fn expect_typ(&self, expected: &str) -> Result<()> {
        match self.typ.as_deref() {
            Some(typ) if typ == expected => Ok(()),
            Some(typ) => Err(EvpError::TokenFormat(format!(
                "token type must be '{expected}', got '{typ}'"
            ))),
            None => Err(EvpError::TokenFormat(format!("token type must be '{expected}'"))),
        }
    }
}

/// Signs `payload` and returns the compact serialization.
pub(crate) fn encode<P: Serialize>(
    header: &JwsHeader,
    payload: &P,
    alg: JwsAlgorithm,
    signing_jwk: &Jwk,
) -> Result<String> {
    let header_b64 = base64url_encode(serde_json::to_vec(header)?);
    let payload_b64 = base64url_encode(serde_json::to_vec(payload)?);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = alg.sign(signing_jwk, signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{}", base64url_encode(signature)))
}

/// A parsed compact JWS whose signature has not been checked.
#[derive(Debug, Clone)]
pub struct UnverifiedJws<'a> {
    /// Decoded header.
    pub header: JwsHeader,
    payload: Vec<u8>,
    signing_input: &'a str,
    signature: Vec<u8>,
}

impl<'a> UnverifiedJws<'a> {
    /// Parses a compact JWS with exactly three non-empty segments.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] for a wrong segment count or
    /// undecodable header/payload, and [`EvpError::InvalidSignature`] if the
    /// signature segment is not base64url.
    pub fn parse(token: &'a str) -> Result<Self> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(EvpError::TokenFormat("JWT must have exactly 3 segments".into()));
        };
        if header_b64.is_empty() || payload_b64.is_empty() {
            return Err(EvpError::TokenFormat("JWT header and payload must not be empty".into()));
        }
        if signature_b64.is_empty() {
            return Err(EvpError::InvalidSignature("JWT signature segment is empty".into()));
        }

        let header: JwsHeader = serde_json::from_slice(&base64url_decode(header_b64)?)?;
        let payload = base64url_decode(payload_b64)?;
        let signature = base64url_decode(signature_b64)
            .map_err(|_| EvpError::InvalidSignature("JWT signature is not base64url".into()))?;

        // header_b64.payload_b64 is a prefix of the token
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];

        Ok(Self { header, payload, signing_input, signature })
    }

    /// Deserializes the payload. The result is unauthenticated until
    /// [`verify`](Self::verify) has succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] if the payload is not valid JSON for
    /// `T`.
    pub fn claims<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Verifies the signature with `jwk`, pinned to the header's `alg`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::MissingClaim`] if the header has no `alg`,
    /// [`EvpError::JwkValidation`] if the key does not fit the algorithm,
    /// and [`EvpError::InvalidSignature`] if the signature does not verify.
    pub fn verify(&self, jwk: &Jwk) -> Result<()> {
        let alg = self.header.algorithm()?;
        alg.verify(jwk, self.signing_input.as_bytes(), &self.signature)
    }
}
