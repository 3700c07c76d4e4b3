//! JWS algorithm identifiers and the `josekit` signers behind them.
//!
//! Only asymmetric algorithms are accepted. `none` and the HMAC family are
//! rejected at parse time, so a token header can never downgrade
//! verification to a shared-secret or unsigned mode.

use std::{fmt, str::FromStr};

use josekit::jws::{
    ES256, ES384, ES512, EdDSA, JwsSigner, JwsVerifier, PS256, PS384, PS512, RS256, RS384, RS512,
};

use crate::{
    crypto::{Jwk, KeyType},
    error::{EvpError, Result},
};

/// Asymmetric JWS algorithms (RFC 7518 §3 and RFC 8037).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    /// RSASSA-PKCS1-v1_5 using SHA-256.
    Rs256,
    /// RSASSA-PKCS1-v1_5 using SHA-384.
    Rs384,
    /// RSASSA-PKCS1-v1_5 using SHA-512.
    Rs512,
    /// RSASSA-PSS using SHA-256.
    Ps256,
    /// RSASSA-PSS using SHA-384.
    Ps384,
    /// RSASSA-PSS using SHA-512.
    Ps512,
    /// ECDSA using P-256 and SHA-256.
    Es256,
    /// ECDSA using P-384 and SHA-384.
    Es384,
    /// ECDSA using P-521 and SHA-512.
    Es512,
    /// Edwards-curve signatures (Ed25519 or Ed448).
    EdDsa,
}

impl JwsAlgorithm {
    /// Returns the `alg` header value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::EdDsa => "EdDSA",
        }
    }

    /// Returns the key type this algorithm operates on.
    #[must_use]
    pub const fn key_type(self) -> KeyType {
        match self {
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512 => {
                KeyType::Rsa
            }
            Self::Es256 | Self::Es384 | Self::Es512 => KeyType::Ec,
            Self::EdDsa => KeyType::Okp,
        }
    }

    /// Checks that `jwk` can be used with this algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the key type or curve does not
    /// match the algorithm.
    ///
    /// # Examples
    ///
    /// ```
    /// use ed25519_dalek::SigningKey;
    /// use email_verification::crypto::{Jwk, JwsAlgorithm};
    ///
    /// let jwk = Jwk::from_verifying_key(&SigningKey::from_bytes(&[0u8; 32]).verifying_key());
    ///
    /// assert!(JwsAlgorithm::EdDsa.check_key(&jwk).is_ok());
    /// assert!(JwsAlgorithm::Rs256.check_key(&jwk).is_err());
    /// ```
    pub fn check_key(self, jwk: &Jwk) -> Result<()> {
        let kty = jwk.validate()?;
        if kty != self.key_type() {
            return Err(EvpError::JwkValidation(format!(
                "algorithm {self} requires a {} key, got {kty}",
                self.key_type()
            )));
        }
        let crv = jwk.crv.as_deref();
        let curve_ok = match self {
            Self::Es256 => crv == Some("P-256"),
            Self::Es384 => crv == Some("P-384"),
            Self::Es512 => crv == Some("P-521"),
            Self::EdDsa => matches!(crv, Some("Ed25519" | "Ed448")),
            _ => true,
        };
        if !curve_ok {
            return Err(EvpError::JwkValidation(format!(
                "algorithm {self} cannot be used with curve '{}'",
                crv.unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Signs `message` with the private key in `jwk`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the key is incompatible or
    /// lacks private material.
    pub fn sign(self, jwk: &Jwk, message: &[u8]) -> Result<Vec<u8>> {
        self.check_key(jwk)?;
        let signer = self.signer(&jwk.to_josekit()?)?;
        signer
            .sign(message)
            .map_err(|e| EvpError::JwkValidation(format!("{self} signing failed: {e}")))
    }

    /// Verifies `signature` over `message` with the public key in `jwk`.
    ///
    /// The algorithm is fixed by the caller; the key's own `alg` member is
    /// not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the key cannot be used with
    /// this algorithm, or [`EvpError::InvalidSignature`] if the signature
    /// does not verify.
    pub fn verify(self, jwk: &Jwk, message: &[u8], signature: &[u8]) -> Result<()> {
        self.check_key(jwk)?;
        let verifier = self.verifier(&jwk.to_public().to_josekit()?)?;
        verifier
            .verify(message, signature)
            .map_err(|_| EvpError::InvalidSignature(format!("{self} signature mismatch")))
    }

    fn signer(self, jwk: &josekit::jwk::Jwk) -> Result<Box<dyn JwsSigner>> {
        let signer: std::result::Result<Box<dyn JwsSigner>, _> = match self {
            Self::Rs256 => RS256.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Rs384 => RS384.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Rs512 => RS512.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Ps256 => PS256.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Ps384 => PS384.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Ps512 => PS512.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Es256 => ES256.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Es384 => ES384.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::Es512 => ES512.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
            Self::EdDsa => EdDSA.signer_from_jwk(jwk).map(|s| Box::new(s) as Box<dyn JwsSigner>),
        };
        signer.map_err(|e| EvpError::JwkValidation(format!("unusable {self} signing key: {e}")))
    }

    fn verifier(self, jwk: &josekit::jwk::Jwk) -> Result<Box<dyn JwsVerifier>> {
        let verifier: std::result::Result<Box<dyn JwsVerifier>, _> = match self {
            Self::Rs256 => RS256.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Rs384 => RS384.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Rs512 => RS512.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Ps256 => PS256.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Ps384 => PS384.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Ps512 => PS512.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Es256 => ES256.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Es384 => ES384.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::Es512 => ES512.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
            Self::EdDsa => EdDSA.verifier_from_jwk(jwk).map(|v| Box::new(v) as Box<dyn JwsVerifier>),
        };
        verifier.map_err(|e| EvpError::JwkValidation(format!("unusable {self} public key: {e}")))
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JwsAlgorithm {
    type Err = EvpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "RS512" => Ok(Self::Rs512),
            "PS256" => Ok(Self::Ps256),
            "PS384" => Ok(Self::Ps384),
            "PS512" => Ok(Self::Ps512),
            "ES256" => Ok(Self::Es256),
            "ES384" => Ok(Self::Es384),
            "ES512" => Ok(Self::Es512),
            "EdDSA" => Ok(Self::EdDsa),
            other => Err(EvpError::JwkValidation(format!("unsupported algorithm '{other}'"))),
        }
    }
}
