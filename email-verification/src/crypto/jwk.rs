//! JSON Web Key (JWK) and JWK Set (JWKS) model.
//!
//! This module implements the [RFC 7517](https://www.rfc-editor.org/rfc/rfc7517.html)
//! key format for the three key families the protocol accepts (RSA, EC and
//! OKP) and [RFC 7638](https://www.rfc-editor.org/rfc/rfc7638.html) JWK
//! thumbprints.
//!
//! # Public-only keys
//!
//! A JWK that ends up inside a token (the RequestToken header `jwk`, or the
//! IssuanceToken `cnf.jwk`) must never carry private parameters. The
//! public view is derived on demand with [`Jwk::to_public`], it is not a
//! separate stored type.
//!
//! # JWK Thumbprint
//!
//! The thumbprint is base64url(SHA-256(canonical JSON)) where the canonical
//! JSON holds only the required members in lexicographic order:
//!
//! - OKP: `{"crv":..,"kty":"OKP","x":..}`
//! - EC: `{"crv":..,"kty":"EC","x":..,"y":..}`
//! - RSA: `{"e":..,"kty":"RSA","n":..}`
//!
//! # Examples
//!
//! ```rust
//! use ed25519_dalek::SigningKey;
//! use email_verification::crypto::Jwk;
//!
//! let signing_key = SigningKey::from_bytes(&[7u8; 32]);
//! let jwk = Jwk::from_signing_key(&signing_key);
//!
//! assert!(jwk.is_private());
//! let public = jwk.to_public();
//! assert!(!public.is_private());
//! assert_eq!(public.kid, jwk.kid);
//! ```

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    crypto::{base64url_decode, base64url_encode, sha256_base64url},
    error::{EvpError, Result},
};

/// OKP curves the protocol recognises.
const OKP_CURVES: [&str; 4] = ["Ed25519", "Ed448", "X25519", "X448"];

/// EC curves the protocol recognises.
const EC_CURVES: [&str; 3] = ["P-256", "P-384", "P-521"];

/// Key family of a JWK (`kty`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// RSA key (`"RSA"`).
    Rsa,
    /// Elliptic curve key (`"EC"`).
    Ec,
    /// Octet key pair (`"OKP"`), i.e. Edwards or Montgomery curves.
    Okp,
}

impl KeyType {
    /// Returns the `kty` string for this key type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
            Self::Okp => "OKP",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON Web Key.
///
/// All members except `kty` are optional at the type level; which ones are
/// required depends on the key type and is checked by [`Jwk::validate`].
/// Unknown members are dropped on deserialization.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Key type: `RSA`, `EC` or `OKP`.
    #[serde(default)]
    pub kty: String,
    /// Intended JWS algorithm (e.g. `EdDSA`, `RS256`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Public key use (`sig`).
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Curve name (EC and OKP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// X coordinate (EC) or public key bytes (OKP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Y coordinate (EC).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Private key (RSA private exponent, EC scalar or OKP seed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// RSA first prime factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// RSA second prime factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// RSA first factor CRT exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    /// RSA second factor CRT exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    /// RSA first CRT coefficient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
}

// Private members are never printed.
impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .field("crv", &self.crv)
            .field("private", &self.is_private())
            .finish_non_exhaustive()
    }
}

impl Jwk {
    /// Creates a public Ed25519 JWK from an `ed25519-dalek` verifying key.
    ///
    /// The key carries `alg: "EdDSA"`, `use: "sig"` and its RFC 7638
    /// thumbprint as `kid`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ed25519_dalek::SigningKey;
    /// use email_verification::crypto::Jwk;
    ///
    /// let signing_key = SigningKey::from_bytes(&[0u8; 32]);
    /// let jwk = Jwk::from_verifying_key(&signing_key.verifying_key());
    ///
    /// assert_eq!(jwk.kty, "OKP");
    /// assert_eq!(jwk.crv.as_deref(), Some("Ed25519"));
    /// assert_eq!(jwk.alg.as_deref(), Some("EdDSA"));
    /// assert_eq!(jwk.kid.as_ref().map(String::len), Some(43));
    /// ```
    #[must_use]
    pub fn from_verifying_key(verifying_key: &VerifyingKey) -> Self {
        let jwk = Self {
            kty: KeyType::Okp.as_str().to_owned(),
            alg: Some("EdDSA".to_owned()),
            key_use: Some("sig".to_owned()),
            crv: Some("Ed25519".to_owned()),
            x: Some(base64url_encode(verifying_key.as_bytes())),
            ..Self::default()
        };
        let kid = Self::okp_thumbprint("Ed25519", jwk.x.as_deref().unwrap_or_default());
        Self { kid: Some(kid), ..jwk }
    }

    /// Creates a private Ed25519 JWK (`d` set to the 32-byte seed) from an
    /// `ed25519-dalek` signing key.
    #[must_use]
    pub fn from_signing_key(signing_key: &SigningKey) -> Self {
        let public = Self::from_verifying_key(&signing_key.verifying_key());
        Self { d: Some(base64url_encode(signing_key.to_bytes())), ..public }
    }

    /// Returns the key type, or an error if `kty` is missing or unsupported.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] for an empty or unknown `kty`.
    pub fn key_type(&self) -> Result<KeyType> {
        match self.kty.as_str() {
            "RSA" => Ok(KeyType::Rsa),
            "EC" => Ok(KeyType::Ec),
            "OKP" => Ok(KeyType::Okp),
            "" => Err(EvpError::JwkValidation("JWK is missing 'kty'".to_owned())),
            other => Err(EvpError::JwkValidation(format!("unsupported key type '{other}'"))),
        }
    }

    /// Validates the key shape: supported `kty`, supported curve and the
    /// public members the key type requires.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] describing the first problem found.
    pub fn validate(&self) -> Result<KeyType> {
        let kty = self.key_type()?;
        match kty {
            KeyType::Okp => {
                let crv = self.require_member(self.crv.as_deref(), "crv")?;
                if !OKP_CURVES.contains(&crv) {
                    return Err(EvpError::JwkValidation(format!("unsupported OKP curve '{crv}'")));
                }
                self.require_member(self.x.as_deref(), "x")?;
            }
            KeyType::Ec => {
                let crv = self.require_member(self.crv.as_deref(), "crv")?;
                if !EC_CURVES.contains(&crv) {
                    return Err(EvpError::JwkValidation(format!("unsupported EC curve '{crv}'")));
                }
                self.require_member(self.x.as_deref(), "x")?;
                self.require_member(self.y.as_deref(), "y")?;
            }
            KeyType::Rsa => {
                self.require_member(self.n.as_deref(), "n")?;
                self.require_member(self.e.as_deref(), "e")?;
            }
        }
        Ok(kty)
    }

    /// Validates a key intended for token signing: `kty`, `alg` and `kid`
    /// must all be present and the key must hold private material.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if any requirement is not met.
    pub fn validate_signing_key(&self) -> Result<KeyType> {
        if self.kty.is_empty() {
            return Err(EvpError::JwkValidation("JWK is missing 'kty'".to_owned()));
        }
        if self.alg.as_deref().is_none_or(str::is_empty) {
            return Err(EvpError::JwkValidation("JWK is missing 'alg'".to_owned()));
        }
        if self.kid.as_deref().is_none_or(str::is_empty) {
            return Err(EvpError::JwkValidation("JWK is missing 'kid'".to_owned()));
        }
        let kty = self.validate()?;
        if self.d.is_none() {
            return Err(EvpError::JwkValidation("signing JWK has no private key".to_owned()));
        }
        Ok(kty)
    }

    /// Returns `true` if any private member (`d`, `p`, `q`, `dp`, `dq`, `qi`)
    /// is present.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        self.d.is_some()
            || self.p.is_some()
            || self.q.is_some()
            || self.dp.is_some()
            || self.dq.is_some()
            || self.qi.is_some()
    }

    /// Returns a copy of this key with every private member removed.
    #[must_use]
    pub fn to_public(&self) -> Self {
        let mut public = self.clone();
        public.strip_private();
        public
    }

    /// Removes private members in place, zeroizing their contents.
    pub fn strip_private(&mut self) {
        for member in [&mut self.d, &mut self.p, &mut self.q, &mut self.dp, &mut self.dq, &mut self.qi]
        {
            if let Some(mut secret) = member.take() {
                secret.zeroize();
            }
        }
    }

    /// Computes the RFC 7638 thumbprint of this key.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the key is not valid.
    pub fn thumbprint(&self) -> Result<String> {
        let missing = || EvpError::JwkValidation("JWK is missing a thumbprint member".to_owned());
        match self.validate()? {
            KeyType::Okp => {
                let crv = self.crv.as_deref().ok_or_else(missing)?;
                let x = self.x.as_deref().ok_or_else(missing)?;
                Ok(Self::okp_thumbprint(crv, x))
            }
            KeyType::Ec => {
                let crv = self.crv.as_deref().ok_or_else(missing)?;
                let x = self.x.as_deref().ok_or_else(missing)?;
                let y = self.y.as_deref().ok_or_else(missing)?;
                let canonical = format!(r#"{{"crv":"{crv}","kty":"EC","x":"{x}","y":"{y}"}}"#);
                Ok(sha256_base64url(canonical))
            }
            KeyType::Rsa => {
                let n = self.n.as_deref().ok_or_else(missing)?;
                let e = self.e.as_deref().ok_or_else(missing)?;
                let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
                Ok(sha256_base64url(canonical))
            }
        }
    }

    /// Decodes an Ed25519 public key.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if this is not a valid Ed25519 key.
    pub fn ed25519_verifying_key(&self) -> Result<VerifyingKey> {
        self.expect_ed25519()?;
        let x = base64url_decode(self.require_member(self.x.as_deref(), "x")?)
            .map_err(|_| EvpError::JwkValidation("Ed25519 'x' is not base64url".to_owned()))?;
        let bytes: [u8; 32] = x
            .try_into()
            .map_err(|_| EvpError::JwkValidation("Ed25519 'x' must be 32 bytes".to_owned()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| EvpError::JwkValidation(format!("invalid Ed25519 public key: {e}")))
    }

    /// Decodes an Ed25519 private key.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if this is not a private Ed25519 key.
    pub fn ed25519_signing_key(&self) -> Result<SigningKey> {
        self.expect_ed25519()?;
        let mut d = base64url_decode(self.require_member(self.d.as_deref(), "d")?)
            .map_err(|_| EvpError::JwkValidation("Ed25519 'd' is not base64url".to_owned()))?;
        let seed: Result<[u8; 32]> = d
            .as_slice()
            .try_into()
            .map_err(|_| EvpError::JwkValidation("Ed25519 'd' must be 32 bytes".to_owned()));
        d.zeroize();
        let mut seed = seed?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(signing_key)
    }

    /// Converts the key material into a `josekit` JWK.
    ///
    /// `alg` and `use` are left out so that the algorithm chosen by the
    /// caller, not the one advertised by the key, drives signer selection.
    pub(crate) fn to_josekit(&self) -> Result<josekit::jwk::Jwk> {
        let mut material = self.clone();
        material.alg = None;
        material.key_use = None;
        let mut bytes = serde_json::to_vec(&material)?;
        material.strip_private();
        let converted = josekit::jwk::Jwk::from_bytes(&bytes);
        // The serialized form carries the private members in clear
        bytes.zeroize();
        converted.map_err(|e| EvpError::JwkValidation(format!("unusable key material: {e}")))
    }

    fn expect_ed25519(&self) -> Result<()> {
        if self.key_type()? != KeyType::Okp || self.crv.as_deref() != Some("Ed25519") {
            return Err(EvpError::JwkValidation("expected an Ed25519 OKP key".to_owned()));
        }
        Ok(())
    }

    fn require_member<'a>(&self, value: Option<&'a str>, name: &str) -> Result<&'a str> {
        match value {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(EvpError::JwkValidation(format!("{} JWK is missing '{name}'", self.kty))),
        }
    }

    fn okp_thumbprint(crv: &str, x: &str) -> String {
        sha256_base64url(format!(r#"{{"crv":"{crv}","kty":"OKP","x":"{x}"}}"#))
    }
}

/// JSON Web Key Set.
///
/// # Examples
///
/// ```
/// use ed25519_dalek::SigningKey;
/// use email_verification::crypto::{Jwk, Jwks};
///
/// let jwk = Jwk::from_verifying_key(&SigningKey::from_bytes(&[1u8; 32]).verifying_key());
/// let kid = jwk.kid.clone().unwrap();
/// let jwks = Jwks::new(jwk);
///
/// assert!(jwks.find(&kid).is_some());
/// assert!(jwks.find("unknown").is_none());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    /// Keys in the set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Creates a JWKS with a single key.
    #[must_use]
    pub fn new(jwk: Jwk) -> Self {
        Self { keys: vec![jwk] }
    }

    /// Finds the key whose `kid` equals `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Serializes the set to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
