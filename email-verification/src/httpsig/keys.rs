//! `Signature-Key` header schemes and the signature algorithms they imply.

use std::fmt;

use ed25519_dalek::Signature;
use signature::{Signer, Verifier};

use crate::{
    crypto::{Jwk, JwsAlgorithm, KeyType},
    error::{EvpError, Result},
    httpsig::sfv::{self, BareItem, Dictionary, Item, Member},
    token::jws::UnverifiedJws,
};

/// Public JWK members carried inline by the `hwk` scheme, in header order.
const HWK_MEMBERS: [&str; 6] = ["kty", "crv", "x", "y", "n", "e"];

/// Private JWK members that must never appear in a `Signature-Key`.
const PRIVATE_MEMBERS: [&str; 6] = ["d", "p", "q", "dp", "dq", "qi"];

/// HTTP signature algorithm, derived from the key type and never chosen
/// by the sender independently of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpSignatureAlgorithm {
    /// EdDSA over Ed25519.
    Ed25519,
    /// ECDSA over P-256 with SHA-256.
    EcdsaP256Sha256,
    /// RSASSA-PSS with SHA-256.
    RsaPssSha256,
}

impl HttpSignatureAlgorithm {
    /// Selects the algorithm for `jwk`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] for key types and curves other
    /// than OKP/Ed25519, EC/P-256 and RSA.
    pub fn for_key(jwk: &Jwk) -> Result<Self> {
        match (jwk.key_type()?, jwk.crv.as_deref()) {
            (KeyType::Okp, Some("Ed25519")) => Ok(Self::Ed25519),
            (KeyType::Ec, Some("P-256")) => Ok(Self::EcdsaP256Sha256),
            (KeyType::Rsa, _) => Ok(Self::RsaPssSha256),
            (kty, crv) => Err(EvpError::JwkValidation(format!(
                "no HTTP signature algorithm for {kty} key on curve {}",
                crv.unwrap_or("none")
            ))),
        }
    }

    /// Algorithm name used in the `alg` signature parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaP256Sha256 => "ecdsa-p256-sha256",
            Self::RsaPssSha256 => "rsa-pss-sha256",
        }
    }

    /// Signs `message` with the private key in `jwk`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the key is unusable.
    pub fn sign(self, jwk: &Jwk, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Ed25519 => Ok(jwk.ed25519_signing_key()?.sign(message).to_bytes().to_vec()),
            Self::EcdsaP256Sha256 => JwsAlgorithm::Es256.sign(jwk, message),
            Self::RsaPssSha256 => JwsAlgorithm::Ps256.sign(jwk, message),
        }
    }

    /// Verifies `signature` over `message` with the public key in `jwk`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::InvalidSignature`] if the signature does not
    /// verify and [`EvpError::JwkValidation`] if the key is unusable.
    pub fn verify(self, jwk: &Jwk, message: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Self::Ed25519 => {
                let signature = Signature::from_slice(signature).map_err(|_| {
                    EvpError::InvalidSignature("Ed25519 signature must be 64 bytes".into())
                })?;
                jwk.ed25519_verifying_key()?
                    .verify(message, &signature)
                    .map_err(|_| EvpError::InvalidSignature("ed25519 signature mismatch".into()))
            }
            Self::EcdsaP256Sha256 => JwsAlgorithm::Es256.verify(jwk, message, signature),
            Self::RsaPssSha256 => JwsAlgorithm::Ps256.verify(jwk, message, signature),
        }
    }
}

impl fmt::Display for HttpSignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `jwt` scheme key: the token plus its unvalidated payload.
///
/// The engine only extracts `cnf.jwk` as the HTTP signing key. Issuer,
/// audience and expiry of the token are for the caller to check.
#[derive(Debug, Clone, PartialEq)]
pub struct JwtKey {
    /// The compact JWT as received.
    pub token: String,
    /// Decoded payload, not signature-checked.
    pub claims: serde_json::Value,
    /// Public key from `cnf.jwk`.
    pub key: Jwk,
}

impl JwtKey {
    /// Decodes `token` and extracts its confirmation key.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] for a malformed token,
    /// [`EvpError::MissingClaim`] without `cnf.jwk`, and
    /// [`EvpError::JwkValidation`] for a private or invalid key.
    pub fn parse(token: &str) -> Result<Self> {
        let claims: serde_json::Value = UnverifiedJws::parse(token)?.claims()?;
        let jwk = claims
            .get("cnf")
            .and_then(|cnf| cnf.get("jwk"))
            .ok_or(EvpError::MissingClaim("cnf.jwk"))?;
        let key: Jwk = serde_json::from_value(jwk.clone())
            .map_err(|e| EvpError::JwkValidation(format!("invalid cnf.jwk: {e}")))?;
        check_public(&key)?;
        Ok(Self { token: token.to_owned(), claims, key })
    }
}

/// A `jwks` scheme reference to a key published elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwksReference {
    /// JWKS URL, or the origin whose metadata names it.
    pub id: String,
    /// Key identifier within the set.
    pub kid: String,
    /// Metadata document name under `/.well-known/`.
    pub well_known: Option<String>,
}

/// How the verifier obtains the signing key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyScheme {
    /// Public key inline in the header.
    Hwk(Jwk),
    /// Key bound into a JWT's `cnf` claim.
    Jwt(JwtKey),
    /// Key fetched from a JWKS.
    Jwks(JwksReference),
}

impl KeyScheme {
    /// Scheme token as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hwk(_) => "hwk",
            Self::Jwt(_) => "jwt",
            Self::Jwks(_) => "jwks",
        }
    }
}

/// A parsed `Signature-Key` header: one label and its scheme.
///
/// # Examples
///
/// ```
/// use email_verification::httpsig::{KeyScheme, SignatureKey};
///
/// let key = SignatureKey::parse(
///     r#"sig1=hwk;kty="OKP";crv="Ed25519";x="11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo""#,
/// )
/// .unwrap();
///
/// assert_eq!(key.label, "sig1");
/// assert!(matches!(key.scheme, KeyScheme::Hwk(ref jwk) if jwk.kty == "OKP"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureKey {
    /// Signature label shared with `Signature-Input` and `Signature`.
    pub label: String,
    /// Key scheme and material.
    pub scheme: KeyScheme,
}

impl SignatureKey {
    /// An `hwk` key carrying the public half of `jwk`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the key is invalid.
    pub fn hwk(label: &str, jwk: &Jwk) -> Result<Self> {
        let public = inline_members(&jwk.to_public());
        jwk.validate()?;
        Ok(Self { label: label.to_owned(), scheme: KeyScheme::Hwk(public) })
    }

    /// A `jwt` key wrapping `token`.
    ///
    /// # Errors
    ///
    /// See [`JwtKey::parse`].
    pub fn jwt(label: &str, token: &str) -> Result<Self> {
        Ok(Self { label: label.to_owned(), scheme: KeyScheme::Jwt(JwtKey::parse(token)?) })
    }

    /// A `jwks` reference.
    #[must_use]
    pub fn jwks(label: &str, id: &str, kid: &str, well_known: Option<&str>) -> Self {
        Self {
            label: label.to_owned(),
            scheme: KeyScheme::Jwks(JwksReference {
                id: id.to_owned(),
                kid: kid.to_owned(),
                well_known: well_known.map(str::to_owned),
            }),
        }
    }

    /// Parses a `Signature-Key` header value.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] unless the value is a dictionary
    /// with exactly one member whose value is a known scheme token, and
    /// [`EvpError::JwkValidation`] / [`EvpError::MissingClaim`] for bad key
    /// material.
    pub fn parse(header: &str) -> Result<Self> {
        let dict = sfv::parse_dictionary(header)?;
        if dict.len() != 1 {
            return Err(EvpError::TokenFormat(format!(
                "Signature-Key must have exactly one member, found {}",
                dict.len()
            )));
        }
        let Some((label, Member::Item(item))) = dict.iter().next() else {
            return Err(EvpError::TokenFormat("Signature-Key member must be a token".into()));
        };
        let scheme = item
            .bare
            .as_token()
            .ok_or_else(|| EvpError::TokenFormat("Signature-Key member must be a token".into()))?;

        let scheme = match scheme {
            "hwk" => KeyScheme::Hwk(parse_hwk(item)?),
            "jwt" => KeyScheme::Jwt(JwtKey::parse(string_param(item, "jwt")?)?),
            "jwks" => KeyScheme::Jwks(JwksReference {
                id: string_param(item, "id")?.to_owned(),
                kid: string_param(item, "kid")?.to_owned(),
                well_known: optional_string_param(item, "well-known")?.map(str::to_owned),
            }),
            other => {
                return Err(EvpError::TokenFormat(format!(
                    "unsupported Signature-Key scheme '{other}'"
                )));
            }
        };
        Ok(Self { label: label.to_owned(), scheme })
    }

    /// Serializes to a `Signature-Key` header value.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] if the label or a value cannot be
    /// represented as a structured field.
    pub fn to_header(&self) -> Result<String> {
        let mut params = Vec::new();
        match &self.scheme {
            KeyScheme::Hwk(jwk) => {
                let json = serde_json::to_value(jwk)?;
                for member in HWK_MEMBERS {
                    if let Some(value) = json.get(member).and_then(serde_json::Value::as_str) {
                        params.push((member.to_owned(), BareItem::String(value.to_owned())));
                    }
                }
            }
            KeyScheme::Jwt(jwt) => {
                params.push(("jwt".to_owned(), BareItem::String(jwt.token.clone())));
            }
            KeyScheme::Jwks(reference) => {
                params.push(("id".to_owned(), BareItem::String(reference.id.clone())));
                params.push(("kid".to_owned(), BareItem::String(reference.kid.clone())));
                if let Some(name) = &reference.well_known {
                    params.push(("well-known".to_owned(), BareItem::String(name.clone())));
                }
            }
        }

        let mut dict = Dictionary::new();
        dict.insert(
            &self.label,
            Member::Item(Item { bare: BareItem::Token(self.scheme.name().to_owned()), params }),
        );
        sfv::serialize_dictionary(&dict)
    }

    /// The key embedded in the header, if the scheme carries one.
    ///
    /// `jwks` references return `None`; they need a fetch.
    #[must_use]
    pub const fn embedded_key(&self) -> Option<&Jwk> {
        match &self.scheme {
            KeyScheme::Hwk(jwk) => Some(jwk),
            KeyScheme::Jwt(jwt) => Some(&jwt.key),
            KeyScheme::Jwks(_) => None,
        }
    }
}

fn string_param<'a>(item: &'a Item, key: &'static str) -> Result<&'a str> {
    optional_string_param(item, key)?.ok_or(EvpError::MissingClaim(key))
}

fn optional_string_param<'a>(item: &'a Item, key: &str) -> Result<Option<&'a str>> {
    match item.param(key) {
        None => Ok(None),
        Some(BareItem::String(value)) if !value.is_empty() => Ok(Some(value)),
        Some(_) => Err(EvpError::TokenFormat(format!("Signature-Key '{key}' must be a string"))),
    }
}

fn parse_hwk(item: &Item) -> Result<Jwk> {
    if let Some(member) = PRIVATE_MEMBERS.iter().find(|m| item.param(m).is_some()) {
        return Err(EvpError::JwkValidation(format!("hwk key carries private member '{member}'")));
    }
    let mut members = serde_json::Map::new();
    for key in HWK_MEMBERS {
        if let Some(value) = optional_string_param(item, key)? {
            members.insert(key.to_owned(), serde_json::Value::String(value.to_owned()));
        }
    }
    if !members.contains_key("kty") {
        return Err(EvpError::MissingClaim("kty"));
    }
    let jwk: Jwk = serde_json::from_value(serde_json::Value::Object(members))?;
    jwk.validate()?;
    Ok(jwk)
}

fn check_public(jwk: &Jwk) -> Result<()> {
    if jwk.is_private() {
        return Err(EvpError::JwkValidation("signature key must be public".into()));
    }
    jwk.validate()?;
    Ok(())
}

/// Keeps only the members `hwk` carries.
fn inline_members(jwk: &Jwk) -> Jwk {
    Jwk {
        kty: jwk.kty.clone(),
        crv: jwk.crv.clone(),
        x: jwk.x.clone(),
        y: jwk.y.clone(),
        n: jwk.n.clone(),
        e: jwk.e.clone(),
        ..Jwk::default()
    }
}
