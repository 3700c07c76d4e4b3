//! HTTP Message Signature generation.

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    crypto::Jwk,
    error::{EvpError, Result},
    httpsig::{
        CONTENT_DIGEST_HEADER, Component, HttpRequest, HttpSignatureAlgorithm,
        SIGNATURE_HEADER, SIGNATURE_INPUT_HEADER, SIGNATURE_KEY_HEADER, SignatureBase,
        SignatureKey, SignatureParams, content_digest, default_components,
        sfv::{self, BareItem, Dictionary, Item, Member},
    },
    validation::now_epoch_secs,
};

/// Label used when none is configured.
pub const DEFAULT_LABEL: &str = "sig1";

/// Options for a single signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpSignOptions {
    /// Components to cover; [`default_components`] when `None`.
    pub components: Option<Vec<Component>>,
    /// `created` timestamp; the current time when `None`.
    pub created: Option<u64>,
    /// `expires` timestamp; omitted when `None`.
    pub expires: Option<u64>,
    /// `nonce` parameter.
    pub nonce: Option<String>,
    /// Adds the `alg` parameter.
    pub include_alg: bool,
}

impl HttpSignOptions {
    /// Adds a random UUID v4 nonce.
    #[must_use]
    pub fn with_random_nonce(mut self) -> Self {
        self.nonce = Some(Uuid::new_v4().to_string());
        self
    }
}

/// Header values produced by [`HttpSigner::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// `Signature-Key` header value.
    pub signature_key: String,
    /// `Signature-Input` header value.
    pub signature_input: String,
    /// `Signature` header value.
    pub signature: String,
    /// `Content-Digest` header value, present when the request has a body.
    pub content_digest: Option<String>,
}

impl SignedHeaders {
    /// Sets the headers on `request`, replacing existing ones.
    pub fn apply(&self, request: &mut HttpRequest) {
        if let Some(digest) = &self.content_digest {
            request.set_header(CONTENT_DIGEST_HEADER, digest);
        }
        request.set_header(SIGNATURE_KEY_HEADER, &self.signature_key);
        request.set_header(SIGNATURE_INPUT_HEADER, &self.signature_input);
        request.set_header(SIGNATURE_HEADER, &self.signature);
    }
}

/// Signs HTTP requests with one key and one `Signature-Key` scheme.
///
/// # Examples
///
/// ```
/// use ed25519_dalek::SigningKey;
/// use email_verification::{
///     crypto::Jwk,
///     httpsig::{HttpRequest, HttpSignOptions, HttpSigner},
/// };
///
/// let key = Jwk::from_signing_key(&SigningKey::from_bytes(&[9u8; 32]));
/// let signer = HttpSigner::hwk(key).unwrap();
///
/// let mut request = HttpRequest::new("POST", "issuer.example", "/issue")
///     .with_header("Content-Type", "application/json")
///     .with_body(br#"{"email":"user@example.com"}"#.to_vec());
/// signer.sign_request(&mut request, &HttpSignOptions::default()).unwrap();
///
/// assert!(request.header("signature").unwrap().starts_with("sig1=:"));
/// assert!(request.header("content-digest").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct HttpSigner {
    key: Jwk,
    signature_key: SignatureKey,
    algorithm: HttpSignatureAlgorithm,
}

impl HttpSigner {
    /// Signer whose public key travels inline (`hwk`).
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if `private_key` is not a usable
    /// private key.
    pub fn hwk(private_key: Jwk) -> Result<Self> {
        let signature_key = SignatureKey::hwk(DEFAULT_LABEL, &private_key)?;
        Self::new(private_key, signature_key)
    }

    /// Signer presenting `token`, whose `cnf.jwk` must be the public half of
    /// `private_key` (`jwt`).
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the token is not bound to
    /// `private_key`.
    pub fn jwt(private_key: Jwk, token: &str) -> Result<Self> {
        let signature_key = SignatureKey::jwt(DEFAULT_LABEL, token)?;
        if signature_key.embedded_key().map(Jwk::thumbprint).transpose()?
            != Some(private_key.thumbprint()?)
        {
            return Err(EvpError::JwkValidation("token cnf.jwk does not match signing key".into()));
        }
        Self::new(private_key, signature_key)
    }

    /// Signer referencing a published key set (`jwks`).
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if `private_key` is not a usable
    /// private key.
    pub fn jwks(private_key: Jwk, id: &str, kid: &str, well_known: Option<&str>) -> Result<Self> {
        let signature_key = SignatureKey::jwks(DEFAULT_LABEL, id, kid, well_known);
        Self::new(private_key, signature_key)
    }

    fn new(key: Jwk, signature_key: SignatureKey) -> Result<Self> {
        if !key.is_private() {
            return Err(EvpError::JwkValidation("HTTP signing key must be private".into()));
        }
        key.validate()?;
        let algorithm = HttpSignatureAlgorithm::for_key(&key)?;
        Ok(Self { key, signature_key, algorithm })
    }

    /// Uses `label` instead of `sig1`.
    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        label.clone_into(&mut self.signature_key.label);
        self
    }

    /// The algorithm derived from the key.
    #[must_use]
    pub const fn algorithm(&self) -> HttpSignatureAlgorithm {
        self.algorithm
    }

    /// Signs `request` and returns the headers to attach.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] if a covered component is missing
    /// from the request, or [`EvpError::JwkValidation`] if signing fails.
    #[instrument(
        skip(self, request, options),
        fields(
            method = %request.method,
            authority = %request.authority,
            path = %request.path,
            body_len = request.body.len(),
            scheme = self.signature_key.scheme.name(),
        )
    )]
    pub fn sign(&self, request: &HttpRequest, options: &HttpSignOptions) -> Result<SignedHeaders> {
        let mut signed = request.clone();

        let content_digest = signed.has_body().then(|| content_digest(&signed.body));
        if let Some(digest) = &content_digest {
            signed.set_header(CONTENT_DIGEST_HEADER, digest);
        }
        let signature_key = self.signature_key.to_header()?;
        signed.set_header(SIGNATURE_KEY_HEADER, &signature_key);

        let components =
            options.components.clone().unwrap_or_else(|| default_components(&signed));
        let created = match options.created {
            Some(created) => created,
            None => now_epoch_secs()?,
        };
        let mut params = SignatureParams::new(components, created);
        if let Some(expires) = options.expires {
            params = params.with_expires(expires);
        }
        if let Some(nonce) = &options.nonce {
            params = params.with_nonce(nonce);
        }
        if options.include_alg {
            params = params.with_alg(self.algorithm.as_str());
        }

        let base = SignatureBase::build(&signed, &params)?;
        let signature = self.algorithm.sign(&self.key, base.as_bytes())?;

        let label = &self.signature_key.label;
        let signature_input = signature_input_header(label, &params)?;
        let mut dict = Dictionary::new();
        dict.insert(label, Member::Item(Item::new(BareItem::ByteSeq(signature))));
        let signature = sfv::serialize_dictionary(&dict)?;

        debug!(label, created, algorithm = %self.algorithm, "request signed");
        Ok(SignedHeaders { signature_key, signature_input, signature, content_digest })
    }

    /// Signs `request` and attaches the headers to it.
    ///
    /// # Errors
    ///
    /// See [`sign`](Self::sign).
    pub fn sign_request(&self, request: &mut HttpRequest, options: &HttpSignOptions) -> Result<()> {
        self.sign(request, options)?.apply(request);
        Ok(())
    }
}

/// Serializes a `Signature-Input` member from parts, for callers building
/// headers by hand.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] if the label is not a valid key.
pub fn signature_input_header(label: &str, params: &SignatureParams) -> Result<String> {
    let mut dict = Dictionary::new();
    dict.insert(label, Member::InnerList(params.to_inner_list()));
    sfv::serialize_dictionary(&dict)
}
