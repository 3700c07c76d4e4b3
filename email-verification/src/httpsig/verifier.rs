//! HTTP Message Signature verification.
//!
//! Verification never fails with an error: every outcome is a
//! [`SignatureVerification`], because rejecting a bad or absent signature
//! is an expected result on the request path.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use lru::LruCache;
use tracing::{debug, instrument, warn};

use crate::{
    crypto::Jwk,
    error::{EvpError, Result},
    httpsig::{
        CONTENT_DIGEST_HEADER, Component, HttpRequest, HttpSignatureAlgorithm, KeyScheme,
        SIGNATURE_HEADER, SIGNATURE_INPUT_HEADER, SIGNATURE_KEY_HEADER, SignatureBase,
        SignatureKey, SignatureParams,
        sfv::{self, Member},
        verify_content_digest,
    },
    keys::JwksFetcher,
    validation::now_epoch_secs,
};

/// Default tolerance between `created` and the verifier's clock.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Default number of nonces remembered by the replay guard.
pub const DEFAULT_REPLAY_CACHE_CAPACITY: usize = 10_000;

/// Verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Require `signature-key` among the covered components.
    pub strict_aauth: bool,
    /// Accepted distance between `created` and now, in either direction.
    pub max_clock_skew: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { strict_aauth: true, max_clock_skew: DEFAULT_MAX_CLOCK_SKEW }
    }
}

/// A signature that verified.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSignature {
    /// Signature label.
    pub label: String,
    /// Key scheme as received; for `jwt` it carries the unvalidated claims.
    pub scheme: KeyScheme,
    /// Public key that verified the signature.
    pub key: Jwk,
    /// Algorithm derived from the key.
    pub algorithm: HttpSignatureAlgorithm,
    /// Covered components in signed order.
    pub components: Vec<Component>,
    /// `created` parameter.
    pub created: u64,
    /// `nonce` parameter, if any.
    pub nonce: Option<String>,
}

/// Outcome of [`HttpSignatureVerifier::verify`].
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureVerification {
    /// Every check passed.
    Verified(VerifiedSignature),
    /// A check failed.
    Rejected {
        /// Human-readable reason, safe to log but not to return to clients.
        error: String,
    },
}

impl SignatureVerification {
    /// Returns `true` for [`Verified`](Self::Verified).
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Verified(_) => None,
            Self::Rejected { error } => Some(error),
        }
    }

    /// The verified signature, if verified.
    #[must_use]
    pub const fn verified(&self) -> Option<&VerifiedSignature> {
        match self {
            Self::Verified(verified) => Some(verified),
            Self::Rejected { .. } => None,
        }
    }

    /// Converts into a `Result`, rejections becoming
    /// [`EvpError::InvalidSignature`].
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::InvalidSignature`] if the signature was rejected.
    pub fn into_result(self) -> Result<VerifiedSignature> {
        match self {
            Self::Verified(verified) => Ok(verified),
            Self::Rejected { error } => Err(EvpError::InvalidSignature(error)),
        }
    }
}

/// Verifies RFC 9421 signatures carrying a `Signature-Key` header.
///
/// Checks run in a fixed order and stop at the first failure:
///
/// 1. parse `Signature-Key`
/// 2. find its label in `Signature-Input` and `Signature`
/// 3. with `strict_aauth`, require `signature-key` to be covered
/// 4. rebuild the signature base from the request, checking
///    `content-digest` against the body
/// 5. check `created` against the clock skew window and reject a passed
///    `expires`
/// 6. resolve the key and verify the signature bytes
///
/// With a replay cache, a `nonce` seen before is rejected after the
/// signature verifies.
///
/// # Examples
///
/// ```
/// use ed25519_dalek::SigningKey;
/// use email_verification::{
///     crypto::Jwk,
///     httpsig::{HttpRequest, HttpSignOptions, HttpSignatureVerifier, HttpSigner, VerifyOptions},
/// };
///
/// # async fn example() {
/// let signer = HttpSigner::hwk(Jwk::from_signing_key(&SigningKey::from_bytes(&[3u8; 32]))).unwrap();
/// let mut request = HttpRequest::new("GET", "issuer.example", "/");
/// signer.sign_request(&mut request, &HttpSignOptions::default()).unwrap();
///
/// let result = HttpSignatureVerifier::new().verify(&request, &VerifyOptions::default()).await;
/// assert!(result.is_verified());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpSignatureVerifier {
    fetcher: Option<Arc<JwksFetcher>>,
    nonce_cache: Option<Arc<Mutex<LruCache<String, u64>>>>,
}

impl HttpSignatureVerifier {
    /// Creates a verifier without JWKS support or replay guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the `jwks` scheme through `fetcher`.
    #[must_use]
    pub fn with_jwks_fetcher(mut self, fetcher: Arc<JwksFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Remembers up to `capacity` nonces and rejects repeats.
    #[must_use]
    pub fn with_replay_cache(mut self, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        self.nonce_cache = Some(Arc::new(Mutex::new(LruCache::new(capacity))));
        self
    }

    /// Verifies the signature on `request`.
    #[instrument(
        skip(self, request, options),
        fields(
            method = %request.method,
            authority = %request.authority,
            path = %request.path,
            strict_aauth = options.strict_aauth,
        )
    )]
    pub async fn verify(
        &self,
        request: &HttpRequest,
        options: &VerifyOptions,
    ) -> SignatureVerification {
        match self.try_verify(request, options).await {
            Ok(verified) => {
                debug!(label = %verified.label, scheme = verified.scheme.name(), "signature verified");
                SignatureVerification::Verified(verified)
            }
            Err(e) => {
                warn!(error = %e, "signature rejected");
                SignatureVerification::Rejected { error: e.to_string() }
            }
        }
    }

    async fn try_verify(
        &self,
        request: &HttpRequest,
        options: &VerifyOptions,
    ) -> Result<VerifiedSignature> {
        // 1. Signature-Key
        let signature_key = SignatureKey::parse(&required_header(request, SIGNATURE_KEY_HEADER)?)?;
        let label = signature_key.label.as_str();

        // 2. Label present in all three headers
        let inputs = sfv::parse_dictionary(&required_header(request, SIGNATURE_INPUT_HEADER)?)?;
        let signatures = sfv::parse_dictionary(&required_header(request, SIGNATURE_HEADER)?)?;
        let params = match inputs.get(label) {
            Some(Member::InnerList(list)) => SignatureParams::from_inner_list(list)?,
            Some(Member::Item(_)) => {
                return Err(EvpError::TokenFormat(format!(
                    "Signature-Input '{label}' must be an inner list"
                )));
            }
            None => {
                return Err(EvpError::InvalidSignature(format!(
                    "label '{label}' missing from Signature-Input"
                )));
            }
        };
        let signature = match signatures.get(label) {
            Some(Member::Item(item)) => item.bare.as_bytes().ok_or_else(|| {
                EvpError::TokenFormat(format!("Signature '{label}' must be a byte sequence"))
            })?,
            Some(Member::InnerList(_)) => {
                return Err(EvpError::TokenFormat(format!(
                    "Signature '{label}' must be a byte sequence"
                )));
            }
            None => {
                return Err(EvpError::InvalidSignature(format!(
                    "label '{label}' missing from Signature"
                )));
            }
        };

        // 3. The key header must itself be signed
        if options.strict_aauth && !params.covers(&Component::header(SIGNATURE_KEY_HEADER)) {
            return Err(EvpError::InvalidSignature(
                "signature-key is not a covered component".into(),
            ));
        }

        // 4. Signature base over the actual request
        check_content_digest(request, &params)?;
        let base = SignatureBase::build(request, &params)?;

        // 5. Clock skew
        let now = now_epoch_secs()?;
        check_created(params.created(), now, options.max_clock_skew)?;
        if let Some(expires) = params.expires() {
            if now > expires {
                return Err(EvpError::TimeValidation(format!("signature expired at {expires}")));
            }
        }

        // 6. Key and signature bytes
        let key = self.resolve_key(&signature_key).await?;
        let algorithm = HttpSignatureAlgorithm::for_key(&key)?;
        if let Some(alg) = params.alg() {
            if alg != algorithm.as_str() {
                return Err(EvpError::InvalidSignature(format!(
                    "alg '{alg}' does not match {} key",
                    key.kty
                )));
            }
        }
        algorithm.verify(&key, base.as_bytes(), signature)?;

        if let Some(nonce) = params.nonce() {
            self.check_replay(nonce, params.created())?;
        }

        Ok(VerifiedSignature {
            label: signature_key.label.clone(),
            key,
            algorithm,
            components: params.components().to_vec(),
            created: params.created(),
            nonce: params.nonce().map(str::to_owned),
            scheme: signature_key.scheme,
        })
    }

    async fn resolve_key(&self, signature_key: &SignatureKey) -> Result<Jwk> {
        match &signature_key.scheme {
            KeyScheme::Hwk(jwk) => Ok(jwk.clone()),
            KeyScheme::Jwt(jwt) => Ok(jwt.key.clone()),
            KeyScheme::Jwks(reference) => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    EvpError::JwksFetch("jwks scheme used but no JWKS fetcher is configured".into())
                })?;
                let key = fetcher
                    .resolve_jwks_key(&reference.id, &reference.kid, reference.well_known.as_deref())
                    .await?;
                Ok(key.to_public())
            }
        }
    }

    fn check_replay(&self, nonce: &str, created: u64) -> Result<()> {
        let Some(cache) = &self.nonce_cache else {
            return Ok(());
        };
        // A poisoned cache still holds valid nonces
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.contains(nonce) {
            warn!(nonce, "replayed signature nonce");
            return Err(EvpError::InvalidSignature(format!("nonce '{nonce}' already used")));
        }
        cache.put(nonce.to_owned(), created);
        Ok(())
    }
}

fn required_header(request: &HttpRequest, name: &str) -> Result<String> {
    request
        .header(name)
        .ok_or_else(|| EvpError::InvalidSignature(format!("missing {name} header")))
}

/// A non-empty body must be covered by a matching `content-digest`; a
/// covered digest is always checked.
fn check_content_digest(request: &HttpRequest, params: &SignatureParams) -> Result<()> {
    let covered = params.covers(&Component::header(CONTENT_DIGEST_HEADER));
    if !covered {
        if request.has_body() {
            return Err(EvpError::InvalidSignature(
                "request has a body but content-digest is not covered".into(),
            ));
        }
        return Ok(());
    }
    let digest = required_header(request, CONTENT_DIGEST_HEADER)?;
    verify_content_digest(&digest, &request.body)
}

fn check_created(created: u64, now: u64, max_skew: Duration) -> Result<()> {
    let skew = max_skew.as_secs();
    if created > now.saturating_add(skew) {
        return Err(EvpError::TimeValidation(format!(
            "signature created {}s in the future",
            created - now
        )));
    }
    if created < now.saturating_sub(skew) {
        return Err(EvpError::TimeValidation(format!(
            "signature created {}s ago",
            now - created
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::httpsig::{HttpSignOptions, HttpSigner, SignedHeaders};

    fn signer() -> HttpSigner {
        HttpSigner::hwk(Jwk::from_signing_key(&SigningKey::from_bytes(&[21u8; 32]))).unwrap()
    }

    fn post() -> HttpRequest {
        HttpRequest::new("POST", "issuer.example", "/issue")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"email":"user@example.com"}"#.to_vec())
    }

    fn signed(mut request: HttpRequest, options: &HttpSignOptions) -> HttpRequest {
        signer().sign_request(&mut request, options).unwrap();
        request
    }

    async fn verify(request: &HttpRequest) -> SignatureVerification {
        HttpSignatureVerifier::new().verify(request, &VerifyOptions::default()).await
    }

    #[tokio::test]
    async fn test_verifies_signed_post() {
        let request = signed(post(), &HttpSignOptions::default());
        let result = verify(&request).await;
        let verified = result.verified().expect("should verify");
        assert_eq!(verified.label, "sig1");
        assert_eq!(verified.algorithm, HttpSignatureAlgorithm::Ed25519);
        assert_eq!(verified.components.len(), 6);
        assert!(result.error().is_none());
    }

    #[tokio::test]
    async fn test_body_tamper_rejected() {
        let mut request = signed(post(), &HttpSignOptions::default());
        request.body = br#"{"email":"attacker@example.com"}"#.to_vec();
        let result = verify(&request).await;
        assert!(!result.is_verified());
        assert!(result.error().unwrap().contains("content-digest"));
    }

    #[tokio::test]
    async fn test_method_and_path_tamper_rejected() {
        let request = signed(post(), &HttpSignOptions::default());

        let mut wrong_path = request.clone();
        wrong_path.path = "/admin".into();
        assert!(!verify(&wrong_path).await.is_verified());

        let mut wrong_method = request.clone();
        wrong_method.method = "PUT".into();
        assert!(!verify(&wrong_method).await.is_verified());

        let mut wrong_authority = request;
        wrong_authority.authority = "evil.example".into();
        assert!(!verify(&wrong_authority).await.is_verified());
    }

    #[tokio::test]
    async fn test_missing_headers_rejected() {
        let request = signed(HttpRequest::new("GET", "a.example", "/"), &HttpSignOptions::default());
        for header in [SIGNATURE_KEY_HEADER, SIGNATURE_INPUT_HEADER, SIGNATURE_HEADER] {
            let mut stripped = HttpRequest::new("GET", "a.example", "/");
            for (name, value) in request.headers() {
                if !name.eq_ignore_ascii_case(header) {
                    stripped = stripped.with_header(name, value);
                }
            }
            let result = verify(&stripped).await;
            assert!(result.error().unwrap().contains(header), "{header}");
        }
    }

    #[tokio::test]
    async fn test_label_mismatch_rejected() {
        let mut request =
            signed(HttpRequest::new("GET", "a.example", "/"), &HttpSignOptions::default());
        let signature = request.header(SIGNATURE_HEADER).unwrap().replacen("sig1=", "sig2=", 1);
        request.set_header(SIGNATURE_HEADER, &signature);

        let result = verify(&request).await;
        assert!(result.error().unwrap().contains("missing from Signature"));
    }

    #[tokio::test]
    async fn test_strict_aauth_requires_signature_key_coverage() {
        let options = HttpSignOptions {
            components: Some(vec![Component::Method, Component::Authority, Component::Path]),
            ..Default::default()
        };
        let request = signed(HttpRequest::new("GET", "a.example", "/"), &options);

        let strict = verify(&request).await;
        assert!(strict.error().unwrap().contains("signature-key"));

        let lenient = HttpSignatureVerifier::new()
            .verify(&request, &VerifyOptions { strict_aauth: false, ..Default::default() })
            .await;
        assert!(lenient.is_verified());
    }

    #[tokio::test]
    async fn test_uncovered_body_rejected_even_when_lenient() {
        let options = HttpSignOptions {
            components: Some(vec![Component::Method, Component::header(SIGNATURE_KEY_HEADER)]),
            ..Default::default()
        };
        let request = signed(post(), &options);
        let result = verify(&request).await;
        assert!(result.error().unwrap().contains("content-digest is not covered"));
    }

    #[tokio::test]
    async fn test_clock_skew() {
        let now = now_epoch_secs().unwrap();
        let stale =
            signed(post(), &HttpSignOptions { created: Some(now - 120), ..Default::default() });
        assert!(verify(&stale).await.error().unwrap().contains("ago"));

        let future =
            signed(post(), &HttpSignOptions { created: Some(now + 120), ..Default::default() });
        assert!(verify(&future).await.error().unwrap().contains("future"));

        let recent =
            signed(post(), &HttpSignOptions { created: Some(now - 30), ..Default::default() });
        assert!(verify(&recent).await.is_verified());
    }

    #[tokio::test]
    async fn test_expires_enforced() {
        let now = now_epoch_secs().unwrap();
        let lapsed = signed(
            post(),
            &HttpSignOptions { created: Some(now - 10), expires: Some(now - 5), ..Default::default() },
        );
        let result = verify(&lapsed).await;
        assert!(result.error().unwrap().contains("expired"), "{:?}", result.error());

        let live = signed(
            post(),
            &HttpSignOptions { created: Some(now), expires: Some(now + 60), ..Default::default() },
        );
        assert!(live.header(SIGNATURE_INPUT_HEADER).unwrap().contains(";expires="));
        assert!(verify(&live).await.is_verified());

        let mut mistyped = live;
        let input = mistyped
            .header(SIGNATURE_INPUT_HEADER)
            .unwrap()
            .replace(";expires=", ";expires=\"never\";x=");
        mistyped.set_header(SIGNATURE_INPUT_HEADER, &input);
        assert!(verify(&mistyped).await.error().unwrap().contains("expires must be"));
    }

    #[test]
    fn test_check_created_bounds() {
        let skew = Duration::from_secs(60);
        assert!(check_created(940, 1000, skew).is_ok());
        assert!(check_created(1060, 1000, skew).is_ok());
        assert!(check_created(939, 1000, skew).is_err());
        assert!(check_created(1061, 1000, skew).is_err());
    }

    #[tokio::test]
    async fn test_swapped_signature_key_rejected() {
        let request = signed(post(), &HttpSignOptions::default());
        let other = HttpSigner::hwk(Jwk::from_signing_key(&SigningKey::from_bytes(&[22u8; 32])))
            .unwrap()
            .sign(&post(), &HttpSignOptions::default())
            .unwrap();

        let mut forged = request;
        forged.set_header(SIGNATURE_KEY_HEADER, &other.signature_key);
        assert!(!verify(&forged).await.is_verified());
    }

    #[tokio::test]
    async fn test_alg_parameter_must_match_key() {
        let request = signed(post(), &HttpSignOptions { include_alg: true, ..Default::default() });
        assert!(verify(&request).await.is_verified());

        let mut lying = request;
        let input = lying.header(SIGNATURE_INPUT_HEADER).unwrap().replace("ed25519", "rsa-pss-sha256");
        lying.set_header(SIGNATURE_INPUT_HEADER, &input);
        assert!(!verify(&lying).await.is_verified());
    }

    #[tokio::test]
    async fn test_replay_cache_rejects_repeated_nonce() {
        let verifier = HttpSignatureVerifier::new().with_replay_cache(16);
        let request = signed(post(), &HttpSignOptions::default().with_random_nonce());

        assert!(verifier.verify(&request, &VerifyOptions::default()).await.is_verified());
        let replay = verifier.verify(&request, &VerifyOptions::default()).await;
        assert!(replay.error().unwrap().contains("already used"));

        // Without a cache the same request verifies again
        assert!(verify(&request).await.is_verified());
        assert!(verify(&request).await.is_verified());
    }

    #[tokio::test]
    async fn test_jwks_without_fetcher_rejected() {
        let key = Jwk::from_signing_key(&SigningKey::from_bytes(&[23u8; 32]));
        let signer = HttpSigner::jwks(key, "https://agent.example/jwks.json", "k1", None).unwrap();
        let mut request = HttpRequest::new("GET", "a.example", "/");
        signer.sign_request(&mut request, &HttpSignOptions::default()).unwrap();

        let result = verify(&request).await;
        assert!(result.error().unwrap().contains("no JWKS fetcher"));
    }

    #[tokio::test]
    async fn test_into_result() {
        let headers: SignedHeaders =
            signer().sign(&HttpRequest::new("GET", "a.example", "/"), &HttpSignOptions::default()).unwrap();
        let mut request = HttpRequest::new("GET", "a.example", "/");
        headers.apply(&mut request);
        assert!(verify(&request).await.into_result().is_ok());

        request.path = "/other".into();
        assert!(matches!(
            verify(&request).await.into_result(),
            Err(EvpError::InvalidSignature(_))
        ));
    }
}
