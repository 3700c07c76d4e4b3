//! Issuance request handling on the issuer side.
//!
//! The browser POSTs `{email, disposable?, directed_email?}` to the
//! issuance endpoint, signed with its HTTP Message Signature key. The
//! issuer checks the fetch metadata headers, the signature and the body,
//! asks its [`AccountSession`] which address it may attest, and returns an
//! IssuanceToken bound to the key that signed the request.
//!
//! Failures become an [`ErrorResponse`] with one of four stable codes and
//! a fixed description. Internal error text is logged, never returned.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    crypto::Jwk,
    error::{EvpError, Result},
    httpsig::{HttpRequest, HttpSignatureVerifier, VerifyOptions},
    token::{IssuanceTokenPayload, SignOptions, generate_issuance_token},
    validation::validate_email,
};

/// Required value of the `Sec-Fetch-Dest` header.
pub const SEC_FETCH_DEST: &str = "email-verification";

/// Required media type of the request body.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Body of an issuance request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuanceRequestBody {
    /// Address the browser wants attested.
    pub email: String,
    /// Asks for a disposable (single-use) address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposable: Option<bool>,
    /// A previously issued directed address to reuse. Interpreted by the
    /// issuer's [`AccountSession`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directed_email: Option<String>,
}

/// Successful issuance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuanceResponse {
    /// The minted IssuanceToken.
    pub issuance_token: String,
}

/// Stable protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The HTTP signature or a token signature did not verify.
    InvalidSignature,
    /// The user has no session with the issuer.
    AuthenticationRequired,
    /// A disposable address was requested but is not offered.
    DisposableNotSupported,
    /// Anything else wrong with the request.
    InvalidRequest,
}

impl ErrorCode {
    /// Wire value of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid_signature",
            Self::AuthenticationRequired => "authentication_required",
            Self::DisposableNotSupported => "disposable_not_supported",
            Self::InvalidRequest => "invalid_request",
        }
    }

    /// Fixed description returned to clients.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InvalidSignature => "The request signature could not be verified.",
            Self::AuthenticationRequired => "The user must sign in to the issuer first.",
            Self::DisposableNotSupported => "This issuer does not provide disposable addresses.",
            Self::InvalidRequest => "The request is malformed or missing required fields.",
        }
    }

    /// HTTP status to answer with.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::InvalidSignature | Self::AuthenticationRequired => 401,
            Self::DisposableNotSupported | Self::InvalidRequest => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable error body: `{"error": ..., "error_description": ...}`.
///
/// # Examples
///
/// ```
/// use email_verification::{
///     error::EvpError,
///     issuer::{ErrorCode, ErrorResponse},
/// };
///
/// let response = ErrorResponse::from(&EvpError::InvalidSignature("sd_hash mismatch".into()));
/// assert_eq!(response.error, ErrorCode::InvalidSignature);
/// assert!(!response.error_description.contains("sd_hash"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Error code.
    pub error: ErrorCode,
    /// Human-readable description, never internal details.
    pub error_description: String,
}

impl ErrorResponse {
    /// Response for `code` with its fixed description.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self { error: code, error_description: code.description().to_owned() }
    }

    /// HTTP status to answer with.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.error.status()
    }
}

impl From<ErrorCode> for ErrorResponse {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl From<&EvpError> for ErrorResponse {
    fn from(error: &EvpError) -> Self {
        let code = match error {
            EvpError::InvalidSignature(_) | EvpError::JwkValidation(_) => ErrorCode::InvalidSignature,
            EvpError::MissingClaim(_)
            | EvpError::InvalidClaim(_)
            | EvpError::TimeValidation(_)
            | EvpError::TokenFormat(_)
            | EvpError::EmailValidation(_)
            | EvpError::Discovery(_)
            | EvpError::JwksFetch(_)
            | EvpError::Config(_) => ErrorCode::InvalidRequest,
        };
        Self::new(code)
    }
}

/// What the issuer is willing to attest for the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    /// Address to put in the token.
    pub email: String,
    /// Whether the address is a private (directed) one.
    pub is_private_email: bool,
}

impl Attestation {
    /// Attests the user's own address.
    #[must_use]
    pub fn email(email: &str) -> Self {
        Self { email: email.to_owned(), is_private_email: false }
    }

    /// Attests a private address.
    #[must_use]
    pub fn private_email(email: &str) -> Self {
        Self { email: email.to_owned(), is_private_email: true }
    }
}

/// The issuer's view of the signed-in user.
///
/// Decides which address, if any, may be attested for a request. This is
/// where `directed_email` reuse rules live.
pub trait AccountSession: Send + Sync {
    /// Returns the address to attest, or `None` if nobody is signed in or
    /// the user does not own the requested address.
    fn attest(
        &self,
        request: &IssuanceRequestBody,
    ) -> impl Future<Output = Option<Attestation>> + Send;
}

/// Session that owns a fixed set of addresses. Useful for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    emails: Vec<String>,
}

impl StaticSession {
    /// Signed-in user owning `emails`.
    #[must_use]
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { emails: emails.into_iter().map(Into::into).collect() }
    }

    /// No signed-in user.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl AccountSession for StaticSession {
    async fn attest(&self, request: &IssuanceRequestBody) -> Option<Attestation> {
        self.emails
            .iter()
            .find(|owned| owned.eq_ignore_ascii_case(&request.email))
            .map(|owned| Attestation::email(owned))
    }
}

/// Issuance endpoint logic.
///
/// # Examples
///
/// ```
/// use ed25519_dalek::SigningKey;
/// use email_verification::{
///     crypto::Jwk,
///     httpsig::{HttpRequest, HttpSignOptions, HttpSigner},
///     issuer::{Issuer, StaticSession},
/// };
///
/// # async fn example() -> email_verification::error::Result<()> {
/// let issuer_key = Jwk::from_signing_key(&SigningKey::from_bytes(&[1u8; 32]));
/// let issuer = Issuer::new("issuer.example", issuer_key)?;
///
/// let browser = HttpSigner::hwk(Jwk::from_signing_key(&SigningKey::from_bytes(&[2u8; 32])))?;
/// let mut request = HttpRequest::new("POST", "issuer.example", "/issue")
///     .with_header("Sec-Fetch-Dest", "email-verification")
///     .with_header("Content-Type", "application/json")
///     .with_body(br#"{"email":"user@issuer.example"}"#.to_vec());
/// browser.sign_request(&mut request, &HttpSignOptions::default())?;
///
/// let session = StaticSession::new(["user@issuer.example"]);
/// let response = issuer.issue(&request, &session).await;
/// assert!(response.is_ok());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Issuer {
    issuer: String,
    signing_key: Jwk,
    sign_options: SignOptions,
    verifier: HttpSignatureVerifier,
    verify_options: VerifyOptions,
    disposable_supported: bool,
}

impl Issuer {
    /// Creates an issuer for domain `issuer` signing with `signing_key`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::JwkValidation`] if the key lacks `kty`, `alg`,
    /// `kid` or private material, and [`EvpError::MissingClaim`] for an
    /// empty issuer.
    pub fn new(issuer: &str, signing_key: Jwk) -> Result<Self> {
        if issuer.is_empty() {
            return Err(EvpError::MissingClaim("iss"));
        }
        signing_key.validate_signing_key()?;
        Ok(Self {
            issuer: issuer.to_owned(),
            signing_key,
            sign_options: SignOptions::default(),
            verifier: HttpSignatureVerifier::new(),
            verify_options: VerifyOptions::default(),
            disposable_supported: false,
        })
    }

    /// Uses `verifier` and `options` for request signatures.
    #[must_use]
    pub fn with_verifier(mut self, verifier: HttpSignatureVerifier, options: VerifyOptions) -> Self {
        self.verifier = verifier;
        self.verify_options = options;
        self
    }

    /// Signs tokens with these options instead of the key's `alg`.
    #[must_use]
    pub const fn with_sign_options(mut self, options: SignOptions) -> Self {
        self.sign_options = options;
        self
    }

    /// Accepts `disposable: true` requests.
    #[must_use]
    pub const fn with_disposable_support(mut self) -> Self {
        self.disposable_supported = true;
        self
    }

    /// Issuer domain, the `iss` of minted tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Handles one issuance request.
    ///
    /// # Errors
    ///
    /// - `invalid_request`: wrong `Sec-Fetch-Dest` or `Content-Type`,
    ///   malformed body, invalid email
    /// - `invalid_signature`: the HTTP signature did not verify
    /// - `disposable_not_supported`: `disposable: true` without support
    /// - `authentication_required`: the session attests nothing
    #[instrument(skip(self, request, session), fields(iss = %self.issuer, path = %request.path))]
    pub async fn issue<S: AccountSession>(
        &self,
        request: &HttpRequest,
        session: &S,
    ) -> std::result::Result<IssuanceResponse, ErrorResponse> {
        check_fetch_headers(request)?;

        let verified = self
            .verifier
            .verify(request, &self.verify_options)
            .await
            .into_result()
            .map_err(|e| reject(&e))?;

        let body: IssuanceRequestBody = serde_json::from_slice(&request.body).map_err(|e| {
            warn!(error = %e, "malformed issuance request body");
            ErrorResponse::new(ErrorCode::InvalidRequest)
        })?;
        validate_email(&body.email).map_err(|e| reject(&e))?;
        if let Some(directed) = &body.directed_email {
            validate_email(directed).map_err(|e| reject(&e))?;
        }

        if body.disposable == Some(true) && !self.disposable_supported {
            warn!("disposable address requested");
            return Err(ErrorResponse::new(ErrorCode::DisposableNotSupported));
        }

        let Some(attestation) = session.attest(&body).await else {
            warn!("no session for issuance request");
            return Err(ErrorResponse::new(ErrorCode::AuthenticationRequired));
        };

        let issuance_token = self.mint(&attestation, &verified.key).map_err(|e| reject(&e))?;
        debug!(private = attestation.is_private_email, "issuance token minted");
        Ok(IssuanceResponse { issuance_token })
    }

    fn mint(&self, attestation: &Attestation, browser_key: &Jwk) -> Result<String> {
        let mut payload =
            IssuanceTokenPayload::new(&self.issuer, &attestation.email, browser_key.to_public());
        if attestation.is_private_email {
            payload.is_private_email = Some(true);
        }
        generate_issuance_token(&payload, &self.signing_key, &self.sign_options)
    }
}

fn reject(error: &EvpError) -> ErrorResponse {
    warn!(error = %error, "issuance request rejected");
    ErrorResponse::from(error)
}

fn check_fetch_headers(request: &HttpRequest) -> std::result::Result<(), ErrorResponse> {
    let dest_ok = request
        .header("sec-fetch-dest")
        .is_some_and(|dest| dest.eq_ignore_ascii_case(SEC_FETCH_DEST));
    let media_type = request.header("content-type").unwrap_or_default();
    let media_type = media_type.split(';').next().unwrap_or_default().trim();

    if !dest_ok {
        warn!("missing or wrong Sec-Fetch-Dest");
        return Err(ErrorResponse::new(ErrorCode::InvalidRequest));
    }
    if !media_type.eq_ignore_ascii_case(CONTENT_TYPE_JSON) {
        warn!(media_type, "issuance request is not JSON");
        return Err(ErrorResponse::new(ErrorCode::InvalidRequest));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::{
        httpsig::{HttpSignOptions, HttpSigner},
        keys::StaticKeyResolver,
        token::verify_issuance_token,
    };

    fn issuer_key() -> Jwk {
        Jwk::from_signing_key(&SigningKey::from_bytes(&[31u8; 32]))
    }

    fn browser_key() -> Jwk {
        Jwk::from_signing_key(&SigningKey::from_bytes(&[32u8; 32]))
    }

    fn issuance_request(body: &str) -> HttpRequest {
        let mut request = HttpRequest::new("POST", "issuer.example", "/issue")
            .with_header("Sec-Fetch-Dest", "email-verification")
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(body.as_bytes().to_vec());
        HttpSigner::hwk(browser_key())
            .unwrap()
            .sign_request(&mut request, &HttpSignOptions::default())
            .unwrap();
        request
    }

    fn issuer() -> Issuer {
        Issuer::new("issuer.example", issuer_key()).unwrap()
    }

    #[tokio::test]
    async fn test_issue_binds_http_signing_key() {
        let request = issuance_request(r#"{"email":"user@issuer.example"}"#);
        let session = StaticSession::new(["user@issuer.example"]);

        let response = issuer().issue(&request, &session).await.unwrap();

        let resolver = StaticKeyResolver::new().with_issuer_key("issuer.example", issuer_key());
        let payload = verify_issuance_token(&response.issuance_token, &resolver).await.unwrap();
        assert_eq!(payload.email, "user@issuer.example");
        let cnf = payload.cnf.jwk.unwrap();
        assert_eq!(cnf.thumbprint().unwrap(), browser_key().thumbprint().unwrap());
        assert!(!cnf.is_private());
        assert!(payload.is_private_email.is_none());
    }

    #[tokio::test]
    async fn test_missing_sec_fetch_dest() {
        let mut request = issuance_request(r#"{"email":"user@issuer.example"}"#);
        request.set_header("Sec-Fetch-Dest", "document");
        let err = issuer().issue(&request, &StaticSession::anonymous()).await.unwrap_err();
        assert_eq!(err.error, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_wrong_content_type() {
        let mut request = issuance_request(r#"{"email":"user@issuer.example"}"#);
        request.set_header("Content-Type", "text/plain");
        let err = issuer().issue(&request, &StaticSession::anonymous()).await.unwrap_err();
        assert_eq!(err.error, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_tampered_body_is_invalid_signature() {
        let mut request = issuance_request(r#"{"email":"user@issuer.example"}"#);
        request.body = br#"{"email":"victim@issuer.example"}"#.to_vec();
        let err = issuer()
            .issue(&request, &StaticSession::new(["victim@issuer.example"]))
            .await
            .unwrap_err();
        assert_eq!(err.error, ErrorCode::InvalidSignature);
        assert_eq!(err.status(), 401);
        assert_eq!(err.error_description, ErrorCode::InvalidSignature.description());
    }

    #[tokio::test]
    async fn test_invalid_email_and_body() {
        let session = StaticSession::new(["user@issuer.example"]);
        for body in [r#"{"email":"<script>@x.example"}"#, r#"{"mail":"a@b.example"}"#, "not json"] {
            let err = issuer().issue(&issuance_request(body), &session).await.unwrap_err();
            assert_eq!(err.error, ErrorCode::InvalidRequest, "{body}");
        }
    }

    #[tokio::test]
    async fn test_disposable_not_supported() {
        let request = issuance_request(r#"{"email":"user@issuer.example","disposable":true}"#);
        let session = StaticSession::new(["user@issuer.example"]);

        let err = issuer().issue(&request, &session).await.unwrap_err();
        assert_eq!(err.error, ErrorCode::DisposableNotSupported);

        let ok = issuer().with_disposable_support().issue(&request, &session).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_authentication_required() {
        let request = issuance_request(r#"{"email":"user@issuer.example"}"#);
        let err = issuer().issue(&request, &StaticSession::anonymous()).await.unwrap_err();
        assert_eq!(err.error, ErrorCode::AuthenticationRequired);

        let other_user = StaticSession::new(["someone@issuer.example"]);
        let err = issuer().issue(&request, &other_user).await.unwrap_err();
        assert_eq!(err.error, ErrorCode::AuthenticationRequired);
    }

    struct DirectedSession;

    impl AccountSession for DirectedSession {
        async fn attest(&self, request: &IssuanceRequestBody) -> Option<Attestation> {
            request.directed_email.as_deref().map(Attestation::private_email)
        }
    }

    #[tokio::test]
    async fn test_directed_email_owned_by_session() {
        let request = issuance_request(
            r#"{"email":"user@issuer.example","directed_email":"x7f2@relay.issuer.example"}"#,
        );
        let response = issuer().issue(&request, &DirectedSession).await.unwrap();

        let resolver = StaticKeyResolver::new().with_issuer_key("issuer.example", issuer_key());
        let payload = verify_issuance_token(&response.issuance_token, &resolver).await.unwrap();
        assert_eq!(payload.email, "x7f2@relay.issuer.example");
        assert_eq!(payload.is_private_email, Some(true));
    }

    #[test]
    fn test_error_response_serialization() {
        let json = serde_json::to_value(ErrorResponse::new(ErrorCode::DisposableNotSupported)).unwrap();
        assert_eq!(json["error"], "disposable_not_supported");
        assert!(json["error_description"].is_string());
    }

    #[test]
    fn test_error_mapping_does_not_leak() {
        let secret = "kid=internal-hsm-key-7";
        for error in [
            EvpError::JwksFetch(secret.into()),
            EvpError::TokenFormat(secret.into()),
            EvpError::InvalidSignature(secret.into()),
        ] {
            let response = ErrorResponse::from(&error);
            assert!(!response.error_description.contains(secret));
        }
        assert_eq!(
            ErrorResponse::from(&EvpError::TimeValidation("stale".into())).error,
            ErrorCode::InvalidRequest
        );
    }

    #[test]
    fn test_new_rejects_public_key() {
        assert!(Issuer::new("issuer.example", issuer_key().to_public()).is_err());
        assert!(Issuer::new("", issuer_key()).is_err());
    }
}
