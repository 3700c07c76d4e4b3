//! Issuance over signed HTTP requests, through to a verified presentation.

mod common;

use std::time::Duration;

use common::{ed25519_key, init_tracing, p256_key, rsa_key};
use email_verification::{
    crypto::Jwk,
    httpsig::{
        Component, HttpRequest, HttpSignOptions, HttpSignatureAlgorithm, HttpSignatureVerifier,
        HttpSigner, KeyScheme, VerifyOptions,
    },
    issuer::{ErrorCode, Issuer, StaticSession},
    keys::StaticKeyResolver,
    token::{generate_presentation_token, verify_issuance_token, verify_presentation_token},
};

const ISSUER: &str = "issuer.example";
const EMAIL: &str = "user@issuer.example";
const RP: &str = "https://rp.example";

fn unsigned_request() -> HttpRequest {
    HttpRequest::new("POST", ISSUER, "/email-verification/issuance")
        .with_header("Sec-Fetch-Dest", "email-verification")
        .with_header("Content-Type", "application/json")
        .with_body(format!(r#"{{"email":"{EMAIL}"}}"#).into_bytes())
}

fn signed_request(signer: &HttpSigner, options: &HttpSignOptions) -> HttpRequest {
    let mut request = unsigned_request();
    signer.sign_request(&mut request, options).expect("request signing");
    request
}

fn session() -> StaticSession {
    StaticSession::new([EMAIL])
}

#[tokio::test]
async fn test_issue_and_present_per_browser_key_type() {
    init_tracing();
    let issuer_key = rsa_key();
    let issuer = Issuer::new(ISSUER, issuer_key.clone()).unwrap();
    let resolver = StaticKeyResolver::new().with_issuer_key(ISSUER, issuer_key);

    let browsers = [
        (ed25519_key(40), HttpSignatureAlgorithm::Ed25519),
        (p256_key(), HttpSignatureAlgorithm::EcdsaP256Sha256),
        (rsa_key(), HttpSignatureAlgorithm::RsaPssSha256),
    ];

    for (browser_key, expected_alg) in browsers {
        let signer = HttpSigner::hwk(browser_key.clone()).unwrap();
        assert_eq!(signer.algorithm(), expected_alg);

        let request = signed_request(&signer, &HttpSignOptions::default());
        let response = issuer
            .issue(&request, &session())
            .await
            .unwrap_or_else(|e| panic!("{}: {}", expected_alg.as_str(), e.error));

        let token = generate_presentation_token(
            &response.issuance_token,
            RP,
            "rp-session-nonce",
            &browser_key,
            &Default::default(),
        )
        .unwrap();
        let verified =
            verify_presentation_token(&token, &resolver, RP, "rp-session-nonce").await.unwrap();

        assert_eq!(verified.sd_jwt.email, EMAIL);
        let cnf = verified.sd_jwt.cnf.jwk.unwrap();
        assert_eq!(cnf.thumbprint().unwrap(), browser_key.thumbprint().unwrap());
    }
}

#[tokio::test]
async fn test_jwt_scheme_reuses_issued_token() {
    init_tracing();
    let issuer_key = ed25519_key(41);
    let browser_key = ed25519_key(42);
    let issuer = Issuer::new(ISSUER, issuer_key.clone()).unwrap();

    let hwk_signer = HttpSigner::hwk(browser_key.clone()).unwrap();
    let first = issuer
        .issue(&signed_request(&hwk_signer, &HttpSignOptions::default()), &session())
        .await
        .unwrap();

    // The issued token names the browser key in cnf, so it can carry that key
    let jwt_signer = HttpSigner::jwt(browser_key.clone(), &first.issuance_token).unwrap();
    let request = signed_request(&jwt_signer, &HttpSignOptions::default());

    let verification =
        HttpSignatureVerifier::new().verify(&request, &VerifyOptions::default()).await;
    let verified = verification.verified().expect("jwt signature verifies");
    let KeyScheme::Jwt(jwt) = &verified.scheme else {
        panic!("expected jwt scheme, got {}", verified.scheme.name());
    };
    assert_eq!(jwt.token, first.issuance_token);
    assert_eq!(jwt.claims["email"], EMAIL);

    let second = issuer.issue(&request, &session()).await.unwrap();
    let resolver = StaticKeyResolver::new().with_issuer_key(ISSUER, issuer_key);
    let payload = verify_issuance_token(&second.issuance_token, &resolver).await.unwrap();
    assert_eq!(
        payload.cnf.jwk.unwrap().thumbprint().unwrap(),
        browser_key.thumbprint().unwrap()
    );
}

#[test]
fn test_jwt_scheme_rejects_foreign_token() {
    let browser_key = ed25519_key(43);
    let other_key = ed25519_key(44);
    let payload = email_verification::token::IssuanceTokenPayload::new(ISSUER, EMAIL, other_key);
    let token = email_verification::token::generate_issuance_token(
        &payload,
        &ed25519_key(45),
        &Default::default(),
    )
    .unwrap();

    assert!(HttpSigner::jwt(browser_key, &token).is_err());
}

fn without_signature_key() -> HttpSignOptions {
    HttpSignOptions {
        components: Some(vec![
            Component::Method,
            Component::Authority,
            Component::Path,
            Component::header("content-type"),
            Component::header("content-digest"),
        ]),
        ..HttpSignOptions::default()
    }
}

#[tokio::test]
async fn test_strict_aauth_requires_covered_signature_key() {
    init_tracing();
    let signer = HttpSigner::hwk(ed25519_key(46)).unwrap();
    let request = signed_request(&signer, &without_signature_key());

    let strict = Issuer::new(ISSUER, ed25519_key(47)).unwrap();
    let err = strict.issue(&request, &session()).await.unwrap_err();
    assert_eq!(err.error, ErrorCode::InvalidSignature);
    assert_eq!(err.status(), 401);

    let lenient = Issuer::new(ISSUER, ed25519_key(47)).unwrap().with_verifier(
        HttpSignatureVerifier::new(),
        VerifyOptions { strict_aauth: false, ..VerifyOptions::default() },
    );
    assert!(lenient.issue(&request, &session()).await.is_ok());
}

#[tokio::test]
async fn test_replayed_request_rejected() {
    let issuer = Issuer::new(ISSUER, ed25519_key(48))
        .unwrap()
        .with_verifier(HttpSignatureVerifier::new().with_replay_cache(16), VerifyOptions::default());
    let signer = HttpSigner::hwk(ed25519_key(49)).unwrap();
    let request = signed_request(&signer, &HttpSignOptions::default().with_random_nonce());

    assert!(issuer.issue(&request, &session()).await.is_ok());
    let err = issuer.issue(&request, &session()).await.unwrap_err();
    assert_eq!(err.error, ErrorCode::InvalidSignature);
}

#[tokio::test]
async fn test_stale_signature_rejected() {
    let issuer = Issuer::new(ISSUER, ed25519_key(50)).unwrap().with_verifier(
        HttpSignatureVerifier::new(),
        VerifyOptions { max_clock_skew: Duration::from_secs(30), ..VerifyOptions::default() },
    );
    let signer = HttpSigner::hwk(ed25519_key(51)).unwrap();
    let created = email_verification::validation::now_epoch_secs().unwrap() - 300;
    let request = signed_request(
        &signer,
        &HttpSignOptions { created: Some(created), ..HttpSignOptions::default() },
    );

    let err = issuer.issue(&request, &session()).await.unwrap_err();
    assert_eq!(err.error, ErrorCode::InvalidSignature);
}

#[tokio::test]
async fn test_unsigned_request_rejected() {
    let issuer = Issuer::new(ISSUER, ed25519_key(52)).unwrap();
    let err = issuer.issue(&unsigned_request(), &session()).await.unwrap_err();
    assert_eq!(err.error, ErrorCode::InvalidSignature);
}

#[tokio::test]
async fn test_signature_from_different_authority_rejected() {
    let issuer = Issuer::new(ISSUER, ed25519_key(53)).unwrap();
    let signer = HttpSigner::hwk(ed25519_key(54)).unwrap();
    let mut request = signed_request(&signer, &HttpSignOptions::default());
    request.authority = "attacker.example".to_owned();

    let err = issuer.issue(&request, &session()).await.unwrap_err();
    assert_eq!(err.error, ErrorCode::InvalidSignature);
}

#[test]
fn test_public_key_cannot_sign() {
    let public: Jwk = ed25519_key(55).to_public();
    assert!(HttpSigner::hwk(public).is_err());
}
