//! Key discovery against a mock issuer: metadata, JWKS, caching, and the
//! `jwks` Signature-Key scheme.

mod common;

use std::sync::Arc;

use common::{ed25519_key, init_tracing, rsa_key};
use email_verification::{
    EvpError,
    crypto::{Jwk, Jwks},
    httpsig::{HttpRequest, HttpSignOptions, HttpSignatureVerifier, HttpSigner, VerifyOptions},
    keys::{IssuerKeyResolver, JwksFetcher, KeyResolver},
    token::{
        IssuanceTokenPayload, SignOptions, generate_issuance_token, generate_presentation_token,
        verify_presentation_token,
    },
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn fetcher() -> Arc<JwksFetcher> {
    Arc::new(JwksFetcher::new().unwrap().allow_http())
}

/// Issuer identifier for the mock server: `127.0.0.1:<port>`.
fn issuer_id(server: &MockServer) -> String {
    format!("127.0.0.1:{}", server.address().port())
}

async fn mount_jwks(server: &MockServer, route: &str, keys: &[&Jwk]) {
    let jwks = Jwks { keys: keys.iter().map(|k| k.to_public()).collect() };
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(&jwks))
        .mount(server)
        .await;
}

async fn mount_issuer_metadata(server: &MockServer, jwks_uri: &str) {
    Mock::given(method("GET"))
        .and(path("/.well-known/email-verification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuance_endpoint": format!("{}/issuance", server.uri()),
            "jwks_uri": jwks_uri,
            "signing_alg_values_supported": ["RS256", "EdDSA"],
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_jwks_is_cached() {
    init_tracing();
    let server = MockServer::start().await;
    let key = ed25519_key(60);
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Jwks::new(key.to_public())))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher();
    let url = format!("{}/jwks.json", server.uri());
    let first = fetcher.fetch_jwks(&url).await.unwrap();
    let second = fetcher.fetch_jwks(&url).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.find(key.kid.as_deref().unwrap()), Some(&key.to_public()));
}

#[tokio::test]
async fn test_requester_chosen_urls_stay_bounded() {
    let server = MockServer::start().await;
    let key = ed25519_key(68);
    for i in 0..5 {
        mount_jwks(&server, &format!("/agents/{i}/jwks.json"), &[&key]).await;
    }

    let fetcher = JwksFetcher::new().unwrap().allow_http().with_cache_capacity(2);
    for i in 0..5 {
        let url = format!("{}/agents/{i}/jwks.json", server.uri());
        fetcher.fetch_jwks(&url).await.unwrap();
    }

    assert_eq!(fetcher.cached_jwks(), 2);
}

#[tokio::test]
async fn test_https_required_by_default() {
    let server = MockServer::start().await;
    let fetcher = JwksFetcher::new().unwrap();
    let err = fetcher.fetch_jwks(&format!("{}/jwks.json", server.uri())).await.unwrap_err();
    assert!(matches!(err, EvpError::JwksFetch(_)));
}

#[tokio::test]
async fn test_jwks_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fetcher().fetch_jwks(&format!("{}/jwks.json", server.uri())).await.unwrap_err();
    assert!(matches!(err, EvpError::JwksFetch(ref m) if m.contains("404")), "{err}");
    assert!(err.is_network());
}

#[tokio::test]
async fn test_malformed_metadata_is_discovery_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/email-verification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwks_uri": 7})))
        .mount(&server)
        .await;

    let resolver = IssuerKeyResolver::new(fetcher());
    let err = resolver.metadata(&issuer_id(&server)).await.unwrap_err();
    assert!(matches!(err, EvpError::Discovery(_)), "{err}");
}

#[tokio::test]
async fn test_issuer_resolver_verifies_presentation() {
    init_tracing();
    let server = MockServer::start().await;
    let issuer = issuer_id(&server);
    let issuer_key = rsa_key();
    let browser_key = ed25519_key(61);

    mount_issuer_metadata(&server, &format!("{}/keys", server.uri())).await;
    mount_jwks(&server, "/keys", &[&ed25519_key(62), &issuer_key]).await;

    let payload = IssuanceTokenPayload::new(&issuer, "user@example.com", browser_key.clone());
    let sd_jwt = generate_issuance_token(&payload, &issuer_key, &SignOptions::default()).unwrap();
    let token = generate_presentation_token(
        &sd_jwt,
        "https://rp.example",
        "n-0S6_WzA2Mj",
        &browser_key,
        &SignOptions::default(),
    )
    .unwrap();

    let resolver = IssuerKeyResolver::new(fetcher());
    let verified =
        verify_presentation_token(&token, &resolver, "https://rp.example", "n-0S6_WzA2Mj")
            .await
            .unwrap();
    assert_eq!(verified.sd_jwt.iss, issuer);

    let metadata = resolver.metadata(&issuer).await.unwrap();
    assert_eq!(metadata.signing_alg_values_supported.unwrap(), ["RS256", "EdDSA"]);
}

#[tokio::test]
async fn test_issuer_resolver_unknown_kid() {
    let server = MockServer::start().await;
    mount_issuer_metadata(&server, &format!("{}/keys", server.uri())).await;
    mount_jwks(&server, "/keys", &[&ed25519_key(63)]).await;

    let resolver = IssuerKeyResolver::new(fetcher());
    let err = resolver.resolve("missing-kid", &issuer_id(&server)).await.unwrap_err();
    assert!(matches!(err, EvpError::JwksFetch(_)));
}

#[tokio::test]
async fn test_issuer_resolver_rejects_foreign_jwks_host() {
    let server = MockServer::start().await;
    mount_issuer_metadata(&server, "https://127.0.0.1.attacker.example/keys").await;

    let resolver = IssuerKeyResolver::new(fetcher());
    let err = resolver.resolve("any", &issuer_id(&server)).await.unwrap_err();
    assert!(matches!(err, EvpError::Discovery(ref m) if m.contains("outside")), "{err}");
}

#[tokio::test]
async fn test_issuer_resolver_rejects_non_domain_issuer() {
    let resolver = IssuerKeyResolver::new(fetcher());
    for issuer in ["", "https://issuer.example", "issuer.example/path", "user@issuer.example"] {
        assert!(
            matches!(resolver.metadata(issuer).await, Err(EvpError::Discovery(_))),
            "{issuer:?}"
        );
    }
}

fn signed_get(signer: &HttpSigner) -> HttpRequest {
    let mut request = HttpRequest::new("GET", "resource.example", "/inbox");
    signer.sign_request(&mut request, &HttpSignOptions::default()).unwrap();
    request
}

#[tokio::test]
async fn test_jwks_scheme_with_well_known() {
    init_tracing();
    let server = MockServer::start().await;
    let agent_key = ed25519_key(64);
    let kid = agent_key.kid.clone().unwrap();

    Mock::given(method("GET"))
        .and(path("/.well-known/aauth-agent"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jwks_uri": format!("{}/agent-jwks", server.uri())})),
        )
        .mount(&server)
        .await;
    mount_jwks(&server, "/agent-jwks", &[&agent_key]).await;

    let signer = HttpSigner::jwks(agent_key, &server.uri(), &kid, Some("aauth-agent")).unwrap();
    let request = signed_get(&signer);
    assert!(request.header("signature-key").unwrap().contains("well-known=\"aauth-agent\""));

    let verifier = HttpSignatureVerifier::new().with_jwks_fetcher(fetcher());
    let verified = verifier.verify(&request, &VerifyOptions::default()).await.into_result().unwrap();
    assert_eq!(verified.scheme.name(), "jwks");
    assert!(!verified.key.is_private());
}

#[tokio::test]
async fn test_jwks_scheme_direct_url() {
    let server = MockServer::start().await;
    let agent_key = ed25519_key(65);
    let kid = agent_key.kid.clone().unwrap();
    mount_jwks(&server, "/jwks.json", &[&agent_key]).await;

    let jwks_url = format!("{}/jwks.json", server.uri());
    let request = signed_get(&HttpSigner::jwks(agent_key, &jwks_url, &kid, None).unwrap());

    let verifier = HttpSignatureVerifier::new().with_jwks_fetcher(fetcher());
    assert!(verifier.verify(&request, &VerifyOptions::default()).await.is_verified());
}

#[tokio::test]
async fn test_jwks_scheme_key_mismatch() {
    let server = MockServer::start().await;
    let published = ed25519_key(66);
    let impostor = ed25519_key(67);
    let kid = published.kid.clone().unwrap();
    mount_jwks(&server, "/jwks.json", &[&published]).await;

    // Signs with a different key while naming the published kid
    let jwks_url = format!("{}/jwks.json", server.uri());
    let request = signed_get(&HttpSigner::jwks(impostor, &jwks_url, &kid, None).unwrap());

    let verifier = HttpSignatureVerifier::new().with_jwks_fetcher(fetcher());
    let verification = verifier.verify(&request, &VerifyOptions::default()).await;
    assert!(!verification.is_verified());
    assert!(verification.error().is_some());
}
