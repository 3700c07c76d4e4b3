use ed25519_dalek::SigningKey;
use proptest::prelude::*;

use crate::{
    crypto::Jwk,
    httpsig::{
        HttpRequest, HttpSignOptions, HttpSignatureVerifier, HttpSigner, SignatureVerification,
        VerifyOptions,
        sfv::{self, BareItem, Dictionary, Item, Member},
    },
};

fn verify_blocking(verifier: &HttpSignatureVerifier, request: &HttpRequest) -> SignatureVerification {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(verifier.verify(request, &VerifyOptions::default()))
}

fn request(method: &str, authority: &str, path: &str, body: Vec<u8>) -> HttpRequest {
    let request = HttpRequest::new(method, authority, path);
    if body.is_empty() {
        request
    } else {
        request.with_header("Content-Type", "application/octet-stream").with_body(body)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_signature_verification_roundtrip(
        seed in any::<[u8; 32]>(),
        method in "GET|POST|PUT|DELETE",
        authority in "[a-z0-9]+\\.example",
        path in "/[a-z0-9/]*",
        body in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let signer = HttpSigner::hwk(Jwk::from_signing_key(&SigningKey::from_bytes(&seed)))
            .expect("signer");
        let mut req = request(&method, &authority, &path, body);
        signer.sign_request(&mut req, &HttpSignOptions::default()).expect("sign");

        let result = verify_blocking(&HttpSignatureVerifier::new(), &req);
        prop_assert!(result.is_verified(), "verification failed: {:?}", result.error());
    }

    #[test]
    fn test_body_tamper_detected(
        seed in any::<[u8; 32]>(),
        body in proptest::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let signer = HttpSigner::hwk(Jwk::from_signing_key(&SigningKey::from_bytes(&seed)))
            .expect("signer");
        let mut req = request("POST", "issuer.example", "/issue", body);
        signer.sign_request(&mut req, &HttpSignOptions::default()).expect("sign");

        let i = index.index(req.body.len());
        req.body[i] ^= flip;
        prop_assert!(!verify_blocking(&HttpSignatureVerifier::new(), &req).is_verified());
    }

    #[test]
    fn test_replay_protection_property(
        seed in any::<[u8; 32]>(),
        path in "/[a-z0-9]{1,16}",
    ) {
        let signer = HttpSigner::hwk(Jwk::from_signing_key(&SigningKey::from_bytes(&seed)))
            .expect("signer");
        let verifier = HttpSignatureVerifier::new().with_replay_cache(100);
        let mut req = HttpRequest::new("GET", "rp.example", &path);
        signer
            .sign_request(&mut req, &HttpSignOptions::default().with_random_nonce())
            .expect("sign");

        prop_assert!(verify_blocking(&verifier, &req).is_verified());
        prop_assert!(!verify_blocking(&verifier, &req).is_verified());
    }

    #[test]
    fn test_structured_string_roundtrip(value in "[ -~]{0,64}") {
        let mut dict = Dictionary::new();
        dict.insert("k", Member::Item(Item::new(BareItem::String(value.clone()))));
        let parsed = sfv::parse_dictionary(&sfv::serialize_dictionary(&dict).expect("serialize"))
            .expect("parse");
        prop_assert_eq!(parsed.get("k"), Some(&Member::Item(Item::new(BareItem::String(value)))));
    }

    #[test]
    fn test_parser_never_panics(input in "\\PC{0,128}") {
        let _ = sfv::parse_dictionary(&input);
    }
}
