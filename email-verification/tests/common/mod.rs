//! Shared helpers for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Once;

use ed25519_dalek::SigningKey;
use email_verification::crypto::Jwk;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber once per binary. `RUST_LOG` controls output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Private Ed25519 key with `alg` and `kid` set.
pub fn ed25519_key(seed: u8) -> Jwk {
    Jwk::from_signing_key(&SigningKey::from_bytes(&[seed; 32]))
}

/// Fresh private RSA key with `alg: RS256` and a thumbprint `kid`.
pub fn rsa_key() -> Jwk {
    let key_pair = josekit::jws::RS256.generate_key_pair(2048).expect("RSA key generation");
    from_josekit(&key_pair.to_jwk_private_key(), "RS256")
}

/// Fresh private P-256 key with `alg: ES256` and a thumbprint `kid`.
pub fn p256_key() -> Jwk {
    let key_pair = josekit::jws::ES256.generate_key_pair().expect("EC key generation");
    from_josekit(&key_pair.to_jwk_key_pair(), "ES256")
}

fn from_josekit(jwk: &josekit::jwk::Jwk, alg: &str) -> Jwk {
    let mut jwk: Jwk = serde_json::from_value(serde_json::Value::Object(jwk.as_ref().clone()))
        .expect("josekit JWK converts");
    jwk.alg = Some(alg.to_owned());
    jwk.kid = Some(jwk.thumbprint().expect("thumbprint"));
    jwk
}
