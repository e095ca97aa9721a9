//! RFC 8448 Test Vectors for TLS 1.3
//!
//! Checks the key schedule against the "Simple 1-RTT Handshake" trace of
//! RFC 8448 Section 3, using the RustCrypto provider.

use sectls_core::cipher::{select_suite, CipherSuite};
use sectls_core::key_schedule::{hkdf_expand_label, KeySchedule, TrafficPhase};
use sectls_crypto::CryptoProvider;
use sectls_crypto_rustcrypto::RustCryptoProvider;
use std::sync::Arc;

const EARLY_SECRET: &str = "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a";
const ECDHE_SHARED: &str = "8bd4054fb55b9d63fdfbacf9f04b9f0d35e6d63f537563efd46272900f89492d";
const HANDSHAKE_SECRET: &str = "1dc826e93606aa6fdc0aadc12f741b01046aa6b99f691ed221a9f0ca043fbeac";
/// Hash(ClientHello || ServerHello)
const HELLO_HASH: &str = "860c06edc07858ee8e78f0e7428c58edd6b43f2ca3e6e95f02ed063cf0e1cad8";
const CLIENT_HS_TRAFFIC: &str = "b3eddb126e067f35a780b3abf45e2d8f3b1a950738f52e9600746a0e27a55a21";
const SERVER_HS_TRAFFIC: &str = "b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38";
const MASTER_SECRET: &str = "18df06843d13a08bf2a449844c5f8a478001bc4d4c627984d5a41da8d0402919";

fn schedule() -> KeySchedule {
    let provider: Arc<dyn CryptoProvider> = Arc::new(RustCryptoProvider::new());
    KeySchedule::new(select_suite(provider, CipherSuite::Aes128GcmSha256).unwrap())
}

fn unhex(s: &str) -> Vec<u8> {
    hex::decode(s).expect("valid hex")
}

/// Early secret, handshake secret and master secret.
#[test]
fn test_rfc8448_stage_secrets() {
    let mut ks = schedule();
    let early = ks.derive_early_secret(None).unwrap();
    assert_eq!(hex::encode(early.as_bytes()), EARLY_SECRET);

    let handshake = ks
        .derive_handshake_secret(&early, Some(&unhex(ECDHE_SHARED)))
        .unwrap();
    assert_eq!(hex::encode(handshake.as_bytes()), HANDSHAKE_SECRET);

    let master = ks.derive_master_secret(&handshake).unwrap();
    assert_eq!(hex::encode(master.as_bytes()), MASTER_SECRET);
}

/// Handshake traffic secrets from the ClientHello..ServerHello hash.
#[test]
fn test_rfc8448_handshake_traffic_secrets() {
    let mut ks = schedule();
    let early = ks.derive_early_secret(None).unwrap();
    let handshake = ks
        .derive_handshake_secret(&early, Some(&unhex(ECDHE_SHARED)))
        .unwrap();
    let hash = unhex(HELLO_HASH);

    let client = ks
        .derive_traffic_secret(TrafficPhase::ClientHandshake, &handshake, &hash)
        .unwrap();
    let server = ks
        .derive_traffic_secret(TrafficPhase::ServerHandshake, &handshake, &hash)
        .unwrap();
    assert_eq!(hex::encode(client.as_bytes()), CLIENT_HS_TRAFFIC);
    assert_eq!(hex::encode(server.as_bytes()), SERVER_HS_TRAFFIC);
}

/// Record key and IV for both handshake traffic secrets.
#[test]
fn test_rfc8448_handshake_keys() {
    let mut ks = schedule();
    let early = ks.derive_early_secret(None).unwrap();
    let handshake = ks
        .derive_handshake_secret(&early, Some(&unhex(ECDHE_SHARED)))
        .unwrap();
    let hash = unhex(HELLO_HASH);

    let server = ks
        .derive_traffic_secret(TrafficPhase::ServerHandshake, &handshake, &hash)
        .unwrap();
    let keys = ks.traffic_keys(&server).unwrap();
    assert_eq!(hex::encode(keys.key()), "3fce516009c21727d0f2e4e86ee403bc");
    assert_eq!(hex::encode(keys.iv()), "5d313eb2671276ee13000b30");

    let client = ks
        .derive_traffic_secret(TrafficPhase::ClientHandshake, &handshake, &hash)
        .unwrap();
    let keys = ks.traffic_keys(&client).unwrap();
    assert_eq!(hex::encode(keys.key()), "dbfaa693d1762c5b666af5d950258d01");
    assert_eq!(hex::encode(keys.iv()), "5bd3c71b836e0b76bb73265f");
}

/// The "derived" step on its own, through the public HKDF-Expand-Label.
#[test]
fn test_rfc8448_derived_salt() {
    let provider = RustCryptoProvider::new();
    let suite = select_suite(Arc::new(RustCryptoProvider::new()), CipherSuite::Aes128GcmSha256).unwrap();
    let empty_hash = provider
        .digest(sectls_crypto::HashAlgorithm::Sha256, &[])
        .unwrap();
    let derived = hkdf_expand_label(suite.as_ref(), &unhex(EARLY_SECRET), b"derived", &empty_hash, 32).unwrap();
    assert_eq!(
        hex::encode(derived),
        "6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba"
    );
}
