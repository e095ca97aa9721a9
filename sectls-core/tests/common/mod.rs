//! Helpers shared by the connection-level integration tests.

#![allow(dead_code)]

use sectls_core::certificate_validator::{CertifiedKey, RawKeyValidator};
use sectls_core::config::{ClientConfigBuilder, ServerConfigBuilder};
use sectls_core::{ClientConfig, ClientConnection, Result, ServerConfig, ServerConnection};
use sectls_crypto::{SignatureAlgorithm, SigningKey, VerifyingKey};
use sectls_crypto_mock::MockCryptoProvider;
use std::sync::Arc;

/// A raw-public-key identity for one side.
pub struct Identity {
    pub signing: SigningKey,
    pub verifying: VerifyingKey,
}

impl Identity {
    pub fn generate(provider: &MockCryptoProvider) -> Self {
        let (signing, verifying) = provider.credential().expect("credential");
        Self { signing, verifying }
    }

    pub fn certified_key(&self) -> CertifiedKey {
        CertifiedKey::raw_public_key(
            self.signing.clone(),
            &self.verifying,
            SignatureAlgorithm::Ed25519,
        )
    }

    pub fn validator(&self) -> Arc<RawKeyValidator> {
        Arc::new(RawKeyValidator::new(SignatureAlgorithm::Ed25519).with_pinned_key(&self.verifying))
    }
}

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn provider(seed: u64) -> Arc<MockCryptoProvider> {
    Arc::new(MockCryptoProvider::with_seed(seed))
}

pub fn server_builder(provider: Arc<MockCryptoProvider>, identity: &Identity) -> ServerConfigBuilder {
    ServerConfig::builder(provider).with_credentials(identity.certified_key())
}

pub fn client_builder(provider: Arc<MockCryptoProvider>, server: &Identity) -> ClientConfigBuilder {
    ClientConfig::builder(provider)
        .with_server_name("example.com")
        .with_validator(server.validator())
}

/// Shuttle bytes both ways until a full round moves nothing.
pub fn drive(client: &mut ClientConnection, server: &mut ServerConnection) -> Result<()> {
    init_tracing();
    for _ in 0..32 {
        let to_server = client.take_output();
        if !to_server.is_empty() {
            server.read_tls(&to_server)?;
        }
        server.process()?;
        let to_client = server.take_output();
        if !to_client.is_empty() {
            client.read_tls(&to_client)?;
        }
        client.process()?;
        if to_server.is_empty() && to_client.is_empty() {
            return Ok(());
        }
    }
    panic!("connections did not settle");
}

/// Server and client over default mock configuration, handshake done.
pub fn established_pair() -> (ClientConnection, ServerConnection) {
    let identity = Identity::generate(&provider(1));
    let server_config = server_builder(provider(1), &identity)
        .build()
        .expect("server config");
    let client_config = client_builder(provider(2), &identity)
        .build()
        .expect("client config");
    let mut client = ClientConnection::new(client_config).expect("client");
    let mut server = ServerConnection::new(server_config).expect("server");
    drive(&mut client, &mut server).expect("handshake");
    assert!(client.is_established());
    assert!(server.is_established());
    (client, server)
}
