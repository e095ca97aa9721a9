//! Shared setup for the SecTLS benchmarks: RustCrypto-backed configs with a
//! raw Ed25519 server key.

use sectls_core::certificate_validator::{CertifiedKey, RawKeyValidator};
use sectls_core::{
    CipherSuite, ClientConfig, ClientConnection, Result, ServerConfig, ServerConnection,
};
use sectls_crypto::{CryptoProvider, SignatureAlgorithm};
use sectls_crypto_rustcrypto::RustCryptoProvider;
use std::sync::Arc;

/// Client and server configs restricted to `suite`.
pub fn configs(suite: CipherSuite) -> Result<(Arc<ClientConfig>, Arc<ServerConfig>)> {
    let provider = Arc::new(RustCryptoProvider::new());
    let (signing, verifying) = provider
        .signature(SignatureAlgorithm::Ed25519)?
        .generate_keypair()?;
    let server = ServerConfig::builder(provider.clone())
        .with_cipher_suites(&[suite])
        .with_credentials(CertifiedKey::raw_public_key(
            signing,
            &verifying,
            SignatureAlgorithm::Ed25519,
        ))
        .build()?;
    let client = ClientConfig::builder(provider)
        .with_server_name("bench.example")
        .with_validator(Arc::new(
            RawKeyValidator::new(SignatureAlgorithm::Ed25519).with_pinned_key(&verifying),
        ))
        .build()?;
    Ok((client, server))
}

/// Run a full handshake in memory.
pub fn handshake(
    client_config: &Arc<ClientConfig>,
    server_config: &Arc<ServerConfig>,
) -> Result<(ClientConnection, ServerConnection)> {
    let mut client = ClientConnection::new(client_config.clone())?;
    let mut server = ServerConnection::new(server_config.clone())?;
    while !(client.is_established() && server.is_established()) {
        server.read_tls(&client.take_output())?;
        server.process()?;
        client.read_tls(&server.take_output())?;
        client.process()?;
    }
    Ok((client, server))
}
