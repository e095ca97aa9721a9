//! # RustCrypto-based Cryptography Provider for SecTLS
//!
//! This crate implements [`sectls_crypto::CryptoProvider`] on top of the
//! RustCrypto and dalek crates.
//!
//! ## Supported Algorithms
//!
//! - **AEAD**: AES-128-GCM, AES-256-GCM, ChaCha20-Poly1305
//! - **Hash / HMAC / HKDF**: SHA-256, SHA-384
//! - **Key Exchange**: X25519, ECDH P-256
//! - **Signatures**: Ed25519, ECDSA P-256 (DER encoded, as carried in TLS)
//! - **RNG**: operating system CSPRNG
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sectls_crypto::CryptoProvider;
//! use sectls_crypto_rustcrypto::RustCryptoProvider;
//!
//! let provider = RustCryptoProvider::new();
//! assert!(provider.supports_aead(sectls_crypto::AeadAlgorithm::Aes128Gcm));
//! ```

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_qualifications,
    missing_debug_implementations
)]

use sectls_crypto::{
    Aead, AeadAlgorithm, CryptoProvider, Hash, HashAlgorithm, Hmac, Kdf, KdfAlgorithm,
    KeyExchange, KeyExchangeAlgorithm, Random, Result, Signature, SignatureAlgorithm,
};

pub mod aead;
pub mod hash;
pub mod hkdf;
pub mod hmac;
pub mod kex;
pub mod random;
pub mod signature;

use random::OsRandom;

/// Cryptography provider using RustCrypto implementations.
///
/// This provider is `Send + Sync` and stateless apart from the RNG handle,
/// so one instance can be shared by every connection.
#[derive(Debug, Default)]
pub struct RustCryptoProvider {
    random: OsRandom,
}

impl RustCryptoProvider {
    /// Create a new provider.
    pub fn new() -> Self {
        Self { random: OsRandom }
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn aead(&self, algorithm: AeadAlgorithm) -> Result<Box<dyn Aead>> {
        aead::create_aead(algorithm)
    }

    fn hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn Hash>> {
        hash::create_hash(algorithm)
    }

    fn hmac(&self, algorithm: HashAlgorithm, key: &[u8]) -> Result<Box<dyn Hmac>> {
        hmac::create_hmac(algorithm, key)
    }

    fn kdf(&self, algorithm: KdfAlgorithm) -> Result<Box<dyn Kdf>> {
        hkdf::create_kdf(algorithm)
    }

    fn random(&self) -> &dyn Random {
        &self.random
    }

    fn key_exchange(&self, algorithm: KeyExchangeAlgorithm) -> Result<Box<dyn KeyExchange>> {
        kex::create_key_exchange(algorithm)
    }

    fn signature(&self, algorithm: SignatureAlgorithm) -> Result<Box<dyn Signature>> {
        signature::create_signature(algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_support() {
        let provider = RustCryptoProvider::new();
        assert!(provider.supports_aead(AeadAlgorithm::Aes128Gcm));
        assert!(provider.supports_aead(AeadAlgorithm::Aes256Gcm));
        assert!(provider.supports_aead(AeadAlgorithm::ChaCha20Poly1305));
    }

    #[test]
    fn test_key_exchange_support() {
        let provider = RustCryptoProvider::new();
        assert!(provider.supports_key_exchange(KeyExchangeAlgorithm::X25519));
        assert!(provider.supports_key_exchange(KeyExchangeAlgorithm::Secp256r1));
        assert!(!provider.supports_key_exchange(KeyExchangeAlgorithm::Secp384r1));
    }

    #[test]
    fn test_signature_support() {
        let provider = RustCryptoProvider::new();
        assert!(provider.supports_signature(SignatureAlgorithm::Ed25519));
        assert!(provider.supports_signature(SignatureAlgorithm::EcdsaSecp256r1Sha256));
        assert!(!provider.supports_signature(SignatureAlgorithm::RsaPssRsaeSha256));
    }
}
