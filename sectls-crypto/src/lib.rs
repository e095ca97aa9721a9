//! # SecTLS Cryptographic Provider Interface
//!
//! This crate defines the cryptographic abstraction layer for SecTLS.
//! The handshake engine never touches a primitive directly; every hash, MAC,
//! key derivation, AEAD operation, signature and key agreement goes through
//! the [`CryptoProvider`] trait defined here.
//!
//! ## Architecture
//!
//! ```text
//! CryptoProvider (main trait)
//! ├── Aead (AES-GCM, ChaCha20-Poly1305)
//! ├── Hash (SHA-256, SHA-384)
//! ├── Hmac (HMAC over the hash functions)
//! ├── Kdf (HKDF-Extract / HKDF-Expand)
//! ├── Random (CSPRNG)
//! ├── KeyExchange (X25519, P-256 ECDHE)
//! └── Signature (Ed25519, ECDSA)
//! ```
//!
//! ## Asynchronous backends
//!
//! A provider that offloads work (hardware accelerators, remote signers) may
//! return [`Error::Pending`] from `sign`, `verify`, `seal` or `open`. The caller
//! is expected to retry the identical call later; providers must not consume
//! or mutate caller state when they report pending.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use sectls_crypto::{CryptoProvider, AeadAlgorithm, Error};
//!
//! fn example(provider: &dyn CryptoProvider) -> Result<(), Error> {
//!     let aead = provider.aead(AeadAlgorithm::Aes128Gcm)?;
//!     let ciphertext = aead.seal(key, nonce, aad, plaintext)?;
//!     let plaintext = aead.open(key, nonce, aad, &ciphertext)?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_qualifications,
    missing_debug_implementations
)]

pub mod aead;
pub mod error;
pub mod hash;
pub mod hmac;
pub mod kdf;
pub mod key_exchange;
pub mod random;
pub mod signature;

pub use aead::{Aead, AeadAlgorithm};
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm};
pub use hmac::Hmac;
pub use kdf::{Kdf, KdfAlgorithm};
pub use key_exchange::{KeyExchange, KeyExchangeAlgorithm, PrivateKey, PublicKey, SharedSecret};
pub use random::Random;
pub use signature::{Signature, SignatureAlgorithm, SigningKey, VerifyingKey};

/// The main cryptographic provider trait.
///
/// Implementations hand out boxed capability objects for each primitive
/// family. The trait is object safe so a connection can hold an
/// `Arc<dyn CryptoProvider>` for its whole lifetime.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; one provider instance is
/// normally shared by every connection of a process.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Get an AEAD cipher instance.
    fn aead(&self, algorithm: AeadAlgorithm) -> Result<Box<dyn Aead>>;

    /// Get a fresh hash context.
    fn hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn Hash>>;

    /// Get an HMAC instance keyed with `key`.
    fn hmac(&self, algorithm: HashAlgorithm, key: &[u8]) -> Result<Box<dyn Hmac>>;

    /// Get a KDF (HKDF) instance.
    fn kdf(&self, algorithm: KdfAlgorithm) -> Result<Box<dyn Kdf>>;

    /// Get the random number generator.
    fn random(&self) -> &dyn Random;

    /// Get a key exchange instance.
    fn key_exchange(&self, algorithm: KeyExchangeAlgorithm) -> Result<Box<dyn KeyExchange>>;

    /// Get a signature scheme instance.
    fn signature(&self, algorithm: SignatureAlgorithm) -> Result<Box<dyn Signature>>;

    /// Hash `data` in one call.
    fn digest(&self, algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let mut hash = self.hash(algorithm)?;
        hash.update(data);
        Ok(hash.finalize())
    }

    /// Check if the provider supports a specific AEAD algorithm.
    fn supports_aead(&self, algorithm: AeadAlgorithm) -> bool {
        self.aead(algorithm).is_ok()
    }

    /// Check if the provider supports a specific hash algorithm.
    fn supports_hash(&self, algorithm: HashAlgorithm) -> bool {
        self.hash(algorithm).is_ok()
    }

    /// Check if the provider supports a specific key exchange algorithm.
    fn supports_key_exchange(&self, algorithm: KeyExchangeAlgorithm) -> bool {
        self.key_exchange(algorithm).is_ok()
    }

    /// Check if the provider supports a specific signature algorithm.
    fn supports_signature(&self, algorithm: SignatureAlgorithm) -> bool {
        self.signature(algorithm).is_ok()
    }
}
