//! Cipher suite definitions and the negotiated crypto capability.
//!
//! A TLS 1.3 cipher suite fixes only the AEAD and the hash. Once the suite is
//! negotiated the handshake talks to a single [`CryptoSuite`] object that
//! bundles hashing, HMAC, HKDF and AEAD for that suite; [`select_suite`] is
//! the one place where "unsupported suite" is decided.

use crate::error::{Error, Result};
use sectls_crypto::{Aead, AeadAlgorithm, CryptoProvider, Hash, HashAlgorithm, Kdf};
use std::fmt;
use std::sync::Arc;

/// TLS 1.3 cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CipherSuite {
    /// TLS_AES_128_GCM_SHA256 (mandatory to implement)
    Aes128GcmSha256 = 0x1301,

    /// TLS_AES_256_GCM_SHA384
    Aes256GcmSha384 = 0x1302,

    /// TLS_CHACHA20_POLY1305_SHA256
    ChaCha20Poly1305Sha256 = 0x1303,
}

impl CipherSuite {
    /// Create from wire format (u16).
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1301 => Some(CipherSuite::Aes128GcmSha256),
            0x1302 => Some(CipherSuite::Aes256GcmSha384),
            0x1303 => Some(CipherSuite::ChaCha20Poly1305Sha256),
            _ => None,
        }
    }

    /// Convert to wire format (u16).
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Get the AEAD algorithm for this cipher suite.
    pub const fn aead_algorithm(self) -> AeadAlgorithm {
        match self {
            CipherSuite::Aes128GcmSha256 => AeadAlgorithm::Aes128Gcm,
            CipherSuite::Aes256GcmSha384 => AeadAlgorithm::Aes256Gcm,
            CipherSuite::ChaCha20Poly1305Sha256 => AeadAlgorithm::ChaCha20Poly1305,
        }
    }

    /// Get the hash algorithm for this cipher suite.
    pub const fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            CipherSuite::Aes128GcmSha256 | CipherSuite::ChaCha20Poly1305Sha256 => {
                HashAlgorithm::Sha256
            },
            CipherSuite::Aes256GcmSha384 => HashAlgorithm::Sha384,
        }
    }

    /// Traffic key length in bytes.
    pub const fn key_length(self) -> usize {
        self.aead_algorithm().key_size()
    }

    /// AEAD tag length in bytes.
    pub const fn tag_length(self) -> usize {
        self.aead_algorithm().tag_size()
    }

    /// IV length in bytes (always 12 for TLS 1.3 suites).
    pub const fn iv_length(self) -> usize {
        12
    }

    /// IANA name.
    pub const fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes128GcmSha256 => "TLS_AES_128_GCM_SHA256",
            CipherSuite::Aes256GcmSha384 => "TLS_AES_256_GCM_SHA384",
            CipherSuite::ChaCha20Poly1305Sha256 => "TLS_CHACHA20_POLY1305_SHA256",
        }
    }
}

/// Everything the handshake needs from the provider once a suite is fixed.
pub trait CryptoSuite: Send + Sync + fmt::Debug {
    /// The negotiated suite.
    fn suite(&self) -> CipherSuite;

    /// Hash algorithm of the suite.
    fn hash_algorithm(&self) -> HashAlgorithm {
        self.suite().hash_algorithm()
    }

    /// Digest length.
    fn hash_len(&self) -> usize {
        self.hash_algorithm().output_size()
    }

    /// AEAD key length.
    fn key_len(&self) -> usize {
        self.suite().key_length()
    }

    /// AEAD IV length.
    fn iv_len(&self) -> usize {
        self.suite().iv_length()
    }

    /// AEAD tag length.
    fn tag_len(&self) -> usize {
        self.suite().aead_algorithm().tag_size()
    }

    /// Fresh running hash context.
    fn start_hash(&self) -> Result<Box<dyn Hash>>;

    /// One-shot hash.
    fn hash(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut ctx = self.start_hash()?;
        ctx.update(data);
        Ok(ctx.finalize())
    }

    /// HMAC over `data` keyed with `key`.
    fn hmac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Constant-time HMAC check.
    fn verify_hmac(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool>;

    /// HKDF-Extract.
    fn extract(&self, salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>>;

    /// HKDF-Expand.
    fn expand(&self, prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>>;

    /// AEAD seal. May return `Error::Pending`.
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// AEAD open. May return `Error::Pending`.
    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// [`CryptoSuite`] backed by a [`CryptoProvider`].
pub struct ProviderSuite {
    suite: CipherSuite,
    provider: Arc<dyn CryptoProvider>,
    aead: Box<dyn Aead>,
    kdf: Box<dyn Kdf>,
}

impl fmt::Debug for ProviderSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSuite")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

impl CryptoSuite for ProviderSuite {
    fn suite(&self) -> CipherSuite {
        self.suite
    }

    fn start_hash(&self) -> Result<Box<dyn Hash>> {
        Ok(self.provider.hash(self.suite.hash_algorithm())?)
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.provider.hmac(self.suite.hash_algorithm(), key)?;
        mac.update(data);
        Ok(mac.finalize())
    }

    fn verify_hmac(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool> {
        let mut mac = self.provider.hmac(self.suite.hash_algorithm(), key)?;
        mac.update(data);
        Ok(mac.verify(tag))
    }

    fn extract(&self, salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>> {
        Ok(self.kdf.extract(salt, ikm))
    }

    fn expand(&self, prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
        Ok(self.kdf.expand(prk, info, len)?)
    }

    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.aead.seal(key, nonce, aad, plaintext)?)
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.aead.open(key, nonce, aad, ciphertext)?)
    }
}

/// Bind `suite` to `provider`, failing if the provider lacks any primitive
/// the suite needs.
pub fn select_suite(
    provider: Arc<dyn CryptoProvider>,
    suite: CipherSuite,
) -> Result<Arc<dyn CryptoSuite>> {
    let unsupported = |_| Error::HandshakeFailure(format!("{} not supported", suite.name()));
    let aead = provider.aead(suite.aead_algorithm()).map_err(unsupported)?;
    let kdf = provider
        .kdf(suite.hash_algorithm().to_kdf_algorithm())
        .map_err(unsupported)?;
    provider
        .hash(suite.hash_algorithm())
        .map_err(unsupported)?;

    Ok(Arc::new(ProviderSuite {
        suite,
        provider,
        aead,
        kdf,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectls_crypto_mock::MockCryptoProvider;

    #[test]
    fn test_cipher_suite_conversion() {
        assert_eq!(
            CipherSuite::from_u16(0x1301),
            Some(CipherSuite::Aes128GcmSha256)
        );
        assert_eq!(CipherSuite::from_u16(0x1304), None);
        assert_eq!(CipherSuite::ChaCha20Poly1305Sha256.to_u16(), 0x1303);
    }

    #[test]
    fn test_cipher_suite_parameters() {
        assert_eq!(CipherSuite::Aes128GcmSha256.key_length(), 16);
        assert_eq!(CipherSuite::Aes256GcmSha384.key_length(), 32);
        assert_eq!(
            CipherSuite::Aes256GcmSha384.hash_algorithm(),
            HashAlgorithm::Sha384
        );
        assert_eq!(CipherSuite::ChaCha20Poly1305Sha256.iv_length(), 12);
        assert_eq!(CipherSuite::Aes256GcmSha384.tag_length(), 16);
        assert_eq!(CipherSuite::ChaCha20Poly1305Sha256.tag_length(), 16);
    }

    #[test]
    fn test_select_suite_lengths() {
        let provider: Arc<dyn CryptoProvider> = Arc::new(MockCryptoProvider::new());
        let suite = select_suite(provider, CipherSuite::Aes256GcmSha384).unwrap();
        assert_eq!(suite.hash_len(), 48);
        assert_eq!(suite.key_len(), 32);
        assert_eq!(suite.tag_len(), 16);
        assert_eq!(suite.hash(b"").unwrap().len(), 48);
    }

    #[test]
    fn test_suite_hmac_verify() {
        let provider: Arc<dyn CryptoProvider> = Arc::new(MockCryptoProvider::new());
        let suite = select_suite(provider, CipherSuite::Aes128GcmSha256).unwrap();
        let tag = suite.hmac(b"key", b"data").unwrap();
        assert!(suite.verify_hmac(b"key", b"data", &tag).unwrap());
        assert!(!suite.verify_hmac(b"key", b"datA", &tag).unwrap());
    }
}
