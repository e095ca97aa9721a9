//! AEAD (Authenticated Encryption with Associated Data) cipher interface.

use crate::Result;

/// AEAD cipher algorithms used by TLS 1.3 cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadAlgorithm {
    /// AES-128-GCM
    Aes128Gcm,
    /// AES-256-GCM
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Get the key size in bytes for this algorithm.
    pub const fn key_size(self) -> usize {
        match self {
            AeadAlgorithm::Aes128Gcm => 16,
            AeadAlgorithm::Aes256Gcm => 32,
            AeadAlgorithm::ChaCha20Poly1305 => 32,
        }
    }

    /// Get the nonce size in bytes for this algorithm.
    pub const fn nonce_size(self) -> usize {
        12
    }

    /// Get the authentication tag size in bytes for this algorithm.
    pub const fn tag_size(self) -> usize {
        16
    }

    /// Get the name of this algorithm as used in TLS.
    pub const fn name(self) -> &'static str {
        match self {
            AeadAlgorithm::Aes128Gcm => "AES_128_GCM",
            AeadAlgorithm::Aes256Gcm => "AES_256_GCM",
            AeadAlgorithm::ChaCha20Poly1305 => "CHACHA20_POLY1305",
        }
    }
}

/// AEAD cipher trait.
///
/// # Security Requirements
///
/// - Tag verification MUST be constant-time
/// - Nonces MUST NOT be reused with the same key
/// - `open` MUST NOT release any plaintext when the tag does not verify
pub trait Aead: Send + Sync {
    /// Encrypt and authenticate plaintext.
    ///
    /// Returns the ciphertext with the authentication tag appended.
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt and verify `ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` if the tag does not verify
    /// - `InvalidKeySize` / `InvalidNonceSize` on malformed parameters
    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Get the algorithm this cipher implements.
    fn algorithm(&self) -> AeadAlgorithm;

    /// Get the key size for this AEAD.
    fn key_size(&self) -> usize {
        self.algorithm().key_size()
    }

    /// Get the nonce size for this AEAD.
    fn nonce_size(&self) -> usize {
        self.algorithm().nonce_size()
    }

    /// Get the tag size for this AEAD.
    fn tag_size(&self) -> usize {
        self.algorithm().tag_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_sizes() {
        assert_eq!(AeadAlgorithm::Aes128Gcm.key_size(), 16);
        assert_eq!(AeadAlgorithm::Aes256Gcm.key_size(), 32);
        assert_eq!(AeadAlgorithm::ChaCha20Poly1305.key_size(), 32);
        assert_eq!(AeadAlgorithm::ChaCha20Poly1305.nonce_size(), 12);
        assert_eq!(AeadAlgorithm::Aes128Gcm.tag_size(), 16);
    }
}
