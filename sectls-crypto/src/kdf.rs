//! Key Derivation Function (KDF) interface.

use crate::{HashAlgorithm, Result};

/// KDF algorithms used by the TLS 1.3 key schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KdfAlgorithm {
    /// HKDF with SHA-256
    HkdfSha256,
    /// HKDF with SHA-384
    HkdfSha384,
}

impl KdfAlgorithm {
    /// Get the underlying hash algorithm.
    pub const fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            KdfAlgorithm::HkdfSha256 => HashAlgorithm::Sha256,
            KdfAlgorithm::HkdfSha384 => HashAlgorithm::Sha384,
        }
    }

    /// Get the name of this KDF algorithm.
    pub const fn name(self) -> &'static str {
        match self {
            KdfAlgorithm::HkdfSha256 => "HKDF-SHA256",
            KdfAlgorithm::HkdfSha384 => "HKDF-SHA384",
        }
    }
}

/// HKDF (RFC 5869).
///
/// - Extract: `HKDF-Extract(salt, IKM) -> PRK`
/// - Expand: `HKDF-Expand(PRK, info, length) -> OKM`
///
/// The TLS 1.3 `HkdfLabel` framing is built by the caller; this trait only
/// exposes the raw primitive.
pub trait Kdf: Send + Sync {
    /// HKDF-Extract. An empty salt is treated as `HashLen` zero bytes.
    fn extract(&self, salt: &[u8], ikm: &[u8]) -> Vec<u8>;

    /// HKDF-Expand.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLength` if `length` exceeds `255 * HashLen` or the
    /// PRK is shorter than `HashLen`.
    fn expand(&self, prk: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>>;

    /// Get the KDF algorithm.
    fn algorithm(&self) -> KdfAlgorithm;

    /// Get the output size of the underlying hash function.
    fn hash_output_size(&self) -> usize {
        self.algorithm().hash_algorithm().output_size()
    }
}
