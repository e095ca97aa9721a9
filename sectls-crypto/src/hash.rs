//! Hash function interface.

use crate::kdf::KdfAlgorithm;

/// Hash algorithms usable by TLS 1.3 cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256 (32 bytes output)
    Sha256,
    /// SHA-384 (48 bytes output)
    Sha384,
}

impl HashAlgorithm {
    /// Get the output size in bytes for this hash algorithm.
    pub const fn output_size(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }

    /// Get the name of this algorithm.
    pub const fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
        }
    }

    /// Get the HKDF variant built on this hash function.
    pub const fn to_kdf_algorithm(self) -> KdfAlgorithm {
        match self {
            HashAlgorithm::Sha256 => KdfAlgorithm::HkdfSha256,
            HashAlgorithm::Sha384 => KdfAlgorithm::HkdfSha384,
        }
    }
}

/// Incremental hash context.
///
/// # Example
///
/// ```rust,ignore
/// use sectls_crypto::Hash;
///
/// fn hash_example(mut hash: Box<dyn Hash>) -> Vec<u8> {
///     hash.update(b"Hello, ");
///     hash.update(b"world!");
///     hash.finalize()
/// }
/// ```
pub trait Hash: Send + Sync {
    /// Update the hash state with more data.
    fn update(&mut self, data: &[u8]);

    /// Finalize the hash and return the digest, consuming the context.
    fn finalize(self: Box<Self>) -> Vec<u8>;

    /// Clone the running state into an independent context.
    ///
    /// Transcript hashing relies on this to read intermediate digests
    /// without ending the running hash.
    fn fork(&self) -> Box<dyn Hash>;

    /// Get the algorithm this hash implements.
    fn algorithm(&self) -> HashAlgorithm;

    /// Get the output size in bytes for this hash function.
    fn output_size(&self) -> usize {
        self.algorithm().output_size()
    }
}
