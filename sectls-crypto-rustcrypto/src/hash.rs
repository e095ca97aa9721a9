//! Hash function implementations using `sha2`.

use sectls_crypto::{Hash, HashAlgorithm, Result};
use sha2::{Digest, Sha256, Sha384};

/// Create a hash instance for the specified algorithm.
pub fn create_hash(algorithm: HashAlgorithm) -> Result<Box<dyn Hash>> {
    match algorithm {
        HashAlgorithm::Sha256 => Ok(Box::new(Sha2Hash::<Sha256>::new(algorithm))),
        HashAlgorithm::Sha384 => Ok(Box::new(Sha2Hash::<Sha384>::new(algorithm))),
    }
}

/// SHA-2 hash context.
///
/// `fork` clones the running state, which the transcript hash uses to read
/// intermediate digests.
#[derive(Clone)]
struct Sha2Hash<D> {
    hasher: D,
    algorithm: HashAlgorithm,
}

impl<D: Digest> Sha2Hash<D> {
    fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            hasher: D::new(),
            algorithm,
        }
    }
}

impl<D> Hash for Sha2Hash<D>
where
    D: Digest + Clone + Send + Sync + 'static,
{
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.hasher.finalize().to_vec()
    }

    fn fork(&self) -> Box<dyn Hash> {
        Box::new(self.clone())
    }

    fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        let hash = create_hash(HashAlgorithm::Sha256).unwrap();
        assert_eq!(
            hex::encode(hash.finalize()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fork_is_independent() {
        let mut hash = create_hash(HashAlgorithm::Sha384).unwrap();
        hash.update(b"abc");
        let fork = hash.fork();
        hash.update(b"def");
        let forked = fork.finalize();
        let full = hash.finalize();
        assert_ne!(forked, full);

        let mut reference = create_hash(HashAlgorithm::Sha384).unwrap();
        reference.update(b"abc");
        assert_eq!(reference.finalize(), forked);
    }
}
