//! Operating system random number generation.

use rand_core::{OsRng, RngCore};
use sectls_crypto::{Error, Random, Result};

/// Random number generator backed by the OS entropy source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl Random for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|_| Error::RandomGenerationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_generation() {
        let rng = OsRandom;
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];
        rng.fill(&mut buf1).unwrap();
        rng.fill(&mut buf2).unwrap();

        assert_ne!(buf1, [0u8; 32]);
        assert_ne!(buf1, buf2);
    }
}
