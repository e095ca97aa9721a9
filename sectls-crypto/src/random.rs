//! Randomness source for hello randoms, ticket nonces and key material.

use crate::Result;

/// Entropy handed out by a provider.
///
/// Real backends draw from the operating system. Only deterministic test
/// providers may do otherwise, and they must never ship in a release build.
pub trait Random: Send + Sync {
    /// Overwrite all of `dest`. On error the contents are unspecified.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;

    /// `len` fresh bytes, e.g. a ticket nonce or a cookie secret.
    fn generate(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Four bytes read big-endian. Used for `ticket_age_add`.
    fn next_u32(&self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }
}
