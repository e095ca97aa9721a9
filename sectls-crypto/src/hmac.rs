//! Keyed MAC used for Finished, binders, cookies and HKDF.

use crate::HashAlgorithm;

/// A running HMAC computation, keyed when the provider creates it.
///
/// One instance produces one tag. `finalize` and `verify` take the box, so a
/// keyed state can never be reused for a second message by mistake.
///
/// ```rust,ignore
/// let mut mac = provider.hmac(HashAlgorithm::Sha256, &finished_key)?;
/// mac.update(&transcript_hash);
/// let verify_data = mac.finalize();
/// ```
pub trait Hmac: Send {
    /// Append message bytes.
    fn update(&mut self, data: &[u8]);

    /// The tag, `output_size()` bytes long.
    fn finalize(self: Box<Self>) -> Vec<u8>;

    /// Compare against `tag` in constant time. A length mismatch takes the
    /// same comparison path as a content mismatch.
    fn verify(self: Box<Self>, tag: &[u8]) -> bool {
        use subtle::ConstantTimeEq;
        let computed = self.finalize();
        computed.ct_eq(tag).into()
    }

    /// Underlying hash.
    fn algorithm(&self) -> HashAlgorithm;

    /// Tag length, equal to the hash output length.
    fn output_size(&self) -> usize {
        self.algorithm().output_size()
    }
}
