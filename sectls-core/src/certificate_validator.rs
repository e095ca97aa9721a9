//! Peer certificate handling.
//!
//! Trust decisions are delegated to a [`CertificateValidator`]. The engine
//! only needs the verifying key of the end-entity certificate; it checks the
//! CertificateVerify signature itself.
//!
//! [`RawKeyValidator`] treats each certificate entry as a raw public key and
//! accepts it when it matches a pinned key. It is what the tests and the
//! benchmarks use; production deployments plug in an X.509 path validator.

use crate::error::{Error, Result};
use crate::messages::CertificateEntry;
use sectls_crypto::{SignatureAlgorithm, SigningKey, VerifyingKey};
use std::fmt;
use subtle::ConstantTimeEq;

/// What a validator learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Key that must have produced the CertificateVerify signature
    pub verifying_key: VerifyingKey,
    /// Scheme the key is used with
    pub scheme: SignatureAlgorithm,
    /// Raw chain, end-entity first
    pub chain: Vec<Vec<u8>>,
}

/// Pluggable chain validation.
pub trait CertificateValidator: Send + Sync + fmt::Debug {
    /// Validate the chain (end-entity first) and extract the peer key.
    ///
    /// Errors are reported to the peer as `bad_certificate`.
    fn validate_chain(&self, chain: &[CertificateEntry]) -> Result<PeerIdentity>;
}

/// A local certificate chain and the key that signs for it.
#[derive(Clone)]
pub struct CertifiedKey {
    /// Chain, end-entity first
    pub chain: Vec<Vec<u8>>,
    /// Private key
    pub signing_key: SigningKey,
    /// Scheme used for CertificateVerify
    pub scheme: SignatureAlgorithm,
}

impl CertifiedKey {
    /// Bundle a chain with its key.
    pub fn new(chain: Vec<Vec<u8>>, signing_key: SigningKey, scheme: SignatureAlgorithm) -> Self {
        Self {
            chain,
            signing_key,
            scheme,
        }
    }

    /// Credential whose single "certificate" is the raw public key.
    pub fn raw_public_key(
        signing_key: SigningKey,
        verifying_key: &VerifyingKey,
        scheme: SignatureAlgorithm,
    ) -> Self {
        Self::new(vec![verifying_key.as_bytes().to_vec()], signing_key, scheme)
    }
}

impl fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("chain_len", &self.chain.len())
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

/// Accepts end-entity entries that are pinned raw public keys.
#[derive(Debug, Clone)]
pub struct RawKeyValidator {
    scheme: SignatureAlgorithm,
    pinned: Vec<Vec<u8>>,
}

impl RawKeyValidator {
    /// Validator with no pins; every chain is rejected until one is added.
    pub fn new(scheme: SignatureAlgorithm) -> Self {
        Self {
            scheme,
            pinned: Vec::new(),
        }
    }

    /// Pin a key.
    pub fn with_pinned_key(mut self, key: &VerifyingKey) -> Self {
        self.pinned.push(key.as_bytes().to_vec());
        self
    }

    /// Number of pinned keys.
    pub fn pinned_len(&self) -> usize {
        self.pinned.len()
    }
}

impl CertificateValidator for RawKeyValidator {
    fn validate_chain(&self, chain: &[CertificateEntry]) -> Result<PeerIdentity> {
        let end_entity = chain
            .first()
            .ok_or_else(|| Error::BadCertificate("empty chain".into()))?;
        let trusted = self
            .pinned
            .iter()
            .any(|pin| bool::from(pin.as_slice().ct_eq(end_entity.data.as_slice())));
        if !trusted {
            return Err(Error::BadCertificate("key is not pinned".into()));
        }
        Ok(PeerIdentity {
            verifying_key: VerifyingKey::from_bytes(end_entity.data.clone()),
            scheme: self.scheme,
            chain: chain.iter().map(|entry| entry.data.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_key_accepted() {
        let key = VerifyingKey::from_bytes(vec![7; 32]);
        let validator = RawKeyValidator::new(SignatureAlgorithm::Ed25519).with_pinned_key(&key);
        let identity = validator
            .validate_chain(&[CertificateEntry::new(vec![7; 32])])
            .unwrap();
        assert_eq!(identity.verifying_key, key);
        assert_eq!(identity.scheme, SignatureAlgorithm::Ed25519);
    }

    #[test]
    fn test_unpinned_and_empty_rejected() {
        let validator = RawKeyValidator::new(SignatureAlgorithm::Ed25519)
            .with_pinned_key(&VerifyingKey::from_bytes(vec![7; 32]));
        assert!(matches!(
            validator.validate_chain(&[CertificateEntry::new(vec![8; 32])]),
            Err(Error::BadCertificate(_))
        ));
        assert!(matches!(
            validator.validate_chain(&[]),
            Err(Error::BadCertificate(_))
        ));
    }

    #[test]
    fn test_certified_key_debug_hides_key() {
        let key = CertifiedKey::raw_public_key(
            SigningKey::from_bytes(vec![0x42; 32]),
            &VerifyingKey::from_bytes(vec![1; 32]),
            SignatureAlgorithm::Ed25519,
        );
        assert!(!format!("{:?}", key).contains("66"));
        assert_eq!(key.chain, vec![vec![1; 32]]);
    }
}
