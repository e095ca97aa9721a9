//! Signing and verification for CertificateVerify.
//!
//! The handshake builds the signed content (64 spaces, context string,
//! transcript hash) itself. A [`Signature`] implementation only sees opaque
//! message bytes and raw key encodings.

use crate::{Error, Result};
use zeroize::Zeroize;

/// `SignatureScheme` values this crate can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// ecdsa_secp256r1_sha256
    EcdsaSecp256r1Sha256,
    /// ecdsa_secp384r1_sha384
    EcdsaSecp384r1Sha384,
    /// ed25519
    Ed25519,
    /// rsa_pss_rsae_sha256
    RsaPssRsaeSha256,
}

const SCHEMES: [(SignatureAlgorithm, u16, &str); 4] = [
    (SignatureAlgorithm::EcdsaSecp256r1Sha256, 0x0403, "ecdsa_secp256r1_sha256"),
    (SignatureAlgorithm::EcdsaSecp384r1Sha384, 0x0503, "ecdsa_secp384r1_sha384"),
    (SignatureAlgorithm::Ed25519, 0x0807, "ed25519"),
    (SignatureAlgorithm::RsaPssRsaeSha256, 0x0804, "rsa_pss_rsae_sha256"),
];

impl SignatureAlgorithm {
    /// Codepoint in `signature_algorithms` and CertificateVerify.
    pub const fn to_u16(self) -> u16 {
        SCHEMES[self as usize].1
    }

    /// `None` for schemes this crate does not negotiate, including every
    /// TLS 1.2-only scheme such as rsa_pkcs1_sha256.
    pub fn from_u16(value: u16) -> Option<Self> {
        SCHEMES
            .iter()
            .find(|(_, code, _)| *code == value)
            .map(|(scheme, _, _)| *scheme)
    }

    /// IANA name, used in logs and error messages.
    pub const fn name(self) -> &'static str {
        SCHEMES[self as usize].2
    }
}

/// Private signing key in the backend's encoding. Wiped on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SigningKey {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey({} bytes, redacted)", self.bytes.len())
    }
}

impl SigningKey {
    /// Take ownership of an encoded private key.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encoded private key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Public key as carried in a certificate or raw public key entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyingKey {
    bytes: Vec<u8>,
}

impl VerifyingKey {
    /// Wrap an encoded public key.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encoded public key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One signature scheme.
pub trait Signature: Send + Sync {
    /// Sign `message`. A key held by an asynchronous backend may answer
    /// `Pending`; repeat the call with identical arguments.
    fn sign(&self, signing_key: &[u8], message: &[u8]) -> Result<Vec<u8>>;

    /// `Ok(())` only for a valid signature. Otherwise `InvalidPublicKey` for
    /// a key that does not decode, `SignatureVerificationFailed` for a
    /// mismatch, or `Pending` while an asynchronous backend works.
    fn verify(&self, verifying_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()>;

    /// Scheme implemented by this instance.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Fresh key pair. Backends without key generation keep this default.
    fn generate_keypair(&self) -> Result<(SigningKey, VerifyingKey)> {
        Err(Error::UnsupportedAlgorithm(format!(
            "key generation for {}",
            self.algorithm().name()
        )))
    }
}
