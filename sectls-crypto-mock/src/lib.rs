//! # Mock Cryptography Provider
//!
//! A deterministic [`CryptoProvider`] for exercising the SecTLS state
//! machines without real public-key cryptography.
//!
//! - **Hash / HMAC / HKDF** are the real SHA-2 constructions, so key schedule
//!   outputs match RFC 8446 test vectors.
//! - **AEAD** is a SHA-256 keystream XOR with a truncated HMAC-SHA256 tag.
//!   It is deterministic, length preserving, and detects any tampering.
//! - **Signatures** are `HMAC-SHA256(key, message)`; the signing key and the
//!   verifying key are the same bytes.
//! - **Key exchange** derives `public = H(label || private)` and
//!   `shared = H(min(pub_a, pub_b) || max(pub_a, pub_b))`.
//! - **Random** is a seeded counter generator.
//!
//! Every asynchronous-capable operation (`sign`, `verify`, `seal`, `open`)
//! can be told to report [`Error::Pending`] a fixed number of times through
//! [`PendingPlan`].
//!
//! Nothing here is secure. It exists for tests and benchmarks only.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

use sectls_crypto::{
    Aead, AeadAlgorithm, CryptoProvider, Error, Hash, HashAlgorithm, Hmac, Kdf, KdfAlgorithm,
    KeyExchange, KeyExchangeAlgorithm, PrivateKey, PublicKey, Random, Result, SharedSecret,
    Signature, SignatureAlgorithm, SigningKey, VerifyingKey,
};
use sectls_crypto_rustcrypto::RustCryptoProvider;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use subtle::ConstantTimeEq;

const MOCK_TAG_LEN: usize = 16;

/// Number of upcoming calls per operation that should report `Pending`.
#[derive(Debug, Default)]
pub struct PendingPlan {
    signs: AtomicUsize,
    verifies: AtomicUsize,
    seals: AtomicUsize,
    opens: AtomicUsize,
    reported: AtomicUsize,
}

impl PendingPlan {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check(&self, counter: &AtomicUsize) -> Result<()> {
        if Self::take(counter) {
            self.reported.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Pending);
        }
        Ok(())
    }

    /// Total number of `Pending` results handed out so far.
    pub fn reported(&self) -> usize {
        self.reported.load(Ordering::SeqCst)
    }
}

/// Deterministic provider for tests.
#[derive(Debug)]
pub struct MockCryptoProvider {
    hashes: RustCryptoProvider,
    random: CounterRandom,
    pending: Arc<PendingPlan>,
}

impl Default for MockCryptoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCryptoProvider {
    /// Create a provider with the default seed.
    pub fn new() -> Self {
        Self::with_seed(0x5ec7_15)
    }

    /// Create a provider whose random stream is derived from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            hashes: RustCryptoProvider::new(),
            random: CounterRandom::new(seed),
            pending: Arc::new(PendingPlan::default()),
        }
    }

    /// Make the next `n` signing operations report `Pending`.
    pub fn pend_signs(&self, n: usize) {
        self.pending.signs.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` verification operations report `Pending`.
    pub fn pend_verifies(&self, n: usize) {
        self.pending.verifies.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` AEAD seal operations report `Pending`.
    pub fn pend_seals(&self, n: usize) {
        self.pending.seals.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` AEAD open operations report `Pending`.
    pub fn pend_opens(&self, n: usize) {
        self.pending.opens.store(n, Ordering::SeqCst);
    }

    /// Shared pending bookkeeping.
    pub fn pending(&self) -> &PendingPlan {
        &self.pending
    }

    /// Generate a mock signing credential. The verifying key equals the
    /// signing key.
    pub fn credential(&self) -> Result<(SigningKey, VerifyingKey)> {
        let key = self.random.generate(32)?;
        Ok((
            SigningKey::from_bytes(key.clone()),
            VerifyingKey::from_bytes(key),
        ))
    }
}

impl CryptoProvider for MockCryptoProvider {
    fn aead(&self, algorithm: AeadAlgorithm) -> Result<Box<dyn Aead>> {
        Ok(Box::new(MockAead {
            algorithm,
            pending: self.pending.clone(),
        }))
    }

    fn hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn Hash>> {
        self.hashes.hash(algorithm)
    }

    fn hmac(&self, algorithm: HashAlgorithm, key: &[u8]) -> Result<Box<dyn Hmac>> {
        self.hashes.hmac(algorithm, key)
    }

    fn kdf(&self, algorithm: KdfAlgorithm) -> Result<Box<dyn Kdf>> {
        self.hashes.kdf(algorithm)
    }

    fn random(&self) -> &dyn Random {
        &self.random
    }

    fn key_exchange(&self, algorithm: KeyExchangeAlgorithm) -> Result<Box<dyn KeyExchange>> {
        Ok(Box::new(MockKeyExchange {
            algorithm,
            random: self.random.clone(),
        }))
    }

    fn signature(&self, algorithm: SignatureAlgorithm) -> Result<Box<dyn Signature>> {
        Ok(Box::new(MockSignature {
            algorithm,
            pending: self.pending.clone(),
            random: self.random.clone(),
        }))
    }
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn mock_mac(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update((key.len() as u32).to_be_bytes());
    hasher.update(key);
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Seeded counter-mode generator: block `i` is `SHA-256(seed || i)`.
#[derive(Debug, Clone)]
pub struct CounterRandom {
    seed: u64,
    counter: Arc<AtomicU64>,
}

impl CounterRandom {
    /// Create a generator from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Random for CounterRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        for chunk in dest.chunks_mut(32) {
            let i = self.counter.fetch_add(1, Ordering::SeqCst);
            let block = sha256(&[&self.seed.to_be_bytes(), &i.to_be_bytes()]);
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MockAead {
    algorithm: AeadAlgorithm,
    pending: Arc<PendingPlan>,
}

impl MockAead {
    fn check_params(&self, key: &[u8], nonce: &[u8]) -> Result<()> {
        if key.len() != self.algorithm.key_size() {
            return Err(Error::InvalidKeySize {
                expected: self.algorithm.key_size(),
                actual: key.len(),
            });
        }
        if nonce.len() != self.algorithm.nonce_size() {
            return Err(Error::InvalidNonceSize {
                expected: self.algorithm.nonce_size(),
                actual: nonce.len(),
            });
        }
        Ok(())
    }

    fn apply_keystream(key: &[u8], nonce: &[u8], data: &mut [u8]) {
        for (i, chunk) in data.chunks_mut(32).enumerate() {
            let block = sha256(&[key, nonce, &(i as u64).to_be_bytes()]);
            for (byte, k) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= k;
            }
        }
    }

    fn tag(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Vec<u8> {
        let mut tag = mock_mac(key, &[nonce, aad, ciphertext]);
        tag.truncate(MOCK_TAG_LEN);
        tag
    }
}

impl Aead for MockAead {
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_params(key, nonce)?;
        self.pending.check(&self.pending.seals)?;
        let mut out = plaintext.to_vec();
        Self::apply_keystream(key, nonce, &mut out);
        let tag = Self::tag(key, nonce, aad, &out);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_params(key, nonce)?;
        self.pending.check(&self.pending.opens)?;
        if ciphertext.len() < MOCK_TAG_LEN {
            return Err(Error::AuthenticationFailed);
        }
        let (body, tag) = ciphertext.split_at(ciphertext.len() - MOCK_TAG_LEN);
        let expected = Self::tag(key, nonce, aad, body);
        if !bool::from(expected.ct_eq(tag)) {
            return Err(Error::AuthenticationFailed);
        }
        let mut out = body.to_vec();
        Self::apply_keystream(key, nonce, &mut out);
        Ok(out)
    }

    fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }
}

#[derive(Debug)]
struct MockSignature {
    algorithm: SignatureAlgorithm,
    pending: Arc<PendingPlan>,
    random: CounterRandom,
}

impl Signature for MockSignature {
    fn sign(&self, signing_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        if signing_key.is_empty() {
            return Err(Error::InvalidPrivateKey);
        }
        self.pending.check(&self.pending.signs)?;
        Ok(mock_mac(signing_key, &[&self.algorithm.to_u16().to_be_bytes(), message]))
    }

    fn verify(&self, verifying_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
        if verifying_key.is_empty() {
            return Err(Error::InvalidPublicKey);
        }
        self.pending.check(&self.pending.verifies)?;
        let expected = mock_mac(verifying_key, &[&self.algorithm.to_u16().to_be_bytes(), message]);
        if bool::from(expected.ct_eq(signature)) {
            Ok(())
        } else {
            Err(Error::SignatureVerificationFailed)
        }
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    fn generate_keypair(&self) -> Result<(SigningKey, VerifyingKey)> {
        let key = self.random.generate(32)?;
        Ok((
            SigningKey::from_bytes(key.clone()),
            VerifyingKey::from_bytes(key),
        ))
    }
}

#[derive(Debug)]
struct MockKeyExchange {
    algorithm: KeyExchangeAlgorithm,
    random: CounterRandom,
}

impl MockKeyExchange {
    fn public_for(&self, private: &[u8]) -> Vec<u8> {
        let mut public = Vec::with_capacity(self.algorithm.public_key_size());
        let mut i = 0u8;
        while public.len() < self.algorithm.public_key_size() {
            public.extend_from_slice(&sha256(&[b"mock kex public", &[i], private]));
            i = i.wrapping_add(1);
        }
        public.truncate(self.algorithm.public_key_size());
        public
    }
}

impl KeyExchange for MockKeyExchange {
    fn generate_keypair(&self) -> Result<(PrivateKey, PublicKey)> {
        let private = self.random.generate(32)?;
        let public = self.public_for(&private);
        Ok((PrivateKey::from_bytes(private), PublicKey::from_bytes(public)))
    }

    fn exchange(&self, private_key: &PrivateKey, peer_public_key: &[u8]) -> Result<SharedSecret> {
        if peer_public_key.len() != self.algorithm.public_key_size() {
            return Err(Error::InvalidPublicKey);
        }
        let own = self.public_for(private_key.as_bytes());
        let (low, high) = if own.as_slice() <= peer_public_key {
            (own.as_slice(), peer_public_key)
        } else {
            (peer_public_key, own.as_slice())
        };
        let mut shared = sha256(&[b"mock kex shared", low, high]).to_vec();
        shared.resize(self.algorithm.shared_secret_size(), 0x5a);
        Ok(SharedSecret::from_bytes(shared))
    }

    fn algorithm(&self) -> KeyExchangeAlgorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_is_deterministic_per_seed() {
        let a = MockCryptoProvider::with_seed(7);
        let b = MockCryptoProvider::with_seed(7);
        assert_eq!(
            a.random().generate(48).unwrap(),
            b.random().generate(48).unwrap()
        );
        assert_ne!(
            a.random().generate(16).unwrap(),
            MockCryptoProvider::with_seed(8).random().generate(16).unwrap()
        );
    }

    #[test]
    fn test_aead_roundtrip_and_tamper() {
        let provider = MockCryptoProvider::new();
        let aead = provider.aead(AeadAlgorithm::Aes128Gcm).unwrap();
        let key = [3u8; 16];
        let nonce = [9u8; 12];
        let mut sealed = aead.seal(&key, &nonce, b"aad", b"hello mock").unwrap();
        assert_eq!(sealed.len(), 10 + MOCK_TAG_LEN);
        assert_eq!(aead.open(&key, &nonce, b"aad", &sealed).unwrap(), b"hello mock");

        sealed[2] ^= 1;
        assert_eq!(
            aead.open(&key, &nonce, b"aad", &sealed),
            Err(Error::AuthenticationFailed)
        );
    }

    #[test]
    fn test_key_exchange_agrees() {
        let provider = MockCryptoProvider::new();
        let kex = provider.key_exchange(KeyExchangeAlgorithm::Secp256r1).unwrap();
        let (a, a_pub) = kex.generate_keypair().unwrap();
        let (b, b_pub) = kex.generate_keypair().unwrap();
        assert_eq!(a_pub.as_bytes().len(), 65);
        assert_eq!(
            kex.exchange(&a, b_pub.as_bytes()).unwrap().as_bytes(),
            kex.exchange(&b, a_pub.as_bytes()).unwrap().as_bytes()
        );
    }

    #[test]
    fn test_signature_pending_then_ready() {
        let provider = MockCryptoProvider::new();
        let sig = provider.signature(SignatureAlgorithm::Ed25519).unwrap();
        let (signing, verifying) = provider.credential().unwrap();

        provider.pend_signs(1);
        assert_eq!(sig.sign(signing.as_bytes(), b"m"), Err(Error::Pending));
        let signature = sig.sign(signing.as_bytes(), b"m").unwrap();
        assert!(sig.verify(verifying.as_bytes(), b"m", &signature).is_ok());
        assert_eq!(provider.pending().reported(), 1);
    }
}
