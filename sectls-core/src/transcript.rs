//! Transcript hash management for TLS 1.3 handshakes.
//!
//! The transcript hash is a running hash of all handshake messages exchanged
//! between client and server (RFC 8446 Section 4.4.1). It is used for:
//! - Deriving handshake and application traffic secrets
//! - Computing Finished verify data and CertificateVerify content
//! - PSK binders over a partial ClientHello
//!
//! Until the cipher suite is known the transcript runs one context per
//! candidate hash algorithm; [`TranscriptHash::collapse`] keeps only the
//! negotiated one.

use crate::error::{Error, Result};
use crate::protocol::HandshakeType;
use sectls_crypto::{CryptoProvider, Hash, HashAlgorithm};
use std::fmt;
use std::sync::Arc;

/// Running transcript hash.
///
/// # Example
/// ```rust,ignore
/// let mut transcript = TranscriptHash::new(provider, &[HashAlgorithm::Sha256])?;
/// transcript.update(&client_hello);
/// transcript.update(&server_hello);
/// let hash = transcript.current_hash()?;
/// ```
pub struct TranscriptHash {
    provider: Arc<dyn CryptoProvider>,
    contexts: Vec<Box<dyn Hash>>,
}

impl fmt::Debug for TranscriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithms: Vec<HashAlgorithm> = self.contexts.iter().map(|c| c.algorithm()).collect();
        f.debug_struct("TranscriptHash")
            .field("algorithms", &algorithms)
            .finish()
    }
}

impl TranscriptHash {
    /// Start an empty transcript with one context per candidate algorithm.
    pub fn new(provider: Arc<dyn CryptoProvider>, algorithms: &[HashAlgorithm]) -> Result<Self> {
        let mut contexts: Vec<Box<dyn Hash>> = Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            if contexts.iter().all(|c| c.algorithm() != algorithm) {
                contexts.push(provider.hash(algorithm)?);
            }
        }
        if contexts.is_empty() {
            return Err(Error::InternalError("transcript without hash".into()));
        }
        Ok(Self { provider, contexts })
    }

    /// Keep only the context for `algorithm`.
    pub fn collapse(&mut self, algorithm: HashAlgorithm) -> Result<()> {
        self.contexts.retain(|c| c.algorithm() == algorithm);
        if self.contexts.is_empty() {
            return Err(Error::InternalError(format!(
                "transcript has no {} context",
                algorithm.name()
            )));
        }
        Ok(())
    }

    /// Whether the transcript is down to a single algorithm.
    pub fn is_collapsed(&self) -> bool {
        self.contexts.len() == 1
    }

    /// The single algorithm, once collapsed.
    pub fn algorithm(&self) -> Result<HashAlgorithm> {
        Ok(self.single()?.algorithm())
    }

    /// Append an encoded handshake message (header included).
    pub fn update(&mut self, message: &[u8]) {
        for ctx in &mut self.contexts {
            ctx.update(message);
        }
    }

    /// Hash of everything appended so far.
    pub fn current_hash(&self) -> Result<Vec<u8>> {
        Ok(self.single()?.fork().finalize())
    }

    /// Hash of the transcript followed by `partial`, without mutating the
    /// transcript.
    pub fn hash_with(&self, partial: &[u8]) -> Result<Vec<u8>> {
        self.hash_with_algorithm(self.algorithm()?, partial)
    }

    /// Like [`hash_with`](Self::hash_with), for a specific candidate
    /// algorithm before the transcript is collapsed.
    pub fn hash_with_algorithm(&self, algorithm: HashAlgorithm, partial: &[u8]) -> Result<Vec<u8>> {
        let ctx = self
            .contexts
            .iter()
            .find(|c| c.algorithm() == algorithm)
            .ok_or_else(|| Error::InternalError("hash algorithm not tracked".into()))?;
        let mut fork = ctx.fork();
        fork.update(partial);
        Ok(fork.finalize())
    }

    /// Independent copy of the transcript.
    pub fn fork(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            contexts: self.contexts.iter().map(|c| c.fork()).collect(),
        }
    }

    /// Replace ClientHello1 with the synthetic `message_hash` message
    /// (RFC 8446 Section 4.4.1). Returns the ClientHello1 digest.
    pub fn replace_with_message_hash(&mut self) -> Result<Vec<u8>> {
        let digest = self.current_hash()?;
        self.restore_from_digest(self.algorithm()?, &digest)?;
        Ok(digest)
    }

    /// Reset the transcript to `message_hash(digest)`. Used by a stateless
    /// server that recovers the ClientHello1 digest from a retry cookie.
    pub fn restore_from_digest(&mut self, algorithm: HashAlgorithm, digest: &[u8]) -> Result<()> {
        if digest.len() != algorithm.output_size() {
            return Err(Error::InternalError("message_hash digest length".into()));
        }
        let mut ctx = self.provider.hash(algorithm)?;
        ctx.update(&message_hash_header(digest.len()));
        ctx.update(digest);
        self.contexts = vec![ctx];
        Ok(())
    }

    fn single(&self) -> Result<&dyn Hash> {
        match self.contexts.as_slice() {
            [ctx] => Ok(ctx.as_ref()),
            _ => Err(Error::InternalError(
                "transcript hash algorithm not fixed".into(),
            )),
        }
    }
}

/// Header of the synthetic message_hash handshake message.
pub fn message_hash_header(digest_len: usize) -> [u8; 4] {
    [HandshakeType::MessageHash.to_u8(), 0, 0, digest_len as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectls_crypto_mock::MockCryptoProvider;

    fn provider() -> Arc<dyn CryptoProvider> {
        Arc::new(MockCryptoProvider::new())
    }

    #[test]
    fn test_empty_sha256() {
        let transcript = TranscriptHash::new(provider(), &[HashAlgorithm::Sha256]).unwrap();
        assert_eq!(
            hex::encode(transcript.current_hash().unwrap()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_requires_collapse() {
        let mut transcript = TranscriptHash::new(
            provider(),
            &[HashAlgorithm::Sha256, HashAlgorithm::Sha384],
        )
        .unwrap();
        transcript.update(b"client hello");
        assert!(transcript.current_hash().is_err());

        let sha384 = transcript
            .hash_with_algorithm(HashAlgorithm::Sha384, b"")
            .unwrap();
        transcript.collapse(HashAlgorithm::Sha384).unwrap();
        assert_eq!(transcript.current_hash().unwrap(), sha384);
    }

    #[test]
    fn test_hash_with_does_not_mutate() {
        let mut transcript = TranscriptHash::new(provider(), &[HashAlgorithm::Sha256]).unwrap();
        transcript.update(b"abc");
        let before = transcript.current_hash().unwrap();
        let with = transcript.hash_with(b"def").unwrap();
        assert_eq!(transcript.current_hash().unwrap(), before);

        transcript.update(b"def");
        assert_eq!(transcript.current_hash().unwrap(), with);
    }

    #[test]
    fn test_fork_is_independent() {
        let mut transcript = TranscriptHash::new(provider(), &[HashAlgorithm::Sha256]).unwrap();
        transcript.update(b"abc");
        let mut fork = transcript.fork();
        fork.update(b"more");
        assert_ne!(fork.current_hash().unwrap(), transcript.current_hash().unwrap());
    }

    #[test]
    fn test_message_hash_substitution() {
        let p = provider();
        let mut transcript = TranscriptHash::new(p.clone(), &[HashAlgorithm::Sha256]).unwrap();
        transcript.update(b"client hello 1");
        let digest = transcript.replace_with_message_hash().unwrap();
        assert_eq!(digest, p.digest(HashAlgorithm::Sha256, b"client hello 1").unwrap());

        let mut expected = vec![254, 0, 0, 32];
        expected.extend_from_slice(&digest);
        assert_eq!(
            transcript.current_hash().unwrap(),
            p.digest(HashAlgorithm::Sha256, &expected).unwrap()
        );

        let mut restored = TranscriptHash::new(p, &[HashAlgorithm::Sha256]).unwrap();
        restored
            .restore_from_digest(HashAlgorithm::Sha256, &digest)
            .unwrap();
        assert_eq!(
            restored.current_hash().unwrap(),
            transcript.current_hash().unwrap()
        );
    }
}
