//! AEAD cipher implementations using `aes-gcm` and `chacha20poly1305`.

use aes_gcm::aead::{Aead as _, KeyInit, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use sectls_crypto::{Aead, AeadAlgorithm, Error, Result};

/// Create an AEAD cipher instance for the specified algorithm.
pub fn create_aead(algorithm: AeadAlgorithm) -> Result<Box<dyn Aead>> {
    Ok(Box::new(RustCryptoAead { algorithm }))
}

/// AEAD cipher dispatching to the RustCrypto implementation of `algorithm`.
///
/// The cipher instance is keyed per call; the record layer owns the key
/// material and this type holds nothing secret.
#[derive(Debug)]
struct RustCryptoAead {
    algorithm: AeadAlgorithm,
}

impl RustCryptoAead {
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
}

fn seal_with<C>(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + aes_gcm::aead::Aead,
{
    let cipher = C::new_from_slice(key).map_err(|_| Error::InvalidKeySize {
        expected: C::key_size(),
        actual: key.len(),
    })?;
    cipher
        .encrypt(
            Nonce::<C>::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::CryptoError("AEAD encryption failed".into()))
}

fn open_with<C>(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + aes_gcm::aead::Aead,
{
    let cipher = C::new_from_slice(key).map_err(|_| Error::InvalidKeySize {
        expected: C::key_size(),
        actual: key.len(),
    })?;
    cipher
        .decrypt(
            Nonce::<C>::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::AuthenticationFailed)
}

impl Aead for RustCryptoAead {
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_params(key, nonce)?;
        match self.algorithm {
            AeadAlgorithm::Aes128Gcm => seal_with::<Aes128Gcm>(key, nonce, aad, plaintext),
            AeadAlgorithm::Aes256Gcm => seal_with::<Aes256Gcm>(key, nonce, aad, plaintext),
            AeadAlgorithm::ChaCha20Poly1305 => {
                seal_with::<ChaCha20Poly1305>(key, nonce, aad, plaintext)
            },
        }
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_params(key, nonce)?;
        if ciphertext.len() < self.algorithm.tag_size() {
            return Err(Error::AuthenticationFailed);
        }
        match self.algorithm {
            AeadAlgorithm::Aes128Gcm => open_with::<Aes128Gcm>(key, nonce, aad, ciphertext),
            AeadAlgorithm::Aes256Gcm => open_with::<Aes256Gcm>(key, nonce, aad, ciphertext),
            AeadAlgorithm::ChaCha20Poly1305 => {
                open_with::<ChaCha20Poly1305>(key, nonce, aad, ciphertext)
            },
        }
    }

    fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(algorithm: AeadAlgorithm) {
        let aead = create_aead(algorithm).unwrap();
        let key = vec![0x11u8; algorithm.key_size()];
        let nonce = [0x22u8; 12];
        let sealed = aead.seal(&key, &nonce, b"header", b"attack at dawn").unwrap();
        assert_eq!(sealed.len(), 14 + 16);
        let opened = aead.open(&key, &nonce, b"header", &sealed).unwrap();
        assert_eq!(opened, b"attack at dawn");
    }

    #[test]
    fn test_all_algorithms_roundtrip() {
        roundtrip(AeadAlgorithm::Aes128Gcm);
        roundtrip(AeadAlgorithm::Aes256Gcm);
        roundtrip(AeadAlgorithm::ChaCha20Poly1305);
    }

    #[test]
    fn test_tampered_aad_fails() {
        let aead = create_aead(AeadAlgorithm::Aes128Gcm).unwrap();
        let key = [0x01u8; 16];
        let nonce = [0x02u8; 12];
        let sealed = aead.seal(&key, &nonce, b"aad", b"data").unwrap();
        assert_eq!(
            aead.open(&key, &nonce, b"aaX", &sealed),
            Err(Error::AuthenticationFailed)
        );
    }

    #[test]
    fn test_short_ciphertext_is_auth_failure() {
        let aead = create_aead(AeadAlgorithm::ChaCha20Poly1305).unwrap();
        let key = [0x01u8; 32];
        let nonce = [0x02u8; 12];
        assert_eq!(
            aead.open(&key, &nonce, b"", &[0u8; 5]),
            Err(Error::AuthenticationFailed)
        );
    }

    #[test]
    fn test_wrong_key_size_rejected() {
        let aead = create_aead(AeadAlgorithm::Aes256Gcm).unwrap();
        let err = aead.seal(&[0u8; 16], &[0u8; 12], b"", b"x").unwrap_err();
        assert_eq!(
            err,
            Error::InvalidKeySize {
                expected: 32,
                actual: 16
            }
        );
    }
}
