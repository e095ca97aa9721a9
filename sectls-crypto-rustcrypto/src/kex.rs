//! Key exchange implementations using `x25519-dalek` and `p256`.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use sectls_crypto::{
    Error, KeyExchange, KeyExchangeAlgorithm, PrivateKey, PublicKey, Result, SharedSecret,
};
use zeroize::Zeroizing;

/// Create a key exchange instance for the specified algorithm.
pub fn create_key_exchange(algorithm: KeyExchangeAlgorithm) -> Result<Box<dyn KeyExchange>> {
    match algorithm {
        KeyExchangeAlgorithm::X25519 => Ok(Box::new(X25519Kex)),
        KeyExchangeAlgorithm::Secp256r1 => Ok(Box::new(EcdhP256)),
        KeyExchangeAlgorithm::Secp384r1 => Err(Error::UnsupportedAlgorithm(format!(
            "key exchange {} not available",
            algorithm.name()
        ))),
    }
}

/// X25519 ECDH (RFC 7748).
#[derive(Debug)]
struct X25519Kex;

impl KeyExchange for X25519Kex {
    fn generate_keypair(&self) -> Result<(PrivateKey, PublicKey)> {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        let bytes = Zeroizing::new(secret.to_bytes());
        Ok((
            PrivateKey::from_bytes(bytes.to_vec()),
            PublicKey::from_bytes(public.as_bytes().to_vec()),
        ))
    }

    fn exchange(&self, private_key: &PrivateKey, peer_public_key: &[u8]) -> Result<SharedSecret> {
        let private: Zeroizing<[u8; 32]> = Zeroizing::new(
            private_key
                .as_bytes()
                .try_into()
                .map_err(|_| Error::InvalidPrivateKey)?,
        );
        let peer: [u8; 32] = peer_public_key
            .try_into()
            .map_err(|_| Error::InvalidPublicKey)?;

        let secret = x25519_dalek::StaticSecret::from(*private);
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));

        // RFC 8446 7.4.2: reject the all-zero value from low-order points
        if !shared.was_contributory() {
            return Err(Error::KeyExchangeFailed);
        }
        Ok(SharedSecret::from_bytes(shared.as_bytes().to_vec()))
    }

    fn algorithm(&self) -> KeyExchangeAlgorithm {
        KeyExchangeAlgorithm::X25519
    }
}

/// ECDH over NIST P-256 with uncompressed SEC1 key shares.
#[derive(Debug)]
struct EcdhP256;

impl KeyExchange for EcdhP256 {
    fn generate_keypair(&self) -> Result<(PrivateKey, PublicKey)> {
        let secret = p256::SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(false);
        Ok((
            PrivateKey::from_bytes(secret.to_bytes().to_vec()),
            PublicKey::from_bytes(public.as_bytes().to_vec()),
        ))
    }

    fn exchange(&self, private_key: &PrivateKey, peer_public_key: &[u8]) -> Result<SharedSecret> {
        let secret =
            p256::SecretKey::from_slice(private_key.as_bytes()).map_err(|_| Error::InvalidPrivateKey)?;
        let peer =
            p256::PublicKey::from_sec1_bytes(peer_public_key).map_err(|_| Error::InvalidPublicKey)?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        Ok(SharedSecret::from_bytes(shared.raw_secret_bytes().to_vec()))
    }

    fn algorithm(&self) -> KeyExchangeAlgorithm {
        KeyExchangeAlgorithm::Secp256r1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agree(algorithm: KeyExchangeAlgorithm) {
        let kex = create_key_exchange(algorithm).unwrap();
        let (a_priv, a_pub) = kex.generate_keypair().unwrap();
        let (b_priv, b_pub) = kex.generate_keypair().unwrap();
        assert_eq!(a_pub.as_bytes().len(), algorithm.public_key_size());

        let ab = kex.exchange(&a_priv, b_pub.as_bytes()).unwrap();
        let ba = kex.exchange(&b_priv, a_pub.as_bytes()).unwrap();
        assert_eq!(ab.as_bytes(), ba.as_bytes());
        assert_eq!(ab.as_bytes().len(), algorithm.shared_secret_size());
    }

    #[test]
    fn test_x25519_agreement() {
        agree(KeyExchangeAlgorithm::X25519);
    }

    #[test]
    fn test_p256_agreement() {
        agree(KeyExchangeAlgorithm::Secp256r1);
    }

    #[test]
    fn test_x25519_rejects_low_order_point() {
        let kex = create_key_exchange(KeyExchangeAlgorithm::X25519).unwrap();
        let (private, _) = kex.generate_keypair().unwrap();
        assert_eq!(
            kex.exchange(&private, &[0u8; 32]).unwrap_err(),
            Error::KeyExchangeFailed
        );
    }

    #[test]
    fn test_bad_share_length() {
        let kex = create_key_exchange(KeyExchangeAlgorithm::X25519).unwrap();
        let (private, _) = kex.generate_keypair().unwrap();
        assert_eq!(
            kex.exchange(&private, &[1u8; 31]).unwrap_err(),
            Error::InvalidPublicKey
        );
    }
}
