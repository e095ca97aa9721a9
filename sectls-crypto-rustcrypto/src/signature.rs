//! Digital signature implementations using `ed25519-dalek` and `p256`.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use sectls_crypto::{Error, Result, Signature, SignatureAlgorithm, SigningKey, VerifyingKey};

/// Create a signature instance for the specified algorithm.
pub fn create_signature(algorithm: SignatureAlgorithm) -> Result<Box<dyn Signature>> {
    match algorithm {
        SignatureAlgorithm::Ed25519 => Ok(Box::new(Ed25519Sig)),
        SignatureAlgorithm::EcdsaSecp256r1Sha256 => Ok(Box::new(EcdsaP256Sig)),
        SignatureAlgorithm::EcdsaSecp384r1Sha384 | SignatureAlgorithm::RsaPssRsaeSha256 => {
            Err(Error::UnsupportedAlgorithm(format!(
                "signature scheme {} not available",
                algorithm.name()
            )))
        },
    }
}

/// Ed25519 (RFC 8032). Keys are the raw 32-byte seed and public key.
#[derive(Debug)]
struct Ed25519Sig;

impl Signature for Ed25519Sig {
    fn sign(&self, signing_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        use ed25519_dalek::Signer;

        let seed: [u8; 32] = signing_key
            .try_into()
            .map_err(|_| Error::InvalidPrivateKey)?;
        let key = ed25519_dalek::SigningKey::from_bytes(&seed);
        Ok(key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, verifying_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
        let public: [u8; 32] = verifying_key
            .try_into()
            .map_err(|_| Error::InvalidPublicKey)?;
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(&public).map_err(|_| Error::InvalidPublicKey)?;
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| Error::SignatureVerificationFailed)?;
        key.verify_strict(message, &signature)
            .map_err(|_| Error::SignatureVerificationFailed)
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    fn generate_keypair(&self) -> Result<(SigningKey, VerifyingKey)> {
        let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        Ok((
            SigningKey::from_bytes(key.to_bytes().to_vec()),
            VerifyingKey::from_bytes(key.verifying_key().to_bytes().to_vec()),
        ))
    }
}

/// ECDSA over P-256 with SHA-256. Signatures are DER encoded, public keys
/// are SEC1 points.
#[derive(Debug)]
struct EcdsaP256Sig;

impl Signature for EcdsaP256Sig {
    fn sign(&self, signing_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        use p256::ecdsa::signature::Signer;

        let key = p256::ecdsa::SigningKey::from_slice(signing_key)
            .map_err(|_| Error::InvalidPrivateKey)?;
        let signature: p256::ecdsa::Signature = key.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn verify(&self, verifying_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
        use p256::ecdsa::signature::Verifier;

        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(verifying_key)
            .map_err(|_| Error::InvalidPublicKey)?;
        let signature = p256::ecdsa::Signature::from_der(signature)
            .map_err(|_| Error::SignatureVerificationFailed)?;
        key.verify(message, &signature)
            .map_err(|_| Error::SignatureVerificationFailed)
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaSecp256r1Sha256
    }

    fn generate_keypair(&self) -> Result<(SigningKey, VerifyingKey)> {
        let key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let public = key.verifying_key().to_encoded_point(false);
        Ok((
            SigningKey::from_bytes(key.to_bytes().to_vec()),
            VerifyingKey::from_bytes(public.as_bytes().to_vec()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_and_verify(algorithm: SignatureAlgorithm) {
        let sig = create_signature(algorithm).unwrap();
        let (signing, verifying) = sig.generate_keypair().unwrap();
        let signature = sig.sign(signing.as_bytes(), b"transcript").unwrap();

        assert!(sig
            .verify(verifying.as_bytes(), b"transcript", &signature)
            .is_ok());
        assert_eq!(
            sig.verify(verifying.as_bytes(), b"transcripT", &signature),
            Err(Error::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_ed25519() {
        sign_and_verify(SignatureAlgorithm::Ed25519);
    }

    #[test]
    fn test_ecdsa_p256() {
        sign_and_verify(SignatureAlgorithm::EcdsaSecp256r1Sha256);
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(create_signature(SignatureAlgorithm::RsaPssRsaeSha256).is_err());
    }
}
