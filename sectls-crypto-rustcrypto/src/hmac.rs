//! HMAC implementations using the `hmac` crate.

use hmac::digest::KeyInit;
use hmac::{Hmac as HmacState, Mac};
use sectls_crypto::{Error, HashAlgorithm, Hmac, Result};
use sha2::{Sha256, Sha384};

/// Create an HMAC instance for the specified hash algorithm.
pub fn create_hmac(algorithm: HashAlgorithm, key: &[u8]) -> Result<Box<dyn Hmac>> {
    match algorithm {
        HashAlgorithm::Sha256 => Ok(Box::new(HmacImpl::<HmacState<Sha256>>::new(
            algorithm, key,
        )?)),
        HashAlgorithm::Sha384 => Ok(Box::new(HmacImpl::<HmacState<Sha384>>::new(
            algorithm, key,
        )?)),
    }
}

/// Incremental HMAC over a SHA-2 function.
struct HmacImpl<M> {
    mac: M,
    algorithm: HashAlgorithm,
}

impl<M: Mac + KeyInit> HmacImpl<M> {
    fn new(algorithm: HashAlgorithm, key: &[u8]) -> Result<Self> {
        let mac = <M as KeyInit>::new_from_slice(key)
            .map_err(|_| Error::Internal("HMAC rejected key".into()))?;
        Ok(Self { mac, algorithm })
    }
}

impl<M> Hmac for HmacImpl<M>
where
    M: Mac + Send + 'static,
{
    fn update(&mut self, data: &[u8]) {
        Mac::update(&mut self.mac, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.mac.finalize().into_bytes().to_vec()
    }

    fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}
