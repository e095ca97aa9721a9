//! Finished message (RFC 8446 Section 4.4.4).

use crate::error::{Error, Result};

/// Finished message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    /// HMAC of the transcript under the finished key
    pub verify_data: Vec<u8>,
}

impl Finished {
    /// Create a new Finished.
    pub fn new(verify_data: Vec<u8>) -> Self {
        Self { verify_data }
    }

    /// Encode the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.verify_data.clone())
    }

    /// Decode the body, which must be exactly one digest long.
    pub fn decode(data: &[u8], hash_len: usize) -> Result<Self> {
        if data.len() != hash_len {
            return Err(Error::Decode(format!(
                "Finished of {} bytes, expected {}",
                data.len(),
                hash_len
            )));
        }
        Ok(Self::new(data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_length() {
        assert!(Finished::decode(&[0u8; 32], 32).is_ok());
        assert!(matches!(Finished::decode(&[0u8; 31], 32), Err(Error::Decode(_))));
    }
}
