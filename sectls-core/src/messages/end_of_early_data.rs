//! EndOfEarlyData message (RFC 8446 Section 4.5).

use crate::error::{Error, Result};

/// EndOfEarlyData carries no body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndOfEarlyData;

impl EndOfEarlyData {
    /// Encode the (empty) body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Decode the body, which must be empty.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if !data.is_empty() {
            return Err(Error::Decode("EndOfEarlyData with body".into()));
        }
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body() {
        assert!(EndOfEarlyData::decode(&[]).is_ok());
        assert!(EndOfEarlyData::decode(&[0]).is_err());
    }
}
