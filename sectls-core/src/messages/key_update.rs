//! KeyUpdate message (RFC 8446 Section 4.6.3).

use crate::error::{Error, Result};

/// Whether the receiver must answer with its own KeyUpdate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyUpdateRequest {
    /// update_not_requested (0)
    UpdateNotRequested = 0,
    /// update_requested (1)
    UpdateRequested = 1,
}

/// KeyUpdate message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    /// Request flag
    pub request_update: KeyUpdateRequest,
}

impl KeyUpdate {
    /// Create a new KeyUpdate.
    pub fn new(request_update: KeyUpdateRequest) -> Self {
        Self { request_update }
    }

    /// Encode the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(vec![self.request_update as u8])
    }

    /// Decode the body. Values other than 0 and 1 are illegal.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let request_update = match data {
            [0] => KeyUpdateRequest::UpdateNotRequested,
            [1] => KeyUpdateRequest::UpdateRequested,
            [other] => {
                return Err(Error::IllegalParameter(format!(
                    "KeyUpdate request {}",
                    other
                )))
            },
            _ => return Err(Error::Decode("KeyUpdate length".into())),
        };
        Ok(Self { request_update })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_update_decode() {
        assert_eq!(
            KeyUpdate::decode(&[1]).unwrap().request_update,
            KeyUpdateRequest::UpdateRequested
        );
        assert!(matches!(KeyUpdate::decode(&[2]), Err(Error::IllegalParameter(_))));
        assert!(matches!(KeyUpdate::decode(&[]), Err(Error::Decode(_))));
    }
}
