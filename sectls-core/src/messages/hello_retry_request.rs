//! HelloRetryRequest (RFC 8446 Section 4.1.4).
//!
//! On the wire a HelloRetryRequest is a ServerHello with a fixed random.
//! This module builds one from the negotiated retry parameters, so a
//! stateless server can reconstruct the exact bytes it sent.

use super::ServerHello;
use crate::cipher::CipherSuite;
use crate::error::{Error, Result};
use crate::protocol::{ProtocolVersion, HELLO_RETRY_REQUEST_RANDOM};

/// Parameters carried by a HelloRetryRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRetryRequest {
    /// Echo of the client's legacy session id
    pub session_id: Vec<u8>,
    /// Suite the server will use
    pub cipher_suite: CipherSuite,
    /// Group the client must offer a share for
    pub selected_group: Option<u16>,
    /// Retry cookie
    pub cookie: Option<Vec<u8>>,
}

impl HelloRetryRequest {
    /// Build the ServerHello form.
    pub fn to_server_hello(&self) -> Result<ServerHello> {
        let mut hello = ServerHello::new(
            HELLO_RETRY_REQUEST_RANDOM,
            self.session_id.clone(),
            self.cipher_suite,
        );
        hello.extensions.add_selected_version(ProtocolVersion::Tls13);
        if let Some(group) = self.selected_group {
            hello.extensions.add_selected_group(group);
        }
        if let Some(cookie) = &self.cookie {
            hello.extensions.add_cookie(cookie)?;
        }
        Ok(hello)
    }

    /// Extract retry parameters from a ServerHello that is a HelloRetryRequest.
    pub fn from_server_hello(hello: &ServerHello) -> Result<Self> {
        if !hello.is_hello_retry_request() {
            return Err(Error::InternalError("not a HelloRetryRequest".into()));
        }
        let selected_group = hello.extensions.selected_group()?;
        let cookie = hello.extensions.cookie()?;
        if selected_group.is_none() && cookie.is_none() {
            // A retry that would not change the ClientHello
            return Err(Error::IllegalParameter(
                "HelloRetryRequest without key_share or cookie".into(),
            ));
        }
        Ok(Self {
            session_id: hello.legacy_session_id_echo.clone(),
            cipher_suite: hello.cipher_suite,
            selected_group,
            cookie,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hrr_roundtrip() {
        let hrr = HelloRetryRequest {
            session_id: vec![9; 32],
            cipher_suite: CipherSuite::Aes128GcmSha256,
            selected_group: Some(0x0017),
            cookie: Some(b"cookie".to_vec()),
        };
        let hello = hrr.to_server_hello().unwrap();
        assert!(hello.is_hello_retry_request());
        let encoded = hello.encode().unwrap();
        let decoded = ServerHello::decode(&encoded).unwrap();
        assert_eq!(HelloRetryRequest::from_server_hello(&decoded).unwrap(), hrr);
    }

    #[test]
    fn test_hrr_without_change_rejected() {
        let hrr = HelloRetryRequest {
            session_id: vec![],
            cipher_suite: CipherSuite::Aes128GcmSha256,
            selected_group: None,
            cookie: None,
        };
        let hello = hrr.to_server_hello().unwrap();
        assert!(matches!(
            HelloRetryRequest::from_server_hello(&hello),
            Err(Error::IllegalParameter(_))
        ));
    }
}
