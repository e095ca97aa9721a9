//! ServerHello message (RFC 8446 Section 4.1.3).

use crate::cipher::CipherSuite;
use crate::codec::{put_vec_u8, Reader};
use crate::error::{Error, Result};
use crate::extensions::Extensions;
use crate::protocol::{ProtocolVersion, HELLO_RETRY_REQUEST_RANDOM};
use bytes::{BufMut, BytesMut};

/// ServerHello message. A HelloRetryRequest is a ServerHello whose random
/// equals [`HELLO_RETRY_REQUEST_RANDOM`].
///
/// ```text
/// struct {
///     ProtocolVersion legacy_version = 0x0303;
///     Random random;
///     opaque legacy_session_id_echo<0..32>;
///     CipherSuite cipher_suite;
///     uint8 legacy_compression_method = 0;
///     Extension extensions<6..2^16-1>;
/// } ServerHello;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Server random
    pub random: [u8; 32],

    /// Echo of the client's legacy session id
    pub legacy_session_id_echo: Vec<u8>,

    /// Selected cipher suite
    pub cipher_suite: CipherSuite,

    /// Extensions
    pub extensions: Extensions,
}

impl ServerHello {
    /// Create a new ServerHello.
    pub fn new(random: [u8; 32], session_id_echo: Vec<u8>, cipher_suite: CipherSuite) -> Self {
        Self {
            random,
            legacy_session_id_echo: session_id_echo,
            cipher_suite,
            extensions: Extensions::new(),
        }
    }

    /// Whether this is a HelloRetryRequest.
    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }

    /// Encode the ServerHello body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_u16(ProtocolVersion::Tls12.to_u16());
        buf.put_slice(&self.random);
        put_vec_u8(&mut buf, &self.legacy_session_id_echo)?;
        buf.put_u16(self.cipher_suite.to_u16());
        buf.put_u8(0);
        self.extensions.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode a ServerHello body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        if r.u16("legacy_version")? != ProtocolVersion::Tls12.to_u16() {
            return Err(Error::ProtocolVersion);
        }
        let random = r.array::<32>("random")?;
        let legacy_session_id_echo = r.vec_u8("legacy_session_id_echo")?.to_vec();
        if legacy_session_id_echo.len() > 32 {
            return Err(Error::Decode("Session ID too long".into()));
        }
        let raw_suite = r.u16("cipher_suite")?;
        let cipher_suite = CipherSuite::from_u16(raw_suite).ok_or_else(|| {
            Error::IllegalParameter(format!("server selected unknown suite {:#06x}", raw_suite))
        })?;
        if r.u8("legacy_compression_method")? != 0 {
            return Err(Error::IllegalParameter("compression method".into()));
        }
        let extensions = Extensions::decode(&mut r)?;
        r.finish("ServerHello")?;

        Ok(Self {
            random,
            legacy_session_id_echo,
            cipher_suite,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_hello_roundtrip() {
        let mut hello = ServerHello::new([7u8; 32], vec![1, 2], CipherSuite::Aes256GcmSha384);
        hello.extensions.add_selected_version(ProtocolVersion::Tls13);
        let decoded = ServerHello::decode(&hello.encode().unwrap()).unwrap();
        assert_eq!(decoded, hello);
        assert!(!decoded.is_hello_retry_request());
        assert_eq!(decoded.extensions.selected_version().unwrap(), Some(0x0304));
    }

    #[test]
    fn test_unknown_suite_is_illegal() {
        let hello = ServerHello::new([7u8; 32], vec![], CipherSuite::Aes128GcmSha256);
        let mut encoded = hello.encode().unwrap();
        // version(2) random(32) sid_len(1) -> suite at 35
        encoded[35] = 0xc0;
        assert!(matches!(
            ServerHello::decode(&encoded),
            Err(Error::IllegalParameter(_))
        ));
    }
}
