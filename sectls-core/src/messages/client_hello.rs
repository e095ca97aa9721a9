//! ClientHello message (RFC 8446 Section 4.1.2).

use crate::cipher::CipherSuite;
use crate::codec::{put_vec_u16, put_vec_u8, Reader};
use crate::error::{Error, Result};
use crate::extensions::Extensions;
use crate::protocol::{ExtensionType, ProtocolVersion};
use bytes::{BufMut, BytesMut};

/// ClientHello message.
///
/// ```text
/// struct {
///     ProtocolVersion legacy_version = 0x0303;    /* TLS v1.2 */
///     Random random;
///     opaque legacy_session_id<0..32>;
///     CipherSuite cipher_suites<2..2^16-2>;
///     opaque legacy_compression_methods<1..2^8-1>;
///     Extension extensions<8..2^16-1>;
/// } ClientHello;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Random bytes (32 bytes)
    pub random: [u8; 32],

    /// Legacy session ID (for middlebox compatibility)
    pub legacy_session_id: Vec<u8>,

    /// Cipher suites offered by client. Unknown suites are dropped on decode.
    pub cipher_suites: Vec<CipherSuite>,

    /// Extensions
    pub extensions: Extensions,
}

impl ClientHello {
    /// Create a new ClientHello.
    pub fn new(random: [u8; 32], cipher_suites: Vec<CipherSuite>) -> Self {
        Self {
            random,
            legacy_session_id: Vec::new(),
            cipher_suites,
            extensions: Extensions::new(),
        }
    }

    /// Set the legacy session ID (for compatibility mode).
    pub fn with_session_id(mut self, session_id: Vec<u8>) -> Self {
        self.legacy_session_id = session_id;
        self
    }

    /// Encode the ClientHello body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_u16(ProtocolVersion::Tls12.to_u16());
        buf.put_slice(&self.random);

        if self.legacy_session_id.len() > 32 {
            return Err(Error::InternalError("Session ID too long".into()));
        }
        put_vec_u8(&mut buf, &self.legacy_session_id)?;

        let mut suites = BytesMut::new();
        for suite in &self.cipher_suites {
            suites.put_u16(suite.to_u16());
        }
        put_vec_u16(&mut buf, &suites)?;

        // Legacy compression methods: only "null"
        put_vec_u8(&mut buf, &[0])?;

        self.extensions.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode a ClientHello body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let legacy_version = r.u16("legacy_version")?;
        if legacy_version != ProtocolVersion::Tls12.to_u16() {
            return Err(Error::ProtocolVersion);
        }
        let random = r.array::<32>("random")?;

        let legacy_session_id = r.vec_u8("legacy_session_id")?.to_vec();
        if legacy_session_id.len() > 32 {
            return Err(Error::Decode("Session ID too long".into()));
        }

        let raw_suites = r.vec_u16("cipher_suites")?;
        if raw_suites.len() % 2 != 0 || raw_suites.is_empty() {
            return Err(Error::Decode("Invalid cipher suites length".into()));
        }
        let mut suites = Reader::new(raw_suites);
        let mut cipher_suites = Vec::new();
        while !suites.is_empty() {
            if let Some(suite) = CipherSuite::from_u16(suites.u16("cipher_suite")?) {
                cipher_suites.push(suite);
            }
        }

        if r.vec_u8("legacy_compression_methods")? != [0] {
            return Err(Error::IllegalParameter(
                "compression methods must be null only".into(),
            ));
        }

        let extensions = Extensions::decode(&mut r)?;
        r.finish("ClientHello")?;

        if extensions.has(ExtensionType::PreSharedKey)
            && !extensions.is_last(ExtensionType::PreSharedKey)
        {
            return Err(Error::IllegalParameter(
                "pre_shared_key is not the last extension".into(),
            ));
        }

        Ok(Self {
            random,
            legacy_session_id,
            cipher_suites,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::Extension;

    #[test]
    fn test_client_hello_encode_decode() {
        let mut hello = ClientHello::new(
            [0x42u8; 32],
            vec![
                CipherSuite::Aes128GcmSha256,
                CipherSuite::ChaCha20Poly1305Sha256,
            ],
        )
        .with_session_id(vec![0x01, 0x02, 0x03]);
        hello
            .extensions
            .add_supported_versions(&[ProtocolVersion::Tls13])
            .unwrap();

        let decoded = ClientHello::decode(&hello.encode().unwrap()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn test_psk_must_be_last() {
        let mut hello = ClientHello::new([0u8; 32], vec![CipherSuite::Aes128GcmSha256]);
        hello
            .extensions
            .add(Extension::new(ExtensionType::PreSharedKey, vec![0, 0, 0, 0]));
        hello.extensions.add_post_handshake_auth();
        let encoded = hello.encode().unwrap();
        assert!(matches!(
            ClientHello::decode(&encoded),
            Err(Error::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_rejects_compression() {
        let hello = ClientHello::new([0u8; 32], vec![CipherSuite::Aes128GcmSha256]);
        let mut encoded = hello.encode().unwrap();
        // version(2) random(32) sid_len(1) suites_len(2) suite(2) comp_len(1) comp(1)
        encoded[40] = 1;
        assert!(matches!(
            ClientHello::decode(&encoded),
            Err(Error::IllegalParameter(_))
        ));
    }
}
