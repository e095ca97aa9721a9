//! CertificateVerify message (RFC 8446 Section 4.4.3).

use crate::codec::{put_vec_u16, Reader};
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use sectls_crypto::SignatureAlgorithm;

const SERVER_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";
const CLIENT_CONTEXT: &[u8] = b"TLS 1.3, client CertificateVerify";

/// CertificateVerify message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    /// Signature algorithm
    pub algorithm: SignatureAlgorithm,

    /// Signature
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    /// Create a new message.
    pub fn new(algorithm: SignatureAlgorithm, signature: Vec<u8>) -> Self {
        Self {
            algorithm,
            signature,
        }
    }

    /// Encode the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.algorithm.to_u16());
        put_vec_u16(&mut buf, &self.signature)?;
        Ok(buf.to_vec())
    }

    /// Decode the body. An unknown scheme is an illegal parameter.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let raw = r.u16("signature scheme")?;
        let algorithm = SignatureAlgorithm::from_u16(raw).ok_or_else(|| {
            Error::IllegalParameter(format!("unknown signature scheme {:#06x}", raw))
        })?;
        let signature = r.vec_u16("signature")?.to_vec();
        r.finish("CertificateVerify")?;
        Ok(Self {
            algorithm,
            signature,
        })
    }
}

/// The content covered by the signature:
/// 64 spaces, the role context string, a zero byte, and the transcript hash.
pub fn signed_content(server: bool, transcript_hash: &[u8]) -> Vec<u8> {
    let context = if server { SERVER_CONTEXT } else { CLIENT_CONTEXT };
    let mut content = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    content.resize(64, 0x20);
    content.extend_from_slice(context);
    content.push(0);
    content.extend_from_slice(transcript_hash);
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cv = CertificateVerify::new(SignatureAlgorithm::Ed25519, vec![5; 64]);
        assert_eq!(CertificateVerify::decode(&cv.encode().unwrap()).unwrap(), cv);
    }

    #[test]
    fn test_signed_content_layout() {
        let content = signed_content(true, &[0xaa; 32]);
        assert_eq!(&content[..64], &[0x20; 64]);
        assert_eq!(&content[64..64 + SERVER_CONTEXT.len()], SERVER_CONTEXT);
        assert_eq!(content[64 + SERVER_CONTEXT.len()], 0);
        assert_eq!(content.len(), 64 + 33 + 1 + 32);
        assert_ne!(signed_content(false, &[0xaa; 32]), content);
    }

    #[test]
    fn test_unknown_scheme() {
        assert!(matches!(
            CertificateVerify::decode(&[0x09, 0x99, 0x00, 0x00]),
            Err(Error::IllegalParameter(_))
        ));
    }
}
