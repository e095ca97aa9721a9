//! Certificate message (RFC 8446 Section 4.4.2).

use crate::codec::{put_vec_u24, put_vec_u8, Reader};
use crate::error::{Error, Result};
use crate::extensions::Extensions;
use bytes::BytesMut;

/// One entry of the certificate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    /// Certificate (or raw public key) bytes
    pub data: Vec<u8>,
    /// Per-certificate extensions
    pub extensions: Extensions,
}

impl CertificateEntry {
    /// Entry without extensions.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            extensions: Extensions::new(),
        }
    }
}

/// Certificate message.
///
/// ```text
/// struct {
///     opaque certificate_request_context<0..2^8-1>;
///     CertificateEntry certificate_list<0..2^24-1>;
/// } Certificate;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Echo of the CertificateRequest context (empty for the server)
    pub context: Vec<u8>,
    /// End-entity first
    pub entries: Vec<CertificateEntry>,
}

impl Certificate {
    /// Certificate message from DER blobs.
    pub fn new(context: Vec<u8>, chain: &[Vec<u8>]) -> Self {
        Self {
            context,
            entries: chain.iter().cloned().map(CertificateEntry::new).collect(),
        }
    }

    /// Whether the list is empty (a client declining to authenticate).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut list = BytesMut::new();
        for entry in &self.entries {
            put_vec_u24(&mut list, &entry.data)?;
            entry.extensions.encode(&mut list)?;
        }
        let mut buf = BytesMut::new();
        put_vec_u8(&mut buf, &self.context)?;
        put_vec_u24(&mut buf, &list)?;
        Ok(buf.to_vec())
    }

    /// Decode the body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let context = r.vec_u8("certificate_request_context")?.to_vec();
        let mut list = Reader::new(r.vec_u24("certificate_list")?);
        r.finish("Certificate")?;

        let mut entries = Vec::new();
        while !list.is_empty() {
            let cert = list.vec_u24("cert_data")?.to_vec();
            if cert.is_empty() {
                return Err(Error::Decode("empty certificate entry".into()));
            }
            let extensions = Extensions::decode(&mut list)?;
            entries.push(CertificateEntry {
                data: cert,
                extensions,
            });
        }
        Ok(Self { context, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate() {
        let cert = Certificate::new(vec![], &[vec![0x30, 0x82, 0x01], vec![0x30, 0x01]]);
        let decoded = Certificate::decode(&cert.encode().unwrap()).unwrap();
        assert_eq!(decoded, cert);
        assert_eq!(decoded.entries.len(), 2);
    }

    #[test]
    fn test_empty_certificate_with_context() {
        let cert = Certificate::new(vec![7; 8], &[]);
        let decoded = Certificate::decode(&cert.encode().unwrap()).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.context, vec![7; 8]);
    }
}
