//! CertificateRequest message (RFC 8446 Section 4.3.2).

use crate::codec::{put_vec_u8, Reader};
use crate::error::{Error, Result};
use crate::extensions::Extensions;
use crate::protocol::ExtensionType;
use bytes::BytesMut;

/// CertificateRequest message.
///
/// ```text
/// struct {
///     opaque certificate_request_context<0..2^8-1>;
///     Extension extensions<2..2^16-1>;
/// } CertificateRequest;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Context echoed in the client's Certificate. Empty during the
    /// handshake, unique per request after it.
    pub context: Vec<u8>,

    /// Extensions; signature_algorithms is mandatory
    pub extensions: Extensions,
}

impl CertificateRequest {
    /// Request with the given context and accepted signature schemes.
    pub fn new(context: Vec<u8>, schemes: &[u16]) -> Result<Self> {
        let mut extensions = Extensions::new();
        extensions.add_signature_algorithms(schemes)?;
        Ok(Self {
            context,
            extensions,
        })
    }

    /// Encode the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        put_vec_u8(&mut buf, &self.context)?;
        self.extensions.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode the body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let context = r.vec_u8("certificate_request_context")?.to_vec();
        let extensions = Extensions::decode(&mut r)?;
        r.finish("CertificateRequest")?;
        if !extensions.has(ExtensionType::SignatureAlgorithms) {
            return Err(Error::MissingExtension("signature_algorithms".into()));
        }
        Ok(Self {
            context,
            extensions,
        })
    }

    /// Signature schemes the server accepts.
    pub fn signature_schemes(&self) -> Result<Vec<u16>> {
        self.extensions
            .signature_algorithms()?
            .ok_or_else(|| Error::MissingExtension("signature_algorithms".into()))
    }
}
