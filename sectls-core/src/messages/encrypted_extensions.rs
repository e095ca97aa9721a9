//! EncryptedExtensions message (RFC 8446 Section 4.3.1).

use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::extensions::Extensions;
use crate::protocol::ExtensionType;
use bytes::BytesMut;

/// EncryptedExtensions message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedExtensions {
    /// Extensions
    pub extensions: Extensions,
}

impl EncryptedExtensions {
    /// Encode the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        self.extensions.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode the body. Extensions that belong only in the hellos are
    /// rejected.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let extensions = Extensions::decode(&mut r)?;
        r.finish("EncryptedExtensions")?;

        for forbidden in [
            ExtensionType::KeyShare,
            ExtensionType::PreSharedKey,
            ExtensionType::SupportedVersions,
            ExtensionType::Cookie,
            ExtensionType::PskKeyExchangeModes,
        ] {
            if extensions.has(forbidden) {
                return Err(Error::IllegalParameter(format!(
                    "{:?} in EncryptedExtensions",
                    forbidden
                )));
            }
        }
        Ok(Self { extensions })
    }
}
