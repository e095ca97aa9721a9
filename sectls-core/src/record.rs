//! TLS record layer framing.
//!
//! # Record Structure (TLS 1.3)
//!
//! ```text
//! struct {
//!     ContentType type;
//!     ProtocolVersion legacy_record_version = 0x0303; // 0x0301 allowed on the first ClientHello
//!     uint16 length;
//!     opaque fragment[TLSPlaintext.length];
//! } TLSPlaintext;
//! ```
//!
//! [`RecordReader`] buffers transport bytes and yields whole records,
//! enforcing the plaintext and ciphertext size limits.

use crate::codec::write_record_header;
use crate::error::{Error, Result};
use crate::protocol::{
    ContentType, ProtocolVersion, MAX_CIPHERTEXT_LENGTH, MAX_FRAGMENT_LENGTH, RECORD_HEADER_LEN,
};
use bytes::{Buf, BufMut, BytesMut};

/// One record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsRecord {
    /// Outer content type
    pub content_type: ContentType,
    /// Legacy record version as sent
    pub legacy_version: u16,
    /// Record payload
    pub payload: Vec<u8>,
}

impl TlsRecord {
    /// Encode header and payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let version = ProtocolVersion::from_u16(self.legacy_version).unwrap_or(ProtocolVersion::Tls12);
        encode_record(self.content_type, version, &self.payload)
    }
}

/// Encode a record with the given header fields.
pub fn encode_record(
    content_type: ContentType,
    version: ProtocolVersion,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + payload.len());
    write_record_header(&mut buf, content_type, version, payload.len())?;
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

/// Incremental record deframer.
#[derive(Debug, Default)]
pub struct RecordReader {
    buf: BytesMut,
}

impl RecordReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transport bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as records.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete record, or `None` if more input is needed.
    pub fn next_record(&mut self) -> Result<Option<TlsRecord>> {
        if self.buf.len() < RECORD_HEADER_LEN {
            return Ok(None);
        }

        let raw_type = self.buf[0];
        let legacy_version = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        let len = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;

        let content_type = ContentType::from_u8(raw_type)
            .filter(|t| *t != ContentType::Invalid)
            .ok_or_else(|| Error::UnexpectedMessage(format!("record type {}", raw_type)))?;
        if legacy_version >> 8 != 0x03 {
            return Err(Error::Decode(format!(
                "record version {:#06x}",
                legacy_version
            )));
        }
        let limit = match content_type {
            ContentType::ApplicationData => MAX_CIPHERTEXT_LENGTH,
            _ => MAX_FRAGMENT_LENGTH,
        };
        if len > limit {
            return Err(Error::RecordOverflow(len));
        }
        if len == 0 && content_type == ContentType::Handshake {
            return Err(Error::BufferError("zero-length handshake record".into()));
        }

        if self.buf.len() < RECORD_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(RECORD_HEADER_LEN);
        let payload = self.buf.split_to(len).to_vec();
        Ok(Some(TlsRecord {
            content_type,
            legacy_version,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_input() {
        let record = encode_record(ContentType::Handshake, ProtocolVersion::Tls12, &[1, 2, 3]).unwrap();
        let mut reader = RecordReader::new();
        reader.feed(&record[..4]);
        assert_eq!(reader.next_record().unwrap(), None);
        reader.feed(&record[4..]);
        let out = reader.next_record().unwrap().unwrap();
        assert_eq!(out.content_type, ContentType::Handshake);
        assert_eq!(out.payload, vec![1, 2, 3]);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_legacy_client_hello_version() {
        let record = encode_record(ContentType::Handshake, ProtocolVersion::Tls10, &[1]).unwrap();
        let mut reader = RecordReader::new();
        reader.feed(&record);
        assert_eq!(reader.next_record().unwrap().unwrap().legacy_version, 0x0301);
    }

    #[test]
    fn test_ciphertext_overflow() {
        let mut reader = RecordReader::new();
        let len = (MAX_CIPHERTEXT_LENGTH + 1) as u16;
        reader.feed(&[23, 3, 3, (len >> 8) as u8, len as u8]);
        assert_eq!(
            reader.next_record(),
            Err(Error::RecordOverflow(MAX_CIPHERTEXT_LENGTH + 1))
        );
    }

    #[test]
    fn test_plaintext_overflow() {
        let mut reader = RecordReader::new();
        let len = (MAX_FRAGMENT_LENGTH + 1) as u16;
        reader.feed(&[22, 3, 3, (len >> 8) as u8, len as u8]);
        assert!(matches!(reader.next_record(), Err(Error::RecordOverflow(_))));
    }

    #[test]
    fn test_zero_length_handshake() {
        let mut reader = RecordReader::new();
        reader.feed(&[22, 3, 3, 0, 0]);
        assert!(matches!(reader.next_record(), Err(Error::BufferError(_))));
    }

    #[test]
    fn test_unknown_type() {
        let mut reader = RecordReader::new();
        reader.feed(&[99, 3, 3, 0, 1, 0]);
        assert!(matches!(
            reader.next_record(),
            Err(Error::UnexpectedMessage(_))
        ));
    }
}
