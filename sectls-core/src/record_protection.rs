//! TLS 1.3 Record Protection (AEAD Encryption/Decryption)
//!
//! This module implements the AEAD encryption and decryption for TLS 1.3 records
//! as specified in RFC 8446 Section 5.2.
//!
//! # TLS 1.3 AEAD Construction
//! - Additional Data (AD): record header `23 || 0x0303 || length`
//! - Nonce: IV XOR big-endian 64-bit sequence number
//! - Plaintext: content + content_type + optional zero padding
//! - Output: encrypted_record = AEAD-Encrypt(key, nonce, plaintext, ad)
//!
//! The sequence number only moves after a successful seal or open. A provider
//! that reports pending leaves the counter where it was so the identical call
//! can be retried.

use crate::cipher::CryptoSuite;
use crate::error::{Error, Result};
use crate::key_schedule::ConnectionKeys;
use crate::protocol::{ContentType, ProtocolVersion, MAX_CIPHERTEXT_LENGTH, MAX_FRAGMENT_LENGTH};
use std::sync::Arc;

/// Which half of the connection a key pair protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Records we receive
    Read,
    /// Records we send
    Write,
}

#[derive(Debug)]
struct DirectionState {
    suite: Arc<dyn CryptoSuite>,
    keys: ConnectionKeys,
}

/// Record protection state for both directions.
#[derive(Debug, Default)]
pub struct RecordProtection {
    read: Option<DirectionState>,
    write: Option<DirectionState>,
}

/// Build the AAD for an encrypted record of `len` bytes.
pub fn additional_data(len: usize) -> [u8; 5] {
    let version = ProtocolVersion::Tls12.to_u16().to_be_bytes();
    let len = (len as u16).to_be_bytes();
    [
        ContentType::ApplicationData.to_u8(),
        version[0],
        version[1],
        len[0],
        len[1],
    ]
}

impl RecordProtection {
    /// Create with no keys installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the keys for `direction`. The previous keys are zeroized.
    pub fn install(&mut self, direction: Direction, suite: Arc<dyn CryptoSuite>, keys: ConnectionKeys) {
        tracing::debug!(?direction, suite = suite.suite().name(), "installing record keys");
        let state = Some(DirectionState { suite, keys });
        match direction {
            Direction::Read => self.read = state,
            Direction::Write => self.write = state,
        }
    }

    /// Whether keys are installed for `direction`.
    pub fn is_active(&self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.read.is_some(),
            Direction::Write => self.write.is_some(),
        }
    }

    /// Drop the keys for one direction, returning it to plaintext.
    pub fn remove(&mut self, direction: Direction) {
        match direction {
            Direction::Read => self.read = None,
            Direction::Write => self.write = None,
        }
    }

    /// Drop all keys. Each key pair zeroizes on drop.
    pub fn clear(&mut self) {
        self.read = None;
        self.write = None;
    }

    /// Sequence number of the next record in `direction`.
    pub fn sequence(&self, direction: Direction) -> Option<u64> {
        let state = match direction {
            Direction::Read => self.read.as_ref(),
            Direction::Write => self.write.as_ref(),
        };
        state.map(|s| s.keys.sequence().value())
    }

    /// Encrypt `plaintext` of `content_type`, returning the record payload
    /// (ciphertext and tag).
    pub fn seal(&mut self, content_type: ContentType, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal_padded(content_type, plaintext, 0)
    }

    /// [`seal`](Self::seal) with `padding` zero bytes appended to the inner
    /// plaintext.
    pub fn seal_padded(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
        padding: usize,
    ) -> Result<Vec<u8>> {
        let state = self
            .write
            .as_mut()
            .ok_or_else(|| Error::InternalError("seal without write keys".into()))?;
        if plaintext.len() + padding > MAX_FRAGMENT_LENGTH {
            return Err(Error::RecordOverflow(plaintext.len() + padding));
        }
        if state.keys.sequence().is_exhausted() {
            return Err(Error::SequenceExhausted);
        }

        let mut inner = Vec::with_capacity(plaintext.len() + 1 + padding);
        inner.extend_from_slice(plaintext);
        inner.push(content_type.to_u8());
        inner.resize(inner.len() + padding, 0);

        let aad = additional_data(inner.len() + state.suite.tag_len());
        let nonce = state.keys.nonce();
        let sealed = state.suite.seal(state.keys.key(), &nonce, &aad, &inner)?;
        state.keys.advance()?;
        Ok(sealed)
    }

    /// Decrypt a record payload, returning the inner content type and
    /// content.
    pub fn open(&mut self, payload: &[u8]) -> Result<(ContentType, Vec<u8>)> {
        let state = self
            .read
            .as_mut()
            .ok_or_else(|| Error::InternalError("open without read keys".into()))?;
        if payload.len() > MAX_CIPHERTEXT_LENGTH {
            return Err(Error::RecordOverflow(payload.len()));
        }
        if state.keys.sequence().is_exhausted() {
            return Err(Error::SequenceExhausted);
        }
        if payload.len() < state.suite.tag_len() + 1 {
            return Err(Error::BadRecordMac);
        }

        let aad = additional_data(payload.len());
        let nonce = state.keys.nonce();
        let mut inner = match state.suite.open(state.keys.key(), &nonce, &aad, payload) {
            Ok(inner) => inner,
            Err(Error::Pending) => return Err(Error::Pending),
            Err(_) => return Err(Error::BadRecordMac),
        };
        state.keys.advance()?;

        if inner.len() > MAX_FRAGMENT_LENGTH + 1 {
            return Err(Error::RecordOverflow(inner.len()));
        }
        let type_pos = inner
            .iter()
            .rposition(|&b| b != 0)
            .ok_or_else(|| Error::UnexpectedMessage("record without content type".into()))?;
        let content_type = ContentType::from_u8(inner[type_pos])
            .filter(|t| t.is_valid_inner())
            .ok_or_else(|| {
                Error::UnexpectedMessage(format!("inner content type {}", inner[type_pos]))
            })?;
        inner.truncate(type_pos);
        Ok((content_type, inner))
    }
}
