//! Pre-Shared Key offers and binders (RFC 8446 Section 4.2.11).
//!
//! ```text
//! struct {
//!     opaque identity<1..2^16-1>;
//!     uint32 obfuscated_ticket_age;
//! } PskIdentity;
//!
//! opaque PskBinderEntry<32..255>;
//!
//! struct {
//!     PskIdentity identities<7..2^16-1>;
//!     PskBinderEntry binders<33..2^16-1>;
//! } OfferedPsks;
//! ```
//!
//! A binder authenticates the ClientHello up to (but excluding) the binders
//! list:
//!
//! ```text
//! binder = HMAC(finished_key(binder_key), Hash(transcript || truncated ClientHello))
//! ```

use crate::cipher::CipherSuite;
use crate::codec::{put_vec_u16, put_vec_u8, Reader};
use crate::error::{Error, Result};
use crate::key_schedule::{KeySchedule, PskKind, Secret};
use bytes::{BufMut, BytesMut};
use zeroize::Zeroizing;

/// One identity as it appears in the ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskIdentity {
    /// Ticket or external identity bytes
    pub identity: Vec<u8>,
    /// Ticket age plus ticket_age_add, mod 2^32 (0 for external PSKs)
    pub obfuscated_ticket_age: u32,
}

/// Body of the ClientHello pre_shared_key extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedPsks {
    /// Identities in preference order
    pub identities: Vec<PskIdentity>,
    /// One binder per identity
    pub binders: Vec<Vec<u8>>,
}

impl OfferedPsks {
    /// Encode the extension body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.identities.is_empty() || self.identities.len() != self.binders.len() {
            return Err(Error::InternalError(
                "PSK identities and binders must pair up".into(),
            ));
        }
        let mut identities = BytesMut::new();
        for id in &self.identities {
            put_vec_u16(&mut identities, &id.identity)?;
            identities.put_u32(id.obfuscated_ticket_age);
        }
        let mut buf = BytesMut::new();
        put_vec_u16(&mut buf, &identities)?;
        buf.put_slice(&self.encode_binders()?);
        Ok(buf.to_vec())
    }

    /// The binders list with its length prefix; the tail of the ClientHello.
    pub fn encode_binders(&self) -> Result<Vec<u8>> {
        let mut binders = BytesMut::new();
        for binder in &self.binders {
            put_vec_u8(&mut binders, binder)?;
        }
        let mut buf = BytesMut::new();
        put_vec_u16(&mut buf, &binders)?;
        Ok(buf.to_vec())
    }

    /// Decode the extension body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let mut ids = Reader::new(r.vec_u16("psk identities")?);
        let mut identities = Vec::new();
        while !ids.is_empty() {
            let identity = ids.vec_u16("psk identity")?.to_vec();
            if identity.is_empty() {
                return Err(Error::Decode("empty psk identity".into()));
            }
            let obfuscated_ticket_age = ids.u32("obfuscated_ticket_age")?;
            identities.push(PskIdentity {
                identity,
                obfuscated_ticket_age,
            });
        }

        let mut list = Reader::new(r.vec_u16("psk binders")?);
        let mut binders = Vec::new();
        while !list.is_empty() {
            let binder = list.vec_u8("psk binder")?;
            if binder.len() < 32 {
                return Err(Error::Decode("psk binder too short".into()));
            }
            binders.push(binder.to_vec());
        }
        r.finish("pre_shared_key")?;

        if identities.is_empty() || identities.len() != binders.len() {
            return Err(Error::IllegalParameter(
                "psk identities and binders do not pair up".into(),
            ));
        }
        Ok(Self {
            identities,
            binders,
        })
    }

    /// Length of the binders list on the wire: the 2-byte vector length
    /// plus `1 + len` for each binder.
    pub fn binders_len(&self) -> usize {
        2 + self.binders.iter().map(|b| 1 + b.len()).sum::<usize>()
    }
}

/// Offset at which the binders list starts in an encoded ClientHello
/// (handshake header included).
pub fn truncation_point(encoded_client_hello: &[u8], offered: &OfferedPsks) -> Result<usize> {
    encoded_client_hello
        .len()
        .checked_sub(offered.binders_len())
        .ok_or_else(|| Error::Decode("ClientHello shorter than its binders".into()))
}

/// binder = HMAC(finished_key(binder_key), truncated_transcript_hash).
pub fn compute_binder(
    schedule: &KeySchedule,
    binder_key: &Secret,
    truncated_transcript_hash: &[u8],
) -> Result<Vec<u8>> {
    schedule.finished_verify_data(binder_key, truncated_transcript_hash)
}

/// Constant-time binder check.
pub fn verify_binder(
    schedule: &KeySchedule,
    binder_key: &Secret,
    truncated_transcript_hash: &[u8],
    binder: &[u8],
) -> Result<bool> {
    schedule.verify_finished(binder_key, truncated_transcript_hash, binder)
}

/// An out-of-band PSK provisioned on both sides.
#[derive(Clone)]
pub struct ExternalPsk {
    /// Identity sent in the clear
    pub identity: Vec<u8>,
    /// Key material
    pub secret: Zeroizing<Vec<u8>>,
    /// Suite whose hash the PSK is bound to
    pub suite: CipherSuite,
}

impl ExternalPsk {
    /// Create an external PSK.
    pub fn new(identity: Vec<u8>, secret: Vec<u8>, suite: CipherSuite) -> Self {
        Self {
            identity,
            secret: Zeroizing::new(secret),
            suite,
        }
    }
}

impl std::fmt::Debug for ExternalPsk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalPsk")
            .field("identity", &self.identity)
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

/// A PSK the client is offering, with everything needed to finish the
/// binder and, if accepted, the key schedule.
#[derive(Clone)]
pub struct PreSharedKeyIdentity {
    /// Identity bytes
    pub identity: Vec<u8>,
    /// Ticket or external key
    pub kind: PskKind,
    /// Obfuscated age (0 for external PSKs)
    pub obfuscated_ticket_age: u32,
    /// Suite the PSK was established with
    pub suite: CipherSuite,
    /// PSK bytes
    pub secret: Zeroizing<Vec<u8>>,
    /// Binder once computed
    pub binder: Vec<u8>,
    /// Early data allowance carried with a resumption ticket
    pub max_early_data: u32,
}

impl PreSharedKeyIdentity {
    /// Wire identity.
    pub fn wire_identity(&self) -> PskIdentity {
        PskIdentity {
            identity: self.identity.clone(),
            obfuscated_ticket_age: self.obfuscated_ticket_age,
        }
    }
}

impl From<&ExternalPsk> for PreSharedKeyIdentity {
    fn from(psk: &ExternalPsk) -> Self {
        Self {
            identity: psk.identity.clone(),
            kind: PskKind::External,
            obfuscated_ticket_age: 0,
            suite: psk.suite,
            secret: psk.secret.clone(),
            binder: Vec::new(),
            max_early_data: 0,
        }
    }
}

impl std::fmt::Debug for PreSharedKeyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSharedKeyIdentity")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}
