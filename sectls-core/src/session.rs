//! Session state that outlives a single connection.
//!
//! # Ticket Blob
//!
//! The server-side state behind a ticket is serialized as
//!
//! ```text
//! version(1)=1 || cipher_suite(2) || lifetime_hint(4) || age_add(4)
//!     || issued_at_secs(8) || secret_len(1) || resumption_secret
//!     || early_data_flag(1) [|| max_early_data(4) if flag=1]
//! ```
//!
//! and either sealed into the ticket itself ([`TicketSealer`]) or kept in a
//! [`SessionStore`] under a random identifier.
//!
//! # Sealed Ticket Format
//!
//! ```text
//! version(1) || key_id(1) || nonce(12) || AES-256-GCM(blob) || tag(16)
//! ```

use crate::cipher::CipherSuite;
use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::key_schedule::Secret;
use crate::protocol::ProtocolVersion;
use bytes::{BufMut, BytesMut};
use sectls_crypto::{AeadAlgorithm, CryptoProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

/// Blob format version.
pub const TICKET_BLOB_VERSION: u8 = 1;

/// Sealed ticket format version.
pub const SEALED_TICKET_VERSION: u8 = 1;

/// Ticket sealing key size (AES-256).
pub const TICKET_KEY_SIZE: usize = 32;

const TICKET_NONCE_SIZE: usize = 12;
const TICKET_TAG_SIZE: usize = 16;
const MAX_PREVIOUS_TICKET_KEYS: usize = 3;

/// Seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Server-side resumption state behind one ticket.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTicket {
    /// Suite of the original connection
    pub cipher_suite: CipherSuite,
    /// Lifetime hint in seconds
    pub lifetime: u32,
    /// ticket_age_add sent with the ticket
    pub age_add: u32,
    /// Issue time, seconds since the UNIX epoch
    pub issued_at_secs: u64,
    /// PSK derived for this ticket
    pub resumption_secret: Zeroizing<Vec<u8>>,
    /// Early data allowance, if the ticket permits 0-RTT
    pub max_early_data: Option<u32>,
}

impl std::fmt::Debug for SessionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTicket")
            .field("cipher_suite", &self.cipher_suite)
            .field("lifetime", &self.lifetime)
            .field("issued_at_secs", &self.issued_at_secs)
            .field("max_early_data", &self.max_early_data)
            .finish_non_exhaustive()
    }
}

impl SessionTicket {
    /// Serialize to the versioned blob.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let secret_len = u8::try_from(self.resumption_secret.len())
            .map_err(|_| Error::InternalError("resumption secret too long".into()))?;
        let mut buf = BytesMut::with_capacity(25 + self.resumption_secret.len());
        buf.put_u8(TICKET_BLOB_VERSION);
        buf.put_u16(self.cipher_suite.to_u16());
        buf.put_u32(self.lifetime);
        buf.put_u32(self.age_add);
        buf.put_u64(self.issued_at_secs);
        buf.put_u8(secret_len);
        buf.put_slice(&self.resumption_secret);
        match self.max_early_data {
            Some(max) => {
                buf.put_u8(1);
                buf.put_u32(max);
            },
            None => buf.put_u8(0),
        }
        Ok(buf.to_vec())
    }

    /// Parse a blob. Every failure, including trailing bytes and an
    /// unknown version, is a `BufferError`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::parse(data).map_err(|e| match e {
            Error::BufferError(_) => e,
            other => Error::BufferError(other.to_string()),
        })
    }

    fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let version = r.u8("ticket version")?;
        if version != TICKET_BLOB_VERSION {
            return Err(Error::BufferError(format!(
                "unknown ticket version {}",
                version
            )));
        }
        let raw_suite = r.u16("ticket cipher suite")?;
        let cipher_suite = CipherSuite::from_u16(raw_suite)
            .ok_or_else(|| Error::BufferError(format!("ticket suite {:#06x}", raw_suite)))?;
        let lifetime = r.u32("ticket lifetime")?;
        let age_add = r.u32("ticket age_add")?;
        let issued_at_secs = r.u64("ticket issue time")?;
        let resumption_secret = Zeroizing::new(r.vec_u8("resumption secret")?.to_vec());
        let max_early_data = match r.u8("early data flag")? {
            0 => None,
            1 => Some(r.u32("max_early_data")?),
            other => {
                return Err(Error::BufferError(format!("early data flag {}", other)));
            },
        };
        if !r.is_empty() {
            return Err(Error::BufferError(format!(
                "{} trailing bytes after ticket",
                r.remaining()
            )));
        }
        Ok(Self {
            cipher_suite,
            lifetime,
            age_add,
            issued_at_secs,
            resumption_secret,
            max_early_data,
        })
    }

    /// Server-observed age in milliseconds.
    pub fn age_millis(&self, now_secs: u64) -> u64 {
        now_secs.saturating_sub(self.issued_at_secs) * 1000
    }

    /// Whether the ticket has outlived its lifetime.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        now_secs.saturating_sub(self.issued_at_secs) > u64::from(self.lifetime)
    }
}

/// Client-side record of a ticket, used to offer resumption later.
#[derive(Clone)]
pub struct ClientSession {
    /// Server the ticket came from
    pub server_name: Option<String>,
    /// Suite of the original connection
    pub cipher_suite: CipherSuite,
    /// Opaque ticket
    pub ticket: Vec<u8>,
    /// PSK derived from the resumption master secret and ticket nonce
    pub secret: Secret,
    /// Lifetime in seconds
    pub lifetime: u32,
    /// ticket_age_add
    pub age_add: u32,
    /// When the ticket arrived, milliseconds since the UNIX epoch
    pub received_at_ms: u64,
    /// Early data allowance
    pub max_early_data: Option<u32>,
    /// ALPN protocol of the original connection
    pub alpn: Option<Vec<u8>>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("server_name", &self.server_name)
            .field("cipher_suite", &self.cipher_suite)
            .field("lifetime", &self.lifetime)
            .field("max_early_data", &self.max_early_data)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Whether the ticket is still within its lifetime.
    pub fn is_valid(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.received_at_ms) < u64::from(self.lifetime) * 1000
    }

    /// obfuscated_ticket_age = age_ms + ticket_age_add (mod 2^32).
    pub fn obfuscated_age(&self, now_ms: u64) -> u32 {
        let age = now_ms.saturating_sub(self.received_at_ms) as u32;
        age.wrapping_add(self.age_add)
    }
}

/// Parameters of a finished (or finishing) handshake.
#[derive(Clone)]
pub struct HandshakeSession {
    /// Negotiated suite
    pub cipher_suite: CipherSuite,
    /// Negotiated version (always TLS 1.3)
    pub version: ProtocolVersion,
    /// ClientHello.random
    pub client_random: [u8; 32],
    /// ServerHello.random
    pub server_random: [u8; 32],
    /// resumption_master_secret, available once Finished is processed
    pub resumption_secret: Option<Secret>,
    /// Whether a PSK was accepted
    pub resumed: bool,
    /// Negotiated ALPN protocol
    pub alpn: Option<Vec<u8>>,
    /// Server name sent by the client
    pub server_name: Option<String>,
    /// Lifetime of the last ticket issued or received
    pub ticket_lifetime: u32,
    /// ticket_age_add of the last ticket issued or received
    pub ticket_age_add: u32,
}

impl std::fmt::Debug for HandshakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeSession")
            .field("cipher_suite", &self.cipher_suite)
            .field("version", &self.version)
            .field("resumed", &self.resumed)
            .field("alpn", &self.alpn)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl HandshakeSession {
    /// Session for a freshly accepted ServerHello.
    pub fn new(cipher_suite: CipherSuite, client_random: [u8; 32], server_random: [u8; 32]) -> Self {
        Self {
            cipher_suite,
            version: ProtocolVersion::Tls13,
            client_random,
            server_random,
            resumption_secret: None,
            resumed: false,
            alpn: None,
            server_name: None,
            ticket_lifetime: 0,
            ticket_age_add: 0,
        }
    }
}

/// Storage for server-side ticket state keyed by ticket identity.
pub trait SessionStore: Send + Sync {
    /// Fetch the blob stored under `id`.
    fn lookup_ticket(&self, id: &[u8]) -> Option<Vec<u8>>;

    /// Store `blob` under `id`.
    fn store_ticket(&self, id: Vec<u8>, blob: Vec<u8>);

    /// Fetch and forget. Stores that want single-use tickets override this.
    fn take_ticket(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.lookup_ticket(id)
    }
}

/// In-memory [`SessionStore`] with single-use tickets and a size cap.
#[derive(Debug)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    capacity: usize,
}

impl MemorySessionStore {
    /// Store holding at most `capacity` tickets.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Number of stored tickets.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn lookup_ticket(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn store_ticket(&self, id: Vec<u8>, blob: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity && !entries.contains_key(&id) {
            // Full: evict an arbitrary entry.
            if let Some(victim) = entries.keys().next().cloned() {
                entries.remove(&victim);
            }
        }
        entries.insert(id, blob);
    }

    fn take_ticket(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

struct TicketKey {
    key_id: u8,
    key: Zeroizing<Vec<u8>>,
    created_at: Instant,
}

struct SealerInner {
    current: TicketKey,
    previous: Vec<TicketKey>,
    rotation_interval: Duration,
}

/// Seals ticket blobs with AES-256-GCM under rotating keys.
///
/// The current key seals new tickets; up to three retired keys still open
/// older ones.
#[derive(Clone)]
pub struct TicketSealer {
    provider: Arc<dyn CryptoProvider>,
    inner: Arc<Mutex<SealerInner>>,
}

impl std::fmt::Debug for TicketSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSealer")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

impl TicketSealer {
    /// Create a sealer with a random key.
    pub fn new(provider: Arc<dyn CryptoProvider>, rotation_interval: Duration) -> Result<Self> {
        if !provider.supports_aead(AeadAlgorithm::Aes256Gcm) {
            return Err(Error::InvalidConfig(
                "ticket sealing needs AES-256-GCM".into(),
            ));
        }
        let key = Zeroizing::new(provider.random().generate(TICKET_KEY_SIZE)?);
        let inner = SealerInner {
            current: TicketKey {
                key_id: 0,
                key,
                created_at: Instant::now(),
            },
            previous: Vec::new(),
            rotation_interval,
        };
        Ok(Self {
            provider,
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SealerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier of the current key.
    pub fn key_id(&self) -> u8 {
        self.lock().current.key_id
    }

    /// Switch to a fresh key, keeping the old one for opening.
    pub fn rotate(&self) -> Result<()> {
        let key = Zeroizing::new(self.provider.random().generate(TICKET_KEY_SIZE)?);
        let mut inner = self.lock();
        let key_id = inner.current.key_id.wrapping_add(1);
        let retired = std::mem::replace(
            &mut inner.current,
            TicketKey {
                key_id,
                key,
                created_at: Instant::now(),
            },
        );
        inner.previous.push(retired);
        if inner.previous.len() > MAX_PREVIOUS_TICKET_KEYS {
            let excess = inner.previous.len() - MAX_PREVIOUS_TICKET_KEYS;
            inner.previous.drain(..excess);
        }
        tracing::info!(key_id, "ticket key rotated");
        Ok(())
    }

    /// Seal a ticket blob.
    pub fn seal(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let rotate = {
            let inner = self.lock();
            inner.current.created_at.elapsed() >= inner.rotation_interval
        };
        if rotate {
            self.rotate()?;
        }
        let nonce = self.provider.random().generate(TICKET_NONCE_SIZE)?;
        let aead = self.provider.aead(AeadAlgorithm::Aes256Gcm)?;
        let inner = self.lock();
        let aad = [SEALED_TICKET_VERSION, inner.current.key_id];
        let ciphertext = aead.seal(&inner.current.key, &nonce, &aad, blob)?;

        let mut ticket = Vec::with_capacity(2 + TICKET_NONCE_SIZE + ciphertext.len());
        ticket.extend_from_slice(&aad);
        ticket.extend_from_slice(&nonce);
        ticket.extend_from_slice(&ciphertext);
        Ok(ticket)
    }

    /// Open a sealed ticket. `None` means the ticket is not ours, was
    /// sealed under a dropped key, or has been tampered with.
    pub fn open(&self, ticket: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        if ticket.len() < 2 + TICKET_NONCE_SIZE + TICKET_TAG_SIZE
            || ticket[0] != SEALED_TICKET_VERSION
        {
            return None;
        }
        let key_id = ticket[1];
        let (nonce, ciphertext) = ticket[2..].split_at(TICKET_NONCE_SIZE);
        let aead = self.provider.aead(AeadAlgorithm::Aes256Gcm).ok()?;
        let inner = self.lock();
        let key = if inner.current.key_id == key_id {
            &inner.current
        } else {
            inner.previous.iter().find(|k| k.key_id == key_id)?
        };
        aead.open(&key.key, nonce, &ticket[..2], ciphertext)
            .ok()
            .map(Zeroizing::new)
    }
}

/// Where a server keeps ticket state.
#[derive(Clone)]
pub enum TicketBackend {
    /// State travels inside the ticket
    Sealed(TicketSealer),
    /// State stays on the server; the ticket is a random identifier
    Stored(Arc<dyn SessionStore>),
}

impl std::fmt::Debug for TicketBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketBackend::Sealed(sealer) => f.debug_tuple("Sealed").field(sealer).finish(),
            TicketBackend::Stored(_) => f.write_str("Stored"),
        }
    }
}

const STORE_ID_LEN: usize = 16;

impl TicketBackend {
    /// Turn a session into the opaque ticket sent to the client.
    pub fn issue(&self, provider: &dyn CryptoProvider, session: &SessionTicket) -> Result<Vec<u8>> {
        let blob = Zeroizing::new(session.encode()?);
        match self {
            TicketBackend::Sealed(sealer) => sealer.seal(&blob),
            TicketBackend::Stored(store) => {
                let id = provider.random().generate(STORE_ID_LEN)?;
                store.store_ticket(id.clone(), blob.to_vec());
                Ok(id)
            },
        }
    }

    /// Recover the session behind a ticket the client offered.
    pub fn redeem(&self, ticket: &[u8]) -> Option<SessionTicket> {
        let blob = match self {
            TicketBackend::Sealed(sealer) => sealer.open(ticket)?,
            TicketBackend::Stored(store) => Zeroizing::new(store.take_ticket(ticket)?),
        };
        match SessionTicket::decode(&blob) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable ticket");
                None
            },
        }
    }
}
