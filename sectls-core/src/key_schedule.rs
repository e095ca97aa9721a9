//! Key derivation for one connection.
//!
//! Secrets are derived in three stages, each an HKDF-Extract whose salt is
//! `derive_secret(previous, "derived", "")`. Which transcript prefix feeds a
//! traffic secret decides when the caller may derive it.
//!
//! ```text
//!  stage        input        method                     secrets (label)
//!  -----------  -----------  -------------------------  -----------------------------------
//!  early        PSK or 0s    derive_early_secret        binder    ("ext binder"/"res binder")
//!                                                       c early   ("c e traffic", CH)
//!  handshake    (EC)DHE      derive_handshake_secret    c/s hs    ("c hs traffic", CH..SH)
//!  master       0s           derive_master_secret       c/s ap    ("c ap traffic", CH..server Fin)
//!                                                       exporter  ("exp master", CH..server Fin)
//!                                                       resumption ("res master", CH..client Fin)
//! ```
//!
//! Every traffic secret expands to a key and IV through [`KeySchedule::traffic_keys`],
//! and to its successor through [`KeySchedule::update_traffic_secret`]. All
//! secret material is wiped when dropped.

use crate::cipher::CryptoSuite;
use crate::error::{Error, Result};
use sectls_crypto::HashAlgorithm;
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// HKDF labels (RFC 8446 Section 7.1). The "tls13 " prefix is added by
/// [`hkdf_expand_label`].
pub mod labels {
    /// Salt derivation between stages
    pub const DERIVED: &[u8] = b"derived";
    /// External PSK binder key
    pub const EXT_BINDER: &[u8] = b"ext binder";
    /// Resumption PSK binder key
    pub const RES_BINDER: &[u8] = b"res binder";
    /// Client early traffic secret
    pub const CLIENT_EARLY_TRAFFIC: &[u8] = b"c e traffic";
    /// Early exporter master secret
    pub const EARLY_EXPORTER_MASTER: &[u8] = b"e exp master";
    /// Client handshake traffic secret
    pub const CLIENT_HANDSHAKE_TRAFFIC: &[u8] = b"c hs traffic";
    /// Server handshake traffic secret
    pub const SERVER_HANDSHAKE_TRAFFIC: &[u8] = b"s hs traffic";
    /// Client application traffic secret
    pub const CLIENT_APPLICATION_TRAFFIC: &[u8] = b"c ap traffic";
    /// Server application traffic secret
    pub const SERVER_APPLICATION_TRAFFIC: &[u8] = b"s ap traffic";
    /// Exporter master secret
    pub const EXPORTER_MASTER: &[u8] = b"exp master";
    /// Resumption master secret
    pub const RESUMPTION_MASTER: &[u8] = b"res master";
    /// Traffic key
    pub const KEY: &[u8] = b"key";
    /// Traffic IV
    pub const IV: &[u8] = b"iv";
    /// Finished key
    pub const FINISHED: &[u8] = b"finished";
    /// Next-generation traffic secret
    pub const TRAFFIC_UPDATE: &[u8] = b"traffic upd";
    /// Ticket PSK
    pub const RESUMPTION: &[u8] = b"resumption";
    /// Exporter output
    pub const EXPORTER: &[u8] = b"exporter";
}

/// What a [`Secret`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    /// Early secret
    Early,
    /// Handshake secret
    Handshake,
    /// Master secret
    Master,
    /// client_early_traffic_secret
    ClientEarlyTraffic,
    /// client_handshake_traffic_secret
    ClientHandshakeTraffic,
    /// server_handshake_traffic_secret
    ServerHandshakeTraffic,
    /// client_application_traffic_secret_N
    ClientApplicationTraffic,
    /// server_application_traffic_secret_N
    ServerApplicationTraffic,
    /// early_exporter_master_secret
    EarlyExporter,
    /// exporter_master_secret
    Exporter,
    /// resumption_master_secret
    Resumption,
    /// binder_key
    Binder,
    /// finished_key
    Finished,
}

/// Opaque secret bytes tagged with their role and hash. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    #[zeroize(skip)]
    kind: SecretKind,
    #[zeroize(skip)]
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl Secret {
    /// Wrap raw bytes.
    pub fn new(kind: SecretKind, algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            algorithm,
            bytes,
        }
    }

    /// Role of this secret.
    pub fn kind(&self) -> SecretKind {
        self.kind
    }

    /// Hash that produced it.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("kind", &self.kind)
            .field("algorithm", &self.algorithm)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Which traffic secret to derive from a stage secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficPhase {
    /// "c e traffic" from the early secret
    ClientEarly,
    /// "e exp master" from the early secret
    EarlyExporter,
    /// "c hs traffic" from the handshake secret
    ClientHandshake,
    /// "s hs traffic" from the handshake secret
    ServerHandshake,
    /// "c ap traffic" from the master secret
    ClientApplication,
    /// "s ap traffic" from the master secret
    ServerApplication,
    /// "exp master" from the master secret
    Exporter,
    /// "res master" from the master secret
    Resumption,
}

impl TrafficPhase {
    const fn label(self) -> &'static [u8] {
        match self {
            TrafficPhase::ClientEarly => labels::CLIENT_EARLY_TRAFFIC,
            TrafficPhase::EarlyExporter => labels::EARLY_EXPORTER_MASTER,
            TrafficPhase::ClientHandshake => labels::CLIENT_HANDSHAKE_TRAFFIC,
            TrafficPhase::ServerHandshake => labels::SERVER_HANDSHAKE_TRAFFIC,
            TrafficPhase::ClientApplication => labels::CLIENT_APPLICATION_TRAFFIC,
            TrafficPhase::ServerApplication => labels::SERVER_APPLICATION_TRAFFIC,
            TrafficPhase::Exporter => labels::EXPORTER_MASTER,
            TrafficPhase::Resumption => labels::RESUMPTION_MASTER,
        }
    }

    const fn base_kind(self) -> SecretKind {
        match self {
            TrafficPhase::ClientEarly | TrafficPhase::EarlyExporter => SecretKind::Early,
            TrafficPhase::ClientHandshake | TrafficPhase::ServerHandshake => SecretKind::Handshake,
            TrafficPhase::ClientApplication
            | TrafficPhase::ServerApplication
            | TrafficPhase::Exporter
            | TrafficPhase::Resumption => SecretKind::Master,
        }
    }

    const fn output_kind(self) -> SecretKind {
        match self {
            TrafficPhase::ClientEarly => SecretKind::ClientEarlyTraffic,
            TrafficPhase::EarlyExporter => SecretKind::EarlyExporter,
            TrafficPhase::ClientHandshake => SecretKind::ClientHandshakeTraffic,
            TrafficPhase::ServerHandshake => SecretKind::ServerHandshakeTraffic,
            TrafficPhase::ClientApplication => SecretKind::ClientApplicationTraffic,
            TrafficPhase::ServerApplication => SecretKind::ServerApplicationTraffic,
            TrafficPhase::Exporter => SecretKind::Exporter,
            TrafficPhase::Resumption => SecretKind::Resumption,
        }
    }
}

/// Which PSK flavour a binder key is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PskKind {
    /// Ticket from a previous connection ("res binder")
    Resumption,
    /// Out-of-band key ("ext binder")
    External,
}

/// 64-bit record sequence number split into two words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber {
    /// High word
    pub hi: u32,
    /// Low word
    pub lo: u32,
}

impl SequenceNumber {
    /// Combined value.
    pub const fn value(self) -> u64 {
        ((self.hi as u64) << 32) | self.lo as u64
    }

    /// Whether no further record may be protected.
    pub const fn is_exhausted(self) -> bool {
        self.hi == u32::MAX && self.lo == u32::MAX
    }

    /// Step to the next number. The low word carries into the high word;
    /// the counter never wraps.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_exhausted() {
            return Err(Error::SequenceExhausted);
        }
        if self.lo == u32::MAX {
            self.hi += 1;
            self.lo = 0;
        } else {
            self.lo += 1;
        }
        Ok(())
    }
}

/// Key, IV and sequence number for one direction.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ConnectionKeys {
    key: Vec<u8>,
    iv: Vec<u8>,
    #[zeroize(skip)]
    seq: SequenceNumber,
}

impl ConnectionKeys {
    /// Keys starting at sequence number zero.
    pub fn new(key: Vec<u8>, iv: Vec<u8>) -> Self {
        Self {
            key,
            iv,
            seq: SequenceNumber::default(),
        }
    }

    /// Traffic key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Static IV.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Next sequence number to use.
    pub fn sequence(&self) -> SequenceNumber {
        self.seq
    }

    /// Per-record nonce: the IV with the big-endian sequence number XORed
    /// into its low 8 bytes.
    pub fn nonce(&self) -> Vec<u8> {
        let mut nonce = self.iv.clone();
        let seq = self.seq.value().to_be_bytes();
        let offset = nonce.len().saturating_sub(seq.len());
        for (n, s) in nonce[offset..].iter_mut().zip(seq.iter()) {
            *n ^= s;
        }
        nonce
    }

    /// Move to the next record.
    pub fn advance(&mut self) -> Result<()> {
        self.seq.advance()
    }

    /// Overwrite the counter. Only used to exercise the carry logic.
    #[doc(hidden)]
    pub fn set_sequence(&mut self, seq: SequenceNumber) {
        self.seq = seq;
    }
}

impl fmt::Debug for ConnectionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionKeys")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .field("seq", &self.seq)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Initial,
    Early,
    Handshake,
    Master,
}

/// TLS 1.3 key schedule engine for one negotiated suite.
///
/// The stage secrets must be produced in order (early, handshake, master),
/// each exactly once.
pub struct KeySchedule {
    suite: Arc<dyn CryptoSuite>,
    stage: Stage,
}

impl fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySchedule")
            .field("suite", &self.suite.suite())
            .field("stage", &self.stage)
            .finish()
    }
}

impl KeySchedule {
    /// Create a key schedule for a negotiated suite.
    pub fn new(suite: Arc<dyn CryptoSuite>) -> Self {
        Self {
            suite,
            stage: Stage::Initial,
        }
    }

    /// The suite this schedule derives for.
    pub fn suite(&self) -> &Arc<dyn CryptoSuite> {
        &self.suite
    }

    fn algorithm(&self) -> HashAlgorithm {
        self.suite.hash_algorithm()
    }

    fn enter(&mut self, from: Stage, to: Stage) -> Result<()> {
        if self.stage != from {
            return Err(Error::InternalError(format!(
                "key schedule stage {:?} requested from {:?}",
                to, self.stage
            )));
        }
        self.stage = to;
        Ok(())
    }

    fn expect_kind(secret: &Secret, kind: SecretKind) -> Result<()> {
        if secret.kind() != kind {
            return Err(Error::InternalError(format!(
                "expected {:?} secret, got {:?}",
                kind,
                secret.kind()
            )));
        }
        Ok(())
    }

    /// HKDF-Extract(0, PSK or zeros) = Early Secret.
    pub fn derive_early_secret(&mut self, psk: Option<&[u8]>) -> Result<Secret> {
        self.enter(Stage::Initial, Stage::Early)?;
        let zeros = vec![0u8; self.suite.hash_len()];
        let ikm = psk.unwrap_or(&zeros);
        let early = self.suite.extract(&zeros, ikm)?;
        Ok(Secret::new(SecretKind::Early, self.algorithm(), early))
    }

    /// HKDF-Extract(Derive-Secret(early, "derived", ""), (EC)DHE).
    ///
    /// `dh_shared` is `None` in psk_ke mode.
    pub fn derive_handshake_secret(
        &mut self,
        early: &Secret,
        dh_shared: Option<&[u8]>,
    ) -> Result<Secret> {
        Self::expect_kind(early, SecretKind::Early)?;
        self.enter(Stage::Early, Stage::Handshake)?;
        let salt = self.derived_salt(early)?;
        let zeros = Zeroizing::new(vec![0u8; self.suite.hash_len()]);
        let ikm = dh_shared.unwrap_or(&zeros);
        let handshake = self.suite.extract(&salt, ikm)?;
        Ok(Secret::new(SecretKind::Handshake, self.algorithm(), handshake))
    }

    /// HKDF-Extract(Derive-Secret(handshake, "derived", ""), 0).
    pub fn derive_master_secret(&mut self, handshake: &Secret) -> Result<Secret> {
        Self::expect_kind(handshake, SecretKind::Handshake)?;
        self.enter(Stage::Handshake, Stage::Master)?;
        let salt = self.derived_salt(handshake)?;
        let zeros = vec![0u8; self.suite.hash_len()];
        let master = self.suite.extract(&salt, &zeros)?;
        Ok(Secret::new(SecretKind::Master, self.algorithm(), master))
    }

    fn derived_salt(&self, secret: &Secret) -> Result<Zeroizing<Vec<u8>>> {
        let empty_hash = self.suite.hash(&[])?;
        Ok(Zeroizing::new(derive_secret(
            self.suite.as_ref(),
            secret.as_bytes(),
            labels::DERIVED,
            &empty_hash,
        )?))
    }

    /// Derive-Secret(base, phase label, transcript_hash).
    pub fn derive_traffic_secret(
        &self,
        phase: TrafficPhase,
        base: &Secret,
        transcript_hash: &[u8],
    ) -> Result<Secret> {
        Self::expect_kind(base, phase.base_kind())?;
        let bytes = derive_secret(
            self.suite.as_ref(),
            base.as_bytes(),
            phase.label(),
            transcript_hash,
        )?;
        Ok(Secret::new(phase.output_kind(), self.algorithm(), bytes))
    }

    /// Expand a traffic secret into key and IV.
    pub fn expand_to_key_and_iv(
        &self,
        secret: &Secret,
        key_len: usize,
        iv_len: usize,
    ) -> Result<ConnectionKeys> {
        let suite = self.suite.as_ref();
        let key = hkdf_expand_label(suite, secret.as_bytes(), labels::KEY, &[], key_len)?;
        let iv = hkdf_expand_label(suite, secret.as_bytes(), labels::IV, &[], iv_len)?;
        Ok(ConnectionKeys::new(key, iv))
    }

    /// Key and IV sized for the suite.
    pub fn traffic_keys(&self, secret: &Secret) -> Result<ConnectionKeys> {
        self.expand_to_key_and_iv(secret, self.suite.key_len(), self.suite.iv_len())
    }

    /// application_traffic_secret_N+1 (RFC 8446 Section 7.2).
    pub fn update_traffic_secret(&self, secret: &Secret) -> Result<Secret> {
        if !matches!(
            secret.kind(),
            SecretKind::ClientApplicationTraffic | SecretKind::ServerApplicationTraffic
        ) {
            return Err(Error::InternalError(
                "only application traffic secrets are updated".into(),
            ));
        }
        let next = hkdf_expand_label(
            self.suite.as_ref(),
            secret.as_bytes(),
            labels::TRAFFIC_UPDATE,
            &[],
            self.suite.hash_len(),
        )?;
        Ok(Secret::new(secret.kind(), self.algorithm(), next))
    }

    /// finished_key = HKDF-Expand-Label(base, "finished", "", Hash.length).
    pub fn derive_finished_key(&self, base: &Secret) -> Result<Secret> {
        let key = hkdf_expand_label(
            self.suite.as_ref(),
            base.as_bytes(),
            labels::FINISHED,
            &[],
            self.suite.hash_len(),
        )?;
        Ok(Secret::new(SecretKind::Finished, self.algorithm(), key))
    }

    /// binder_key = Derive-Secret(early, "ext binder" | "res binder", "").
    pub fn derive_binder_key(&self, early: &Secret, kind: PskKind) -> Result<Secret> {
        Self::expect_kind(early, SecretKind::Early)?;
        let label = match kind {
            PskKind::Resumption => labels::RES_BINDER,
            PskKind::External => labels::EXT_BINDER,
        };
        let empty_hash = self.suite.hash(&[])?;
        let key = derive_secret(self.suite.as_ref(), early.as_bytes(), label, &empty_hash)?;
        Ok(Secret::new(SecretKind::Binder, self.algorithm(), key))
    }

    /// verify_data = HMAC(finished_key(base), transcript_hash).
    pub fn finished_verify_data(&self, base: &Secret, transcript_hash: &[u8]) -> Result<Vec<u8>> {
        let finished_key = self.derive_finished_key(base)?;
        self.suite.hmac(finished_key.as_bytes(), transcript_hash)
    }

    /// Constant-time check of a peer's Finished.
    pub fn verify_finished(
        &self,
        base: &Secret,
        transcript_hash: &[u8],
        verify_data: &[u8],
    ) -> Result<bool> {
        let finished_key = self.derive_finished_key(base)?;
        self.suite
            .verify_hmac(finished_key.as_bytes(), transcript_hash, verify_data)
    }

    /// Ticket PSK = HKDF-Expand-Label(res_master, "resumption", nonce, Hash.length).
    pub fn derive_resumption_psk(&self, resumption: &Secret, nonce: &[u8]) -> Result<Secret> {
        Self::expect_kind(resumption, SecretKind::Resumption)?;
        let psk = hkdf_expand_label(
            self.suite.as_ref(),
            resumption.as_bytes(),
            labels::RESUMPTION,
            nonce,
            self.suite.hash_len(),
        )?;
        Ok(Secret::new(SecretKind::Resumption, self.algorithm(), psk))
    }

    /// TLS-Exporter (RFC 8446 Section 7.5).
    pub fn export(
        &self,
        exporter: &Secret,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>> {
        if !matches!(
            exporter.kind(),
            SecretKind::Exporter | SecretKind::EarlyExporter
        ) {
            return Err(Error::InternalError("not an exporter secret".into()));
        }
        let suite = self.suite.as_ref();
        let empty_hash = suite.hash(&[])?;
        let per_label = Zeroizing::new(derive_secret(
            suite,
            exporter.as_bytes(),
            label,
            &empty_hash,
        )?);
        let context_hash = suite.hash(context)?;
        hkdf_expand_label(suite, &per_label, labels::EXPORTER, &context_hash, length)
    }
}

/// Derive-Secret(secret, label, transcript_hash) =
/// HKDF-Expand-Label(secret, label, transcript_hash, Hash.length).
pub fn derive_secret(
    suite: &dyn CryptoSuite,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>> {
    hkdf_expand_label(suite, secret, label, transcript_hash, suite.hash_len())
}

/// HKDF-Expand-Label implementation per RFC 8446 Section 7.1.
///
/// ```text
/// struct {
///     uint16 length = Length;
///     opaque label<7..255> = "tls13 " + Label;
///     opaque context<0..255> = Context;
/// } HkdfLabel;
/// ```
pub fn hkdf_expand_label(
    suite: &dyn CryptoSuite,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>> {
    let info = hkdf_label(label, context, length)?;
    suite.expand(secret, &info, length)
}

/// Encoded HkdfLabel structure.
pub fn hkdf_label(label: &[u8], context: &[u8], length: usize) -> Result<Vec<u8>> {
    const PREFIX: &[u8] = b"tls13 ";
    let full_label_len = PREFIX.len() + label.len();
    if full_label_len > 255 || context.len() > 255 || length > u16::MAX as usize {
        return Err(Error::InternalError("HkdfLabel field too long".into()));
    }

    let mut info = Vec::with_capacity(4 + full_label_len + context.len());
    info.extend_from_slice(&(length as u16).to_be_bytes());
    info.push(full_label_len as u8);
    info.extend_from_slice(PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{select_suite, CipherSuite};
    use sectls_crypto::CryptoProvider;
    use sectls_crypto_mock::MockCryptoProvider;

    fn schedule(suite: CipherSuite) -> KeySchedule {
        let provider: Arc<dyn CryptoProvider> = Arc::new(MockCryptoProvider::new());
        KeySchedule::new(select_suite(provider, suite).unwrap())
    }

    #[test]
    fn test_hkdf_label_layout() {
        let info = hkdf_label(b"key", &[], 16).unwrap();
        assert_eq!(info, b"\x00\x10\x09tls13 key\x00".to_vec());
    }

    #[test]
    fn test_early_secret_without_psk() {
        // RFC 8448 Section 3
        let mut ks = schedule(CipherSuite::Aes128GcmSha256);
        let early = ks.derive_early_secret(None).unwrap();
        assert_eq!(
            hex::encode(early.as_bytes()),
            "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a"
        );
        assert_eq!(early.kind(), SecretKind::Early);
    }

    #[test]
    fn test_stage_order_enforced() {
        let mut ks = schedule(CipherSuite::Aes128GcmSha256);
        let early = ks.derive_early_secret(None).unwrap();
        assert!(ks.derive_early_secret(None).is_err());

        let handshake = ks.derive_handshake_secret(&early, Some(&[1u8; 32])).unwrap();
        assert!(ks.derive_handshake_secret(&early, Some(&[1u8; 32])).is_err());
        assert!(ks.derive_master_secret(&early).is_err());

        let master = ks.derive_master_secret(&handshake).unwrap();
        assert_eq!(master.len(), 32);
    }

    #[test]
    fn test_traffic_secret_requires_matching_base() {
        let mut ks = schedule(CipherSuite::Aes128GcmSha256);
        let early = ks.derive_early_secret(None).unwrap();
        assert!(ks
            .derive_traffic_secret(TrafficPhase::ClientHandshake, &early, &[0; 32])
            .is_err());
        assert!(ks
            .derive_traffic_secret(TrafficPhase::ClientEarly, &early, &[0; 32])
            .is_ok());
    }

    #[test]
    fn test_deterministic() {
        let derive = || {
            let mut ks = schedule(CipherSuite::Aes256GcmSha384);
            let early = ks.derive_early_secret(Some(&[7u8; 48])).unwrap();
            let hs = ks.derive_handshake_secret(&early, Some(&[9u8; 32])).unwrap();
            let secret = ks
                .derive_traffic_secret(TrafficPhase::ServerHandshake, &hs, &[3u8; 48])
                .unwrap();
            let keys = ks.traffic_keys(&secret).unwrap();
            (secret.as_bytes().to_vec(), keys.key().to_vec(), keys.iv().to_vec())
        };
        let (a, b) = (derive(), derive());
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 48);
        assert_eq!(a.1.len(), 32);
        assert_eq!(a.2.len(), 12);
    }

    #[test]
    fn test_update_traffic_secret() {
        let mut ks = schedule(CipherSuite::Aes128GcmSha256);
        let early = ks.derive_early_secret(None).unwrap();
        let hs = ks.derive_handshake_secret(&early, Some(&[1; 32])).unwrap();
        let master = ks.derive_master_secret(&hs).unwrap();
        let app = ks
            .derive_traffic_secret(TrafficPhase::ClientApplication, &master, &[2; 32])
            .unwrap();
        let next = ks.update_traffic_secret(&app).unwrap();
        assert_ne!(next.as_bytes(), app.as_bytes());
        assert_eq!(next.kind(), SecretKind::ClientApplicationTraffic);
        assert!(ks.update_traffic_secret(&hs).is_err());
    }

    #[test]
    fn test_binder_keys_differ_by_kind() {
        let mut ks = schedule(CipherSuite::Aes128GcmSha256);
        let early = ks.derive_early_secret(Some(&[5; 32])).unwrap();
        let res = ks.derive_binder_key(&early, PskKind::Resumption).unwrap();
        let ext = ks.derive_binder_key(&early, PskKind::External).unwrap();
        assert_ne!(res.as_bytes(), ext.as_bytes());
    }

    #[test]
    fn test_sequence_number_carry() {
        let mut seq = SequenceNumber {
            hi: 0,
            lo: u32::MAX,
        };
        seq.advance().unwrap();
        assert_eq!(seq, SequenceNumber { hi: 1, lo: 0 });
        assert_eq!(seq.value(), 1 << 32);

        let mut last = SequenceNumber {
            hi: u32::MAX,
            lo: u32::MAX,
        };
        assert_eq!(last.advance(), Err(Error::SequenceExhausted));
    }

    #[test]
    fn test_nonce_xor() {
        let mut keys = ConnectionKeys::new(vec![0; 16], vec![0xff; 12]);
        keys.set_sequence(SequenceNumber { hi: 0, lo: 1 });
        let nonce = keys.nonce();
        assert_eq!(&nonce[..11], &[0xff; 11]);
        assert_eq!(nonce[11], 0xfe);
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new(SecretKind::Master, HashAlgorithm::Sha256, vec![0xab; 32]);
        let rendered = format!("{:?}", secret);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"));
    }
}
