//! TLS 1.3 handshake driver shared by both roles.
//!
//! A connection is sans-IO. The host feeds transport bytes with `read_tls`,
//! advances the state machine with `process` (or `resume` after a pending
//! crypto operation) and drains bytes to send with `take_output`.
//!
//! ```text
//!   read_tls ──> RecordReader ──> RecordProtection::open ──> HandshakeReassembler
//!                                                                   │
//!                                          order check (whole batch)│
//!                                                                   v
//!   take_output <── write queue <── role state machine (client / server)
//! ```
//!
//! Outgoing records and key changes go through one ordered queue, so a seal
//! that reports pending never lets a later key change overtake it.

pub mod client;
pub mod order;
pub mod server;

pub use client::{ClientConnection, ClientState};
pub use server::{AuthStage, ServerConnection, ServerState};

use crate::alert::{Alert, PeerAlert};
use crate::certificate_validator::{CertifiedKey, PeerIdentity};
use crate::cipher::{CipherSuite, CryptoSuite};
use crate::codec::{encode_handshake, fragment_message, HandshakeMessage, HandshakeReassembler};
use crate::error::{Error, Result};
use crate::key_schedule::{ConnectionKeys, KeySchedule, Secret};
use crate::messages::{certificate_verify, CertificateVerify, KeyUpdate, KeyUpdateRequest};
use crate::protocol::{ContentType, HandshakeType, ProtocolVersion, MAX_FRAGMENT_LENGTH};
use crate::record::{encode_record, RecordReader, TlsRecord};
use crate::record_protection::{Direction, RecordProtection};
use order::{OrderRule, SeenMessages};
use sectls_crypto::{CryptoProvider, SignatureAlgorithm};
use std::collections::VecDeque;
use std::sync::Arc;

/// Outcome of driving a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Everything buffered has been processed; feed more transport bytes.
    NeedInput,
    /// A crypto operation has not finished; call `resume` later.
    Pending,
}

/// The crypto operation a connection is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStep {
    /// Decrypting a held record
    OpenRecord,
    /// Checking the peer's CertificateVerify
    VerifyPeerSignature,
    /// Producing our CertificateVerify
    SignCertificateVerify,
    /// Encrypting a queued record
    SealRecord,
}

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

impl Role {
    fn peer(self) -> Self {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

pub(crate) enum WriteItem {
    Record(ContentType, Vec<u8>),
    InstallWriteKeys(Arc<dyn CryptoSuite>, ConnectionKeys),
    ClearWriteKeys,
}

/// Role-specific message handling plugged into [`ConnectionCore`].
pub(crate) trait Handler {
    /// Process one complete handshake message.
    fn handle(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()>;

    /// Pick up an outgoing flight that stopped at a pending signature.
    fn continue_flight(&mut self, core: &mut ConnectionCore) -> Result<()>;

    /// Deliver decrypted application data.
    fn application_data(&mut self, core: &mut ConnectionCore, data: Vec<u8>) -> Result<()>;

    /// Ordering table for the current phase and the messages seen in it.
    fn order(&self) -> (&'static [OrderRule], &SeenMessages);

    /// Whether the handshake is still running.
    fn is_handshaking(&self) -> bool;

    /// Move to the terminal state.
    fn set_closed(&mut self);
}

/// Record-level state shared by both roles.
pub(crate) struct ConnectionCore {
    provider: Arc<dyn CryptoProvider>,
    max_fragment: usize,
    records: RecordReader,
    pub(crate) reassembler: HandshakeReassembler,
    protection: RecordProtection,
    queue: VecDeque<WriteItem>,
    output: Vec<u8>,
    held_record: Option<TlsRecord>,
    held_message: Option<HandshakeMessage>,
    pending: Option<PendingStep>,
    received: Vec<u8>,
    pub(crate) early_received: Vec<u8>,
    /// Undecryptable early data still tolerated after rejecting 0-RTT
    early_skip: usize,
    /// Content type byte plus AEAD tag of the skipped records
    early_overhead: usize,
    legacy_first_record: bool,
    closed: bool,
    close_notify_sent: bool,
}

impl ConnectionCore {
    pub(crate) fn new(
        provider: Arc<dyn CryptoProvider>,
        max_fragment: usize,
        max_handshake_message_size: usize,
        role: Role,
    ) -> Self {
        Self {
            provider,
            max_fragment: max_fragment.min(MAX_FRAGMENT_LENGTH),
            records: RecordReader::new(),
            reassembler: HandshakeReassembler::new(max_handshake_message_size),
            protection: RecordProtection::new(),
            queue: VecDeque::new(),
            output: Vec::new(),
            held_record: None,
            held_message: None,
            pending: None,
            received: Vec::new(),
            early_received: Vec::new(),
            early_skip: 0,
            early_overhead: 0,
            legacy_first_record: role == Role::Client,
            closed: false,
            close_notify_sent: false,
        }
    }

    /// Record the step to retry and return the error that unwinds to the
    /// driver.
    pub(crate) fn suspend(&mut self, step: PendingStep) -> Error {
        self.pending = Some(step);
        Error::Pending
    }

    /// Map a provider result: `Pending` suspends at `step`.
    pub(crate) fn suspend_on(&mut self, err: Error, step: PendingStep) -> Error {
        match err {
            Error::Pending => self.suspend(step),
            other => other,
        }
    }

    /// Queue a handshake message, fragmented to the record size. Returns the
    /// encoded message for the transcript.
    pub(crate) fn queue_handshake(&mut self, msg_type: HandshakeType, body: &[u8]) -> Result<Vec<u8>> {
        tracing::debug!(?msg_type, len = body.len(), "queueing handshake message");
        for fragment in fragment_message(msg_type, body, self.max_fragment)? {
            self.queue
                .push_back(WriteItem::Record(ContentType::Handshake, fragment));
        }
        encode_handshake(msg_type, body)
    }

    pub(crate) fn queue_write_keys(&mut self, suite: Arc<dyn CryptoSuite>, keys: ConnectionKeys) {
        self.queue.push_back(WriteItem::InstallWriteKeys(suite, keys));
    }

    pub(crate) fn queue_clear_write_keys(&mut self) {
        self.queue.push_back(WriteItem::ClearWriteKeys);
    }

    pub(crate) fn queue_application_data(&mut self, data: &[u8]) {
        for chunk in data.chunks(self.max_fragment) {
            self.queue
                .push_back(WriteItem::Record(ContentType::ApplicationData, chunk.to_vec()));
        }
    }

    /// Switch read keys. Handshake data may not straddle the change.
    pub(crate) fn install_read_keys(
        &mut self,
        suite: Arc<dyn CryptoSuite>,
        keys: ConnectionKeys,
    ) -> Result<()> {
        self.reassembler.check_key_boundary()?;
        self.protection.install(Direction::Read, suite, keys);
        Ok(())
    }

    /// Tolerate up to `allowance` bytes of early data protected under
    /// `suite` that this side refused to decrypt.
    pub(crate) fn skip_rejected_early_data(&mut self, allowance: usize, suite: CipherSuite) {
        self.early_skip = allowance;
        self.early_overhead = suite.tag_length() + 1;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn pending_step(&self) -> Option<PendingStep> {
        self.pending
    }

    pub(crate) fn read_tls(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.records.feed(data);
        Ok(())
    }

    pub(crate) fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn take_received(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.received)
    }

    /// Encrypt (or frame) queued items in order. A pending seal puts the
    /// record back at the head of the queue.
    fn flush(&mut self) -> Result<()> {
        while let Some(item) = self.queue.pop_front() {
            match item {
                WriteItem::Record(content_type, data) => {
                    if self.protection.is_active(Direction::Write) {
                        match self.protection.seal(content_type, &data) {
                            Ok(payload) => {
                                let record = encode_record(
                                    ContentType::ApplicationData,
                                    ProtocolVersion::Tls12,
                                    &payload,
                                )?;
                                self.output.extend_from_slice(&record);
                            },
                            Err(Error::Pending) => {
                                self.queue
                                    .push_front(WriteItem::Record(content_type, data));
                                return Err(self.suspend(PendingStep::SealRecord));
                            },
                            Err(e) => return Err(e),
                        }
                    } else {
                        let version = if self.legacy_first_record {
                            ProtocolVersion::Tls10
                        } else {
                            ProtocolVersion::Tls12
                        };
                        self.legacy_first_record = false;
                        let record = encode_record(content_type, version, &data)?;
                        self.output.extend_from_slice(&record);
                    }
                },
                WriteItem::InstallWriteKeys(suite, keys) => {
                    self.protection.install(Direction::Write, suite, keys);
                },
                WriteItem::ClearWriteKeys => self.protection.remove(Direction::Write),
            }
        }
        Ok(())
    }

    /// Flush, treating a pending seal as success. The record stays queued
    /// and `pending_step` reports `SealRecord`. While any step is pending
    /// new items only join the queue; `resume` flushes them in order.
    pub(crate) fn flush_allow_pending(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Ok(());
        }
        match self.flush() {
            Err(Error::Pending) => Ok(()),
            other => other,
        }
    }

    /// Drive the connection as far as buffered input allows.
    pub(crate) fn process(&mut self, handler: &mut dyn Handler) -> Result<Progress> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if self.pending.is_some() {
            return self.resume(handler);
        }
        let result = self.drive(handler);
        self.finish(handler, result)
    }

    /// Retry the operation that reported pending, then keep going.
    pub(crate) fn resume(&mut self, handler: &mut dyn Handler) -> Result<Progress> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let result = match self.pending.take() {
            Some(PendingStep::SignCertificateVerify) => handler
                .continue_flight(self)
                .and_then(|()| self.drive(handler)),
            // Held records and messages are retried by the drive loop.
            Some(PendingStep::OpenRecord)
            | Some(PendingStep::VerifyPeerSignature)
            | Some(PendingStep::SealRecord)
            | None => self.drive(handler),
        };
        self.finish(handler, result)
    }

    fn finish(&mut self, handler: &mut dyn Handler, result: Result<Progress>) -> Result<Progress> {
        match result {
            Ok(progress) => Ok(progress),
            Err(Error::Pending) if self.pending.is_some() => Ok(Progress::Pending),
            Err(Error::Pending) => Err(self.fail(
                handler,
                Error::InternalError("pending without a resume point".into()),
            )),
            Err(Error::ConnectionClosed) => {
                tracing::info!("peer closed the connection");
                self.shutdown(handler);
                Err(Error::ConnectionClosed)
            },
            Err(e) if !e.is_fatal() => Err(e),
            Err(e) => Err(self.fail(handler, e)),
        }
    }

    fn drive(&mut self, handler: &mut dyn Handler) -> Result<Progress> {
        loop {
            self.flush()?;
            if let Some(msg) = self.held_message.take() {
                self.dispatch(handler, msg)?;
                continue;
            }
            if let Some(msg) = self.reassembler.next_message() {
                self.dispatch(handler, msg)?;
                continue;
            }
            let record = match self.held_record.take() {
                Some(record) => record,
                None => match self.records.next_record()? {
                    Some(record) => record,
                    None => return Ok(Progress::NeedInput),
                },
            };
            self.route_record(handler, record)?;
        }
    }

    fn dispatch(&mut self, handler: &mut dyn Handler, msg: HandshakeMessage) -> Result<()> {
        match handler.handle(self, &msg) {
            Ok(()) => Ok(()),
            Err(Error::Pending) => {
                if self.pending == Some(PendingStep::VerifyPeerSignature) {
                    self.held_message = Some(msg);
                }
                Err(Error::Pending)
            },
            Err(e) => Err(e),
        }
    }

    fn route_record(&mut self, handler: &mut dyn Handler, record: TlsRecord) -> Result<()> {
        match record.content_type {
            ContentType::ChangeCipherSpec => {
                if handler.is_handshaking() && record.payload == [1] {
                    tracing::debug!("ignoring compatibility ChangeCipherSpec");
                    Ok(())
                } else {
                    Err(Error::UnexpectedMessage("ChangeCipherSpec".into()))
                }
            },
            // A peer that failed before installing its keys alerts in the
            // clear. Once established every alert must be authenticated.
            ContentType::Alert
                if !self.protection.is_active(Direction::Read) || handler.is_handshaking() =>
            {
                self.handle_alert(&record.payload)
            },
            ContentType::Handshake if !self.protection.is_active(Direction::Read) => {
                self.feed_handshake(handler, &record.payload)
            },
            ContentType::ApplicationData if self.protection.is_active(Direction::Read) => {
                self.open_record(handler, record)
            },
            // Early data sent before a HelloRetryRequest reached the client.
            ContentType::ApplicationData if self.early_skip > 0 => {
                self.skip_early_data(record.payload.len())
            },
            other => Err(Error::UnexpectedMessage(format!(
                "{:?} record in this key phase",
                other
            ))),
        }
    }

    fn open_record(&mut self, handler: &mut dyn Handler, record: TlsRecord) -> Result<()> {
        let (content_type, data) = match self.protection.open(&record.payload) {
            Ok(opened) => opened,
            Err(Error::Pending) => {
                self.held_record = Some(record);
                return Err(self.suspend(PendingStep::OpenRecord));
            },
            Err(Error::BadRecordMac) if self.early_skip > 0 => {
                return self.skip_early_data(record.payload.len());
            },
            Err(e) => return Err(e),
        };
        self.early_skip = 0;
        match content_type {
            ContentType::Handshake => self.feed_handshake(handler, &data),
            ContentType::Alert => self.handle_alert(&data),
            ContentType::ApplicationData => handler.application_data(self, data),
            other => Err(Error::UnexpectedMessage(format!(
                "inner content type {:?}",
                other
            ))),
        }
    }

    fn skip_early_data(&mut self, record_len: usize) -> Result<()> {
        let skipped = record_len.saturating_sub(self.early_overhead);
        if skipped > self.early_skip {
            return Err(Error::EarlyDataLimit);
        }
        self.early_skip -= skipped;
        tracing::debug!(skipped, "discarding rejected early data");
        Ok(())
    }

    fn feed_handshake(&mut self, handler: &mut dyn Handler, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::UnexpectedMessage("empty handshake record".into()));
        }
        self.reassembler.feed(payload)?;
        let (rules, seen) = handler.order();
        seen.check_sequence(rules, self.reassembler.ready_types())
    }

    fn handle_alert(&mut self, payload: &[u8]) -> Result<()> {
        match Alert::decode(payload)?.classify() {
            PeerAlert::Closure => {
                if !self.close_notify_sent {
                    self.queue.push_back(WriteItem::Record(
                        ContentType::Alert,
                        Alert::close_notify().encode().to_vec(),
                    ));
                    self.close_notify_sent = true;
                    self.flush_allow_pending()?;
                }
                Err(Error::ConnectionClosed)
            },
            PeerAlert::Canceled => {
                tracing::warn!("peer sent user_canceled");
                Ok(())
            },
            PeerAlert::Fatal(description) => {
                tracing::warn!(?description, "received fatal alert");
                Err(Error::AlertReceived(description))
            },
        }
    }

    /// Send our close_notify.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if !self.close_notify_sent {
            self.queue.push_back(WriteItem::Record(
                ContentType::Alert,
                Alert::close_notify().encode().to_vec(),
            ));
            self.close_notify_sent = true;
        }
        self.flush_allow_pending()
    }

    /// Queue a fatal alert for `err`, flush best-effort and tear down.
    pub(crate) fn fail(&mut self, handler: &mut dyn Handler, err: Error) -> Error {
        tracing::warn!(error = %err, "aborting connection");
        if let Some(description) = err.alert() {
            self.queue.push_back(WriteItem::Record(
                ContentType::Alert,
                Alert::fatal(description).encode().to_vec(),
            ));
            if let Err(flush_err) = self.flush() {
                tracing::debug!(error = %flush_err, "fatal alert not sent");
            }
        }
        self.shutdown(handler);
        err
    }

    fn shutdown(&mut self, handler: &mut dyn Handler) {
        // Held work goes before the keys it would have used.
        self.held_record = None;
        self.held_message = None;
        self.pending = None;
        self.queue.clear();
        self.reassembler.abort();
        self.protection.clear();
        self.closed = true;
        handler.set_closed();
    }

    pub(crate) fn push_received(&mut self, data: Vec<u8>) {
        self.received.extend_from_slice(&data);
    }

    /// Produce our CertificateVerify. `Pending` propagates to the caller.
    pub(crate) fn sign_certificate_verify(
        &self,
        credentials: &CertifiedKey,
        role: Role,
        transcript_hash: &[u8],
    ) -> Result<CertificateVerify> {
        let content = certificate_verify::signed_content(role == Role::Server, transcript_hash);
        let signer = self.provider.signature(credentials.scheme)?;
        let signature = signer.sign(credentials.signing_key.as_bytes(), &content)?;
        Ok(CertificateVerify::new(credentials.scheme, signature))
    }

    /// Check the peer's CertificateVerify against its validated key.
    pub(crate) fn verify_certificate_verify(
        &self,
        peer: &PeerIdentity,
        verify: &CertificateVerify,
        peer_role: Role,
        transcript_hash: &[u8],
        accepted: &[SignatureAlgorithm],
    ) -> Result<()> {
        if !accepted.contains(&verify.algorithm) || verify.algorithm != peer.scheme {
            return Err(Error::IllegalParameter(format!(
                "signature scheme {} not acceptable",
                verify.algorithm.name()
            )));
        }
        let content = certificate_verify::signed_content(peer_role == Role::Server, transcript_hash);
        let verifier = self.provider.signature(verify.algorithm)?;
        match verifier.verify(peer.verifying_key.as_bytes(), &content, &verify.signature) {
            Ok(()) => Ok(()),
            Err(sectls_crypto::Error::Pending) => Err(Error::Pending),
            Err(_) => Err(Error::BadSignature),
        }
    }
}

/// Application traffic secrets and the exporter, available once the server
/// Finished has been processed.
pub(crate) struct TrafficSecrets {
    schedule: KeySchedule,
    client: Secret,
    server: Secret,
    exporter: Secret,
}

impl TrafficSecrets {
    pub(crate) fn new(
        suite: Arc<dyn CryptoSuite>,
        client: Secret,
        server: Secret,
        exporter: Secret,
    ) -> Self {
        Self {
            schedule: KeySchedule::new(suite),
            client,
            server,
            exporter,
        }
    }

    pub(crate) fn suite(&self) -> Arc<dyn CryptoSuite> {
        self.schedule.suite().clone()
    }

    pub(crate) fn secret(&self, role: Role) -> &Secret {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    pub(crate) fn keys(&self, role: Role) -> Result<ConnectionKeys> {
        self.schedule.traffic_keys(self.secret(role))
    }

    /// Move `role`'s secret to the next generation and return its keys.
    fn advance(&mut self, role: Role) -> Result<ConnectionKeys> {
        let slot = match role {
            Role::Client => &mut self.client,
            Role::Server => &mut self.server,
        };
        *slot = self.schedule.update_traffic_secret(slot)?;
        self.schedule.traffic_keys(slot)
    }

    pub(crate) fn export(&self, label: &[u8], context: &[u8], length: usize) -> Result<Vec<u8>> {
        self.schedule.export(&self.exporter, label, context, length)
    }

    /// Finished MAC for post-handshake authentication, keyed from the
    /// current client application secret.
    pub(crate) fn post_handshake_finished(&self, transcript_hash: &[u8]) -> Result<Vec<u8>> {
        self.schedule
            .finished_verify_data(&self.client, transcript_hash)
    }

    pub(crate) fn verify_post_handshake_finished(
        &self,
        transcript_hash: &[u8],
        verify_data: &[u8],
    ) -> Result<bool> {
        self.schedule
            .verify_finished(&self.client, transcript_hash, verify_data)
    }
}

/// Queue a KeyUpdate and switch our write keys after it.
pub(crate) fn send_key_update(
    core: &mut ConnectionCore,
    secrets: &mut TrafficSecrets,
    role: Role,
    request: KeyUpdateRequest,
) -> Result<()> {
    let body = KeyUpdate::new(request).encode()?;
    core.queue_handshake(HandshakeType::KeyUpdate, &body)?;
    let keys = secrets.advance(role)?;
    core.queue_write_keys(secrets.suite(), keys);
    tracing::info!(?role, ?request, "sent KeyUpdate");
    Ok(())
}

/// Apply a received KeyUpdate, answering it when asked to.
pub(crate) fn receive_key_update(
    core: &mut ConnectionCore,
    secrets: &mut TrafficSecrets,
    role: Role,
    msg: &HandshakeMessage,
) -> Result<()> {
    let update = KeyUpdate::decode(msg.body())?;
    let keys = secrets.advance(role.peer())?;
    core.install_read_keys(secrets.suite(), keys)?;
    tracing::info!(?role, request = ?update.request_update, "received KeyUpdate");
    if update.request_update == KeyUpdateRequest::UpdateRequested {
        send_key_update(core, secrets, role, KeyUpdateRequest::UpdateNotRequested)?;
    }
    Ok(())
}

/// Random bytes as a fixed array.
pub(crate) fn random_array<const N: usize>(provider: &dyn CryptoProvider) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    provider.random().fill(&mut out)?;
    Ok(out)
}
