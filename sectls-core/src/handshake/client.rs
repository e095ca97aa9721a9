//! TLS 1.3 client handshake state machine.
//!
//! ## State Transitions
//! ```text
//! Begin
//!   | send ClientHello (+ early data keys)
//!   v
//! ClientHelloSent <--- HelloRetryRequest (once): send ClientHello again
//!   | recv ServerHello
//! ServerHelloReceived
//!   | recv EncryptedExtensions
//! ServerParamsReceived
//!   | recv CertificateRequest (optional, certificate mode only)
//!   | recv Certificate, CertificateVerify (skipped when a PSK was accepted)
//! ServerCertVerified
//!   | recv Finished
//! ServerFinishedReceived
//!   | send EndOfEarlyData (if accepted)
//!   | send Certificate, CertificateVerify (if requested)
//!   | send Finished
//! Established
//! ```

use super::order::{self, OrderRule, SeenMessages};
use super::{
    random_array, receive_key_update, send_key_update, ConnectionCore, Handler, PendingStep,
    Progress, Role, TrafficSecrets,
};
use crate::certificate_validator::{CertifiedKey, PeerIdentity};
use crate::cipher::{select_suite, CipherSuite, CryptoSuite};
use crate::codec::{encode_handshake, HandshakeMessage, Reader};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::extensions::{Extension, KeyShareEntry, PskKeyExchangeMode};
use crate::key_schedule::{KeySchedule, PskKind, Secret, TrafficPhase};
use crate::messages::{
    Certificate, CertificateRequest, CertificateVerify, ClientHello, EncryptedExtensions,
    EndOfEarlyData, Finished, HelloRetryRequest, KeyUpdateRequest, NewSessionTicket, ServerHello,
};
use crate::protocol::{ExtensionType, HandshakeType, ProtocolVersion, HANDSHAKE_HEADER_LEN};
use crate::psk::{compute_binder, truncation_point, OfferedPsks, PreSharedKeyIdentity};
use crate::session::{now_millis, ClientSession, HandshakeSession};
use crate::transcript::TranscriptHash;
use sectls_crypto::{KeyExchangeAlgorithm, PrivateKey, SignatureAlgorithm};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Client handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Nothing sent yet
    Begin,
    /// Waiting for ServerHello (or HelloRetryRequest)
    ClientHelloSent,
    /// Handshake keys installed, waiting for EncryptedExtensions
    ServerHelloReceived,
    /// Waiting for CertificateRequest, Certificate or (with a PSK) Finished
    ServerParamsReceived,
    /// Waiting for Certificate
    CertRequestReceived,
    /// Waiting for CertificateVerify
    ServerCertificateReceived,
    /// Waiting for Finished
    ServerCertVerified,
    /// Server flight complete, sending ours
    ServerFinishedReceived,
    /// Client Certificate queued, CertificateVerify next
    CertificateSent,
    /// CertificateVerify queued (or not needed), Finished next
    CertVerifySent,
    /// Client Finished queued
    FinishedSent,
    /// Application data may flow
    Established,
    /// Terminal
    Closed,
}

struct KeyShare {
    group: KeyExchangeAlgorithm,
    private: PrivateKey,
    public: Vec<u8>,
}

enum EarlyData {
    /// Offered with the first ClientHello; `sent` counts plaintext bytes.
    Offered { limit: u32, sent: u32 },
    Accepted,
    Rejected,
}

/// Post-handshake authentication response in progress.
struct ClientAuthResponse {
    context: Vec<u8>,
    transcript: TranscriptHash,
    credentials: Option<CertifiedKey>,
}

struct ClientHandshake {
    config: Arc<ClientConfig>,
    state: ClientState,
    seen: SeenMessages,
    transcript: TranscriptHash,
    client_random: [u8; 32],
    session_id: Vec<u8>,
    key_share: Option<KeyShare>,
    cookie: Option<Vec<u8>>,
    retried: bool,
    retry_suite: Option<CipherSuite>,
    psks: Vec<PreSharedKeyIdentity>,
    resuming: Option<ClientSession>,
    early: Option<EarlyData>,
    suite: Option<Arc<dyn CryptoSuite>>,
    schedule: Option<KeySchedule>,
    handshake_secret: Option<Secret>,
    client_hs_secret: Option<Secret>,
    server_hs_secret: Option<Secret>,
    master_secret: Option<Secret>,
    session: Option<HandshakeSession>,
    peer: Option<PeerIdentity>,
    cert_request: Option<CertificateRequest>,
    client_credentials: Option<CertifiedKey>,
    traffic: Option<TrafficSecrets>,
    tickets: Vec<ClientSession>,
    auth_response: Option<ClientAuthResponse>,
}

impl ClientHandshake {
    fn provider(&self) -> &dyn sectls_crypto::CryptoProvider {
        self.config.provider.as_ref()
    }

    fn is_post_handshake(&self) -> bool {
        self.state == ClientState::Established
    }

    fn suite(&self) -> Result<Arc<dyn CryptoSuite>> {
        self.suite
            .clone()
            .ok_or_else(|| Error::InternalError("no cipher suite negotiated".into()))
    }

    fn schedule(&self) -> Result<&KeySchedule> {
        self.schedule
            .as_ref()
            .ok_or_else(|| Error::InternalError("no key schedule".into()))
    }

    fn traffic(&mut self) -> Result<&mut TrafficSecrets> {
        self.traffic
            .as_mut()
            .ok_or_else(|| Error::InternalError("no traffic secrets".into()))
    }

    fn generate_key_share(&mut self, group: KeyExchangeAlgorithm) -> Result<()> {
        let kx = self.provider().key_exchange(group)?;
        let (private, public) = kx.generate_keypair()?;
        self.key_share = Some(KeyShare {
            group,
            private,
            public: public.into_bytes(),
        });
        Ok(())
    }

    /// Resumption and external PSKs, in preference order.
    fn collect_psks(&mut self) {
        let now = now_millis();
        if let Some(session) = &self.resuming {
            if session.is_valid(now) && self.config.cipher_suites.contains(&session.cipher_suite) {
                self.psks.push(PreSharedKeyIdentity {
                    identity: session.ticket.clone(),
                    kind: PskKind::Resumption,
                    obfuscated_ticket_age: session.obfuscated_age(now),
                    suite: session.cipher_suite,
                    secret: Zeroizing::new(session.secret.as_bytes().to_vec()),
                    binder: Vec::new(),
                    max_early_data: session.max_early_data.unwrap_or(0),
                });
            } else {
                tracing::debug!("stored session unusable, doing a full handshake");
            }
        }
        self.psks.extend(
            self.config
                .external_psks
                .iter()
                .map(PreSharedKeyIdentity::from),
        );
    }

    fn wants_dhe(&self) -> bool {
        self.psks.is_empty()
            || self
                .config
                .psk_modes
                .contains(&PskKeyExchangeMode::PskDheKe)
    }

    fn start(&mut self, core: &mut ConnectionCore) -> Result<()> {
        self.client_random = random_array(self.provider())?;
        self.session_id = random_array::<32>(self.provider())?.to_vec();
        self.collect_psks();
        if self.wants_dhe() {
            let group = *self
                .config
                .groups
                .first()
                .ok_or_else(|| Error::InvalidConfig("no key exchange groups".into()))?;
            self.generate_key_share(group)?;
        }
        self.send_client_hello(core)?;
        self.offer_early_data(core)?;
        self.state = ClientState::ClientHelloSent;
        Ok(())
    }

    fn send_client_hello(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let config = self.config.clone();
        let mut hello = ClientHello::new(self.client_random, config.cipher_suites.clone())
            .with_session_id(self.session_id.clone());
        let ext = &mut hello.extensions;
        ext.add_supported_versions(&[ProtocolVersion::Tls13])?;
        let groups: Vec<u16> = config.groups.iter().map(|g| g.to_u16()).collect();
        ext.add_supported_groups(&groups)?;
        let schemes: Vec<u16> = config
            .signature_algorithms
            .iter()
            .map(|s| s.to_u16())
            .collect();
        ext.add_signature_algorithms(&schemes)?;
        if let Some(share) = &self.key_share {
            ext.add_client_key_shares(&[KeyShareEntry {
                group: share.group.to_u16(),
                key_exchange: share.public.clone(),
            }])?;
        } else {
            ext.add_client_key_shares(&[])?;
        }
        if let Some(name) = &config.server_name {
            ext.add_server_name(name)?;
        }
        if !config.alpn_protocols.is_empty() {
            ext.add_alpn(&config.alpn_protocols)?;
        }
        if config.post_handshake_auth {
            ext.add_post_handshake_auth();
        }
        if let Some(cookie) = &self.cookie {
            ext.add_cookie(cookie)?;
        }

        let encoded = if self.psks.is_empty() {
            encode_handshake(HandshakeType::ClientHello, &hello.encode()?)?
        } else {
            ext.add_psk_modes(&config.psk_modes)?;
            if self.early_data_possible() {
                ext.add_early_data();
            }
            self.bind_psks(&mut hello)?
        };

        let body = &encoded[HANDSHAKE_HEADER_LEN..];
        let encoded = core.queue_handshake(HandshakeType::ClientHello, body)?;
        self.transcript.update(&encoded);
        tracing::debug!(
            retried = self.retried,
            psks = self.psks.len(),
            "sent ClientHello"
        );
        Ok(())
    }

    /// Append the pre_shared_key extension and fill in the binders. Returns
    /// the encoded message.
    fn bind_psks(&mut self, hello: &mut ClientHello) -> Result<Vec<u8>> {
        let mut offered = OfferedPsks {
            identities: self.psks.iter().map(|p| p.wire_identity()).collect(),
            binders: self
                .psks
                .iter()
                .map(|p| vec![0u8; p.suite.hash_algorithm().output_size()])
                .collect(),
        };
        hello
            .extensions
            .add(Extension::new(ExtensionType::PreSharedKey, offered.encode()?));
        let mut encoded = encode_handshake(HandshakeType::ClientHello, &hello.encode()?)?;
        let truncated = truncation_point(&encoded, &offered)?;

        let provider = self.config.provider.clone();
        for psk in &mut self.psks {
            let hash = self
                .transcript
                .hash_with_algorithm(psk.suite.hash_algorithm(), &encoded[..truncated])?;
            let mut schedule = KeySchedule::new(select_suite(provider.clone(), psk.suite)?);
            let early = schedule.derive_early_secret(Some(&psk.secret))?;
            let binder_key = schedule.derive_binder_key(&early, psk.kind)?;
            psk.binder = compute_binder(&schedule, &binder_key, &hash)?;
        }
        offered.binders = self.psks.iter().map(|p| p.binder.clone()).collect();
        encoded.truncate(truncated);
        encoded.extend_from_slice(&offered.encode_binders()?);
        Ok(encoded)
    }

    fn early_data_possible(&self) -> bool {
        !self.retried
            && self.config.enable_early_data
            && self
                .psks
                .first()
                .map_or(false, |p| p.kind == PskKind::Resumption && p.max_early_data > 0)
    }

    /// Switch the write side to the early traffic key after the first
    /// ClientHello.
    fn offer_early_data(&mut self, core: &mut ConnectionCore) -> Result<()> {
        if !self.early_data_possible() {
            return Ok(());
        }
        let Some(psk) = self.psks.first() else {
            return Ok(());
        };
        let suite = select_suite(self.config.provider.clone(), psk.suite)?;
        let mut schedule = KeySchedule::new(suite.clone());
        let early = schedule.derive_early_secret(Some(&psk.secret))?;
        let hash = self
            .transcript
            .hash_with_algorithm(psk.suite.hash_algorithm(), &[])?;
        let client_early = schedule.derive_traffic_secret(TrafficPhase::ClientEarly, &early, &hash)?;
        core.queue_write_keys(suite, schedule.traffic_keys(&client_early)?);
        self.early = Some(EarlyData::Offered {
            limit: psk.max_early_data,
            sent: 0,
        });
        tracing::info!(limit = psk.max_early_data, "offering early data");
        Ok(())
    }

    fn check_version(hello: &ServerHello) -> Result<()> {
        match hello.extensions.selected_version()? {
            Some(v) if v == ProtocolVersion::Tls13.to_u16() => Ok(()),
            _ => Err(Error::ProtocolVersion),
        }
    }

    fn handle_server_hello(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let hello = ServerHello::decode(msg.body())?;
        if hello.is_hello_retry_request() {
            return self.handle_hello_retry(core, msg, &hello);
        }
        Self::check_version(&hello)?;
        if hello.legacy_session_id_echo != self.session_id {
            return Err(Error::IllegalParameter("session id echo mismatch".into()));
        }
        let cipher_suite = hello.cipher_suite;
        if !self.config.cipher_suites.contains(&cipher_suite)
            || self.retry_suite.map_or(false, |s| s != cipher_suite)
        {
            return Err(Error::IllegalParameter(format!(
                "server selected {}",
                cipher_suite.name()
            )));
        }

        let psk_index = match hello.extensions.get(ExtensionType::PreSharedKey) {
            Some(ext) => {
                let mut r = Reader::new(&ext.data);
                let index = usize::from(r.u16("selected_identity")?);
                r.finish("pre_shared_key")?;
                let psk = self
                    .psks
                    .get(index)
                    .ok_or_else(|| Error::IllegalParameter("selected PSK out of range".into()))?;
                if psk.suite.hash_algorithm() != cipher_suite.hash_algorithm() {
                    return Err(Error::IllegalParameter("PSK hash mismatch".into()));
                }
                Some(index)
            },
            None => None,
        };

        let shared = match (hello.extensions.server_key_share()?, psk_index) {
            (Some(entry), _) => {
                let share = self
                    .key_share
                    .as_ref()
                    .filter(|s| s.group.to_u16() == entry.group)
                    .ok_or_else(|| Error::IllegalParameter("key share for unoffered group".into()))?;
                let kx = self.provider().key_exchange(share.group)?;
                Some(kx.exchange(&share.private, &entry.key_exchange)?)
            },
            (None, Some(_)) if self.config.psk_modes.contains(&PskKeyExchangeMode::PskKe) => None,
            (None, _) => return Err(Error::MissingExtension("key_share".into())),
        };
        // The private key is no longer needed.
        self.key_share = None;

        let suite = select_suite(self.config.provider.clone(), cipher_suite)?;
        self.transcript.collapse(cipher_suite.hash_algorithm())?;
        self.transcript.update(&msg.encoded);

        let mut schedule = KeySchedule::new(suite.clone());
        let psk_secret = psk_index.map(|i| self.psks[i].secret.clone());
        let early = schedule.derive_early_secret(psk_secret.as_ref().map(|s| s.as_slice()))?;
        let handshake =
            schedule.derive_handshake_secret(&early, shared.as_ref().map(|s| s.as_bytes()))?;
        let hash = self.transcript.current_hash()?;
        let client_hs =
            schedule.derive_traffic_secret(TrafficPhase::ClientHandshake, &handshake, &hash)?;
        let server_hs =
            schedule.derive_traffic_secret(TrafficPhase::ServerHandshake, &handshake, &hash)?;
        core.install_read_keys(suite.clone(), schedule.traffic_keys(&server_hs)?)?;
        if self.early.is_none() {
            core.queue_write_keys(suite.clone(), schedule.traffic_keys(&client_hs)?);
        }
        if psk_index != Some(0) {
            // Early data is only possible under the first PSK.
            if let Some(EarlyData::Offered { .. }) = self.early {
                self.early = Some(EarlyData::Rejected);
                core.queue_write_keys(suite.clone(), schedule.traffic_keys(&client_hs)?);
            }
        }

        let mut session = HandshakeSession::new(cipher_suite, self.client_random, hello.random);
        session.resumed = psk_index.is_some();
        session.server_name = self.config.server_name.clone();
        tracing::info!(
            suite = cipher_suite.name(),
            resumed = session.resumed,
            "negotiated parameters"
        );

        self.session = Some(session);
        self.suite = Some(suite);
        self.schedule = Some(schedule);
        self.handshake_secret = Some(handshake);
        self.client_hs_secret = Some(client_hs);
        self.server_hs_secret = Some(server_hs);
        self.state = ClientState::ServerHelloReceived;
        Ok(())
    }

    fn handle_hello_retry(
        &mut self,
        core: &mut ConnectionCore,
        msg: &HandshakeMessage,
        hello: &ServerHello,
    ) -> Result<()> {
        if self.retried {
            return Err(Error::UnexpectedMessage("second HelloRetryRequest".into()));
        }
        let retry = HelloRetryRequest::from_server_hello(hello)?;
        Self::check_version(hello)?;
        if retry.session_id != self.session_id {
            return Err(Error::IllegalParameter("session id echo mismatch".into()));
        }
        if !self.config.cipher_suites.contains(&retry.cipher_suite) {
            return Err(Error::IllegalParameter(format!(
                "retry selected {}",
                retry.cipher_suite.name()
            )));
        }
        if let Some(raw) = retry.selected_group {
            let group = KeyExchangeAlgorithm::from_u16(raw)
                .filter(|g| self.config.groups.contains(g))
                .ok_or_else(|| Error::IllegalParameter(format!("retry group {:#06x}", raw)))?;
            if self.key_share.as_ref().map(|s| s.group) == Some(group) {
                return Err(Error::IllegalParameter(
                    "retry requested the group already offered".into(),
                ));
            }
            self.generate_key_share(group)?;
        }

        let hash_algorithm = retry.cipher_suite.hash_algorithm();
        self.transcript.collapse(hash_algorithm)?;
        self.transcript.replace_with_message_hash()?;
        self.transcript.update(&msg.encoded);
        self.psks
            .retain(|p| p.suite.hash_algorithm() == hash_algorithm);
        if self.early.take().is_some() {
            core.queue_clear_write_keys();
        }

        self.cookie = retry.cookie;
        self.retry_suite = Some(retry.cipher_suite);
        self.retried = true;
        tracing::info!(
            suite = retry.cipher_suite.name(),
            group = ?retry.selected_group,
            "received HelloRetryRequest"
        );
        self.send_client_hello(core)
    }

    fn handle_encrypted_extensions(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let ee = EncryptedExtensions::decode(msg.body())?;
        let alpn = match ee.extensions.alpn()? {
            Some(mut list) => {
                if list.len() != 1 || !self.config.alpn_protocols.contains(&list[0]) {
                    return Err(Error::IllegalParameter("server ALPN selection".into()));
                }
                list.pop()
            },
            None => None,
        };
        let accepted = ee.extensions.has(ExtensionType::EarlyData);
        match self.early {
            Some(EarlyData::Offered { .. }) if accepted => {
                tracing::info!("early data accepted");
                self.early = Some(EarlyData::Accepted);
            },
            Some(EarlyData::Offered { .. }) => {
                tracing::info!("early data rejected");
                self.early = Some(EarlyData::Rejected);
                let suite = self.suite()?;
                let keys = self.schedule()?.traffic_keys(self.secret(SecretSlot::ClientHandshake)?)?;
                core.queue_write_keys(suite, keys);
            },
            _ if accepted => {
                return Err(Error::IllegalParameter("early data accepted but not offered".into()));
            },
            _ => {},
        }
        self.transcript.update(&msg.encoded);
        if let Some(session) = self.session.as_mut() {
            session.alpn = alpn;
        }
        self.state = ClientState::ServerParamsReceived;
        Ok(())
    }

    fn resumed(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.resumed)
    }

    fn handle_certificate_request(&mut self, msg: &HandshakeMessage) -> Result<()> {
        if self.resumed() {
            return Err(Error::UnexpectedMessage("CertificateRequest after PSK".into()));
        }
        let request = CertificateRequest::decode(msg.body())?;
        if !request.context.is_empty() {
            return Err(Error::IllegalParameter(
                "handshake CertificateRequest with context".into(),
            ));
        }
        self.transcript.update(&msg.encoded);
        self.cert_request = Some(request);
        self.state = ClientState::CertRequestReceived;
        Ok(())
    }

    fn handle_certificate(&mut self, msg: &HandshakeMessage) -> Result<()> {
        if self.resumed() {
            return Err(Error::UnexpectedMessage("Certificate after PSK".into()));
        }
        let certificate = Certificate::decode(msg.body())?;
        if !certificate.context.is_empty() {
            return Err(Error::IllegalParameter("server certificate context".into()));
        }
        if certificate.is_empty() {
            return Err(Error::Decode("empty server certificate".into()));
        }
        let validator = self
            .config
            .validator
            .as_ref()
            .ok_or_else(|| Error::BadCertificate("no certificate validator configured".into()))?;
        let peer = validator.validate_chain(&certificate.entries)?;
        self.transcript.update(&msg.encoded);
        self.peer = Some(peer);
        self.state = ClientState::ServerCertificateReceived;
        Ok(())
    }

    fn handle_certificate_verify(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let verify = CertificateVerify::decode(msg.body())?;
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| Error::InternalError("no peer identity".into()))?;
        let hash = self.transcript.current_hash()?;
        core.verify_certificate_verify(
            peer,
            &verify,
            Role::Server,
            &hash,
            &self.config.signature_algorithms,
        )
        .map_err(|e| core.suspend_on(e, PendingStep::VerifyPeerSignature))?;
        self.transcript.update(&msg.encoded);
        self.state = ClientState::ServerCertVerified;
        Ok(())
    }

    fn handle_finished(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let suite = self.suite()?;
        let finished = Finished::decode(msg.body(), suite.hash_len())?;
        let hash = self.transcript.current_hash()?;
        let server_hs = self.secret(SecretSlot::ServerHandshake)?;
        if !self
            .schedule()?
            .verify_finished(server_hs, &hash, &finished.verify_data)?
        {
            return Err(Error::VerifyMac);
        }
        self.transcript.update(&msg.encoded);

        let handshake = self
            .handshake_secret
            .take()
            .ok_or_else(|| Error::InternalError("no handshake secret".into()))?;
        let hash = self.transcript.current_hash()?;
        let schedule = self
            .schedule
            .as_mut()
            .ok_or_else(|| Error::InternalError("no key schedule".into()))?;
        let master = schedule.derive_master_secret(&handshake)?;
        let client_ap =
            schedule.derive_traffic_secret(TrafficPhase::ClientApplication, &master, &hash)?;
        let server_ap =
            schedule.derive_traffic_secret(TrafficPhase::ServerApplication, &master, &hash)?;
        let exporter = schedule.derive_traffic_secret(TrafficPhase::Exporter, &master, &hash)?;
        let traffic = TrafficSecrets::new(suite.clone(), client_ap, server_ap, exporter);
        core.install_read_keys(suite, traffic.keys(Role::Server)?)?;

        self.master_secret = Some(master);
        self.traffic = Some(traffic);
        self.state = ClientState::ServerFinishedReceived;
        self.continue_flight(core)
    }

    fn secret(&self, slot: SecretSlot) -> Result<&Secret> {
        let secret = match slot {
            SecretSlot::ClientHandshake => self.client_hs_secret.as_ref(),
            SecretSlot::ServerHandshake => self.server_hs_secret.as_ref(),
        };
        secret.ok_or_else(|| Error::InternalError(format!("{:?} secret missing", slot)))
    }

    /// Credentials usable for the schemes the server accepts.
    fn pick_credentials(&self, request: &CertificateRequest) -> Result<Option<CertifiedKey>> {
        let schemes = request.signature_schemes()?;
        Ok(self
            .config
            .credentials
            .as_ref()
            .filter(|c| schemes.contains(&c.scheme.to_u16()))
            .cloned())
    }

    fn send_second_flight(&mut self, core: &mut ConnectionCore) -> Result<()> {
        if let Some(EarlyData::Accepted) = self.early {
            let encoded = core.queue_handshake(
                HandshakeType::EndOfEarlyData,
                &EndOfEarlyData.encode()?,
            )?;
            self.transcript.update(&encoded);
            let suite = self.suite()?;
            let keys = self.schedule()?.traffic_keys(self.secret(SecretSlot::ClientHandshake)?)?;
            core.queue_write_keys(suite, keys);
        }
        match self.cert_request.take() {
            Some(request) => {
                let credentials = self.pick_credentials(&request)?;
                let chain = credentials.as_ref().map(|c| c.chain.clone()).unwrap_or_default();
                if credentials.is_none() {
                    tracing::info!("no suitable client credentials, sending empty Certificate");
                }
                let certificate = Certificate::new(Vec::new(), &chain);
                let encoded = core.queue_handshake(HandshakeType::Certificate, &certificate.encode()?)?;
                self.transcript.update(&encoded);
                self.client_credentials = credentials;
                self.state = ClientState::CertificateSent;
            },
            None => self.state = ClientState::CertVerifySent,
        }
        Ok(())
    }

    fn send_certificate_verify(&mut self, core: &mut ConnectionCore) -> Result<()> {
        if let Some(credentials) = &self.client_credentials {
            let hash = self.transcript.current_hash()?;
            let verify = core.sign_certificate_verify(credentials, Role::Client, &hash)
                .map_err(|e| core.suspend_on(e, PendingStep::SignCertificateVerify))?;
            let encoded =
                core.queue_handshake(HandshakeType::CertificateVerify, &verify.encode()?)?;
            self.transcript.update(&encoded);
        }
        self.state = ClientState::CertVerifySent;
        Ok(())
    }

    fn send_finished(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let hash = self.transcript.current_hash()?;
        let verify_data = self
            .schedule()?
            .finished_verify_data(self.secret(SecretSlot::ClientHandshake)?, &hash)?;
        let encoded = core.queue_handshake(
            HandshakeType::Finished,
            &Finished::new(verify_data).encode()?,
        )?;
        self.transcript.update(&encoded);
        self.state = ClientState::FinishedSent;

        let hash = self.transcript.current_hash()?;
        let master = self
            .master_secret
            .take()
            .ok_or_else(|| Error::InternalError("no master secret".into()))?;
        let resumption = self
            .schedule()?
            .derive_traffic_secret(TrafficPhase::Resumption, &master, &hash)?;
        let traffic = self.traffic()?;
        let suite = traffic.suite();
        let keys = traffic.keys(Role::Client)?;
        core.queue_write_keys(suite, keys);

        if let Some(session) = self.session.as_mut() {
            session.resumption_secret = Some(resumption);
        }
        self.client_hs_secret = None;
        self.server_hs_secret = None;
        self.state = ClientState::Established;
        self.seen.clear();
        tracing::info!("client handshake complete");
        Ok(())
    }

    fn handle_new_session_ticket(&mut self, msg: &HandshakeMessage) -> Result<()> {
        let ticket = NewSessionTicket::decode(msg.body())?;
        if ticket.lifetime == 0 {
            tracing::debug!("ignoring ticket with zero lifetime");
            return Ok(());
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::InternalError("no session".into()))?;
        let resumption = session
            .resumption_secret
            .as_ref()
            .ok_or_else(|| Error::InternalError("no resumption secret".into()))?;
        let secret = self
            .schedule()?
            .derive_resumption_psk(resumption, &ticket.nonce)?;
        let stored = ClientSession {
            server_name: session.server_name.clone(),
            cipher_suite: session.cipher_suite,
            ticket: ticket.ticket.clone(),
            secret,
            lifetime: ticket.lifetime,
            age_add: ticket.age_add,
            received_at_ms: now_millis(),
            max_early_data: ticket.max_early_data()?,
            alpn: session.alpn.clone(),
        };
        tracing::debug!(lifetime = ticket.lifetime, "stored session ticket");
        if let Some(session) = self.session.as_mut() {
            session.ticket_lifetime = ticket.lifetime;
            session.ticket_age_add = ticket.age_add;
        }
        self.tickets.push(stored);
        Ok(())
    }

    fn handle_post_handshake_request(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        if !self.config.post_handshake_auth {
            return Err(Error::UnexpectedMessage(
                "post-handshake CertificateRequest not offered".into(),
            ));
        }
        let request = CertificateRequest::decode(msg.body())?;
        if request.context.is_empty() {
            return Err(Error::IllegalParameter(
                "post-handshake CertificateRequest without context".into(),
            ));
        }
        let credentials = self.pick_credentials(&request)?;
        let mut transcript = self.transcript.fork();
        transcript.update(&msg.encoded);

        let chain = credentials.as_ref().map(|c| c.chain.clone()).unwrap_or_default();
        let certificate = Certificate::new(request.context.clone(), &chain);
        let encoded = core.queue_handshake(HandshakeType::Certificate, &certificate.encode()?)?;
        transcript.update(&encoded);
        tracing::info!(
            authenticated = credentials.is_some(),
            "answering post-handshake CertificateRequest"
        );
        self.auth_response = Some(ClientAuthResponse {
            context: request.context,
            transcript,
            credentials,
        });
        self.finish_auth_response(core)
    }

    /// CertificateVerify and Finished of a post-handshake authentication
    /// response.
    fn finish_auth_response(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let Some(response) = self.auth_response.as_mut() else {
            return Ok(());
        };
        if let Some(credentials) = response.credentials.as_ref() {
            let hash = response.transcript.current_hash()?;
            let verify = core.sign_certificate_verify(
                credentials,
                Role::Client,
                &hash,
            )
            .map_err(|e| core.suspend_on(e, PendingStep::SignCertificateVerify))?;
            let encoded =
                core.queue_handshake(HandshakeType::CertificateVerify, &verify.encode()?)?;
            response.transcript.update(&encoded);
            response.credentials = None;
        }
        let hash = response.transcript.current_hash()?;
        let traffic = self
            .traffic
            .as_ref()
            .ok_or_else(|| Error::InternalError("no traffic secrets".into()))?;
        let verify_data = traffic.post_handshake_finished(&hash)?;
        core.queue_handshake(HandshakeType::Finished, &Finished::new(verify_data).encode()?)?;
        tracing::debug!(context_len = response.context.len(), "sent post-handshake Finished");
        self.auth_response = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum SecretSlot {
    ClientHandshake,
    ServerHandshake,
}

impl Handler for ClientHandshake {
    fn handle(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let (rules, _) = self.order();
        let msg_type = self.seen.check(rules, msg.msg_type)?;
        let post_handshake = self.is_post_handshake();
        tracing::debug!(?msg_type, state = ?self.state, "processing handshake message");

        let result = match (self.state, msg_type) {
            (ClientState::ClientHelloSent, HandshakeType::ServerHello) => {
                self.handle_server_hello(core, msg)
            },
            (ClientState::ServerHelloReceived, HandshakeType::EncryptedExtensions) => {
                self.handle_encrypted_extensions(core, msg)
            },
            (ClientState::ServerParamsReceived, HandshakeType::CertificateRequest) => {
                self.handle_certificate_request(msg)
            },
            (
                ClientState::ServerParamsReceived | ClientState::CertRequestReceived,
                HandshakeType::Certificate,
            ) => self.handle_certificate(msg),
            (ClientState::ServerCertificateReceived, HandshakeType::CertificateVerify) => {
                self.handle_certificate_verify(core, msg)
            },
            (ClientState::ServerCertVerified, HandshakeType::Finished) => {
                self.handle_finished(core, msg)
            },
            (ClientState::ServerParamsReceived, HandshakeType::Finished) if self.resumed() => {
                self.handle_finished(core, msg)
            },
            (ClientState::Established, HandshakeType::NewSessionTicket) => {
                self.handle_new_session_ticket(msg)
            },
            (ClientState::Established, HandshakeType::KeyUpdate) => {
                let traffic = self.traffic()?;
                receive_key_update(core, traffic, Role::Client, msg)
            },
            (ClientState::Established, HandshakeType::CertificateRequest) => {
                self.handle_post_handshake_request(core, msg)
            },
            (state, msg_type) => Err(Error::UnexpectedMessage(format!(
                "{:?} in state {:?}",
                msg_type, state
            ))),
        };

        let processed = match &result {
            Ok(()) => true,
            Err(Error::Pending) => core.pending_step() != Some(PendingStep::VerifyPeerSignature),
            Err(_) => false,
        };
        if processed && post_handshake == self.is_post_handshake() {
            self.seen.mark(msg_type);
        }
        if processed && self.state == ClientState::ClientHelloSent {
            // A HelloRetryRequest leaves room for the real ServerHello.
            self.seen.forget(HandshakeType::ServerHello);
        }
        result
    }

    fn continue_flight(&mut self, core: &mut ConnectionCore) -> Result<()> {
        loop {
            match self.state {
                ClientState::ServerFinishedReceived => self.send_second_flight(core)?,
                ClientState::CertificateSent => self.send_certificate_verify(core)?,
                ClientState::CertVerifySent => self.send_finished(core)?,
                ClientState::Established => return self.finish_auth_response(core),
                _ => return Ok(()),
            }
        }
    }

    fn application_data(&mut self, core: &mut ConnectionCore, data: Vec<u8>) -> Result<()> {
        if self.traffic.is_none() {
            return Err(Error::UnexpectedMessage(
                "application data before server Finished".into(),
            ));
        }
        core.push_received(data);
        Ok(())
    }

    fn order(&self) -> (&'static [OrderRule], &SeenMessages) {
        let rules = if self.is_post_handshake() {
            order::CLIENT_POST_HANDSHAKE_RULES
        } else {
            order::CLIENT_HANDSHAKE_RULES
        };
        (rules, &self.seen)
    }

    fn is_handshaking(&self) -> bool {
        !matches!(self.state, ClientState::Established | ClientState::Closed)
    }

    fn set_closed(&mut self) {
        self.state = ClientState::Closed;
        self.key_share = None;
        self.schedule = None;
        self.handshake_secret = None;
        self.client_hs_secret = None;
        self.server_hs_secret = None;
        self.master_secret = None;
        self.traffic = None;
        self.auth_response = None;
        self.psks.clear();
    }
}

/// Client side of a TLS 1.3 connection.
pub struct ClientConnection {
    core: ConnectionCore,
    hs: ClientHandshake,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("state", &self.hs.state)
            .field("pending", &self.core.pending_step())
            .finish_non_exhaustive()
    }
}

impl ClientConnection {
    /// Create a connection and queue the ClientHello.
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        Self::start(config, None)
    }

    /// Create a connection that offers to resume `session`.
    pub fn with_session(config: Arc<ClientConfig>, session: ClientSession) -> Result<Self> {
        Self::start(config, Some(session))
    }

    fn start(config: Arc<ClientConfig>, resuming: Option<ClientSession>) -> Result<Self> {
        let hashes: Vec<_> = config
            .cipher_suites
            .iter()
            .map(|s| s.hash_algorithm())
            .collect();
        let transcript = TranscriptHash::new(config.provider.clone(), &hashes)?;
        let core = ConnectionCore::new(
            config.provider.clone(),
            config.max_fragment_length,
            config.max_handshake_message_size,
            Role::Client,
        );
        let hs = ClientHandshake {
            config,
            state: ClientState::Begin,
            seen: SeenMessages::new(),
            transcript,
            client_random: [0; 32],
            session_id: Vec::new(),
            key_share: None,
            cookie: None,
            retried: false,
            retry_suite: None,
            psks: Vec::new(),
            resuming,
            early: None,
            suite: None,
            schedule: None,
            handshake_secret: None,
            client_hs_secret: None,
            server_hs_secret: None,
            master_secret: None,
            session: None,
            peer: None,
            cert_request: None,
            client_credentials: None,
            traffic: None,
            tickets: Vec::new(),
            auth_response: None,
        };
        let mut conn = Self { core, hs };
        conn.hs.start(&mut conn.core)?;
        conn.core.flush_allow_pending()?;
        Ok(conn)
    }

    /// Feed bytes received from the transport.
    pub fn read_tls(&mut self, data: &[u8]) -> Result<()> {
        self.core.read_tls(data)
    }

    /// Process everything buffered.
    pub fn process(&mut self) -> Result<Progress> {
        self.core.process(&mut self.hs)
    }

    /// Retry the operation that reported pending.
    pub fn resume(&mut self) -> Result<Progress> {
        self.core.resume(&mut self.hs)
    }

    /// The operation the connection is waiting on, if any.
    pub fn pending_step(&self) -> Option<PendingStep> {
        self.core.pending_step()
    }

    /// Bytes to write to the transport.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.core.take_output()
    }

    /// Current handshake state.
    pub fn state(&self) -> ClientState {
        self.hs.state
    }

    /// Whether application data may be exchanged.
    pub fn is_established(&self) -> bool {
        self.hs.state == ClientState::Established
    }

    /// Whether the connection has terminated.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Negotiated parameters, once ServerHello is processed.
    pub fn session(&self) -> Option<&HandshakeSession> {
        self.hs.session.as_ref()
    }

    /// Negotiated suite.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.hs.session.as_ref().map(|s| s.cipher_suite)
    }

    /// Negotiated application protocol.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.hs.session.as_ref().and_then(|s| s.alpn.as_deref())
    }

    /// Whether the server accepted a PSK.
    pub fn is_resumed(&self) -> bool {
        self.hs.resumed()
    }

    /// Whether the server accepted our early data.
    pub fn early_data_accepted(&self) -> bool {
        matches!(self.hs.early, Some(EarlyData::Accepted))
    }

    /// Scheme the server authenticated with, in certificate mode.
    pub fn peer_signature_scheme(&self) -> Option<SignatureAlgorithm> {
        self.hs.peer.as_ref().map(|p| p.scheme)
    }

    /// Tickets received so far, for later resumption.
    pub fn take_tickets(&mut self) -> Vec<ClientSession> {
        std::mem::take(&mut self.hs.tickets)
    }

    /// Queue 0-RTT data. Allowed between the first ClientHello and the
    /// server's EncryptedExtensions, up to the ticket's limit.
    pub fn send_early_data(&mut self, data: &[u8]) -> Result<()> {
        let Some(EarlyData::Offered { limit, sent }) = self.hs.early.as_mut() else {
            return Err(Error::InvalidState("early data not offered".into()));
        };
        if self.hs.state != ClientState::ClientHelloSent {
            return Err(Error::InvalidState("early data window closed".into()));
        }
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        if sent.saturating_add(len) > *limit {
            return Err(Error::InvalidState(format!(
                "early data above the {}-byte limit",
                limit
            )));
        }
        *sent += len;
        self.core.queue_application_data(data);
        self.core.flush_allow_pending()
    }

    /// Queue application data.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_established() {
            return Err(Error::InvalidState("handshake not complete".into()));
        }
        self.core.queue_application_data(data);
        self.core.flush_allow_pending()
    }

    /// Application data received so far.
    pub fn recv_application_data(&mut self) -> Vec<u8> {
        self.core.take_received()
    }

    /// Send a KeyUpdate, optionally asking the server to update too.
    pub fn key_update(&mut self, request_peer: bool) -> Result<()> {
        if !self.is_established() {
            return Err(Error::InvalidState("handshake not complete".into()));
        }
        if self.hs.auth_response.is_some() || self.core.pending_step().is_some() {
            return Err(Error::InvalidState("another exchange is outstanding".into()));
        }
        let request = if request_peer {
            KeyUpdateRequest::UpdateRequested
        } else {
            KeyUpdateRequest::UpdateNotRequested
        };
        let traffic = self.hs.traffic()?;
        send_key_update(&mut self.core, traffic, Role::Client, request)?;
        self.core.flush_allow_pending()
    }

    /// RFC 8446 Section 7.5 exporter.
    pub fn export_keying_material(&self, label: &[u8], context: &[u8], length: usize) -> Result<Vec<u8>> {
        match (&self.hs.traffic, self.hs.state) {
            (Some(traffic), ClientState::Established) => traffic.export(label, context, length),
            _ => Err(Error::InvalidState("exporter not available yet".into())),
        }
    }

    /// Send close_notify.
    pub fn close(&mut self) -> Result<()> {
        self.core.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_validator::RawKeyValidator;
    use crate::codec::HandshakeReassembler;
    use crate::record::RecordReader;
    use sectls_crypto_mock::MockCryptoProvider;

    fn config() -> Arc<ClientConfig> {
        let provider = Arc::new(MockCryptoProvider::new());
        ClientConfig::builder(provider)
            .with_validator(Arc::new(RawKeyValidator::new(SignatureAlgorithm::Ed25519)))
            .with_server_name("example.test")
            .with_alpn_protocols(&[&b"h2"[..]])
            .build()
            .unwrap()
    }

    fn client_hello(out: &[u8]) -> ClientHello {
        let mut records = RecordReader::new();
        records.feed(out);
        let record = records.next_record().unwrap().unwrap();
        let mut reassembler = HandshakeReassembler::new(65536);
        reassembler.feed(&record.payload).unwrap();
        let msg = reassembler.next_message().unwrap();
        assert_eq!(msg.handshake_type(), Some(HandshakeType::ClientHello));
        ClientHello::decode(msg.body()).unwrap()
    }

    #[test]
    fn test_client_hello_contents() {
        let mut conn = ClientConnection::new(config()).unwrap();
        assert_eq!(conn.state(), ClientState::ClientHelloSent);
        let out = conn.take_output();
        // First record uses the legacy 0x0301 version.
        assert_eq!(&out[..3], &[22, 3, 1]);
        let hello = client_hello(&out);
        assert_eq!(hello.legacy_session_id.len(), 32);
        assert_eq!(hello.extensions.supported_versions().unwrap(), Some(vec![0x0304]));
        assert_eq!(
            hello.extensions.server_name().unwrap().as_deref(),
            Some("example.test")
        );
        let shares = hello.extensions.client_key_shares().unwrap().unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].group, KeyExchangeAlgorithm::X25519.to_u16());
        assert!(!hello.extensions.has(ExtensionType::PreSharedKey));
    }

    #[test]
    fn test_external_psk_is_last_with_binder() {
        let provider = Arc::new(MockCryptoProvider::new());
        let config = ClientConfig::builder(provider)
            .with_external_psk(crate::psk::ExternalPsk::new(
                b"client-1".to_vec(),
                vec![0x11; 32],
                CipherSuite::Aes128GcmSha256,
            ))
            .build()
            .unwrap();
        let mut conn = ClientConnection::new(config).unwrap();
        let hello = client_hello(&conn.take_output());
        assert!(hello.extensions.is_last(ExtensionType::PreSharedKey));
        let ext = hello.extensions.get(ExtensionType::PreSharedKey).unwrap();
        let offered = OfferedPsks::decode(&ext.data).unwrap();
        assert_eq!(offered.identities[0].identity, b"client-1");
        assert_eq!(offered.binders[0].len(), 32);
        assert_ne!(offered.binders[0], vec![0u8; 32]);
    }

    #[test]
    fn test_unexpected_message_before_server_hello() {
        let mut conn = ClientConnection::new(config()).unwrap();
        conn.take_output();
        let ee = encode_handshake(HandshakeType::EncryptedExtensions, &[0, 0]).unwrap();
        let record = crate::record::encode_record(
            crate::protocol::ContentType::Handshake,
            ProtocolVersion::Tls12,
            &ee,
        )
        .unwrap();
        conn.read_tls(&record).unwrap();
        assert_eq!(conn.process(), Err(Error::OutOfOrder(8)));
        assert!(conn.is_closed());
        assert_eq!(conn.state(), ClientState::Closed);
        // unexpected_message alert in the clear
        assert_eq!(conn.take_output(), vec![21, 3, 3, 0, 2, 2, 10]);
    }

    #[test]
    fn test_api_misuse_is_not_fatal() {
        let mut conn = ClientConnection::new(config()).unwrap();
        assert!(matches!(
            conn.send_application_data(b"x"),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(conn.key_update(false), Err(Error::InvalidState(_))));
        assert!(matches!(
            conn.send_early_data(b"x"),
            Err(Error::InvalidState(_))
        ));
        assert!(!conn.is_closed());
    }
}
