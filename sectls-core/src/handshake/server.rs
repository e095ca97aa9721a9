//! TLS 1.3 server handshake state machine.
//!
//! ## State Transitions
//! ```text
//! Begin
//!   | recv ClientHello
//! ClientHelloReceived ----> HelloRetryRequestSent (once) --> recv ClientHello
//!   | send ServerHello, EncryptedExtensions
//!   | send CertificateRequest (optional)
//!   | send Certificate, CertificateVerify (skipped when a PSK was accepted)
//!   | send Finished
//! FinishedSent
//!   | recv EndOfEarlyData (if early data was accepted)
//!   | recv Certificate, CertificateVerify (if requested)
//!   | recv Finished, send NewSessionTicket
//! Established <--> PostHandshakeAuth(stage)
//! ```
//!
//! With a [`RetryCookieGuard`](crate::cookie::RetryCookieGuard) configured
//! the retry is stateless: the first ClientHello's digest travels in the
//! cookie and the transcript is rebuilt from it, possibly on another server
//! instance.

use super::order::{self, OrderRule, SeenMessages};
use super::{
    random_array, receive_key_update, send_key_update, ConnectionCore, Handler, PendingStep,
    Progress, Role, TrafficSecrets,
};
use crate::certificate_validator::PeerIdentity;
use crate::cipher::{select_suite, CipherSuite, CryptoSuite};
use crate::codec::{encode_handshake, HandshakeMessage};
use crate::config::{ClientAuthMode, ServerConfig};
use crate::cookie::CookieParams;
use crate::error::{Error, Result};
use crate::extensions::{Extension, Extensions, KeyShareEntry, PskKeyExchangeMode};
use crate::key_schedule::{KeySchedule, PskKind, Secret, TrafficPhase};
use crate::messages::{
    Certificate, CertificateRequest, CertificateVerify, ClientHello, EncryptedExtensions,
    EndOfEarlyData, Finished, HelloRetryRequest, KeyUpdateRequest, NewSessionTicket, ServerHello,
};
use crate::protocol::{ExtensionType, HandshakeType, ProtocolVersion};
use crate::psk::{truncation_point, verify_binder, OfferedPsks};
use crate::session::{now_secs, HandshakeSession, SessionTicket};
use crate::transcript::TranscriptHash;
use sectls_crypto::{KeyExchangeAlgorithm, SharedSecret, SignatureAlgorithm};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Tolerated difference between the client's and our view of a ticket's
/// age before early data is refused. Our clock has second granularity.
const MAX_TICKET_AGE_SKEW_MS: u64 = 11_000;

/// Length of a post-handshake CertificateRequest context.
const AUTH_CONTEXT_LEN: usize = 16;

/// Stage of a post-handshake client authentication exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// CertificateRequest sent, waiting for the client's Certificate
    AwaitingClientCertificate,
    /// Waiting for the client's CertificateVerify
    AwaitingClientCertVerify,
    /// Waiting for the client's Finished
    AwaitingClientFinished,
}

/// Server handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for ClientHello
    Begin,
    /// ClientHello accepted, sending the first flight
    ClientHelloReceived,
    /// Waiting for the second ClientHello
    HelloRetryRequestSent,
    /// ServerHello queued
    ServerHelloSent,
    /// EncryptedExtensions queued
    EncryptedExtensionsSent,
    /// CertificateRequest queued
    CertRequestSent,
    /// Certificate queued, CertificateVerify next
    CertificateSent,
    /// CertificateVerify queued (or not needed), Finished next
    CertVerifySent,
    /// Server Finished queued
    FinishedSent,
    /// Reading 0-RTT data
    AwaitingEndOfEarlyData,
    /// Waiting for the client's Certificate
    AwaitingClientCertificate,
    /// Waiting for the client's CertificateVerify
    AwaitingClientCertVerify,
    /// Waiting for the client's Finished
    AwaitingClientFinished,
    /// Application data may flow
    Established,
    /// Post-handshake client authentication in progress
    PostHandshakeAuth(AuthStage),
    /// Terminal
    Closed,
}

/// A PSK whose binder verified.
struct AcceptedPsk {
    index: u16,
    schedule: KeySchedule,
    early: Secret,
    ticket: Option<SessionTicket>,
    obfuscated_age: u32,
}

/// Kind, bound suite, secret and (for resumption) the decoded ticket.
type ResolvedPsk = (PskKind, CipherSuite, Zeroizing<Vec<u8>>, Option<SessionTicket>);

/// How the ClientHello will be answered.
enum KeyExchangePlan {
    Dhe(KeyExchangeAlgorithm, Vec<u8>),
    PskOnly,
    Retry(KeyExchangeAlgorithm),
}

struct ServerAuthRequest {
    context: Vec<u8>,
    transcript: TranscriptHash,
    peer: Option<PeerIdentity>,
}

/// Negotiated parameters carried from ClientHello into the first flight.
struct Negotiated {
    hello: ClientHello,
    cipher_suite: CipherSuite,
    suite: Arc<dyn CryptoSuite>,
    dhe: Option<(KeyExchangeAlgorithm, Vec<u8>)>,
    psk: Option<AcceptedPsk>,
    accept_early: bool,
    alpn: Option<Vec<u8>>,
}

struct ServerHandshake {
    config: Arc<ServerConfig>,
    state: ServerState,
    seen: SeenMessages,
    transcript: Option<TranscriptHash>,
    retry: Option<CookieParams>,
    retried: bool,
    redeemed: Option<(Vec<u8>, SessionTicket)>,
    negotiated: Option<Negotiated>,
    suite: Option<Arc<dyn CryptoSuite>>,
    schedule: Option<KeySchedule>,
    client_early_keys_installed: bool,
    client_hs_secret: Option<Secret>,
    server_hs_secret: Option<Secret>,
    master_secret: Option<Secret>,
    session: Option<HandshakeSession>,
    early_accepted: bool,
    early_received: usize,
    client_auth_requested: bool,
    client_offered_pha: bool,
    peer: Option<PeerIdentity>,
    traffic: Option<TrafficSecrets>,
    tickets_issued: u64,
    auth_request: Option<ServerAuthRequest>,
}

impl ServerHandshake {
    fn provider(&self) -> &dyn sectls_crypto::CryptoProvider {
        self.config.provider.as_ref()
    }

    fn is_post_handshake(&self) -> bool {
        matches!(
            self.state,
            ServerState::Established | ServerState::PostHandshakeAuth(_)
        )
    }

    fn transcript(&mut self) -> Result<&mut TranscriptHash> {
        self.transcript
            .as_mut()
            .ok_or_else(|| Error::InternalError("no transcript".into()))
    }

    fn schedule(&self) -> Result<&KeySchedule> {
        self.schedule
            .as_ref()
            .ok_or_else(|| Error::InternalError("no key schedule".into()))
    }

    fn suite(&self) -> Result<Arc<dyn CryptoSuite>> {
        self.suite
            .clone()
            .ok_or_else(|| Error::InternalError("no cipher suite negotiated".into()))
    }

    fn traffic(&mut self) -> Result<&mut TrafficSecrets> {
        self.traffic
            .as_mut()
            .ok_or_else(|| Error::InternalError("no traffic secrets".into()))
    }

    fn handle_client_hello(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let hello = ClientHello::decode(msg.body())?;
        let tls13 = ProtocolVersion::Tls13.to_u16();
        if !hello
            .extensions
            .supported_versions()?
            .map_or(false, |v| v.contains(&tls13))
        {
            return Err(Error::ProtocolVersion);
        }

        let cookie = hello.extensions.cookie()?;
        match (&self.config.cookie_guard, cookie) {
            (Some(guard), Some(cookie)) => {
                let (digest, params) = guard.verify(&cookie)?;
                if params.session_id != hello.legacy_session_id {
                    return Err(Error::HrrCookieError("session id mismatch".into()));
                }
                let algorithm = params.cipher_suite.hash_algorithm();
                let mut transcript =
                    TranscriptHash::new(self.config.provider.clone(), &[algorithm])?;
                transcript.restore_from_digest(algorithm, &digest)?;
                let retry = HelloRetryRequest {
                    session_id: params.session_id.clone(),
                    cipher_suite: params.cipher_suite,
                    selected_group: (params.group != 0).then_some(params.group),
                    cookie: Some(cookie),
                };
                transcript.update(&encode_handshake(
                    HandshakeType::ServerHello,
                    &retry.to_server_hello()?.encode()?,
                )?);
                tracing::debug!("restored transcript from retry cookie");
                self.transcript = Some(transcript);
                self.retry = Some(params);
                self.retried = true;
            },
            (None, Some(_)) => {
                return Err(Error::IllegalParameter("cookie was never sent".into()));
            },
            (_, None) if self.state == ServerState::HelloRetryRequestSent => {
                if self.transcript.is_none() {
                    return Err(Error::MissingExtension("cookie".into()));
                }
                self.retried = true;
            },
            (_, None) => {},
        }

        if let Some(retry) = &self.retry {
            if hello.legacy_session_id != retry.session_id {
                return Err(Error::IllegalParameter("session id changed on retry".into()));
            }
            if hello.extensions.has(ExtensionType::EarlyData) {
                return Err(Error::IllegalParameter(
                    "early data offered after HelloRetryRequest".into(),
                ));
            }
        }

        let cipher_suite = match &self.retry {
            Some(retry) if hello.cipher_suites.contains(&retry.cipher_suite) => retry.cipher_suite,
            Some(retry) => {
                return Err(Error::IllegalParameter(format!(
                    "{} dropped on retry",
                    retry.cipher_suite.name()
                )));
            },
            None => *self
                .config
                .cipher_suites
                .iter()
                .find(|s| hello.cipher_suites.contains(s))
                .ok_or_else(|| Error::HandshakeFailure("no common cipher suite".into()))?,
        };
        let suite = select_suite(self.config.provider.clone(), cipher_suite)?;
        if self.transcript.is_none() {
            self.transcript = Some(TranscriptHash::new(
                self.config.provider.clone(),
                &[cipher_suite.hash_algorithm()],
            )?);
        }

        let shares = hello.extensions.client_key_shares()?.unwrap_or_default();
        if let Some(group) = self.retry.as_ref().map(|r| r.group).filter(|g| *g != 0) {
            if shares.len() != 1 || shares[0].group != group {
                return Err(Error::IllegalParameter(
                    "second ClientHello lacks the requested share".into(),
                ));
            }
        }

        let psk_modes = hello.extensions.psk_modes()?.unwrap_or_default();
        let offered = match hello.extensions.get(ExtensionType::PreSharedKey) {
            Some(ext) => {
                if psk_modes.is_empty() {
                    return Err(Error::MissingExtension("psk_key_exchange_modes".into()));
                }
                Some(OfferedPsks::decode(&ext.data)?)
            },
            None => None,
        };
        let psk = match &offered {
            Some(offered) => self.choose_psk(&suite, offered, &msg.encoded)?,
            None => None,
        };

        let dhe = match self.plan_key_exchange(&hello, &shares, psk.is_some(), &psk_modes)? {
            KeyExchangePlan::Retry(group) => {
                return self.send_hello_retry(core, msg, &hello, cipher_suite, group);
            },
            KeyExchangePlan::Dhe(group, public) => Some((group, public)),
            KeyExchangePlan::PskOnly => None,
        };

        let accept_early = self.accept_early_data(&hello, cipher_suite, psk.as_ref());
        if hello.extensions.has(ExtensionType::EarlyData) && !accept_early {
            core.skip_rejected_early_data(self.config.max_early_data as usize, cipher_suite);
        }
        if psk.is_none() {
            self.ensure_certificate_possible(&hello)?;
        }
        let alpn = self.select_alpn(&hello)?;
        self.client_offered_pha = hello.extensions.has(ExtensionType::PostHandshakeAuth);

        self.transcript()?.update(&msg.encoded);
        self.negotiated = Some(Negotiated {
            hello,
            cipher_suite,
            suite,
            dhe,
            psk,
            accept_early,
            alpn,
        });
        self.state = ServerState::ClientHelloReceived;
        self.continue_flight(core)
    }

    fn ensure_certificate_possible(&self, hello: &ClientHello) -> Result<()> {
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or_else(|| Error::HandshakeFailure("no PSK accepted and no certificate".into()))?;
        let schemes = hello
            .extensions
            .signature_algorithms()?
            .ok_or_else(|| Error::MissingExtension("signature_algorithms".into()))?;
        if !schemes.contains(&credentials.scheme.to_u16()) {
            return Err(Error::HandshakeFailure(format!(
                "client does not accept {}",
                credentials.scheme.name()
            )));
        }
        Ok(())
    }

    /// First identity we can resolve, with its binder checked.
    fn choose_psk(
        &mut self,
        suite: &Arc<dyn CryptoSuite>,
        offered: &OfferedPsks,
        encoded: &[u8],
    ) -> Result<Option<AcceptedPsk>> {
        let hash_algorithm = suite.hash_algorithm();
        for (index, identity) in offered.identities.iter().enumerate() {
            let Some((kind, bound_suite, secret, ticket)) = self.resolve_identity(&identity.identity)
            else {
                continue;
            };
            if bound_suite.hash_algorithm() != hash_algorithm {
                tracing::debug!(index, "PSK bound to another hash, skipping");
                continue;
            }
            if let Some(ticket) = &ticket {
                if ticket.is_expired(now_secs()) {
                    tracing::debug!("offered ticket has expired");
                    continue;
                }
            }
            let truncated = truncation_point(encoded, offered)?;
            let hash = self.transcript()?.hash_with(&encoded[..truncated])?;
            let mut schedule = KeySchedule::new(suite.clone());
            let early = schedule.derive_early_secret(Some(&secret))?;
            let binder_key = schedule.derive_binder_key(&early, kind)?;
            if !verify_binder(&schedule, &binder_key, &hash, &offered.binders[index])? {
                return Err(Error::BadBinder);
            }
            tracing::info!(index, ?kind, "PSK accepted");
            return Ok(Some(AcceptedPsk {
                index: u16::try_from(index)
                    .map_err(|_| Error::IllegalParameter("too many PSK identities".into()))?,
                schedule,
                early,
                ticket,
                obfuscated_age: identity.obfuscated_ticket_age,
            }));
        }
        Ok(None)
    }

    fn resolve_identity(&mut self, identity: &[u8]) -> Option<ResolvedPsk> {
        if let Some(external) = self
            .config
            .external_psks
            .iter()
            .find(|p| p.identity == identity)
        {
            return Some((PskKind::External, external.suite, external.secret.clone(), None));
        }
        let ticket = match &self.redeemed {
            Some((id, ticket)) if id.as_slice() == identity => ticket.clone(),
            _ => {
                let ticket = self.config.tickets.as_ref()?.redeem(identity)?;
                // Single-use stores have forgotten the ticket; keep it for a retry.
                self.redeemed = Some((identity.to_vec(), ticket.clone()));
                ticket
            },
        };
        Some((
            PskKind::Resumption,
            ticket.cipher_suite,
            ticket.resumption_secret.clone(),
            Some(ticket),
        ))
    }

    fn plan_key_exchange(
        &self,
        hello: &ClientHello,
        shares: &[KeyShareEntry],
        have_psk: bool,
        psk_modes: &[PskKeyExchangeMode],
    ) -> Result<KeyExchangePlan> {
        let share = self.config.groups.iter().find_map(|group| {
            shares
                .iter()
                .find(|s| s.group == group.to_u16())
                .map(|s| (*group, s.key_exchange.clone()))
        });
        let dhe_allowed = !have_psk || psk_modes.contains(&PskKeyExchangeMode::PskDheKe);
        if let (Some((group, public)), true) = (share, dhe_allowed) {
            return Ok(KeyExchangePlan::Dhe(group, public));
        }
        if have_psk && psk_modes.contains(&PskKeyExchangeMode::PskKe) {
            return Ok(KeyExchangePlan::PskOnly);
        }
        let client_groups = hello.extensions.supported_groups()?.unwrap_or_default();
        let common = self
            .config
            .groups
            .iter()
            .find(|g| client_groups.contains(&g.to_u16()))
            .copied();
        match common {
            Some(_) if self.retried => Err(Error::HandshakeFailure(
                "no usable key share after HelloRetryRequest".into(),
            )),
            Some(group) => Ok(KeyExchangePlan::Retry(group)),
            None => Err(Error::HandshakeFailure("no common key exchange group".into())),
        }
    }

    fn accept_early_data(
        &self,
        hello: &ClientHello,
        cipher_suite: CipherSuite,
        psk: Option<&AcceptedPsk>,
    ) -> bool {
        if !hello.extensions.has(ExtensionType::EarlyData) || self.retried {
            return false;
        }
        let Some(psk) = psk.filter(|p| p.index == 0) else {
            return false;
        };
        let Some(ticket) = &psk.ticket else {
            return false;
        };
        if self.config.max_early_data == 0
            || ticket.max_early_data.unwrap_or(0) == 0
            || ticket.cipher_suite != cipher_suite
        {
            return false;
        }
        let client_age = u64::from(psk.obfuscated_age.wrapping_sub(ticket.age_add));
        let server_age = ticket.age_millis(now_secs());
        if client_age.abs_diff(server_age) > MAX_TICKET_AGE_SKEW_MS {
            tracing::info!(client_age, server_age, "ticket age out of window, refusing early data");
            return false;
        }
        true
    }

    fn send_hello_retry(
        &mut self,
        core: &mut ConnectionCore,
        msg: &HandshakeMessage,
        hello: &ClientHello,
        cipher_suite: CipherSuite,
        group: KeyExchangeAlgorithm,
    ) -> Result<()> {
        let params = CookieParams {
            cipher_suite,
            group: group.to_u16(),
            session_id: hello.legacy_session_id.clone(),
        };
        let config = self.config.clone();
        let guard = config.cookie_guard.as_ref();
        let transcript = self.transcript()?;
        transcript.update(&msg.encoded);
        let digest = transcript.replace_with_message_hash()?;
        let cookie = match guard {
            Some(guard) => Some(guard.create(&digest, &params)?),
            None => None,
        };
        let retry = HelloRetryRequest {
            session_id: params.session_id.clone(),
            cipher_suite,
            selected_group: Some(params.group),
            cookie,
        };
        let encoded = core.queue_handshake(
            HandshakeType::ServerHello,
            &retry.to_server_hello()?.encode()?,
        )?;
        if guard.is_some() {
            // Stateless: everything needed comes back in the cookie.
            self.transcript = None;
            self.retry = None;
        } else {
            self.transcript()?.update(&encoded);
            self.retry = Some(params);
        }
        if hello.extensions.has(ExtensionType::EarlyData) {
            core.skip_rejected_early_data(self.config.max_early_data as usize, cipher_suite);
        }
        self.state = ServerState::HelloRetryRequestSent;
        tracing::info!(
            group = group.name(),
            stateless = guard.is_some(),
            "sent HelloRetryRequest"
        );
        Ok(())
    }

    fn send_hello_and_parameters(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let negotiated = self
            .negotiated
            .take()
            .ok_or_else(|| Error::InternalError("no negotiated parameters".into()))?;
        let Negotiated {
            hello,
            cipher_suite,
            suite,
            dhe,
            psk,
            accept_early,
            alpn,
        } = negotiated;
        let provider = self.config.provider.clone();

        let server_random = random_array(provider.as_ref())?;
        let mut server_hello =
            ServerHello::new(server_random, hello.legacy_session_id.clone(), cipher_suite);
        server_hello
            .extensions
            .add_selected_version(ProtocolVersion::Tls13);
        let shared: Option<SharedSecret> = match &dhe {
            Some((group, client_public)) => {
                let kx = provider.key_exchange(*group)?;
                let (private, public) = kx.generate_keypair()?;
                let shared = kx.exchange(&private, client_public)?;
                server_hello.extensions.add_server_key_share(&KeyShareEntry {
                    group: group.to_u16(),
                    key_exchange: public.into_bytes(),
                })?;
                Some(shared)
            },
            None => None,
        };
        if let Some(psk) = &psk {
            server_hello.extensions.add(Extension::new(
                ExtensionType::PreSharedKey,
                psk.index.to_be_bytes().to_vec(),
            ));
        }

        let resumed = psk.is_some();
        let (mut schedule, early) = match psk {
            Some(psk) => (psk.schedule, psk.early),
            None => {
                let mut schedule = KeySchedule::new(suite.clone());
                let early = schedule.derive_early_secret(None)?;
                (schedule, early)
            },
        };

        if accept_early {
            let hash = self.transcript()?.current_hash()?;
            let client_early =
                schedule.derive_traffic_secret(TrafficPhase::ClientEarly, &early, &hash)?;
            core.install_read_keys(suite.clone(), schedule.traffic_keys(&client_early)?)?;
            self.client_early_keys_installed = true;
        }

        let encoded = core.queue_handshake(HandshakeType::ServerHello, &server_hello.encode()?)?;
        self.transcript()?.update(&encoded);
        self.state = ServerState::ServerHelloSent;

        let handshake =
            schedule.derive_handshake_secret(&early, shared.as_ref().map(|s| s.as_bytes()))?;
        let hash = self.transcript()?.current_hash()?;
        let client_hs =
            schedule.derive_traffic_secret(TrafficPhase::ClientHandshake, &handshake, &hash)?;
        let server_hs =
            schedule.derive_traffic_secret(TrafficPhase::ServerHandshake, &handshake, &hash)?;
        core.queue_write_keys(suite.clone(), schedule.traffic_keys(&server_hs)?);
        if !accept_early {
            core.install_read_keys(suite.clone(), schedule.traffic_keys(&client_hs)?)?;
        }
        let master = schedule.derive_master_secret(&handshake)?;

        let mut ee = EncryptedExtensions::default();
        if let Some(protocol) = &alpn {
            ee.extensions.add_alpn(std::slice::from_ref(protocol))?;
        }
        if accept_early {
            ee.extensions.add_early_data();
        }
        let server_name = hello.extensions.server_name()?;
        if server_name.is_some() {
            ee.extensions.add_server_name_ack();
        }
        let encoded = core.queue_handshake(HandshakeType::EncryptedExtensions, &ee.encode()?)?;
        self.transcript()?.update(&encoded);
        self.state = ServerState::EncryptedExtensionsSent;

        let mut session = HandshakeSession::new(cipher_suite, hello.random, server_random);
        session.resumed = resumed;
        session.alpn = alpn;
        session.server_name = server_name;
        tracing::info!(
            suite = cipher_suite.name(),
            resumed,
            early_data = accept_early,
            "negotiated parameters"
        );

        if !resumed && self.config.client_auth != ClientAuthMode::None {
            let schemes: Vec<u16> = self
                .config
                .signature_algorithms
                .iter()
                .map(|s| s.to_u16())
                .collect();
            let request = CertificateRequest::new(Vec::new(), &schemes)?;
            let encoded =
                core.queue_handshake(HandshakeType::CertificateRequest, &request.encode()?)?;
            self.transcript()?.update(&encoded);
            self.client_auth_requested = true;
            self.state = ServerState::CertRequestSent;
        }

        self.session = Some(session);
        self.suite = Some(suite);
        self.schedule = Some(schedule);
        self.client_hs_secret = Some(client_hs);
        self.server_hs_secret = Some(server_hs);
        self.master_secret = Some(master);
        self.early_accepted = accept_early;
        if resumed {
            // No certificate in PSK mode.
            self.state = ServerState::CertVerifySent;
        }
        Ok(())
    }

    fn select_alpn(&self, hello: &ClientHello) -> Result<Option<Vec<u8>>> {
        let Some(offered) = hello.extensions.alpn()? else {
            return Ok(None);
        };
        if self.config.alpn_protocols.is_empty() {
            return Ok(None);
        }
        self.config
            .alpn_protocols
            .iter()
            .find(|p| offered.contains(p))
            .cloned()
            .map(Some)
            .ok_or_else(|| Error::HandshakeFailure("no common application protocol".into()))
    }

    fn send_certificate(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or_else(|| Error::InternalError("no server credentials".into()))?;
        let certificate = Certificate::new(Vec::new(), &credentials.chain);
        let encoded = core.queue_handshake(HandshakeType::Certificate, &certificate.encode()?)?;
        self.transcript()?.update(&encoded);
        self.state = ServerState::CertificateSent;
        Ok(())
    }

    fn send_certificate_verify(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let hash = self.transcript()?.current_hash()?;
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or_else(|| Error::InternalError("no server credentials".into()))?;
        let verify = core.sign_certificate_verify(credentials, Role::Server, &hash)
            .map_err(|e| core.suspend_on(e, PendingStep::SignCertificateVerify))?;
        let encoded = core.queue_handshake(HandshakeType::CertificateVerify, &verify.encode()?)?;
        self.transcript()?.update(&encoded);
        self.state = ServerState::CertVerifySent;
        Ok(())
    }

    fn send_finished(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let hash = self.transcript()?.current_hash()?;
        let server_hs = self
            .server_hs_secret
            .as_ref()
            .ok_or_else(|| Error::InternalError("no server handshake secret".into()))?;
        let verify_data = self.schedule()?.finished_verify_data(server_hs, &hash)?;
        let encoded = core.queue_handshake(
            HandshakeType::Finished,
            &Finished::new(verify_data).encode()?,
        )?;
        self.transcript()?.update(&encoded);

        let hash = self.transcript()?.current_hash()?;
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::InternalError("no master secret".into()))?;
        let schedule = self.schedule()?;
        let client_ap =
            schedule.derive_traffic_secret(TrafficPhase::ClientApplication, master, &hash)?;
        let server_ap =
            schedule.derive_traffic_secret(TrafficPhase::ServerApplication, master, &hash)?;
        let exporter = schedule.derive_traffic_secret(TrafficPhase::Exporter, master, &hash)?;
        let traffic = TrafficSecrets::new(self.suite()?, client_ap, server_ap, exporter);
        core.queue_write_keys(traffic.suite(), traffic.keys(Role::Server)?);
        self.traffic = Some(traffic);
        self.server_hs_secret = None;
        self.state = ServerState::FinishedSent;

        self.state = if self.early_accepted {
            ServerState::AwaitingEndOfEarlyData
        } else if self.client_auth_requested {
            ServerState::AwaitingClientCertificate
        } else {
            ServerState::AwaitingClientFinished
        };
        tracing::debug!(next = ?self.state, "server flight queued");
        Ok(())
    }

    fn install_client_handshake_keys(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let client_hs = self
            .client_hs_secret
            .as_ref()
            .ok_or_else(|| Error::InternalError("no client handshake secret".into()))?;
        let keys = self.schedule()?.traffic_keys(client_hs)?;
        core.install_read_keys(self.suite()?, keys)?;
        self.client_early_keys_installed = false;
        Ok(())
    }

    fn handle_end_of_early_data(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        EndOfEarlyData::decode(msg.body())?;
        self.transcript()?.update(&msg.encoded);
        self.install_client_handshake_keys(core)?;
        tracing::debug!(received = self.early_received, "early data finished");
        self.state = if self.client_auth_requested {
            ServerState::AwaitingClientCertificate
        } else {
            ServerState::AwaitingClientFinished
        };
        Ok(())
    }

    /// Check a client Certificate. Returns the peer, or `None` for an empty
    /// list the configuration tolerates.
    fn check_client_certificate(
        &self,
        certificate: &Certificate,
        context: &[u8],
    ) -> Result<Option<PeerIdentity>> {
        if certificate.context != context {
            return Err(Error::IllegalParameter("certificate request context".into()));
        }
        if certificate.is_empty() {
            if self.config.client_auth == ClientAuthMode::Require {
                return Err(Error::CertificateRequired);
            }
            tracing::info!("client declined to authenticate");
            return Ok(None);
        }
        let validator = self
            .config
            .client_validator
            .as_ref()
            .ok_or_else(|| Error::BadCertificate("no client validator configured".into()))?;
        validator.validate_chain(&certificate.entries).map(Some)
    }

    fn handle_client_certificate(&mut self, msg: &HandshakeMessage) -> Result<()> {
        let certificate = Certificate::decode(msg.body())?;
        let peer = self.check_client_certificate(&certificate, &[])?;
        self.transcript()?.update(&msg.encoded);
        self.state = if peer.is_some() {
            ServerState::AwaitingClientCertVerify
        } else {
            ServerState::AwaitingClientFinished
        };
        self.peer = peer;
        Ok(())
    }

    fn handle_client_certificate_verify(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let verify = CertificateVerify::decode(msg.body())?;
        let hash = self.transcript()?.current_hash()?;
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| Error::InternalError("no client identity".into()))?;
        core.verify_certificate_verify(
            peer,
            &verify,
            Role::Client,
            &hash,
            &self.config.signature_algorithms,
        )
        .map_err(|e| core.suspend_on(e, PendingStep::VerifyPeerSignature))?;
        self.transcript()?.update(&msg.encoded);
        self.state = ServerState::AwaitingClientFinished;
        Ok(())
    }

    fn handle_client_finished(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let suite = self.suite()?;
        let finished = Finished::decode(msg.body(), suite.hash_len())?;
        let hash = self.transcript()?.current_hash()?;
        let client_hs = self
            .client_hs_secret
            .as_ref()
            .ok_or_else(|| Error::InternalError("no client handshake secret".into()))?;
        if !self
            .schedule()?
            .verify_finished(client_hs, &hash, &finished.verify_data)?
        {
            return Err(Error::VerifyMac);
        }
        self.transcript()?.update(&msg.encoded);

        let hash = self.transcript()?.current_hash()?;
        let master = self
            .master_secret
            .take()
            .ok_or_else(|| Error::InternalError("no master secret".into()))?;
        let resumption = self
            .schedule()?
            .derive_traffic_secret(TrafficPhase::Resumption, &master, &hash)?;
        let traffic = self.traffic()?;
        let keys = traffic.keys(Role::Client)?;
        core.install_read_keys(traffic.suite(), keys)?;

        if let Some(session) = self.session.as_mut() {
            session.resumption_secret = Some(resumption);
        }
        self.client_hs_secret = None;
        self.state = ServerState::Established;
        self.seen.clear();
        tracing::info!(
            client_authenticated = self.peer.is_some(),
            "server handshake complete"
        );
        for _ in 0..self.config.tickets_per_handshake {
            self.send_ticket(core)?;
        }
        Ok(())
    }

    /// Issue one NewSessionTicket.
    fn send_ticket(&mut self, core: &mut ConnectionCore) -> Result<()> {
        let config = self.config.clone();
        let Some(backend) = config.tickets.as_ref() else {
            return Ok(());
        };
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::InternalError("no session".into()))?;
        let resumption = session
            .resumption_secret
            .as_ref()
            .ok_or_else(|| Error::InternalError("no resumption secret".into()))?;
        let cipher_suite = session.cipher_suite;
        let nonce = self.tickets_issued.to_be_bytes().to_vec();
        let psk = self.schedule()?.derive_resumption_psk(resumption, &nonce)?;
        let age_add = self.provider().random().next_u32()?;
        let max_early_data = (self.config.max_early_data > 0).then_some(self.config.max_early_data);
        let state = SessionTicket {
            cipher_suite,
            lifetime: self.config.ticket_lifetime,
            age_add,
            issued_at_secs: now_secs(),
            resumption_secret: Zeroizing::new(psk.as_bytes().to_vec()),
            max_early_data,
        };
        let ticket = backend.issue(self.provider(), &state)?;
        let mut extensions = Extensions::new();
        if let Some(max) = max_early_data {
            extensions.add_max_early_data(max);
        }
        let message = NewSessionTicket {
            lifetime: state.lifetime,
            age_add,
            nonce,
            ticket,
            extensions,
        };
        core.queue_handshake(HandshakeType::NewSessionTicket, &message.encode()?)?;
        self.tickets_issued += 1;
        if let Some(session) = self.session.as_mut() {
            session.ticket_lifetime = state.lifetime;
            session.ticket_age_add = age_add;
        }
        tracing::debug!(lifetime = state.lifetime, "issued session ticket");
        Ok(())
    }

    fn request_client_auth(&mut self, core: &mut ConnectionCore) -> Result<()> {
        if self.state != ServerState::Established {
            return Err(Error::InvalidState(format!(
                "client authentication requested in {:?}",
                self.state
            )));
        }
        if !self.client_offered_pha {
            return Err(Error::InvalidState(
                "client did not offer post-handshake authentication".into(),
            ));
        }
        if self.config.client_validator.is_none() {
            return Err(Error::InvalidState("no client validator configured".into()));
        }
        let context = self.provider().random().generate(AUTH_CONTEXT_LEN)?;
        let schemes: Vec<u16> = self
            .config
            .signature_algorithms
            .iter()
            .map(|s| s.to_u16())
            .collect();
        let request = CertificateRequest::new(context.clone(), &schemes)?;
        let encoded = core.queue_handshake(HandshakeType::CertificateRequest, &request.encode()?)?;
        let mut transcript = self.transcript()?.fork();
        transcript.update(&encoded);
        self.auth_request = Some(ServerAuthRequest {
            context,
            transcript,
            peer: None,
        });
        self.seen.clear();
        self.state = ServerState::PostHandshakeAuth(AuthStage::AwaitingClientCertificate);
        tracing::info!("requested post-handshake client authentication");
        Ok(())
    }

    fn handle_auth_certificate(&mut self, msg: &HandshakeMessage) -> Result<()> {
        let certificate = Certificate::decode(msg.body())?;
        let context = self
            .auth_request
            .as_ref()
            .map(|r| r.context.clone())
            .ok_or_else(|| Error::InternalError("no authentication request".into()))?;
        let peer = self.check_client_certificate(&certificate, &context)?;
        let request = self
            .auth_request
            .as_mut()
            .ok_or_else(|| Error::InternalError("no authentication request".into()))?;
        request.transcript.update(&msg.encoded);
        self.state = ServerState::PostHandshakeAuth(if peer.is_some() {
            AuthStage::AwaitingClientCertVerify
        } else {
            AuthStage::AwaitingClientFinished
        });
        request.peer = peer;
        Ok(())
    }

    fn handle_auth_certificate_verify(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let verify = CertificateVerify::decode(msg.body())?;
        let request = self
            .auth_request
            .as_mut()
            .ok_or_else(|| Error::InternalError("no authentication request".into()))?;
        let peer = request
            .peer
            .as_ref()
            .ok_or_else(|| Error::InternalError("no client identity".into()))?;
        let hash = request.transcript.current_hash()?;
        core.verify_certificate_verify(
            peer,
            &verify,
            Role::Client,
            &hash,
            &self.config.signature_algorithms,
        )
        .map_err(|e| core.suspend_on(e, PendingStep::VerifyPeerSignature))?;
        request.transcript.update(&msg.encoded);
        self.state = ServerState::PostHandshakeAuth(AuthStage::AwaitingClientFinished);
        Ok(())
    }

    fn handle_auth_finished(&mut self, msg: &HandshakeMessage) -> Result<()> {
        let suite = self.suite()?;
        let finished = Finished::decode(msg.body(), suite.hash_len())?;
        let request = self
            .auth_request
            .as_ref()
            .ok_or_else(|| Error::InternalError("no authentication request".into()))?;
        let hash = request.transcript.current_hash()?;
        let traffic = self
            .traffic
            .as_ref()
            .ok_or_else(|| Error::InternalError("no traffic secrets".into()))?;
        if !traffic.verify_post_handshake_finished(&hash, &finished.verify_data)? {
            return Err(Error::VerifyMac);
        }
        if let Some(request) = self.auth_request.take() {
            if request.peer.is_some() {
                self.peer = request.peer;
            }
        }
        self.seen.clear();
        self.state = ServerState::Established;
        tracing::info!(
            client_authenticated = self.peer.is_some(),
            "post-handshake authentication complete"
        );
        Ok(())
    }
}

impl Handler for ServerHandshake {
    fn handle(&mut self, core: &mut ConnectionCore, msg: &HandshakeMessage) -> Result<()> {
        let (rules, _) = self.order();
        let msg_type = self.seen.check(rules, msg.msg_type)?;
        let post_handshake = self.is_post_handshake();
        tracing::debug!(?msg_type, state = ?self.state, "processing handshake message");

        let result = match (self.state, msg_type) {
            (
                ServerState::Begin | ServerState::HelloRetryRequestSent,
                HandshakeType::ClientHello,
            ) => self.handle_client_hello(core, msg),
            (ServerState::AwaitingEndOfEarlyData, HandshakeType::EndOfEarlyData) => {
                self.handle_end_of_early_data(core, msg)
            },
            (ServerState::AwaitingClientCertificate, HandshakeType::Certificate) => {
                self.handle_client_certificate(msg)
            },
            (ServerState::AwaitingClientCertVerify, HandshakeType::CertificateVerify) => {
                self.handle_client_certificate_verify(core, msg)
            },
            (ServerState::AwaitingClientFinished, HandshakeType::Finished) => {
                self.handle_client_finished(core, msg)
            },
            (
                ServerState::Established
                | ServerState::PostHandshakeAuth(AuthStage::AwaitingClientCertificate),
                HandshakeType::KeyUpdate,
            ) => {
                let traffic = self.traffic()?;
                receive_key_update(core, traffic, Role::Server, msg)
            },
            (
                ServerState::PostHandshakeAuth(
                    AuthStage::AwaitingClientCertVerify | AuthStage::AwaitingClientFinished,
                ),
                HandshakeType::KeyUpdate,
            ) => Err(Error::SanityMessage(msg.msg_type)),
            (
                ServerState::PostHandshakeAuth(AuthStage::AwaitingClientCertificate),
                HandshakeType::Certificate,
            ) => self.handle_auth_certificate(msg),
            (
                ServerState::PostHandshakeAuth(AuthStage::AwaitingClientCertVerify),
                HandshakeType::CertificateVerify,
            ) => self.handle_auth_certificate_verify(core, msg),
            (ServerState::PostHandshakeAuth(AuthStage::AwaitingClientFinished), HandshakeType::Finished) => {
                self.handle_auth_finished(msg)
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
        if processed && self.state == ServerState::HelloRetryRequestSent {
            self.seen.forget(HandshakeType::ClientHello);
        }
        result
    }

    fn continue_flight(&mut self, core: &mut ConnectionCore) -> Result<()> {
        loop {
            match self.state {
                ServerState::ClientHelloReceived => self.send_hello_and_parameters(core)?,
                ServerState::EncryptedExtensionsSent | ServerState::CertRequestSent => {
                    self.send_certificate(core)?
                },
                ServerState::CertificateSent => self.send_certificate_verify(core)?,
                ServerState::CertVerifySent => self.send_finished(core)?,
                _ => return Ok(()),
            }
        }
    }

    fn application_data(&mut self, core: &mut ConnectionCore, data: Vec<u8>) -> Result<()> {
        match self.state {
            ServerState::AwaitingEndOfEarlyData if self.client_early_keys_installed => {
                self.early_received += data.len();
                if self.early_received > self.config.max_early_data as usize {
                    return Err(Error::EarlyDataLimit);
                }
                core.early_received.extend_from_slice(&data);
                Ok(())
            },
            ServerState::Established | ServerState::PostHandshakeAuth(_) => {
                core.push_received(data);
                Ok(())
            },
            state => Err(Error::UnexpectedMessage(format!(
                "application data in state {:?}",
                state
            ))),
        }
    }

    fn order(&self) -> (&'static [OrderRule], &SeenMessages) {
        let rules = if self.is_post_handshake() {
            order::SERVER_POST_HANDSHAKE_RULES
        } else {
            order::SERVER_HANDSHAKE_RULES
        };
        (rules, &self.seen)
    }

    fn is_handshaking(&self) -> bool {
        !matches!(
            self.state,
            ServerState::Established | ServerState::PostHandshakeAuth(_) | ServerState::Closed
        )
    }

    fn set_closed(&mut self) {
        self.state = ServerState::Closed;
        self.transcript = None;
        self.negotiated = None;
        self.schedule = None;
        self.client_hs_secret = None;
        self.server_hs_secret = None;
        self.master_secret = None;
        self.traffic = None;
        self.auth_request = None;
        self.redeemed = None;
    }
}

/// Server side of a TLS 1.3 connection.
pub struct ServerConnection {
    core: ConnectionCore,
    hs: ServerHandshake,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("state", &self.hs.state)
            .field("pending", &self.core.pending_step())
            .finish_non_exhaustive()
    }
}

impl ServerConnection {
    /// Create a connection waiting for a ClientHello.
    pub fn new(config: Arc<ServerConfig>) -> Result<Self> {
        let core = ConnectionCore::new(
            config.provider.clone(),
            config.max_fragment_length,
            config.max_handshake_message_size,
            Role::Server,
        );
        let hs = ServerHandshake {
            config,
            state: ServerState::Begin,
            seen: SeenMessages::new(),
            transcript: None,
            retry: None,
            retried: false,
            redeemed: None,
            negotiated: None,
            suite: None,
            schedule: None,
            client_early_keys_installed: false,
            client_hs_secret: None,
            server_hs_secret: None,
            master_secret: None,
            session: None,
            early_accepted: false,
            early_received: 0,
            client_auth_requested: false,
            client_offered_pha: false,
            peer: None,
            traffic: None,
            tickets_issued: 0,
            auth_request: None,
        };
        Ok(Self { core, hs })
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
    pub fn state(&self) -> ServerState {
        self.hs.state
    }

    /// Whether application data may be exchanged.
    pub fn is_established(&self) -> bool {
        self.hs.is_post_handshake()
    }

    /// Whether the connection has terminated.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Negotiated parameters, once ServerHello is sent.
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

    /// Server name sent by the client.
    pub fn server_name(&self) -> Option<&str> {
        self.hs
            .session
            .as_ref()
            .and_then(|s| s.server_name.as_deref())
    }

    /// Whether a PSK was accepted.
    pub fn is_resumed(&self) -> bool {
        self.hs.session.as_ref().map_or(false, |s| s.resumed)
    }

    /// Whether 0-RTT data was accepted.
    pub fn early_data_accepted(&self) -> bool {
        self.hs.early_accepted
    }

    /// 0-RTT data received so far.
    pub fn take_early_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.core.early_received)
    }

    /// The authenticated client, if any.
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.hs.peer.as_ref()
    }

    /// Scheme the client authenticated with.
    pub fn peer_signature_scheme(&self) -> Option<SignatureAlgorithm> {
        self.hs.peer.as_ref().map(|p| p.scheme)
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

    /// Issue another session ticket.
    pub fn send_ticket(&mut self) -> Result<()> {
        if self.hs.state != ServerState::Established {
            return Err(Error::InvalidState("handshake not complete".into()));
        }
        if self.hs.config.tickets.is_none() {
            return Err(Error::InvalidState("no ticket backend configured".into()));
        }
        self.hs.send_ticket(&mut self.core)?;
        self.core.flush_allow_pending()
    }

    /// Send a KeyUpdate, optionally asking the client to update too.
    pub fn key_update(&mut self, request_peer: bool) -> Result<()> {
        if self.hs.state != ServerState::Established {
            return Err(Error::InvalidState(format!(
                "key update in state {:?}",
                self.hs.state
            )));
        }
        if self.core.pending_step().is_some() {
            return Err(Error::InvalidState("an operation is pending".into()));
        }
        let request = if request_peer {
            KeyUpdateRequest::UpdateRequested
        } else {
            KeyUpdateRequest::UpdateNotRequested
        };
        let traffic = self.hs.traffic()?;
        send_key_update(&mut self.core, traffic, Role::Server, request)?;
        self.core.flush_allow_pending()
    }

    /// Start post-handshake client authentication.
    pub fn request_client_auth(&mut self) -> Result<()> {
        if self.core.pending_step().is_some() {
            return Err(Error::InvalidState("an operation is pending".into()));
        }
        self.hs.request_client_auth(&mut self.core)?;
        self.core.flush_allow_pending()
    }

    /// RFC 8446 Section 7.5 exporter.
    pub fn export_keying_material(&self, label: &[u8], context: &[u8], length: usize) -> Result<Vec<u8>> {
        match &self.hs.traffic {
            Some(traffic) if self.is_established() => traffic.export(label, context, length),
            _ => Err(Error::InvalidState("exporter not available yet".into())),
        }
    }

    /// Send close_notify.
    pub fn close(&mut self) -> Result<()> {
        self.core.close()
    }
}
