//! Client and server configuration.
//!
//! # Example
//!
//! ```rust
//! use sectls_core::{CipherSuite, ClientConfig};
//! use sectls_crypto_mock::MockCryptoProvider;
//! use std::sync::Arc;
//!
//! let config = ClientConfig::builder(Arc::new(MockCryptoProvider::new()))
//!     .with_cipher_suites(&[CipherSuite::Aes128GcmSha256])
//!     .with_server_name("example.com")
//!     .build()
//!     .unwrap();
//! assert_eq!(config.server_name.as_deref(), Some("example.com"));
//! ```

use crate::certificate_validator::{CertificateValidator, CertifiedKey};
use crate::cipher::CipherSuite;
use crate::cookie::RetryCookieGuard;
use crate::error::{Error, Result};
use crate::extensions::PskKeyExchangeMode;
use crate::messages::new_session_ticket::MAX_TICKET_LIFETIME;
use crate::protocol::MAX_FRAGMENT_LENGTH;
use crate::psk::ExternalPsk;
use crate::session::{SessionStore, TicketBackend, TicketSealer};
use sectls_crypto::{CryptoProvider, KeyExchangeAlgorithm, SignatureAlgorithm};
use std::fmt;
use std::sync::Arc;

/// Default limit on a reassembled handshake message.
pub const DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE: usize = 65536;

/// Smallest permitted `max_handshake_message_size`.
pub const MIN_HANDSHAKE_MESSAGE_SIZE: usize = 1024;

/// Smallest permitted `max_fragment_length`.
pub const MIN_FRAGMENT_LENGTH: usize = 512;

/// Default ticket lifetime in seconds.
pub const DEFAULT_TICKET_LIFETIME: u32 = 7200;

fn default_suites() -> Vec<CipherSuite> {
    vec![
        CipherSuite::Aes128GcmSha256,
        CipherSuite::Aes256GcmSha384,
        CipherSuite::ChaCha20Poly1305Sha256,
    ]
}

fn default_groups() -> Vec<KeyExchangeAlgorithm> {
    vec![KeyExchangeAlgorithm::X25519, KeyExchangeAlgorithm::Secp256r1]
}

fn default_signature_algorithms() -> Vec<SignatureAlgorithm> {
    vec![
        SignatureAlgorithm::Ed25519,
        SignatureAlgorithm::EcdsaSecp256r1Sha256,
        SignatureAlgorithm::EcdsaSecp384r1Sha384,
    ]
}

fn validate_common(
    suites: &[CipherSuite],
    groups: &[KeyExchangeAlgorithm],
    signature_algorithms: &[SignatureAlgorithm],
    max_fragment_length: usize,
    max_handshake_message_size: usize,
) -> Result<()> {
    if suites.is_empty() {
        return Err(Error::InvalidConfig("No cipher suites specified".into()));
    }
    if groups.is_empty() {
        return Err(Error::InvalidConfig("No key exchange groups specified".into()));
    }
    if signature_algorithms.is_empty() {
        return Err(Error::InvalidConfig(
            "No signature algorithms specified".into(),
        ));
    }
    if !(MIN_FRAGMENT_LENGTH..=MAX_FRAGMENT_LENGTH).contains(&max_fragment_length) {
        return Err(Error::InvalidConfig(format!(
            "Max fragment length {} outside {}..={}",
            max_fragment_length, MIN_FRAGMENT_LENGTH, MAX_FRAGMENT_LENGTH
        )));
    }
    if max_handshake_message_size < MIN_HANDSHAKE_MESSAGE_SIZE {
        return Err(Error::InvalidConfig(format!(
            "Max handshake message size {} below {}",
            max_handshake_message_size, MIN_HANDSHAKE_MESSAGE_SIZE
        )));
    }
    Ok(())
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Crypto provider
    pub provider: Arc<dyn CryptoProvider>,
    /// Cipher suites in preference order
    pub cipher_suites: Vec<CipherSuite>,
    /// Groups in preference order; the first gets a key share
    pub groups: Vec<KeyExchangeAlgorithm>,
    /// Accepted signature schemes
    pub signature_algorithms: Vec<SignatureAlgorithm>,
    /// Largest plaintext per record
    pub max_fragment_length: usize,
    /// Largest handshake message accepted
    pub max_handshake_message_size: usize,
    /// SNI host name
    pub server_name: Option<String>,
    /// ALPN protocols in preference order
    pub alpn_protocols: Vec<Vec<u8>>,
    /// Validator for the server chain
    pub validator: Option<Arc<dyn CertificateValidator>>,
    /// Client certificate for mutual and post-handshake auth
    pub credentials: Option<CertifiedKey>,
    /// Offer post_handshake_auth
    pub post_handshake_auth: bool,
    /// Offer 0-RTT when resuming a ticket that allows it
    pub enable_early_data: bool,
    /// PSK modes offered
    pub psk_modes: Vec<PskKeyExchangeMode>,
    /// Out-of-band PSKs offered after any ticket
    pub external_psks: Vec<ExternalPsk>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("cipher_suites", &self.cipher_suites)
            .field("groups", &self.groups)
            .field("server_name", &self.server_name)
            .field("post_handshake_auth", &self.post_handshake_auth)
            .field("enable_early_data", &self.enable_early_data)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder(provider: Arc<dyn CryptoProvider>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                provider,
                cipher_suites: default_suites(),
                groups: default_groups(),
                signature_algorithms: default_signature_algorithms(),
                max_fragment_length: MAX_FRAGMENT_LENGTH,
                max_handshake_message_size: DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE,
                server_name: None,
                alpn_protocols: Vec::new(),
                validator: None,
                credentials: None,
                post_handshake_auth: false,
                enable_early_data: false,
                psk_modes: vec![PskKeyExchangeMode::PskDheKe],
                external_psks: Vec::new(),
            },
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set cipher suites.
    pub fn with_cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.config.cipher_suites = suites.to_vec();
        self
    }

    /// Set key exchange groups.
    pub fn with_groups(mut self, groups: &[KeyExchangeAlgorithm]) -> Self {
        self.config.groups = groups.to_vec();
        self
    }

    /// Set accepted signature schemes.
    pub fn with_signature_algorithms(mut self, schemes: &[SignatureAlgorithm]) -> Self {
        self.config.signature_algorithms = schemes.to_vec();
        self
    }

    /// Set maximum fragment length.
    pub fn with_max_fragment_length(mut self, length: usize) -> Self {
        self.config.max_fragment_length = length;
        self
    }

    /// Set maximum handshake message size.
    pub fn with_max_handshake_message_size(mut self, size: usize) -> Self {
        self.config.max_handshake_message_size = size;
        self
    }

    /// Set the server name sent in SNI.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = Some(name.into());
        self
    }

    /// Set ALPN protocols.
    pub fn with_alpn_protocols(mut self, protocols: &[&[u8]]) -> Self {
        self.config.alpn_protocols = protocols.iter().map(|p| p.to_vec()).collect();
        self
    }

    /// Set the server certificate validator.
    pub fn with_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.config.validator = Some(validator);
        self
    }

    /// Set the client certificate.
    pub fn with_credentials(mut self, credentials: CertifiedKey) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Offer post-handshake client authentication.
    pub fn with_post_handshake_auth(mut self, enable: bool) -> Self {
        self.config.post_handshake_auth = enable;
        self
    }

    /// Offer early data when a ticket permits it.
    pub fn with_early_data(mut self, enable: bool) -> Self {
        self.config.enable_early_data = enable;
        self
    }

    /// Set the PSK key exchange modes offered.
    pub fn with_psk_modes(mut self, modes: &[PskKeyExchangeMode]) -> Self {
        self.config.psk_modes = modes.to_vec();
        self
    }

    /// Add an out-of-band PSK.
    pub fn with_external_psk(mut self, psk: ExternalPsk) -> Self {
        self.config.external_psks.push(psk);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<Arc<ClientConfig>> {
        let config = self.config;
        validate_common(
            &config.cipher_suites,
            &config.groups,
            &config.signature_algorithms,
            config.max_fragment_length,
            config.max_handshake_message_size,
        )?;
        if config.validator.is_none() && config.external_psks.is_empty() {
            return Err(Error::InvalidConfig(
                "A certificate validator or an external PSK is required".into(),
            ));
        }
        if config.psk_modes.is_empty() {
            return Err(Error::InvalidConfig("No PSK modes specified".into()));
        }
        if let Some(psk) = config
            .external_psks
            .iter()
            .find(|psk| !config.cipher_suites.contains(&psk.suite))
        {
            return Err(Error::InvalidConfig(format!(
                "External PSK bound to disabled suite {}",
                psk.suite.name()
            )));
        }
        Ok(Arc::new(config))
    }
}

/// Whether and how the server asks for a client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuthMode {
    /// Never ask
    #[default]
    None,
    /// Ask; an empty Certificate is accepted
    Request,
    /// Ask; an empty Certificate fails with `CertificateRequired`
    Require,
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Crypto provider
    pub provider: Arc<dyn CryptoProvider>,
    /// Cipher suites in preference order
    pub cipher_suites: Vec<CipherSuite>,
    /// Groups in preference order
    pub groups: Vec<KeyExchangeAlgorithm>,
    /// Accepted signature schemes for client certificates
    pub signature_algorithms: Vec<SignatureAlgorithm>,
    /// Largest plaintext per record
    pub max_fragment_length: usize,
    /// Largest handshake message accepted
    pub max_handshake_message_size: usize,
    /// Server certificate
    pub credentials: Option<CertifiedKey>,
    /// Client certificate policy
    pub client_auth: ClientAuthMode,
    /// Validator for client chains
    pub client_validator: Option<Arc<dyn CertificateValidator>>,
    /// Issue stateless retries with integrity-protected cookies
    pub cookie_guard: Option<RetryCookieGuard>,
    /// Where ticket state lives; `None` disables tickets
    pub tickets: Option<TicketBackend>,
    /// Tickets sent after each full handshake
    pub tickets_per_handshake: usize,
    /// Ticket lifetime in seconds
    pub ticket_lifetime: u32,
    /// Early data allowance advertised in tickets; 0 disables 0-RTT
    pub max_early_data: u32,
    /// Out-of-band PSKs
    pub external_psks: Vec<ExternalPsk>,
    /// ALPN protocols in preference order
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("cipher_suites", &self.cipher_suites)
            .field("groups", &self.groups)
            .field("client_auth", &self.client_auth)
            .field("stateless_retry", &self.cookie_guard.is_some())
            .field("tickets", &self.tickets)
            .field("max_early_data", &self.max_early_data)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Create a new configuration builder.
    pub fn builder(provider: Arc<dyn CryptoProvider>) -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: ServerConfig {
                provider,
                cipher_suites: default_suites(),
                groups: default_groups(),
                signature_algorithms: default_signature_algorithms(),
                max_fragment_length: MAX_FRAGMENT_LENGTH,
                max_handshake_message_size: DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE,
                credentials: None,
                client_auth: ClientAuthMode::None,
                client_validator: None,
                cookie_guard: None,
                tickets: None,
                tickets_per_handshake: 1,
                ticket_lifetime: DEFAULT_TICKET_LIFETIME,
                max_early_data: 0,
                external_psks: Vec::new(),
                alpn_protocols: Vec::new(),
            },
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set cipher suites.
    pub fn with_cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.config.cipher_suites = suites.to_vec();
        self
    }

    /// Set key exchange groups.
    pub fn with_groups(mut self, groups: &[KeyExchangeAlgorithm]) -> Self {
        self.config.groups = groups.to_vec();
        self
    }

    /// Set accepted client signature schemes.
    pub fn with_signature_algorithms(mut self, schemes: &[SignatureAlgorithm]) -> Self {
        self.config.signature_algorithms = schemes.to_vec();
        self
    }

    /// Set maximum fragment length.
    pub fn with_max_fragment_length(mut self, length: usize) -> Self {
        self.config.max_fragment_length = length;
        self
    }

    /// Set maximum handshake message size.
    pub fn with_max_handshake_message_size(mut self, size: usize) -> Self {
        self.config.max_handshake_message_size = size;
        self
    }

    /// Set the server certificate.
    pub fn with_credentials(mut self, credentials: CertifiedKey) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Ask for client certificates during the handshake.
    pub fn with_client_auth(
        mut self,
        mode: ClientAuthMode,
        validator: Arc<dyn CertificateValidator>,
    ) -> Self {
        self.config.client_auth = mode;
        self.config.client_validator = Some(validator);
        self
    }

    /// Validator for post-handshake client certificates only.
    pub fn with_client_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.config.client_validator = Some(validator);
        self
    }

    /// Use stateless HelloRetryRequest cookies.
    pub fn with_cookie_guard(mut self, guard: RetryCookieGuard) -> Self {
        self.config.cookie_guard = Some(guard);
        self
    }

    /// Seal ticket state into the tickets.
    pub fn with_ticket_sealer(mut self, sealer: TicketSealer) -> Self {
        self.config.tickets = Some(TicketBackend::Sealed(sealer));
        self
    }

    /// Keep ticket state in a store.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.config.tickets = Some(TicketBackend::Stored(store));
        self
    }

    /// Number of tickets issued after each handshake.
    pub fn with_tickets_per_handshake(mut self, count: usize) -> Self {
        self.config.tickets_per_handshake = count;
        self
    }

    /// Ticket lifetime in seconds.
    pub fn with_ticket_lifetime(mut self, seconds: u32) -> Self {
        self.config.ticket_lifetime = seconds;
        self
    }

    /// Allow up to `max` bytes of 0-RTT data on resumption.
    pub fn with_max_early_data(mut self, max: u32) -> Self {
        self.config.max_early_data = max;
        self
    }

    /// Add an out-of-band PSK.
    pub fn with_external_psk(mut self, psk: ExternalPsk) -> Self {
        self.config.external_psks.push(psk);
        self
    }

    /// Set ALPN protocols.
    pub fn with_alpn_protocols(mut self, protocols: &[&[u8]]) -> Self {
        self.config.alpn_protocols = protocols.iter().map(|p| p.to_vec()).collect();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<Arc<ServerConfig>> {
        let config = self.config;
        validate_common(
            &config.cipher_suites,
            &config.groups,
            &config.signature_algorithms,
            config.max_fragment_length,
            config.max_handshake_message_size,
        )?;
        if config.credentials.is_none() && config.external_psks.is_empty() {
            return Err(Error::InvalidConfig(
                "Server credentials or an external PSK are required".into(),
            ));
        }
        if config.client_auth != ClientAuthMode::None && config.client_validator.is_none() {
            return Err(Error::InvalidConfig(
                "Client authentication needs a validator".into(),
            ));
        }
        if config.ticket_lifetime > MAX_TICKET_LIFETIME {
            return Err(Error::InvalidConfig(format!(
                "Ticket lifetime {} exceeds {} seconds",
                config.ticket_lifetime, MAX_TICKET_LIFETIME
            )));
        }
        if config.max_early_data > 0 && config.tickets.is_none() {
            return Err(Error::InvalidConfig(
                "Early data needs session tickets".into(),
            ));
        }
        Ok(Arc::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_validator::RawKeyValidator;
    use sectls_crypto_mock::MockCryptoProvider;

    fn provider() -> Arc<dyn CryptoProvider> {
        Arc::new(MockCryptoProvider::new())
    }

    fn validator() -> Arc<dyn CertificateValidator> {
        Arc::new(RawKeyValidator::new(SignatureAlgorithm::Ed25519))
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::builder(provider())
            .with_validator(validator())
            .build()
            .unwrap();
        assert_eq!(config.cipher_suites.len(), 3);
        assert_eq!(config.max_fragment_length, 16384);
        assert_eq!(config.max_handshake_message_size, 65536);
        assert_eq!(config.psk_modes, vec![PskKeyExchangeMode::PskDheKe]);
        assert!(!config.enable_early_data);
    }

    #[test]
    fn test_client_validation() {
        assert!(ClientConfig::builder(provider()).build().is_err());
        let result = ClientConfig::builder(provider())
            .with_validator(validator())
            .with_cipher_suites(&[])
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        let result = ClientConfig::builder(provider())
            .with_validator(validator())
            .with_max_fragment_length(20000)
            .build();
        assert!(result.is_err());
        let result = ClientConfig::builder(provider())
            .with_validator(validator())
            .with_max_fragment_length(256)
            .build();
        assert!(result.is_err());
        let result = ClientConfig::builder(provider())
            .with_validator(validator())
            .with_max_handshake_message_size(512)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_external_psk_suite_must_be_enabled() {
        let result = ClientConfig::builder(provider())
            .with_cipher_suites(&[CipherSuite::Aes128GcmSha256])
            .with_external_psk(ExternalPsk::new(
                b"id".to_vec(),
                vec![1; 32],
                CipherSuite::Aes256GcmSha384,
            ))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_server_validation() {
        assert!(ServerConfig::builder(provider()).build().is_err());
        let psk = ExternalPsk::new(b"id".to_vec(), vec![1; 32], CipherSuite::Aes128GcmSha256);
        let config = ServerConfig::builder(provider())
            .with_external_psk(psk.clone())
            .build()
            .unwrap();
        assert_eq!(config.ticket_lifetime, DEFAULT_TICKET_LIFETIME);
        assert!(config.tickets.is_none());

        let result = ServerConfig::builder(provider())
            .with_external_psk(psk.clone())
            .with_max_early_data(1024)
            .build();
        assert!(result.is_err());

        let result = ServerConfig::builder(provider())
            .with_external_psk(psk)
            .with_ticket_lifetime(MAX_TICKET_LIFETIME + 1)
            .build();
        assert!(result.is_err());
    }
}
