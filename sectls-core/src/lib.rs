//! # SecTLS Core
//!
//! Sans-IO TLS 1.3 handshake engine (RFC 8446) for both roles.
//!
//! This crate provides:
//! - Client and server handshake state machines, including HelloRetryRequest
//!   (stateful or cookie based), PSK resumption, 0-RTT, post-handshake client
//!   authentication and KeyUpdate
//! - The key schedule and record protection
//! - Handshake fragmentation and reassembly with strict ordering checks
//! - Session tickets, either sealed (stateless) or stored server-side
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Host (sockets, threads, async tasks)  │
//! └─────────────────┬───────────────────────┘
//!                   │ read_tls / process / resume / take_output
//! ┌─────────────────▼───────────────────────┐
//! │        sectls-core (this crate)         │
//! │  ┌──────────────────────────────────┐   │
//! │  │   Client / Server State Machines │   │
//! │  ├──────────────────────────────────┤   │
//! │  │   Transcript + Key Schedule      │   │
//! │  ├──────────────────────────────────┤   │
//! │  │   Handshake Codec / Reassembly   │   │
//! │  ├──────────────────────────────────┤   │
//! │  │   Record Layer + Protection      │   │
//! │  └──────────────────────────────────┘   │
//! └─────────────────┬───────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────┐
//! │      sectls-crypto (trait interface)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use sectls_core::certificate_validator::{CertifiedKey, RawKeyValidator};
//! use sectls_core::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
//! use sectls_crypto::SignatureAlgorithm;
//! use sectls_crypto_mock::MockCryptoProvider;
//! use std::sync::Arc;
//!
//! # fn main() -> sectls_core::Result<()> {
//! let provider = Arc::new(MockCryptoProvider::new());
//! let (signing, verifying) = provider.credential()?;
//! let server_config = ServerConfig::builder(provider.clone())
//!     .with_credentials(CertifiedKey::raw_public_key(signing, &verifying, SignatureAlgorithm::Ed25519))
//!     .build()?;
//! let client_config = ClientConfig::builder(provider)
//!     .with_validator(Arc::new(
//!         RawKeyValidator::new(SignatureAlgorithm::Ed25519).with_pinned_key(&verifying),
//!     ))
//!     .build()?;
//!
//! let mut client = ClientConnection::new(client_config)?;
//! let mut server = ServerConnection::new(server_config)?;
//! while !(client.is_established() && server.is_established()) {
//!     server.read_tls(&client.take_output())?;
//!     server.process()?;
//!     client.read_tls(&server.take_output())?;
//!     client.process()?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    unused_qualifications
)]
#![forbid(unsafe_code)]

// Re-export crypto interface
pub use sectls_crypto;

pub mod alert;
pub mod certificate_validator;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod cookie;
pub mod error;
pub mod extensions;
pub mod handshake;
pub mod key_schedule;
pub mod messages;
pub mod protocol;
pub mod psk;
pub mod record;
pub mod record_protection;
pub mod session;
pub mod transcript;
pub mod transport;

// Re-exports
pub use cipher::CipherSuite;
pub use config::{ClientAuthMode, ClientConfig, ServerConfig};
pub use error::{AlertDescription, Error, ErrorKind, Result};
pub use handshake::{
    ClientConnection, ClientState, PendingStep, Progress, ServerConnection, ServerState,
};
pub use protocol::{ContentType, ProtocolVersion};
pub use session::{ClientSession, MemorySessionStore, SessionStore, TicketSealer};
