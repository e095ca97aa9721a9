//! PSK Resumption Integration Tests
//!
//! Session tickets (sealed and stored), external PSKs with both key exchange
//! modes, and 0-RTT early data acceptance and rejection.

mod common;

use common::{client_builder, drive, provider, server_builder, Identity};
use sectls_core::extensions::PskKeyExchangeMode;
use sectls_core::psk::ExternalPsk;
use sectls_core::{
    CipherSuite, ClientConfig, ClientConnection, Error, MemorySessionStore, ServerConfig,
    ServerConnection, TicketSealer,
};
use std::sync::Arc;
use std::time::Duration;

fn sealer() -> TicketSealer {
    TicketSealer::new(provider(5), Duration::from_secs(3600)).unwrap()
}

/// Full handshake, collect the ticket, then resume with it.
#[test]
fn test_sealed_ticket_resumption() {
    let identity = Identity::generate(&provider(1));
    let server_config = server_builder(provider(1), &identity)
        .with_ticket_sealer(sealer())
        .with_tickets_per_handshake(2)
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config.clone()).unwrap();
    let mut server = ServerConnection::new(server_config.clone()).unwrap();
    drive(&mut client, &mut server).unwrap();
    let mut tickets = client.take_tickets();
    assert_eq!(tickets.len(), 2);
    assert_eq!(tickets[0].cipher_suite, CipherSuite::Aes128GcmSha256);
    assert_ne!(tickets[0].ticket, tickets[1].ticket);

    let mut client = ClientConnection::with_session(client_config, tickets.remove(0)).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    drive(&mut client, &mut server).unwrap();
    assert!(client.is_established());
    assert!(client.is_resumed());
    assert!(server.is_resumed());
    // No certificate in a resumed handshake.
    assert_eq!(client.peer_signature_scheme(), None);

    // The resumed connection issues fresh tickets of its own.
    assert_eq!(client.take_tickets().len(), 2);
}

/// Stored tickets are single use: the second offer falls back to a full
/// handshake.
#[test]
fn test_stored_ticket_single_use() {
    let identity = Identity::generate(&provider(1));
    let store = Arc::new(MemorySessionStore::new(16));
    let server_config = server_builder(provider(1), &identity)
        .with_session_store(store.clone())
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config.clone()).unwrap();
    let mut server = ServerConnection::new(server_config.clone()).unwrap();
    drive(&mut client, &mut server).unwrap();
    let ticket = client.take_tickets().pop().expect("one ticket");
    assert_eq!(store.len(), 1);

    let mut client = ClientConnection::with_session(client_config.clone(), ticket.clone()).unwrap();
    let mut server = ServerConnection::new(server_config.clone()).unwrap();
    drive(&mut client, &mut server).unwrap();
    assert!(server.is_resumed());

    let mut client = ClientConnection::with_session(client_config, ticket).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    drive(&mut client, &mut server).unwrap();
    assert!(client.is_established());
    assert!(!client.is_resumed());
    assert!(!server.is_resumed());
}

/// A ticket sealed by a different server is ignored, not fatal.
#[test]
fn test_unknown_ticket_falls_back() {
    let identity = Identity::generate(&provider(1));
    let issuing = server_builder(provider(1), &identity)
        .with_ticket_sealer(sealer())
        .build()
        .unwrap();
    let other = server_builder(provider(1), &identity)
        .with_ticket_sealer(TicketSealer::new(provider(6), Duration::from_secs(3600)).unwrap())
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config.clone()).unwrap();
    let mut server = ServerConnection::new(issuing).unwrap();
    drive(&mut client, &mut server).unwrap();
    let ticket = client.take_tickets().pop().unwrap();

    let mut client = ClientConnection::with_session(client_config, ticket).unwrap();
    let mut server = ServerConnection::new(other).unwrap();
    drive(&mut client, &mut server).unwrap();
    assert!(client.is_established());
    assert!(!server.is_resumed());
}

fn external_pair(modes: &[PskKeyExchangeMode]) -> (Arc<ClientConfig>, Arc<ServerConfig>) {
    let psk = ExternalPsk::new(
        b"device-42".to_vec(),
        vec![0x42; 32],
        CipherSuite::Aes128GcmSha256,
    );
    let client = ClientConfig::builder(provider(2))
        .with_external_psk(psk.clone())
        .with_psk_modes(modes)
        .build()
        .unwrap();
    let server = ServerConfig::builder(provider(1))
        .with_external_psk(psk)
        .build()
        .unwrap();
    (client, server)
}

/// External PSK with (EC)DHE.
#[test]
fn test_external_psk_dhe() {
    let (client_config, server_config) = external_pair(&[PskKeyExchangeMode::PskDheKe]);
    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    drive(&mut client, &mut server).unwrap();
    assert!(client.is_resumed());
    assert!(server.is_resumed());
    assert_eq!(
        client.export_keying_material(b"k", b"", 16).unwrap(),
        server.export_keying_material(b"k", b"", 16).unwrap()
    );
}

/// External PSK without any key share (psk_ke).
#[test]
fn test_external_psk_only() {
    let (client_config, server_config) = external_pair(&[PskKeyExchangeMode::PskKe]);
    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    drive(&mut client, &mut server).unwrap();
    assert!(client.is_established());
    assert!(server.is_resumed());

    client.send_application_data(b"ping").unwrap();
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();
    assert_eq!(server.recv_application_data(), b"ping");
}

/// Same identity, different key: the binder does not verify.
#[test]
fn test_external_psk_wrong_key() {
    let client_config = ClientConfig::builder(provider(2))
        .with_external_psk(ExternalPsk::new(
            b"device-42".to_vec(),
            vec![0x41; 32],
            CipherSuite::Aes128GcmSha256,
        ))
        .build()
        .unwrap();
    let (_, server_config) = external_pair(&[PskKeyExchangeMode::PskDheKe]);

    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    server.read_tls(&client.take_output()).unwrap();
    assert_eq!(server.process(), Err(Error::BadBinder));
    // Verification failures are masked on the wire.
    assert_eq!(server.take_output(), vec![21, 3, 3, 0, 2, 2, 47]);
}

fn early_data_setup(max_early_data: u32) -> (Arc<ClientConfig>, Arc<ServerConfig>, TicketSealer) {
    let identity = Identity::generate(&provider(1));
    let sealer = sealer();
    let server_config = server_builder(provider(1), &identity)
        .with_ticket_sealer(sealer.clone())
        .with_max_early_data(max_early_data)
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity)
        .with_early_data(true)
        .build()
        .unwrap();
    (client_config, server_config, sealer)
}

/// Early data sent with the resumption ClientHello is delivered before the
/// handshake completes.
#[test]
fn test_early_data_accepted() {
    let (client_config, server_config, _) = early_data_setup(1024);
    let mut client = ClientConnection::new(client_config.clone()).unwrap();
    let mut server = ServerConnection::new(server_config.clone()).unwrap();
    drive(&mut client, &mut server).unwrap();
    let ticket = client.take_tickets().pop().unwrap();
    assert_eq!(ticket.max_early_data, Some(1024));

    let mut client = ClientConnection::with_session(client_config, ticket).unwrap();
    client.send_early_data(b"early bird").unwrap();
    assert!(matches!(
        client.send_early_data(&[0u8; 1024]),
        Err(Error::InvalidState(_))
    ));

    let mut server = ServerConnection::new(server_config).unwrap();
    drive(&mut client, &mut server).unwrap();
    assert!(client.early_data_accepted());
    assert!(server.early_data_accepted());
    assert_eq!(server.take_early_data(), b"early bird");
    assert!(server.is_established());
}

/// A server that resumes but declines early data skips the 0-RTT records.
#[test]
fn test_early_data_rejected_and_skipped() {
    let (client_config, server_config, sealer) = early_data_setup(1024);
    let mut client = ClientConnection::new(client_config.clone()).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    drive(&mut client, &mut server).unwrap();
    let ticket = client.take_tickets().pop().unwrap();

    // Same ticket key, but this server picks a different suite.
    let identity = Identity::generate(&provider(1));
    let declining = server_builder(provider(1), &identity)
        .with_cipher_suites(&[CipherSuite::ChaCha20Poly1305Sha256, CipherSuite::Aes128GcmSha256])
        .with_ticket_sealer(sealer)
        .with_max_early_data(1024)
        .build()
        .unwrap();

    let mut client = ClientConnection::with_session(client_config, ticket).unwrap();
    client.send_early_data(b"lost in transit").unwrap();
    let mut server = ServerConnection::new(declining).unwrap();
    drive(&mut client, &mut server).unwrap();

    assert!(client.is_established());
    assert!(server.is_resumed());
    assert!(!client.early_data_accepted());
    assert!(!server.early_data_accepted());
    assert!(server.take_early_data().is_empty());
}

/// Early data is not offered when the ticket does not allow it.
#[test]
fn test_early_data_needs_ticket_permission() {
    let (client_config, server_config, _) = early_data_setup(0);
    let mut client = ClientConnection::new(client_config.clone()).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    drive(&mut client, &mut server).unwrap();
    let ticket = client.take_tickets().pop().unwrap();
    assert_eq!(ticket.max_early_data, None);

    let mut client = ClientConnection::with_session(client_config, ticket).unwrap();
    assert!(matches!(
        client.send_early_data(b"nope"),
        Err(Error::InvalidState(_))
    ));
}
