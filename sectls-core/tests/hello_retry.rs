//! HelloRetryRequest integration tests.
//!
//! Covers the stateful retry, the cookie-based stateless retry (including
//! the second ClientHello landing on another server instance) and the
//! failure cases around group negotiation.

mod common;

use common::{client_builder, drive, provider, server_builder, Identity};
use sectls_core::cookie::RetryCookieGuard;
use sectls_core::{ClientConnection, ClientState, Error, ServerConnection, ServerState};
use sectls_crypto::KeyExchangeAlgorithm;
use std::time::Duration;

/// Client leads with X25519, server only takes P-256: one retry, then done.
#[test]
fn test_stateful_retry() {
    let identity = Identity::generate(&provider(1));
    let server_config = server_builder(provider(1), &identity)
        .with_groups(&[KeyExchangeAlgorithm::Secp256r1])
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();

    println!("ClientHello 1 -> HelloRetryRequest");
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();
    assert_eq!(server.state(), ServerState::HelloRetryRequestSent);

    client.read_tls(&server.take_output()).unwrap();
    client.process().unwrap();
    assert_eq!(client.state(), ClientState::ClientHelloSent);

    drive(&mut client, &mut server).unwrap();
    assert!(client.is_established());
    assert!(server.is_established());

    let c = client.export_keying_material(b"label", b"", 16).unwrap();
    let s = server.export_keying_material(b"label", b"", 16).unwrap();
    assert_eq!(c, s);
}

/// With a cookie guard the first server forgets the client; a second
/// instance sharing the guard finishes the handshake.
#[test]
fn test_stateless_retry_across_instances() {
    let identity = Identity::generate(&provider(1));
    let guard = RetryCookieGuard::new(provider(3), Duration::from_secs(3600)).unwrap();
    let config = server_builder(provider(1), &identity)
        .with_groups(&[KeyExchangeAlgorithm::Secp256r1])
        .with_cookie_guard(guard)
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let mut first = ServerConnection::new(config.clone()).unwrap();
    first.read_tls(&client.take_output()).unwrap();
    first.process().unwrap();
    assert_eq!(first.state(), ServerState::HelloRetryRequestSent);
    client.read_tls(&first.take_output()).unwrap();
    client.process().unwrap();
    drop(first);

    let mut second = ServerConnection::new(config).unwrap();
    drive(&mut client, &mut second).unwrap();
    assert!(client.is_established());
    assert!(second.is_established());
    assert_eq!(
        client.export_keying_material(b"label", b"", 16).unwrap(),
        second.export_keying_material(b"label", b"", 16).unwrap()
    );
}

/// A cookie minted under another guard's secret is refused.
#[test]
fn test_foreign_cookie_rejected() {
    let identity = Identity::generate(&provider(1));
    let minting = server_builder(provider(1), &identity)
        .with_groups(&[KeyExchangeAlgorithm::Secp256r1])
        .with_cookie_guard(RetryCookieGuard::new(provider(3), Duration::from_secs(3600)).unwrap())
        .build()
        .unwrap();
    let checking = server_builder(provider(1), &identity)
        .with_groups(&[KeyExchangeAlgorithm::Secp256r1])
        .with_cookie_guard(RetryCookieGuard::new(provider(4), Duration::from_secs(3600)).unwrap())
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let mut first = ServerConnection::new(minting).unwrap();
    first.read_tls(&client.take_output()).unwrap();
    first.process().unwrap();
    client.read_tls(&first.take_output()).unwrap();
    client.process().unwrap();

    let mut second = ServerConnection::new(checking).unwrap();
    second.read_tls(&client.take_output()).unwrap();
    let err = second.process().unwrap_err();
    assert!(matches!(err, Error::HrrCookieError(_)), "{:?}", err);
    assert!(second.is_closed());
}

/// A stateless server that sees a second ClientHello without its cookie
/// has nothing to continue from.
#[test]
fn test_missing_cookie_after_stateless_retry() {
    let identity = Identity::generate(&provider(1));
    let config = server_builder(provider(1), &identity)
        .with_groups(&[KeyExchangeAlgorithm::Secp256r1])
        .with_cookie_guard(RetryCookieGuard::new(provider(3), Duration::from_secs(3600)).unwrap())
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let hello = client.take_output();
    let mut server = ServerConnection::new(config).unwrap();
    server.read_tls(&hello).unwrap();
    server.process().unwrap();
    assert_eq!(server.state(), ServerState::HelloRetryRequestSent);

    // Replay the first ClientHello instead of answering the retry.
    server.read_tls(&hello).unwrap();
    assert!(matches!(server.process(), Err(Error::MissingExtension(_))));
}

/// No group in common at all: no retry, just handshake_failure.
#[test]
fn test_no_common_group() {
    let identity = Identity::generate(&provider(1));
    let server_config = server_builder(provider(1), &identity)
        .with_groups(&[KeyExchangeAlgorithm::Secp384r1])
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity)
        .with_groups(&[KeyExchangeAlgorithm::X25519, KeyExchangeAlgorithm::Secp256r1])
        .build()
        .unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    server.read_tls(&client.take_output()).unwrap();
    assert!(matches!(server.process(), Err(Error::HandshakeFailure(_))));
    assert_eq!(server.take_output(), vec![21, 3, 3, 0, 2, 2, 40]);
}

/// A stateful server that receives the same ClientHello twice treats the
/// second one as a retry without the requested share.
#[test]
fn test_retry_ignored_by_client() {
    let identity = Identity::generate(&provider(1));
    let server_config = server_builder(provider(1), &identity)
        .with_groups(&[KeyExchangeAlgorithm::Secp256r1])
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let hello = client.take_output();
    let mut server = ServerConnection::new(server_config).unwrap();
    server.read_tls(&hello).unwrap();
    server.process().unwrap();

    server.read_tls(&hello).unwrap();
    assert!(matches!(server.process(), Err(Error::IllegalParameter(_))));
    assert_eq!(server.state(), ServerState::Closed);
}
