//! KeyUpdate integration tests.
//!
//! Traffic key rotation in both directions, requested updates and the
//! rules on when an update may be sent.

mod common;

use common::{client_builder, established_pair, provider, server_builder, Identity};
use sectls_core::{ClientConnection, Error, ServerConnection};

/// An unrequested update from the client: data on both sides of it arrives,
/// and the server does not answer.
#[test]
fn test_client_update_not_requested() {
    let (mut client, mut server) = established_pair();

    client.send_application_data(b"before ").unwrap();
    client.key_update(false).unwrap();
    client.send_application_data(b"after").unwrap();

    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();
    assert_eq!(server.recv_application_data(), b"before after");
    assert!(server.take_output().is_empty());
}

/// A requested update is answered, after which the server's new write keys
/// carry its data.
#[test]
fn test_requested_update_answered() {
    let (mut client, mut server) = established_pair();

    client.key_update(true).unwrap();
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();

    server.send_application_data(b"rotated").unwrap();
    let reply = server.take_output();
    assert!(!reply.is_empty());
    client.read_tls(&reply).unwrap();
    client.process().unwrap();
    assert_eq!(client.recv_application_data(), b"rotated");

    // And the client's own keys moved as well.
    client.send_application_data(b"ack").unwrap();
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();
    assert_eq!(server.recv_application_data(), b"ack");
}

/// The server may start an update too.
#[test]
fn test_server_initiated_update() {
    let (mut client, mut server) = established_pair();
    server.key_update(true).unwrap();
    server.send_application_data(b"one").unwrap();
    client.read_tls(&server.take_output()).unwrap();
    client.process().unwrap();
    assert_eq!(client.recv_application_data(), b"one");

    // The client's answering KeyUpdate reaches the server.
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();
    client.send_application_data(b"two").unwrap();
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();
    assert_eq!(server.recv_application_data(), b"two");
}

/// Many generations in a row stay in step.
#[test]
fn test_repeated_updates() {
    let (mut client, mut server) = established_pair();
    for i in 0..20u8 {
        client.key_update(i % 2 == 0).unwrap();
        client.send_application_data(&[i]).unwrap();
        server.read_tls(&client.take_output()).unwrap();
        server.process().unwrap();
        assert_eq!(server.recv_application_data(), vec![i]);
        client.read_tls(&server.take_output()).unwrap();
        client.process().unwrap();
    }
    // Rotation leaves the exporter alone.
    assert_eq!(
        client.export_keying_material(b"EXPORTER-x", b"", 16).unwrap(),
        server.export_keying_material(b"EXPORTER-x", b"", 16).unwrap()
    );
}

/// Records sealed under the old keys after the peer switched fail.
#[test]
fn test_stale_keys_rejected() {
    let (mut client, mut server) = established_pair();
    client.send_application_data(b"old").unwrap();
    let stale = client.take_output();
    server.read_tls(&stale).unwrap();
    server.process().unwrap();
    assert_eq!(server.recv_application_data(), b"old");

    client.key_update(false).unwrap();
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();

    // Replaying a first-generation record under second-generation keys.
    server.read_tls(&stale).unwrap();
    assert_eq!(server.process(), Err(Error::BadRecordMac));
}

/// Updates are refused before the handshake completes; the refusal does not
/// end the connection.
#[test]
fn test_update_before_established() {
    let identity = Identity::generate(&provider(1));
    let mut client =
        ClientConnection::new(client_builder(provider(2), &identity).build().unwrap()).unwrap();
    let mut server =
        ServerConnection::new(server_builder(provider(1), &identity).build().unwrap()).unwrap();
    assert!(matches!(client.key_update(true), Err(Error::InvalidState(_))));
    assert!(matches!(server.key_update(true), Err(Error::InvalidState(_))));
    assert!(!client.is_closed());
    assert!(!server.is_closed());
}
