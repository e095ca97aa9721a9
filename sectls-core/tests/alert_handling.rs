//! Alert Handling Tests
//!
//! Alert encoding, the error-to-alert mapping, and how connections react to
//! alerts from the peer at different points of the handshake.

mod common;

use common::{client_builder, established_pair, provider, server_builder, Identity};
use sectls_core::alert::{Alert, AlertLevel};
use sectls_core::record::encode_record;
use sectls_core::{
    AlertDescription, ClientConnection, ContentType, Error, ErrorKind, Progress, ProtocolVersion,
    ServerConnection,
};

fn fresh_pair() -> (ClientConnection, ServerConnection) {
    let identity = Identity::generate(&provider(1));
    let client =
        ClientConnection::new(client_builder(provider(2), &identity).build().unwrap()).unwrap();
    let server =
        ServerConnection::new(server_builder(provider(1), &identity).build().unwrap()).unwrap();
    (client, server)
}

/// Test alert wire encoding.
#[test]
fn test_alert_encoding() {
    assert_eq!(Alert::fatal(AlertDescription::HandshakeFailure).encode(), [2, 40]);
    assert_eq!(Alert::close_notify().encode(), [1, 0]);
    assert!(!Alert::close_notify().is_fatal());
    assert!(Alert::fatal(AlertDescription::DecodeError).is_fatal());

    let decoded = Alert::decode(&[2, 116]).unwrap();
    assert_eq!(decoded.level, AlertLevel::Fatal);
    assert_eq!(decoded.description, AlertDescription::CertificateRequired);

    assert!(matches!(Alert::decode(&[2]), Err(Error::Decode(_))));
    assert!(matches!(Alert::decode(&[3, 40]), Err(Error::Decode(_))));
    assert!(matches!(Alert::decode(&[2, 40, 0]), Err(Error::Decode(_))));
}

/// Verification failures share one alert; usage errors send none.
#[test]
fn test_error_alert_mapping() {
    for err in [
        Error::VerifyMac,
        Error::BadBinder,
        Error::BadSignature,
        Error::HrrCookieError("stale".into()),
    ] {
        assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter), "{:?}", err);
        assert_eq!(err.kind(), ErrorKind::Verification);
    }
    assert_eq!(Error::BadRecordMac.alert(), Some(AlertDescription::BadRecordMac));
    assert_eq!(Error::EarlyDataLimit.alert(), Some(AlertDescription::UnexpectedMessage));
    assert_eq!(
        Error::HandshakeSizeError { declared: 9, max: 1 }.alert(),
        Some(AlertDescription::DecodeError)
    );
    assert_eq!(Error::InvalidState("x".into()).alert(), None);
    assert_eq!(Error::AlertReceived(AlertDescription::DecodeError).alert(), None);

    assert!(!Error::InvalidState("x".into()).is_fatal());
    assert!(!Error::Pending.is_fatal());
    assert!(Error::ConnectionClosed.is_fatal());
}

/// A fatal alert in the clear before anything else closes the server
/// without a reply.
#[test]
fn test_fatal_alert_before_hello() {
    let (_, mut server) = fresh_pair();
    server.read_tls(&[21, 3, 3, 0, 2, 2, 40]).unwrap();
    assert_eq!(
        server.process(),
        Err(Error::AlertReceived(AlertDescription::HandshakeFailure))
    );
    assert!(server.is_closed());
    assert!(server.take_output().is_empty());
    assert_eq!(server.read_tls(&[0]), Err(Error::ConnectionClosed));
    assert_eq!(server.process(), Err(Error::ConnectionClosed));
}

/// The server's fatal alert reaches the client mid-handshake.
#[test]
fn test_client_sees_server_alert() {
    let identity = Identity::generate(&provider(1));
    let mut client = ClientConnection::new(
        client_builder(provider(2), &identity)
            .with_alpn_protocols(&[b"h2"])
            .build()
            .unwrap(),
    )
    .unwrap();
    let mut server = ServerConnection::new(
        server_builder(provider(1), &identity)
            .with_alpn_protocols(&[b"http/1.1"])
            .build()
            .unwrap(),
    )
    .unwrap();

    server.read_tls(&client.take_output()).unwrap();
    assert!(server.process().is_err());
    client.read_tls(&server.take_output()).unwrap();
    assert_eq!(
        client.process(),
        Err(Error::AlertReceived(AlertDescription::HandshakeFailure))
    );
    assert!(client.is_closed());
}

/// user_canceled is logged and otherwise ignored.
#[test]
fn test_user_canceled_ignored() {
    let (_, mut server) = fresh_pair();
    server.read_tls(&[21, 3, 3, 0, 2, 1, 90]).unwrap();
    assert_eq!(server.process().unwrap(), Progress::NeedInput);
    assert!(!server.is_closed());
}

/// A malformed alert is a decode_error.
#[test]
fn test_malformed_alert() {
    let (_, mut server) = fresh_pair();
    server.read_tls(&[21, 3, 3, 0, 3, 2, 40, 0]).unwrap();
    assert!(matches!(server.process(), Err(Error::Decode(_))));
    assert_eq!(server.take_output(), vec![21, 3, 3, 0, 2, 2, 50]);
}

/// close_notify during the handshake ends it cleanly; the reply is a
/// close_notify, not an error alert.
#[test]
fn test_close_during_handshake() {
    let (mut client, mut server) = fresh_pair();
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();

    client.close().unwrap();
    let out = client.take_output();
    server.read_tls(&out).unwrap();
    assert_eq!(server.process(), Err(Error::ConnectionClosed));
    assert!(server.is_closed());
    assert!(!server.is_established());
}

/// Encrypted close_notify after the handshake; each side sends only one.
#[test]
fn test_close_notify_established() {
    let (mut client, mut server) = established_pair();
    server.close().unwrap();
    // A second close before the reply adds nothing.
    let first = server.take_output();
    server.close().unwrap();
    assert!(server.take_output().is_empty());

    client.read_tls(&first).unwrap();
    assert_eq!(client.process(), Err(Error::ConnectionClosed));
    let reply = client.take_output();
    assert!(!reply.is_empty());

    server.read_tls(&reply).unwrap();
    assert_eq!(server.process(), Err(Error::ConnectionClosed));
    assert!(server.take_output().is_empty());
    assert_eq!(client.close(), Err(Error::ConnectionClosed));
}

/// Application data in the clear after the handshake is refused.
#[test]
fn test_plaintext_application_data_rejected() {
    let (mut client, mut server) = established_pair();
    server.read_tls(&[23, 3, 3, 0, 3, 1, 2, 3]).unwrap();
    // Read keys are active: the record fails authentication.
    assert_eq!(server.process(), Err(Error::BadRecordMac));

    client.read_tls(&server.take_output()).unwrap();
    assert_eq!(
        client.process(),
        Err(Error::AlertReceived(AlertDescription::BadRecordMac))
    );
}

/// Once established, an alert in the clear is not authenticated: a forged
/// close_notify must not pass for a clean close, nor a forged fatal alert
/// for the peer's.
#[test]
fn test_plaintext_alert_after_handshake_rejected() {
    let (mut client, mut server) = established_pair();
    server.send_application_data(b"first half").unwrap();
    client.read_tls(&server.take_output()).unwrap();
    client.process().unwrap();
    assert_eq!(client.recv_application_data(), b"first half");

    let forged_close = encode_record(ContentType::Alert, ProtocolVersion::Tls12, &[1, 0]).unwrap();
    client.read_tls(&forged_close).unwrap();
    let err = client.process().unwrap_err();
    assert!(matches!(err, Error::UnexpectedMessage(_)), "{:?}", err);
    assert_ne!(err, Error::ConnectionClosed);

    let forged_fatal = encode_record(ContentType::Alert, ProtocolVersion::Tls12, &[2, 40]).unwrap();
    server.read_tls(&forged_fatal).unwrap();
    let err = server.process().unwrap_err();
    assert!(matches!(err, Error::UnexpectedMessage(_)), "{:?}", err);
    // Our own alert goes out encrypted.
    assert_eq!(server.take_output()[0], 23);
}
