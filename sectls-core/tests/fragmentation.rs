//! Handshake fragmentation and reassembly tests.
//!
//! Messages larger than the record size, byte-at-a-time delivery, size
//! limits and the ordering checks applied to each reassembled batch.

mod common;

use common::{client_builder, provider, server_builder, Identity};
use sectls_core::codec::{encode_handshake, fragment_message, HandshakeReassembler};
use sectls_core::protocol::HandshakeType;
use sectls_core::record::{encode_record, RecordReader};
use sectls_core::{ClientConnection, ContentType, Error, ProtocolVersion, ServerConnection};

fn long_alpn_list() -> Vec<Vec<u8>> {
    (0..8u8).map(|i| vec![b'a' + i; 200]).collect()
}

fn handshake_record_count(wire: &[u8]) -> usize {
    let mut reader = RecordReader::new();
    reader.feed(wire);
    let mut count = 0;
    while let Some(record) = reader.next_record().unwrap() {
        assert_eq!(record.content_type, ContentType::Handshake);
        count += 1;
    }
    count
}

/// Split, shuffle the split points, reassemble: same bytes out.
#[test]
fn test_reassembler_arbitrary_splits() {
    let body: Vec<u8> = (0..3000u32).map(|i| (i * 7) as u8).collect();
    let encoded = encode_handshake(HandshakeType::Certificate, &body).unwrap();

    for chunk in [1usize, 3, 4, 5, 511, 4096] {
        let mut reassembler = HandshakeReassembler::new(65536);
        for piece in encoded.chunks(chunk) {
            reassembler.feed(piece).unwrap();
        }
        let msg = reassembler.next_message().expect("complete message");
        assert_eq!(msg.handshake_type(), Some(HandshakeType::Certificate));
        assert_eq!(msg.encoded, encoded);
        assert!(reassembler.is_empty());
    }
}

/// Fragments carry the header only on the first piece.
#[test]
fn test_fragment_message_layout() {
    let body = vec![0xee; 1000];
    let fragments = fragment_message(HandshakeType::Certificate, &body, 512).unwrap();
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].len(), 512);
    assert_eq!(&fragments[0][..4], &[11, 0, 3, 232]);
    assert_eq!(fragments[1].len(), 1000 - 508);

    let mut reassembler = HandshakeReassembler::new(65536);
    reassembler.feed(&fragments[0]).unwrap();
    assert!(reassembler.has_partial());
    assert!(reassembler.next_message().is_none());
    reassembler.feed(&fragments[1]).unwrap();
    assert_eq!(reassembler.next_message().unwrap().body(), &body[..]);
}

/// Several messages in one record come out in order; an empty body is a
/// complete message on its own.
#[test]
fn test_coalesced_messages() {
    let mut payload = encode_handshake(HandshakeType::EncryptedExtensions, &[0, 0]).unwrap();
    payload.extend(encode_handshake(HandshakeType::EndOfEarlyData, &[]).unwrap());
    payload.extend(encode_handshake(HandshakeType::Finished, &[9; 32]).unwrap());

    let mut reassembler = HandshakeReassembler::new(65536);
    reassembler.feed(&payload).unwrap();
    let types: Vec<u8> = reassembler.ready_types().collect();
    assert_eq!(types, vec![8, 5, 20]);
}

/// The declared length is checked before any body bytes arrive.
#[test]
fn test_declared_size_limit() {
    let mut reassembler = HandshakeReassembler::new(1024);
    assert_eq!(
        reassembler.feed(&[11, 0, 0x10, 0]),
        Err(Error::HandshakeSizeError {
            declared: 4096,
            max: 1024
        })
    );
}

/// A full handshake with 512-byte records on both sides.
#[test]
fn test_handshake_with_small_records() {
    let identity = Identity::generate(&provider(1));
    let alpn = long_alpn_list();
    let alpn_refs: Vec<&[u8]> = alpn.iter().map(Vec::as_slice).collect();
    let server_config = server_builder(provider(1), &identity)
        .with_max_fragment_length(512)
        .with_alpn_protocols(&alpn_refs[7..])
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity)
        .with_max_fragment_length(512)
        .with_alpn_protocols(&alpn_refs)
        .build()
        .unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();

    let hello = client.take_output();
    // ClientHello is well over 512 bytes with that ALPN list.
    assert!(handshake_record_count(&hello) >= 3);

    server.read_tls(&hello).unwrap();
    server.process().unwrap();
    client.read_tls(&server.take_output()).unwrap();
    client.process().unwrap();
    server.read_tls(&client.take_output()).unwrap();
    server.process().unwrap();
    assert!(client.is_established());
    assert!(server.is_established());
    assert_eq!(client.alpn_protocol(), Some(alpn[7].as_slice()));
}

/// Every byte delivered separately still completes the handshake.
#[test]
fn test_byte_at_a_time_delivery() {
    let identity = Identity::generate(&provider(1));
    let server_config = server_builder(provider(1), &identity).build().unwrap();
    let client_config = client_builder(provider(2), &identity).build().unwrap();
    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();

    for _ in 0..4 {
        for byte in client.take_output() {
            server.read_tls(&[byte]).unwrap();
            server.process().unwrap();
        }
        for byte in server.take_output() {
            client.read_tls(&[byte]).unwrap();
            client.process().unwrap();
        }
    }
    assert!(client.is_established());
    assert!(server.is_established());
}

/// A ClientHello larger than the server's limit is a decode_error.
#[test]
fn test_oversized_client_hello() {
    let identity = Identity::generate(&provider(1));
    let alpn = long_alpn_list();
    let alpn_refs: Vec<&[u8]> = alpn.iter().map(Vec::as_slice).collect();
    let server_config = server_builder(provider(1), &identity)
        .with_max_handshake_message_size(1024)
        .build()
        .unwrap();
    let client_config = client_builder(provider(2), &identity)
        .with_alpn_protocols(&alpn_refs)
        .build()
        .unwrap();

    let mut client = ClientConnection::new(client_config).unwrap();
    let mut server = ServerConnection::new(server_config).unwrap();
    server.read_tls(&client.take_output()).unwrap();
    let err = server.process().unwrap_err();
    assert!(
        matches!(err, Error::HandshakeSizeError { max: 1024, .. }),
        "{:?}",
        err
    );
    assert_eq!(server.take_output(), vec![21, 3, 3, 0, 2, 2, 50]);
}

fn client_hello_payload() -> Vec<u8> {
    let identity = Identity::generate(&provider(1));
    let client_config = client_builder(provider(2), &identity).build().unwrap();
    let mut client = ClientConnection::new(client_config).unwrap();
    let wire = client.take_output();
    wire[5..].to_vec()
}

fn fresh_server() -> ServerConnection {
    let identity = Identity::generate(&provider(1));
    ServerConnection::new(server_builder(provider(1), &identity).build().unwrap()).unwrap()
}

/// Two ClientHellos in one record are rejected as a batch, before the first
/// one is answered.
#[test]
fn test_duplicate_in_one_record() {
    let hello = client_hello_payload();
    let mut payload = hello.clone();
    payload.extend_from_slice(&hello);

    let mut server = fresh_server();
    server
        .read_tls(&encode_record(ContentType::Handshake, ProtocolVersion::Tls10, &payload).unwrap())
        .unwrap();
    assert_eq!(server.process(), Err(Error::DuplicateMessage(1)));
    // Only the unexpected_message alert, no ServerHello.
    assert_eq!(server.take_output(), vec![21, 3, 3, 0, 2, 2, 10]);
}

/// A Finished before any ClientHello is out of order; a ServerHello sent to
/// a server is never valid.
#[test]
fn test_order_violations() {
    let mut server = fresh_server();
    let finished = encode_handshake(HandshakeType::Finished, &[0; 32]).unwrap();
    server
        .read_tls(&encode_record(ContentType::Handshake, ProtocolVersion::Tls12, &finished).unwrap())
        .unwrap();
    assert_eq!(server.process(), Err(Error::OutOfOrder(20)));

    let mut server = fresh_server();
    let hello = encode_handshake(HandshakeType::ServerHello, &[0; 40]).unwrap();
    server
        .read_tls(&encode_record(ContentType::Handshake, ProtocolVersion::Tls12, &hello).unwrap())
        .unwrap();
    assert_eq!(server.process(), Err(Error::SanityMessage(2)));
}

/// The start of the next message buffered behind the ClientHello would
/// straddle the switch to handshake keys.
#[test]
fn test_partial_message_across_key_change() {
    let mut payload = client_hello_payload();
    payload.extend_from_slice(&[20, 0, 0, 32, 1, 2]);

    let mut server = fresh_server();
    server
        .read_tls(&encode_record(ContentType::Handshake, ProtocolVersion::Tls10, &payload).unwrap())
        .unwrap();
    assert!(matches!(server.process(), Err(Error::BufferError(_))));
    assert!(server.is_closed());
}
