//! Malformed input, limits and less common handshake shapes.

use dtls_reassembly::{Config, ContentType, Error, HandshakeType, NullCipher, Output};
use dtls_reassembly::{ProtocolError, RecordHeader, Sequence};

use crate::common::*;

#[test]
fn malformed_records_do_not_spoil_the_datagram() {
    let mut server = engine();
    let hello = Msg::new(HandshakeType::ClientHello, 0, 60);

    let mut bad_version = record(ContentType::Handshake, Sequence::new(0), &hello.whole());
    bad_version[1] = 0x03;
    bad_version[2] = 0x03;

    let mut unknown_type = record(ContentType::Handshake, Sequence::with_number(0, 1), &[0; 4]);
    unknown_type[0] = 99;

    let good = record(ContentType::Handshake, Sequence::with_number(0, 2), &hello.whole());

    let mut packet = Vec::new();
    packet.extend_from_slice(&bad_version);
    packet.extend_from_slice(&unknown_type);
    packet.extend_from_slice(&good);
    // Header claiming more bytes than remain
    packet.extend_from_slice(&[22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 3, 0, 200, 1, 2]);

    let out = server.submit_packet(&packet).unwrap();
    assert_eq!(handshakes(&out), expected_handshakes(&[hello]));
    assert_eq!(server.next_expected(), Some(Sequence::with_number(0, 3)));
}

#[test]
fn oversized_record_is_skipped() {
    let mut server = engine();
    let hello = Msg::new(HandshakeType::ClientHello, 0, 60);

    let big = vec![0; RecordHeader::MAX_FRAGMENT_LEN + 1];
    let mut packet = record(ContentType::Handshake, Sequence::new(0), &big);
    packet.extend(record(
        ContentType::Handshake,
        Sequence::with_number(0, 1),
        &hello.whole(),
    ));

    let out = server.submit_packet(&packet).unwrap();
    assert_eq!(handshakes(&out), expected_handshakes(&[hello]));
}

#[test]
fn unknown_handshake_type_is_dropped() {
    let mut server = engine();

    let mut fragment = Msg::new(HandshakeType::ClientHello, 0, 10).whole();
    fragment[0] = 99;
    let rec = record(ContentType::Handshake, Sequence::new(0), &fragment);

    assert!(server.submit_record(&rec).unwrap().is_none());
    assert_eq!(server.buffered_len(), 0);
}

#[test]
fn records_of_other_epochs() {
    let mut engine = engine();
    engine.change_read_cipher(Box::new(NullCipher)).unwrap();
    assert_eq!(engine.read_epoch(), 1);

    let old = record(ContentType::ApplicationData, Sequence::new(0), b"old");
    assert!(engine.submit_record(&old).unwrap().is_none());

    // Two epochs ahead can't be the peer's next epoch
    let far = Msg::new(HandshakeType::Finished, 0, 12);
    let far = record(ContentType::Handshake, Sequence::new(3), &far.whole());
    assert!(engine.submit_record(&far).unwrap().is_none());
    assert_eq!(engine.buffered_len(), 0);

    let current = record(ContentType::ApplicationData, Sequence::new(1), b"new");
    assert!(matches!(
        engine.submit_record(&current).unwrap(),
        Some(Output::ApplicationData { data, .. }) if &*data == b"new"
    ));
}

#[test]
fn extreme_epochs_and_sequence_numbers() {
    let mut engine = engine();
    let max_seq = Sequence::MAX_SEQUENCE_NUMBER;

    for epoch in [2, 0x7fff, u16::MAX] {
        for content_type in [
            ContentType::Handshake,
            ContentType::ChangeCipherSpec,
            ContentType::ApplicationData,
            ContentType::Alert,
        ] {
            let rec = record(content_type, Sequence::with_number(epoch, max_seq), &[1]);
            assert!(engine.submit_record(&rec).unwrap().is_none());
        }
    }

    // Next epoch, but nothing to attach a ChangeCipherSpec to
    let ccs = record(ContentType::ChangeCipherSpec, Sequence::new(1), &[1]);
    assert!(engine.submit_record(&ccs).unwrap().is_none());
    assert_eq!(engine.buffered_len(), 0);
    assert_eq!(engine.next_expected(), None);

    let hello = Msg::new(HandshakeType::ClientHello, 0, 20);
    let rec = record(
        ContentType::Handshake,
        Sequence::with_number(0, max_seq),
        &hello.whole(),
    );
    let out = submit_all(&mut engine, &[rec]);
    assert_eq!(handshakes(&out), expected_handshakes(&[hello]));
    assert_eq!(
        engine.next_expected(),
        Some(Sequence::with_number(0, max_seq + 1))
    );
}

#[test]
fn buffer_limit() {
    let config = Config::builder().max_buffered_units(4).build().unwrap();
    let mut server = engine_with(config);
    let mut peer = Peer::new();

    let hello = Msg::new(HandshakeType::ClientHello, 0, 1000);
    let records = peer.handshake(std::slice::from_ref(&hello), 100);

    // Everything but the first fragment
    assert!(submit_all(&mut server, &records[1..]).is_empty());
    assert_eq!(server.buffered_len(), 4);
}

#[test]
fn fragments_far_ahead_are_not_buffered() {
    let mut server = engine();
    let junk = Msg::new(HandshakeType::CertificateRequest, 50, 1000);

    for n in 0..64 {
        let rec = record(
            ContentType::Handshake,
            Sequence::with_number(0, n),
            &junk.fragment(n as usize, 1),
        );
        assert!(server.submit_record(&rec).unwrap().is_none());
    }
    assert_eq!(server.buffered_len(), 0);

    let hello = Msg::new(HandshakeType::ClientHello, 0, 90);
    let rec = record(
        ContentType::Handshake,
        Sequence::with_number(0, 64),
        &hello.whole(),
    );
    let out = submit_all(&mut server, &[rec]);
    assert_eq!(handshakes(&out), expected_handshakes(&[hello]));
}

#[test]
fn full_buffer_still_takes_the_client_hello() {
    let mut server = engine();
    let capacity = server.config().max_buffered_units();
    let junk = Msg::new(HandshakeType::CertificateRequest, 3, 1000);

    for n in 0..capacity as u64 + 10 {
        let rec = record(
            ContentType::Handshake,
            Sequence::with_number(0, n),
            &junk.fragment(n as usize, 1),
        );
        assert!(server.submit_record(&rec).unwrap().is_none());
    }
    assert_eq!(server.buffered_len(), capacity);

    let hello = Msg::new(HandshakeType::ClientHello, 0, 90);
    let rec = record(
        ContentType::Handshake,
        Sequence::with_number(0, 1000),
        &hello.whole(),
    );
    let Some(Output::Handshake(msg)) = server.submit_record(&rec).unwrap() else {
        panic!("expected the ClientHello");
    };
    assert_eq!(msg.msg_type, HandshakeType::ClientHello);
    assert_eq!(msg.body(), &hello.body[..]);
    assert_eq!(server.buffered_len(), capacity - 1);
}

#[test]
fn message_sequence_rebinding_is_fatal() {
    let mut server = engine();
    let hello = Msg::new(HandshakeType::ClientHello, 0, 100);
    let other = Msg::new(HandshakeType::ClientHello, 1, 100);

    let first = record(ContentType::Handshake, Sequence::new(0), &hello.fragment(0, 50));
    assert!(server.submit_record(&first).unwrap().is_none());

    let second = record(
        ContentType::Handshake,
        Sequence::with_number(0, 1),
        &other.fragment(50, 50),
    );
    let err = server.submit_record(&second).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::AmbiguousMessageSequence {
            msg_type: HandshakeType::ClientHello,
            first: 0,
            second: 1,
        })
    ));
}

#[test]
fn abbreviated_handshake() {
    use HandshakeType::*;

    let mut client = engine();
    let mut peer = Peer::new();
    let hello = Msg::new(ServerHello, 0, 80);
    let finished = Msg::new(Finished, 1, 12);

    let mut records = peer.handshake(std::slice::from_ref(&hello), 500);
    // The ServerHello is held until the Finished shows this is a resumption
    assert!(submit_all(&mut client, &records).is_empty());

    records = vec![peer.change_cipher_spec()];
    records.extend(peer.handshake(std::slice::from_ref(&finished), 500));
    let out = submit_all(&mut client, &records);

    assert_eq!(out.len(), 2);
    assert_eq!(handshakes(&out), expected_handshakes(std::slice::from_ref(&hello)));
    assert!(matches!(out[1], Output::ChangeCipherSpec { .. }));

    client.change_read_cipher(Box::new(NullCipher)).unwrap();
    let out = drain(&mut client);
    assert_eq!(handshakes(&out), expected_handshakes(&[finished]));
    assert_eq!(client.transcript().message_count(), 2);
}

#[test]
fn client_certificate_flight_waits_for_certificate_verify() {
    use HandshakeType::*;

    let mut server = engine();
    let mut peer = Peer::new();
    submit_all(&mut server, &peer.handshake(&[Msg::new(ClientHello, 0, 90)], 500));

    let certificate = Msg::new(Certificate, 1, 600);
    let key_exchange = Msg::new(ClientKeyExchange, 2, 66);
    let verify = Msg::new(CertificateVerify, 3, 72);
    let finished = Msg::new(Finished, 4, 12);

    let mut records = peer.handshake(&[certificate.clone(), key_exchange.clone()], 500);
    let verify_records = peer.handshake(std::slice::from_ref(&verify), 500);
    records.push(peer.change_cipher_spec());
    records.extend(peer.handshake(std::slice::from_ref(&finished), 500));

    assert!(submit_all(&mut server, &records).is_empty());

    let out = submit_all(&mut server, &verify_records);
    assert_eq!(
        handshakes(&out),
        expected_handshakes(&[certificate, key_exchange, verify])
    );
    assert!(matches!(out.last(), Some(Output::ChangeCipherSpec { .. })));

    server.change_read_cipher(Box::new(NullCipher)).unwrap();
    assert_eq!(handshakes(&drain(&mut server)), expected_handshakes(&[finished]));
}

#[test]
fn empty_client_certificate_needs_no_verify() {
    use HandshakeType::*;

    let mut server = engine();
    let mut peer = Peer::new();
    submit_all(&mut server, &peer.handshake(&[Msg::new(ClientHello, 0, 90)], 500));

    let flight = [
        Msg::with_body(Certificate, 1, &[0, 0, 0]),
        Msg::new(ClientKeyExchange, 2, 66),
    ];
    let mut records = peer.handshake(&flight, 500);
    records.push(peer.change_cipher_spec());
    records.extend(peer.handshake(&[Msg::new(Finished, 3, 12)], 500));

    let out = submit_all(&mut server, &records);
    assert_eq!(handshakes(&out), expected_handshakes(&flight));
}

#[test]
fn application_data_ends_reassembly() {
    use HandshakeType::*;

    let mut server = engine();
    let mut peer = Peer::new();

    let mut records = peer.handshake(&[Msg::new(ClientHello, 0, 90)], 500);
    records.extend(peer.handshake(&[Msg::new(ClientKeyExchange, 1, 66)], 500));
    records.push(peer.change_cipher_spec());
    records.extend(peer.handshake(&[Msg::new(Finished, 2, 12)], 500));
    submit_all(&mut server, &records);

    server.change_read_cipher(Box::new(NullCipher)).unwrap();
    assert_eq!(handshakes(&drain(&mut server)).len(), 1);
    assert!(server.next_expected().is_some());

    let data = peer.record(ContentType::ApplicationData, b"ping");
    assert!(matches!(
        server.submit_record(&data).unwrap(),
        Some(Output::ApplicationData { .. })
    ));
    assert_eq!(server.next_expected(), None);
}

#[test]
fn client_hello_of_a_new_epoch_restarts_reassembly() {
    use HandshakeType::*;

    let mut server = engine();
    let mut peer = Peer::new();

    let mut records = peer.handshake(&[Msg::new(ClientHello, 0, 90)], 500);
    records.extend(peer.handshake(&[Msg::new(ClientKeyExchange, 1, 66)], 500));
    records.push(peer.change_cipher_spec());
    records.extend(peer.handshake(&[Msg::new(Finished, 2, 12)], 500));
    submit_all(&mut server, &records);
    server.change_read_cipher(Box::new(NullCipher)).unwrap();
    drain(&mut server);

    // Renegotiation starts over at message_seq 0
    let hello = Msg::new(ClientHello, 0, 100);
    let out = submit_all(&mut server, &peer.handshake(std::slice::from_ref(&hello), 500));
    assert_eq!(handshakes(&out), expected_handshakes(&[hello]));
    assert_eq!(server.next_expected(), Some(Sequence::with_number(1, 2)));
    assert_eq!(server.next_message_seq(), Some(1));
}

#[test]
fn finish_handshake_drops_buffered_units() {
    let mut server = engine();
    let hello = Msg::new(HandshakeType::ClientHello, 0, 100);
    let rec = record(ContentType::Handshake, Sequence::new(0), &hello.fragment(0, 10));

    submit_all(&mut server, &[rec]);
    assert_eq!(server.buffered_len(), 1);

    server.finish_handshake();
    assert_eq!(server.buffered_len(), 0);
    assert_eq!(server.next_expected(), None);
    assert!(server.take_ready_unit().unwrap().is_none());
}
