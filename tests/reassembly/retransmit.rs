//! Flight retransmission detection.

use dtls_reassembly::{ContentType, HandshakeType, NullCipher, Output, Sequence};

use crate::common::*;

#[test]
fn retransmitted_flight_is_signalled_once() {
    let flight = server_flight(0);
    let mut peer = Peer::new();
    let mut client = engine();

    let out = submit_all(&mut client, &peer.handshake(&flight, 500));
    assert_eq!(handshakes(&out), expected_handshakes(&flight));

    let transcript = client.transcript().as_bytes().to_vec();

    for round in 0..3 {
        // Same messages, fresh record sequence numbers
        let resend = shuffled(&peer.handshake(&flight, 500), round);
        let out = submit_all(&mut client, &resend);

        assert!(
            matches!(out[..], [Output::FlightRetransmitted]),
            "round {}: {:?}",
            round,
            out
        );
        assert_eq!(client.transcript().as_bytes(), &transcript[..]);
        assert_eq!(client.next_message_seq(), Some(4));
        assert_eq!(client.buffered_len(), 0);
    }
}

#[test]
fn replayed_records_are_not_a_retransmission() {
    let flight = server_flight(0);
    let mut peer = Peer::new();
    let mut client = engine();

    let records = peer.handshake(&flight, 500);
    submit_all(&mut client, &records);

    let out = submit_all(&mut client, &records);
    assert!(out.is_empty());
    assert_eq!(client.transcript().message_count(), 4);
}

#[test]
fn retransmitted_client_hello() {
    let mut server = engine();
    let mut peer = Peer::new();
    let hello = Msg::new(HandshakeType::ClientHello, 0, 120);

    let out = submit_all(&mut server, &peer.handshake(std::slice::from_ref(&hello), 500));
    assert_eq!(handshakes(&out), expected_handshakes(std::slice::from_ref(&hello)));

    let out = submit_all(&mut server, &peer.handshake(std::slice::from_ref(&hello), 500));
    assert_eq!(count_retransmitted(&out), 1);
    assert_eq!(out.len(), 1);

    // The client moves on with a cookie
    let with_cookie = Msg::new(HandshakeType::ClientHello, 1, 140);
    let out = submit_all(&mut server, &peer.handshake(std::slice::from_ref(&with_cookie), 500));
    assert_eq!(handshakes(&out), expected_handshakes(&[with_cookie]));
    assert_eq!(server.transcript().message_count(), 2);
}

#[test]
fn final_flight_after_retransmission() {
    let flight = server_flight(0);
    let finished = Msg::new(HandshakeType::Finished, 4, 12);
    let mut peer = Peer::new();
    let mut client = engine();

    submit_all(&mut client, &peer.handshake(&flight, 500));
    client.expect_finish_flight();

    let out = submit_all(&mut client, &peer.handshake(&flight, 500));
    assert_eq!(count_retransmitted(&out), 1);

    let mut records = vec![peer.change_cipher_spec()];
    records.extend(peer.handshake(std::slice::from_ref(&finished), 100));
    let out = submit_all(&mut client, &records);
    assert!(matches!(out[..], [Output::ChangeCipherSpec { .. }]));

    client.change_read_cipher(Box::new(NullCipher)).unwrap();
    let out = drain(&mut client);
    assert_eq!(handshakes(&out), expected_handshakes(&[finished]));
    assert_eq!(client.transcript().message_count(), 5);
}

#[test]
fn partial_retransmission_is_evicted_by_next_flight() {
    let flight = server_flight(0);
    let finished = Msg::new(HandshakeType::Finished, 4, 12);
    let mut peer = Peer::new();
    let mut client = engine();

    submit_all(&mut client, &peer.handshake(&flight, 500));
    client.expect_finish_flight();

    // Only ServerHello and Certificate of the resend make it
    let partial = peer.handshake(&flight[..2], 500);
    assert!(submit_all(&mut client, &partial).is_empty());
    assert_eq!(client.buffered_len(), partial.len());

    let ccs = peer.change_cipher_spec();
    assert!(submit_all(&mut client, &[ccs]).is_empty());

    let fin = record(
        ContentType::Handshake,
        Sequence::new(1),
        &finished.whole(),
    );
    let out = submit_all(&mut client, &[fin]);
    assert!(matches!(out[..], [Output::ChangeCipherSpec { .. }]));
    assert_eq!(client.buffered_len(), 1);

    client.change_read_cipher(Box::new(NullCipher)).unwrap();
    let out = drain(&mut client);
    assert_eq!(handshakes(&out), expected_handshakes(&[finished]));
    assert_eq!(count_retransmitted(&out), 0);
}
