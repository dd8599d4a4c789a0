#![no_main]

//! Fuzz target for datagram handling.
//!
//! Feeds arbitrary bytes to the engine, both as a raw datagram and split
//! into handshake records, looking for panics in record framing, fragment
//! parsing and reassembly.
//!
//! DTLS 1.2 record format:
//! - ContentType: 1 byte
//! - ProtocolVersion: 2 bytes (0xFEFD for DTLS 1.2, 0xFEFF for DTLS 1.0)
//! - Epoch: 2 bytes
//! - Sequence Number: 6 bytes (u48)
//! - Length: 2 bytes
//! - Fragment: variable

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

use dtls_reassembly::{Config, NullCipher, ReassemblyEngine, Transcript};

/// DTLS record header length
const DTLS_HEADER_LEN: usize = 13;
/// Handshake bytes per constructed record
const CHUNK: usize = 97;

fuzz_target!(|data: &[u8]| {
    let config = Arc::new(Config::default());

    // Raw datagram. Errors are fine, we're looking for panics.
    {
        let mut engine = ReassemblyEngine::new(Arc::clone(&config), Transcript::new());
        let _ = engine.submit_packet(data);
        let _ = engine.change_read_cipher(Box::new(NullCipher));
        let _ = engine.take_ready_unit();
    }

    // Treat the input as a stream of handshake fragments, carried in
    // records with reversed sequence numbers.
    {
        let mut engine = ReassemblyEngine::new(config, Transcript::new());
        engine.expect_finish_flight();

        let chunks: Vec<&[u8]> = data.chunks(CHUNK).collect();
        for (i, chunk) in chunks.iter().enumerate().rev() {
            let mut record = Vec::with_capacity(DTLS_HEADER_LEN + chunk.len());
            record.push(22u8); // ContentType::Handshake
            record.extend_from_slice(&[0xFE, 0xFD]); // DTLS 1.2 version
            record.extend_from_slice(&[0, 0]); // epoch 0
            record.extend_from_slice(&(i as u64).to_be_bytes()[2..]);
            record.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            record.extend_from_slice(chunk);

            if engine.submit_packet(&record).is_err() {
                return;
            }
        }
    }
});
