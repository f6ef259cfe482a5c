//! Fuzz target for envelope decoding
//!
//! Envelopes arrive from remote peers; decoding is the first code that sees
//! attacker-controlled bytes.
//!
//! # Strategy
//!
//! - Random bytes: arbitrary CBOR input
//! - Structured: well-formed envelopes with arbitrary keys and payload
//! - Huge lengths: CBOR claiming massive byte strings and arrays
//! - Deep nesting: arrays nested inside the keys field
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A decoded envelope has a payload of at least the header size
//! - A decoded envelope never addresses one device twice
//! - Re-encoding a decoded envelope decodes to the same envelope

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use peerseal_core::{EncryptedBox, EncryptedBoxKey, HEADER_SIZE};

#[derive(Debug, Arbitrary)]
enum EnvelopeInput {
    RandomBytes { bytes: Vec<u8> },
    Structured { keys: Vec<(u32, u32, Vec<u8>)>, payload: Vec<u8> },
    HugeLength { claimed_len_exponent: u8 },
    DeeplyNested { depth: u8 },
}

fuzz_target!(|input: EnvelopeInput| {
    match input {
        EnvelopeInput::RandomBytes { bytes } => check(&bytes),

        EnvelopeInput::Structured { keys, payload } => {
            let keys: Vec<EncryptedBoxKey> = keys
                .into_iter()
                .map(|(uid, key_group_id, wrapped)| {
                    EncryptedBoxKey::new(uid, key_group_id, wrapped)
                })
                .collect();

            if let Ok(envelope) = EncryptedBox::from_parts(keys, payload) {
                let bytes = envelope.encode().expect("valid envelope must encode");
                let decoded = EncryptedBox::decode(&bytes).expect("encoded envelope must decode");
                assert_eq!(decoded, envelope);
            }
        }

        EnvelopeInput::HugeLength { claimed_len_exponent } => {
            let exponent = (claimed_len_exponent % 33) as u32;
            let claimed = if exponent < 32 { 1u32 << exponent } else { u32::MAX };

            // {"keys": [], "payload": bstr(claimed)}
            let mut bytes = vec![0xA2, 0x64];
            bytes.extend_from_slice(b"keys");
            bytes.push(0x80);
            bytes.push(0x67);
            bytes.extend_from_slice(b"payload");
            bytes.push(0x5A);
            bytes.extend_from_slice(&claimed.to_be_bytes());
            bytes.extend(vec![0xAA; (claimed as usize).min(16)]);
            check(&bytes);

            // {"keys": array(claimed)}
            let mut bytes = vec![0xA1, 0x64];
            bytes.extend_from_slice(b"keys");
            bytes.push(0x9A);
            bytes.extend_from_slice(&claimed.to_be_bytes());
            check(&bytes);
        }

        EnvelopeInput::DeeplyNested { depth } => {
            let mut bytes = vec![0xA1, 0x64];
            bytes.extend_from_slice(b"keys");
            for _ in 0..depth {
                bytes.push(0x81);
            }
            bytes.push(0x01);
            check(&bytes);
        }
    }
});

fn check(bytes: &[u8]) {
    let Ok(envelope) = EncryptedBox::decode(bytes) else {
        return;
    };

    assert!(envelope.payload().len() >= HEADER_SIZE);
    let devices: HashSet<(u32, u32)> =
        envelope.keys().iter().map(|k| (k.uid, k.key_group_id)).collect();
    assert_eq!(devices.len(), envelope.keys().len());
    let _ = envelope.sender_key_group_id();
    let _ = envelope.ciphertext();
}
