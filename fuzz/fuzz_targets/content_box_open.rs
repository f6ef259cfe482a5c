//! Fuzz target for opening sealed payloads
//!
//! # Strategy
//!
//! - Arbitrary sealed bytes under an arbitrary key and header
//! - Valid seal followed by a single-byte mutation
//!
//! # Invariants
//!
//! - NEVER panic, whatever the input length
//! - Input shorter than nonce + tag is `Truncated`
//! - A mutated seal never opens

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use peerseal_crypto::{BoxError, BoxNonce, ContentKey, SEALED_OVERHEAD, open, seal};

#[derive(Debug, Arbitrary)]
enum OpenInput {
    Raw { key_byte: u8, header: [u8; 4], sealed: Vec<u8> },
    Mutated { key_byte: u8, plaintext: Vec<u8>, position: u16, flip: u8 },
}

fuzz_target!(|input: OpenInput| {
    match input {
        OpenInput::Raw { key_byte, header, sealed } => {
            let key = ContentKey::generate(|buf| buf.fill(key_byte));
            let result = open(&header, &sealed, &key);
            if sealed.len() < SEALED_OVERHEAD {
                assert!(matches!(result, Err(BoxError::Truncated { .. })));
            }
        }

        OpenInput::Mutated { key_byte, plaintext, position, flip } => {
            if flip == 0 {
                return;
            }
            let key = ContentKey::generate(|buf| buf.fill(key_byte));
            let nonce = BoxNonce::generate(|buf| buf.fill(key_byte.wrapping_add(1)));
            let Ok(mut sealed) = seal(b"fuzz", &plaintext, &nonce, &key) else {
                return;
            };

            let at = position as usize % sealed.len();
            sealed[at] ^= flip;
            assert_eq!(open(b"fuzz", &sealed, &key), Err(BoxError::IntegrityFailed));
        }
    }
});
