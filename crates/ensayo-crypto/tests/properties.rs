//! Property-based tests for the envelope codec and replay guard.
//!
//! Uses proptest to verify invariants across large input spaces.

use ensayo_common::Error;
use ensayo_crypto::envelope::{decrypt, encrypt};
use ensayo_crypto::{Direction, PublicKey, ReplayGuard, SessionKey};
use proptest::prelude::*;
use std::collections::HashSet;

fn public_key() -> impl Strategy<Value = PublicKey> {
    any::<[u8; 32]>()
        .prop_filter("non-zero key", |b| b.iter().any(|x| *x != 0))
        .prop_map(|b| PublicKey::import(&b).unwrap())
}

fn session_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9-]{1,40}"
}

proptest! {
    /// decrypt(encrypt(p)) == p for every valid context.
    #[test]
    fn envelope_roundtrip(
        key_bytes in any::<[u8; 32]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..1024),
        session in session_id(),
        sender in public_key(),
        counter in 1u64..,
    ) {
        let key = SessionKey::from_bytes(key_bytes);
        let env = encrypt(&key, &plaintext, &session, &sender, counter).unwrap();
        let decrypted = decrypt(&key, &env, &session, &sender).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    /// Same key, different session id: authentication must fail.
    #[test]
    fn envelope_bound_to_session(
        key_bytes in any::<[u8; 32]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        session_a in session_id(),
        session_b in session_id(),
        sender in public_key(),
        counter in 1u64..,
    ) {
        prop_assume!(session_a != session_b);
        let key = SessionKey::from_bytes(key_bytes);
        let env = encrypt(&key, &plaintext, &session_a, &sender, counter).unwrap();
        let result = decrypt(&key, &env, &session_b, &sender);
        prop_assert!(matches!(result, Err(Error::DecryptionFailed(_))));
    }

    /// Any single bit flip in the ciphertext is detected.
    #[test]
    fn envelope_detects_bit_flips(
        key_bytes in any::<[u8; 32]>(),
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        sender in public_key(),
        bit in any::<prop::sample::Index>(),
    ) {
        let key = SessionKey::from_bytes(key_bytes);
        let mut env = encrypt(&key, &plaintext, "session", &sender, 1).unwrap();
        let bit = bit.index(env.ciphertext.len() * 8);
        env.ciphertext[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(decrypt(&key, &env, "session", &sender).is_err());
    }

    /// After accepting N, every counter <= N is rejected and state stays at N.
    #[test]
    fn replay_guard_rejects_stale(
        accepted in 1u64..1_000_000,
        candidate in 0u64..1_000_000,
    ) {
        let mut guard = ReplayGuard::new();
        guard.check_and_advance(Direction::Inbound, accepted).unwrap();

        let result = guard.check_and_advance(Direction::Inbound, candidate);
        if candidate <= accepted {
            let is_replay = matches!(result, Err(Error::ReplayDetected { .. }));
            prop_assert!(is_replay);
            prop_assert_eq!(guard.last_accepted(Direction::Inbound), accepted);
        } else {
            prop_assert!(result.is_ok());
            prop_assert_eq!(guard.last_accepted(Direction::Inbound), candidate);
        }
    }

    /// Accepted counters form a strictly increasing sequence.
    #[test]
    fn replay_guard_accepts_strictly_increasing(
        counters in prop::collection::vec(any::<u64>(), 1..64),
    ) {
        let mut guard = ReplayGuard::new();
        let mut accepted = Vec::new();
        for c in counters {
            if guard.check_and_advance(Direction::Inbound, c).is_ok() {
                accepted.push(c);
            }
        }
        prop_assert!(accepted.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn nonces_unique_across_many_encryptions() {
    let key = SessionKey::from_bytes([7u8; 32]);
    let sender = PublicKey::import(&[3u8; 32]).unwrap();
    let mut seen = HashSet::new();

    for counter in 1..=10_000u64 {
        let env = encrypt(&key, &counter.to_le_bytes(), "session", &sender, counter).unwrap();
        assert!(seen.insert(env.nonce), "nonce reused at counter {}", counter);
    }
}
