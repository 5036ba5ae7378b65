//! Zeroization validation tests
//!
//! Verifies that session key material is wiped rather than left in memory.

use ensayo_common::{EncryptedPayload, Error};
use ensayo_crypto::{derive_shared_key, EphemeralKeypair, SecureChannel, SessionKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

fn is_zeroed(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

fn assert_zeroize_on_drop<T: ZeroizeOnDrop>() {}

fn channel_pair() -> (SecureChannel, SecureChannel) {
    let a = EphemeralKeypair::generate();
    let b = EphemeralKeypair::generate();
    let (a_pub, b_pub) = (a.public(), b.public());
    let left = SecureChannel::establish(a, b_pub, "session", "tdea-bridge").unwrap();
    let right = SecureChannel::establish(b, a_pub, "session", "tdea-bridge").unwrap();
    (left, right)
}

#[test]
fn test_session_key_zeroize() {
    let mut key = SessionKey::from_bytes([42u8; 32]);
    assert!(!is_zeroed(key.as_bytes()));
    assert!(!key.is_zeroed());

    key.zeroize();
    assert!(is_zeroed(key.as_bytes()));
    assert!(key.is_zeroed());
}

#[test]
fn test_derived_key_zeroize() {
    let a = EphemeralKeypair::generate();
    let b = EphemeralKeypair::generate();
    let b_pub = b.public();

    let mut key = derive_shared_key(a, &b_pub, "session", "tdea-bridge").unwrap();
    assert!(!is_zeroed(key.as_bytes()));

    key.zeroize();
    assert!(is_zeroed(key.as_bytes()));
}

#[test]
fn test_key_holders_wipe_on_drop() {
    assert_zeroize_on_drop::<SessionKey>();
    assert_zeroize_on_drop::<SecureChannel>();
}

#[test]
fn test_channel_zeroize_wipes_key() {
    let (mut left, mut right) = channel_pair();
    let sealed: EncryptedPayload = left.seal(&"before").unwrap();
    assert_eq!(right.open::<String>(&sealed).unwrap(), "before");

    right.zeroize();
    assert!(right.is_wiped());
    assert!(!left.is_wiped());

    let sealed = left.seal(&"after").unwrap();
    assert_eq!(right.open::<String>(&sealed), Err(Error::PeerDisconnected));
    assert_eq!(right.seal(&"reply").map(|_| ()), Err(Error::PeerDisconnected));
}
