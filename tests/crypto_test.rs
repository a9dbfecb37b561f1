//! Unit tests for crypto module
//!
//! Tests ML-DSA-65 signing, SHA3-256 hashing and commitment signer recovery.

use variant_roll::crypto::{address_of, prefixed_digest, raw_digest, recover_signer};
use variant_roll::{DigestFormat, Keypair, roll_message, sha3, verify};

#[test]
fn test_sha3_deterministic() {
    let hash1 = sha3(b"test");
    let hash2 = sha3(b"test");
    assert_eq!(hash1, hash2);

    let hash3 = sha3(b"different");
    assert_ne!(hash1, hash3);
}

#[test]
fn test_sign_verify_wrong_message() {
    let kp = Keypair::generate();
    let sig = kp.sign(b"original message");

    // Verification with different message should fail
    assert!(verify(&kp.public, b"tampered message", &sig).is_err());
}

#[test]
fn test_sign_verify_wrong_key() {
    let kp1 = Keypair::generate();
    let kp2 = Keypair::generate();
    let sig = kp1.sign(b"test message");

    // Verification with different public key should fail
    assert!(verify(&kp2.public, b"test message", &sig).is_err());
}

#[test]
fn test_address_is_pubkey_hash() {
    let kp = Keypair::generate();
    assert_eq!(kp.address(), sha3(&kp.public));
    assert_eq!(kp.address(), address_of(&kp.public));
}

#[test]
fn test_prefixed_digest_binds_length() {
    assert_eq!(raw_digest("abc"), sha3(b"abc"));
    assert_ne!(prefixed_digest("abc"), raw_digest("abc"));

    let mut manual = b"\x19Signed Message:\n3".to_vec();
    manual.extend_from_slice(b"abc");
    assert_eq!(prefixed_digest("abc"), sha3(&manual));
}

#[test]
fn test_roll_commitment_recovery() {
    let kp = Keypair::generate();
    let message = roll_message(&[0x42; 32], 9);

    let (signer, format) = recover_signer(&message, &kp.sign_message(&message)).unwrap();
    assert_eq!((signer, format), (kp.address(), DigestFormat::Prefixed));

    let (signer, format) = recover_signer(&message, &kp.sign_raw_message(&message)).unwrap();
    assert_eq!((signer, format), (kp.address(), DigestFormat::Raw));

    // Nonce is part of the signed text
    let other = roll_message(&[0x42; 32], 10);
    assert!(recover_signer(&other, &kp.sign_message(&message)).is_err());
}

#[test]
fn test_swapped_public_key_rejected() {
    let signer = Keypair::generate();
    let impostor = Keypair::generate();
    let message = roll_message(&[1; 32], 0);

    let mut commitment = signer.sign_message(&message);
    commitment.public_key = impostor.public.clone();
    assert!(recover_signer(&message, &commitment).is_err());
}
