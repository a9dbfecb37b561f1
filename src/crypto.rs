use crate::types::{Address, Hash, PublicKey, Signature};
use pqcrypto_dilithium::dilithium3 as dilithium;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey as PkTrait, SecretKey as SkTrait};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

pub const MLDSA65_PUBKEY_SIZE: usize = 1952;
pub const MLDSA65_SIG_SIZE: usize = 3293;

/// Domain prefix for signed-message digests, followed by the decimal message length
pub const SIGNED_MESSAGE_PREFIX: &str = "\x19Signed Message:\n";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid secret key")]
    InvalidSecretKey,
}

/// Which digest of the message a commitment was produced over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestFormat {
    Prefixed,
    Raw,
}

/// Signature envelope submitted by a client: the signer's key travels with the
/// signature so the engine can derive the signer address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub public_key: PublicKey,
    pub signature: Signature,
}

pub struct Keypair {
    pub public: PublicKey,
    secret: dilithium::SecretKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let (pk, sk) = dilithium::keypair();
        Self {
            public: pk.as_bytes().to_vec(),
            secret: sk,
        }
    }

    pub fn from_bytes(public: &[u8], secret: &[u8]) -> Result<Self, CryptoError> {
        dilithium::PublicKey::from_bytes(public).map_err(|_| CryptoError::InvalidPublicKey)?;
        let secret = dilithium::SecretKey::from_bytes(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { public: public.to_vec(), secret })
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = dilithium::detached_sign(message, &self.secret);
        sig.as_bytes().to_vec()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_bytes(&self) -> Vec<u8> {
        self.secret.as_bytes().to_vec()
    }

    pub fn address(&self) -> Address {
        address_of(&self.public)
    }

    /// Sign the prefixed digest of a text message (preferred client format)
    pub fn sign_message(&self, message: &str) -> Commitment {
        Commitment {
            public_key: self.public.clone(),
            signature: self.sign(&prefixed_digest(message)),
        }
    }

    /// Sign the raw digest of a text message (legacy client format)
    pub fn sign_raw_message(&self, message: &str) -> Commitment {
        Commitment {
            public_key: self.public.clone(),
            signature: self.sign(&raw_digest(message)),
        }
    }
}

pub fn verify(pubkey: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
    let pk = dilithium::PublicKey::from_bytes(pubkey).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = dilithium::DetachedSignature::from_bytes(signature).map_err(|_| CryptoError::InvalidSignature)?;
    dilithium::verify_detached_signature(&sig, message, &pk).map_err(|_| CryptoError::InvalidSignature)
}

pub fn sha3(data: &[u8]) -> Hash {
    Sha3_256::digest(data).into()
}

pub fn address_of(pubkey: &[u8]) -> Address {
    sha3(pubkey)
}

pub fn raw_digest(message: &str) -> Hash {
    sha3(message.as_bytes())
}

pub fn prefixed_digest(message: &str) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(SIGNED_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Derive the signer of `message`. The prefixed digest is tried first, then the raw one.
pub fn recover_signer(message: &str, commitment: &Commitment) -> Result<(Address, DigestFormat), CryptoError> {
    let candidates = [
        (prefixed_digest(message), DigestFormat::Prefixed),
        (raw_digest(message), DigestFormat::Raw),
    ];

    for (digest, format) in candidates {
        match verify(&commitment.public_key, &digest, &commitment.signature) {
            Ok(()) => return Ok((address_of(&commitment.public_key), format)),
            Err(CryptoError::InvalidPublicKey) => return Err(CryptoError::InvalidPublicKey),
            Err(_) => continue,
        }
    }

    Err(CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_differs_from_raw() {
        assert_ne!(prefixed_digest("hello"), raw_digest("hello"));
    }

    #[test]
    fn test_recover_both_formats() {
        let kp = Keypair::generate();
        let msg = "Apply variant roll: 0x00 with nonce: 0";

        let (addr, format) = recover_signer(msg, &kp.sign_message(msg)).unwrap();
        assert_eq!(addr, kp.address());
        assert_eq!(format, DigestFormat::Prefixed);

        let (addr, format) = recover_signer(msg, &kp.sign_raw_message(msg)).unwrap();
        assert_eq!(addr, kp.address());
        assert_eq!(format, DigestFormat::Raw);
    }

    #[test]
    fn test_recover_rejects_other_message() {
        let kp = Keypair::generate();
        let commitment = kp.sign_message("first");
        assert!(recover_signer("second", &commitment).is_err());
    }

    #[test]
    fn test_recover_rejects_garbage_key() {
        let kp = Keypair::generate();
        let mut commitment = kp.sign_message("m");
        commitment.public_key = vec![1, 2, 3];
        assert!(matches!(recover_signer("m", &commitment), Err(CryptoError::InvalidPublicKey)));
    }

    #[test]
    fn test_keypair_roundtrip_bytes() {
        let kp = Keypair::generate();
        let restored = Keypair::from_bytes(&kp.public, &kp.secret_bytes()).unwrap();
        assert_eq!(restored.address(), kp.address());
        let sig = restored.sign(b"x");
        assert!(verify(&kp.public, b"x", &sig).is_ok());
    }
}
