//! Commitment verifier
//!
//! A commitment is a signature over the canonical roll message:
//!
//! ```text
//! "Apply variant roll: 0x<hex roll hash> with nonce: <decimal nonce>"
//! ```
//!
//! Verification is split in two. `check` is pure: it rebuilds the message from the
//! roll's stored nonce, derives the signer, and compares signer and nonce. `commit`
//! advances the signer's nonce and is called only once every other fallible step of
//! the surrounding transition has succeeded.

use crate::crypto::{self, Commitment, DigestFormat};
use crate::error::AllocError;
use crate::nonce::NonceRegistry;
use crate::types::{Address, Hash, VariantRoll};
use tracing::debug;

/// Canonical message a user signs to confirm a roll
pub fn roll_message(roll_hash: &Hash, nonce: u64) -> String {
    format!("Apply variant roll: 0x{} with nonce: {}", hex::encode(roll_hash), nonce)
}

/// Proof that a commitment checked out; consumed by `commit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Verified {
    pub user: Address,
    pub nonce: u64,
    pub format: DigestFormat,
}

pub fn check(
    nonces: &NonceRegistry,
    user: &Address,
    roll_hash: &Hash,
    roll: &VariantRoll,
    commitment: &Commitment,
) -> Result<Verified, AllocError> {
    let message = roll_message(roll_hash, roll.nonce);

    let (signer, format) = crypto::recover_signer(&message, commitment).map_err(|e| {
        debug!("Commitment rejected for {}: {}", hex::encode(&roll_hash[..8]), e);
        AllocError::InvalidSignature
    })?;

    if &signer != user {
        return Err(AllocError::InvalidSignature);
    }

    let current = nonces.current(user);
    if roll.nonce != current {
        return Err(AllocError::StaleNonce { expected: current, found: roll.nonce });
    }

    Ok(Verified { user: signer, nonce: roll.nonce, format })
}

/// Advance the signer's nonce. Returns the new value.
pub fn commit(nonces: &mut NonceRegistry, verified: Verified) -> u64 {
    nonces.advance(&verified.user)
}
