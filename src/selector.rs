//! Variant selection: weighted-bucket draw over available variants
//!
//! ```text
//! weights  = [(v, avail(v)) for v in configured ascending if active ∧ avail(v) > 0]
//! target   = seed mod Σ weights
//! winner   = first v with cumulative weight > target
//! ```
//!
//! Probability is proportional to remaining supply, not uniform over variants.
//! The selector's choice is advisory; the ledger re-checks capacity at reserve time.

use crate::clock::EntropySource;
use crate::error::AllocError;
use crate::store::AllocationStore;
use crate::types::*;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// Which availability feeds the weight table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionBasis {
    /// `max - permanent`; in-flight reservations are ignored
    Permanent,
    /// `max - permanent - active reservations`
    #[default]
    Available,
}

/// Pick from `(variant, weight)` pairs; zero weights never win
pub fn weighted_pick(seed: u64, weights: &[(Variant, u64)]) -> Option<Variant> {
    // Saturating: an effectively unlimited supply must not overflow the table
    let total = weights.iter().fold(0u64, |acc, (_, w)| acc.saturating_add(*w));
    if total == 0 {
        return None;
    }

    let target = seed % total;

    let mut cumulative = 0u64;
    for (variant, weight) in weights {
        cumulative = cumulative.saturating_add(*weight);
        if cumulative > target {
            return Some(*variant);
        }
    }

    weights.last().map(|(v, _)| *v)
}

pub fn select(
    store: &AllocationStore,
    key: TierKey,
    seed: &Hash,
    basis: SelectionBasis,
    now: u64,
) -> Result<Variant, AllocError> {
    let table = store
        .tier(key)
        .ok_or(AllocError::UnknownTier { pool_id: key.pool_id, tier: key.tier })?;

    if table.variants.len() <= 1 {
        return table
            .fallback_variant()
            .filter(|v| table.variants.get(v).is_some_and(|ledger| ledger.capacity().active))
            .ok_or(AllocError::InsufficientVariantsAvailable {
                pool_id: key.pool_id,
                tier: key.tier,
            });
    }

    let weights: Vec<(Variant, u64)> = table
        .variants
        .iter()
        .filter(|(_, ledger)| ledger.capacity().active)
        .map(|(&variant, ledger)| {
            let available = match basis {
                SelectionBasis::Permanent => ledger.unreserved_supply(),
                SelectionBasis::Available => ledger.available(now),
            };
            (variant, available)
        })
        .filter(|(_, available)| *available > 0)
        .collect();

    let mut head = [0u8; 8];
    head.copy_from_slice(&seed[..8]);
    let draw = u64::from_le_bytes(head);
    weighted_pick(draw, &weights).ok_or(AllocError::InsufficientVariantsAvailable {
        pool_id: key.pool_id,
        tier: key.tier,
    })
}

/// Selection seed: fresh entropy mixed with caller and context
pub fn selection_seed(
    entropy: &dyn EntropySource,
    user: &Address,
    key: TierKey,
    nonce: u64,
    now: u64,
) -> Hash {
    let mut salt = [0u8; 32];
    entropy.fill(&mut salt);

    let mut hasher = Sha3_256::new();
    hasher.update(b"variant-select");
    hasher.update(salt);
    hasher.update(user);
    hasher.update(key.pool_id.to_le_bytes());
    hasher.update([key.tier]);
    hasher.update(nonce.to_le_bytes());
    hasher.update(now.to_le_bytes());
    hasher.finalize().into()
}
