//! Allocation store: every table the engine owns
//!
//! | Table          | Key                       | Value                      |
//! |----------------|---------------------------|----------------------------|
//! | tiers          | (pool, tier)              | default variant + slots    |
//! | rolls          | roll hash                 | VariantRoll                |
//! | consumed       | roll hash                 | (set)                      |
//! | nonces         | user address              | u64 counter                |
//! | coupons        | (coupon pool, token)      | CouponState                |
//! | coupon_rolls   | (coupon pool, token)      | open roll hashes           |
//! | repairs        | -                         | counter repair audit log   |
//!
//! Components receive the store by reference; the engine owns the only instance.

use crate::config::PoolConfig;
use crate::error::AllocError;
use crate::ledger::SlotLedger;
use crate::nonce::NonceRegistry;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantTable {
    pub default_variant: Option<Variant>,
    pub variants: BTreeMap<Variant, SlotLedger>,
}

impl VariantTable {
    /// Explicit default, else the only configured variant
    pub fn fallback_variant(&self) -> Option<Variant> {
        self.default_variant.or_else(|| {
            if self.variants.len() == 1 {
                self.variants.keys().next().copied()
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationStore {
    pub(crate) tiers: BTreeMap<TierKey, VariantTable>,
    pub(crate) rolls: HashMap<Hash, VariantRoll>,
    pub(crate) consumed: HashSet<Hash>,
    pub(crate) nonces: NonceRegistry,
    pub(crate) coupons: HashMap<CouponRef, CouponState>,
    pub(crate) coupon_rolls: HashMap<CouponRef, BTreeSet<Hash>>,
    pub(crate) repairs: Vec<CounterRepair>,
    /// Rolls processed; drives the opportunistic sweep cadence
    pub(crate) roll_ops: u64,
}

impl AllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply pool configuration on top of existing state
    pub fn apply_pools(&mut self, pools: &[PoolConfig]) -> Result<(), AllocError> {
        for pool in pools {
            let key = pool.key();
            for v in &pool.variants {
                self.configure_variant(key.slot(v.variant), v.max_supply, v.active)?;
            }
            if let Some(default) = pool.default_variant {
                self.set_default_variant(key, default)?;
            }
        }
        Ok(())
    }

    pub fn tier(&self, key: TierKey) -> Option<&VariantTable> {
        self.tiers.get(&key)
    }

    pub fn get_roll(&self, roll_hash: &Hash) -> Option<&VariantRoll> {
        self.rolls.get(roll_hash)
    }

    pub fn is_consumed(&self, roll_hash: &Hash) -> bool {
        self.consumed.contains(roll_hash)
    }

    pub fn nonces(&self) -> &NonceRegistry {
        &self.nonces
    }

    pub fn coupon_state(&self, coupon: CouponRef) -> CouponState {
        self.coupons.get(&coupon).copied().unwrap_or_default()
    }

    pub fn repairs(&self) -> &[CounterRepair] {
        &self.repairs
    }

    pub fn roll_count(&self) -> usize {
        self.rolls.len()
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed.len()
    }

    pub(crate) fn track_roll(&mut self, coupon: CouponRef, roll_hash: Hash) {
        self.coupon_rolls.entry(coupon).or_default().insert(roll_hash);
    }

    pub(crate) fn untrack_roll(&mut self, coupon: CouponRef, roll_hash: &Hash) {
        if let Some(set) = self.coupon_rolls.get_mut(&coupon) {
            set.remove(roll_hash);
            if set.is_empty() {
                self.coupon_rolls.remove(&coupon);
            }
        }
    }

    /// Open (existing, unexpired) rolls backed by `coupon`; stale entries are pruned
    pub(crate) fn open_coupon_rolls(&mut self, coupon: CouponRef, now: u64) -> usize {
        let Some(set) = self.coupon_rolls.get_mut(&coupon) else {
            return 0;
        };
        let rolls = &self.rolls;
        set.retain(|hash| rolls.get(hash).is_some_and(|r| !r.is_expired(now)));
        let open = set.len();
        if open == 0 {
            self.coupon_rolls.remove(&coupon);
        }
        open
    }

    /// Remove a roll and its coupon tracking entry
    pub(crate) fn retire_roll(&mut self, roll_hash: &Hash) -> Option<VariantRoll> {
        let roll = self.rolls.remove(roll_hash)?;
        self.untrack_roll(roll.coupon(), roll_hash);
        Some(roll)
    }
}
