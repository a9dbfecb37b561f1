//! Core types: identifiers, slot keys, rolls, reservations, coupon counters

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// PRIMITIVES
// =============================================================================

pub type Hash = [u8; 32];
/// SHA3-256 of the signer's ML-DSA-65 public key
pub type Address = [u8; 32];
pub type PublicKey = Vec<u8>; // ML-DSA-65: 1952 bytes
pub type Signature = Vec<u8>; // ML-DSA-65: 3293 bytes

pub type PoolId = u64;
pub type Tier = u8;
pub type Variant = u8;
pub type TokenId = u64;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Reservation lifetime (10 minutes)
pub const DEFAULT_ROLL_TTL_SECS: u64 = 600;

/// Expired rolls survive this long before the sweeper reclaims them
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 300;

pub const DEFAULT_MAX_REROLLS: u8 = 3;
pub const DEFAULT_MAX_ROLLS_PER_COUPON: u32 = 1;
pub const DEFAULT_FREE_ROLLS_PER_COUPON: u32 = 1;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_SWEEP_BATCH: usize = 50;
pub const DEFAULT_SWEEP_EVERY_N_ROLLS: u64 = 10;
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

// =============================================================================
// KEYS
// =============================================================================

/// A (pool, tier) pair owning a variant capacity table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TierKey {
    pub pool_id: PoolId,
    pub tier: Tier,
}

impl TierKey {
    pub fn new(pool_id: PoolId, tier: Tier) -> Self {
        Self { pool_id, tier }
    }

    pub fn slot(&self, variant: Variant) -> SlotKey {
        SlotKey { pool_id: self.pool_id, tier: self.tier, variant }
    }
}

impl fmt::Display for TierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool {}/tier {}", self.pool_id, self.tier)
    }
}

/// Capacity slot: one variant of one tier of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub pool_id: PoolId,
    pub tier: Tier,
    pub variant: Variant,
}

impl SlotKey {
    pub fn new(pool_id: PoolId, tier: Tier, variant: Variant) -> Self {
        Self { pool_id, tier, variant }
    }

    pub fn tier_key(&self) -> TierKey {
        TierKey { pool_id: self.pool_id, tier: self.tier }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool {}/tier {}/variant {}", self.pool_id, self.tier, self.variant)
    }
}

/// External token used to gate and rate-limit rolling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CouponRef {
    pub pool_id: PoolId,
    pub token_id: TokenId,
}

impl CouponRef {
    pub fn new(pool_id: PoolId, token_id: TokenId) -> Self {
        Self { pool_id, token_id }
    }
}

impl fmt::Display for CouponRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coupon {}#{}", self.pool_id, self.token_id)
    }
}

// =============================================================================
// LEDGER RECORDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCapacity {
    pub max_supply: u64,
    pub permanent_count: u64,
    /// Inactive variants are skipped by selection; committed tokens are unaffected
    pub active: bool,
}

/// Read-only view returned by `capacity_of`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityView {
    pub max: u64,
    pub permanent: u64,
    /// Active reservations with `expires_at >= now`
    pub active_reservations: u64,
}

impl CapacityView {
    pub fn available(&self) -> u64 {
        self.max
            .saturating_sub(self.permanent)
            .saturating_sub(self.active_reservations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempReservation {
    pub roll_hash: Hash,
    pub expires_at: u64,
    pub active: bool,
}

impl TempReservation {
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at < now
    }
}

/// Provisional, time-bounded claim on one variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRoll {
    pub user: Address,
    pub variant: Variant,
    pub expires_at: u64,
    pub rerolls_used: u8,
    pub pool_id: PoolId,
    pub tier: Tier,
    pub coupon_pool_id: PoolId,
    pub coupon_token_id: TokenId,
    /// Nonce the commitment message is bound to
    pub nonce: u64,
    pub total_paid: u64,
}

impl VariantRoll {
    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.pool_id, self.tier, self.variant)
    }

    pub fn tier_key(&self) -> TierKey {
        TierKey::new(self.pool_id, self.tier)
    }

    pub fn coupon(&self) -> CouponRef {
        CouponRef::new(self.coupon_pool_id, self.coupon_token_id)
    }

    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Per-coupon usage counters (entitlement + rate limiting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponState {
    /// Rolls counted against the coupon's entitlement (decremented on expiry reset)
    pub used_rolls: u32,
    pub free_rolls_used: u32,
    /// Never decremented
    pub total_rolls_ever: u64,
    pub last_roll_time: u64,
    /// Coupon currently backs an open roll
    pub active: bool,
}

// =============================================================================
// OPERATION RESULTS
// =============================================================================

/// Returned by roll and reroll: everything the caller needs to sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollReceipt {
    pub roll_hash: Hash,
    pub message: String,
    pub variant: Variant,
    pub expires_at: u64,
    pub rerolls_remaining: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollStatus {
    pub valid: bool,
    pub variant: Variant,
    pub time_remaining: u64,
}

impl RollStatus {
    pub fn invalid() -> Self {
        Self { valid: false, variant: 0, time_remaining: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub token_ref: TokenId,
    pub variant: Variant,
    pub amount_paid: u64,
}

/// Audit record emitted by `fix_variant_counter`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRepair {
    pub slot: SlotKey,
    pub before: u64,
    pub after: u64,
    pub recorded_at: u64,
}
