//! Error taxonomy for the allocation engine

use crate::types::{Hash, PoolId, SlotKey, Tier, Variant};
use thiserror::Error;

/// Failure reported by an external collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Capacity,
    Lifecycle,
    Authorization,
    Quota,
    Eligibility,
    Integration,
    Admin,
}

#[derive(Error, Debug, Clone)]
pub enum AllocError {
    // Capacity
    #[error("capacity exhausted for {0}")]
    CapacityExhausted(SlotKey),
    #[error("no variants available in pool {pool_id}/tier {tier}")]
    InsufficientVariantsAvailable { pool_id: PoolId, tier: Tier },

    // Lifecycle
    #[error("roll not found: {}", hex::encode(.0))]
    RollNotFound(Hash),
    #[error("roll expired: {}", hex::encode(.0))]
    RollExpired(Hash),
    #[error("roll already assigned: {}", hex::encode(.0))]
    RollAlreadyAssigned(Hash),
    #[error("no active reservation for {}", hex::encode(.0))]
    ReservationNotFound(Hash),
    #[error("roll hash already reserved: {}", hex::encode(.0))]
    DuplicateRoll(Hash),
    #[error("unknown pool {pool_id}/tier {tier}")]
    UnknownTier { pool_id: PoolId, tier: Tier },
    #[error("unknown variant slot {0}")]
    UnknownVariant(SlotKey),
    #[error("roll {} belongs to a different pool or tier", hex::encode(.0))]
    PoolMismatch(Hash),

    // Authorization
    #[error("invalid signature")]
    InvalidSignature,
    #[error("stale nonce: roll bound to {found}, current is {expected}")]
    StaleNonce { expected: u64, found: u64 },
    #[error("reroll attempted by a non-owner")]
    InvalidRerollAttempt,
    #[error("caller does not own the roll")]
    NotRollOwner,
    #[error("caller does not own the coupon")]
    NotCouponOwner,
    #[error("coupon is assigned and not unlocked for rolling")]
    CouponLocked,

    // Quota
    #[error("maximum rerolls exceeded")]
    MaxRerollsExceeded,
    #[error("maximum active rolls for coupon exceeded")]
    MaxActiveRollsExceeded,
    #[error("rate limited, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    // Eligibility
    #[error("rolling inactive for pool {pool_id}/tier {tier}")]
    RollingInactive { pool_id: PoolId, tier: Tier },
    #[error("assignment inactive for pool {pool_id}/tier {tier}")]
    AssignmentInactive { pool_id: PoolId, tier: Tier },

    // Integration
    #[error("target collection error: requested variant {requested}, registry reported {reported:?}: {reason}")]
    TargetCollectionError {
        requested: Variant,
        reported: Option<Variant>,
        reason: String,
    },
    #[error("payment failed: {0}")]
    Payment(IntegrationError),
    #[error("collaborator failed: {0}")]
    Collaborator(IntegrationError),

    // Admin
    #[error("invalid counter for {slot}: {requested} exceeds max supply {max}")]
    InvalidCounter { slot: SlotKey, requested: u64, max: u64 },
}

impl AllocError {
    pub fn category(&self) -> ErrorCategory {
        use AllocError::*;
        match self {
            CapacityExhausted(_) | InsufficientVariantsAvailable { .. } => ErrorCategory::Capacity,
            RollNotFound(_)
            | RollExpired(_)
            | RollAlreadyAssigned(_)
            | ReservationNotFound(_)
            | DuplicateRoll(_)
            | UnknownTier { .. }
            | UnknownVariant(_)
            | PoolMismatch(_) => ErrorCategory::Lifecycle,
            InvalidSignature
            | StaleNonce { .. }
            | InvalidRerollAttempt
            | NotRollOwner
            | NotCouponOwner
            | CouponLocked => ErrorCategory::Authorization,
            MaxRerollsExceeded | MaxActiveRollsExceeded | RateLimited { .. } => ErrorCategory::Quota,
            RollingInactive { .. } | AssignmentInactive { .. } => ErrorCategory::Eligibility,
            TargetCollectionError { .. } | Payment(_) | Collaborator(_) => ErrorCategory::Integration,
            InvalidCounter { .. } => ErrorCategory::Admin,
        }
    }

    /// Caller may retry later or with different parameters
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Capacity | ErrorCategory::Quota | ErrorCategory::Integration
        )
    }
}
