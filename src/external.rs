//! External collaborators
//!
//! | Collaborator      | Consulted for                                         | Failure    |
//! |-------------------|-------------------------------------------------------|------------|
//! | TokenRegistry     | coupon ownership, lock state, variant binding         | fatal      |
//! | TokenRegistry     | coupon reset on expiry                                | advisory   |
//! | PaymentProcessor  | settlement of rolls, rerolls, assignments             | fatal      |
//! | PaymentProcessor  | refund while unwinding a failed assignment            | advisory   |
//! | EligibilityOracle | rolling / assignment windows per tier                 | fatal      |
//!
//! Calls are synchronous and run inside the engine's critical section. Implementations
//! must not call back into the engine.

use crate::error::IntegrationError;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a coupon token may back a new roll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponEligibility {
    /// Token carries no variant yet
    Unassigned,
    /// Token carries a variant but its holder unlocked it for re-rolling
    RollingUnlocked,
    Locked,
}

impl CouponEligibility {
    pub fn may_roll(&self) -> bool {
        !matches!(self, CouponEligibility::Locked)
    }
}

/// Registry's answer to a bind request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub token_ref: TokenId,
    /// Variant the registry actually recorded
    pub variant: Variant,
}

pub trait TokenRegistry: Send + Sync {
    fn owner_of(&self, coupon: CouponRef) -> Result<Address, IntegrationError>;

    fn eligibility(&self, coupon: CouponRef) -> Result<CouponEligibility, IntegrationError>;

    fn bind_variant(&self, coupon: CouponRef, key: TierKey, variant: Variant) -> Result<Binding, IntegrationError>;

    /// Return an expired, unconfirmed coupon to its pre-roll state
    fn reset_coupon(&self, coupon: CouponRef) -> Result<(), IntegrationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargeKind {
    Roll,
    Reroll,
    Assign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub amount: u64,
    pub beneficiary: Address,
}

impl Settlement {
    pub fn free() -> Self {
        Self { amount: 0, beneficiary: [0u8; 32] }
    }
}

pub trait PaymentProcessor: Send + Sync {
    fn charge(&self, payer: &Address, key: TierKey, kind: ChargeKind) -> Result<Settlement, IntegrationError>;

    fn refund(&self, payer: &Address, settlement: &Settlement) -> Result<(), IntegrationError>;
}

pub trait EligibilityOracle: Send + Sync {
    fn rolling_active(&self, key: TierKey) -> Result<bool, IntegrationError>;

    fn assignment_active(&self, key: TierKey) -> Result<bool, IntegrationError>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn TokenRegistry>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub oracle: Arc<dyn EligibilityOracle>,
}

impl Collaborators {
    pub fn new(
        registry: Arc<dyn TokenRegistry>,
        payments: Arc<dyn PaymentProcessor>,
        oracle: Arc<dyn EligibilityOracle>,
    ) -> Self {
        Self { registry, payments, oracle }
    }
}

// =============================================================================
// IN-MEMORY COLLABORATORS
// =============================================================================

/// Process-local collaborators for the demo binary and tests
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[derive(Default)]
    struct RegistryState {
        owners: HashMap<CouponRef, Address>,
        locked: HashSet<CouponRef>,
        bindings: HashMap<CouponRef, (TierKey, Variant)>,
        resets: Vec<CouponRef>,
        /// Registry records this variant instead of the requested one
        substitute: Option<Variant>,
        fail_bind: bool,
        fail_reset: bool,
    }

    #[derive(Default)]
    pub struct MemoryRegistry {
        state: Mutex<RegistryState>,
    }

    impl MemoryRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn mint(&self, coupon: CouponRef, owner: Address) {
            lock(&self.state).owners.insert(coupon, owner);
        }

        pub fn set_locked(&self, coupon: CouponRef, locked: bool) {
            let mut state = lock(&self.state);
            if locked {
                state.locked.insert(coupon);
            } else {
                state.locked.remove(&coupon);
            }
        }

        pub fn binding(&self, coupon: CouponRef) -> Option<(TierKey, Variant)> {
            lock(&self.state).bindings.get(&coupon).copied()
        }

        pub fn resets(&self) -> Vec<CouponRef> {
            lock(&self.state).resets.clone()
        }

        pub fn substitute_variant(&self, variant: Option<Variant>) {
            lock(&self.state).substitute = variant;
        }

        pub fn fail_bind(&self, fail: bool) {
            lock(&self.state).fail_bind = fail;
        }

        pub fn fail_reset(&self, fail: bool) {
            lock(&self.state).fail_reset = fail;
        }
    }

    impl TokenRegistry for MemoryRegistry {
        fn owner_of(&self, coupon: CouponRef) -> Result<Address, IntegrationError> {
            lock(&self.state)
                .owners
                .get(&coupon)
                .copied()
                .ok_or_else(|| IntegrationError::Rejected(format!("{} not minted", coupon)))
        }

        fn eligibility(&self, coupon: CouponRef) -> Result<CouponEligibility, IntegrationError> {
            let state = lock(&self.state);
            if !state.owners.contains_key(&coupon) {
                return Err(IntegrationError::Rejected(format!("{} not minted", coupon)));
            }
            Ok(if state.locked.contains(&coupon) {
                CouponEligibility::Locked
            } else if state.bindings.contains_key(&coupon) {
                CouponEligibility::RollingUnlocked
            } else {
                CouponEligibility::Unassigned
            })
        }

        fn bind_variant(&self, coupon: CouponRef, key: TierKey, variant: Variant) -> Result<Binding, IntegrationError> {
            let mut state = lock(&self.state);
            if state.fail_bind {
                return Err(IntegrationError::Unavailable("registry offline".into()));
            }
            let recorded = state.substitute.unwrap_or(variant);
            state.bindings.insert(coupon, (key, recorded));
            Ok(Binding { token_ref: coupon.token_id, variant: recorded })
        }

        fn reset_coupon(&self, coupon: CouponRef) -> Result<(), IntegrationError> {
            let mut state = lock(&self.state);
            if state.fail_reset {
                return Err(IntegrationError::Unavailable("reset hook offline".into()));
            }
            state.resets.push(coupon);
            Ok(())
        }
    }

    #[derive(Default)]
    struct PaymentState {
        prices: HashMap<ChargeKind, u64>,
        charges: Vec<(Address, ChargeKind, u64)>,
        refunds: Vec<(Address, u64)>,
        fail: bool,
    }

    /// Flat price per charge kind; unpriced kinds settle for free
    #[derive(Default)]
    pub struct MemoryPayments {
        beneficiary: Address,
        state: Mutex<PaymentState>,
    }

    impl MemoryPayments {
        pub fn new(beneficiary: Address) -> Self {
            Self { beneficiary, state: Mutex::default() }
        }

        pub fn set_price(&self, kind: ChargeKind, amount: u64) {
            lock(&self.state).prices.insert(kind, amount);
        }

        pub fn fail(&self, fail: bool) {
            lock(&self.state).fail = fail;
        }

        pub fn charges(&self) -> Vec<(Address, ChargeKind, u64)> {
            lock(&self.state).charges.clone()
        }

        pub fn refunds(&self) -> Vec<(Address, u64)> {
            lock(&self.state).refunds.clone()
        }
    }

    impl PaymentProcessor for MemoryPayments {
        fn charge(&self, payer: &Address, _key: TierKey, kind: ChargeKind) -> Result<Settlement, IntegrationError> {
            let mut state = lock(&self.state);
            if state.fail {
                return Err(IntegrationError::Rejected("insufficient funds".into()));
            }
            let amount = state.prices.get(&kind).copied().unwrap_or(0);
            state.charges.push((*payer, kind, amount));
            Ok(Settlement { amount, beneficiary: self.beneficiary })
        }

        fn refund(&self, payer: &Address, settlement: &Settlement) -> Result<(), IntegrationError> {
            lock(&self.state).refunds.push((*payer, settlement.amount));
            Ok(())
        }
    }

    /// Oracle with two global switches
    pub struct SwitchOracle {
        rolling: AtomicBool,
        assignment: AtomicBool,
    }

    impl Default for SwitchOracle {
        fn default() -> Self {
            Self { rolling: AtomicBool::new(true), assignment: AtomicBool::new(true) }
        }
    }

    impl SwitchOracle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_rolling(&self, active: bool) {
            self.rolling.store(active, Ordering::SeqCst);
        }

        pub fn set_assignment(&self, active: bool) {
            self.assignment.store(active, Ordering::SeqCst);
        }
    }

    impl EligibilityOracle for SwitchOracle {
        fn rolling_active(&self, _key: TierKey) -> Result<bool, IntegrationError> {
            Ok(self.rolling.load(Ordering::SeqCst))
        }

        fn assignment_active(&self, _key: TierKey) -> Result<bool, IntegrationError> {
            Ok(self.assignment.load(Ordering::SeqCst))
        }
    }
}
