//! Roll state machine
//!
//! ```text
//!   absent ──roll──▶ reserved ──reroll──▶ reserved ─ … ─┬─assign──▶ committed
//!                                                        └─expiry──▶ expired
//! ```
//!
//! A roll reserves one variant slot for `roll_ttl_secs`. A reroll abandons the current
//! roll, proven by a commitment over the abandoned roll's message, and reserves a fresh
//! variant under a new hash. Only one reservation per lineage is ever active.

use crate::crypto::Commitment;
use crate::engine::Ctx;
use crate::error::AllocError;
use crate::external::ChargeKind;
use crate::selector;
use crate::sweeper;
use crate::types::*;
use crate::verifier;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tracing::{debug, info};

/// Incoming roll; `previous` turns it into a reroll of that roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRequest {
    pub pool_id: PoolId,
    pub tier: Tier,
    pub coupon_pool_id: PoolId,
    pub coupon_token_id: TokenId,
    pub previous: Option<(Hash, Commitment)>,
}

impl RollRequest {
    pub fn new(key: TierKey, coupon: CouponRef) -> Self {
        Self {
            pool_id: key.pool_id,
            tier: key.tier,
            coupon_pool_id: coupon.pool_id,
            coupon_token_id: coupon.token_id,
            previous: None,
        }
    }

    pub fn key(&self) -> TierKey {
        TierKey::new(self.pool_id, self.tier)
    }

    pub fn coupon(&self) -> CouponRef {
        CouponRef::new(self.coupon_pool_id, self.coupon_token_id)
    }
}

/// Fresh roll identity: context plus 32 bytes of entropy
pub fn roll_hash(
    entropy: &dyn crate::clock::EntropySource,
    user: &Address,
    now: u64,
    nonce: u64,
    key: TierKey,
    coupon: CouponRef,
) -> Hash {
    let mut salt = [0u8; 32];
    entropy.fill(&mut salt);

    let mut hasher = Sha3_256::new();
    hasher.update(b"variant-roll");
    hasher.update(user);
    hasher.update(now.to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    hasher.update(key.pool_id.to_le_bytes());
    hasher.update([key.tier]);
    hasher.update(coupon.pool_id.to_le_bytes());
    hasher.update(coupon.token_id.to_le_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

pub(crate) fn roll(ctx: &mut Ctx<'_>, user: &Address, key: TierKey, coupon: CouponRef) -> Result<RollReceipt, AllocError> {
    ensure_rolling_active(ctx, key)?;

    let registry = &ctx.collab.registry;
    let owner = registry.owner_of(coupon).map_err(AllocError::Collaborator)?;
    if &owner != user {
        return Err(AllocError::NotCouponOwner);
    }
    if !registry.eligibility(coupon).map_err(AllocError::Collaborator)?.may_roll() {
        return Err(AllocError::CouponLocked);
    }

    let state = ctx.store.coupon_state(coupon);
    let interval = ctx.config.min_roll_interval_secs;
    if interval > 0 && state.total_rolls_ever > 0 {
        let next_allowed = state.last_roll_time.saturating_add(interval);
        if ctx.now < next_allowed {
            return Err(AllocError::RateLimited { retry_after: next_allowed - ctx.now });
        }
    }

    ctx.store.roll_ops += 1;
    let every = ctx.config.sweep_every_n_rolls;
    if every > 0 && ctx.store.roll_ops % every == 0 {
        let batch = ctx.config.sweep_batch;
        sweeper::sweep_tier(ctx, key, batch);
    }

    if ctx.store.open_coupon_rolls(coupon, ctx.now) >= ctx.config.max_rolls_per_coupon as usize {
        return Err(AllocError::MaxActiveRollsExceeded);
    }

    let nonce = ctx.store.nonces.current(user);
    let free = state.free_rolls_used < ctx.config.free_rolls_per_coupon;
    let kind = if free { None } else { Some(ChargeKind::Roll) };
    let (roll_hash, roll) = reserve_new(ctx, user, key, coupon, nonce, 0, kind)?;

    ctx.store.rolls.insert(roll_hash, roll.clone());
    ctx.store.track_roll(coupon, roll_hash);

    let now = ctx.now;
    let state = ctx.store.coupons.entry(coupon).or_default();
    state.used_rolls += 1;
    state.total_rolls_ever += 1;
    if free {
        state.free_rolls_used += 1;
    }
    state.last_roll_time = now;
    state.active = true;

    info!("Rolled {} for {} ({})", roll.slot(), coupon, hex::encode(&roll_hash[..8]));
    Ok(receipt(ctx, roll_hash, &roll))
}

/// Returns the new receipt and the abandoned roll
pub(crate) fn reroll(
    ctx: &mut Ctx<'_>,
    user: &Address,
    previous_hash: &Hash,
    commitment: &Commitment,
) -> Result<(RollReceipt, VariantRoll), AllocError> {
    if ctx.store.is_consumed(previous_hash) {
        return Err(AllocError::RollAlreadyAssigned(*previous_hash));
    }
    let previous = ctx
        .store
        .get_roll(previous_hash)
        .cloned()
        .ok_or(AllocError::RollNotFound(*previous_hash))?;
    if &previous.user != user {
        return Err(AllocError::InvalidRerollAttempt);
    }
    if previous.is_expired(ctx.now) {
        return Err(AllocError::RollExpired(*previous_hash));
    }
    if previous.rerolls_used >= ctx.config.max_rerolls_per_user {
        return Err(AllocError::MaxRerollsExceeded);
    }

    let verified = verifier::check(&ctx.store.nonces, user, previous_hash, &previous, commitment)?;

    let key = previous.tier_key();
    ensure_rolling_active(ctx, key)?;

    let coupon = previous.coupon();
    let (roll_hash, mut roll) = reserve_new(
        ctx,
        user,
        key,
        coupon,
        verified.nonce + 1,
        previous.rerolls_used + 1,
        Some(ChargeKind::Reroll),
    )?;
    roll.total_paid = roll.total_paid.saturating_add(previous.total_paid);

    // Point of no return
    ctx.store.release(previous.slot(), previous_hash);
    ctx.store.retire_roll(previous_hash);
    verifier::commit(&mut ctx.store.nonces, verified);

    ctx.store.rolls.insert(roll_hash, roll.clone());
    ctx.store.track_roll(coupon, roll_hash);
    let now = ctx.now;
    let state = ctx.store.coupons.entry(coupon).or_default();
    state.total_rolls_ever += 1;
    state.last_roll_time = now;
    state.active = true;

    info!(
        "Rerolled {} -> {} ({}, {} used)",
        hex::encode(&previous_hash[..8]),
        hex::encode(&roll_hash[..8]),
        roll.slot(),
        roll.rerolls_used
    );
    Ok((receipt(ctx, roll_hash, &roll), previous))
}

pub(crate) fn check_roll(ctx: &Ctx<'_>, roll_hash: &Hash) -> RollStatus {
    if ctx.store.is_consumed(roll_hash) {
        return RollStatus::invalid();
    }
    match ctx.store.get_roll(roll_hash) {
        Some(roll) if !roll.is_expired(ctx.now) => RollStatus {
            valid: true,
            variant: roll.variant,
            time_remaining: roll.expires_at - ctx.now,
        },
        _ => RollStatus::invalid(),
    }
}

fn ensure_rolling_active(ctx: &Ctx<'_>, key: TierKey) -> Result<(), AllocError> {
    let active = ctx.collab.oracle.rolling_active(key).map_err(AllocError::Collaborator)?;
    if !active {
        return Err(AllocError::RollingInactive { pool_id: key.pool_id, tier: key.tier });
    }
    Ok(())
}

/// Select, reserve and settle a new roll. On payment failure the reservation is released.
fn reserve_new(
    ctx: &mut Ctx<'_>,
    user: &Address,
    key: TierKey,
    coupon: CouponRef,
    nonce: u64,
    rerolls_used: u8,
    charge: Option<ChargeKind>,
) -> Result<(Hash, VariantRoll), AllocError> {
    let seed = selector::selection_seed(ctx.entropy, user, key, nonce, ctx.now);
    let variant = selector::select(ctx.store, key, &seed, ctx.config.selection_basis, ctx.now)?;
    let slot = key.slot(variant);

    let roll_hash = roll_hash(ctx.entropy, user, ctx.now, nonce, key, coupon);
    if ctx.store.rolls.contains_key(&roll_hash) || ctx.store.is_consumed(&roll_hash) {
        return Err(AllocError::DuplicateRoll(roll_hash));
    }

    let expires_at = ctx.store.reserve(slot, roll_hash, ctx.now, ctx.config.roll_ttl_secs)?;

    let total_paid = match charge {
        Some(kind) => match ctx.collab.payments.charge(user, key, kind) {
            Ok(settlement) => settlement.amount,
            Err(e) => {
                ctx.store.release(slot, &roll_hash);
                debug!("Payment for {:?} failed, released {}", kind, slot);
                return Err(AllocError::Payment(e));
            }
        },
        None => 0,
    };

    let roll = VariantRoll {
        user: *user,
        variant,
        expires_at,
        rerolls_used,
        pool_id: key.pool_id,
        tier: key.tier,
        coupon_pool_id: coupon.pool_id,
        coupon_token_id: coupon.token_id,
        nonce,
        total_paid,
    };
    Ok((roll_hash, roll))
}

fn receipt(ctx: &Ctx<'_>, roll_hash: Hash, roll: &VariantRoll) -> RollReceipt {
    RollReceipt {
        roll_hash,
        message: verifier::roll_message(&roll_hash, roll.nonce),
        variant: roll.variant,
        expires_at: roll.expires_at,
        rerolls_remaining: ctx.config.max_rerolls_per_user.saturating_sub(roll.rerolls_used),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::engine::tests::Harness;

    const SLOT: SlotKey = SlotKey { pool_id: 1, tier: 1, variant: 1 };
    const KEY: TierKey = TierKey { pool_id: 1, tier: 1 };

    fn setup(max: u64) -> (Harness, Keypair, CouponRef) {
        let h = Harness::new(&[(SLOT, max)]);
        let kp = Keypair::generate();
        let coupon = CouponRef::new(50, 1);
        h.registry.mint(coupon, kp.address());
        (h, kp, coupon)
    }

    #[test]
    fn test_roll_reserves_and_tracks() {
        let (mut h, kp, coupon) = setup(2);
        let receipt = roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();

        assert_eq!(receipt.variant, 1);
        assert_eq!(receipt.expires_at, h.now + 600);
        assert_eq!(receipt.rerolls_remaining, 3);
        assert_eq!(receipt.message, verifier::roll_message(&receipt.roll_hash, 0));
        assert_eq!(h.store.available_of(SLOT, h.now), 1);

        let state = h.store.coupon_state(coupon);
        assert_eq!((state.used_rolls, state.free_rolls_used, state.total_rolls_ever), (1, 1, 1));
        assert!(state.active);
    }

    #[test]
    fn test_roll_requires_coupon_owner() {
        let (mut h, _, coupon) = setup(2);
        let stranger = Keypair::generate();
        assert!(matches!(
            roll(&mut h.ctx(), &stranger.address(), KEY, coupon),
            Err(AllocError::NotCouponOwner)
        ));
    }

    #[test]
    fn test_roll_locked_coupon() {
        let (mut h, kp, coupon) = setup(2);
        h.registry.set_locked(coupon, true);
        assert!(matches!(roll(&mut h.ctx(), &kp.address(), KEY, coupon), Err(AllocError::CouponLocked)));
    }

    #[test]
    fn test_roll_inactive_tier() {
        let (mut h, kp, coupon) = setup(2);
        h.oracle.set_rolling(false);
        assert!(matches!(
            roll(&mut h.ctx(), &kp.address(), KEY, coupon),
            Err(AllocError::RollingInactive { .. })
        ));
        assert_eq!(h.store.roll_count(), 0);
    }

    #[test]
    fn test_active_roll_limit_per_coupon() {
        let (mut h, kp, coupon) = setup(5);
        roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
        assert!(matches!(
            roll(&mut h.ctx(), &kp.address(), KEY, coupon),
            Err(AllocError::MaxActiveRollsExceeded)
        ));

        // Expired rolls no longer count
        h.now += 601;
        roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
    }

    #[test]
    fn test_rate_limit() {
        let (mut h, kp, coupon) = setup(5);
        h.config.min_roll_interval_secs = 60;
        h.config.max_rolls_per_coupon = 5;
        roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
        h.now += 20;
        assert!(matches!(
            roll(&mut h.ctx(), &kp.address(), KEY, coupon),
            Err(AllocError::RateLimited { retry_after: 40 })
        ));
        h.now += 40;
        roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
    }

    #[test]
    fn test_paid_roll_after_free_entitlement() {
        let (mut h, kp, coupon) = setup(5);
        h.config.max_rolls_per_coupon = 5;
        h.payments.set_price(ChargeKind::Roll, 25);

        let first = roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
        let second = roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
        assert_eq!(h.store.get_roll(&first.roll_hash).unwrap().total_paid, 0);
        assert_eq!(h.store.get_roll(&second.roll_hash).unwrap().total_paid, 25);
        assert_eq!(h.payments.charges().len(), 1);

        h.payments.fail(true);
        assert!(matches!(roll(&mut h.ctx(), &kp.address(), KEY, coupon), Err(AllocError::Payment(_))));
        assert_eq!(h.store.available_of(SLOT, h.now), 3);
    }

    #[test]
    fn test_reroll_moves_reservation() {
        let (mut h, kp, coupon) = setup(2);
        let user = kp.address();
        let first = roll(&mut h.ctx(), &user, KEY, coupon).unwrap();

        let commitment = kp.sign_message(&first.message);
        let (second, abandoned) = reroll(&mut h.ctx(), &user, &first.roll_hash, &commitment).unwrap();

        assert_eq!(abandoned.rerolls_used, 0);
        assert_eq!(second.rerolls_remaining, 2);
        assert!(h.store.get_roll(&first.roll_hash).is_none());
        assert!(!h.store.slot(SLOT).unwrap().holds(&first.roll_hash));
        assert!(h.store.slot(SLOT).unwrap().holds(&second.roll_hash));
        assert_eq!(h.store.nonces().current(&user), 1);
        assert_eq!(second.message, verifier::roll_message(&second.roll_hash, 1));
        assert_eq!(h.store.coupon_state(coupon).total_rolls_ever, 2);
    }

    #[test]
    fn test_reroll_by_other_user() {
        let (mut h, kp, coupon) = setup(2);
        let first = roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
        let thief = Keypair::generate();
        let commitment = thief.sign_message(&first.message);
        assert!(matches!(
            reroll(&mut h.ctx(), &thief.address(), &first.roll_hash, &commitment),
            Err(AllocError::InvalidRerollAttempt)
        ));
    }

    #[test]
    fn test_reroll_capacity_failure_leaves_old_roll() {
        let (mut h, kp, coupon) = setup(1);
        let user = kp.address();
        let first = roll(&mut h.ctx(), &user, KEY, coupon).unwrap();
        let commitment = kp.sign_message(&first.message);

        // Only slot is held by the roll being abandoned
        assert!(matches!(
            reroll(&mut h.ctx(), &user, &first.roll_hash, &commitment),
            Err(AllocError::CapacityExhausted(_))
        ));
        assert!(h.store.get_roll(&first.roll_hash).is_some());
        assert_eq!(h.store.nonces().current(&user), 0);
    }

    #[test]
    fn test_check_roll() {
        let (mut h, kp, coupon) = setup(2);
        let receipt = roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
        h.now += 100;
        let status = check_roll(&h.ctx(), &receipt.roll_hash);
        assert_eq!(status, RollStatus { valid: true, variant: 1, time_remaining: 500 });
        h.now += 501;
        assert!(!check_roll(&h.ctx(), &receipt.roll_hash).valid);
        assert!(!check_roll(&h.ctx(), &[0u8; 32]).valid);
    }
}
