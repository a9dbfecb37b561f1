//! Assignment committer
//!
//! Converts a confirmed roll into a permanent allocation:
//!
//! ```text
//! 1. roll exists, owned by caller, same pool/tier, unexpired, not consumed
//! 2. assignment window open                         (oracle, fatal)
//! 3. commitment checks out                          (no mutation)
//! 4. slot can still take a permanent allocation     (no mutation)
//! 5. settle                                         (payments, fatal)
//! 6. mark consumed
//! 7. bind variant to coupon token                   (registry, fatal → unwind 6, refund 5)
//! 8. promote reservation, advance nonce, retire roll, record coupon usage
//! ```
//!
//! Nothing in step 8 can fail once step 4 passed under the same lock.

use crate::crypto::Commitment;
use crate::engine::Ctx;
use crate::error::AllocError;
use crate::external::{ChargeKind, Settlement};
use crate::types::*;
use crate::verifier;
use tracing::{info, warn};

pub(crate) fn assign(
    ctx: &mut Ctx<'_>,
    user: &Address,
    key: TierKey,
    roll_hash: &Hash,
    commitment: &Commitment,
) -> Result<(Assignment, VariantRoll), AllocError> {
    if ctx.store.is_consumed(roll_hash) {
        return Err(AllocError::RollAlreadyAssigned(*roll_hash));
    }
    let roll = ctx
        .store
        .get_roll(roll_hash)
        .cloned()
        .ok_or(AllocError::RollNotFound(*roll_hash))?;
    if &roll.user != user {
        return Err(AllocError::NotRollOwner);
    }
    if roll.tier_key() != key {
        return Err(AllocError::PoolMismatch(*roll_hash));
    }
    if roll.is_expired(ctx.now) {
        return Err(AllocError::RollExpired(*roll_hash));
    }

    let open = ctx.collab.oracle.assignment_active(key).map_err(AllocError::Collaborator)?;
    if !open {
        return Err(AllocError::AssignmentInactive { pool_id: key.pool_id, tier: key.tier });
    }

    let verified = verifier::check(&ctx.store.nonces, user, roll_hash, &roll, commitment)?;

    let slot = roll.slot();
    ctx.store.can_promote(slot, roll_hash, ctx.now)?;

    let settlement = ctx
        .collab
        .payments
        .charge(user, key, ChargeKind::Assign)
        .map_err(AllocError::Payment)?;

    ctx.store.consumed.insert(*roll_hash);

    let coupon = roll.coupon();
    let binding = match ctx.collab.registry.bind_variant(coupon, key, roll.variant) {
        Ok(binding) if binding.variant == roll.variant => binding,
        Ok(binding) => {
            unwind(ctx, user, roll_hash, &settlement);
            return Err(AllocError::TargetCollectionError {
                requested: roll.variant,
                reported: Some(binding.variant),
                reason: "registry recorded a different variant".into(),
            });
        }
        Err(e) => {
            unwind(ctx, user, roll_hash, &settlement);
            return Err(AllocError::TargetCollectionError {
                requested: roll.variant,
                reported: None,
                reason: e.to_string(),
            });
        }
    };

    let now = ctx.now;
    if let Err(e) = ctx.store.promote(slot, roll_hash, now) {
        unwind(ctx, user, roll_hash, &settlement);
        return Err(e);
    }
    verifier::commit(&mut ctx.store.nonces, verified);
    ctx.store.retire_roll(roll_hash);

    let open = ctx.store.open_coupon_rolls(coupon, ctx.now);
    ctx.store.coupons.entry(coupon).or_default().active = open > 0;

    let assignment = Assignment {
        token_ref: binding.token_ref,
        variant: roll.variant,
        amount_paid: roll.total_paid.saturating_add(settlement.amount),
    };
    info!(
        "Assigned {} to token {} ({})",
        slot,
        assignment.token_ref,
        hex::encode(&roll_hash[..8])
    );
    Ok((assignment, roll))
}

fn unwind(ctx: &mut Ctx<'_>, user: &Address, roll_hash: &Hash, settlement: &Settlement) {
    ctx.store.consumed.remove(roll_hash);
    if settlement.amount > 0
        && let Err(e) = ctx.collab.payments.refund(user, settlement)
    {
        warn!("Refund of {} failed for {}: {}", settlement.amount, hex::encode(&roll_hash[..8]), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::engine::tests::Harness;
    use crate::roll;

    const SLOT: SlotKey = SlotKey { pool_id: 1, tier: 1, variant: 1 };
    const KEY: TierKey = TierKey { pool_id: 1, tier: 1 };

    struct Rolled {
        h: Harness,
        kp: Keypair,
        coupon: CouponRef,
        receipt: RollReceipt,
    }

    fn rolled(max: u64) -> Rolled {
        let mut h = Harness::new(&[(SLOT, max)]);
        let kp = Keypair::generate();
        let coupon = CouponRef::new(50, 3);
        h.registry.mint(coupon, kp.address());
        let receipt = roll::roll(&mut h.ctx(), &kp.address(), KEY, coupon).unwrap();
        Rolled { h, kp, coupon, receipt }
    }

    #[test]
    fn test_assign_promotes() {
        let Rolled { mut h, kp, coupon, receipt } = rolled(2);
        let commitment = kp.sign_message(&receipt.message);
        let (assignment, _) = assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment).unwrap();

        assert_eq!(assignment, Assignment { token_ref: 3, variant: 1, amount_paid: 0 });
        let view = h.store.capacity_of(SLOT, h.now).unwrap();
        assert_eq!((view.permanent, view.active_reservations), (1, 0));
        assert!(h.store.is_consumed(&receipt.roll_hash));
        assert!(h.store.get_roll(&receipt.roll_hash).is_none());
        assert_eq!(h.store.nonces().current(&kp.address()), 1);
        assert_eq!(h.registry.binding(coupon), Some((KEY, 1)));
        assert!(!h.store.coupon_state(coupon).active);
    }

    #[test]
    fn test_replay_rejected() {
        let Rolled { mut h, kp, receipt, .. } = rolled(2);
        let commitment = kp.sign_message(&receipt.message);
        assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment).unwrap();
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment),
            Err(AllocError::RollAlreadyAssigned(_))
        ));
    }

    #[test]
    fn test_registry_disagreement_unwinds() {
        let Rolled { mut h, kp, coupon, receipt } = rolled(2);
        h.payments.set_price(ChargeKind::Assign, 40);
        h.registry.substitute_variant(Some(7));

        let commitment = kp.sign_message(&receipt.message);
        let err = assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment).unwrap_err();
        assert!(matches!(err, AllocError::TargetCollectionError { requested: 1, reported: Some(7), .. }));

        assert!(!h.store.is_consumed(&receipt.roll_hash));
        assert!(h.store.get_roll(&receipt.roll_hash).is_some());
        assert_eq!(h.store.capacity_of(SLOT, h.now).unwrap().permanent, 0);
        assert_eq!(h.store.nonces().current(&kp.address()), 0);
        assert_eq!(h.payments.refunds(), vec![(kp.address(), 40)]);

        // Registry recovers, same commitment now succeeds
        h.registry.substitute_variant(None);
        assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment).unwrap();
        assert_eq!(h.registry.binding(coupon), Some((KEY, 1)));
    }

    #[test]
    fn test_registry_error_unwinds() {
        let Rolled { mut h, kp, receipt, .. } = rolled(2);
        h.registry.fail_bind(true);
        let commitment = kp.sign_message(&receipt.message);
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment),
            Err(AllocError::TargetCollectionError { reported: None, .. })
        ));
        assert!(h.store.slot(SLOT).unwrap().holds(&receipt.roll_hash));
        assert!(h.payments.refunds().is_empty());
    }

    #[test]
    fn test_assign_checks() {
        let Rolled { mut h, kp, receipt, .. } = rolled(2);
        let commitment = kp.sign_message(&receipt.message);
        let stranger = Keypair::generate();

        assert!(matches!(
            assign(&mut h.ctx(), &stranger.address(), KEY, &receipt.roll_hash, &commitment),
            Err(AllocError::NotRollOwner)
        ));
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), TierKey::new(1, 2), &receipt.roll_hash, &commitment),
            Err(AllocError::PoolMismatch(_))
        ));
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &[0u8; 32], &commitment),
            Err(AllocError::RollNotFound(_))
        ));

        h.oracle.set_assignment(false);
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment),
            Err(AllocError::AssignmentInactive { .. })
        ));
        h.oracle.set_assignment(true);

        let forged = stranger.sign_message(&receipt.message);
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &forged),
            Err(AllocError::InvalidSignature)
        ));

        h.now = receipt.expires_at + 1;
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment),
            Err(AllocError::RollExpired(_))
        ));
    }

    #[test]
    fn test_payment_failure_mutates_nothing() {
        let Rolled { mut h, kp, receipt, .. } = rolled(2);
        h.payments.fail(true);
        let commitment = kp.sign_message(&receipt.message);
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment),
            Err(AllocError::Payment(_))
        ));
        assert!(!h.store.is_consumed(&receipt.roll_hash));
        assert_eq!(h.store.nonces().current(&kp.address()), 0);
    }

    #[test]
    fn test_repaired_counter_blocks_before_payment() {
        let Rolled { mut h, kp, receipt, .. } = rolled(1);
        h.payments.set_price(ChargeKind::Assign, 10);
        h.store.fix_counter(SLOT, 1, h.now).unwrap();
        let commitment = kp.sign_message(&receipt.message);
        assert!(matches!(
            assign(&mut h.ctx(), &kp.address(), KEY, &receipt.roll_hash, &commitment),
            Err(AllocError::CapacityExhausted(_))
        ));
        assert!(h.payments.charges().is_empty());
    }
}
