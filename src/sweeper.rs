//! Expiry sweeper
//!
//! ```text
//! for each active reservation in slot with expires_at < now (oldest first, ≤ max_items):
//!     roll gone                      → release
//!     now > expires_at + grace       → release, retire roll, reset coupon (best effort)
//!     otherwise                      → leave for a later pass
//! ```
//!
//! The scan is lazy and stops after `max_items` reclaimable entries.
//!
//! Expired reservations already stop counting against capacity; the sweep reclaims their
//! bookkeeping and returns coupons to their pre-roll state.

use crate::engine::Ctx;
use crate::error::AllocError;
use crate::events::EngineEvent;
use crate::types::*;
use tracing::{debug, warn};

/// Clean up to `max_items` expired reservations of one slot
pub(crate) fn sweep_slot(ctx: &mut Ctx<'_>, slot: SlotKey, max_items: usize) -> Result<usize, AllocError> {
    let now = ctx.now;
    let grace = ctx.config.grace_period_secs;
    let rolls = &ctx.store.rolls;

    // Stops scanning once the batch is full; in-grace entries never count against it
    let reclaimable: Vec<Hash> = ctx
        .store
        .slot(slot)
        .ok_or(AllocError::UnknownVariant(slot))?
        .expired(now)
        .filter(|(roll_hash, expires_at)| {
            !rolls.contains_key(roll_hash) || now > expires_at.saturating_add(grace)
        })
        .map(|(roll_hash, _)| roll_hash)
        .take(max_items)
        .collect();

    let cleaned = reclaimable.len();
    for roll_hash in reclaimable {
        ctx.store.release(slot, &roll_hash);

        let coupon = if ctx.store.is_consumed(&roll_hash) {
            None
        } else {
            retire_unconfirmed(ctx, &roll_hash)
        };

        ctx.events.emit(EngineEvent::Expired { roll_hash, slot, coupon });
    }

    if cleaned > 0 {
        debug!("Swept {} expired reservations from {}", cleaned, slot);
    }
    Ok(cleaned)
}

/// Sweep every variant of a tier, sharing one `max_items` budget
pub(crate) fn sweep_tier(ctx: &mut Ctx<'_>, key: TierKey, max_items: usize) -> usize {
    let variants: Vec<Variant> = match ctx.store.tier(key) {
        Some(table) => table.variants.keys().copied().collect(),
        None => return 0,
    };

    let mut cleaned = 0;
    for variant in variants {
        if cleaned >= max_items {
            break;
        }
        cleaned += sweep_slot(ctx, key.slot(variant), max_items - cleaned).unwrap_or(0);
    }
    cleaned
}

fn retire_unconfirmed(ctx: &mut Ctx<'_>, roll_hash: &Hash) -> Option<CouponRef> {
    let roll = ctx.store.retire_roll(roll_hash)?;
    let coupon = roll.coupon();

    if let Err(e) = ctx.collab.registry.reset_coupon(coupon) {
        warn!("Coupon reset failed for {}: {}", coupon, e);
    }

    let open = ctx.store.open_coupon_rolls(coupon, ctx.now);
    let state = ctx.store.coupons.entry(coupon).or_default();
    state.used_rolls = state.used_rolls.saturating_sub(1);
    state.active = open > 0;

    Some(coupon)
}
