//! Reservation ledger
//!
//! Per slot (pool, tier, variant): capacity, permanent count, and an insertion-ordered list
//! of temporary reservations with a `roll_hash → position` index.
//!
//! # Capacity Invariant
//!
//! ```text
//! permanent_count ≤ max_supply
//! permanent_count + Σ(active ∧ expires_at ≥ now) ≤ max_supply      (checked at reserve)
//! ```
//!
//! Released reservations stay in the list as inactive tombstones until `compact` drops them.

use crate::error::AllocError;
use crate::store::{AllocationStore, VariantTable};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Compaction kicks in once tombstones exceed this and outnumber live entries
const COMPACT_MIN_TOMBSTONES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLedger {
    pub(crate) capacity: VariantCapacity,
    reservations: Vec<TempReservation>,
    /// Active reservations only
    index: HashMap<Hash, usize>,
    tombstones: usize,
}

impl SlotLedger {
    pub fn new(max_supply: u64, active: bool) -> Self {
        Self {
            capacity: VariantCapacity { max_supply, permanent_count: 0, active },
            reservations: Vec::new(),
            index: HashMap::new(),
            tombstones: 0,
        }
    }

    pub fn capacity(&self) -> &VariantCapacity {
        &self.capacity
    }

    pub fn reservations(&self) -> &[TempReservation] {
        &self.reservations
    }

    pub fn active_reservations(&self, now: u64) -> u64 {
        self.index
            .values()
            .filter(|&&pos| !self.reservations[pos].is_expired(now))
            .count() as u64
    }

    pub fn view(&self, now: u64) -> CapacityView {
        CapacityView {
            max: self.capacity.max_supply,
            permanent: self.capacity.permanent_count,
            active_reservations: self.active_reservations(now),
        }
    }

    pub fn available(&self, now: u64) -> u64 {
        self.view(now).available()
    }

    /// Capacity ignoring transient reservations
    pub fn unreserved_supply(&self) -> u64 {
        self.capacity.max_supply.saturating_sub(self.capacity.permanent_count)
    }

    pub fn holds(&self, roll_hash: &Hash) -> bool {
        self.index.contains_key(roll_hash)
    }

    fn reserve(&mut self, slot: SlotKey, roll_hash: Hash, now: u64, ttl: u64) -> Result<u64, AllocError> {
        if self.index.contains_key(&roll_hash) {
            return Err(AllocError::DuplicateRoll(roll_hash));
        }
        if self.available(now) == 0 {
            return Err(AllocError::CapacityExhausted(slot));
        }

        let expires_at = now.saturating_add(ttl);
        self.index.insert(roll_hash, self.reservations.len());
        self.reservations.push(TempReservation { roll_hash, expires_at, active: true });
        Ok(expires_at)
    }

    fn release(&mut self, roll_hash: &Hash) -> bool {
        let Some(pos) = self.index.remove(roll_hash) else {
            return false;
        };
        self.reservations[pos].active = false;
        self.tombstones += 1;
        self.maybe_compact();
        true
    }

    /// Expired reservations no longer hold capacity and cannot be promoted
    fn can_promote(&self, slot: SlotKey, roll_hash: &Hash, now: u64) -> Result<(), AllocError> {
        match self.index.get(roll_hash) {
            Some(&pos) if !self.reservations[pos].is_expired(now) => {}
            _ => return Err(AllocError::ReservationNotFound(*roll_hash)),
        }
        if self.capacity.permanent_count >= self.capacity.max_supply {
            return Err(AllocError::CapacityExhausted(slot));
        }
        Ok(())
    }

    fn promote(&mut self, slot: SlotKey, roll_hash: &Hash, now: u64) -> Result<u64, AllocError> {
        self.can_promote(slot, roll_hash, now)?;
        self.release(roll_hash);
        self.capacity.permanent_count += 1;
        Ok(self.capacity.permanent_count)
    }

    /// Active reservations past `expires_at`, oldest first
    pub(crate) fn expired(&self, now: u64) -> impl Iterator<Item = (Hash, u64)> + '_ {
        self.reservations
            .iter()
            .filter(move |r| r.active && r.is_expired(now))
            .map(|r| (r.roll_hash, r.expires_at))
    }

    fn maybe_compact(&mut self) {
        if self.tombstones >= COMPACT_MIN_TOMBSTONES && self.tombstones * 2 > self.reservations.len() {
            self.compact();
        }
    }

    /// Drop inactive entries and rebuild the index
    pub fn compact(&mut self) {
        self.reservations.retain(|r| r.active);
        self.index = self
            .reservations
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.roll_hash, pos))
            .collect();
        self.tombstones = 0;
    }
}

// =============================================================================
// LEDGER OPERATIONS
// =============================================================================

impl AllocationStore {
    pub(crate) fn slot(&self, slot: SlotKey) -> Option<&SlotLedger> {
        self.tiers.get(&slot.tier_key())?.variants.get(&slot.variant)
    }

    fn slot_mut(&mut self, slot: SlotKey) -> Result<&mut SlotLedger, AllocError> {
        self.tiers
            .get_mut(&slot.tier_key())
            .and_then(|t| t.variants.get_mut(&slot.variant))
            .ok_or(AllocError::UnknownVariant(slot))
    }

    pub fn capacity_of(&self, slot: SlotKey, now: u64) -> Result<CapacityView, AllocError> {
        self.slot(slot)
            .map(|s| s.view(now))
            .ok_or(AllocError::UnknownVariant(slot))
    }

    /// `max - permanent - active reservations`, floored at 0 (0 for unknown slots)
    pub fn available_of(&self, slot: SlotKey, now: u64) -> u64 {
        self.slot(slot).map(|s| s.available(now)).unwrap_or(0)
    }

    pub fn reserve(&mut self, slot: SlotKey, roll_hash: Hash, now: u64, ttl: u64) -> Result<u64, AllocError> {
        let expires_at = self.slot_mut(slot)?.reserve(slot, roll_hash, now, ttl)?;
        debug!("Reserved {} for {} until {}", slot, hex::encode(&roll_hash[..8]), expires_at);
        Ok(expires_at)
    }

    /// Idempotent; returns whether an active reservation was released
    pub fn release(&mut self, slot: SlotKey, roll_hash: &Hash) -> bool {
        match self.slot_mut(slot) {
            Ok(ledger) => ledger.release(roll_hash),
            Err(_) => false,
        }
    }

    pub fn can_promote(&self, slot: SlotKey, roll_hash: &Hash, now: u64) -> Result<(), AllocError> {
        self.slot(slot)
            .ok_or(AllocError::UnknownVariant(slot))?
            .can_promote(slot, roll_hash, now)
    }

    /// Release the reservation and count it as a permanent allocation
    pub fn promote(&mut self, slot: SlotKey, roll_hash: &Hash, now: u64) -> Result<u64, AllocError> {
        self.slot_mut(slot)?.promote(slot, roll_hash, now)
    }

    /// Create or update a variant's capacity. Counters and reservations are preserved.
    pub fn configure_variant(
        &mut self,
        slot: SlotKey,
        max_supply: u64,
        active: bool,
    ) -> Result<(), AllocError> {
        let table = self.tiers.entry(slot.tier_key()).or_insert_with(VariantTable::default);
        match table.variants.get_mut(&slot.variant) {
            Some(ledger) => {
                if max_supply < ledger.capacity.permanent_count {
                    return Err(AllocError::InvalidCounter {
                        slot,
                        requested: ledger.capacity.permanent_count,
                        max: max_supply,
                    });
                }
                ledger.capacity.max_supply = max_supply;
                ledger.capacity.active = active;
            }
            None => {
                table.variants.insert(slot.variant, SlotLedger::new(max_supply, active));
            }
        }
        Ok(())
    }

    pub fn set_default_variant(&mut self, key: TierKey, variant: Variant) -> Result<(), AllocError> {
        let table = self
            .tiers
            .get_mut(&key)
            .ok_or(AllocError::UnknownTier { pool_id: key.pool_id, tier: key.tier })?;
        if !table.variants.contains_key(&variant) {
            return Err(AllocError::UnknownVariant(key.slot(variant)));
        }
        table.default_variant = Some(variant);
        Ok(())
    }

    /// Emergency repair of a permanent counter. Returns the audit record.
    pub fn fix_counter(&mut self, slot: SlotKey, correct_count: u64, now: u64) -> Result<CounterRepair, AllocError> {
        let ledger = self.slot_mut(slot)?;
        if correct_count > ledger.capacity.max_supply {
            return Err(AllocError::InvalidCounter {
                slot,
                requested: correct_count,
                max: ledger.capacity.max_supply,
            });
        }

        let before = ledger.capacity.permanent_count;
        ledger.capacity.permanent_count = correct_count;
        if correct_count + ledger.active_reservations(now) > ledger.capacity.max_supply {
            warn!("Counter repair on {} leaves live reservations over capacity", slot);
        }

        let repair = CounterRepair { slot, before, after: correct_count, recorded_at: now };
        warn!("Variant counter repaired: {} {} -> {}", slot, before, correct_count);
        self.repairs.push(repair.clone());
        Ok(repair)
    }

    /// Every configured slot with at least one active reservation
    pub fn slots_with_reservations(&self) -> Vec<SlotKey> {
        self.tiers
            .iter()
            .flat_map(|(key, table)| {
                table
                    .variants
                    .iter()
                    .filter(|(_, ledger)| !ledger.index.is_empty())
                    .map(move |(&variant, _)| key.slot(variant))
            })
            .collect()
    }

    /// Check the capacity invariant on every slot
    pub fn capacity_invariant_holds(&self, now: u64) -> bool {
        self.tiers.values().all(|table| {
            table.variants.values().all(|ledger| {
                let view = ledger.view(now);
                view.permanent <= view.max && view.permanent.saturating_add(view.active_reservations) <= view.max
            })
        })
    }
}
