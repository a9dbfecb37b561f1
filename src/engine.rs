//! Variant engine: async front over the allocation store
//!
//! # Architecture
//!
//! ```text
//!         roll / reroll / assign / admin
//!                     │
//!          ┌──────────▼──────────┐
//!          │   VariantEngine     │  one tokio Mutex over the store
//!          └──────────┬──────────┘
//!                     │ Ctx { store, config, collaborators, entropy, events, now }
//!   ┌────────┬────────┼─────────┬───────────┬──────────┐
//!   │ roll   │selector│ verifier│ committer │ sweeper  │
//!   └────────┴────────┴────┬────┴───────────┴──────────┘
//!                          │
//!                 AllocationStore (ledger, rolls, nonces, coupons)
//! ```
//!
//! Every state transition runs start to finish while holding the store lock. Nothing is
//! awaited inside the critical section; collaborator calls are synchronous.

use crate::clock::{Clock, EntropySource, OsEntropy, SystemClock};
use crate::committer;
use crate::config::EngineConfig;
use crate::crypto::Commitment;
use crate::error::AllocError;
use crate::events::{EngineEvent, EventSink};
use crate::external::Collaborators;
use crate::roll::{self, RollRequest};
use crate::store::AllocationStore;
use crate::sweeper;
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Borrowed view handed to components for the length of one transition
pub(crate) struct Ctx<'a> {
    pub store: &'a mut AllocationStore,
    pub config: &'a EngineConfig,
    pub collab: &'a Collaborators,
    pub entropy: &'a dyn EntropySource,
    pub events: &'a EventSink,
    pub now: u64,
}

pub struct EngineBuilder {
    config: EngineConfig,
    collab: Collaborators,
    store: Option<AllocationStore>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
}

impl EngineBuilder {
    /// Start from a restored snapshot instead of an empty store
    pub fn store(mut self, store: AllocationStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn build(self) -> Result<(VariantEngine, mpsc::Receiver<EngineEvent>), AllocError> {
        let mut store = self.store.unwrap_or_default();
        store.apply_pools(&self.config.pools)?;

        let (events, event_rx) = EventSink::channel(self.config.event_buffer);
        info!(
            "Engine ready: {} tiers, {} open rolls, {} consumed",
            store.tiers.len(),
            store.roll_count(),
            store.consumed_count()
        );

        let engine = VariantEngine {
            store: Arc::new(Mutex::new(store)),
            config: Arc::new(self.config),
            collab: self.collab,
            clock: self.clock,
            entropy: self.entropy,
            events,
        };
        Ok((engine, event_rx))
    }
}

#[derive(Clone)]
pub struct VariantEngine {
    store: Arc<Mutex<AllocationStore>>,
    config: Arc<EngineConfig>,
    collab: Collaborators,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    events: EventSink,
}

impl VariantEngine {
    pub fn builder(config: EngineConfig, collab: Collaborators) -> EngineBuilder {
        EngineBuilder {
            config,
            collab,
            store: None,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
        }
    }

    pub fn new(
        config: EngineConfig,
        collab: Collaborators,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>), AllocError> {
        Self::builder(config, collab).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn ctx<'a>(&'a self, store: &'a mut AllocationStore) -> Ctx<'a> {
        Ctx {
            store,
            config: &self.config,
            collab: &self.collab,
            entropy: self.entropy.as_ref(),
            events: &self.events,
            now: self.clock.now(),
        }
    }

    // =========================================================================
    // ROLL LIFECYCLE
    // =========================================================================

    /// Roll, or reroll when `request.previous` is set
    pub async fn roll(&self, caller: Address, request: RollRequest) -> Result<RollReceipt, AllocError> {
        if let Some((previous, commitment)) = &request.previous {
            return self.reroll(caller, *previous, commitment).await;
        }

        let mut store = self.store.lock().await;
        let mut ctx = self.ctx(&mut store);
        let receipt = roll::roll(&mut ctx, &caller, request.key(), request.coupon())?;

        self.events.emit(EngineEvent::Rolled {
            roll_hash: receipt.roll_hash,
            user: caller,
            slot: request.key().slot(receipt.variant),
            expires_at: receipt.expires_at,
        });
        Ok(receipt)
    }

    pub async fn reroll(
        &self,
        caller: Address,
        previous: Hash,
        commitment: &Commitment,
    ) -> Result<RollReceipt, AllocError> {
        let mut store = self.store.lock().await;
        let mut ctx = self.ctx(&mut store);
        let (receipt, abandoned) = roll::reroll(&mut ctx, &caller, &previous, commitment)?;

        self.events.emit(EngineEvent::Rerolled {
            previous,
            roll_hash: receipt.roll_hash,
            user: caller,
            slot: abandoned.tier_key().slot(receipt.variant),
            rerolls_used: abandoned.rerolls_used + 1,
        });
        Ok(receipt)
    }

    pub async fn assign(
        &self,
        caller: Address,
        pool_id: PoolId,
        tier: Tier,
        roll_hash: Hash,
        commitment: &Commitment,
    ) -> Result<Assignment, AllocError> {
        let mut store = self.store.lock().await;
        let mut ctx = self.ctx(&mut store);
        let key = TierKey::new(pool_id, tier);
        let (assignment, roll) = committer::assign(&mut ctx, &caller, key, &roll_hash, commitment)?;

        self.events.emit(EngineEvent::Assigned {
            roll_hash,
            user: caller,
            slot: roll.slot(),
            token_ref: assignment.token_ref,
        });
        Ok(assignment)
    }

    pub async fn get_roll(&self, roll_hash: &Hash) -> Option<VariantRoll> {
        self.store.lock().await.get_roll(roll_hash).cloned()
    }

    pub async fn check_roll(&self, roll_hash: &Hash) -> RollStatus {
        let mut store = self.store.lock().await;
        let ctx = self.ctx(&mut store);
        roll::check_roll(&ctx, roll_hash)
    }

    pub async fn is_consumed(&self, roll_hash: &Hash) -> bool {
        self.store.lock().await.is_consumed(roll_hash)
    }

    // =========================================================================
    // SWEEPING
    // =========================================================================

    pub async fn cleanup_expired_reservations(&self, slot: SlotKey, max_items: usize) -> Result<usize, AllocError> {
        let mut store = self.store.lock().await;
        let mut ctx = self.ctx(&mut store);
        sweeper::sweep_slot(&mut ctx, slot, max_items)
    }

    /// One bounded pass over every slot holding reservations; the lock is taken per slot
    pub async fn sweep_all(&self) -> usize {
        let slots = self.store.lock().await.slots_with_reservations();
        let batch = self.config.sweep_batch;

        let mut cleaned = 0;
        for slot in slots {
            let mut store = self.store.lock().await;
            let mut ctx = self.ctx(&mut store);
            cleaned += sweeper::sweep_slot(&mut ctx, slot, batch).unwrap_or(0);
        }
        if cleaned > 0 {
            debug!("Background sweep cleaned {} reservations", cleaned);
        }
        cleaned
    }

    /// Run `sweep_all` every `sweep_interval_secs` until the handle is aborted
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                engine.sweep_all().await;
            }
        })
    }

    // =========================================================================
    // ADMIN
    // =========================================================================

    pub async fn fix_variant_counter(&self, slot: SlotKey, correct_count: u64) -> Result<CounterRepair, AllocError> {
        let now = self.clock.now();
        let repair = self.store.lock().await.fix_counter(slot, correct_count, now)?;
        self.events.emit(EngineEvent::CounterRepaired(repair.clone()));
        Ok(repair)
    }

    pub async fn configure_variant(&self, slot: SlotKey, max_supply: u64, active: bool) -> Result<(), AllocError> {
        self.store.lock().await.configure_variant(slot, max_supply, active)?;
        info!("Configured {}: max {} active {}", slot, max_supply, active);
        Ok(())
    }

    pub async fn set_default_variant(&self, key: TierKey, variant: Variant) -> Result<(), AllocError> {
        self.store.lock().await.set_default_variant(key, variant)?;
        info!("Default variant for {} set to {}", key, variant);
        Ok(())
    }

    pub async fn capacity_of(&self, slot: SlotKey) -> Result<CapacityView, AllocError> {
        let now = self.clock.now();
        self.store.lock().await.capacity_of(slot, now)
    }

    pub async fn available_of(&self, slot: SlotKey) -> u64 {
        let now = self.clock.now();
        self.store.lock().await.available_of(slot, now)
    }

    pub async fn nonce_of(&self, user: &Address) -> u64 {
        self.store.lock().await.nonces().current(user)
    }

    pub async fn coupon_state(&self, coupon: CouponRef) -> CouponState {
        self.store.lock().await.coupon_state(coupon)
    }

    pub async fn capacity_invariant_holds(&self) -> bool {
        let now = self.clock.now();
        self.store.lock().await.capacity_invariant_holds(now)
    }

    /// Consistent copy of the whole store, for persistence
    pub async fn snapshot(&self) -> AllocationStore {
        self.store.lock().await.clone()
    }
}
