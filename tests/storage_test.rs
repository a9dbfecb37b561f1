//! Snapshot persistence across engine restarts

use std::sync::Arc;
use variant_roll::external::memory::{MemoryPayments, MemoryRegistry, SwitchOracle};
use variant_roll::{
    AllocError, Clock, Collaborators, CouponRef, EngineConfig, Keypair, ManualClock, RollRequest,
    Storage, TierKey, VariantEngine,
};

const KEY: TierKey = TierKey { pool_id: 3, tier: 2 };

fn collaborators(registry: Arc<MemoryRegistry>) -> Collaborators {
    Collaborators::new(registry, Arc::new(MemoryPayments::new([0; 32])), Arc::new(SwitchOracle::new()))
}

#[tokio::test]
async fn test_restart_preserves_rolls_nonces_and_consumption() {
    let storage = Storage::temporary().unwrap();
    let clock = ManualClock::new(50_000);
    let registry = Arc::new(MemoryRegistry::new());

    let kp = Keypair::generate();
    let user = kp.address();
    let committed_coupon = CouponRef::new(8, 1);
    let open_coupon = CouponRef::new(8, 2);
    registry.mint(committed_coupon, user);
    registry.mint(open_coupon, user);

    let (engine, _rx) = VariantEngine::builder(EngineConfig::default(), collaborators(registry.clone()))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    engine.configure_variant(KEY.slot(4), 2, true).await.unwrap();

    let open = engine.roll(user, RollRequest::new(KEY, open_coupon)).await.unwrap();
    let committed = engine.roll(user, RollRequest::new(KEY, committed_coupon)).await.unwrap();
    let commitment = kp.sign_message(&committed.message);
    engine.assign(user, KEY.pool_id, KEY.tier, committed.roll_hash, &commitment).await.unwrap();

    storage.save_store(&engine.snapshot().await, clock.now()).unwrap();
    drop(engine);

    let restored = storage.load_store().unwrap().unwrap();
    let (engine, _rx) = VariantEngine::builder(EngineConfig::default(), collaborators(registry))
        .store(restored)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    assert!(engine.is_consumed(&committed.roll_hash).await);
    assert!(matches!(
        engine.assign(user, KEY.pool_id, KEY.tier, committed.roll_hash, &commitment).await,
        Err(AllocError::RollAlreadyAssigned(_))
    ));
    assert_eq!(engine.nonce_of(&user).await, 1);

    let view = engine.capacity_of(KEY.slot(4)).await.unwrap();
    assert_eq!((view.max, view.permanent, view.active_reservations), (2, 1, 1));

    // Both rolls were bound to nonce 0; the assignment consumed it
    let stale = kp.sign_message(&open.message);
    assert!(matches!(
        engine.assign(user, KEY.pool_id, KEY.tier, open.roll_hash, &stale).await,
        Err(AllocError::StaleNonce { expected: 1, found: 0 })
    ));
    assert_eq!(engine.coupon_state(open_coupon).await.total_rolls_ever, 1);
}
