//! Capacity invariant under random ledger operation sequences

use proptest::prelude::*;
use variant_roll::{AllocError, AllocationStore, Hash, SlotKey};

const TTL: u64 = 300;
const MAX: [u64; 3] = [1, 2, 4];

#[derive(Debug, Clone)]
enum Op {
    Reserve(u8),
    Release(usize),
    Promote(usize),
    Advance(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u8..=3).prop_map(Op::Reserve),
        2 => any::<usize>().prop_map(Op::Release),
        2 => any::<usize>().prop_map(Op::Promote),
        1 => (0u64..400).prop_map(Op::Advance),
    ]
}

fn hash(n: u64) -> Hash {
    let mut h = [0u8; 32];
    h[..8].copy_from_slice(&n.to_le_bytes());
    h
}

proptest! {
    #[test]
    fn capacity_invariant_holds(ops in prop::collection::vec(op(), 1..120)) {
        let mut store = AllocationStore::new();
        for (i, max) in MAX.iter().enumerate() {
            store.configure_variant(SlotKey::new(1, 1, i as u8 + 1), *max, true).unwrap();
        }

        let mut now = 1_000u64;
        let mut issued: Vec<(SlotKey, Hash)> = Vec::new();
        let mut permanent = [0u64; 3];

        for op in ops {
            match op {
                Op::Reserve(variant) => {
                    let slot = SlotKey::new(1, 1, variant);
                    let available = store.available_of(slot, now);
                    let roll_hash = hash(issued.len() as u64);
                    match store.reserve(slot, roll_hash, now, TTL) {
                        Ok(expires_at) => {
                            prop_assert!(available > 0);
                            prop_assert_eq!(expires_at, now + TTL);
                            issued.push((slot, roll_hash));
                        }
                        Err(AllocError::CapacityExhausted(_)) => {
                            prop_assert_eq!(available, 0);
                        }
                        Err(e) => {
                            prop_assert!(false, "unexpected {}", e);
                        }
                    }
                }
                Op::Release(i) if !issued.is_empty() => {
                    let (slot, roll_hash) = issued[i % issued.len()];
                    store.release(slot, &roll_hash);
                    prop_assert!(!store.release(slot, &roll_hash));
                }
                Op::Promote(i) if !issued.is_empty() => {
                    let (slot, roll_hash) = issued[i % issued.len()];
                    if store.promote(slot, &roll_hash, now).is_ok() {
                        permanent[slot.variant as usize - 1] += 1;
                    }
                }
                Op::Advance(secs) => now += secs,
                _ => {}
            }

            prop_assert!(store.capacity_invariant_holds(now));
            for (i, max) in MAX.iter().enumerate() {
                let view = store.capacity_of(SlotKey::new(1, 1, i as u8 + 1), now).unwrap();
                prop_assert_eq!(view.permanent, permanent[i]);
                prop_assert_eq!(view.available(), max - view.permanent - view.active_reservations);
            }
        }
    }
}
