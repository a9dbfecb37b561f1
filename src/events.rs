//! Engine events
//!
//! Emitted on a bounded channel after each state transition. Emission never blocks the
//! critical section: a full channel drops the event with a warning.

use crate::types::*;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Rolled {
        roll_hash: Hash,
        user: Address,
        slot: SlotKey,
        expires_at: u64,
    },
    Rerolled {
        previous: Hash,
        roll_hash: Hash,
        user: Address,
        slot: SlotKey,
        rerolls_used: u8,
    },
    Assigned {
        roll_hash: Hash,
        user: Address,
        slot: SlotKey,
        token_ref: TokenId,
    },
    /// Reservation reclaimed by the sweeper; `coupon` is set when a roll was retired with it
    Expired {
        roll_hash: Hash,
        slot: SlotKey,
        coupon: Option<CouponRef>,
    },
    CounterRepaired(CounterRepair),
}

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!("Event channel full, dropped {:?}", event),
            Err(TrySendError::Closed(_)) => trace!("Event channel closed"),
        }
    }
}
