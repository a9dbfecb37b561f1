//! Per-user nonce registry
//!
//! Each user has a counter starting at 0. A roll records the counter value current at
//! creation; the commitment for that roll must carry exactly that value, and a successful
//! verification advances the counter. Two signatures bound to the same nonce can
//! therefore confirm at most one state transition.

use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRegistry {
    counters: HashMap<Address, u64>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, user: &Address) -> u64 {
        self.counters.get(user).copied().unwrap_or(0)
    }

    /// Value the counter will hold after the next advance
    pub fn peek_next(&self, user: &Address) -> u64 {
        self.current(user) + 1
    }

    /// Advance and return the new value
    pub fn advance(&mut self, user: &Address) -> u64 {
        let counter = self.counters.entry(*user).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
