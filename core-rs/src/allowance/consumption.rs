//! Buffered allowance debits
//!
//! The first charge against a key snapshots the stored allowance, already
//! accrued to `now`. Later charges against the same key in the same check (or
//! batch) draw from that snapshot, so cumulative debits are bounded by a
//! single balance read.

use super::{AllowanceKey, AllowanceStore};
use serde::Serialize;
use tracing::{debug, info};

/// Pending debit against one allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumption {
    pub key: AllowanceKey,
    /// Refill-adjusted balance at the time of the first charge
    pub balance: u128,
    pub consumed: u128,
    /// Refill timestamp matching `balance`
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consumptions {
    entries: Vec<Consumption>,
}

impl Consumptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `amount` from `key`
    ///
    /// # Returns
    /// false, leaving the buffer unchanged, when the total reserved against
    /// `key` would exceed its available balance
    pub fn charge<S: AllowanceStore + ?Sized>(
        &mut self,
        store: &S,
        key: AllowanceKey,
        amount: u128,
        now: u64,
    ) -> bool {
        let position = match self.entries.iter().position(|e| e.key == key) {
            Some(position) => position,
            None => {
                let (balance, timestamp) = store.get_or_default(&key).accrue(now);
                self.entries.push(Consumption {
                    key,
                    balance,
                    consumed: 0,
                    timestamp,
                });
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[position];
        match entry.consumed.checked_add(amount) {
            Some(total) if total <= entry.balance => {
                entry.consumed = total;
                true
            }
            _ => {
                debug!(key = %key, amount, available = entry.balance - entry.consumed, "allowance exceeded");
                false
            }
        }
    }

    /// Amount still available on `key` after pending debits, if it was charged
    pub fn remaining(&self, key: &AllowanceKey) -> Option<u128> {
        self.entries
            .iter()
            .find(|e| e.key == *key)
            .map(|e| e.balance - e.consumed)
    }

    /// Write every pending debit back to `store`
    pub fn commit<S: AllowanceStore + ?Sized>(self, store: &mut S) {
        for entry in self.entries {
            let mut allowance = store.get_or_default(&entry.key);
            allowance.balance = entry.balance - entry.consumed;
            allowance.refill_timestamp = entry.timestamp;
            store.set(entry.key, allowance);
            info!(
                key = %entry.key,
                consumed = entry.consumed,
                balance = allowance.balance,
                "allowance debited"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Consumption> {
        self.entries.iter()
    }
}
