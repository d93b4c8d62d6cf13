//! Allowance ledger
//!
//! Rate-limited counters keyed by a 32-byte allowance key. Refill accrues
//! lazily: nothing happens between checks, and every read computes the
//! balance the counter would have at `now`.
//!
//! Evaluation never writes the store directly. Debits are collected in a
//! [`Consumptions`] buffer and committed once, after the whole check (or
//! batch) has been allowed.

pub mod consumption;

pub use consumption::{Consumption, Consumptions};

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Allowance identifier, carried in an allowance operator's compValue
pub type AllowanceKey = B256;

/// Derive an allowance key from a label, by the same rule as role keys
pub fn allowance_key(label: &str) -> AllowanceKey {
    crate::roles::role_key(label)
}

/// One refillable, optionally capped counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Allowance {
    pub balance: u128,
    /// Cap applied by refills; 0 means uncapped
    pub max_balance: u128,
    pub refill_amount: u128,
    /// Seconds between refills; 0 disables refilling
    pub refill_interval: u64,
    /// Last instant refill was accounted for
    pub refill_timestamp: u64,
}

impl Allowance {
    /// Balance and refill timestamp once every whole elapsed interval is applied
    ///
    /// A balance already above the cap (set by an administrator) is left
    /// untouched rather than clipped.
    pub fn accrue(&self, now: u64) -> (u128, u64) {
        if self.refill_interval == 0 || now < self.refill_timestamp {
            return (self.balance, self.refill_timestamp);
        }

        let intervals = (now - self.refill_timestamp) / self.refill_interval;
        if intervals == 0 {
            return (self.balance, self.refill_timestamp);
        }

        let refill = u128::from(intervals).saturating_mul(self.refill_amount);
        let balance = match self.max_balance {
            0 => self.balance.saturating_add(refill),
            cap if self.balance >= cap => self.balance,
            cap => self.balance.saturating_add(refill).min(cap),
        };
        let timestamp = self
            .refill_timestamp
            .saturating_add(intervals.saturating_mul(self.refill_interval));

        (balance, timestamp)
    }

    /// Refill-adjusted balance at `now`
    pub fn available_balance(&self, now: u64) -> u128 {
        self.accrue(now).0
    }

    /// Materialize accrued refill, then debit `amount`
    ///
    /// # Returns
    /// false (and no mutation) when `amount` exceeds the available balance
    pub fn consume(&mut self, amount: u128, now: u64) -> bool {
        let (balance, timestamp) = self.accrue(now);
        if amount > balance {
            return false;
        }
        self.balance = balance - amount;
        self.refill_timestamp = timestamp;
        true
    }
}

/// Key-value backing store for allowances
///
/// A missing key reads as an all-zero allowance.
pub trait AllowanceStore {
    fn get(&self, key: &AllowanceKey) -> Option<Allowance>;

    fn set(&mut self, key: AllowanceKey, allowance: Allowance);

    fn get_or_default(&self, key: &AllowanceKey) -> Allowance {
        self.get(key).unwrap_or_default()
    }
}

/// In-process allowance store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    entries: HashMap<AllowanceKey, Allowance>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AllowanceKey, &Allowance)> {
        self.entries.iter()
    }
}

impl AllowanceStore for MemoryLedger {
    fn get(&self, key: &AllowanceKey) -> Option<Allowance> {
        self.entries.get(key).copied()
    }

    fn set(&mut self, key: AllowanceKey, allowance: Allowance) {
        self.entries.insert(key, allowance);
    }
}
