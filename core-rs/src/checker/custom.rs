//! Externally registered condition checkers
//!
//! A `Custom` node's compValue names a checker by 20-byte address and carries
//! 12 bytes of checker-defined data. The checker's answer is final.

use crate::roles::Operation;
use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything a custom checker sees about the value under test
#[derive(Debug, Clone, Copy)]
pub struct CustomInput<'a> {
    /// Encoded value of the node (the call value word for `EtherValue`)
    pub value: &'a [u8],
    /// Trailing 12 bytes of the compValue
    pub extra: &'a [u8],
    pub caller: Address,
    pub target: Address,
    pub ether_value: U256,
    pub operation: Operation,
    /// Whole call data the value was decoded from
    pub data: &'a [u8],
    pub location: usize,
    pub size: usize,
}

pub trait CustomCondition: Send + Sync {
    fn check(&self, input: &CustomInput<'_>) -> bool;
}

impl<F> CustomCondition for F
where
    F: Fn(&CustomInput<'_>) -> bool + Send + Sync,
{
    fn check(&self, input: &CustomInput<'_>) -> bool {
        self(input)
    }
}

#[derive(Clone, Default)]
pub struct CustomRegistry {
    checkers: HashMap<Address, Arc<dyn CustomCondition>>,
}

impl CustomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `checker` under `address`, replacing any previous one
    pub fn register(&mut self, address: Address, checker: Arc<dyn CustomCondition>) {
        self.checkers.insert(address, checker);
    }

    pub fn get(&self, address: &Address) -> Option<&Arc<dyn CustomCondition>> {
        self.checkers.get(address)
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

impl fmt::Debug for CustomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.checkers.keys()).finish()
    }
}
