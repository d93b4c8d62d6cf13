//! Role clearances
//!
//! Each role holds a clearance per target address. `Target` clearance allows
//! any call to the target; `Function` clearance allows only the selectors
//! scoped on it, either unconditionally (wildcarded) or behind a packed
//! condition tree.

use crate::checker::Status;
use alloy_primitives::{keccak256, Address, Selector, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Role identifier
pub type RoleKey = B256;

/// Derive a role key from a label
///
/// A 32-byte hex label is taken as-is; anything else is hashed.
pub fn role_key(label: &str) -> RoleKey {
    match crate::condition::hex_bytes::decode(label) {
        Ok(bytes) if bytes.len() == 32 => B256::from_slice(&bytes),
        _ => keccak256(label.as_bytes()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Call = 0,
    DelegateCall = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionOptions {
    #[default]
    None,
    Send,
    DelegateCall,
    Both,
}

impl ExecutionOptions {
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Send | Self::Both)
    }

    pub fn can_delegate_call(&self) -> bool {
        matches!(self, Self::DelegateCall | Self::Both)
    }

    /// Check value transfer and call kind against these options
    pub fn permits(&self, value: U256, operation: Operation) -> Result<(), Status> {
        if !value.is_zero() && !self.can_send() {
            return Err(Status::SendNotAllowed);
        }
        if operation == Operation::DelegateCall && !self.can_delegate_call() {
            return Err(Status::DelegateCallNotAllowed);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Clearance {
    #[default]
    None,
    Target,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetAccess {
    pub clearance: Clearance,
    pub options: ExecutionOptions,
}

/// Permission on one (target, selector) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionScope {
    pub options: ExecutionOptions,
    pub wildcarded: bool,
    /// Packed condition tree; empty when wildcarded
    pub conditions: Vec<u8>,
}

/// What a call must still satisfy once clearance is established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization<'a> {
    Unconditional,
    Conditional(&'a [u8]),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Role {
    targets: HashMap<Address, TargetAccess>,
    functions: HashMap<(Address, Selector), FunctionScope>,
}

impl Role {
    pub fn target(&self, target: &Address) -> Option<&TargetAccess> {
        self.targets.get(target)
    }

    pub fn function(&self, target: &Address, selector: &Selector) -> Option<&FunctionScope> {
        self.functions.get(&(*target, *selector))
    }

    /// Resolve clearance for one call
    ///
    /// # Returns
    /// What remains to be checked, or the status denying the call outright
    pub fn authorize(
        &self,
        target: Address,
        value: U256,
        operation: Operation,
        data: &[u8],
    ) -> Result<Authorization<'_>, Status> {
        let selector = selector_of(data)?;

        let access = self
            .targets
            .get(&target)
            .filter(|a| a.clearance != Clearance::None)
            .ok_or(Status::TargetAddressNotAllowed)?;

        match access.clearance {
            Clearance::Target => {
                access.options.permits(value, operation)?;
                Ok(Authorization::Unconditional)
            }
            Clearance::Function => {
                let scope = self
                    .functions
                    .get(&(target, selector))
                    .ok_or(Status::FunctionNotAllowed)?;
                scope.options.permits(value, operation)?;
                match scope.wildcarded {
                    true => Ok(Authorization::Unconditional),
                    false => Ok(Authorization::Conditional(&scope.conditions)),
                }
            }
            Clearance::None => Err(Status::TargetAddressNotAllowed),
        }
    }
}

/// First four bytes of the call data; empty data selects the zero selector
pub fn selector_of(data: &[u8]) -> Result<Selector, Status> {
    match data.len() {
        0 => Ok(Selector::ZERO),
        1..=3 => Err(Status::FunctionSignatureTooShort),
        _ => Ok(Selector::from_slice(&data[..4])),
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: HashMap<RoleKey, Role>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self, key: &RoleKey) -> Option<&Role> {
        self.roles.get(key)
    }

    pub fn contains(&self, key: &RoleKey) -> bool {
        self.roles.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RoleKey> {
        self.roles.keys()
    }

    /// Allow every call to `target`
    pub fn allow_target(&mut self, role: RoleKey, target: Address, options: ExecutionOptions) {
        debug!(role = %role, target = %target, ?options, "allow target");
        self.roles.entry(role).or_default().targets.insert(
            target,
            TargetAccess {
                clearance: Clearance::Target,
                options,
            },
        );
    }

    /// Restrict `target` to its scoped functions
    pub fn scope_target(&mut self, role: RoleKey, target: Address) {
        debug!(role = %role, target = %target, "scope target");
        self.roles.entry(role).or_default().targets.insert(
            target,
            TargetAccess {
                clearance: Clearance::Function,
                options: ExecutionOptions::None,
            },
        );
    }

    pub fn revoke_target(&mut self, role: RoleKey, target: Address) {
        debug!(role = %role, target = %target, "revoke target");
        if let Some(entry) = self.roles.get_mut(&role) {
            entry.targets.remove(&target);
        }
    }

    /// Allow `selector` on `target` without conditions
    pub fn allow_function(&mut self, role: RoleKey, target: Address, selector: Selector, options: ExecutionOptions) {
        debug!(role = %role, target = %target, selector = %selector, "allow function");
        self.roles.entry(role).or_default().functions.insert(
            (target, selector),
            FunctionScope {
                options,
                wildcarded: true,
                conditions: Vec::new(),
            },
        );
    }

    /// Allow `selector` on `target` behind a packed condition tree
    pub fn scope_function(
        &mut self,
        role: RoleKey,
        target: Address,
        selector: Selector,
        conditions: Vec<u8>,
        options: ExecutionOptions,
    ) {
        debug!(role = %role, target = %target, selector = %selector, bytes = conditions.len(), "scope function");
        self.roles.entry(role).or_default().functions.insert(
            (target, selector),
            FunctionScope {
                options,
                wildcarded: false,
                conditions,
            },
        );
    }

    pub fn revoke_function(&mut self, role: RoleKey, target: Address, selector: Selector) {
        debug!(role = %role, target = %target, selector = %selector, "revoke function");
        if let Some(entry) = self.roles.get_mut(&role) {
            entry.functions.remove(&(target, selector));
        }
    }
}
