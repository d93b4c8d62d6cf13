//! Permission engine
//!
//! Ties the pieces together for the two external surfaces:
//!
//! - configuration: `submit_tree` validates a condition array, packs it and
//!   stores it as a role's function scope
//! - evaluation: `check` / `check_batch` resolve clearance, unpack the stored
//!   tree, decode the call data against it and evaluate every operator
//!
//! The clock is read once per check (or batch). Allowance debits are buffered
//! for the whole check and committed only when the verdict is "allowed".

use crate::allowance::{Allowance, AllowanceKey, AllowanceStore, Consumptions, MemoryLedger};
use crate::checker::{CallContext, CustomCondition, CustomRegistry, Evaluator, Status, Violation};
use crate::condition::{hex_bytes, ConditionNode, Operator};
use crate::config::EngineConfig;
use crate::decoder::inspect;
use crate::errors::Result;
use crate::packer::{pack, unpack_with_max_nodes};
use crate::roles::{Authorization, ExecutionOptions, Operation, RoleKey, RoleRegistry};
use crate::topology::ConditionTree;
use alloy_primitives::{Address, Selector, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Source of the current time, in seconds
pub trait Clock {
    fn now(&self) -> u64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Manually driven time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedClock {
    now: u64,
}

impl FixedClock {
    pub fn new(now: u64) -> Self {
        FixedClock { now }
    }

    pub fn set(&mut self, now: u64) {
        self.now = now;
    }

    pub fn advance(&mut self, seconds: u64) {
        self.now = self.now.saturating_add(seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.now
    }
}

/// One call a role member wants to make
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub target: Address,
    #[serde(default)]
    pub value: U256,
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default = "default_operation")]
    pub operation: Operation,
}

fn default_operation() -> Operation {
    Operation::Call
}

impl Call {
    pub fn new(target: Address, data: impl Into<Vec<u8>>) -> Self {
        Call {
            target,
            value: U256::ZERO,
            data: data.into(),
            operation: Operation::Call,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn delegate(mut self) -> Self {
        self.operation = Operation::DelegateCall;
        self
    }
}

/// Result of one permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub allowed: bool,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violating_node: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
}

impl Verdict {
    pub fn allowed() -> Self {
        Verdict {
            allowed: true,
            status: Status::Ok,
            violating_node: None,
            operator: None,
        }
    }

    pub fn denied(status: Status) -> Self {
        Verdict {
            allowed: false,
            status,
            violating_node: None,
            operator: None,
        }
    }
}

impl From<Violation> for Verdict {
    fn from(violation: Violation) -> Self {
        Verdict {
            allowed: false,
            status: violation.status,
            violating_node: Some(violation.node),
            operator: Some(violation.operator),
        }
    }
}

/// Result of an all-or-nothing batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVerdict {
    pub allowed: bool,
    /// Index of the first denied call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_index: Option<usize>,
    /// Verdicts up to and including the first denied call
    pub verdicts: Vec<Verdict>,
}

pub struct PermissionEngine<S: AllowanceStore = MemoryLedger, C: Clock = SystemClock> {
    config: EngineConfig,
    roles: RoleRegistry,
    store: S,
    clock: C,
    customs: CustomRegistry,
}

impl PermissionEngine<MemoryLedger, SystemClock> {
    /// Engine with an in-memory ledger and the system clock
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(config, MemoryLedger::new(), SystemClock)
    }
}

impl<S: AllowanceStore, C: Clock> PermissionEngine<S, C> {
    pub fn with_parts(config: EngineConfig, store: S, clock: C) -> Self {
        PermissionEngine {
            config,
            roles: RoleRegistry::new(),
            store,
            clock,
            customs: CustomRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    /// Direct clearance management (allow/scope/revoke target and function)
    pub fn roles_mut(&mut self) -> &mut RoleRegistry {
        &mut self.roles
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Register the checker a `Custom` operator addresses
    pub fn register_custom(&mut self, address: Address, checker: Arc<dyn CustomCondition>) {
        self.customs.register(address, checker);
    }

    /// Validate, pack and store a condition tree as a function scope
    ///
    /// # Arguments
    /// * `role` - Role receiving the scope
    /// * `target` - Contract address
    /// * `selector` - Function selector
    /// * `nodes` - Flattened breadth-first condition array
    /// * `options` - Value transfer / delegatecall options
    ///
    /// # Returns
    /// The packed blob now stored for the function. Nothing is stored when
    /// validation fails.
    pub fn submit_tree(
        &mut self,
        role: RoleKey,
        target: Address,
        selector: Selector,
        nodes: Vec<ConditionNode>,
        options: ExecutionOptions,
    ) -> Result<Vec<u8>> {
        let tree = ConditionTree::with_limits(
            nodes,
            self.config.max_condition_nodes,
            self.config.decoder.max_depth,
        )?;
        let packed = pack(&tree);
        debug!(role = %role, target = %target, selector = %selector, nodes = tree.len(), "condition tree stored");
        self.roles
            .scope_function(role, target, selector, packed.clone(), options);
        Ok(packed)
    }

    /// Check one call, committing its allowance debits if allowed
    ///
    /// # Errors
    /// Only for stored conditions that can no longer be unpacked; every
    /// permission outcome is a [`Verdict`].
    pub fn check(&mut self, role: &RoleKey, caller: Address, call: &Call) -> Result<Verdict> {
        let now = self.clock.now();
        let mut consumptions = Consumptions::new();
        let verdict = self.evaluate(role, caller, call, now, &mut consumptions)?;

        if verdict.allowed {
            consumptions.commit(&mut self.store);
        }
        Ok(verdict)
    }

    /// Check calls as one unit
    ///
    /// Later calls see the pending debits of earlier ones. Debits are
    /// committed only if every call is allowed; otherwise nothing persists.
    pub fn check_batch(&mut self, role: &RoleKey, caller: Address, calls: &[Call]) -> Result<BatchVerdict> {
        let now = self.clock.now();
        let mut consumptions = Consumptions::new();
        let mut verdicts = Vec::with_capacity(calls.len());

        for (index, call) in calls.iter().enumerate() {
            let verdict = self.evaluate(role, caller, call, now, &mut consumptions)?;
            verdicts.push(verdict);
            if !verdict.allowed {
                debug!(index, status = %verdict.status, "batch denied");
                return Ok(BatchVerdict {
                    allowed: false,
                    failed_index: Some(index),
                    verdicts,
                });
            }
        }

        consumptions.commit(&mut self.store);
        Ok(BatchVerdict {
            allowed: true,
            failed_index: None,
            verdicts,
        })
    }

    fn evaluate(
        &self,
        role: &RoleKey,
        caller: Address,
        call: &Call,
        now: u64,
        consumptions: &mut Consumptions,
    ) -> Result<Verdict> {
        let Some(entry) = self.roles.role(role) else {
            debug!(role = %role, "unknown role");
            return Ok(Verdict::denied(Status::TargetAddressNotAllowed));
        };

        let packed = match entry.authorize(call.target, call.value, call.operation, &call.data) {
            Ok(Authorization::Unconditional) => return Ok(Verdict::allowed()),
            Ok(Authorization::Conditional(packed)) => packed,
            Err(status) => {
                debug!(role = %role, target = %call.target, %status, "clearance denied");
                return Ok(Verdict::denied(status));
            }
        };

        let tree = unpack_with_max_nodes(packed, self.config.max_condition_nodes)?;
        let payload = inspect(&call.data, &tree, &self.config.decoder);
        let context = CallContext {
            caller,
            avatar: self.config.avatar,
            target: call.target,
            value: call.value,
            operation: call.operation,
            data: &call.data,
            now,
        };

        let evaluator = Evaluator::new(&tree, &payload, &context, &self.store, &self.customs);
        let verdict = match evaluator.evaluate(consumptions) {
            Ok(()) => Verdict::allowed(),
            Err(violation) => Verdict::from(violation),
        };
        debug!(role = %role, target = %call.target, allowed = verdict.allowed, status = %verdict.status, "checked call");
        Ok(verdict)
    }

    /// Stored allowance, without refill applied
    pub fn get_allowance(&self, key: &AllowanceKey) -> Option<Allowance> {
        self.store.get(key)
    }

    /// Store an allowance as given
    ///
    /// `max_balance` caps refills only. A balance set above it is kept and
    /// spent down normally; refill resumes once it drops below the cap.
    pub fn set_allowance(&mut self, key: AllowanceKey, allowance: Allowance) {
        debug!(key = %key, balance = allowance.balance, "allowance set");
        self.store.set(key, allowance);
    }

    /// Refill-adjusted balance at the engine's current time
    pub fn available_balance(&self, key: &AllowanceKey) -> u128 {
        self.store.get_or_default(key).available_balance(self.clock.now())
    }
}
