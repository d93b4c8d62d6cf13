//! # Roles Core - calldata permission engine
//!
//! Decides whether a role member may make a contract call, given the target,
//! the function selector and a tree of conditions over the call's
//! ABI-encoded arguments.
//!
//! ## Core Principle
//!
//! **Validate once, decode defensively**: condition trees are rejected at
//! configuration time if they are malformed, stored in a compact checksummed
//! form, and at check time every read from untrusted call data is bounds
//! checked. A decode failure is data (an overflow flag), never a panic.
//!
//! ## Architecture
//!
//! ```text
//!  condition array ──► integrity + topology ──► pack ──► role scope
//!                                                            │
//!  call data ──► clearance ──► unpack ──► inspect ──► evaluate ──► verdict
//!                                                        │
//!                                            allowance consumptions
//!                                          (committed only if allowed)
//! ```

pub mod allowance;
pub mod checker;
pub mod condition;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod errors;
pub mod packer;
pub mod roles;
pub mod topology;

pub use allowance::{allowance_key, Allowance, AllowanceKey, AllowanceStore, Consumptions, MemoryLedger};
pub use checker::{CallContext, CustomCondition, CustomInput, CustomRegistry, Evaluator, Status, Violation};
pub use condition::{ConditionNode, Operator, ParameterType};
pub use config::{function_selector, EngineConfig, PolicyFile};
pub use decoder::{inspect, pluck, DecodedNode, DecoderLimits, Payload};
pub use engine::{BatchVerdict, Call, Clock, FixedClock, PermissionEngine, SystemClock, Verdict};
pub use errors::{ConfigError, DecodeError, PackError, RolesError};
pub use packer::{pack, unpack, PACK_VERSION};
pub use roles::{role_key, ExecutionOptions, Operation, RoleKey, RoleRegistry};
pub use topology::{ConditionTree, Encoding, Topology, TypeTreeNode};

/// Version of the roles core
pub const VERSION: &str = "2.0.0";
