/**
 * policy.rs
 * Parser for policy documents (YAML format)
 *
 * Format:
 * ```yaml
 * apiVersion: roles/v1
 * kind: Policy
 * metadata:
 *   name: treasury
 * engine:
 *   avatar: "0x00000000000000000000000000000000000000aa"
 * roles:
 *   - key: manager
 *     targets:
 *       - address: "0x0000000000000000000000000000000000000001"
 *         clearance: function
 *         functions:
 *           - signature: transfer(address,uint256)
 *             conditions:
 *               - { parent: 0, paramType: calldata, operator: matches }
 *               - { parent: 0, paramType: static, operator: pass }
 *               - { parent: 0, paramType: static, operator: withinAllowance, compValue: "0x…" }
 * allowances:
 *   monthly-budget:
 *     balance: 1000
 *     refillAmount: 1000
 *     refillInterval: 2592000
 * ```
 *
 * Role and allowance keys are labels: a 32-byte hex label is used as-is,
 * anything else is hashed with keccak256.
 */

use crate::allowance::{allowance_key, Allowance, AllowanceStore, MemoryLedger};
use crate::condition::{hex_bytes, ConditionNode};
use crate::config::EngineConfig;
use crate::engine::{Clock, PermissionEngine};
use crate::errors::{Result, RolesError};
use crate::roles::{role_key, Clearance, ExecutionOptions};
use crate::topology::ConditionTree;
use alloy_primitives::{keccak256, Address, Selector};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::info;

pub const POLICY_API_VERSION: &str = "roles/v1";
pub const POLICY_KIND: &str = "Policy";

const SIGNATURE_PATTERN: &str = r"^[A-Za-z_$][A-Za-z0-9_$]*\([A-Za-z0-9_,\[\]()]*\)$";

/// Policy document structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFile {
    pub api_version: String,
    pub kind: String,
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub roles: Vec<RoleEntry>,
    /// Allowances seeded into the ledger, by label
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allowances: BTreeMap<String, Allowance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleEntry {
    pub key: String,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetEntry {
    pub address: Address,
    pub clearance: Clearance,
    /// Options for `target` clearance; function entries carry their own
    #[serde(default)]
    pub options: ExecutionOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionEntry>,
}

/// One function scope, addressed by raw selector or by signature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub options: ExecutionOptions,
    #[serde(default)]
    pub wildcarded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionNode>,
}

impl FunctionEntry {
    /// Resolve the entry's selector
    pub fn selector(&self) -> Result<Selector> {
        match (&self.selector, &self.signature) {
            (Some(raw), None) => {
                let bytes = hex_bytes::decode(raw)?;
                if bytes.len() != 4 {
                    return Err(RolesError::InvalidSelector(raw.clone()));
                }
                Ok(Selector::from_slice(&bytes))
            }
            (None, Some(signature)) => function_selector(signature),
            _ => Err(RolesError::InvalidSelector(
                "exactly one of selector or signature is required".to_string(),
            )),
        }
    }
}

/// First four bytes of keccak256 over a canonical function signature
///
/// # Arguments
/// * `signature` - e.g. `transfer(address,uint256)`, no spaces
pub fn function_selector(signature: &str) -> Result<Selector> {
    let pattern = Regex::new(SIGNATURE_PATTERN)?;
    if !pattern.is_match(signature) {
        return Err(RolesError::InvalidSelector(signature.to_string()));
    }
    let hash = keccak256(signature.as_bytes());
    Ok(Selector::from_slice(&hash[..4]))
}

impl PolicyFile {
    /// Load a policy document from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the policy file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let policy: PolicyFile = serde_yaml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Validate document structure and every condition tree in it
    ///
    /// Ensures:
    /// - apiVersion is "roles/v1" and kind is "Policy"
    /// - role keys are non-empty and unique
    /// - every function resolves to a selector, is either wildcarded or
    ///   carries conditions, and its conditions form a valid tree
    pub fn validate(&self) -> Result<()> {
        if self.api_version != POLICY_API_VERSION {
            return Err(RolesError::InvalidPolicy(format!(
                "Invalid apiVersion: expected '{}', got '{}'",
                POLICY_API_VERSION, self.api_version
            )));
        }

        if self.kind != POLICY_KIND {
            return Err(RolesError::InvalidPolicy(format!(
                "Invalid kind: expected '{}', got '{}'",
                POLICY_KIND, self.kind
            )));
        }

        if self.metadata.name.is_empty() {
            return Err(RolesError::InvalidPolicy(
                "metadata.name cannot be empty".to_string(),
            ));
        }

        self.engine.validate()?;

        let mut seen = HashSet::new();
        for role in &self.roles {
            if role.key.is_empty() {
                return Err(RolesError::InvalidPolicy("role key cannot be empty".to_string()));
            }
            if !seen.insert(role_key(&role.key)) {
                return Err(RolesError::InvalidPolicy(format!(
                    "duplicate role '{}'",
                    role.key
                )));
            }
            for target in &role.targets {
                self.validate_target(role, target)?;
            }
        }

        if self.allowances.keys().any(|label| label.is_empty()) {
            return Err(RolesError::InvalidPolicy(
                "allowance key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_target(&self, role: &RoleEntry, target: &TargetEntry) -> Result<()> {
        if target.clearance != Clearance::Function && !target.functions.is_empty() {
            return Err(RolesError::InvalidPolicy(format!(
                "role '{}': functions listed on {} without function clearance",
                role.key, target.address
            )));
        }

        for function in &target.functions {
            let selector = function.selector()?;
            match (function.wildcarded, function.conditions.is_empty()) {
                (true, false) => {
                    return Err(RolesError::InvalidPolicy(format!(
                        "role '{}': {} on {} is wildcarded but has conditions",
                        role.key, selector, target.address
                    )))
                }
                (false, true) => {
                    return Err(RolesError::InvalidPolicy(format!(
                        "role '{}': {} on {} needs conditions or wildcarded: true",
                        role.key, selector, target.address
                    )))
                }
                (true, true) => {}
                (false, false) => {
                    ConditionTree::with_limits(
                        function.conditions.clone(),
                        self.engine.max_condition_nodes,
                        self.engine.decoder.max_depth,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Install every role, scope and allowance into `engine`
    pub fn apply<S: AllowanceStore, C: Clock>(&self, engine: &mut PermissionEngine<S, C>) -> Result<()> {
        let mut scoped = 0usize;

        for role in &self.roles {
            let key = role_key(&role.key);
            for target in &role.targets {
                match target.clearance {
                    Clearance::Target => engine.roles_mut().allow_target(key, target.address, target.options),
                    Clearance::Function => engine.roles_mut().scope_target(key, target.address),
                    Clearance::None => engine.roles_mut().revoke_target(key, target.address),
                }

                for function in &target.functions {
                    let selector = function.selector()?;
                    if function.wildcarded {
                        engine
                            .roles_mut()
                            .allow_function(key, target.address, selector, function.options);
                    } else {
                        engine.submit_tree(
                            key,
                            target.address,
                            selector,
                            function.conditions.clone(),
                            function.options,
                        )?;
                    }
                    scoped += 1;
                }
            }
        }

        for (label, allowance) in &self.allowances {
            engine.set_allowance(allowance_key(label), *allowance);
        }

        info!(
            policy = %self.metadata.name,
            roles = self.roles.len(),
            functions = scoped,
            allowances = self.allowances.len(),
            "policy applied"
        );
        Ok(())
    }

    /// Fresh in-memory engine holding this policy
    pub fn build_engine<C: Clock>(&self, clock: C) -> Result<PermissionEngine<MemoryLedger, C>> {
        let mut engine = PermissionEngine::with_parts(self.engine.clone(), MemoryLedger::new(), clock);
        self.apply(&mut engine)?;
        Ok(engine)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), yaml)?;
        Ok(())
    }
}
