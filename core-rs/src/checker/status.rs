//! Check outcomes

use crate::condition::Operator;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome code of a permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Ok,
    /// Role may not delegatecall the target
    DelegateCallNotAllowed,
    /// Role has no clearance on the target
    TargetAddressNotAllowed,
    /// Target is function-scoped and the selector is not allowed
    FunctionNotAllowed,
    /// Role may not send value to the target
    SendNotAllowed,
    OrViolation,
    NorViolation,
    XorViolation,
    ParameterNotAllowed,
    ParameterLessThanAllowed,
    ParameterGreaterThanAllowed,
    ParameterNotAMatch,
    NotEveryArrayElementPasses,
    NoArrayElementPasses,
    ParameterNotSubsetOfAllowed,
    BitmaskOverflow,
    BitmaskNotAllowed,
    CustomConditionViolation,
    AllowanceExceeded,
    CallAllowanceExceeded,
    EtherAllowanceExceeded,
    /// A value the conditions inspect could not be decoded from the buffer
    CalldataOverflow,
    /// Call data is non-empty but shorter than a selector
    FunctionSignatureTooShort,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        *self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// First failing condition of a denied check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub status: Status,
    /// Index of the condition node in its tree
    pub node: usize,
    pub operator: Operator,
}

impl Violation {
    pub fn new(status: Status, node: usize, operator: Operator) -> Self {
        Violation { status, node, operator }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at node {} ({})", self.status, self.node, self.operator)
    }
}
