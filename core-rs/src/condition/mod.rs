//! Condition tree model
//!
//! A permission specification is a flattened, breadth-first list of
//! [`ConditionNode`]s. Every node points at its parent by index; the root is
//! the single node whose parent is its own index (always 0).
//!
//! ```text
//! 0: Calldata / Matches            (root, parent 0)
//! ├── 1: Static  / EqualTo 0x..    (parent 0)
//! └── 2: None    / Or              (parent 0)
//!     ├── 3: Static / LessThan     (parent 2)
//!     └── 4: Static / EqualTo      (parent 2)
//! ```

pub mod integrity;

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of one encoded word in the parameter buffer
pub const WORD: usize = 32;

/// Leading bytes skipped before a `Calldata` payload (the function selector)
pub const SELECTOR_LENGTH: u16 = 4;

/// How a node's value is laid out in the encoded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ParameterType {
    /// No value of its own (logical combinators, call-level allowances)
    None = 0,
    /// One inlined word
    Static = 1,
    /// Length-prefixed, padded byte string reached through an offset
    Dynamic = 2,
    /// Ordered fields, inlined when every field is statically sized
    Tuple = 3,
    /// Element count followed by elements
    Array = 4,
    /// Embedded buffer preceded by a 4-byte selector
    Calldata = 5,
    /// Embedded buffer with a configurable number of leading bytes
    AbiEncoded = 6,
    /// The call's value-transfer amount, not read from the buffer
    EtherValue = 7,
}

impl ParameterType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Static),
            2 => Some(Self::Dynamic),
            3 => Some(Self::Tuple),
            4 => Some(Self::Array),
            5 => Some(Self::Calldata),
            6 => Some(Self::AbiEncoded),
            7 => Some(Self::EtherValue),
            _ => None,
        }
    }

    /// Types that never have children
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Static | Self::Dynamic | Self::EtherValue)
    }

    /// Types whose children describe their content
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Tuple | Self::Array | Self::Calldata | Self::AbiEncoded)
    }

    /// Types that occupy space in the encoded buffer
    pub fn is_encoded(&self) -> bool {
        !matches!(self, Self::None | Self::EtherValue)
    }
}

/// Per-node rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Operator {
    Pass = 0,
    And = 1,
    Or = 2,
    Nor = 3,
    Xor = 4,
    Matches = 5,
    ArraySome = 6,
    ArrayEvery = 7,
    ArraySubset = 8,
    EqualToAvatar = 15,
    EqualTo = 16,
    GreaterThan = 17,
    LessThan = 18,
    SignedIntGreaterThan = 19,
    SignedIntLessThan = 20,
    Bitmask = 21,
    Custom = 22,
    EqualToCaller = 23,
    WithinAllowance = 28,
    EtherWithinAllowance = 29,
    CallWithinAllowance = 30,
}

impl Operator {
    pub fn from_u8(tag: u8) -> Option<Self> {
        let op = match tag {
            0 => Self::Pass,
            1 => Self::And,
            2 => Self::Or,
            3 => Self::Nor,
            4 => Self::Xor,
            5 => Self::Matches,
            6 => Self::ArraySome,
            7 => Self::ArrayEvery,
            8 => Self::ArraySubset,
            15 => Self::EqualToAvatar,
            16 => Self::EqualTo,
            17 => Self::GreaterThan,
            18 => Self::LessThan,
            19 => Self::SignedIntGreaterThan,
            20 => Self::SignedIntLessThan,
            21 => Self::Bitmask,
            22 => Self::Custom,
            23 => Self::EqualToCaller,
            28 => Self::WithinAllowance,
            29 => Self::EtherWithinAllowance,
            30 => Self::CallWithinAllowance,
            _ => return None,
        };
        Some(op)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Nor | Self::Xor)
    }

    pub fn is_array_quantifier(&self) -> bool {
        matches!(self, Self::ArraySome | Self::ArrayEvery | Self::ArraySubset)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::EqualToAvatar
                | Self::EqualTo
                | Self::GreaterThan
                | Self::LessThan
                | Self::SignedIntGreaterThan
                | Self::SignedIntLessThan
                | Self::Bitmask
                | Self::Custom
                | Self::EqualToCaller
        )
    }

    pub fn is_allowance(&self) -> bool {
        matches!(
            self,
            Self::WithinAllowance | Self::EtherWithinAllowance | Self::CallWithinAllowance
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One author-supplied node of a condition tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionNode {
    /// Index of the parent in the same flattened array (root: 0)
    pub parent: u16,
    pub param_type: ParameterType,
    pub operator: Operator,
    /// Operator-dependent comparison payload
    #[serde(default, with = "hex_bytes", skip_serializing_if = "Vec::is_empty")]
    pub comp_value: Vec<u8>,
}

impl ConditionNode {
    pub fn new(parent: u16, param_type: ParameterType, operator: Operator) -> Self {
        ConditionNode {
            parent,
            param_type,
            operator,
            comp_value: Vec::new(),
        }
    }

    pub fn with_comp_value(mut self, comp_value: impl Into<Vec<u8>>) -> Self {
        self.comp_value = comp_value.into();
        self
    }

    /// Bytes to skip before an embedded buffer's payload
    pub fn leading_bytes(&self) -> u16 {
        match self.param_type {
            ParameterType::Calldata => SELECTOR_LENGTH,
            ParameterType::AbiEncoded if self.comp_value.len() == 2 => {
                u16::from_be_bytes([self.comp_value[0], self.comp_value[1]])
            }
            _ => 0,
        }
    }
}

/// Storage form of a compValue
///
/// `EqualTo` payloads wider than one word are replaced by their keccak256
/// content hash. Evaluation applies the same rule to the decoded value, so
/// the comparison stays consistent whether or not the tree went through
/// storage.
pub fn compress_comp_value(operator: Operator, comp_value: &[u8]) -> Vec<u8> {
    if operator == Operator::EqualTo && comp_value.len() > WORD {
        keccak256(comp_value).to_vec()
    } else {
        comp_value.to_vec()
    }
}

/// `0x`-prefixed hex (de)serialization for byte payloads
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        decode(&raw).map_err(serde::de::Error::custom)
    }

    /// Decode a hex string with or without the `0x` prefix
    pub fn decode(raw: &str) -> Result<Vec<u8>, hex::FromHexError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        hex::decode(digits)
    }
}
