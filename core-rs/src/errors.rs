//! Error types for the roles core
//!
//! Configuration problems are rejected at write time and never persisted.
//! Decode overflows and permission violations are not errors here: they are
//! reported as data (`DecodedNode::overflow`, `Verdict`) so a failing variant
//! branch is an ordinary value rather than an early return.

use thiserror::Error;

/// Rejection reasons for a submitted condition tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("condition tree has no root node")]
    NoRootNode,

    #[error("condition tree has more than one root node")]
    TooManyRootNodes,

    #[error("condition tree is not in breadth-first order")]
    NotBreadthFirst,

    #[error("condition tree exceeds {0} nodes")]
    TooManyNodes(usize),

    #[error("condition tree nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("root node must describe an encoded buffer or carry no structure")]
    UnsuitableRootNode,

    #[error("unsuitable parameter type at node {0}")]
    UnsuitableParameterType(usize),

    #[error("unsuitable compValue at node {0}")]
    UnsuitableCompValue(usize),

    #[error("unsupported operator at node {0}")]
    UnsupportedOperator(usize),

    #[error("unsuitable child count at node {0}")]
    UnsuitableChildCount(usize),

    #[error("incompatible child type trees at node {0}")]
    UnsuitableSubTypeTree(usize),
}

/// Failures reading a packed condition blob back from storage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error("packed conditions truncated at byte {0}")]
    Truncated(usize),

    #[error("unsupported packing version {0}")]
    UnsupportedVersion(u8),

    #[error("packed conditions checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid node word {index}: {reason}")]
    InvalidWord { index: usize, reason: String },

    #[error("{0} trailing bytes after packed conditions")]
    TrailingBytes(usize),

    #[error("stored conditions fail validation: {0}")]
    Invalid(#[from] ConfigError),
}

/// Slice extraction past the end of a buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("slice {location}+{size} exceeds buffer of {length} bytes")]
    OutOfBounds {
        location: usize,
        size: usize,
        length: usize,
    },
}

#[derive(Error, Debug)]
pub enum RolesError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Pack(#[from] PackError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hex error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Regex error: {0}")]
    RegexError(String),
}

impl From<regex::Error> for RolesError {
    fn from(err: regex::Error) -> Self {
        RolesError::RegexError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RolesError>;
