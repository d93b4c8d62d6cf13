//! Topology resolution for condition trees
//!
//! Computes, for every node of a validated breadth-first condition array:
//! whether it contributes to the decoded shape, where its children live,
//! whether its structural children agree on a shape, and two content-derived
//! hashes for cheap subtree comparison.
//!
//! Nodes are resolved children-first (reverse breadth-first order), so a
//! parent always sees finished child results.
//!
//! * `shape` is exact: two subtrees with equal shapes decode identically.
//!   Logical nodes over equally-shaped branches collapse to that shared
//!   shape; differing branches make the node a *variant*, which the decoder
//!   resolves by trying every branch.
//! * `signature` is what sibling compatibility is judged on. It matches
//!   `shape` except that every variant logical node has one canonical
//!   signature, whatever its branches.

pub mod tree;

use crate::condition::{ConditionNode, ParameterType};
use crate::errors::ConfigError;
use alloy_primitives::{keccak256, B256};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub use tree::{ConditionTree, LayoutNode};

/// Wire layout of a node as seen by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Encoding {
    None = 0,
    Static = 1,
    Dynamic = 2,
    Tuple = 3,
    Array = 4,
    AbiEncoded = 5,
    EtherValue = 6,
}

impl Encoding {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Static),
            2 => Some(Self::Dynamic),
            3 => Some(Self::Tuple),
            4 => Some(Self::Array),
            5 => Some(Self::AbiEncoded),
            6 => Some(Self::EtherValue),
            _ => None,
        }
    }

    /// Whether values of this encoding occupy space in the buffer
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::None | Self::EtherValue)
    }
}

/// Derived per-node shape, used to compare sibling subtrees and to size heads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeTreeNode {
    pub encoding: Encoding,
    /// Bytes to skip before an embedded buffer's payload
    pub leading_bytes: u16,
    /// True iff the encoded size is fixed and the value sits in the head
    pub inlined: bool,
}

impl TypeTreeNode {
    pub const fn new(encoding: Encoding, leading_bytes: u16, inlined: bool) -> Self {
        TypeTreeNode {
            encoding,
            leading_bytes,
            inlined,
        }
    }
}

/// Resolution result for one condition node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTopology {
    pub is_structural: bool,
    pub child_start: usize,
    pub child_count: usize,
    pub structural_child_count: usize,
    pub signature: B256,
    pub shape: B256,
    pub variant: bool,
    pub type_node: TypeTreeNode,
}

impl NodeTopology {
    pub fn children(&self) -> Range<usize> {
        self.child_start..self.child_start + self.child_count
    }
}

const VARIANT_TAG: u8 = 0x80;
const ARRAY_VARIANT_TAG: u8 = 0x84;

static NONE_BASE: Lazy<B256> = Lazy::new(|| base_signature(Encoding::None as u8, 0));
static STATIC_BASE: Lazy<B256> = Lazy::new(|| base_signature(Encoding::Static as u8, 0));
static DYNAMIC_BASE: Lazy<B256> = Lazy::new(|| base_signature(Encoding::Dynamic as u8, 0));
static TUPLE_BASE: Lazy<B256> = Lazy::new(|| base_signature(Encoding::Tuple as u8, 0));
static ARRAY_BASE: Lazy<B256> = Lazy::new(|| base_signature(Encoding::Array as u8, 0));
static ETHER_VALUE_BASE: Lazy<B256> = Lazy::new(|| base_signature(Encoding::EtherValue as u8, 0));
static VARIANT_BASE: Lazy<B256> = Lazy::new(|| base_signature(VARIANT_TAG, 0));
static ARRAY_VARIANT_BASE: Lazy<B256> = Lazy::new(|| base_signature(ARRAY_VARIANT_TAG, 0));

fn base_signature(tag: u8, leading_bytes: u16) -> B256 {
    let [hi, lo] = leading_bytes.to_be_bytes();
    keccak256([tag, hi, lo])
}

fn fold_signature(base: B256, children: impl IntoIterator<Item = B256>) -> B256 {
    children.into_iter().fold(base, |acc, child| {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(acc.as_slice());
        buf[32..].copy_from_slice(child.as_slice());
        keccak256(buf)
    })
}

/// Topology of a whole condition tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<NodeTopology>,
}

impl Topology {
    /// Resolve a condition array
    ///
    /// Fails when the array has no single root at index 0 or is not in
    /// breadth-first order; every other shape rule is checked by
    /// [`crate::condition::integrity`].
    pub fn resolve(conditions: &[ConditionNode]) -> Result<Self, ConfigError> {
        crate::condition::integrity::check_root_and_order(conditions)?;

        let bounds = child_bounds(conditions.iter().map(|c| c.parent as usize));
        let mut nodes: Vec<Option<NodeTopology>> = vec![None; conditions.len()];

        for index in (0..conditions.len()).rev() {
            let (child_start, child_count) = bounds[index];
            let structural: Vec<&NodeTopology> = (child_start..child_start + child_count)
                .filter_map(|c| nodes[c].as_ref())
                .filter(|c| c.is_structural)
                .collect();

            let resolved = resolve_node(&conditions[index], &structural, child_start, child_count);
            nodes[index] = Some(resolved);
        }

        Ok(Topology {
            nodes: nodes.into_iter().flatten().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NodeTopology> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[NodeTopology] {
        &self.nodes
    }

    /// Indices of the structural children of `index`, in order
    pub fn structural_children(&self, index: usize) -> Vec<usize> {
        self.nodes[index]
            .children()
            .filter(|c| self.nodes[*c].is_structural)
            .collect()
    }

    /// Whether every structural child of `index` has the same signature
    ///
    /// Variant children always agree with each other here, even when their
    /// branches differ.
    pub fn children_homogeneous(&self, index: usize) -> bool {
        let children = self.structural_children(index);
        children
            .windows(2)
            .all(|pair| self.nodes[pair[0]].signature == self.nodes[pair[1]].signature)
    }
}

fn resolve_node(
    condition: &ConditionNode,
    structural: &[&NodeTopology],
    child_start: usize,
    child_count: usize,
) -> NodeTopology {
    let same_shape = structural.windows(2).all(|pair| pair[0].shape == pair[1].shape);
    let same_signature = structural.windows(2).all(|pair| pair[0].signature == pair[1].signature);
    let child_signatures = || structural.iter().map(|c| c.signature);
    let child_shapes = || structural.iter().map(|c| c.shape);

    let leaf = |base: B256, type_node| (true, false, base, base, type_node);

    let (is_structural, variant, signature, shape, type_node) = match condition.param_type {
        ParameterType::Static => leaf(*STATIC_BASE, TypeTreeNode::new(Encoding::Static, 0, true)),
        ParameterType::Dynamic => leaf(*DYNAMIC_BASE, TypeTreeNode::new(Encoding::Dynamic, 0, false)),
        ParameterType::EtherValue => (
            false,
            false,
            *ETHER_VALUE_BASE,
            *ETHER_VALUE_BASE,
            TypeTreeNode::new(Encoding::EtherValue, 0, true),
        ),
        ParameterType::Tuple => {
            let inlined = !structural.is_empty() && structural.iter().all(|c| c.type_node.inlined);
            (
                true,
                false,
                fold_signature(*TUPLE_BASE, child_signatures()),
                fold_signature(*TUPLE_BASE, child_shapes()),
                TypeTreeNode::new(Encoding::Tuple, 0, inlined),
            )
        }
        ParameterType::Array => {
            let type_node = TypeTreeNode::new(Encoding::Array, 0, false);
            let signature = match same_signature {
                true => fold_signature(*ARRAY_BASE, structural.first().map(|c| c.signature)),
                false => fold_signature(*ARRAY_VARIANT_BASE, child_signatures()),
            };
            match same_shape {
                true => {
                    let element = structural.first().map(|c| c.shape);
                    (true, false, signature, fold_signature(*ARRAY_BASE, element), type_node)
                }
                false => (
                    true,
                    true,
                    signature,
                    fold_signature(*ARRAY_VARIANT_BASE, child_shapes()),
                    type_node,
                ),
            }
        }
        ParameterType::Calldata | ParameterType::AbiEncoded => {
            let leading_bytes = condition.leading_bytes();
            let base = base_signature(Encoding::AbiEncoded as u8, leading_bytes);
            (
                true,
                false,
                fold_signature(base, child_signatures()),
                fold_signature(base, child_shapes()),
                TypeTreeNode::new(Encoding::AbiEncoded, leading_bytes, false),
            )
        }
        ParameterType::None => match structural.first() {
            Some(first) if condition.operator.is_logical() && same_shape => {
                (true, false, first.signature, first.shape, first.type_node)
            }
            Some(_) if condition.operator.is_logical() => (
                true,
                true,
                *VARIANT_BASE,
                fold_signature(*VARIANT_BASE, child_shapes()),
                TypeTreeNode::new(Encoding::Dynamic, 0, false),
            ),
            _ => (false, false, *NONE_BASE, *NONE_BASE, TypeTreeNode::new(Encoding::None, 0, false)),
        },
    };

    NodeTopology {
        is_structural,
        child_start,
        child_count,
        structural_child_count: structural.len(),
        signature,
        shape,
        variant,
        type_node,
    }
}

/// Per-node `(child_start, child_count)` from parent indices
///
/// Assumes breadth-first order, so each sibling group is contiguous. The root
/// (parent == own index) is never counted as its own child.
pub(crate) fn child_bounds(parents: impl Iterator<Item = usize>) -> Vec<(usize, usize)> {
    let parents: Vec<usize> = parents.collect();
    let mut bounds = vec![(0usize, 0usize); parents.len()];
    for (index, &parent) in parents.iter().enumerate() {
        if parent == index || parent >= parents.len() {
            continue;
        }
        let entry = &mut bounds[parent];
        if entry.1 == 0 {
            entry.0 = index;
        }
        entry.1 += 1;
    }
    bounds
}
