//! Validated condition tree with its decoder-facing layout
//!
//! `ConditionTree` pairs the author's nodes with one [`LayoutNode`] per node.
//! It is the form shared by the packer, the decoder and the evaluator.
//! It is built either from fresh configuration (validated through
//! [`crate::condition::integrity`]) or from a packed blob, whose stored
//! shape bits are trusted after the checksum and ordering checks.

use crate::condition::integrity;
use crate::condition::{ConditionNode, ParameterType, WORD};
use crate::errors::ConfigError;
use crate::topology::{child_bounds, Topology, TypeTreeNode};
use std::ops::Range;

/// Default ceiling on the number of nodes in one condition tree
pub const DEFAULT_MAX_CONDITION_NODES: usize = 1024;

/// Default ceiling on structural nesting, shared with the decoder
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Decoder-facing shape of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutNode {
    pub type_node: TypeTreeNode,
    pub variant: bool,
    pub child_start: usize,
    pub child_count: usize,
    /// Bytes the node occupies in its enclosing head region
    pub head_size: usize,
}

impl LayoutNode {
    pub fn is_structural(&self) -> bool {
        self.type_node.encoding.is_structural()
    }

    pub fn children(&self) -> Range<usize> {
        self.child_start..self.child_start + self.child_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionTree {
    nodes: Vec<ConditionNode>,
    layout: Vec<LayoutNode>,
}

impl ConditionTree {
    /// Validate and resolve a flattened breadth-first condition array
    ///
    /// # Errors
    /// Any [`ConfigError`]; nothing is retained on failure.
    pub fn new(nodes: Vec<ConditionNode>) -> Result<Self, ConfigError> {
        Self::with_limits(nodes, DEFAULT_MAX_CONDITION_NODES, DEFAULT_MAX_DEPTH)
    }

    /// Validate against explicit node and nesting ceilings
    ///
    /// `max_depth` must match the decoder limit the tree will be inspected
    /// with; deeper structure could never decode.
    pub fn with_limits(nodes: Vec<ConditionNode>, max_nodes: usize, max_depth: usize) -> Result<Self, ConfigError> {
        let topology = integrity::enforce(&nodes, max_nodes)?;
        integrity::check_depth(&nodes, &topology, max_depth)?;
        Ok(Self::from_topology(nodes, &topology))
    }

    /// Node ceiling only, for trees already checked against the decoder
    /// limits when they were stored
    pub fn with_max_nodes(nodes: Vec<ConditionNode>, max_nodes: usize) -> Result<Self, ConfigError> {
        let topology = integrity::enforce(&nodes, max_nodes)?;
        Ok(Self::from_topology(nodes, &topology))
    }

    fn from_topology(nodes: Vec<ConditionNode>, topology: &Topology) -> Self {
        let shapes = topology
            .nodes()
            .iter()
            .map(|t| (t.type_node, t.variant))
            .collect();
        Self::from_shapes(nodes, shapes)
    }

    /// Rebuild from nodes plus per-node `(type node, variant)` shape
    ///
    /// The caller guarantees breadth-first order and one shape per node.
    pub(crate) fn from_shapes(nodes: Vec<ConditionNode>, shapes: Vec<(TypeTreeNode, bool)>) -> Self {
        let bounds = child_bounds(nodes.iter().map(|n| n.parent as usize));
        let mut layout: Vec<LayoutNode> = shapes
            .iter()
            .zip(bounds.iter())
            .map(|(&(type_node, variant), &(child_start, child_count))| LayoutNode {
                type_node,
                variant,
                child_start,
                child_count,
                head_size: 0,
            })
            .collect();

        for index in (0..layout.len()).rev() {
            let head_size = head_size(&nodes[index], &layout, index);
            layout[index].head_size = head_size;
        }

        ConditionTree { nodes, layout }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ConditionNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<ConditionNode> {
        self.nodes
    }

    pub fn node(&self, index: usize) -> &ConditionNode {
        &self.nodes[index]
    }

    pub fn layout(&self, index: usize) -> &LayoutNode {
        &self.layout[index]
    }

    pub fn children(&self, index: usize) -> Range<usize> {
        self.layout[index].children()
    }

    /// Structural children of `index`, in order
    pub fn structural_children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.children(index).filter(move |c| self.layout[*c].is_structural())
    }

    pub fn first_structural_child(&self, index: usize) -> Option<usize> {
        self.structural_children(index).next()
    }

    /// A logical node whose branches share one shape; decoding looks through it
    pub fn is_transparent(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        node.param_type == ParameterType::None
            && node.operator.is_logical()
            && self.layout[index].is_structural()
            && !self.layout[index].variant
    }
}

fn head_size(node: &ConditionNode, layout: &[LayoutNode], index: usize) -> usize {
    let entry = &layout[index];
    if !entry.is_structural() {
        return 0;
    }
    if !entry.type_node.inlined {
        return WORD;
    }

    let mut structural = entry.children().filter(|c| layout[*c].is_structural());
    if node.param_type == ParameterType::None {
        return structural.next().map(|c| layout[c].head_size).unwrap_or(0);
    }
    match node.param_type {
        ParameterType::Tuple => structural.fold(0usize, |acc, c| acc.saturating_add(layout[c].head_size)),
        _ => WORD,
    }
}
