//! Decoded-node arena

use serde::Serialize;
use std::ops::Range;

/// Where one condition node's value sits in the call's buffer
///
/// Children live in the owning [`Payload`] arena; `children` is the range of
/// their slots. For a variant node there is one child per structural branch,
/// each decoded at the same location.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedNode {
    pub location: usize,
    pub size: usize,
    pub overflow: bool,
    pub variant: bool,
    pub children: Range<usize>,
}

impl DecodedNode {
    pub(crate) fn overflowed(location: usize) -> Self {
        DecodedNode {
            location,
            overflow: true,
            ..Default::default()
        }
    }

    pub(crate) fn leaf(location: usize, size: usize) -> Self {
        DecodedNode {
            location,
            size,
            ..Default::default()
        }
    }
}

/// Result of one `inspect` pass; slot 0 is the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    nodes: Vec<DecodedNode>,
}

impl Payload {
    pub const ROOT: usize = 0;

    pub(crate) fn new(nodes: Vec<DecodedNode>) -> Self {
        Payload { nodes }
    }

    pub fn root(&self) -> &DecodedNode {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, slot: usize) -> &DecodedNode {
        &self.nodes[slot]
    }

    pub fn get(&self, slot: usize) -> Option<&DecodedNode> {
        self.nodes.get(slot)
    }

    pub fn children(&self, slot: usize) -> &[DecodedNode] {
        &self.nodes[self.nodes[slot].children.clone()]
    }

    pub fn children_of(&self, node: &DecodedNode) -> &[DecodedNode] {
        &self.nodes[node.children.clone()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[DecodedNode] {
        &self.nodes
    }

    pub fn overflow(&self) -> bool {
        self.root().overflow
    }
}
