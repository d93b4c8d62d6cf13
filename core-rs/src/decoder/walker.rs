//! Recursive descent over a condition tree and an encoded buffer
//!
//! Every node writes exactly one arena slot. Blocks (tuple fields, array
//! elements, embedded-buffer parameters) reserve their child slots up front so
//! siblings stay contiguous, then decode each field into its slot.
//!
//! All offsets are checked arithmetic; every read is bounded by the `end` of
//! the region being decoded, which for an embedded buffer is the end of its
//! length-prefixed payload rather than the end of the whole input.

use super::payload::{DecodedNode, Payload};
use super::DecoderLimits;
use crate::condition::{Operator, WORD};
use crate::topology::{ConditionTree, Encoding};
use std::ops::Range;

/// Whether an `AbiEncoded` node is the input buffer itself or a
/// length-prefixed region inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Root,
    Embedded,
}

pub(crate) struct Walker<'a> {
    data: &'a [u8],
    tree: &'a ConditionTree,
    limits: &'a DecoderLimits,
    nodes: Vec<DecodedNode>,
}

impl<'a> Walker<'a> {
    pub(crate) fn new(data: &'a [u8], tree: &'a ConditionTree, limits: &'a DecoderLimits) -> Self {
        Walker {
            data,
            tree,
            limits,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) -> Payload {
        self.nodes.push(DecodedNode::leaf(0, self.data.len()));
        if !self.tree.is_empty() && self.tree.layout(0).is_structural() {
            self.walk(Payload::ROOT, 0, 0, self.data.len(), Frame::Root, 0);
        }
        Payload::new(self.nodes)
    }

    fn walk(&mut self, slot: usize, index: usize, location: usize, end: usize, frame: Frame, depth: usize) {
        let layout = *self.tree.layout(index);
        if !layout.is_structural() {
            self.nodes[slot] = DecodedNode::leaf(location, 0);
            return;
        }
        if depth > self.limits.max_depth {
            self.nodes[slot] = DecodedNode::overflowed(location);
            return;
        }

        if self.tree.is_transparent(index) {
            match self.tree.first_structural_child(index) {
                Some(child) => self.walk(slot, child, location, end, frame, depth + 1),
                None => self.nodes[slot] = DecodedNode::overflowed(location),
            }
            return;
        }

        let decoded = if layout.variant && layout.type_node.encoding != Encoding::Array {
            self.variant(index, location, end, frame, depth)
        } else {
            match layout.type_node.encoding {
                Encoding::Static => self.static_value(location, end),
                Encoding::Dynamic => self.dynamic_value(location, end),
                Encoding::Tuple => self.tuple(index, location, end, depth),
                Encoding::Array => self.array(index, location, end, depth),
                Encoding::AbiEncoded => self.embedded(index, location, end, frame, depth),
                Encoding::None | Encoding::EtherValue => DecodedNode::leaf(location, 0),
            }
        };
        self.nodes[slot] = decoded;
    }

    fn static_value(&self, location: usize, end: usize) -> DecodedNode {
        match fits(location, WORD, end) {
            true => DecodedNode::leaf(location, WORD),
            false => DecodedNode::overflowed(location),
        }
    }

    fn dynamic_value(&self, location: usize, end: usize) -> DecodedNode {
        match self.tail(location, end) {
            Some((_, _, size)) => DecodedNode::leaf(location, size),
            None => DecodedNode::overflowed(location),
        }
    }

    fn tuple(&mut self, index: usize, location: usize, end: usize, depth: usize) -> DecodedNode {
        let fields: Vec<usize> = self.tree.structural_children(index).collect();
        let (children, size, overflow) = self.block(&fields, location, end, depth);
        DecodedNode {
            location,
            size,
            overflow,
            variant: false,
            children,
        }
    }

    fn array(&mut self, index: usize, location: usize, end: usize, depth: usize) -> DecodedNode {
        let Some(count) = read_word(self.data, location, end) else {
            return DecodedNode::overflowed(location);
        };
        if count > self.limits.max_array_length {
            return DecodedNode::overflowed(location);
        }

        let templates: Vec<usize> = self.tree.structural_children(index).collect();
        let Some(&first) = templates.first() else {
            return match count {
                0 => DecodedNode::leaf(location, WORD),
                _ => DecodedNode::overflowed(location),
            };
        };

        let variant = self.tree.layout(index).variant;
        if variant && self.tree.node(index).operator == Operator::ArraySubset {
            return self.candidate_array(location, end, count, &templates, depth);
        }

        let fields: Vec<usize> = (0..count)
            .map(|i| match variant {
                true => templates.get(i).copied().unwrap_or(first),
                false => first,
            })
            .collect();

        let start = location + WORD;
        let (children, size, overflow) = self.block(&fields, start, end, depth);
        DecodedNode {
            location,
            size: WORD.saturating_add(size),
            overflow,
            variant,
            children,
        }
    }

    fn embedded(&mut self, index: usize, location: usize, end: usize, frame: Frame, depth: usize) -> DecodedNode {
        let (payload_start, payload_end, size) = match frame {
            Frame::Root => (location, end, end.saturating_sub(location)),
            Frame::Embedded => match self.tail(location, end) {
                Some(region) => region,
                None => return DecodedNode::overflowed(location),
            },
        };

        let leading = self.tree.layout(index).type_node.leading_bytes as usize;
        let Some(start) = payload_start.checked_add(leading).filter(|s| *s <= payload_end) else {
            return DecodedNode {
                location,
                size,
                overflow: true,
                ..Default::default()
            };
        };

        let fields: Vec<usize> = self.tree.structural_children(index).collect();
        let (children, _, overflow) = self.block(&fields, start, payload_end, depth);
        DecodedNode {
            location,
            size,
            overflow,
            variant: false,
            children,
        }
    }

    fn variant(&mut self, index: usize, location: usize, end: usize, frame: Frame, depth: usize) -> DecodedNode {
        let branches: Vec<usize> = self.tree.structural_children(index).collect();
        self.branches(&branches, location, end, frame, depth)
    }

    /// Decode the value at `location` once per branch
    ///
    /// Takes the location and size of the first branch that fits; overflows
    /// only when none does.
    fn branches(&mut self, branches: &[usize], location: usize, end: usize, frame: Frame, depth: usize) -> DecodedNode {
        let Some(children) = self.reserve(branches.len()) else {
            return DecodedNode::overflowed(location);
        };

        for (offset, &branch) in branches.iter().enumerate() {
            self.walk(children.start + offset, branch, location, end, frame, depth + 1);
        }

        match children.clone().find(|slot| !self.nodes[*slot].overflow) {
            Some(slot) => DecodedNode {
                location: self.nodes[slot].location,
                size: self.nodes[slot].size,
                overflow: false,
                variant: true,
                children,
            },
            None => DecodedNode {
                location,
                size: 0,
                overflow: true,
                variant: true,
                children,
            },
        }
    }

    /// Elements of an `ArraySubset` whose candidates decode differently
    ///
    /// Any element may be matched by any candidate, so each element is
    /// decoded once per candidate. Candidates that differ in shape are never
    /// inlined, so every element sits behind an offset.
    fn candidate_array(
        &mut self,
        location: usize,
        end: usize,
        count: usize,
        candidates: &[usize],
        depth: usize,
    ) -> DecodedNode {
        let start = location + WORD;
        let Some(head_total) = count.checked_mul(WORD).filter(|h| fits(start, *h, end)) else {
            return DecodedNode::overflowed(location);
        };
        let Some(children) = self.reserve(count) else {
            return DecodedNode::overflowed(location);
        };

        let mut size = head_total;
        let mut overflow = false;
        for position in 0..count {
            let slot = children.start + position;
            let head = start + position * WORD;
            self.nodes[slot] = match self.follow(start, head, head_total, end) {
                Some(element) => self.branches(candidates, element, end, Frame::Embedded, depth),
                None => DecodedNode::overflowed(head),
            };
            size = size.saturating_add(self.nodes[slot].size);
            overflow |= self.nodes[slot].overflow;
        }

        DecodedNode {
            location,
            size: WORD.saturating_add(size),
            overflow,
            variant: true,
            children,
        }
    }

    /// Decode `fields` as one head/tail block starting at `start`
    ///
    /// Returns the children range, the bytes spanned (heads plus reachable
    /// tails) and whether any field overflowed.
    fn block(&mut self, fields: &[usize], start: usize, end: usize, depth: usize) -> (Range<usize>, usize, bool) {
        let head_total = fields
            .iter()
            .try_fold(0usize, |acc, f| acc.checked_add(self.tree.layout(*f).head_size));
        let head_fits = head_total.filter(|h| fits(start, *h, end));

        // Reject oversized heads before reserving one slot per field
        let Some(head_total) = head_fits else {
            return (0..0, 0, true);
        };
        let Some(children) = self.reserve(fields.len()) else {
            return (0..0, 0, true);
        };

        let mut offset = 0usize;
        let mut size = head_total;
        let mut overflow = false;

        for (position, &field) in fields.iter().enumerate() {
            let slot = children.start + position;
            let layout = *self.tree.layout(field);
            let head = start + offset;

            if layout.type_node.inlined {
                self.walk(slot, field, head, end, Frame::Embedded, depth + 1);
            } else {
                match self.follow(start, head, head_total, end) {
                    Some(location) => {
                        self.walk(slot, field, location, end, Frame::Embedded, depth + 1);
                        size = size.saturating_add(self.nodes[slot].size);
                    }
                    None => self.nodes[slot] = DecodedNode::overflowed(head),
                }
            }

            overflow |= self.nodes[slot].overflow;
            offset += layout.head_size;
        }

        (children, size, overflow)
    }

    /// Resolve the offset pointer stored at `head`
    ///
    /// The target must lie past the block's head region and inside the
    /// current region; a zero, self-referential or backward pointer lands in
    /// the head and is rejected.
    fn follow(&self, block_start: usize, head: usize, head_total: usize, end: usize) -> Option<usize> {
        let offset = read_word(self.data, head, end)?;
        if offset < head_total {
            return None;
        }
        let location = block_start.checked_add(offset)?;
        (location < end).then_some(location)
    }

    /// Length-prefixed tail at `location`: `(content start, content end, encoded size)`
    fn tail(&self, location: usize, end: usize) -> Option<(usize, usize, usize)> {
        let length = read_word(self.data, location, end)?;
        let padded = length.checked_add(WORD - 1)? / WORD * WORD;
        let content = location.checked_add(WORD)?;
        let content_end = content.checked_add(length)?;
        let tail_end = content.checked_add(padded)?;
        if tail_end > end {
            return None;
        }
        if self.data[content_end..tail_end].iter().any(|b| *b != 0) {
            return None;
        }
        Some((content, content_end, WORD + padded))
    }

    fn reserve(&mut self, count: usize) -> Option<Range<usize>> {
        let start = self.nodes.len();
        let stop = start.checked_add(count)?;
        if stop > self.limits.max_decoded_nodes {
            return None;
        }
        self.nodes.resize(stop, DecodedNode::default());
        Some(start..stop)
    }
}

fn fits(location: usize, size: usize, end: usize) -> bool {
    location.checked_add(size).map_or(false, |stop| stop <= end)
}

/// Read the word at `location` as a length or offset
///
/// Values that do not fit in the low 8 bytes are treated as unreadable.
pub(crate) fn read_word(data: &[u8], location: usize, end: usize) -> Option<usize> {
    if !fits(location, WORD, end) || end > data.len() {
        return None;
    }
    let word = &data[location..location + WORD];
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(low)).ok()
}
