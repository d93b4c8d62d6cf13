//! Packed condition storage
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! version:u8 | count:u16 | word:u64 * count | compValue table | crc32:u32
//!
//! word bits
//!   63..48  parent index
//!   47..40  parameter type
//!   39..32  operator
//!   31..29  encoding
//!   28      inlined
//!   27      variant
//!   26      has compValue
//!   25..16  reserved (zero)
//!   15..0   leading bytes
//!
//! compValue table: for each node with the flag set, in node order,
//!   len:u8 (1..=32) | bytes
//! ```
//!
//! `EqualTo` compValues wider than one word are stored as their keccak256
//! hash, so every table entry fits in one word. Unpacking re-runs the full
//! integrity checks and requires the stored shape bits to agree with the
//! recomputed topology.

use crate::condition::{compress_comp_value, ConditionNode, Operator, ParameterType, WORD};
use crate::errors::PackError;
use crate::topology::tree::DEFAULT_MAX_CONDITION_NODES;
use crate::topology::{ConditionTree, Encoding, TypeTreeNode};
use tracing::warn;

pub const PACK_VERSION: u8 = 1;

const HEADER_LEN: usize = 3;
const WORD_LEN: usize = 8;
const CHECKSUM_LEN: usize = 4;

const INLINED_BIT: u64 = 1 << 28;
const VARIANT_BIT: u64 = 1 << 27;
const COMP_BIT: u64 = 1 << 26;
const RESERVED_MASK: u64 = 0x3ff << 16;

/// Encode a validated tree
pub fn pack(tree: &ConditionTree) -> Vec<u8> {
    let nodes = tree.nodes();
    let mut out = Vec::with_capacity(HEADER_LEN + nodes.len() * (WORD_LEN + 1) + CHECKSUM_LEN);
    out.push(PACK_VERSION);
    out.extend_from_slice(&(nodes.len() as u16).to_be_bytes());

    let mut table = Vec::new();
    for (index, node) in nodes.iter().enumerate() {
        let layout = tree.layout(index);
        let comp = compress_comp_value(node.operator, &node.comp_value);

        let mut word = (node.parent as u64) << 48
            | (node.param_type as u64) << 40
            | (node.operator as u64) << 32
            | (layout.type_node.encoding as u64) << 29
            | layout.type_node.leading_bytes as u64;
        if layout.type_node.inlined {
            word |= INLINED_BIT;
        }
        if layout.variant {
            word |= VARIANT_BIT;
        }
        if !comp.is_empty() {
            word |= COMP_BIT;
            table.push(comp.len() as u8);
            table.extend_from_slice(&comp);
        }
        out.extend_from_slice(&word.to_be_bytes());
    }

    out.extend_from_slice(&table);
    let checksum = crc32fast::hash(&out);
    out.extend_from_slice(&checksum.to_be_bytes());
    out
}

/// Validate and pack an author-supplied condition array
pub fn pack_nodes(nodes: Vec<ConditionNode>) -> Result<Vec<u8>, crate::errors::ConfigError> {
    Ok(pack(&ConditionTree::new(nodes)?))
}

/// Decode a packed blob with the default node ceiling
pub fn unpack(bytes: &[u8]) -> Result<ConditionTree, PackError> {
    unpack_with_max_nodes(bytes, DEFAULT_MAX_CONDITION_NODES)
}

/// Decode a packed blob
///
/// # Errors
/// Any structural damage (truncation, checksum, unknown tags, reserved bits,
/// trailing bytes) or a tree that no longer passes validation.
pub fn unpack_with_max_nodes(bytes: &[u8], max_nodes: usize) -> Result<ConditionTree, PackError> {
    let result = unpack_inner(bytes, max_nodes);
    if let Err(ref e) = result {
        warn!(bytes = bytes.len(), error = %e, "rejected packed conditions");
    }
    result
}

struct StoredShape {
    type_node: TypeTreeNode,
    variant: bool,
    has_comp: bool,
}

fn unpack_inner(bytes: &[u8], max_nodes: usize) -> Result<ConditionTree, PackError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(PackError::Truncated(bytes.len()));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(body) != stored {
        return Err(PackError::ChecksumMismatch);
    }

    if body[0] != PACK_VERSION {
        return Err(PackError::UnsupportedVersion(body[0]));
    }

    let count = u16::from_be_bytes([body[1], body[2]]) as usize;
    let words_end = HEADER_LEN + count * WORD_LEN;
    if body.len() < words_end {
        return Err(PackError::Truncated(body.len()));
    }

    let mut nodes = Vec::with_capacity(count);
    let mut shapes = Vec::with_capacity(count);
    for (index, chunk) in body[HEADER_LEN..words_end].chunks_exact(WORD_LEN).enumerate() {
        let mut raw = [0u8; WORD_LEN];
        raw.copy_from_slice(chunk);
        let (node, shape) = decode_word(index, u64::from_be_bytes(raw))?;
        nodes.push(node);
        shapes.push(shape);
    }

    let mut cursor = words_end;
    for (index, (node, shape)) in nodes.iter_mut().zip(&shapes).enumerate() {
        if !shape.has_comp {
            continue;
        }
        let len = *body.get(cursor).ok_or(PackError::Truncated(cursor))? as usize;
        if len == 0 || len > WORD {
            return Err(invalid(index, "compValue length out of range"));
        }
        let start = cursor + 1;
        let value = body.get(start..start + len).ok_or(PackError::Truncated(start))?;
        node.comp_value = value.to_vec();
        cursor = start + len;
    }

    if cursor != body.len() {
        return Err(PackError::TrailingBytes(body.len() - cursor));
    }

    let tree = ConditionTree::with_max_nodes(nodes, max_nodes)?;
    for (index, shape) in shapes.iter().enumerate() {
        let layout = tree.layout(index);
        if layout.type_node != shape.type_node || layout.variant != shape.variant {
            return Err(invalid(index, "stored shape disagrees with conditions"));
        }
    }

    Ok(tree)
}

fn decode_word(index: usize, word: u64) -> Result<(ConditionNode, StoredShape), PackError> {
    if word & RESERVED_MASK != 0 {
        return Err(invalid(index, "reserved bits set"));
    }

    let parent = (word >> 48) as u16;
    let param_type =
        ParameterType::from_u8((word >> 40) as u8).ok_or_else(|| invalid(index, "unknown parameter type"))?;
    let operator = Operator::from_u8((word >> 32) as u8).ok_or_else(|| invalid(index, "unknown operator"))?;
    let encoding =
        Encoding::from_u8(((word >> 29) & 0b111) as u8).ok_or_else(|| invalid(index, "unknown encoding"))?;

    let shape = StoredShape {
        type_node: TypeTreeNode::new(encoding, word as u16, word & INLINED_BIT != 0),
        variant: word & VARIANT_BIT != 0,
        has_comp: word & COMP_BIT != 0,
    };

    Ok((ConditionNode::new(parent, param_type, operator), shape))
}

fn invalid(index: usize, reason: &str) -> PackError {
    PackError::InvalidWord {
        index,
        reason: reason.to_string(),
    }
}
