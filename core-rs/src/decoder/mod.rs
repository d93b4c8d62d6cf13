//! Buffer decoder
//!
//! `inspect` locates every structural condition node's value inside a call's
//! encoded parameter buffer (fixed-size values inline in a head region,
//! variable-size values reached through a relative offset pointer to a
//! length-prefixed tail). Malformed or truncated regions never fail the call
//! to `inspect`; they come back as `overflow = true` on the affected node and
//! propagate to its ancestors.
//!
//! Variant nodes decode every branch at the same location. The node overflows
//! only when all branches do, and reports the location and size of the first
//! branch that fit.
//!
//! Work is bounded by [`DecoderLimits`] whatever the buffer contains.

mod payload;
mod walker;

pub use payload::{DecodedNode, Payload};

use crate::errors::DecodeError;
use crate::topology::tree::DEFAULT_MAX_DEPTH;
use crate::topology::ConditionTree;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub(crate) use walker::read_word;

/// Resource ceilings for one `inspect` pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecoderLimits {
    /// Deepest nesting of condition nodes followed
    pub max_depth: usize,
    /// Largest array element count accepted
    pub max_array_length: usize,
    /// Total decoded-node slots one pass may allocate
    pub max_decoded_nodes: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        DecoderLimits {
            max_depth: DEFAULT_MAX_DEPTH,
            max_array_length: 4096,
            max_decoded_nodes: 65_536,
        }
    }
}

/// Decode `data` against `tree`
///
/// # Arguments
/// * `data` - The full encoded buffer (for calldata, including the selector)
/// * `tree` - A validated condition tree
/// * `limits` - Depth, array-length and node-count ceilings
///
/// # Returns
/// The decoded-node arena. Slot 0 is the root and spans the whole buffer.
pub fn inspect(data: &[u8], tree: &ConditionTree, limits: &DecoderLimits) -> Payload {
    let payload = walker::Walker::new(data, tree, limits).run();
    debug!(
        bytes = data.len(),
        slots = payload.len(),
        overflow = payload.overflow(),
        "inspected buffer"
    );
    payload
}

/// Slice `size` bytes at `location` out of `data`
pub fn pluck(data: &[u8], location: usize, size: usize) -> Result<&[u8], DecodeError> {
    location
        .checked_add(size)
        .filter(|stop| *stop <= data.len())
        .map(|stop| &data[location..stop])
        .ok_or(DecodeError::OutOfBounds {
            location,
            size,
            length: data.len(),
        })
}
