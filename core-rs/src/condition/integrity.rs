//! Configuration-time integrity checks for condition trees
//!
//! A tree is validated once, when it is submitted. Anything rejected here is
//! never packed or stored. The checks run in order:
//!
//! 1. size ceiling
//! 2. exactly one root, at index 0, followed by breadth-first parent order
//! 3. per-node parameter type / operator / compValue width
//! 4. child counts
//! 5. root shape and sibling type-tree compatibility (needs the topology)
//!
//! Nesting depth depends on the decoder limits in force, so it is a separate
//! pass ([`check_depth`]).

use crate::condition::{ConditionNode, Operator, ParameterType, WORD};
use crate::errors::ConfigError;
use crate::topology::{Encoding, Topology};
use tracing::warn;

/// Most children an `ArraySubset` node may list
pub const MAX_SUBSET_CHILDREN: usize = 256;

/// Run every integrity rule and return the resolved topology
pub fn enforce(conditions: &[ConditionNode], max_nodes: usize) -> Result<Topology, ConfigError> {
    let result = enforce_inner(conditions, max_nodes);
    if let Err(ref e) = result {
        warn!(nodes = conditions.len(), error = %e, "rejected condition tree");
    }
    result
}

fn enforce_inner(conditions: &[ConditionNode], max_nodes: usize) -> Result<Topology, ConfigError> {
    let ceiling = max_nodes.min(u16::MAX as usize);
    if conditions.len() > ceiling {
        return Err(ConfigError::TooManyNodes(ceiling));
    }

    check_root_and_order(conditions)?;

    for (index, condition) in conditions.iter().enumerate() {
        check_node(index, condition)?;
    }

    let topology = Topology::resolve(conditions)?;

    for (index, condition) in conditions.iter().enumerate() {
        check_children(index, condition, &topology)?;
    }

    check_root_shape(conditions, &topology)?;

    for (index, condition) in conditions.iter().enumerate() {
        check_type_trees(index, condition, &topology)?;
    }

    Ok(topology)
}

/// Exactly one root at index 0, and parents in non-decreasing order with
/// every parent strictly before its child
pub fn check_root_and_order(conditions: &[ConditionNode]) -> Result<(), ConfigError> {
    let roots = conditions
        .iter()
        .enumerate()
        .filter(|(index, c)| c.parent as usize == *index)
        .count();

    match roots {
        0 => return Err(ConfigError::NoRootNode),
        1 => {}
        _ => return Err(ConfigError::TooManyRootNodes),
    }

    if conditions[0].parent != 0 {
        return Err(ConfigError::NotBreadthFirst);
    }

    for index in 1..conditions.len() {
        let parent = conditions[index].parent as usize;
        if parent >= index || parent < conditions[index - 1].parent as usize {
            return Err(ConfigError::NotBreadthFirst);
        }
    }

    Ok(())
}

fn check_node(index: usize, condition: &ConditionNode) -> Result<(), ConfigError> {
    use Operator as O;
    use ParameterType as P;

    let param_type = condition.param_type;
    let width = condition.comp_value.len();
    let leading_bytes_payload = param_type == P::AbiEncoded && width == 2;

    let type_ok = match condition.operator {
        O::Pass => true,
        O::And | O::Or | O::Nor | O::Xor => param_type == P::None,
        O::Matches => matches!(param_type, P::Tuple | P::Array | P::Calldata | P::AbiEncoded),
        O::ArraySome | O::ArrayEvery | O::ArraySubset => param_type == P::Array,
        O::EqualToAvatar | O::EqualToCaller => param_type == P::Static,
        O::EqualTo => param_type != P::None,
        O::GreaterThan | O::LessThan => matches!(param_type, P::Static | P::EtherValue),
        O::SignedIntGreaterThan | O::SignedIntLessThan => param_type == P::Static,
        O::Bitmask => matches!(param_type, P::Static | P::Dynamic),
        O::Custom => param_type != P::None,
        O::WithinAllowance => matches!(param_type, P::Static | P::EtherValue),
        O::EtherWithinAllowance => matches!(param_type, P::None | P::EtherValue),
        O::CallWithinAllowance => param_type == P::None,
    };
    if !type_ok {
        return Err(ConfigError::UnsuitableParameterType(index));
    }

    let width_ok = match condition.operator {
        O::Pass | O::Matches => width == 0 || leading_bytes_payload,
        O::And | O::Or | O::Nor | O::Xor => width == 0,
        O::ArraySome | O::ArrayEvery | O::ArraySubset => width == 0,
        O::EqualToAvatar | O::EqualToCaller => width == 0,
        O::EqualTo => match param_type {
            P::Static | P::EtherValue => width == WORD,
            _ => width > 0 && width % WORD == 0,
        },
        O::GreaterThan
        | O::LessThan
        | O::SignedIntGreaterThan
        | O::SignedIntLessThan
        | O::Bitmask
        | O::Custom
        | O::WithinAllowance
        | O::EtherWithinAllowance
        | O::CallWithinAllowance => width == WORD,
    };
    if !width_ok {
        return Err(ConfigError::UnsuitableCompValue(index));
    }

    Ok(())
}

fn check_children(index: usize, condition: &ConditionNode, topology: &Topology) -> Result<(), ConfigError> {
    use Operator as O;
    use ParameterType as P;

    let Some(resolved) = topology.get(index) else {
        return Err(ConfigError::UnsuitableChildCount(index));
    };
    let total = resolved.child_count;
    let structural = resolved.structural_child_count;

    let ok = match condition.param_type {
        P::Static | P::Dynamic | P::EtherValue => total == 0,
        P::None if condition.operator.is_logical() => total >= 1,
        P::None => total == 0,
        P::Tuple => structural >= 1 && structural == total,
        P::Array => {
            structural == total
                && match condition.operator {
                    O::ArraySome | O::ArrayEvery => structural == 1,
                    O::ArraySubset => (1..=MAX_SUBSET_CHILDREN).contains(&structural),
                    _ => structural >= 1,
                }
        }
        P::Calldata | P::AbiEncoded => condition.operator != O::Matches || structural >= 1,
    };

    if ok {
        Ok(())
    } else {
        Err(ConfigError::UnsuitableChildCount(index))
    }
}

/// The root is matched against the whole buffer, so it must describe an
/// encoded buffer (possibly through logical nodes) or carry no structure
fn check_root_shape(conditions: &[ConditionNode], topology: &Topology) -> Result<(), ConfigError> {
    let root = &topology.nodes()[0];
    if !root.is_structural || describes_buffer(conditions, topology, 0) {
        Ok(())
    } else {
        Err(ConfigError::UnsuitableRootNode)
    }
}

fn describes_buffer(conditions: &[ConditionNode], topology: &Topology, index: usize) -> bool {
    let resolved = &topology.nodes()[index];
    if resolved.variant && conditions[index].param_type == ParameterType::None {
        topology
            .structural_children(index)
            .into_iter()
            .all(|child| describes_buffer(conditions, topology, child))
    } else {
        resolved.type_node.encoding == Encoding::AbiEncoded
    }
}

/// Reject trees whose structural nodes sit deeper than the decoder follows
///
/// Depth counts condition levels below the root, the same way the decoder
/// counts them: a structural node at depth `d` is decoded at depth `d`.
pub fn check_depth(conditions: &[ConditionNode], topology: &Topology, max_depth: usize) -> Result<(), ConfigError> {
    let mut depths = vec![0usize; conditions.len()];
    for index in 1..conditions.len() {
        depths[index] = depths[conditions[index].parent as usize] + 1;
        if depths[index] > max_depth && topology.nodes()[index].is_structural {
            warn!(node = index, max_depth, "condition tree too deep");
            return Err(ConfigError::TooDeep(max_depth));
        }
    }
    Ok(())
}

fn check_type_trees(index: usize, condition: &ConditionNode, topology: &Topology) -> Result<(), ConfigError> {
    let requires_homogeneous = condition.operator == Operator::And || condition.operator.is_array_quantifier();
    if requires_homogeneous && !topology.children_homogeneous(index) {
        return Err(ConfigError::UnsuitableSubTypeTree(index));
    }

    // Every branch of a variant is read through the same head slot
    if topology.nodes()[index].variant {
        let all_dynamic = topology
            .structural_children(index)
            .into_iter()
            .all(|child| !topology.nodes()[child].type_node.inlined);
        if !all_dynamic {
            return Err(ConfigError::UnsuitableSubTypeTree(index));
        }
    }

    Ok(())
}
