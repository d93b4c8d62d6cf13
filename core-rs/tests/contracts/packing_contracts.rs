// Packing Contract Tests
//
// Packed blobs are the only form in which condition trees are stored. A blob
// must come back as exactly the tree that was packed, and any damage to it
// must be rejected rather than decoded into some other tree.

use alloy_primitives::{keccak256, U256};
use proptest::prelude::*;
use roles_core::condition::compress_comp_value;
use roles_core::{pack, unpack, ConditionNode, ConditionTree, Operator, ParameterType};
use std::collections::VecDeque;

fn node(parent: u16, param_type: ParameterType, operator: Operator) -> ConditionNode {
    ConditionNode::new(parent, param_type, operator)
}

fn word(value: u64) -> Vec<u8> {
    U256::from(value).to_be_bytes::<32>().to_vec()
}

/// Author-side subtree, flattened breadth-first by [`flatten`]
#[derive(Debug, Clone)]
struct Sub {
    node: ConditionNode,
    children: Vec<Sub>,
}

fn sub(param_type: ParameterType, operator: Operator, children: Vec<Sub>) -> Sub {
    Sub {
        node: node(0, param_type, operator),
        children,
    }
}

fn flatten(root: Sub) -> Vec<ConditionNode> {
    let mut nodes = Vec::new();
    let mut queue = VecDeque::from([(root, 0u16)]);
    while let Some((next, parent)) = queue.pop_front() {
        let index = nodes.len() as u16;
        let mut condition = next.node;
        condition.parent = parent;
        nodes.push(condition);
        for child in next.children {
            queue.push_back((child, index));
        }
    }
    nodes
}

fn static_leaf() -> impl Strategy<Value = Sub> {
    (0u8..5, any::<[u8; 32]>()).prop_map(|(kind, comp)| {
        let leaf = match kind {
            0 => node(0, ParameterType::Static, Operator::Pass),
            1 => node(0, ParameterType::Static, Operator::EqualTo).with_comp_value(comp.to_vec()),
            2 => node(0, ParameterType::Static, Operator::GreaterThan).with_comp_value(comp.to_vec()),
            3 => node(0, ParameterType::Static, Operator::LessThan).with_comp_value(comp.to_vec()),
            _ => node(0, ParameterType::Static, Operator::WithinAllowance).with_comp_value(comp.to_vec()),
        };
        Sub {
            node: leaf,
            children: vec![],
        }
    })
}

/// Dynamic leaves, including EqualTo values wide enough to be stored hashed
fn dynamic_leaf() -> impl Strategy<Value = Sub> {
    prop_oneof![
        Just(sub(ParameterType::Dynamic, Operator::Pass, vec![])),
        (1usize..5, any::<u8>()).prop_map(|(words, byte)| Sub {
            node: node(0, ParameterType::Dynamic, Operator::EqualTo).with_comp_value(vec![byte; words * 32]),
            children: vec![],
        }),
    ]
}

/// One calldata parameter: a leaf, a tuple, an array or a variant
fn parameter() -> impl Strategy<Value = Sub> {
    prop_oneof![
        static_leaf(),
        dynamic_leaf(),
        prop::collection::vec(static_leaf(), 1..4)
            .prop_map(|fields| sub(ParameterType::Tuple, Operator::Matches, fields)),
        (static_leaf(), dynamic_leaf())
            .prop_map(|(a, b)| sub(ParameterType::Tuple, Operator::Matches, vec![a, b])),
        (static_leaf(), any::<bool>()).prop_map(|(element, every)| {
            let operator = if every { Operator::ArrayEvery } else { Operator::ArraySome };
            sub(ParameterType::Array, operator, vec![element])
        }),
        (static_leaf(), dynamic_leaf()).prop_map(|(inner, other)| {
            let embedded = sub(ParameterType::AbiEncoded, Operator::Matches, vec![inner]);
            sub(ParameterType::None, Operator::Or, vec![embedded, other])
        }),
    ]
}

/// Any accepted calldata tree up to three levels below the root
fn accepted_tree() -> impl Strategy<Value = ConditionTree> {
    prop::collection::vec(parameter(), 1..12).prop_map(|params| {
        let root = sub(ParameterType::Calldata, Operator::Matches, params);
        ConditionTree::new(flatten(root)).unwrap()
    })
}

/// Nodes as they read back from storage
fn stored_form(tree: &ConditionTree) -> Vec<ConditionNode> {
    tree.nodes()
        .iter()
        .cloned()
        .map(|mut n| {
            n.comp_value = compress_comp_value(n.operator, &n.comp_value);
            n
        })
        .collect()
}

fn nested_tree() -> ConditionTree {
    ConditionTree::new(vec![
        node(0, ParameterType::Calldata, Operator::Matches),
        node(0, ParameterType::None, Operator::Or),
        node(0, ParameterType::Array, Operator::ArraySome),
        node(0, ParameterType::AbiEncoded, Operator::Matches).with_comp_value(vec![0x00, 0x04]),
        node(1, ParameterType::AbiEncoded, Operator::Matches),
        node(1, ParameterType::AbiEncoded, Operator::Matches),
        node(2, ParameterType::Tuple, Operator::Matches),
        node(3, ParameterType::Dynamic, Operator::EqualTo).with_comp_value([word(3), word(7)].concat()),
        node(4, ParameterType::Static, Operator::EqualTo).with_comp_value(word(1)),
        node(5, ParameterType::Static, Operator::Pass),
        node(5, ParameterType::Static, Operator::LessThan).with_comp_value(word(9)),
        node(6, ParameterType::Static, Operator::Pass),
        node(6, ParameterType::Dynamic, Operator::Pass),
    ])
    .unwrap()
}

#[test]
fn nested_tree_survives_round_trip() {
    let tree = nested_tree();
    let restored = unpack(&pack(&tree)).unwrap();

    assert_eq!(restored.len(), tree.len());
    for index in 0..tree.len() {
        assert_eq!(restored.layout(index), tree.layout(index), "layout of node {}", index);
        assert_eq!(restored.node(index).parent, tree.node(index).parent);
        assert_eq!(restored.node(index).operator, tree.node(index).operator);
    }

    // Wide EqualTo values are stored as their hash
    let wide = [word(3), word(7)].concat();
    assert_eq!(restored.node(7).comp_value, keccak256(&wide).to_vec());
    assert_eq!(restored.node(3).leading_bytes(), 4);
}

/// Packing is deterministic
#[test]
fn pack_is_deterministic() {
    assert_eq!(pack(&nested_tree()), pack(&nested_tree()));
}

proptest! {
    #[test]
    fn pack_round_trip_is_identity(tree in accepted_tree()) {
        let restored = unpack(&pack(&tree)).unwrap();
        let expected = stored_form(&tree);
        prop_assert_eq!(restored.nodes(), expected.as_slice());
        for index in 0..tree.len() {
            prop_assert_eq!(restored.layout(index), tree.layout(index));
        }
        // Storage form is a fixed point
        prop_assert_eq!(pack(&restored), pack(&tree));
    }

    #[test]
    fn any_single_byte_damage_is_rejected(
        tree in accepted_tree(),
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut blob = pack(&tree);
        let index = position.index(blob.len());
        blob[index] ^= flip;
        prop_assert!(unpack(&blob).is_err());
    }

    #[test]
    fn truncated_or_extended_blobs_are_rejected(
        tree in accepted_tree(),
        cut in any::<prop::sample::Index>(),
        extra in prop::collection::vec(any::<u8>(), 1..8),
    ) {
        let blob = pack(&tree);
        let keep = cut.index(blob.len());
        prop_assert!(unpack(&blob[..keep]).is_err());

        let mut extended = blob.clone();
        extended.extend_from_slice(&extra);
        prop_assert!(unpack(&extended).is_err());
    }
}
