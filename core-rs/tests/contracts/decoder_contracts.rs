// Decoder Contract Tests
//
// The decoder reads untrusted call data. These invariants hold for ANY input
// buffer, well-formed or not.

use alloy_primitives::U256;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roles_core::{inspect, pluck, ConditionNode, ConditionTree, DecoderLimits, Operator, ParameterType, Payload};

fn node(parent: u16, param_type: ParameterType, operator: Operator) -> ConditionNode {
    ConditionNode::new(parent, param_type, operator)
}

fn word(value: u64) -> [u8; 32] {
    U256::from(value).to_be_bytes::<32>()
}

/// f(uint256, bytes, uint256[], (uint256, bytes))
fn rich_tree() -> ConditionTree {
    ConditionTree::new(vec![
        node(0, ParameterType::Calldata, Operator::Matches),
        node(0, ParameterType::Static, Operator::Pass),
        node(0, ParameterType::Dynamic, Operator::Pass),
        node(0, ParameterType::Array, Operator::ArrayEvery),
        node(0, ParameterType::Tuple, Operator::Matches),
        node(3, ParameterType::Static, Operator::Pass),
        node(4, ParameterType::Static, Operator::Pass),
        node(4, ParameterType::Dynamic, Operator::Pass),
    ])
    .unwrap()
}

/// f(bytes) where bytes is abi.encode(uint256) or abi.encode(uint256, bytes)
fn variant_tree() -> ConditionTree {
    ConditionTree::new(vec![
        node(0, ParameterType::Calldata, Operator::Matches),
        node(0, ParameterType::None, Operator::Or),
        node(1, ParameterType::AbiEncoded, Operator::Matches),
        node(1, ParameterType::AbiEncoded, Operator::Matches),
        node(2, ParameterType::Static, Operator::Pass),
        node(3, ParameterType::Static, Operator::Pass),
        node(3, ParameterType::Dynamic, Operator::Pass),
    ])
    .unwrap()
}

fn rich_encoding() -> Vec<u8> {
    let mut abc = [0u8; 32];
    abc[..3].copy_from_slice(b"abc");
    let words = [
        // head
        word(1),
        word(128),
        word(192),
        word(288),
        // bytes
        word(3),
        abc,
        // uint256[]
        word(2),
        word(5),
        word(6),
        // (uint256, bytes)
        word(9),
        word(64),
        word(0),
    ];
    let mut data = vec![0x12, 0x34, 0x56, 0x78];
    for w in words {
        data.extend_from_slice(&w);
    }
    data
}

/// Every decoded leaf that did not overflow lies inside the buffer
fn assert_leaves_in_bounds(data: &[u8], payload: &Payload) {
    for decoded in payload.nodes() {
        if decoded.overflow || !decoded.children.is_empty() {
            continue;
        }
        assert!(
            pluck(data, decoded.location, decoded.size).is_ok(),
            "leaf {}+{} escapes buffer of {} bytes",
            decoded.location,
            decoded.size,
            data.len()
        );
    }
}

/// Adversarial words: valid-looking offsets and lengths mixed with noise
fn adversarial_word() -> impl Strategy<Value = [u8; 32]> {
    prop_oneof![
        Just(word(0)),
        Just(word(32)),
        Just(word(64)),
        Just(word(128)),
        (0u64..512).prop_map(word),
        any::<u64>().prop_map(word),
        Just([0xffu8; 32]),
    ]
}

#[test]
fn valid_encoding_decodes_without_overflow() {
    let data = rich_encoding();
    let payload = inspect(&data, &rich_tree(), &DecoderLimits::default());
    assert!(!payload.overflow());
    assert_leaves_in_bounds(&data, &payload);

    let params = payload.children(Payload::ROOT);
    assert_eq!(params.len(), 4);
    assert_eq!(pluck(&data, params[0].location, params[0].size).unwrap(), &word(1));
    assert_eq!(params[1].location, 4 + 128);
    assert_eq!(payload.children_of(&params[2]).len(), 2);
}

/// A pointer into its own block's head never decodes
#[test]
fn offset_into_head_is_never_followed() {
    for offset in [0u64, 32, 64, 96, 127] {
        let mut data = rich_encoding();
        data[4 + 32..4 + 64].copy_from_slice(&word(offset));
        let payload = inspect(&data, &rich_tree(), &DecoderLimits::default());
        let bytes = &payload.children(Payload::ROOT)[1];
        assert!(bytes.overflow, "offset {} was followed", offset);
        assert!(payload.overflow());
    }
}

/// Flipping bytes of a valid encoding never panics or escapes the buffer
#[test]
fn random_corruption_is_contained() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let valid = rich_encoding();
    let tree = rich_tree();
    let limits = DecoderLimits::default();

    for _ in 0..2_000 {
        let mut data = valid.clone();
        for _ in 0..rng.gen_range(1..4) {
            let index = rng.gen_range(0..data.len());
            data[index] = rng.gen();
        }
        if rng.gen_bool(0.2) {
            let keep = rng.gen_range(0..data.len());
            data.truncate(keep);
        }

        let payload = inspect(&data, &tree, &limits);
        assert_leaves_in_bounds(&data, &payload);
    }
}

proptest! {
    #[test]
    fn inspect_is_total_on_random_bytes(data in prop::collection::vec(any::<u8>(), 0..512)) {
        for tree in [rich_tree(), variant_tree()] {
            let payload = inspect(&data, &tree, &DecoderLimits::default());
            assert_leaves_in_bounds(&data, &payload);
            prop_assert_eq!(payload.root().location, 0);
        }
    }

    #[test]
    fn inspect_is_total_on_adversarial_words(words in prop::collection::vec(adversarial_word(), 0..24)) {
        let mut data = vec![0x12, 0x34, 0x56, 0x78];
        for w in &words {
            data.extend_from_slice(w);
        }
        for tree in [rich_tree(), variant_tree()] {
            let payload = inspect(&data, &tree, &DecoderLimits::default());
            assert_leaves_in_bounds(&data, &payload);
        }
    }

    #[test]
    fn decoded_node_budget_is_respected(
        count in 0u64..10_000,
        budget in 1usize..64,
    ) {
        let tree = ConditionTree::new(vec![
            node(0, ParameterType::Calldata, Operator::Matches),
            node(0, ParameterType::Array, Operator::ArrayEvery),
            node(1, ParameterType::Static, Operator::Pass),
        ])
        .unwrap();
        let mut data = vec![0x12, 0x34, 0x56, 0x78];
        data.extend_from_slice(&word(32));
        data.extend_from_slice(&word(count));
        data.resize(data.len() + 32 * (count.min(128) as usize), 0);

        let limits = DecoderLimits { max_decoded_nodes: budget, ..Default::default() };
        let payload = inspect(&data, &tree, &limits);
        prop_assert!(payload.len() <= budget);
    }

    #[test]
    fn pluck_never_panics(
        data in prop::collection::vec(any::<u8>(), 0..64),
        location in any::<usize>(),
        size in any::<usize>(),
    ) {
        match pluck(&data, location, size) {
            Ok(slice) => prop_assert_eq!(slice.len(), size),
            Err(_) => prop_assert!(location.checked_add(size).map_or(true, |stop| stop > data.len())),
        }
    }
}
