//! Operator evaluator
//!
//! Walks a condition tree and the decoder's output in lockstep. Each step
//! pairs a condition node with the decoded slot holding its value (`None`
//! for nodes that read nothing from the buffer).
//!
//! Allowance operators only reserve debits in a [`Consumptions`] buffer.
//! Branching operators (`Or`, `Xor`, `ArraySome`, `ArraySubset`) try each
//! branch on a copy of the buffer and keep the copy of the branch that wins,
//! so a failed branch leaves no pending debit behind.

pub mod custom;
pub mod status;

pub use custom::{CustomCondition, CustomInput, CustomRegistry};
pub use status::{Status, Violation};

use crate::allowance::{AllowanceKey, AllowanceStore, Consumptions};
use crate::condition::{compress_comp_value, Operator, ParameterType, WORD};
use crate::decoder::{pluck, read_word, DecodedNode, Payload};
use crate::roles::Operation;
use crate::topology::ConditionTree;
use alloy_primitives::{keccak256, Address, I256, U256};

/// Most array elements an `ArraySubset` condition considers
pub const MAX_SUBSET_ELEMENTS: usize = 256;

const BITMASK_WIDTH: usize = 15;

/// Per-call inputs available to operators
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub caller: Address,
    pub avatar: Address,
    pub target: Address,
    pub value: U256,
    pub operation: Operation,
    pub data: &'a [u8],
    /// Seconds, read once per check
    pub now: u64,
}

type Outcome = Result<(), Violation>;

pub struct Evaluator<'a, S: AllowanceStore + ?Sized> {
    tree: &'a ConditionTree,
    payload: &'a Payload,
    context: &'a CallContext<'a>,
    store: &'a S,
    customs: &'a CustomRegistry,
}

impl<'a, S: AllowanceStore + ?Sized> Evaluator<'a, S> {
    pub fn new(
        tree: &'a ConditionTree,
        payload: &'a Payload,
        context: &'a CallContext<'a>,
        store: &'a S,
        customs: &'a CustomRegistry,
    ) -> Self {
        Evaluator {
            tree,
            payload,
            context,
            store,
            customs,
        }
    }

    /// Evaluate the whole tree, reserving debits in `consumptions`
    ///
    /// # Returns
    /// The first violation in tree order. On failure `consumptions` may hold
    /// partial reservations; callers discard it.
    pub fn evaluate(&self, consumptions: &mut Consumptions) -> Outcome {
        self.walk(0, Some(Payload::ROOT), consumptions)
    }

    fn walk(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        let node = self.tree.node(index);
        let layout = self.tree.layout(index);

        if layout.is_structural() {
            self.decoded(index, slot)?;
        }

        match node.operator {
            Operator::Pass => Ok(()),
            Operator::And => self.and(index, slot, consumptions),
            Operator::Or => self.or(index, slot, consumptions),
            Operator::Nor => self.nor(index, slot, consumptions),
            Operator::Xor => self.xor(index, slot, consumptions),
            Operator::Matches => self.matches(index, slot, consumptions),
            Operator::ArraySome => self.array_some(index, slot, consumptions),
            Operator::ArrayEvery => self.array_every(index, slot, consumptions),
            Operator::ArraySubset => self.array_subset(index, slot, consumptions),
            Operator::EqualToAvatar => self.equal_to_address(index, slot, self.context.avatar),
            Operator::EqualToCaller => self.equal_to_address(index, slot, self.context.caller),
            Operator::EqualTo => self.equal_to(index, slot),
            Operator::GreaterThan
            | Operator::LessThan
            | Operator::SignedIntGreaterThan
            | Operator::SignedIntLessThan => self.compare(index, slot),
            Operator::Bitmask => self.bitmask(index, slot),
            Operator::Custom => self.custom(index, slot),
            Operator::WithinAllowance => self.within_allowance(index, slot, consumptions),
            Operator::EtherWithinAllowance => {
                let amount = self.context.value;
                self.charge(index, amount, Status::EtherAllowanceExceeded, consumptions)
            }
            Operator::CallWithinAllowance => {
                self.charge(index, U256::from(1), Status::CallAllowanceExceeded, consumptions)
            }
        }
    }

    fn violation(&self, index: usize, status: Status) -> Violation {
        Violation::new(status, index, self.tree.node(index).operator)
    }

    /// Decoded node for a structural condition, rejecting missing or overflowed slots
    fn decoded(&self, index: usize, slot: Option<usize>) -> Result<&'a DecodedNode, Violation> {
        slot.and_then(|s| self.payload.get(s))
            .filter(|d| !d.overflow)
            .ok_or_else(|| self.violation(index, Status::CalldataOverflow))
    }

    /// Children of a logical node paired with their decoded slots
    ///
    /// A variant node hands structural branch `k` its own decoded child `k`;
    /// otherwise every child reads the node's own slot.
    fn logical_branches(&self, index: usize, slot: Option<usize>) -> Vec<(usize, Option<usize>)> {
        let variant_children = match self.tree.layout(index).variant {
            true => slot.and_then(|s| self.payload.get(s)).map(|d| d.children.clone()),
            false => None,
        };

        let mut position = 0usize;
        self.tree
            .children(index)
            .map(|child| match (&variant_children, self.tree.layout(child).is_structural()) {
                (Some(range), true) => {
                    let branch = range.start + position;
                    position += 1;
                    (child, (branch < range.end).then_some(branch))
                }
                _ => (child, slot),
            })
            .collect()
    }

    fn and(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        for (child, child_slot) in self.logical_branches(index, slot) {
            self.walk(child, child_slot, consumptions)?;
        }
        Ok(())
    }

    fn or(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        for (child, child_slot) in self.logical_branches(index, slot) {
            let mut trial = consumptions.clone();
            if self.walk(child, child_slot, &mut trial).is_ok() {
                *consumptions = trial;
                return Ok(());
            }
        }
        Err(self.violation(index, Status::OrViolation))
    }

    fn nor(&self, index: usize, slot: Option<usize>, consumptions: &Consumptions) -> Outcome {
        for (child, child_slot) in self.logical_branches(index, slot) {
            let mut trial = consumptions.clone();
            if self.walk(child, child_slot, &mut trial).is_ok() {
                return Err(self.violation(index, Status::NorViolation));
            }
        }
        Ok(())
    }

    fn xor(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        let mut winner: Option<Consumptions> = None;
        for (child, child_slot) in self.logical_branches(index, slot) {
            let mut trial = consumptions.clone();
            if self.walk(child, child_slot, &mut trial).is_ok() {
                if winner.is_some() {
                    return Err(self.violation(index, Status::XorViolation));
                }
                winner = Some(trial);
            }
        }
        match winner {
            Some(trial) => {
                *consumptions = trial;
                Ok(())
            }
            None => Err(self.violation(index, Status::XorViolation)),
        }
    }

    fn matches(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        let decoded = self.decoded(index, slot)?;
        let elements = decoded.children.clone();

        if self.tree.node(index).param_type == ParameterType::Array {
            let structural = self.tree.structural_children(index).count();
            if elements.len() != structural {
                return Err(self.violation(index, Status::ParameterNotAMatch));
            }
        }

        let mut position = 0usize;
        for child in self.tree.children(index) {
            let child_slot = match self.tree.layout(child).is_structural() {
                true => {
                    let element = elements.start + position;
                    position += 1;
                    (element < elements.end).then_some(element)
                }
                false => None,
            };
            self.walk(child, child_slot, consumptions)?;
        }
        Ok(())
    }

    fn template(&self, index: usize) -> Result<usize, Violation> {
        self.tree
            .first_structural_child(index)
            .ok_or_else(|| self.violation(index, Status::ParameterNotAMatch))
    }

    fn array_some(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        let decoded = self.decoded(index, slot)?;
        let template = self.template(index)?;
        for element in decoded.children.clone() {
            let mut trial = consumptions.clone();
            if self.walk(template, Some(element), &mut trial).is_ok() {
                *consumptions = trial;
                return Ok(());
            }
        }
        Err(self.violation(index, Status::NoArrayElementPasses))
    }

    fn array_every(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        let decoded = self.decoded(index, slot)?;
        let template = self.template(index)?;
        for element in decoded.children.clone() {
            if self.walk(template, Some(element), consumptions).is_err() {
                return Err(self.violation(index, Status::NotEveryArrayElementPasses));
            }
        }
        Ok(())
    }

    /// Every element must satisfy a distinct child condition
    fn array_subset(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        let decoded = self.decoded(index, slot)?;
        let elements = decoded.children.clone();
        if elements.is_empty() || elements.len() > MAX_SUBSET_ELEMENTS {
            return Err(self.violation(index, Status::ParameterNotSubsetOfAllowed));
        }

        let candidates: Vec<usize> = self.tree.structural_children(index).collect();
        let mut taken = vec![false; candidates.len()];
        // Candidates of differing shape each read their own decoding of the element
        let per_candidate = self.tree.layout(index).variant;

        for element in elements {
            let mut matched = false;
            for (position, &candidate) in candidates.iter().enumerate() {
                if taken[position] {
                    continue;
                }
                let candidate_slot = match per_candidate {
                    true => self.payload.get(element).and_then(|d| {
                        let slot = d.children.start + position;
                        d.children.contains(&slot).then_some(slot)
                    }),
                    false => Some(element),
                };
                let mut trial = consumptions.clone();
                if self.walk(candidate, candidate_slot, &mut trial).is_ok() {
                    *consumptions = trial;
                    taken[position] = true;
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Err(self.violation(index, Status::ParameterNotSubsetOfAllowed));
            }
        }
        Ok(())
    }

    /// Encoded bytes of the node's value
    fn value(&self, index: usize, slot: Option<usize>) -> Result<Vec<u8>, Violation> {
        if self.tree.node(index).param_type == ParameterType::EtherValue {
            return Ok(self.context.value.to_be_bytes::<32>().to_vec());
        }
        let decoded = self.decoded(index, slot)?;
        pluck(self.context.data, decoded.location, decoded.size)
            .map(|bytes| bytes.to_vec())
            .map_err(|_| self.violation(index, Status::CalldataOverflow))
    }

    fn word(&self, index: usize, slot: Option<usize>) -> Result<U256, Violation> {
        let value = self.value(index, slot)?;
        match value.len() {
            WORD => Ok(U256::from_be_slice(&value)),
            _ => Err(self.violation(index, Status::CalldataOverflow)),
        }
    }

    fn comp_word(&self, index: usize) -> U256 {
        U256::from_be_slice(&self.tree.node(index).comp_value[..WORD])
    }

    fn equal_to(&self, index: usize, slot: Option<usize>) -> Outcome {
        let node = self.tree.node(index);
        let value = self.value(index, slot)?;

        let equal = match node.param_type {
            ParameterType::Static | ParameterType::EtherValue => value == node.comp_value,
            _ => {
                let actual = match value.len() > WORD {
                    true => keccak256(&value).to_vec(),
                    false => value,
                };
                actual == compress_comp_value(Operator::EqualTo, &node.comp_value)
            }
        };

        match equal {
            true => Ok(()),
            false => Err(self.violation(index, Status::ParameterNotAllowed)),
        }
    }

    fn equal_to_address(&self, index: usize, slot: Option<usize>, expected: Address) -> Outcome {
        match self.word(index, slot)? == U256::from_be_bytes(expected.into_word().0) {
            true => Ok(()),
            false => Err(self.violation(index, Status::ParameterNotAllowed)),
        }
    }

    fn compare(&self, index: usize, slot: Option<usize>) -> Outcome {
        let value = self.word(index, slot)?;
        let bound = self.comp_word(index);

        let (passes, status) = match self.tree.node(index).operator {
            Operator::GreaterThan => (value > bound, Status::ParameterLessThanAllowed),
            Operator::LessThan => (value < bound, Status::ParameterGreaterThanAllowed),
            Operator::SignedIntGreaterThan => (
                I256::from_raw(value) > I256::from_raw(bound),
                Status::ParameterLessThanAllowed,
            ),
            _ => (
                I256::from_raw(value) < I256::from_raw(bound),
                Status::ParameterGreaterThanAllowed,
            ),
        };

        match passes {
            true => Ok(()),
            false => Err(self.violation(index, status)),
        }
    }

    /// compValue: 2-byte shift, 15-byte mask, 15-byte expected value
    fn bitmask(&self, index: usize, slot: Option<usize>) -> Outcome {
        let node = self.tree.node(index);
        let value = self.value(index, slot)?;
        let bytes: &[u8] = match node.param_type {
            ParameterType::Dynamic => {
                let declared = read_word(&value, 0, value.len()).unwrap_or(0);
                value.get(WORD..).map(|c| &c[..declared.min(c.len())]).unwrap_or(&[])
            }
            _ => &value,
        };

        let comp = &node.comp_value;
        let shift = u16::from_be_bytes([comp[0], comp[1]]) as usize;
        let mask = &comp[2..2 + BITMASK_WIDTH];
        let expected = &comp[2 + BITMASK_WIDTH..2 + 2 * BITMASK_WIDTH];

        if shift + BITMASK_WIDTH > bytes.len() {
            return Err(self.violation(index, Status::BitmaskOverflow));
        }

        let window = &bytes[shift..shift + BITMASK_WIDTH];
        let passes = window
            .iter()
            .zip(mask)
            .zip(expected)
            .all(|((b, m), e)| b & m == *e);

        match passes {
            true => Ok(()),
            false => Err(self.violation(index, Status::BitmaskNotAllowed)),
        }
    }

    /// compValue: 20-byte checker address, 12 bytes passed through
    fn custom(&self, index: usize, slot: Option<usize>) -> Outcome {
        let node = self.tree.node(index);
        let value = self.value(index, slot)?;
        let (location, size) = match slot.and_then(|s| self.payload.get(s)) {
            Some(decoded) if node.param_type != ParameterType::EtherValue => (decoded.location, decoded.size),
            _ => (0, 0),
        };

        let address = Address::from_slice(&node.comp_value[..20]);
        let Some(checker) = self.customs.get(&address) else {
            return Err(self.violation(index, Status::CustomConditionViolation));
        };

        let input = CustomInput {
            value: &value,
            extra: &node.comp_value[20..WORD],
            caller: self.context.caller,
            target: self.context.target,
            ether_value: self.context.value,
            operation: self.context.operation,
            data: self.context.data,
            location,
            size,
        };

        match checker.check(&input) {
            true => Ok(()),
            false => Err(self.violation(index, Status::CustomConditionViolation)),
        }
    }

    fn within_allowance(&self, index: usize, slot: Option<usize>, consumptions: &mut Consumptions) -> Outcome {
        let amount = self.word(index, slot)?;
        self.charge(index, amount, Status::AllowanceExceeded, consumptions)
    }

    fn charge(&self, index: usize, amount: U256, status: Status, consumptions: &mut Consumptions) -> Outcome {
        let key = AllowanceKey::from_slice(&self.tree.node(index).comp_value[..WORD]);
        let Ok(amount) = u128::try_from(amount) else {
            return Err(self.violation(index, status));
        };
        match consumptions.charge(self.store, key, amount, self.context.now) {
            true => Ok(()),
            false => Err(self.violation(index, status)),
        }
    }
}
