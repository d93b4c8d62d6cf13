//! Integration tests for the check flow
//!
//! Drives the engine through its public surface: configure a role, submit
//! condition trees, then check calls and batches against them.

use alloy_primitives::{Address, Selector, B256, U256};
use roles_core::{
    role_key, Allowance, Call, ConditionNode, CustomInput, ExecutionOptions, FixedClock, MemoryLedger, Operator,
    ParameterType, PermissionEngine, RoleKey, Status, Verdict,
};
use std::sync::Arc;

const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const EXEC: [u8; 4] = [0x6a, 0x76, 0x12, 0x02];

fn word(value: u64) -> [u8; 32] {
    U256::from(value).to_be_bytes::<32>()
}

fn encode(selector: [u8; 4], words: &[[u8; 32]]) -> Vec<u8> {
    let mut data = selector.to_vec();
    for w in words {
        data.extend_from_slice(w);
    }
    data
}

fn node(parent: u16, param_type: ParameterType, operator: Operator) -> ConditionNode {
    ConditionNode::new(parent, param_type, operator)
}

struct Setup {
    engine: PermissionEngine<MemoryLedger, FixedClock>,
    role: RoleKey,
    token: Address,
    recipient: Address,
    budget: B256,
}

impl Setup {
    /// Role may call `transfer(recipient, amount)` on the token, debiting a
    /// 100-unit budget
    fn new() -> Self {
        let mut engine = PermissionEngine::with_parts(Default::default(), MemoryLedger::new(), FixedClock::new(10_000));
        let role = role_key("treasurer");
        let token = Address::repeat_byte(0x70);
        let recipient = Address::repeat_byte(0x0e);
        let budget = B256::repeat_byte(0xbb);

        engine.roles_mut().scope_target(role, token);
        engine
            .submit_tree(
                role,
                token,
                Selector::from(TRANSFER),
                vec![
                    node(0, ParameterType::Calldata, Operator::Matches),
                    node(0, ParameterType::Static, Operator::EqualTo).with_comp_value(recipient.into_word().to_vec()),
                    node(0, ParameterType::Static, Operator::WithinAllowance).with_comp_value(budget.to_vec()),
                ],
                ExecutionOptions::None,
            )
            .unwrap();
        engine.set_allowance(
            budget,
            Allowance {
                balance: 100,
                ..Default::default()
            },
        );

        Setup {
            engine,
            role,
            token,
            recipient,
            budget,
        }
    }

    fn transfer(&self, to: Address, amount: u64) -> Call {
        Call::new(self.token, encode(TRANSFER, &[to.into_word().0, word(amount)]))
    }

    fn check(&mut self, call: &Call) -> Verdict {
        self.engine.check(&self.role, Address::ZERO, call).unwrap()
    }

    fn balance(&self) -> u128 {
        self.engine.get_allowance(&self.budget).unwrap().balance
    }
}

#[test]
fn test_transfer_allowed_and_denied() {
    let mut setup = Setup::new();

    let ok = setup.transfer(setup.recipient, 30);
    assert_eq!(setup.check(&ok), Verdict::allowed());

    let stranger = setup.transfer(Address::repeat_byte(0x0f), 30);
    let verdict = setup.check(&stranger);
    assert!(!verdict.allowed);
    assert_eq!(verdict.status, Status::ParameterNotAllowed);
    assert_eq!(verdict.violating_node, Some(1));
    assert_eq!(verdict.operator, Some(Operator::EqualTo));

    let truncated = Call::new(setup.token, encode(TRANSFER, &[setup.recipient.into_word().0]));
    assert_eq!(setup.check(&truncated).status, Status::CalldataOverflow);

    assert_eq!(setup.balance(), 70);
}

#[test]
fn test_sequential_checks_commit_independently() {
    let mut setup = Setup::new();

    let first = setup.transfer(setup.recipient, 60);
    let second = setup.transfer(setup.recipient, 50);
    assert!(setup.check(&first).allowed);
    let second = setup.check(&second);
    assert_eq!(second.status, Status::AllowanceExceeded);

    // First debit persists, the rejected one does not
    assert_eq!(setup.balance(), 40);
}

#[test]
fn test_batch_is_all_or_nothing() {
    let mut setup = Setup::new();
    let calls = vec![setup.transfer(setup.recipient, 60), setup.transfer(setup.recipient, 50)];

    let batch = setup.engine.check_batch(&setup.role, Address::ZERO, &calls).unwrap();
    assert!(!batch.allowed);
    assert_eq!(batch.failed_index, Some(1));
    assert_eq!(batch.verdicts.len(), 2);
    assert!(batch.verdicts[0].allowed);
    assert_eq!(batch.verdicts[1].status, Status::AllowanceExceeded);
    assert_eq!(setup.balance(), 100);

    let calls = vec![setup.transfer(setup.recipient, 60), setup.transfer(setup.recipient, 40)];
    let batch = setup.engine.check_batch(&setup.role, Address::ZERO, &calls).unwrap();
    assert!(batch.allowed);
    assert_eq!(batch.failed_index, None);
    assert_eq!(setup.balance(), 0);
}

#[test]
fn test_batch_with_invalid_first_call_persists_nothing() {
    let mut setup = Setup::new();
    let calls = vec![
        setup.transfer(Address::repeat_byte(0x0f), 10),
        setup.transfer(setup.recipient, 10),
    ];

    let batch = setup.engine.check_batch(&setup.role, Address::ZERO, &calls).unwrap();
    assert_eq!(batch.failed_index, Some(0));
    assert_eq!(batch.verdicts.len(), 1);
    assert_eq!(setup.balance(), 100);
}

#[test]
fn test_clearance_lifecycle() {
    let mut engine = PermissionEngine::with_parts(Default::default(), MemoryLedger::new(), FixedClock::new(0));
    let role = role_key("operator");
    let target = Address::repeat_byte(0x01);
    let call = Call::new(target, encode(TRANSFER, &[word(1)]));
    let status = |engine: &mut PermissionEngine<MemoryLedger, FixedClock>| {
        engine.check(&role, Address::ZERO, &call).unwrap().status
    };

    assert_eq!(status(&mut engine), Status::TargetAddressNotAllowed);

    engine.roles_mut().allow_target(role, target, ExecutionOptions::None);
    assert_eq!(status(&mut engine), Status::Ok);

    engine.roles_mut().revoke_target(role, target);
    assert_eq!(status(&mut engine), Status::TargetAddressNotAllowed);

    engine.roles_mut().scope_target(role, target);
    assert_eq!(status(&mut engine), Status::FunctionNotAllowed);

    engine
        .roles_mut()
        .allow_function(role, target, Selector::from(TRANSFER), ExecutionOptions::None);
    assert_eq!(status(&mut engine), Status::Ok);

    engine.roles_mut().revoke_function(role, target, Selector::from(TRANSFER));
    assert_eq!(status(&mut engine), Status::FunctionNotAllowed);
}

#[test]
fn test_execution_options_and_short_selector() {
    let mut engine = PermissionEngine::with_parts(Default::default(), MemoryLedger::new(), FixedClock::new(0));
    let role = role_key("operator");
    let target = Address::repeat_byte(0x01);
    engine.roles_mut().allow_target(role, target, ExecutionOptions::None);

    let paid = Call::new(target, vec![]).with_value(U256::from(1));
    assert_eq!(engine.check(&role, Address::ZERO, &paid).unwrap().status, Status::SendNotAllowed);

    let delegated = Call::new(target, vec![]).delegate();
    assert_eq!(
        engine.check(&role, Address::ZERO, &delegated).unwrap().status,
        Status::DelegateCallNotAllowed
    );

    let short = Call::new(target, vec![0xa9, 0x05]);
    assert_eq!(
        engine.check(&role, Address::ZERO, &short).unwrap().status,
        Status::FunctionSignatureTooShort
    );
}

#[test]
fn test_nested_calldata_conditions() {
    let mut engine = PermissionEngine::with_parts(Default::default(), MemoryLedger::new(), FixedClock::new(0));
    let role = role_key("relayer");
    let module = Address::repeat_byte(0x5a);
    let recipient = Address::repeat_byte(0x0e);
    engine.roles_mut().scope_target(role, module);

    // exec(address to, bytes data) where data must be transfer(recipient, < 1000)
    engine
        .submit_tree(
            role,
            module,
            Selector::from(EXEC),
            vec![
                node(0, ParameterType::Calldata, Operator::Matches),
                node(0, ParameterType::Static, Operator::Pass),
                node(0, ParameterType::Calldata, Operator::Matches),
                node(2, ParameterType::Static, Operator::EqualTo).with_comp_value(recipient.into_word().to_vec()),
                node(2, ParameterType::Static, Operator::LessThan).with_comp_value(word(1000).to_vec()),
            ],
            ExecutionOptions::None,
        )
        .unwrap();

    let exec = |amount: u64| {
        let inner = encode(TRANSFER, &[recipient.into_word().0, word(amount)]);
        let mut data = encode(EXEC, &[Address::repeat_byte(0x70).into_word().0, word(64), word(inner.len() as u64)]);
        data.extend_from_slice(&inner);
        data.extend_from_slice(&[0u8; 28]);
        Call::new(module, data)
    };

    assert!(engine.check(&role, Address::ZERO, &exec(999)).unwrap().allowed);

    let verdict = engine.check(&role, Address::ZERO, &exec(1000)).unwrap();
    assert_eq!(verdict.status, Status::ParameterGreaterThanAllowed);
    assert_eq!(verdict.violating_node, Some(4));
}

#[test]
fn test_variant_bytes_parameter() {
    let mut engine = PermissionEngine::with_parts(Default::default(), MemoryLedger::new(), FixedClock::new(0));
    let role = role_key("relayer");
    let target = Address::repeat_byte(0x5b);
    engine.roles_mut().scope_target(role, target);

    // bytes parameter: abi.encode(uint256 == 7) or abi.encode(uint256, uint256 == 9)
    engine
        .submit_tree(
            role,
            target,
            Selector::from(EXEC),
            vec![
                node(0, ParameterType::Calldata, Operator::Matches),
                node(0, ParameterType::None, Operator::Or),
                node(1, ParameterType::AbiEncoded, Operator::Matches),
                node(1, ParameterType::AbiEncoded, Operator::Matches),
                node(2, ParameterType::Static, Operator::EqualTo).with_comp_value(word(7).to_vec()),
                node(3, ParameterType::Static, Operator::Pass),
                node(3, ParameterType::Static, Operator::EqualTo).with_comp_value(word(9).to_vec()),
            ],
            ExecutionOptions::None,
        )
        .unwrap();

    let single = Call::new(target, encode(EXEC, &[word(32), word(32), word(7)]));
    assert!(engine.check(&role, Address::ZERO, &single).unwrap().allowed);

    let pair = Call::new(target, encode(EXEC, &[word(32), word(64), word(1), word(9)]));
    assert!(engine.check(&role, Address::ZERO, &pair).unwrap().allowed);

    let neither = Call::new(target, encode(EXEC, &[word(32), word(32), word(8)]));
    let verdict = engine.check(&role, Address::ZERO, &neither).unwrap();
    assert_eq!(verdict.status, Status::OrViolation);
    assert_eq!(verdict.violating_node, Some(1));
}

#[test]
fn test_ether_value_and_refill_over_time() {
    let mut engine = PermissionEngine::with_parts(Default::default(), MemoryLedger::new(), FixedClock::new(0));
    let role = role_key("payer");
    let target = Address::repeat_byte(0x5c);
    let key = B256::repeat_byte(0xee);
    engine.roles_mut().scope_target(role, target);
    engine
        .submit_tree(
            role,
            target,
            Selector::from(TRANSFER),
            vec![
                node(0, ParameterType::Calldata, Operator::Matches),
                node(0, ParameterType::EtherValue, Operator::EtherWithinAllowance).with_comp_value(key.to_vec()),
                node(0, ParameterType::Static, Operator::Pass),
            ],
            ExecutionOptions::Send,
        )
        .unwrap();
    engine.set_allowance(
        key,
        Allowance {
            balance: 0,
            max_balance: 100,
            refill_amount: 100,
            refill_interval: 3_600,
            refill_timestamp: 0,
        },
    );

    let pay = Call::new(target, encode(TRANSFER, &[word(0)])).with_value(U256::from(100));
    assert_eq!(
        engine.check(&role, Address::ZERO, &pay).unwrap().status,
        Status::EtherAllowanceExceeded
    );

    engine.clock_mut().advance(3_600);
    assert!(engine.check(&role, Address::ZERO, &pay).unwrap().allowed);
    assert_eq!(engine.get_allowance(&key).unwrap().refill_timestamp, 3_600);

    assert_eq!(
        engine.check(&role, Address::ZERO, &pay).unwrap().status,
        Status::EtherAllowanceExceeded
    );
}

#[test]
fn test_custom_condition_through_engine() {
    let mut engine = PermissionEngine::with_parts(Default::default(), MemoryLedger::new(), FixedClock::new(0));
    let role = role_key("keeper");
    let target = Address::repeat_byte(0x5d);
    let checker = Address::repeat_byte(0xcc);
    engine.roles_mut().scope_target(role, target);
    engine.register_custom(
        checker,
        Arc::new(|input: &CustomInput<'_>| input.value[31] < 10),
    );

    let mut comp = checker.to_vec();
    comp.extend_from_slice(&[0u8; 12]);
    engine
        .submit_tree(
            role,
            target,
            Selector::from(TRANSFER),
            vec![
                node(0, ParameterType::Calldata, Operator::Matches),
                node(0, ParameterType::Static, Operator::Custom).with_comp_value(comp),
            ],
            ExecutionOptions::None,
        )
        .unwrap();

    let call = |n: u64| Call::new(target, encode(TRANSFER, &[word(n)]));
    assert!(engine.check(&role, Address::ZERO, &call(3)).unwrap().allowed);
    assert_eq!(
        engine.check(&role, Address::ZERO, &call(12)).unwrap().status,
        Status::CustomConditionViolation
    );
}
