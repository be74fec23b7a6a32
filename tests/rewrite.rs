//! Rewriting of instructions: repair copies, splits and reassembly.

mod common;

use common::{assert_idempotent, insts, insts_with, select};
use regbanksel::debug_utils::GenericFunction;
use regbanksel::function::{
    Cond, Function, Intrinsic, MemFlags, MemOperand, Opcode, Operand, Type, Value,
};
use regbanksel::regbank::{BANK_CATALOG, RegBank};
use regbanksel::resolver::candidates;
use regbanksel::{Mode, Options, RegBankError, RegBankSelect};

const PTR: Type = Type::Pointer {
    addr_space: 1,
    bits: 64,
};

fn values(func: &GenericFunction, inst: regbanksel::function::Inst) -> Vec<Value> {
    func.inst_operands(inst)
        .iter()
        .filter_map(|op| op.value())
        .collect()
}

#[test]
fn uniform_arith_stays_scalar() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value(Type::S32);
    let b = func.add_value(Type::S32);
    let d = func.add_value(Type::S32);
    func.push_inst(
        block,
        Opcode::Add,
        &[Operand::Def(d), Operand::Use(a), Operand::Use(b)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    for value in [a, b, d] {
        assert_eq!(func.value_bank(value), Some(RegBank::Scalar));
    }
}

#[test]
fn vector_op_reads_scalar_first_operand() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let s = func.add_value_in_bank(Type::S32, RegBank::Scalar);
    let v = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let d = func.add_value(Type::S32);
    let add = func.push_inst(
        block,
        Opcode::Add,
        &[Operand::Def(d), Operand::Use(s), Operand::Use(v)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(insts(&func), [add]);
    assert_eq!(func.value_bank(d), Some(RegBank::Vector));
}

#[test]
fn vector_op_copies_scalar_second_operand() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let v = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let s = func.add_value_in_bank(Type::S32, RegBank::Scalar);
    let d = func.add_value(Type::S32);
    let add = func.push_inst(
        block,
        Opcode::Add,
        &[Operand::Def(d), Operand::Use(v), Operand::Use(s)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    let copies = insts_with(&func, Opcode::Copy);
    assert_eq!(copies.len(), 1);
    assert_eq!(insts(&func), [copies[0], add]);
    let &[Operand::Def(copy), Operand::Use(src)] = func.inst_operands(copies[0]) else {
        panic!("malformed copy");
    };
    assert_eq!(src, s);
    assert_eq!(func.value_bank(copy), Some(RegBank::Vector));
    assert_eq!(func.inst_operands(add)[2], Operand::Use(copy));
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn repair_copy_is_shared_within_instruction() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let s = func.add_value_in_bank(Type::S32, RegBank::Scalar);
    let v = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let d = func.add_value(Type::S32);
    func.push_inst(
        block,
        Opcode::Fma,
        &[
            Operand::Def(d),
            Operand::Use(v),
            Operand::Use(s),
            Operand::Use(s),
        ],
    );

    select(&mut func, Mode::Fast).unwrap();

    assert_eq!(insts_with(&func, Opcode::Copy).len(), 1);
}

#[test]
fn def_in_other_bank_is_copied_back() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let d = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let constant = func.push_inst(block, Opcode::Constant, &[Operand::Def(d), Operand::Imm(7)]);

    select(&mut func, Mode::Greedy).unwrap();

    let Operand::Def(scalar) = func.inst_operands(constant)[0] else {
        panic!("malformed constant");
    };
    assert_ne!(scalar, d);
    assert_eq!(func.value_bank(scalar), Some(RegBank::Scalar));
    assert_eq!(func.value_bank(d), Some(RegBank::Vector));

    let copy = func.value_def(d).unwrap();
    assert_eq!(insts(&func), [constant, copy]);
    assert_eq!(
        func.inst_operands(copy),
        [Operand::Def(d), Operand::Use(scalar)]
    );
    assert_idempotent(&mut func, Mode::Greedy);
}

/// Builds `icmp eq` of two 32-bit values in `bank`, returning the condition.
fn compare(func: &mut GenericFunction, block: regbanksel::function::Block, bank: RegBank) -> Value {
    let a = func.add_value_in_bank(Type::S32, bank);
    let b = func.add_value_in_bank(Type::S32, bank);
    let c = func.add_value(Type::S1);
    func.push_inst(
        block,
        Opcode::Icmp,
        &[
            Operand::Def(c),
            Operand::Cond(Cond::Eq),
            Operand::Use(a),
            Operand::Use(b),
        ],
    );
    c
}

#[test]
fn one_bit_logic_on_uniform_conditions() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let c1 = compare(&mut func, block, RegBank::Scalar);
    let c2 = compare(&mut func, block, RegBank::Scalar);
    let d = func.add_value(Type::S1);
    func.push_inst(
        block,
        Opcode::And,
        &[Operand::Def(d), Operand::Use(c1), Operand::Use(c2)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    for value in [c1, c2, d] {
        assert_eq!(func.value_bank(value), Some(RegBank::UniformFlag));
    }
    assert!(insts_with(&func, Opcode::Copy).is_empty());
}

#[test]
fn one_bit_logic_on_divergent_condition() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let c1 = compare(&mut func, block, RegBank::Vector);
    let c2 = compare(&mut func, block, RegBank::Scalar);
    let d = func.add_value(Type::S1);
    let and = func.push_inst(
        block,
        Opcode::Or,
        &[Operand::Def(d), Operand::Use(c1), Operand::Use(c2)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(func.value_bank(c1), Some(RegBank::LaneMask));
    assert_eq!(func.value_bank(c2), Some(RegBank::UniformFlag));
    assert_eq!(func.value_bank(d), Some(RegBank::LaneMask));
    for value in values(&func, and) {
        assert_eq!(func.value_bank(value), Some(RegBank::LaneMask));
    }
    assert_eq!(insts_with(&func, Opcode::Copy).len(), 1);
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn select64_is_split_and_merged_for_whole_use() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let c = compare(&mut func, block, RegBank::Vector);
    let a = func.add_value_in_bank(Type::S64, RegBank::Vector);
    let b = func.add_value_in_bank(Type::S64, RegBank::Vector);
    let d = func.add_value(Type::S64);
    let ptr = func.add_value(PTR);
    let sel = func.push_inst(
        block,
        Opcode::Select,
        &[
            Operand::Def(d),
            Operand::Use(c),
            Operand::Use(a),
            Operand::Use(b),
        ],
    );
    let store = func.push_mem_inst(
        block,
        Opcode::Store,
        &[Operand::Use(d), Operand::Use(ptr)],
        &[MemOperand {
            size: 8,
            flags: MemFlags::STORE,
        }],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert!(!insts(&func).contains(&sel));
    assert_eq!(insts_with(&func, Opcode::UnmergeValues).len(), 2);

    let selects = insts_with(&func, Opcode::Select);
    assert_eq!(selects.len(), 2);
    let halves: Vec<Value> = selects
        .iter()
        .map(|&inst| {
            let ops = func.inst_operands(inst);
            assert_eq!(ops[1], Operand::Use(c));
            let Operand::Def(half) = ops[0] else {
                panic!("malformed select");
            };
            assert_eq!(func.value_type(half), Type::S32);
            assert_eq!(func.value_bank(half), Some(RegBank::Vector));
            half
        })
        .collect();

    // The store reads the reassembled value.
    let merges = insts_with(&func, Opcode::MergeValues);
    assert_eq!(merges.len(), 1);
    let all = insts(&func);
    let store_pos = all.iter().position(|&inst| inst == store).unwrap();
    assert_eq!(all[store_pos - 1], merges[0]);
    let &[Operand::Def(merged), Operand::Use(lo), Operand::Use(hi)] =
        func.inst_operands(merges[0])
    else {
        panic!("malformed merge");
    };
    assert_eq!([lo, hi], [halves[0], halves[1]]);
    assert_eq!(func.inst_operands(store)[0], Operand::Use(merged));
    assert_eq!(func.value_bank(ptr), Some(RegBank::Vector));
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn carry64_is_split_into_carry_chain() {
    for (opcode, lo_opcode, hi_opcode) in [
        (Opcode::Uaddo, Opcode::Uaddo, Opcode::Uadde),
        (Opcode::Ssubo, Opcode::Usubo, Opcode::Ssube),
    ] {
        let mut func = GenericFunction::new();
        let block = func.add_block();
        let a = func.add_value_in_bank(Type::S64, RegBank::Vector);
        let b = func.add_value_in_bank(Type::S64, RegBank::Vector);
        let d = func.add_value(Type::S64);
        let carry = func.add_value(Type::S1);
        func.push_inst(
            block,
            opcode,
            &[
                Operand::Def(d),
                Operand::Def(carry),
                Operand::Use(a),
                Operand::Use(b),
            ],
        );
        func.push_inst(
            block,
            Opcode::BrCond,
            &[Operand::Use(carry), Operand::Block(block)],
        );

        select(&mut func, Mode::Greedy).unwrap();

        let lo = insts_with(&func, lo_opcode);
        let hi = insts_with(&func, hi_opcode);
        assert_eq!(lo.len(), 1);
        assert_eq!(hi.len(), 1);
        let (lo, hi) = (lo[0], hi[0]);
        assert_eq!(func.inst_operands(lo).len(), 4);

        // The low half's carry feeds the high half, which produces the
        // original carry.
        let Operand::Def(mid) = func.inst_operands(lo)[1] else {
            panic!("malformed low half");
        };
        assert_eq!(func.inst_operands(hi)[4], Operand::Use(mid));
        assert_eq!(func.value_def(carry), Some(hi));
        assert_eq!(func.value_bank(carry), Some(RegBank::LaneMask));
        assert_eq!(func.value_bank(mid), Some(RegBank::LaneMask));
        assert_eq!(func.value_def(d), None);
        assert_idempotent(&mut func, Mode::Greedy);
    }
}

#[test]
fn uniform_carry_stays_scalar() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value(Type::S64);
    let b = func.add_value(Type::S64);
    let d = func.add_value(Type::S64);
    let carry = func.add_value(Type::S1);
    let uaddo = func.push_inst(
        block,
        Opcode::Uaddo,
        &[
            Operand::Def(d),
            Operand::Def(carry),
            Operand::Use(a),
            Operand::Use(b),
        ],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(insts(&func), [uaddo]);
    assert_eq!(func.value_bank(d), Some(RegBank::Scalar));
    assert_eq!(func.value_bank(carry), Some(RegBank::UniformFlag));
}

#[test]
fn split_source_is_decomposed_once_at_definition() {
    let mut func = GenericFunction::new();
    let entry = func.add_block();
    let body = func.add_block();
    let ptr = func.add_value(PTR);
    let x = func.add_value(Type::S64);
    let load = func.push_mem_inst(
        entry,
        Opcode::Load,
        &[Operand::Def(x), Operand::Use(ptr)],
        &[MemOperand {
            size: 8,
            flags: MemFlags::LOAD,
        }],
    );
    for _ in 0..2 {
        let y = func.add_value_in_bank(Type::S64, RegBank::Scalar);
        let d = func.add_value(Type::S64);
        func.push_inst(
            body,
            Opcode::Xor,
            &[Operand::Def(d), Operand::Use(x), Operand::Use(y)],
        );
    }

    select(&mut func, Mode::Greedy).unwrap();

    // One unmerge for the loaded value, placed right after the load, and one
    // for each scalar input.
    let unmerges = insts_with(&func, Opcode::UnmergeValues);
    assert_eq!(unmerges.len(), 3);
    let entry_insts = func.block_insts(entry);
    let load_pos = entry_insts.iter().position(|&inst| inst == load).unwrap();
    let after_load = entry_insts[load_pos + 1];
    assert_eq!(func.inst_opcode(after_load), Opcode::UnmergeValues);
    assert_eq!(func.inst_operands(after_load)[2], Operand::Use(x));

    // Every half of the vector input is read in the second slot.
    for xor in insts_with(&func, Opcode::Xor) {
        let ops = values(&func, xor);
        assert_eq!(func.value_bank(ops[1]), Some(RegBank::Scalar));
        assert_eq!(func.value_bank(ops[2]), Some(RegBank::Vector));
    }
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn unsupported_opcodes_are_rejected() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value(Type::S32);
    let d = func.add_value(Type::S32);
    let phi = func.push_inst(
        block,
        Opcode::Phi,
        &[Operand::Def(d), Operand::Use(a), Operand::Block(block)],
    );
    let err = select(&mut func, Mode::Greedy).unwrap_err();
    assert!(matches!(
        err,
        RegBankError::InvalidMapping { inst, opcode: Opcode::Phi } if inst == phi
    ));

    let mut func = GenericFunction::new();
    let block = func.add_block();
    let d = func.add_value(Type::S32);
    func.push_inst(
        block,
        Opcode::Intrinsic,
        &[Operand::Def(d), Operand::Intrinsic(Intrinsic::Other(1234))],
    );
    let err = select(&mut func, Mode::Greedy).unwrap_err();
    assert!(err.to_string().contains("intrinsic"));
}

#[test]
fn impossible_copy_is_rejected() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let v = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let s = func.add_value_in_bank(Type::S32, RegBank::Scalar);
    func.push_inst(block, Opcode::Copy, &[Operand::Def(s), Operand::Use(v)]);

    assert!(matches!(
        select(&mut func, Mode::Greedy),
        Err(RegBankError::InvalidMapping {
            opcode: Opcode::Copy,
            ..
        })
    ));
}

#[test]
fn selector_is_reusable() {
    let _ = pretty_env_logger::try_init();

    let mut regbanksel = RegBankSelect::new();
    let options = Options::default();
    for bank in [RegBank::Vector, RegBank::Scalar, RegBank::Vector] {
        let mut func = GenericFunction::new();
        let block = func.add_block();
        let a = func.add_value_in_bank(Type::S64, bank);
        let b = func.add_value(Type::S64);
        let d = func.add_value(Type::S64);
        func.push_inst(
            block,
            Opcode::Xor,
            &[Operand::Def(d), Operand::Use(a), Operand::Use(b)],
        );
        regbanksel.run(&mut func, &BANK_CATALOG, &options).unwrap();
        regbanksel::debug_utils::check_bank_assignment(&func, &BANK_CATALOG).unwrap();

        let split = bank == RegBank::Vector;
        assert_eq!(insts_with(&func, Opcode::Xor).len(), if split { 2 } else { 1 });
        assert!(regbanksel.stats().to_string().contains("split_insts"));
    }
}

#[test]
fn carry_in64_is_split_into_carry_chain() {
    for (opcode, lo_opcode, hi_opcode) in [
        (Opcode::Uadde, Opcode::Uadde, Opcode::Uadde),
        (Opcode::Usube, Opcode::Usube, Opcode::Usube),
        (Opcode::Sadde, Opcode::Uadde, Opcode::Sadde),
        (Opcode::Ssube, Opcode::Usube, Opcode::Ssube),
    ] {
        let mut func = GenericFunction::new();
        let block = func.add_block();
        let carry_in = compare(&mut func, block, RegBank::Vector);
        let a = func.add_value_in_bank(Type::S64, RegBank::Vector);
        let b = func.add_value_in_bank(Type::S64, RegBank::Vector);
        let d = func.add_value(Type::S64);
        let carry = func.add_value(Type::S1);
        func.push_inst(
            block,
            opcode,
            &[
                Operand::Def(d),
                Operand::Def(carry),
                Operand::Use(a),
                Operand::Use(b),
                Operand::Use(carry_in),
            ],
        );

        select(&mut func, Mode::Greedy).unwrap();

        // The low half consumes the incoming carry.
        let lo = insts(&func)
            .into_iter()
            .find(|&inst| {
                func.inst_opcode(inst) == lo_opcode
                    && func.inst_operands(inst).get(4) == Some(&Operand::Use(carry_in))
            })
            .unwrap();
        let Operand::Def(mid) = func.inst_operands(lo)[1] else {
            panic!("malformed low half");
        };
        assert_ne!(mid, carry);

        // The high half consumes the low half's carry and produces the
        // original one.
        let hi = func.value_def(carry).unwrap();
        assert_ne!(hi, lo);
        assert_eq!(func.inst_opcode(hi), hi_opcode);
        assert_eq!(func.inst_operands(hi)[4], Operand::Use(mid));

        for value in [carry_in, mid, carry] {
            assert_eq!(func.value_bank(value), Some(RegBank::LaneMask));
        }
        assert_eq!(func.value_def(d), None);
        assert_eq!(insts_with(&func, Opcode::UnmergeValues).len(), 2);
        assert_idempotent(&mut func, Mode::Greedy);
    }
}

#[test]
fn brcond_alternatives_keep_condition_bank() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let uniform = compare(&mut func, block, RegBank::Scalar);
    let divergent = compare(&mut func, block, RegBank::Vector);
    let unknown = func.add_value(Type::S1);
    let mut branches = vec![];
    for cond in [uniform, divergent, unknown] {
        branches.push(func.push_inst(
            block,
            Opcode::BrCond,
            &[Operand::Use(cond), Operand::Block(block)],
        ));
    }

    let fast = candidates(&func, &BANK_CATALOG, branches[0], Mode::Fast);
    assert!(fast.alternatives.is_empty());
    let greedy = candidates(&func, &BANK_CATALOG, branches[0], Mode::Greedy);
    let banks: Vec<_> = greedy
        .alternatives
        .iter()
        .map(|m| m.operand(0).unwrap().bank())
        .collect();
    assert_eq!(banks, [RegBank::UniformFlag, RegBank::LaneMask]);

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(func.value_bank(uniform), Some(RegBank::UniformFlag));
    assert_eq!(func.value_bank(divergent), Some(RegBank::LaneMask));
    assert_eq!(func.value_bank(unknown), Some(RegBank::LaneMask));
    assert!(insts_with(&func, Opcode::Copy).is_empty());
    for (&branch, cond) in branches.iter().zip([uniform, divergent, unknown]) {
        assert_eq!(func.inst_operands(branch)[0], Operand::Use(cond));
    }
}

#[test]
fn export_inputs_use_fixed_banks() {
    use RegBank::{Scalar as S, Vector as V};
    for (intrinsic, expected) in [
        (Intrinsic::Exp, &[S, S, V, V, V, V, S, S][..]),
        (Intrinsic::ExpCompr, &[S, S, V, V, S, S][..]),
    ] {
        let mut func = GenericFunction::new();
        let block = func.add_block();
        let inputs: Vec<Value> = expected.iter().map(|_| func.add_value(Type::S32)).collect();
        let mut ops = vec![Operand::Intrinsic(intrinsic)];
        ops.extend(inputs.iter().map(|&v| Operand::Use(v)));
        func.push_inst(block, Opcode::IntrinsicSideEffects, &ops);

        select(&mut func, Mode::Greedy).unwrap();

        let banks: Vec<_> = inputs.iter().map(|&v| func.value_bank(v).unwrap()).collect();
        assert_eq!(banks, expected);
    }
}

#[test]
fn export_rejects_vector_value_in_scalar_slot() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let mut ops = vec![Operand::Intrinsic(Intrinsic::ExpCompr)];
    ops.push(Operand::Use(func.add_value_in_bank(Type::S32, RegBank::Vector)));
    for _ in 0..5 {
        ops.push(Operand::Use(func.add_value(Type::S32)));
    }
    func.push_inst(block, Opcode::IntrinsicSideEffects, &ops);

    assert!(matches!(
        select(&mut func, Mode::Greedy),
        Err(RegBankError::InvalidMapping {
            opcode: Opcode::IntrinsicSideEffects,
            ..
        })
    ));
}

#[test]
fn wqm_vote_reads_lane_mask_as_scalar() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let cond = compare(&mut func, block, RegBank::Vector);
    let vote = func.add_value(Type::S1);
    let inst = func.push_inst(
        block,
        Opcode::Intrinsic,
        &[
            Operand::Def(vote),
            Operand::Intrinsic(Intrinsic::WqmVote),
            Operand::Use(cond),
        ],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(func.value_bank(cond), Some(RegBank::LaneMask));
    assert_eq!(func.value_bank(vote), Some(RegBank::Scalar));
    let Operand::Use(mask) = func.inst_operands(inst)[2] else {
        panic!("malformed wqm_vote");
    };
    assert_eq!(func.value_bank(mask), Some(RegBank::Scalar));
    let copy = func.value_def(mask).unwrap();
    assert_eq!(
        func.inst_operands(copy),
        [Operand::Def(mask), Operand::Use(cond)]
    );
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn split_result_pinned_to_scalar_is_rejected() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value_in_bank(Type::S64, RegBank::Vector);
    let b = func.add_value_in_bank(Type::S64, RegBank::Vector);
    let d = func.add_value_in_bank(Type::S64, RegBank::Scalar);
    func.push_inst(
        block,
        Opcode::Xor,
        &[Operand::Def(d), Operand::Use(a), Operand::Use(b)],
    );

    for mode in [Mode::Fast, Mode::Greedy] {
        let mut func = func.clone();
        assert!(matches!(
            select(&mut func, mode),
            Err(RegBankError::InvalidMapping {
                opcode: Opcode::Xor,
                ..
            })
        ));
    }
}
