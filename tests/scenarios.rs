//! End-to-end bank selection on small hand-written functions.

mod common;

use common::{assert_idempotent, insts, insts_with, select};
use regbanksel::Mode;
use regbanksel::analysis::trace_constant;
use regbanksel::debug_utils::GenericFunction;
use regbanksel::function::{
    Cond, Function, Inst, MemFlags, MemOperand, Opcode, Operand, Type, Value,
};
use regbanksel::regbank::RegBank;

const PTR: Type = Type::Pointer {
    addr_space: 1,
    bits: 64,
};

#[test]
fn and64_scalar_operands_stays_whole() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value_in_bank(Type::S64, RegBank::Scalar);
    let b = func.add_value_in_bank(Type::S64, RegBank::Scalar);
    let d = func.add_value(Type::S64);
    let and = func.push_inst(
        block,
        Opcode::And,
        &[Operand::Def(d), Operand::Use(a), Operand::Use(b)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(insts(&func), [and]);
    assert_eq!(
        func.inst_operands(and),
        [Operand::Def(d), Operand::Use(a), Operand::Use(b)]
    );
    assert_eq!(func.value_bank(d), Some(RegBank::Scalar));
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn and64_vector_operand_is_split() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value_in_bank(Type::S64, RegBank::Scalar);
    let b = func.add_value_in_bank(Type::S64, RegBank::Vector);
    let d = func.add_value(Type::S64);
    let and = func.push_inst(
        block,
        Opcode::And,
        &[Operand::Def(d), Operand::Use(a), Operand::Use(b)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    let all = insts(&func);
    assert!(!all.contains(&and));
    assert_eq!(all.len(), 4);

    let unmerges = insts_with(&func, Opcode::UnmergeValues);
    assert_eq!(unmerges.len(), 2);
    for &unmerge in &unmerges {
        let &[Operand::Def(lo), Operand::Def(hi), Operand::Use(src)] = func.inst_operands(unmerge)
        else {
            panic!("malformed unmerge");
        };
        assert!(src == a || src == b);
        assert_eq!(func.value_type(lo), Type::S32);
        assert_eq!(func.value_type(hi), Type::S32);
        assert_eq!(func.value_bank(lo), func.value_bank(src));
        assert_eq!(func.value_bank(hi), func.value_bank(src));
    }

    let ands = insts_with(&func, Opcode::And);
    assert_eq!(ands.len(), 2);
    for &half in &ands {
        let &[Operand::Def(dst), Operand::Use(src0), Operand::Use(src1)] =
            func.inst_operands(half)
        else {
            panic!("malformed and");
        };
        assert_eq!(func.value_type(dst), Type::S32);
        assert_eq!(func.value_bank(dst), Some(RegBank::Vector));
        // The scalar half is read directly as the first input.
        assert_eq!(func.value_bank(src0), Some(RegBank::Scalar));
        assert_eq!(func.value_bank(src1), Some(RegBank::Vector));
    }

    // The original result has no definition left since nothing reads it
    // whole.
    assert_eq!(func.value_def(d), None);
    assert_eq!(func.value_bank(d), Some(RegBank::Vector));
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn icmp_mixed_operands_fast_mode() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value_in_bank(Type::S32, RegBank::Scalar);
    let b = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let c = func.add_value(Type::S1);
    let icmp = func.push_inst(
        block,
        Opcode::Icmp,
        &[
            Operand::Def(c),
            Operand::Cond(Cond::Eq),
            Operand::Use(a),
            Operand::Use(b),
        ],
    );

    select(&mut func, Mode::Fast).unwrap();

    assert_eq!(func.value_bank(c), Some(RegBank::LaneMask));
    let &[_, _, Operand::Use(src0), Operand::Use(src1)] = func.inst_operands(icmp) else {
        panic!("malformed icmp");
    };
    assert_ne!(src0, a);
    assert_eq!(src1, b);
    assert_eq!(func.value_bank(src0), Some(RegBank::Vector));

    let copy = func.value_def(src0).unwrap();
    assert_eq!(func.inst_opcode(copy), Opcode::Copy);
    assert_eq!(func.inst_operands(copy)[1], Operand::Use(a));
    assert_eq!(insts(&func), [copy, icmp]);
    assert_idempotent(&mut func, Mode::Fast);
}

#[test]
fn icmp_mixed_operands_greedy_reads_scalar_directly() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let a = func.add_value_in_bank(Type::S32, RegBank::Scalar);
    let b = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let c = func.add_value(Type::S1);
    let icmp = func.push_inst(
        block,
        Opcode::Icmp,
        &[
            Operand::Def(c),
            Operand::Cond(Cond::Slt),
            Operand::Use(a),
            Operand::Use(b),
        ],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(insts(&func), [icmp]);
    assert_eq!(func.value_bank(c), Some(RegBank::LaneMask));
    assert_eq!(func.inst_operands(icmp)[2], Operand::Use(a));
    assert_eq!(func.inst_operands(icmp)[3], Operand::Use(b));
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn uniform_load_is_scalar() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let ptr = func.add_value(PTR);
    let v = func.add_value(Type::S32);
    func.push_mem_inst(
        block,
        Opcode::Load,
        &[Operand::Def(v), Operand::Use(ptr)],
        &[MemOperand {
            size: 4,
            flags: MemFlags::LOAD | MemFlags::UNIFORM,
        }],
    );

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(func.value_bank(v), Some(RegBank::Scalar));
    assert_eq!(func.value_bank(ptr), Some(RegBank::Scalar));
}

#[test]
fn divergent_load_is_vector() {
    for mode in [Mode::Fast, Mode::Greedy] {
        let mut func = GenericFunction::new();
        let block = func.add_block();
        let ptr = func.add_value(PTR);
        let v = func.add_value(Type::S32);
        func.push_mem_inst(
            block,
            Opcode::Load,
            &[Operand::Def(v), Operand::Use(ptr)],
            &[MemOperand {
                size: 4,
                flags: MemFlags::LOAD,
            }],
        );

        select(&mut func, mode).unwrap();

        assert_eq!(func.value_bank(v), Some(RegBank::Vector));
        assert_eq!(func.value_bank(ptr), Some(RegBank::Vector));
    }
}

#[test]
fn extract_vector_elt_constant_index_is_scalar() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let vec = func.add_value(Type::Vector {
        lanes: 2,
        elem_bits: 32,
    });
    let idx = func.add_value(Type::S32);
    let idx_copy = func.add_value(Type::S32);
    let elt = func.add_value(Type::S32);
    func.push_inst(block, Opcode::Constant, &[Operand::Def(idx), Operand::Imm(1)]);
    func.push_inst(
        block,
        Opcode::Copy,
        &[Operand::Def(idx_copy), Operand::Use(idx)],
    );
    func.push_inst(
        block,
        Opcode::ExtractVectorElt,
        &[Operand::Def(elt), Operand::Use(vec), Operand::Use(idx_copy)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    for value in [vec, idx, idx_copy, elt] {
        assert_eq!(func.value_bank(value), Some(RegBank::Scalar));
    }
    assert_idempotent(&mut func, Mode::Greedy);
}

#[test]
fn extract_vector_elt_variable_index_is_vector() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let vec = func.add_value(Type::Vector {
        lanes: 2,
        elem_bits: 32,
    });
    let idx = func.add_value(Type::S32);
    let elt = func.add_value(Type::S32);
    func.push_inst(
        block,
        Opcode::ExtractVectorElt,
        &[Operand::Def(elt), Operand::Use(vec), Operand::Use(idx)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    for value in [vec, idx, elt] {
        assert_eq!(func.value_bank(value), Some(RegBank::Vector));
    }
}

/// Builds a uniform 32-bit load of `v` through `ptr`.
fn uniform_load(func: &mut GenericFunction, v: Value, ptr: Value) -> Inst {
    let block = func.blocks().next().unwrap();
    func.push_mem_inst(
        block,
        Opcode::Load,
        &[Operand::Def(v), Operand::Use(ptr)],
        &[MemOperand {
            size: 4,
            flags: MemFlags::LOAD | MemFlags::UNIFORM,
        }],
    )
}

#[test]
fn uniform_load_into_vector_value_is_copied_out() {
    let mut func = GenericFunction::new();
    func.add_block();
    let ptr = func.add_value_in_bank(PTR, RegBank::Scalar);
    let v = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let load = uniform_load(&mut func, v, ptr);

    select(&mut func, Mode::Fast).unwrap();

    // The pointer is read as is and the load stays on the scalar unit.
    let &[Operand::Def(loaded), Operand::Use(addr)] = func.inst_operands(load) else {
        panic!("malformed load");
    };
    assert_eq!(addr, ptr);
    assert_eq!(func.value_bank(ptr), Some(RegBank::Scalar));
    assert_eq!(func.value_bank(loaded), Some(RegBank::Scalar));

    let copy = func.value_def(v).unwrap();
    assert_eq!(insts(&func), [load, copy]);
    assert_eq!(
        func.inst_operands(copy),
        [Operand::Def(v), Operand::Use(loaded)]
    );
    assert_eq!(func.value_bank(v), Some(RegBank::Vector));
    assert_idempotent(&mut func, Mode::Fast);
}

#[test]
fn uniform_load_into_vector_value_greedy_reads_scalar_pointer() {
    let mut func = GenericFunction::new();
    func.add_block();
    let ptr = func.add_value_in_bank(PTR, RegBank::Scalar);
    let v = func.add_value_in_bank(Type::S32, RegBank::Vector);
    let load = uniform_load(&mut func, v, ptr);

    select(&mut func, Mode::Greedy).unwrap();

    // The vector load with a scalar address avoids the copy.
    assert_eq!(insts(&func), [load]);
    assert_eq!(
        func.inst_operands(load),
        [Operand::Def(v), Operand::Use(ptr)]
    );
    assert_eq!(func.value_bank(ptr), Some(RegBank::Scalar));
    assert_eq!(func.value_bank(v), Some(RegBank::Vector));
}

#[test]
fn uniform_load_through_vector_pointer_is_vector() {
    let mut func = GenericFunction::new();
    func.add_block();
    let ptr = func.add_value_in_bank(PTR, RegBank::Vector);
    let v = func.add_value(Type::S32);
    let load = uniform_load(&mut func, v, ptr);

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(insts(&func), [load]);
    assert_eq!(func.value_bank(v), Some(RegBank::Vector));
}

#[test]
fn extract_vector_elt_long_copy_chain_is_scalar() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let vec = func.add_value(Type::Vector {
        lanes: 2,
        elem_bits: 32,
    });
    let mut idx = func.add_value(Type::S32);
    func.push_inst(block, Opcode::Constant, &[Operand::Def(idx), Operand::Imm(0)]);
    for _ in 0..20 {
        let copy = func.add_value(Type::S32);
        func.push_inst(block, Opcode::Copy, &[Operand::Def(copy), Operand::Use(idx)]);
        idx = copy;
    }
    assert_eq!(trace_constant(&func, idx), Some(0));

    let elt = func.add_value(Type::S32);
    func.push_inst(
        block,
        Opcode::ExtractVectorElt,
        &[Operand::Def(elt), Operand::Use(vec), Operand::Use(idx)],
    );

    select(&mut func, Mode::Greedy).unwrap();

    for value in [vec, idx, elt] {
        assert_eq!(func.value_bank(value), Some(RegBank::Scalar));
    }
}

#[test]
fn extract_vector_elt_computed_index_is_vector() {
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let vec = func.add_value(Type::Vector {
        lanes: 2,
        elem_bits: 32,
    });
    let one = func.add_value(Type::S32);
    let idx = func.add_value(Type::S32);
    let elt = func.add_value(Type::S32);
    func.push_inst(block, Opcode::Constant, &[Operand::Def(one), Operand::Imm(1)]);
    func.push_inst(
        block,
        Opcode::Add,
        &[Operand::Def(idx), Operand::Use(one), Operand::Use(one)],
    );
    let extract = func.push_inst(
        block,
        Opcode::ExtractVectorElt,
        &[Operand::Def(elt), Operand::Use(vec), Operand::Use(idx)],
    );
    // Only copies are looked through.
    assert_eq!(trace_constant(&func, idx), None);

    select(&mut func, Mode::Greedy).unwrap();

    assert_eq!(func.value_bank(idx), Some(RegBank::Scalar));
    assert_eq!(func.value_bank(vec), Some(RegBank::Vector));
    assert_eq!(func.value_bank(elt), Some(RegBank::Vector));
    let Operand::Use(read_idx) = func.inst_operands(extract)[2] else {
        panic!("malformed extract_vector_elt");
    };
    assert_eq!(func.value_bank(read_idx), Some(RegBank::Vector));
    let copy = func.value_def(read_idx).unwrap();
    assert_eq!(func.inst_operands(copy)[1], Operand::Use(idx));
}

#[test]
fn insert_vector_elt_constant_index_is_scalar() {
    let v2s32 = Type::Vector {
        lanes: 2,
        elem_bits: 32,
    };
    let mut func = GenericFunction::new();
    let block = func.add_block();
    let vec = func.add_value(v2s32);
    let elt = func.add_value(Type::S32);
    let idx = func.add_value(Type::S32);
    let dst = func.add_value(v2s32);
    func.push_inst(block, Opcode::Constant, &[Operand::Def(idx), Operand::Imm(1)]);
    func.push_inst(
        block,
        Opcode::InsertVectorElt,
        &[
            Operand::Def(dst),
            Operand::Use(vec),
            Operand::Use(elt),
            Operand::Use(idx),
        ],
    );

    select(&mut func, Mode::Greedy).unwrap();

    for value in [vec, elt, idx, dst] {
        assert_eq!(func.value_bank(value), Some(RegBank::Scalar));
    }
    assert_idempotent(&mut func, Mode::Greedy);
}
