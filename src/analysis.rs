//! Queries on the function which feed into bank selection decisions.

use crate::function::{Function, Inst, MemFlags, Opcode, Operand, Value};

/// Returns whether a memory instruction accesses the same address in every
/// lane.
///
/// This relies on the uniformity flag placed on the memory operand by an
/// earlier divergence analysis. Instructions with no memory operand, or with
/// more than one, are conservatively treated as divergent.
#[must_use]
pub fn is_uniform(func: &impl Function, inst: Inst) -> bool {
    match func.inst_mem_operands(inst) {
        [mem] => mem.flags.contains(MemFlags::UNIFORM),
        _ => false,
    }
}

/// Returns the constant held by `value`, if it is defined by a `constant`
/// instruction, possibly through a chain of copies.
///
/// A chain can't be longer than the number of values in SSA form, which also
/// bounds the walk on a malformed cyclic chain.
#[must_use]
pub fn trace_constant(func: &impl Function, value: Value) -> Option<i64> {
    let mut value = value;
    for _ in 0..=func.num_values() {
        let def = func.value_def(value)?;
        match (func.inst_opcode(def), func.inst_operands(def)) {
            (Opcode::Constant, &[Operand::Def(_), Operand::Imm(imm)]) => return Some(imm),
            (Opcode::Copy, &[Operand::Def(_), Operand::Use(src)]) => value = src,
            _ => return None,
        }
    }
    None
}
