//! Alternative mappings offered in addition to the canonical one.
//!
//! These give the selector the option of keeping an operand where it already
//! lives instead of copying it, at the price of a different instruction form.
//! The order of the alternatives matters: when two candidates have the same
//! total cost the earlier one wins.

use smallvec::SmallVec;

use super::MappingBuilder;
use crate::analysis::is_uniform;
use crate::function::{Function, Inst, Opcode};
use crate::mapping::{InstructionMapping, SPLIT_WIDTH};
use crate::regbank::RegBank;
use crate::regbank::RegBank::{LaneMask as VCC, Scalar as S, UniformFlag as SCC, Vector as V};

/// Returns the alternative mappings for an instruction, which may be empty.
#[must_use]
pub fn alternative_mappings(func: &impl Function, inst: Inst) -> SmallVec<[InstructionMapping; 4]> {
    let mut out = SmallVec::new();
    match func.inst_opcode(inst) {
        Opcode::And | Opcode::Or | Opcode::Xor => bitwise(func, inst, &mut out),
        Opcode::Load => load(func, inst, &mut out),
        Opcode::Icmp => icmp(func, inst, &mut out),
        Opcode::Select => select(func, inst, &mut out),
        Opcode::Uadde | Opcode::Usube | Opcode::Sadde | Opcode::Ssube => carry(func, inst, &mut out),
        Opcode::BrCond => brcond(func, inst, &mut out),
        _ => {}
    }
    out
}

/// Builds one mapping from a list of per-operand banks. Operands listed as
/// `None` are left unmapped, and `split` selects which operands are broken
/// into halves.
fn push<F: Function>(
    func: &F,
    inst: Inst,
    out: &mut SmallVec<[InstructionMapping; 4]>,
    id: u32,
    cost: u32,
    banks: &[Option<RegBank>],
    split: bool,
) {
    let mut m = MappingBuilder::new(func, inst);
    let mut ok = true;
    for (idx, bank) in banks.iter().enumerate() {
        if let Some(bank) = *bank {
            let res = if split && !bank.is_flag() {
                m.set_split_unless_scalar(idx, bank)
            } else {
                m.set(idx, bank)
            };
            ok &= res.is_some();
        }
    }
    if let Some(mapping) = ok.then(|| m.finish(id, cost)).flatten() {
        out.push(mapping);
    }
}

fn bitwise<F: Function>(func: &F, inst: Inst, out: &mut SmallVec<[InstructionMapping; 4]>) {
    let m = MappingBuilder::new(func, inst);
    if m.size(0) != Some(SPLIT_WIDTH) {
        return;
    }

    // Both inputs scalar: a single 64-bit scalar instruction.
    push(func, inst, out, 1, 1, &[Some(S), Some(S), Some(S)], false);

    // Everything in vector halves.
    push(func, inst, out, 2, 2, &[Some(V), Some(V), Some(V)], true);

    // One input read from scalar halves. Reading the first input from scalar
    // registers is preferred.
    let mut halves = MappingBuilder::new(func, inst);
    let ok = halves.set_halves(0, V).is_some()
        && halves.set_halves(1, S).is_some()
        && halves.set_halves(2, V).is_some();
    if let Some(mapping) = ok.then(|| halves.finish(3, 3)).flatten() {
        out.push(mapping);
    }
    let mut halves = MappingBuilder::new(func, inst);
    let ok = halves.set_halves(0, V).is_some()
        && halves.set_halves(1, V).is_some()
        && halves.set_halves(2, S).is_some();
    if let Some(mapping) = ok.then(|| halves.finish(3, 4)).flatten() {
        out.push(mapping);
    }
}

fn load<F: Function>(func: &F, inst: Inst, out: &mut SmallVec<[InstructionMapping; 4]>) {
    if is_uniform(func, inst) {
        push(func, inst, out, 1, 1, &[Some(S), Some(S)], false);
    }
    push(func, inst, out, 2, 1, &[Some(V), Some(V)], false);
    push(func, inst, out, 3, 1, &[Some(V), Some(S)], false);
}

fn icmp<F: Function>(func: &F, inst: Inst, out: &mut SmallVec<[InstructionMapping; 4]>) {
    push(func, inst, out, 1, 1, &[Some(SCC), None, Some(S), Some(S)], false);
    push(func, inst, out, 2, 1, &[Some(VCC), None, Some(S), Some(V)], false);
    push(func, inst, out, 3, 1, &[Some(VCC), None, Some(V), Some(S)], false);
    push(func, inst, out, 4, 1, &[Some(VCC), None, Some(V), Some(V)], false);
}

fn select<F: Function>(func: &F, inst: Inst, out: &mut SmallVec<[InstructionMapping; 4]>) {
    push(func, inst, out, 1, 1, &[Some(S), Some(SCC), Some(S), Some(S)], false);
    push(func, inst, out, 2, 1, &[Some(V), Some(VCC), Some(V), Some(V)], true);
}

fn carry<F: Function>(func: &F, inst: Inst, out: &mut SmallVec<[InstructionMapping; 4]>) {
    push(
        func,
        inst,
        out,
        1,
        1,
        &[Some(S), Some(SCC), Some(S), Some(S), Some(SCC)],
        false,
    );
    push(
        func,
        inst,
        out,
        2,
        1,
        &[Some(V), Some(VCC), Some(V), Some(V), Some(VCC)],
        true,
    );
}

fn brcond<F: Function>(func: &F, inst: Inst, out: &mut SmallVec<[InstructionMapping; 4]>) {
    push(func, inst, out, 1, 1, &[Some(SCC), None], false);
    push(func, inst, out, 1, 1, &[Some(VCC), None], false);
}
