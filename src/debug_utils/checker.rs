//! Checker which verifies that the result of bank selection is legal.

use anyhow::{Result, bail, ensure};

use crate::function::{Function, Inst, Opcode, Operand};
use crate::mapping::InstructionMapping;
use crate::regbank::{BankCatalog, BankKind};
use crate::resolver::candidates;
use crate::Mode;

/// Checks that every instruction in `func` only accesses banks which the
/// target supports for it.
///
/// This verifies that:
///
/// * Every register operand has a bank which can hold a value of its width.
/// * For every instruction, one of its legal mappings matches the banks of
///   its operands exactly, without breaking down any operand.
/// * No instruction other than a copy produces a uniform value from a
///   per-lane input.
/// * Every copy is between banks the target can copy between.
///
/// This is intended to be run on a function after
/// [`RegBankSelect::run`](crate::RegBankSelect::run) has succeeded.
pub fn check_bank_assignment(func: &impl Function, catalog: &BankCatalog) -> Result<()> {
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            check_operand_banks(func, inst)?;
            check_mapping(func, catalog, inst)?;
            check_uniformity(func, catalog, inst)?;
        }
    }
    Ok(())
}

fn check_operand_banks(func: &impl Function, inst: Inst) -> Result<()> {
    for (idx, op) in func.inst_operands(inst).iter().enumerate() {
        let Some(value) = op.value() else {
            continue;
        };
        let Some(bank) = func.value_bank(value) else {
            bail!("{inst} operand {idx}: {value} has no bank assigned");
        };
        let width = func.value_type(value).size_in_bits();
        ensure!(
            bank.size_domain().contains(width),
            "{inst} operand {idx}: {bank} cannot hold {value} ({width} bits)"
        );
    }
    Ok(())
}

/// Returns whether `mapping` describes exactly the current banks of the
/// operands of `inst`.
fn matches_current(func: &impl Function, inst: Inst, mapping: &InstructionMapping) -> bool {
    if !mapping.is_valid() || mapping.has_split_operand() {
        return false;
    }
    func.inst_operands(inst)
        .iter()
        .enumerate()
        .all(|(idx, op)| match (op.value(), mapping.operand(idx)) {
            (None, _) => true,
            (Some(value), Some(vm)) => func.value_bank(value) == Some(vm.bank()),
            (Some(_), None) => false,
        })
}

fn check_mapping(func: &impl Function, catalog: &BankCatalog, inst: Inst) -> Result<()> {
    let candidates = candidates(func, catalog, inst, Mode::Greedy);
    ensure!(
        candidates.canonical.is_valid(),
        "{inst}: {} has no legal mapping",
        func.inst_opcode(inst)
    );
    ensure!(
        candidates
            .iter()
            .any(|mapping| matches_current(func, inst, mapping)),
        "{inst}: Operand banks of {} don't match any legal mapping (canonical: {})",
        func.inst_opcode(inst),
        candidates.canonical
    );
    Ok(())
}

fn check_uniformity(func: &impl Function, catalog: &BankCatalog, inst: Inst) -> Result<()> {
    let operands = func.inst_operands(inst);
    let bank_of = |op: &Operand| op.value().and_then(|value| func.value_bank(value));

    if func.inst_opcode(inst) == Opcode::Copy {
        if let [Operand::Def(dst), Operand::Use(src)] = *operands {
            let (Some(dst_bank), Some(src_bank)) = (func.value_bank(dst), func.value_bank(src))
            else {
                return Ok(());
            };
            let width = func.value_type(dst).size_in_bits();
            ensure!(
                catalog.can_copy(dst_bank, src_bank, width),
                "{inst}: Cannot copy {src} from {src_bank} to {dst_bank}"
            );
        }
        return Ok(());
    }

    let per_lane_use = operands
        .iter()
        .filter(|op| op.is_use())
        .find(|op| bank_of(op).is_some_and(|bank| bank.kind() == BankKind::PerLane));
    let uniform_def = operands
        .iter()
        .filter(|op| op.is_def())
        .find(|op| bank_of(op).is_some_and(|bank| bank.kind() == BankKind::Uniform));
    if let (Some(used), Some(defined)) = (per_lane_use, uniform_def) {
        bail!("{inst}: Uniform result {defined} computed from per-lane input {used}");
    }
    Ok(())
}
