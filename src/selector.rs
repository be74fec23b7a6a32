//! Choosing between the candidate mappings of an instruction.
//!
//! The cost of a candidate is the cost of the instruction form itself plus
//! the cost of everything needed to get its operands into place: copies
//! between banks, decompositions into halves, and reassembly of values which
//! only exist as halves. A candidate needing a copy which is impossible is
//! infeasible and never selected.

use smallvec::SmallVec;

use crate::function::{Function, Inst, Operand, Value};
use crate::mapping::{InstructionMapping, SplitValues, breakdown_cost};
use crate::regbank::{BankCatalog, Cost, RegBank};
use crate::resolver::CandidateSet;
use crate::RegBankError;

/// Cost of reassembling a value from its halves.
const MERGE_COST: Cost = Cost::new(1);

/// Computes the total cost of applying `mapping` to `inst`.
///
/// Operands are considered in order. An unassigned value takes the bank
/// required by the first operand referencing it, which later operands of the
/// same instruction then have to agree with.
#[must_use]
pub fn mapping_cost(
    func: &impl Function,
    catalog: &BankCatalog,
    splits: &SplitValues,
    inst: Inst,
    mapping: &InstructionMapping,
) -> Cost {
    if !mapping.is_valid() {
        return Cost::INFEASIBLE;
    }

    let mut cost = mapping.cost();
    let mut pending: SmallVec<[(Value, RegBank); 4]> = SmallVec::new();
    for (&op, vm) in func.inst_operands(inst).iter().zip(mapping.operands()) {
        let (Some(value), Some(vm)) = (op.value(), vm) else {
            continue;
        };
        let required = vm.bank();
        let width = func.value_type(value).size_in_bits();
        let current = func.value_bank(value).or_else(|| {
            pending
                .iter()
                .find(|&&(v, _)| v == value)
                .map(|&(_, bank)| bank)
        });

        match (op, vm.is_split(), splits.get(value)) {
            // Halves of a value that is already split are reused, possibly
            // after copying them into the required bank.
            (Operand::Use(_), true, Some(split)) => {
                let half = catalog.copy_cost(required, split.bank, width / 2);
                cost += half + half;
            }
            (Operand::Use(_), true, None) => {
                cost += breakdown_cost(vm);
                if let Some(current) = current {
                    cost += catalog.copy_cost(required, current, width);
                }
            }
            // The result is produced directly as halves.
            (Operand::Def(_), true, _) => {
                cost += breakdown_cost(vm);
                if let Some(current) = current {
                    cost += catalog.copy_cost(current, required, width);
                }
            }
            // A whole use of a value that only exists as halves.
            (Operand::Use(_), false, Some(split)) if split.replaced => {
                cost += MERGE_COST + catalog.copy_cost(required, split.bank, width);
            }
            (Operand::Use(_), false, _) => match current {
                Some(current) => cost += catalog.copy_cost(required, current, width),
                None => pending.push((value, required)),
            },
            (Operand::Def(_), false, _) => match current {
                Some(current) => cost += catalog.copy_cost(current, required, width),
                None => pending.push((value, required)),
            },
            _ => unreachable!(),
        }

        if !cost.is_feasible() {
            return Cost::INFEASIBLE;
        }
    }
    cost
}

/// Picks the cheapest candidate mapping for an instruction.
///
/// The canonical mapping is listed first so it wins any tie. Fails if the
/// instruction has no valid mapping or if every candidate needs an
/// impossible copy.
pub fn select<'a>(
    func: &impl Function,
    catalog: &BankCatalog,
    splits: &SplitValues,
    inst: Inst,
    candidates: &'a CandidateSet,
) -> Result<&'a InstructionMapping, RegBankError> {
    let error = || RegBankError::InvalidMapping {
        inst,
        opcode: func.inst_opcode(inst),
    };
    if !candidates.canonical.is_valid() {
        return Err(error());
    }

    let mut best: Option<(&InstructionMapping, Cost)> = None;
    for candidate in candidates.iter() {
        let cost = mapping_cost(func, catalog, splits, inst, candidate);
        trace!("  candidate {candidate} -> total cost {cost}");
        if !cost.is_feasible() {
            continue;
        }
        if best.is_none_or(|(_, best_cost)| cost < best_cost) {
            best = Some((candidate, cost));
        }
    }
    best.map(|(mapping, _)| mapping).ok_or_else(error)
}
