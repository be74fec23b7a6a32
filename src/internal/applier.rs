//! Rewriting of instructions to match their selected mapping.
//!
//! For most instructions this only involves assigning banks to values and
//! inserting copies for operands that live in the wrong bank. Instructions
//! whose result is broken down into halves are replaced by a pair of 32-bit
//! instructions operating on the halves of their inputs.
//!
//! Inputs are decomposed with an `unmerge_values` placed right after their
//! definition, so the halves can be reused by every later instruction that
//! needs them. The result of a replaced instruction has no definition any
//! more: later whole uses of it are fed by a `merge_values` inserted just
//! before the use.

use smallvec::SmallVec;

use crate::Stats;
use crate::function::{Function, InsertPoint, Inst, Opcode, Operand, Value};
use crate::mapping::{InstructionMapping, SplitValue, SplitValues};
use crate::regbank::RegBank;

pub struct Applier {
    /// Values which have been broken down into halves.
    splits: SplitValues,

    /// Copies of values into another bank made for the current instruction.
    repaired: SmallVec<[(Value, RegBank, Value); 4]>,

    /// Values reassembled for the current instruction.
    merged: SmallVec<[(Value, Value); 2]>,
}

impl Applier {
    pub fn new() -> Self {
        Self {
            splits: SplitValues::new(),
            repaired: SmallVec::new(),
            merged: SmallVec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.splits.clear();
    }

    pub fn splits(&self) -> &SplitValues {
        &self.splits
    }

    /// Rewrites `inst` so that its operands match `mapping`.
    pub fn apply(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        mapping: &InstructionMapping,
        stats: &mut Stats,
    ) {
        self.repaired.clear();
        self.merged.clear();

        let split_result = mapping.operand(0).is_some_and(|vm| vm.is_split());
        if !split_result {
            self.apply_default(func, inst, mapping, stats);
            return;
        }

        let opcode = func.inst_opcode(inst);
        trace!("Splitting {inst} ({opcode}) into 32-bit halves");
        stat!(stats, split_insts);
        match opcode {
            Opcode::And | Opcode::Or | Opcode::Xor => self.split_bitwise(func, inst, mapping, stats),
            Opcode::Select => self.split_select(func, inst, mapping, stats),
            _ if opcode.is_carry_out() => self.split_carry(func, inst, mapping, stats),
            _ => unreachable!("no split form for {opcode}"),
        }
    }

    /// Assigns banks to operands, inserting copies where a value already
    /// lives in a different bank.
    fn apply_default(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        mapping: &InstructionMapping,
        stats: &mut Stats,
    ) {
        for idx in 0..func.inst_operands(inst).len() {
            let op = func.inst_operands(inst)[idx];
            let Some(vm) = mapping.operand(idx) else {
                continue;
            };
            debug_assert!(!vm.is_split());
            match op {
                Operand::Use(value) => {
                    let new = self.use_in_bank(func, inst, value, vm.bank(), stats);
                    if new != value {
                        func.set_inst_operand(inst, idx, Operand::Use(new));
                    }
                }
                Operand::Def(value) => self.def_in_bank(func, inst, idx, value, vm.bank(), stats),
                _ => {}
            }
        }
    }

    /// Returns a value holding `value` in `bank` which can be used by `inst`.
    fn use_in_bank(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        value: Value,
        bank: RegBank,
        stats: &mut Stats,
    ) -> Value {
        let value = match self.splits.get(value) {
            Some(split) if split.replaced => self.reassemble(func, inst, value, split, stats),
            _ => value,
        };

        match func.value_bank(value) {
            None => {
                func.set_value_bank(value, bank);
                value
            }
            Some(current) if current == bank => value,
            Some(current) => {
                if let Some(&(_, _, copy)) = self
                    .repaired
                    .iter()
                    .find(|&&(v, b, _)| v == value && b == bank)
                {
                    return copy;
                }
                let copy = func.create_value(func.value_type(value));
                func.set_value_bank(copy, bank);
                func.insert_inst(
                    InsertPoint::Before(inst),
                    Opcode::Copy,
                    &[Operand::Def(copy), Operand::Use(value)],
                );
                trace!("Copying {value} from {current} to {bank} as {copy} for {inst}");
                stat!(stats, repair_copies);
                self.repaired.push((value, bank, copy));
                copy
            }
        }
    }

    /// Makes the definition of operand `idx` of `inst` land in `bank`.
    ///
    /// If the value already has a different bank then the instruction defines
    /// a fresh value instead, which is copied into the original one.
    fn def_in_bank(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        idx: usize,
        value: Value,
        bank: RegBank,
        stats: &mut Stats,
    ) {
        match func.value_bank(value) {
            None => func.set_value_bank(value, bank),
            Some(current) if current == bank => {}
            Some(current) => {
                let new = func.create_value(func.value_type(value));
                func.set_value_bank(new, bank);
                func.set_inst_operand(inst, idx, Operand::Def(new));
                func.insert_inst(
                    InsertPoint::After(inst),
                    Opcode::Copy,
                    &[Operand::Def(value), Operand::Use(new)],
                );
                trace!("Defining {value} in {bank} as {new}, copied back into {current}");
                stat!(stats, repair_copies);
            }
        }
    }

    /// Rebuilds a whole value from its halves just before `inst`.
    fn reassemble(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        value: Value,
        split: SplitValue,
        stats: &mut Stats,
    ) -> Value {
        if let Some(&(_, merged)) = self.merged.iter().find(|&&(v, _)| v == value) {
            return merged;
        }
        let merged = func.create_value(func.value_type(value));
        func.set_value_bank(merged, split.bank);
        let [lo, hi] = split.halves;
        func.insert_inst(
            InsertPoint::Before(inst),
            Opcode::MergeValues,
            &[Operand::Def(merged), Operand::Use(lo), Operand::Use(hi)],
        );
        trace!("Reassembled {value} as {merged} for {inst}");
        stat!(stats, merges);
        self.merged.push((value, merged));
        merged
    }

    /// Returns the low and high halves of `value` in `bank`.
    fn halves(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        value: Value,
        bank: RegBank,
        stats: &mut Stats,
    ) -> [Value; 2] {
        if let Some(split) = self.splits.get(value) {
            if split.bank == bank {
                return split.halves;
            }
            let [lo, hi] = split.halves;
            return [
                self.use_in_bank(func, inst, lo, bank, stats),
                self.use_in_bank(func, inst, hi, bank, stats),
            ];
        }

        // A value in another bank is copied over and decomposed locally.
        // Otherwise the decomposition is placed at the definition so that it
        // can be shared with later users.
        let (src, at, record) = match func.value_bank(value) {
            Some(current) if current != bank => {
                let copy = self.use_in_bank(func, inst, value, bank, stats);
                (copy, InsertPoint::Before(inst), false)
            }
            current => {
                if current.is_none() {
                    func.set_value_bank(value, bank);
                }
                let at = match func.value_def(value) {
                    Some(def) => InsertPoint::After(def),
                    None => {
                        // Live-in values are decomposed at the start of the
                        // function.
                        let first = func
                            .blocks()
                            .find_map(|block| func.block_insts(block).first().copied())
                            .unwrap_or(inst);
                        InsertPoint::Before(first)
                    }
                };
                (value, at, true)
            }
        };

        let half_ty = func.value_type(value).half();
        let lo = func.create_value(half_ty);
        let hi = func.create_value(half_ty);
        func.set_value_bank(lo, bank);
        func.set_value_bank(hi, bank);
        func.insert_inst(
            at,
            Opcode::UnmergeValues,
            &[Operand::Def(lo), Operand::Def(hi), Operand::Use(src)],
        );
        trace!("Decomposed {src} into {lo}, {hi} in {bank}");
        stat!(stats, unmerges);
        if record {
            self.splits.insert(
                value,
                SplitValue {
                    halves: [lo, hi],
                    bank,
                    replaced: false,
                },
            );
        }
        [lo, hi]
    }

    /// Creates the two halves of the result of a split instruction.
    fn result_halves(func: &mut impl Function, value: Value, bank: RegBank) -> [Value; 2] {
        let half_ty = func.value_type(value).half();
        [(); 2].map(|()| {
            let half = func.create_value(half_ty);
            func.set_value_bank(half, bank);
            half
        })
    }

    /// Removes the original instruction once its halves have been inserted
    /// and records how its result can be recovered.
    fn finish_split(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        dst: Value,
        halves: [Value; 2],
        bank: RegBank,
    ) {
        // Selection rejects split results pinned to a bank they can't be
        // copied into, and 64-bit values never live in a flag bank.
        debug_assert!(
            func.value_bank(dst).is_none_or(|current| current == bank),
            "split result {dst} of {inst} is pinned outside {bank}"
        );
        func.set_value_bank(dst, bank);
        func.remove_inst(inst);
        self.splits.insert(
            dst,
            SplitValue {
                halves,
                bank,
                replaced: true,
            },
        );
    }

    fn split_bitwise(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        mapping: &InstructionMapping,
        stats: &mut Stats,
    ) {
        let opcode = func.inst_opcode(inst);
        let &[Operand::Def(dst), Operand::Use(a), Operand::Use(b)] = func.inst_operands(inst) else {
            unreachable!("malformed {opcode} at {inst}");
        };
        let bank = |idx: usize| mapping.operand(idx).map_or(RegBank::Vector, |vm| vm.bank());
        let dst_bank = bank(0);
        let mut a_halves = self.halves(func, inst, a, bank(1), stats);
        let mut b_halves = self.halves(func, inst, b, bank(2), stats);

        // Vector instructions can only read a scalar register in their first
        // input, so the second input must come from a vector register.
        if !bank(2).is_per_lane() {
            if bank(1).is_per_lane() {
                core::mem::swap(&mut a_halves, &mut b_halves);
            } else {
                b_halves = b_halves
                    .map(|half| self.use_in_bank(func, inst, half, RegBank::Vector, stats));
            }
        }

        let dst_halves = Self::result_halves(func, dst, dst_bank);
        for i in 0..2 {
            func.insert_inst(
                InsertPoint::Before(inst),
                opcode,
                &[
                    Operand::Def(dst_halves[i]),
                    Operand::Use(a_halves[i]),
                    Operand::Use(b_halves[i]),
                ],
            );
        }
        self.finish_split(func, inst, dst, dst_halves, dst_bank);
    }

    fn split_select(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        mapping: &InstructionMapping,
        stats: &mut Stats,
    ) {
        let &[Operand::Def(dst), Operand::Use(cond), Operand::Use(a), Operand::Use(b)] =
            func.inst_operands(inst)
        else {
            unreachable!("malformed select at {inst}");
        };
        let bank = |idx: usize| mapping.operand(idx).map_or(RegBank::Vector, |vm| vm.bank());
        let dst_bank = bank(0);
        let cond = self.use_in_bank(func, inst, cond, bank(1), stats);
        let a_halves = self.halves(func, inst, a, bank(2), stats);
        let b_halves = self.halves(func, inst, b, bank(3), stats);

        let dst_halves = Self::result_halves(func, dst, dst_bank);
        for i in 0..2 {
            func.insert_inst(
                InsertPoint::Before(inst),
                Opcode::Select,
                &[
                    Operand::Def(dst_halves[i]),
                    Operand::Use(cond),
                    Operand::Use(a_halves[i]),
                    Operand::Use(b_halves[i]),
                ],
            );
        }
        self.finish_split(func, inst, dst, dst_halves, dst_bank);
    }

    /// Splits a 64-bit add/sub into a low half producing a carry and a high
    /// half consuming it. Only the high half determines signed overflow, so
    /// the low half always uses the unsigned form.
    fn split_carry(
        &mut self,
        func: &mut impl Function,
        inst: Inst,
        mapping: &InstructionMapping,
        stats: &mut Stats,
    ) {
        let opcode = func.inst_opcode(inst);
        let operands: SmallVec<[Operand; 5]> = func.inst_operands(inst).into();
        let (dst, carry_out, a, b, carry_in) = match *operands {
            [Operand::Def(dst), Operand::Def(co), Operand::Use(a), Operand::Use(b)] => {
                (dst, co, a, b, None)
            }
            [
                Operand::Def(dst),
                Operand::Def(co),
                Operand::Use(a),
                Operand::Use(b),
                Operand::Use(ci),
            ] => (dst, co, a, b, Some(ci)),
            _ => unreachable!("malformed {opcode} at {inst}"),
        };
        let (lo_opcode, hi_opcode) = match opcode {
            Opcode::Uaddo => (Opcode::Uaddo, Opcode::Uadde),
            Opcode::Usubo => (Opcode::Usubo, Opcode::Usube),
            Opcode::Saddo => (Opcode::Uaddo, Opcode::Sadde),
            Opcode::Ssubo => (Opcode::Usubo, Opcode::Ssube),
            Opcode::Uadde => (Opcode::Uadde, Opcode::Uadde),
            Opcode::Usube => (Opcode::Usube, Opcode::Usube),
            Opcode::Sadde => (Opcode::Uadde, Opcode::Sadde),
            Opcode::Ssube => (Opcode::Usube, Opcode::Ssube),
            _ => unreachable!(),
        };

        let bank = |idx: usize| mapping.operand(idx).map_or(RegBank::LaneMask, |vm| vm.bank());
        let dst_bank = bank(0);
        let carry_bank = bank(1);
        let a_halves = self.halves(func, inst, a, bank(2), stats);
        let b_halves = self.halves(func, inst, b, bank(3), stats);
        let carry_in = carry_in.map(|ci| self.use_in_bank(func, inst, ci, bank(4), stats));

        let dst_halves = Self::result_halves(func, dst, dst_bank);
        let mid_carry = func.create_value(func.value_type(carry_out));
        func.set_value_bank(mid_carry, carry_bank);

        let mut lo_operands: SmallVec<[Operand; 5]> = SmallVec::new();
        lo_operands.extend([
            Operand::Def(dst_halves[0]),
            Operand::Def(mid_carry),
            Operand::Use(a_halves[0]),
            Operand::Use(b_halves[0]),
        ]);
        lo_operands.extend(carry_in.map(Operand::Use));
        func.insert_inst(InsertPoint::Before(inst), lo_opcode, &lo_operands);

        // The final carry keeps its identity unless it is pinned to another
        // bank.
        let final_carry = match func.value_bank(carry_out) {
            Some(current) if current != carry_bank => {
                let new = func.create_value(func.value_type(carry_out));
                func.set_value_bank(new, carry_bank);
                new
            }
            _ => {
                func.set_value_bank(carry_out, carry_bank);
                carry_out
            }
        };
        func.insert_inst(
            InsertPoint::Before(inst),
            hi_opcode,
            &[
                Operand::Def(dst_halves[1]),
                Operand::Def(final_carry),
                Operand::Use(a_halves[1]),
                Operand::Use(b_halves[1]),
                Operand::Use(mid_carry),
            ],
        );
        if final_carry != carry_out {
            func.insert_inst(
                InsertPoint::Before(inst),
                Opcode::Copy,
                &[Operand::Def(carry_out), Operand::Use(final_carry)],
            );
            stat!(stats, repair_copies);
        }
        self.finish_split(func, inst, dst, dst_halves, dst_bank);
    }
}
