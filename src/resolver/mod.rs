//! Computation of the legal bank mappings for each instruction.
//!
//! Every instruction has a *canonical* mapping which is always legal given
//! the banks its operands currently occupy (after any repair copies are
//! inserted). Some instructions additionally offer *alternative* mappings
//! which may be cheaper depending on where their operands already live. These
//! are only considered in [`Mode::Greedy`].
//!
//! The rules here encode what the hardware can execute:
//!
//! * The scalar unit (SALU) can only execute an instruction if none of its
//!   operands vary between lanes.
//! * The vector unit (VALU) can execute anything, and can read one scalar
//!   register operand directly.
//! * Single-bit conditions live in the flag banks: the uniform flag for
//!   scalar instructions and the lane mask for vector instructions.
//! * The vector unit has no 64-bit bitwise or select instructions so those
//!   are broken down into 32-bit halves.
//!
//! [`Mode::Greedy`]: crate::Mode::Greedy

use smallvec::SmallVec;

use crate::analysis::{is_uniform, trace_constant};
use crate::function::{Function, Inst, Intrinsic, Opcode, Operand, Value};
use crate::mapping::{InstructionMapping, MappingId, SPLIT_WIDTH, ValueMapping};
use crate::regbank::{BankCatalog, BankKind, RegBank};
use crate::Mode;

mod alternatives;

pub use alternatives::alternative_mappings;

/// The mappings to choose from for a single instruction.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    /// Mapping which is used when no alternative is cheaper.
    pub canonical: InstructionMapping,

    /// Other legal mappings, in order of preference when costs are equal.
    pub alternatives: SmallVec<[InstructionMapping; 4]>,
}

impl CandidateSet {
    /// Iterates over all candidates, starting with the canonical mapping.
    pub fn iter(&self) -> impl Iterator<Item = &InstructionMapping> {
        core::iter::once(&self.canonical).chain(self.alternatives.iter())
    }
}

/// Collects the candidate mappings for an instruction.
///
/// Alternatives are only computed in [`Mode::Greedy`].
#[must_use]
pub fn candidates(
    func: &impl Function,
    catalog: &BankCatalog,
    inst: Inst,
    mode: Mode,
) -> CandidateSet {
    let canonical = inst_mapping(func, catalog, inst);
    let alternatives = match mode {
        Mode::Fast => SmallVec::new(),
        Mode::Greedy if canonical.is_valid() => alternative_mappings(func, inst),
        Mode::Greedy => SmallVec::new(),
    };
    CandidateSet {
        canonical,
        alternatives,
    }
}

/// Returns the canonical mapping of an instruction, or the invalid mapping if
/// the instruction can't be executed on this target.
#[must_use]
pub fn inst_mapping(func: &impl Function, catalog: &BankCatalog, inst: Inst) -> InstructionMapping {
    canonical_mapping(func, catalog, inst).unwrap_or_else(InstructionMapping::invalid)
}

/// Returns whether every register operand of `inst` can be accessed by the
/// scalar unit.
///
/// Unassigned values are accepted since they can be placed anywhere. A
/// single-bit value already held in a scalar register can't be moved into the
/// uniform flag so it also forces the vector form.
#[must_use]
pub fn is_salu_mapping(func: &impl Function, inst: Inst) -> bool {
    func.inst_operands(inst)
        .iter()
        .filter_map(|op| op.value())
        .all(|value| match func.value_bank(value) {
            None | Some(RegBank::UniformFlag) => true,
            Some(RegBank::Scalar) => func.value_type(value).size_in_bits() != 1,
            Some(RegBank::Vector | RegBank::LaneMask) => false,
        })
}

/// Bank used by the scalar unit for a value of the given width.
pub(crate) fn scalar_bank(size: u32) -> RegBank {
    if size == 1 {
        RegBank::UniformFlag
    } else {
        RegBank::Scalar
    }
}

/// Bank used by the vector unit for a value of the given width.
pub(crate) fn vector_bank(size: u32) -> RegBank {
    if size == 1 {
        RegBank::LaneMask
    } else {
        RegBank::Vector
    }
}

/// Returns `bank` if it can hold a value of the given width, or otherwise the
/// general-purpose bank of the same kind.
fn fit_bank(bank: RegBank, size: u32) -> RegBank {
    if bank.size_domain().contains(size) {
        return bank;
    }
    match bank.kind() {
        BankKind::Uniform => RegBank::Scalar,
        BankKind::PerLane => RegBank::Vector,
    }
}

/// Incrementally builds the operand mappings of an instruction.
pub(crate) struct MappingBuilder<'a, F> {
    func: &'a F,
    operands: &'a [Operand],
    mappings: SmallVec<[Option<ValueMapping>; 4]>,
}

impl<'a, F: Function> MappingBuilder<'a, F> {
    pub(crate) fn new(func: &'a F, inst: Inst) -> Self {
        let operands = func.inst_operands(inst);
        Self {
            func,
            operands,
            mappings: SmallVec::from_elem(None, operands.len()),
        }
    }

    /// Value referenced by a register operand.
    pub(crate) fn value(&self, idx: usize) -> Option<Value> {
        self.operands.get(idx)?.value()
    }

    /// Width of a register operand.
    pub(crate) fn size(&self, idx: usize) -> Option<u32> {
        Some(self.func.value_type(self.value(idx)?).size_in_bits())
    }

    /// Current bank of a register operand.
    pub(crate) fn bank(&self, idx: usize) -> Option<Option<RegBank>> {
        Some(self.func.value_bank(self.value(idx)?))
    }

    /// Current bank of a register operand, or `default` if unassigned. The
    /// result is adjusted to fit the width of the operand.
    pub(crate) fn bank_or(&self, idx: usize, default: RegBank) -> Option<RegBank> {
        let size = self.size(idx)?;
        Some(fit_bank(self.bank(idx)?.unwrap_or(default), size))
    }

    /// Maps a whole operand to a single bank.
    pub(crate) fn set(&mut self, idx: usize, bank: RegBank) -> Option<()> {
        let size = self.size(idx)?;
        self.mappings[idx] = Some(ValueMapping::single(bank, size));
        Some(())
    }

    /// Maps an operand to two equal halves in `bank`.
    pub(crate) fn set_halves(&mut self, idx: usize, bank: RegBank) -> Option<()> {
        let size = self.size(idx)?;
        self.mappings[idx] = Some(ValueMapping::halves(bank, size));
        Some(())
    }

    /// Maps an operand to `bank`, split into halves if the bank requires it.
    pub(crate) fn set_split_unless_scalar(&mut self, idx: usize, bank: RegBank) -> Option<()> {
        let size = self.size(idx)?;
        self.mappings[idx] = Some(ValueMapping::split_unless_scalar(bank, size));
        Some(())
    }

    /// Maps every register operand to a bank chosen from its width.
    pub(crate) fn set_all(&mut self, bank_for_size: impl Fn(u32) -> RegBank) {
        for (idx, op) in self.operands.iter().enumerate() {
            if let Some(value) = op.value() {
                let size = self.func.value_type(value).size_in_bits();
                self.mappings[idx] = Some(ValueMapping::single(bank_for_size(size), size));
            }
        }
    }

    /// Produces the final mapping. Fails if a register operand has been left
    /// unmapped.
    pub(crate) fn finish(self, id: MappingId, cost: u32) -> Option<InstructionMapping> {
        let complete = self
            .operands
            .iter()
            .zip(&self.mappings)
            .all(|(op, mapping)| op.value().is_none() || mapping.is_some());
        complete.then(|| InstructionMapping::new(id, cost, self.mappings))
    }
}

/// Mapping which executes the instruction on the scalar unit.
fn default_scalar_mapping<F: Function>(func: &F, inst: Inst) -> Option<InstructionMapping> {
    let mut m = MappingBuilder::new(func, inst);
    m.set_all(scalar_bank);
    m.finish(1, 1)
}

/// Mapping which executes the instruction on the vector unit.
///
/// The first input operand may be read directly from a scalar register; all
/// other operands must be in vector registers.
fn default_vector_mapping<F: Function>(func: &F, inst: Inst) -> Option<InstructionMapping> {
    let mut m = MappingBuilder::new(func, inst);
    let mut slot = 0;
    for (idx, &op) in func.inst_operands(inst).iter().enumerate() {
        let Some(value) = op.value() else {
            continue;
        };
        let size = func.value_type(value).size_in_bits();
        let keep_scalar =
            slot == 1 && op.is_use() && size != 1 && func.value_bank(value) == Some(RegBank::Scalar);
        let bank = if keep_scalar {
            RegBank::Scalar
        } else {
            vector_bank(size)
        };
        m.set(idx, bank)?;
        slot += 1;
    }
    m.finish(1, 1)
}

/// Mapping which places every register operand in the vector bank.
fn all_vector_mapping<F: Function>(func: &F, inst: Inst) -> Option<InstructionMapping> {
    let mut m = MappingBuilder::new(func, inst);
    m.set_all(|_| RegBank::Vector);
    m.finish(1, 1)
}

/// Integer arithmetic: scalar unit if possible, otherwise vector unit.
fn arith_mapping<F: Function>(func: &F, inst: Inst) -> Option<InstructionMapping> {
    if is_salu_mapping(func, inst) {
        default_scalar_mapping(func, inst)
    } else {
        default_vector_mapping(func, inst)
    }
}

/// 64-bit add/sub with carry on the vector unit, performed as a pair of
/// 32-bit operations chained through the carry.
fn carry_split_mapping<F: Function>(func: &F, inst: Inst) -> Option<InstructionMapping> {
    let mut m = MappingBuilder::new(func, inst);
    m.set_split_unless_scalar(0, RegBank::Vector)?;
    m.set(1, RegBank::LaneMask)?;
    m.set_split_unless_scalar(2, RegBank::Vector)?;
    m.set_split_unless_scalar(3, RegBank::Vector)?;
    if func.inst_opcode(inst).is_carry_in() {
        m.set(4, RegBank::LaneMask)?;
    }
    m.finish(1, 1)
}

fn canonical_mapping<F: Function>(
    func: &F,
    catalog: &BankCatalog,
    inst: Inst,
) -> Option<InstructionMapping> {
    let opcode = func.inst_opcode(inst);
    let mut m = MappingBuilder::new(func, inst);
    match opcode {
        Opcode::And | Opcode::Or | Opcode::Xor => {
            let size = m.size(0)?;
            if size == 1 {
                let bank = if is_salu_mapping(func, inst) {
                    RegBank::UniformFlag
                } else {
                    RegBank::LaneMask
                };
                m.set_all(|_| bank);
            } else if size == SPLIT_WIDTH && !is_salu_mapping(func, inst) {
                // The result is computed in vector halves. Each input is
                // decomposed in whichever bank it already occupies.
                m.set_split_unless_scalar(0, RegBank::Vector)?;
                for idx in 1..=2 {
                    let bank = m.bank_or(idx, RegBank::Vector)?;
                    m.set_halves(idx, bank)?;
                }
            } else {
                return arith_mapping(func, inst);
            }
        }

        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Umulh
        | Opcode::Smulh
        | Opcode::Shl
        | Opcode::Lshr
        | Opcode::Ashr
        | Opcode::PtrAdd => return arith_mapping(func, inst),

        Opcode::Uaddo
        | Opcode::Usubo
        | Opcode::Saddo
        | Opcode::Ssubo
        | Opcode::Uadde
        | Opcode::Usube
        | Opcode::Sadde
        | Opcode::Ssube => {
            if is_salu_mapping(func, inst) {
                return default_scalar_mapping(func, inst);
            }
            if m.size(0)? == SPLIT_WIDTH {
                return carry_split_mapping(func, inst);
            }
            return default_vector_mapping(func, inst);
        }

        Opcode::Fadd
        | Opcode::Fsub
        | Opcode::Fmul
        | Opcode::Fma
        | Opcode::Fsqrt
        | Opcode::Fexp2
        | Opcode::Flog2
        | Opcode::FpToSi
        | Opcode::FpToUi
        | Opcode::SiToFp
        | Opcode::UiToFp
        | Opcode::FpTrunc
        | Opcode::FpExt
        | Opcode::IntrinsicTrunc
        | Opcode::IntrinsicRound => return default_vector_mapping(func, inst),

        Opcode::ImplicitDef
        | Opcode::Constant
        | Opcode::FConstant
        | Opcode::FrameIndex
        | Opcode::BlockAddr => {
            let size = m.size(0)?;
            m.set(0, scalar_bank(size))?;
        }

        Opcode::Insert => {
            let bank = if is_salu_mapping(func, inst) {
                RegBank::Scalar
            } else {
                RegBank::Vector
            };
            for idx in 0..=2 {
                m.set(idx, bank)?;
            }
        }

        Opcode::Extract => {
            let bank = m.bank_or(1, RegBank::Vector)?;
            m.set(0, fit_bank(bank, m.size(0)?))?;
            m.set(1, bank)?;
        }

        Opcode::MergeValues | Opcode::UnmergeValues => {
            let bank = if is_salu_mapping(func, inst) {
                RegBank::Scalar
            } else {
                RegBank::Vector
            };
            m.set_all(|_| bank);
        }

        Opcode::Bitcast
        | Opcode::IntToPtr
        | Opcode::PtrToInt
        | Opcode::Ctlz
        | Opcode::CtlzZeroUndef
        | Opcode::Cttz
        | Opcode::CttzZeroUndef
        | Opcode::Ctpop
        | Opcode::Bswap
        | Opcode::Fabs
        | Opcode::Fneg
        | Opcode::Trunc
        | Opcode::Zext
        | Opcode::Sext
        | Opcode::Anyext => {
            // The result stays on the same side (uniform or per-lane) as the
            // input. Extending a flag moves it into a general-purpose bank.
            let bank = m.bank_or(1, RegBank::Vector)?;
            m.set(0, fit_bank(bank, m.size(0)?))?;
            m.set(1, bank)?;
        }

        Opcode::Icmp => {
            let uniform = [2, 3].iter().all(|&idx| {
                matches!(m.bank(idx), Some(None | Some(RegBank::Scalar)))
            });
            let (dst, src) = if uniform {
                (RegBank::UniformFlag, RegBank::Scalar)
            } else {
                (RegBank::LaneMask, RegBank::Vector)
            };
            m.set(0, dst)?;
            m.set(2, src)?;
            m.set(3, src)?;
        }

        Opcode::Fcmp => {
            m.set(0, RegBank::LaneMask)?;
            let bank = m.bank_or(2, RegBank::Vector)?;
            m.set(2, bank)?;
            m.set(3, RegBank::Vector)?;
        }

        Opcode::Select => {
            let scalar_srcs = m.bank(1)? == Some(RegBank::UniformFlag)
                && m.bank(2)? == Some(RegBank::Scalar)
                && m.bank(3)? == Some(RegBank::Scalar);
            let (cond, data) = if scalar_srcs {
                (RegBank::UniformFlag, RegBank::Scalar)
            } else {
                (RegBank::LaneMask, RegBank::Vector)
            };
            m.set_split_unless_scalar(0, data)?;
            m.set(1, cond)?;
            m.set_split_unless_scalar(2, data)?;
            m.set_split_unless_scalar(3, data)?;
        }

        Opcode::ExtractVectorElt | Opcode::InsertVectorElt => {
            let idx_operand = if opcode == Opcode::ExtractVectorElt {
                2
            } else {
                3
            };
            let constant_idx = trace_constant(func, m.value(idx_operand)?).is_some();
            let bank = if is_salu_mapping(func, inst) && constant_idx {
                RegBank::Scalar
            } else {
                RegBank::Vector
            };
            m.set_all(|_| bank);
        }

        Opcode::Load => {
            // A result pinned elsewhere is copied out of the scalar load, but
            // a per-lane pointer can't be read by the scalar unit.
            let ptr_uniform = m.bank(1)?.is_none_or(|bank| bank.kind() == BankKind::Uniform);
            let bank = if is_uniform(func, inst) && ptr_uniform {
                RegBank::Scalar
            } else {
                RegBank::Vector
            };
            m.set(0, bank)?;
            m.set(1, bank)?;
        }

        Opcode::Store => {
            m.set(0, RegBank::Vector)?;
            m.set(1, RegBank::Vector)?;
        }

        Opcode::AtomicRmw(_) | Opcode::AtomicCmpXchg => return all_vector_mapping(func, inst),

        Opcode::Intrinsic => match func.inst_operands(inst).get(1)? {
            Operand::Intrinsic(Intrinsic::Maxnum | Intrinsic::Minnum | Intrinsic::CvtPkrtz) => {
                return default_vector_mapping(func, inst);
            }
            Operand::Intrinsic(Intrinsic::KernargSegmentPtr) => m.set(0, RegBank::Scalar)?,
            Operand::Intrinsic(Intrinsic::WqmVote) => {
                m.set(0, RegBank::Scalar)?;
                m.set(2, RegBank::Scalar)?;
            }
            _ => return None,
        },

        Opcode::IntrinsicSideEffects => {
            use RegBank::{Scalar as S, Vector as V};
            let banks: &[RegBank] = match func.inst_operands(inst).first()? {
                Operand::Intrinsic(Intrinsic::Exp) => &[S, S, V, V, V, V, S, S],
                Operand::Intrinsic(Intrinsic::ExpCompr) => &[S, S, V, V, S, S],
                _ => return None,
            };
            if func.inst_operands(inst).len() != banks.len() + 1 {
                return None;
            }
            for (i, &bank) in banks.iter().enumerate() {
                m.set(i + 1, bank)?;
            }
        }

        Opcode::BrCond => {
            let bank = match m.bank(0)? {
                Some(RegBank::UniformFlag) => RegBank::UniformFlag,
                _ => RegBank::LaneMask,
            };
            m.set(0, bank)?;
        }

        Opcode::Br => {}

        Opcode::Copy => {
            let size = m.size(0)?;
            let src = m.bank(1)?;
            let dst = m.bank(0)?.or(src).unwrap_or_else(|| vector_bank(size));
            let src = src.unwrap_or(dst);
            if !catalog.can_copy(dst, src, size) {
                return None;
            }
            m.set(0, dst)?;
            m.set(1, src)?;
        }

        Opcode::Phi => return None,
    }
    m.finish(1, 1)
}
