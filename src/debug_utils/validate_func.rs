//! Input function validation.

use anyhow::{Result, bail, ensure};
use cranelift_entity::{EntityRef as _, EntitySet, SecondaryMap};

use crate::function::{Block, Function, Inst, Opcode, Operand, Value};

/// Checks `func` to ensure it satisfies all of the pre-conditions required by
/// bank selection.
///
/// As long as this validation succeeds, bank selection will not panic. It may
/// still fail with an error for instructions which have no legal mapping on
/// the target, such as `phi` or unknown intrinsics.
pub fn validate_function(func: &impl Function) -> Result<()> {
    let mut ctx = Context {
        func,
        defined: EntitySet::new(),
        seen_insts: EntitySet::new(),
        value_defs: SecondaryMap::new(),
    };
    ctx.check_function()
}

/// Kind of operand expected at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Def,
    Use,
    Imm,
    Cond,
    Intrinsic,
    Block,
}

impl Slot {
    fn matches(self, op: Operand) -> bool {
        matches!(
            (self, op),
            (Slot::Def, Operand::Def(_))
                | (Slot::Use, Operand::Use(_))
                | (Slot::Imm, Operand::Imm(_))
                | (Slot::Cond, Operand::Cond(_))
                | (Slot::Intrinsic, Operand::Intrinsic(_))
                | (Slot::Block, Operand::Block(_))
        )
    }
}

/// Expected operand layout of an opcode: a fixed prefix optionally followed
/// by any number of repetitions of a slot.
struct Layout {
    fixed: &'static [Slot],
    rest: Option<Slot>,
}

const fn fixed(fixed: &'static [Slot]) -> Layout {
    Layout { fixed, rest: None }
}

fn layout(opcode: Opcode) -> Layout {
    use Slot::{Block as B, Cond as C, Def as D, Imm as I, Intrinsic as N, Use as U};
    match opcode {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Umulh
        | Opcode::Smulh
        | Opcode::Shl
        | Opcode::Lshr
        | Opcode::Ashr
        | Opcode::PtrAdd
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Fadd
        | Opcode::Fsub
        | Opcode::Fmul => fixed(&[D, U, U]),
        Opcode::Uaddo | Opcode::Usubo | Opcode::Saddo | Opcode::Ssubo => fixed(&[D, D, U, U]),
        Opcode::Uadde | Opcode::Usube | Opcode::Sadde | Opcode::Ssube => fixed(&[D, D, U, U, U]),
        Opcode::Fsqrt
        | Opcode::Fexp2
        | Opcode::Flog2
        | Opcode::FpToSi
        | Opcode::FpToUi
        | Opcode::SiToFp
        | Opcode::UiToFp
        | Opcode::FpTrunc
        | Opcode::FpExt
        | Opcode::IntrinsicTrunc
        | Opcode::IntrinsicRound
        | Opcode::Bitcast
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
        | Opcode::Anyext
        | Opcode::Load
        | Opcode::Copy => fixed(&[D, U]),
        Opcode::Fma | Opcode::InsertVectorElt | Opcode::Select | Opcode::AtomicCmpXchg => {
            fixed(&[D, U, U, U])
        }
        Opcode::Constant | Opcode::FConstant | Opcode::FrameIndex => fixed(&[D, I]),
        Opcode::BlockAddr => fixed(&[D, B]),
        Opcode::ImplicitDef => fixed(&[D]),
        Opcode::Insert => fixed(&[D, U, U, I]),
        Opcode::Extract => fixed(&[D, U, I]),
        Opcode::MergeValues => Layout {
            fixed: &[D, U, U],
            rest: Some(U),
        },
        // Checked separately since the definitions come first.
        Opcode::UnmergeValues | Opcode::Phi => fixed(&[]),
        Opcode::ExtractVectorElt | Opcode::AtomicRmw(_) => fixed(&[D, U, U]),
        Opcode::Icmp | Opcode::Fcmp => fixed(&[D, C, U, U]),
        Opcode::Store => fixed(&[U, U]),
        Opcode::Intrinsic => Layout {
            fixed: &[D, N],
            rest: Some(U),
        },
        Opcode::IntrinsicSideEffects => Layout {
            fixed: &[N],
            rest: Some(U),
        },
        Opcode::BrCond => fixed(&[U, B]),
        Opcode::Br => fixed(&[B]),
    }
}

/// State used for validation.
struct Context<'a, F> {
    func: &'a F,
    defined: EntitySet<Value>,
    seen_insts: EntitySet<Inst>,
    value_defs: SecondaryMap<Value, Option<Inst>>,
}

impl<F: Function> Context<'_, F> {
    fn check_function(&mut self) -> Result<()> {
        ensure!(self.func.num_blocks() != 0, "Function must have at least 1 block");

        // Collect the definition of each value before checking uses so that
        // uses of later definitions can be distinguished from live-ins.
        for block in self.func.blocks() {
            for &inst in self.func.block_insts(block) {
                ensure!(
                    inst.index() < self.func.num_insts(),
                    "{block}: Invalid instruction reference {inst}"
                );
                ensure!(
                    self.seen_insts.insert(inst),
                    "{inst} appears multiple times in the function"
                );
                ensure!(
                    self.func.inst_block(inst) == block,
                    "{inst} is in {block} but reports {}",
                    self.func.inst_block(inst)
                );
                for &op in self.func.inst_operands(inst) {
                    if let Operand::Def(value) = op {
                        self.check_value(inst, value)?;
                        ensure!(
                            self.value_defs[value].is_none(),
                            "{inst}: {value} is defined multiple times"
                        );
                        self.value_defs[value] = Some(inst);
                    }
                }
            }
        }

        for value in self.func.values() {
            ensure!(
                self.func.value_def(value) == self.value_defs[value],
                "{value}: Function reports definition {:?} but found {:?}",
                self.func.value_def(value),
                self.value_defs[value]
            );
            let width = self.func.value_type(value).size_in_bits();
            ensure!(width != 0, "{value}: Zero-width type");
            if let Some(bank) = self.func.value_bank(value) {
                ensure!(
                    bank.size_domain().contains(width),
                    "{value}: {bank} cannot hold a {width}-bit value"
                );
            }
        }

        for block in self.func.blocks() {
            for &inst in self.func.block_insts(block) {
                self.check_inst(inst)?;
            }
        }

        Ok(())
    }

    fn check_value(&self, inst: Inst, value: Value) -> Result<()> {
        ensure!(
            value.index() < self.func.num_values(),
            "{inst}: Invalid value reference {value}"
        );
        Ok(())
    }

    fn check_block(&self, inst: Inst, block: Block) -> Result<()> {
        ensure!(
            block.index() < self.func.num_blocks(),
            "{inst}: Invalid block reference {block}"
        );
        Ok(())
    }

    fn width(&self, value: Value) -> u32 {
        self.func.value_type(value).size_in_bits()
    }

    fn check_inst(&mut self, inst: Inst) -> Result<()> {
        let opcode = self.func.inst_opcode(inst);
        let operands = self.func.inst_operands(inst);

        self.check_layout(inst, opcode, operands)?;

        // Uses must refer to live-in values or to values defined earlier.
        for &op in operands {
            match op {
                Operand::Use(value) => {
                    self.check_value(inst, value)?;
                    if self.value_defs[value].is_some() {
                        ensure!(
                            self.defined.contains(value),
                            "{inst}: {value} is used before its definition"
                        );
                    }
                }
                Operand::Block(block) => self.check_block(inst, block)?,
                _ => {}
            }
        }
        for &op in operands {
            if let Operand::Def(value) = op {
                self.defined.insert(value);
            }
        }

        if !self.func.inst_mem_operands(inst).is_empty() {
            ensure!(
                opcode.is_memory(),
                "{inst}: Memory operands on non-memory opcode {opcode}"
            );
        }

        self.check_widths(inst, opcode, operands)
    }

    fn check_layout(&self, inst: Inst, opcode: Opcode, operands: &[Operand]) -> Result<()> {
        match opcode {
            Opcode::UnmergeValues => {
                let Some((&Operand::Use(_), defs)) = operands.split_last() else {
                    bail!("{inst}: {opcode} must end with a use");
                };
                ensure!(defs.len() >= 2, "{inst}: {opcode} needs at least 2 results");
                ensure!(
                    defs.iter().all(|op| op.is_def()),
                    "{inst}: {opcode} results must be definitions"
                );
                return Ok(());
            }
            Opcode::Phi => {
                let Some((&Operand::Def(_), incoming)) = operands.split_first() else {
                    bail!("{inst}: {opcode} must start with a definition");
                };
                ensure!(
                    incoming.len() % 2 == 0
                        && incoming
                            .chunks(2)
                            .all(|pair| matches!(pair, [Operand::Use(_), Operand::Block(_)])),
                    "{inst}: {opcode} incoming values must be (value, block) pairs"
                );
                return Ok(());
            }
            _ => {}
        }

        let layout = layout(opcode);
        ensure!(
            operands.len() >= layout.fixed.len(),
            "{inst}: {opcode} expects at least {} operands, found {}",
            layout.fixed.len(),
            operands.len()
        );
        for (idx, (&slot, &op)) in layout.fixed.iter().zip(operands).enumerate() {
            ensure!(
                slot.matches(op),
                "{inst} operand {idx}: Expected {slot:?} operand, found {op}"
            );
        }
        let extra = &operands[layout.fixed.len()..];
        match layout.rest {
            Some(slot) => {
                for (idx, &op) in extra.iter().enumerate() {
                    ensure!(
                        slot.matches(op),
                        "{inst} operand {}: Expected {slot:?} operand, found {op}",
                        idx + layout.fixed.len()
                    );
                }
            }
            None => ensure!(
                extra.is_empty(),
                "{inst}: {opcode} expects {} operands, found {}",
                layout.fixed.len(),
                operands.len()
            ),
        }
        Ok(())
    }

    fn check_widths(&self, inst: Inst, opcode: Opcode, operands: &[Operand]) -> Result<()> {
        let width = |idx: usize| operands[idx].value().map(|v| self.width(v));
        let same = |indices: &[usize]| -> Result<()> {
            let first = width(indices[0]);
            for &idx in &indices[1..] {
                ensure!(
                    width(idx) == first,
                    "{inst}: Operands {} and {idx} of {opcode} must have the same width",
                    indices[0]
                );
            }
            Ok(())
        };
        let one_bit = |idx: usize| -> Result<()> {
            ensure!(
                width(idx) == Some(1),
                "{inst} operand {idx}: {opcode} expects a 1-bit value"
            );
            Ok(())
        };

        match opcode {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Umulh
            | Opcode::Smulh
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Fadd
            | Opcode::Fsub
            | Opcode::Fmul => same(&[0, 1, 2])?,
            Opcode::Shl | Opcode::Lshr | Opcode::Ashr | Opcode::PtrAdd => same(&[0, 1])?,
            _ if opcode.is_carry_out() => {
                same(&[0, 2, 3])?;
                one_bit(1)?;
                if opcode.is_carry_in() {
                    one_bit(4)?;
                }
            }
            Opcode::Fma => same(&[0, 1, 2, 3])?,
            Opcode::Icmp | Opcode::Fcmp => {
                one_bit(0)?;
                same(&[2, 3])?;
            }
            Opcode::Select => {
                one_bit(1)?;
                same(&[0, 2, 3])?;
            }
            Opcode::BrCond => one_bit(0)?,
            Opcode::Copy | Opcode::Bitcast => same(&[0, 1])?,
            Opcode::Trunc => ensure!(
                width(0) < width(1),
                "{inst}: {opcode} must produce a narrower value"
            ),
            Opcode::Zext | Opcode::Sext | Opcode::Anyext => ensure!(
                width(0) > width(1),
                "{inst}: {opcode} must produce a wider value"
            ),
            Opcode::MergeValues => {
                let total: u32 = operands[1..].iter().filter_map(|op| op.value()).map(|v| self.width(v)).sum();
                ensure!(
                    width(0) == Some(total),
                    "{inst}: {opcode} inputs must add up to the result width"
                );
            }
            Opcode::UnmergeValues => {
                let (src, defs) = operands.split_last().map_or((None, &[][..]), |(s, d)| (Some(s), d));
                let total: u32 = defs.iter().filter_map(|op| op.value()).map(|v| self.width(v)).sum();
                ensure!(
                    src.and_then(|op| op.value()).map(|v| self.width(v)) == Some(total),
                    "{inst}: {opcode} results must add up to the input width"
                );
            }
            _ => {}
        }
        Ok(())
    }
}
