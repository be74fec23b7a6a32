use alloc::vec;
use alloc::vec::Vec;
use core::ops::RangeInclusive;

use arbitrary::{Result, Unstructured};
use cranelift_entity::EntityRef;

use super::GenericFunction;
use crate::function::{
    AtomicOp, Block, Cond, Intrinsic, MemFlags, MemOperand, Opcode, Operand, Type, Value,
};
use crate::regbank::RegBank;

/// Configuration options for [`GenericFunction::arbitrary_with_config`].
///
/// These are ranges from which a value is arbitrarily chosen when generating a
/// function.
///
/// It's generally fine to just use `Default::default` for this.
#[derive(Debug, Clone)]
pub struct ArbitraryFunctionConfig {
    /// Number of blocks in the function.
    pub blocks: RangeInclusive<usize>,

    /// Number of instructions per block, excluding the terminator.
    pub insts_per_block: RangeInclusive<usize>,

    /// Chance, out of 256, that a newly created value is given a bank before
    /// bank selection runs.
    pub preassigned_bank_chance: u8,
}

impl Default for ArbitraryFunctionConfig {
    fn default() -> Self {
        Self {
            blocks: 1..=4,
            insts_per_block: 0..=20,
            preassigned_bank_chance: 48,
        }
    }
}

/// 64-bit pointer into global memory.
const GLOBAL_PTR: Type = Type::Pointer {
    addr_space: 1,
    bits: 64,
};

/// 64-bit pointer into constant memory.
const CONSTANT_PTR: Type = Type::Pointer {
    addr_space: 4,
    bits: 64,
};

const V2S32: Type = Type::Vector {
    lanes: 2,
    elem_bits: 32,
};

impl GenericFunction {
    /// Constructs a randomly-generated `GenericFunction`.
    ///
    /// The result is guaranteed to pass
    /// [`validate_function`](crate::debug_utils::validate_function). It never
    /// contains `phi` instructions or unknown intrinsics, but may still contain
    /// values pinned to banks which make bank selection fail.
    pub fn arbitrary_with_config(
        u: &mut Unstructured<'_>,
        config: ArbitraryFunctionConfig,
    ) -> Result<Self> {
        let mut builder = FunctionBuilder {
            u,
            config,
            func: GenericFunction::new(),
            available: Vec::new(),
        };
        builder.gen_function()?;
        Ok(builder.func)
    }
}

impl<'a> arbitrary::Arbitrary<'a> for GenericFunction {
    fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
        Self::arbitrary_with_config(u, ArbitraryFunctionConfig::default())
    }
}

struct FunctionBuilder<'a, 'b> {
    /// Source of randomness.
    u: &'a mut Unstructured<'b>,

    /// Configuration options
    config: ArbitraryFunctionConfig,

    /// Function that is being built.
    func: GenericFunction,

    /// Values which may be used by the next instruction: live-ins and values
    /// defined by earlier instructions.
    available: Vec<Value>,
}

impl FunctionBuilder<'_, '_> {
    fn gen_function(&mut self) -> Result<()> {
        let num_blocks = self.u.int_in_range(self.config.blocks.clone())?.max(1);
        for _ in 0..num_blocks {
            self.func.add_block();
        }
        for block in (0..num_blocks).map(Block::new) {
            let num_insts = self.u.int_in_range(self.config.insts_per_block.clone())?;
            for _ in 0..num_insts {
                self.gen_inst(block)?;
            }
            self.gen_terminator(block, num_blocks)?;
        }
        Ok(())
    }

    /// Picks a bank for a new value, or `None` to leave it unassigned.
    fn maybe_bank(&mut self, ty: Type) -> Result<Option<RegBank>> {
        let chance = self.config.preassigned_bank_chance;
        if chance == 0 || !self.u.ratio(chance, u8::MAX)? {
            return Ok(None);
        }
        let width = ty.size_in_bits();
        let banks: Vec<RegBank> = RegBank::ALL
            .into_iter()
            .filter(|bank| bank.size_domain().contains(width))
            .collect();
        Ok(Some(*self.u.choose(&banks)?))
    }

    /// Creates a new value, possibly with a bank already assigned.
    fn new_value(&mut self, ty: Type) -> Result<Value> {
        Ok(match self.maybe_bank(ty)? {
            Some(bank) => self.func.add_value_in_bank(ty, bank),
            None => self.func.add_value(ty),
        })
    }

    /// Returns a value of type `ty` which can be used at this point: either an
    /// existing one or a new live-in value.
    fn use_value(&mut self, ty: Type) -> Result<Operand> {
        let candidates: Vec<Value> = self
            .available
            .iter()
            .copied()
            .filter(|&value| self.func.values[value].ty == ty)
            .collect();
        let value = if candidates.is_empty() || self.u.ratio(1, 5)? {
            let value = self.new_value(ty)?;
            self.available.push(value);
            value
        } else {
            *self.u.choose(&candidates)?
        };
        Ok(Operand::Use(value))
    }

    /// Creates a value defined by the instruction being generated.
    fn def_value(&mut self, ty: Type, defs: &mut Vec<Value>) -> Result<Operand> {
        let value = self.new_value(ty)?;
        defs.push(value);
        Ok(Operand::Def(value))
    }

    fn mem(&mut self, size: u32, flags: MemFlags) -> Result<MemOperand> {
        let mut flags = flags;
        if self.u.arbitrary()? {
            flags |= MemFlags::UNIFORM;
        }
        if self.u.ratio(1, 8)? {
            flags |= MemFlags::VOLATILE;
        }
        Ok(MemOperand { size, flags })
    }

    fn gen_inst(&mut self, block: Block) -> Result<()> {
        let mut defs = Vec::new();
        let mut mem = Vec::new();
        let (opcode, operands) = match self.u.int_in_range(0..=20)? {
            0 => {
                let opcode = *self.u.choose(&[
                    Opcode::Add,
                    Opcode::Sub,
                    Opcode::Mul,
                    Opcode::Umulh,
                    Opcode::Smulh,
                    Opcode::Shl,
                    Opcode::Lshr,
                    Opcode::Ashr,
                ])?;
                let ty = *self.u.choose(&[Type::S32, Type::S64])?;
                let ops = [
                    self.def_value(ty, &mut defs)?,
                    self.use_value(ty)?,
                    self.use_value(ty)?,
                ];
                (opcode, ops.to_vec())
            }
            1 => {
                let opcode = *self.u.choose(&[Opcode::And, Opcode::Or, Opcode::Xor])?;
                let ty = *self.u.choose(&[Type::S1, Type::S32, Type::S64, Type::S64])?;
                let ops = [
                    self.def_value(ty, &mut defs)?,
                    self.use_value(ty)?,
                    self.use_value(ty)?,
                ];
                (opcode, ops.to_vec())
            }
            2 | 3 => {
                let carry_in = self.u.arbitrary()?;
                let opcode = if carry_in {
                    *self
                        .u
                        .choose(&[Opcode::Uadde, Opcode::Usube, Opcode::Sadde, Opcode::Ssube])?
                } else {
                    *self
                        .u
                        .choose(&[Opcode::Uaddo, Opcode::Usubo, Opcode::Saddo, Opcode::Ssubo])?
                };
                let ty = *self.u.choose(&[Type::S32, Type::S64])?;
                let mut ops = vec![
                    self.def_value(ty, &mut defs)?,
                    self.def_value(Type::S1, &mut defs)?,
                    self.use_value(ty)?,
                    self.use_value(ty)?,
                ];
                if carry_in {
                    ops.push(self.use_value(Type::S1)?);
                }
                (opcode, ops)
            }
            4 => {
                let opcode = *self.u.choose(&[
                    Opcode::Fadd,
                    Opcode::Fsub,
                    Opcode::Fmul,
                    Opcode::Fma,
                    Opcode::Fsqrt,
                    Opcode::Fexp2,
                    Opcode::Flog2,
                ])?;
                let inputs = match opcode {
                    Opcode::Fma => 3,
                    Opcode::Fsqrt | Opcode::Fexp2 | Opcode::Flog2 => 1,
                    _ => 2,
                };
                let mut ops = vec![self.def_value(Type::S32, &mut defs)?];
                for _ in 0..inputs {
                    ops.push(self.use_value(Type::S32)?);
                }
                (opcode, ops)
            }
            5 => {
                let ty = *self.u.choose(&[Type::S1, Type::S32, Type::S32, Type::S64])?;
                let imm = self.u.int_in_range(-4..=4)?;
                (
                    Opcode::Constant,
                    vec![self.def_value(ty, &mut defs)?, Operand::Imm(imm)],
                )
            }
            6 | 7 => {
                let (opcode, ty) = if self.u.arbitrary()? {
                    (Opcode::Icmp, *self.u.choose(&[Type::S32, Type::S64])?)
                } else {
                    (Opcode::Fcmp, Type::S32)
                };
                let cond: Cond = self.u.arbitrary()?;
                let ops = [
                    self.def_value(Type::S1, &mut defs)?,
                    Operand::Cond(cond),
                    self.use_value(ty)?,
                    self.use_value(ty)?,
                ];
                (opcode, ops.to_vec())
            }
            8 => {
                let ty = *self.u.choose(&[Type::S32, Type::S64])?;
                let ops = [
                    self.def_value(ty, &mut defs)?,
                    self.use_value(Type::S1)?,
                    self.use_value(ty)?,
                    self.use_value(ty)?,
                ];
                (Opcode::Select, ops.to_vec())
            }
            9 => {
                let ty = *self.u.choose(&[Type::S32, Type::S64])?;
                let ptr = *self.u.choose(&[GLOBAL_PTR, CONSTANT_PTR])?;
                mem.push(self.mem(ty.size_in_bits() / 8, MemFlags::LOAD)?);
                let ops = [self.def_value(ty, &mut defs)?, self.use_value(ptr)?];
                (Opcode::Load, ops.to_vec())
            }
            10 => {
                let ty = *self.u.choose(&[Type::S32, Type::S64])?;
                mem.push(self.mem(ty.size_in_bits() / 8, MemFlags::STORE)?);
                let ops = [self.use_value(ty)?, self.use_value(GLOBAL_PTR)?];
                (Opcode::Store, ops.to_vec())
            }
            11 => {
                let (opcode, dst, src) = *self.u.choose(&[
                    (Opcode::Zext, Type::S64, Type::S32),
                    (Opcode::Sext, Type::S64, Type::S32),
                    (Opcode::Anyext, Type::S64, Type::S32),
                    (Opcode::Zext, Type::S32, Type::S1),
                    (Opcode::Trunc, Type::S32, Type::S64),
                    (Opcode::Trunc, Type::S1, Type::S32),
                    (Opcode::Bitcast, Type::S64, V2S32),
                    (Opcode::PtrToInt, Type::S64, GLOBAL_PTR),
                    (Opcode::IntToPtr, GLOBAL_PTR, Type::S64),
                    (Opcode::Ctpop, Type::S32, Type::S32),
                ])?;
                let ops = [self.def_value(dst, &mut defs)?, self.use_value(src)?];
                (opcode, ops.to_vec())
            }
            12 => {
                let ty = *self.u.choose(&[Type::S1, Type::S32, Type::S64])?;
                let ops = [self.def_value(ty, &mut defs)?, self.use_value(ty)?];
                (Opcode::Copy, ops.to_vec())
            }
            13 => {
                let ops = [
                    self.def_value(Type::S64, &mut defs)?,
                    self.use_value(Type::S32)?,
                    self.use_value(Type::S32)?,
                ];
                (Opcode::MergeValues, ops.to_vec())
            }
            14 => {
                let ops = [
                    self.def_value(Type::S32, &mut defs)?,
                    self.def_value(Type::S32, &mut defs)?,
                    self.use_value(Type::S64)?,
                ];
                (Opcode::UnmergeValues, ops.to_vec())
            }
            15 => {
                let offset = *self.u.choose(&[0, 32])?;
                if self.u.arbitrary()? {
                    let ops = [
                        self.def_value(Type::S32, &mut defs)?,
                        self.use_value(Type::S64)?,
                        Operand::Imm(offset),
                    ];
                    (Opcode::Extract, ops.to_vec())
                } else {
                    let ops = [
                        self.def_value(Type::S64, &mut defs)?,
                        self.use_value(Type::S64)?,
                        self.use_value(Type::S32)?,
                        Operand::Imm(offset),
                    ];
                    (Opcode::Insert, ops.to_vec())
                }
            }
            16 => {
                if self.u.arbitrary()? {
                    let ops = [
                        self.def_value(Type::S32, &mut defs)?,
                        self.use_value(V2S32)?,
                        self.use_value(Type::S32)?,
                    ];
                    (Opcode::ExtractVectorElt, ops.to_vec())
                } else {
                    let ops = [
                        self.def_value(V2S32, &mut defs)?,
                        self.use_value(V2S32)?,
                        self.use_value(Type::S32)?,
                        self.use_value(Type::S32)?,
                    ];
                    (Opcode::InsertVectorElt, ops.to_vec())
                }
            }
            17 => {
                let intrinsic = *self.u.choose(&[
                    Intrinsic::Maxnum,
                    Intrinsic::Minnum,
                    Intrinsic::CvtPkrtz,
                    Intrinsic::KernargSegmentPtr,
                    Intrinsic::WqmVote,
                ])?;
                let ops = match intrinsic {
                    Intrinsic::KernargSegmentPtr => vec![
                        self.def_value(CONSTANT_PTR, &mut defs)?,
                        Operand::Intrinsic(intrinsic),
                    ],
                    Intrinsic::WqmVote => vec![
                        self.def_value(Type::S1, &mut defs)?,
                        Operand::Intrinsic(intrinsic),
                        self.use_value(Type::S1)?,
                    ],
                    _ => vec![
                        self.def_value(Type::S32, &mut defs)?,
                        Operand::Intrinsic(intrinsic),
                        self.use_value(Type::S32)?,
                        self.use_value(Type::S32)?,
                    ],
                };
                (Opcode::Intrinsic, ops)
            }
            18 => {
                let (intrinsic, inputs) = *self
                    .u
                    .choose(&[(Intrinsic::Exp, 8), (Intrinsic::ExpCompr, 6)])?;
                let mut ops = vec![Operand::Intrinsic(intrinsic)];
                for _ in 0..inputs {
                    ops.push(self.use_value(Type::S32)?);
                }
                (Opcode::IntrinsicSideEffects, ops)
            }
            19 => {
                let op: AtomicOp = self.u.arbitrary()?;
                mem.push(self.mem(4, MemFlags::LOAD | MemFlags::STORE)?);
                if self.u.arbitrary()? {
                    let ops = [
                        self.def_value(Type::S32, &mut defs)?,
                        self.use_value(GLOBAL_PTR)?,
                        self.use_value(Type::S32)?,
                    ];
                    (Opcode::AtomicRmw(op), ops.to_vec())
                } else {
                    let ops = [
                        self.def_value(Type::S32, &mut defs)?,
                        self.use_value(GLOBAL_PTR)?,
                        self.use_value(Type::S32)?,
                        self.use_value(Type::S32)?,
                    ];
                    (Opcode::AtomicCmpXchg, ops.to_vec())
                }
            }
            _ => {
                let ops = [
                    self.def_value(GLOBAL_PTR, &mut defs)?,
                    self.use_value(GLOBAL_PTR)?,
                    self.use_value(Type::S64)?,
                ];
                (Opcode::PtrAdd, ops.to_vec())
            }
        };

        self.func.push_mem_inst(block, opcode, &operands, &mem);
        self.available.extend(defs);
        Ok(())
    }

    fn gen_terminator(&mut self, block: Block, num_blocks: usize) -> Result<()> {
        let target = Block::new(self.u.choose_index(num_blocks)?);
        match self.u.int_in_range(0..=2)? {
            0 => {}
            1 => {
                self.func
                    .push_inst(block, Opcode::Br, &[Operand::Block(target)]);
            }
            _ => {
                let cond = self.use_value(Type::S1)?;
                self.func
                    .push_inst(block, Opcode::BrCond, &[cond, Operand::Block(target)]);
            }
        }
        Ok(())
    }
}
