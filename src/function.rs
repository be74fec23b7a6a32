//! The [`Function`] trait which describes the program being processed.
//!
//! # Program representation
//!
//! The function body is a sequence of basic blocks, each holding an ordered
//! list of instructions. Instructions use generic, target-independent
//! [`Opcode`]s and describe their inputs and outputs with a list of
//! [`Operand`]s.
//!
//! Every register operand refers to a virtual [`Value`]. Values have a
//! [`Type`] which gives their width, and an optional [`RegBank`] which is
//! filled in by the bank selection pass. Values may already have a bank
//! assigned on input, for example function arguments whose location is fixed
//! by the calling convention.
//!
//! # SSA
//!
//! The function must be in SSA form: every [`Value`] is defined by at most
//! one [`Operand::Def`]. Values without a definition are treated as live-in
//! to the function. A definition must appear before every use in the linear
//! order of blocks and instructions. Phi nodes are not supported by bank
//! selection and cause it to fail.
//!
//! # Operand layout
//!
//! Operands follow a fixed positional layout for each opcode, with all
//! definitions listed before the inputs:
//!
//! | Opcode                        | Operands                                   |
//! |-------------------------------|--------------------------------------------|
//! | binary arithmetic and bitwise | `Def, Use, Use`                            |
//! | `uaddo`, `usubo`, ...         | `Def result, Def carry, Use, Use`          |
//! | `uadde`, `usube`, ...         | `Def result, Def carry, Use, Use, Use cin` |
//! | unary and casts               | `Def, Use`                                 |
//! | `fma`                         | `Def, Use, Use, Use`                       |
//! | `constant`, `fconstant`       | `Def, Imm`                                 |
//! | `frame_index`                 | `Def, Imm`                                 |
//! | `block_addr`                  | `Def, Block`                               |
//! | `implicit_def`                | `Def`                                      |
//! | `insert`                      | `Def, Use src, Use elt, Imm offset`        |
//! | `extract`                     | `Def, Use src, Imm offset`                 |
//! | `merge_values`                | `Def, Use...`                              |
//! | `unmerge_values`              | `Def..., Use`                              |
//! | `extract_vector_elt`          | `Def, Use vec, Use idx`                    |
//! | `insert_vector_elt`           | `Def, Use vec, Use elt, Use idx`           |
//! | `icmp`, `fcmp`                | `Def, Cond, Use, Use`                      |
//! | `select`                      | `Def, Use cond, Use, Use`                  |
//! | `load`                        | `Def, Use ptr`                             |
//! | `store`                       | `Use value, Use ptr`                       |
//! | `atomicrmw`                   | `Def, Use ptr, Use value`                  |
//! | `atomic_cmpxchg`              | `Def, Use ptr, Use cmp, Use new`           |
//! | `intrinsic`                   | `Def, Intrinsic, Use...`                   |
//! | `intrinsic_side_effects`      | `Intrinsic, Use...`                        |
//! | `brcond`                      | `Use cond, Block`                          |
//! | `br`                          | `Block`                                    |
//! | `copy`                        | `Def, Use`                                 |
//! | `phi`                         | `Def, (Use, Block)...`                     |
//!
//! Loads, stores and atomics carry a [`MemOperand`] describing the access.
//!
//! # Mutation
//!
//! Bank selection rewrites the function in place: it assigns banks to values,
//! inserts copies between banks, and replaces wide instructions with pairs of
//! narrower ones. These changes are made through the mutating methods of the
//! [`Function`] trait. Instructions and values are arena indices which remain
//! valid when other instructions are inserted or removed.

use core::fmt;

use bitflags::bitflags;
use cranelift_entity::{entity_impl, Keys};

use crate::regbank::RegBank;

/// An opaque reference to a basic block in the function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to an instruction in the function.
///
/// Instruction references stay valid when other instructions are inserted or
/// removed, but they do not imply any ordering: the order of instructions is
/// given by [`Function::block_insts`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to an SSA value in the function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Value(u32);
entity_impl!(Value, "%");

/// Shape of a value, which determines its width in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    /// Plain integer or floating-point bits.
    Scalar(u32),

    /// Pointer into the given address space.
    Pointer {
        /// Address space of the pointer.
        addr_space: u32,
        /// Width of the pointer in bits.
        bits: u32,
    },

    /// Fixed-length vector of scalar elements.
    Vector {
        /// Number of elements.
        lanes: u32,
        /// Width of each element in bits.
        elem_bits: u32,
    },
}

impl Type {
    /// Single-bit boolean.
    pub const S1: Type = Type::Scalar(1);

    /// 32-bit scalar.
    pub const S32: Type = Type::Scalar(32);

    /// 64-bit scalar.
    pub const S64: Type = Type::Scalar(64);

    /// Returns the total width of the type in bits.
    #[inline]
    #[must_use]
    pub const fn size_in_bits(self) -> u32 {
        match self {
            Type::Scalar(bits) => bits,
            Type::Pointer { bits, .. } => bits,
            Type::Vector { lanes, elem_bits } => lanes * elem_bits,
        }
    }

    /// Returns the type used for each half of a value of this type when it is
    /// split into two equal pieces.
    ///
    /// Halves are always plain scalars, regardless of the original shape.
    #[inline]
    #[must_use]
    pub const fn half(self) -> Type {
        Type::Scalar(self.size_in_bits() / 2)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Type::Scalar(bits) => write!(f, "s{bits}"),
            Type::Pointer { addr_space, bits } => write!(f, "p{addr_space}:{bits}"),
            Type::Vector { lanes, elem_bits } => write!(f, "<{lanes} x s{elem_bits}>"),
        }
    }
}

/// Condition code for comparison instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[allow(missing_docs)]
pub enum Cond {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    Ord,
    Uno,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Ult => "ult",
            Cond::Ule => "ule",
            Cond::Ugt => "ugt",
            Cond::Uge => "uge",
            Cond::Slt => "slt",
            Cond::Sle => "sle",
            Cond::Sgt => "sgt",
            Cond::Sge => "sge",
            Cond::Oeq => "oeq",
            Cond::One => "one",
            Cond::Olt => "olt",
            Cond::Ole => "ole",
            Cond::Ogt => "ogt",
            Cond::Oge => "oge",
            Cond::Ord => "ord",
            Cond::Uno => "uno",
        };
        f.write_str(name)
    }
}

/// Target intrinsics which may appear in `intrinsic` and
/// `intrinsic_side_effects` instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Intrinsic {
    /// Floating-point maximum.
    Maxnum,

    /// Floating-point minimum.
    Minnum,

    /// Convert two floats to packed half precision with round-toward-zero.
    CvtPkrtz,

    /// Pointer to the kernel argument segment.
    KernargSegmentPtr,

    /// Whole-quad-mode vote on a lane mask.
    WqmVote,

    /// Export to a render target: `target, enable, src0..src3, done, vm`.
    Exp,

    /// Compressed export: `target, enable, src0, src1, done, vm`.
    ExpCompr,

    /// Any other intrinsic, identified by number.
    Other(u32),
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intrinsic::Maxnum => f.write_str("maxnum"),
            Intrinsic::Minnum => f.write_str("minnum"),
            Intrinsic::CvtPkrtz => f.write_str("cvt_pkrtz"),
            Intrinsic::KernargSegmentPtr => f.write_str("kernarg_segment_ptr"),
            Intrinsic::WqmVote => f.write_str("wqm_vote"),
            Intrinsic::Exp => f.write_str("exp"),
            Intrinsic::ExpCompr => f.write_str("exp_compr"),
            Intrinsic::Other(id) => write!(f, "intrinsic{id}"),
        }
    }
}

/// Operation performed by an `atomicrmw` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[allow(missing_docs)]
pub enum AtomicOp {
    Xchg,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Max,
    Min,
    Umax,
    Umin,
}

/// Generic opcode of an instruction.
///
/// See the [module-level documentation](self) for the operand layout of each
/// opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Opcode {
    // Integer arithmetic.
    Add,
    Sub,
    Mul,
    Umulh,
    Smulh,
    Shl,
    Lshr,
    Ashr,
    PtrAdd,

    // Arithmetic with carry-out.
    Uaddo,
    Usubo,
    Saddo,
    Ssubo,

    // Arithmetic with carry-in and carry-out.
    Uadde,
    Usube,
    Sadde,
    Ssube,

    // Bitwise operations.
    And,
    Or,
    Xor,

    // Floating-point arithmetic and conversions.
    Fadd,
    Fsub,
    Fmul,
    Fma,
    Fsqrt,
    Fexp2,
    Flog2,
    FpToSi,
    FpToUi,
    SiToFp,
    UiToFp,
    FpTrunc,
    FpExt,
    IntrinsicTrunc,
    IntrinsicRound,

    // Operations which preserve the bank of their input.
    Bitcast,
    IntToPtr,
    PtrToInt,
    Ctlz,
    CtlzZeroUndef,
    Cttz,
    CttzZeroUndef,
    Ctpop,
    Bswap,
    Fabs,
    Fneg,
    Trunc,
    Zext,
    Sext,
    Anyext,

    // Value materialization.
    ImplicitDef,
    Constant,
    FConstant,
    FrameIndex,
    BlockAddr,

    // Bit-level composition.
    Insert,
    Extract,
    MergeValues,
    UnmergeValues,
    ExtractVectorElt,
    InsertVectorElt,

    // Comparisons and selection.
    Icmp,
    Fcmp,
    Select,

    // Memory.
    Load,
    Store,
    AtomicRmw(AtomicOp),
    AtomicCmpXchg,

    // Intrinsic calls.
    Intrinsic,
    IntrinsicSideEffects,

    // Control flow and moves.
    BrCond,
    Br,
    Copy,
    Phi,
}

impl Opcode {
    /// Returns whether the opcode is a 2-input bitwise operation.
    #[inline]
    #[must_use]
    pub fn is_bitwise(self) -> bool {
        matches!(self, Opcode::And | Opcode::Or | Opcode::Xor)
    }

    /// Returns whether this is an add/sub producing a carry or overflow flag.
    #[inline]
    #[must_use]
    pub fn is_carry_out(self) -> bool {
        matches!(
            self,
            Opcode::Uaddo | Opcode::Usubo | Opcode::Saddo | Opcode::Ssubo
        ) || self.is_carry_in()
    }

    /// Returns whether this is an add/sub consuming a carry flag.
    #[inline]
    #[must_use]
    pub fn is_carry_in(self) -> bool {
        matches!(
            self,
            Opcode::Uadde | Opcode::Usube | Opcode::Sadde | Opcode::Ssube
        )
    }

    /// Returns whether the opcode accesses memory.
    #[inline]
    #[must_use]
    pub fn is_memory(self) -> bool {
        matches!(
            self,
            Opcode::Load | Opcode::Store | Opcode::AtomicRmw(_) | Opcode::AtomicCmpXchg
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Umulh => "umulh",
            Opcode::Smulh => "smulh",
            Opcode::Shl => "shl",
            Opcode::Lshr => "lshr",
            Opcode::Ashr => "ashr",
            Opcode::PtrAdd => "ptr_add",
            Opcode::Uaddo => "uaddo",
            Opcode::Usubo => "usubo",
            Opcode::Saddo => "saddo",
            Opcode::Ssubo => "ssubo",
            Opcode::Uadde => "uadde",
            Opcode::Usube => "usube",
            Opcode::Sadde => "sadde",
            Opcode::Ssube => "ssube",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Fadd => "fadd",
            Opcode::Fsub => "fsub",
            Opcode::Fmul => "fmul",
            Opcode::Fma => "fma",
            Opcode::Fsqrt => "fsqrt",
            Opcode::Fexp2 => "fexp2",
            Opcode::Flog2 => "flog2",
            Opcode::FpToSi => "fptosi",
            Opcode::FpToUi => "fptoui",
            Opcode::SiToFp => "sitofp",
            Opcode::UiToFp => "uitofp",
            Opcode::FpTrunc => "fptrunc",
            Opcode::FpExt => "fpext",
            Opcode::IntrinsicTrunc => "intrinsic_trunc",
            Opcode::IntrinsicRound => "intrinsic_round",
            Opcode::Bitcast => "bitcast",
            Opcode::IntToPtr => "inttoptr",
            Opcode::PtrToInt => "ptrtoint",
            Opcode::Ctlz => "ctlz",
            Opcode::CtlzZeroUndef => "ctlz_zero_undef",
            Opcode::Cttz => "cttz",
            Opcode::CttzZeroUndef => "cttz_zero_undef",
            Opcode::Ctpop => "ctpop",
            Opcode::Bswap => "bswap",
            Opcode::Fabs => "fabs",
            Opcode::Fneg => "fneg",
            Opcode::Trunc => "trunc",
            Opcode::Zext => "zext",
            Opcode::Sext => "sext",
            Opcode::Anyext => "anyext",
            Opcode::ImplicitDef => "implicit_def",
            Opcode::Constant => "constant",
            Opcode::FConstant => "fconstant",
            Opcode::FrameIndex => "frame_index",
            Opcode::BlockAddr => "block_addr",
            Opcode::Insert => "insert",
            Opcode::Extract => "extract",
            Opcode::MergeValues => "merge_values",
            Opcode::UnmergeValues => "unmerge_values",
            Opcode::ExtractVectorElt => "extract_vector_elt",
            Opcode::InsertVectorElt => "insert_vector_elt",
            Opcode::Icmp => "icmp",
            Opcode::Fcmp => "fcmp",
            Opcode::Select => "select",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::AtomicRmw(op) => return write!(f, "atomicrmw_{op}"),
            Opcode::AtomicCmpXchg => "atomic_cmpxchg",
            Opcode::Intrinsic => "intrinsic",
            Opcode::IntrinsicSideEffects => "intrinsic_side_effects",
            Opcode::BrCond => "brcond",
            Opcode::Br => "br",
            Opcode::Copy => "copy",
            Opcode::Phi => "phi",
        };
        f.write_str(name)
    }
}

impl fmt::Display for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomicOp::Xchg => "xchg",
            AtomicOp::Add => "add",
            AtomicOp::Sub => "sub",
            AtomicOp::And => "and",
            AtomicOp::Or => "or",
            AtomicOp::Xor => "xor",
            AtomicOp::Max => "max",
            AtomicOp::Min => "min",
            AtomicOp::Umax => "umax",
            AtomicOp::Umin => "umin",
        };
        f.write_str(name)
    }
}

/// A single operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    /// Definition of a value.
    Def(Value),

    /// Use of a value.
    Use(Value),

    /// Immediate integer.
    Imm(i64),

    /// Comparison condition code.
    Cond(Cond),

    /// Intrinsic identifier.
    Intrinsic(Intrinsic),

    /// Branch target or block address.
    Block(Block),
}

impl Operand {
    /// Returns the value referenced by this operand, if it is a register
    /// operand.
    #[inline]
    #[must_use]
    pub fn value(self) -> Option<Value> {
        match self {
            Operand::Def(value) | Operand::Use(value) => Some(value),
            _ => None,
        }
    }

    /// Returns whether this operand defines a value.
    #[inline]
    #[must_use]
    pub fn is_def(self) -> bool {
        matches!(self, Operand::Def(_))
    }

    /// Returns whether this operand uses a value.
    #[inline]
    #[must_use]
    pub fn is_use(self) -> bool {
        matches!(self, Operand::Use(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Def(value) => write!(f, "Def({value})"),
            Operand::Use(value) => write!(f, "{value}"),
            Operand::Imm(imm) => write!(f, "#{imm}"),
            Operand::Cond(cond) => write!(f, "{cond}"),
            Operand::Intrinsic(intrinsic) => write!(f, "@{intrinsic}"),
            Operand::Block(block) => write!(f, "{block}"),
        }
    }
}

bitflags! {
    /// Properties of a memory access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct MemFlags: u8 {
        /// The access reads memory.
        const LOAD = 1 << 0;
        /// The access writes memory.
        const STORE = 1 << 1;
        /// The access is volatile.
        const VOLATILE = 1 << 2;
        /// Every lane accesses the same address, as determined by the
        /// divergence analysis.
        const UNIFORM = 1 << 3;
    }
}

/// Description of a memory access made by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemOperand {
    /// Size of the access in bytes.
    pub size: u32,

    /// Access properties.
    pub flags: MemFlags,
}

impl fmt::Display for MemOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem({}", self.size)?;
        for (flag, name) in [
            (MemFlags::LOAD, "load"),
            (MemFlags::STORE, "store"),
            (MemFlags::VOLATILE, "volatile"),
            (MemFlags::UNIFORM, "uniform"),
        ] {
            if self.flags.contains(flag) {
                write!(f, ", {name}")?;
            }
        }
        f.write_str(")")
    }
}

/// Position at which a new instruction is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// Immediately before the given instruction.
    Before(Inst),

    /// Immediately after the given instruction.
    After(Inst),
}

/// Trait describing the program on which bank selection operates.
///
/// The read-only methods describe the current state of the program and must
/// reflect all changes made through the mutating methods.
pub trait Function {
    // ---- Blocks ----

    /// Number of basic blocks in the function.
    fn num_blocks(&self) -> usize;

    /// Iterator over all blocks in the function.
    #[inline]
    fn blocks(&self) -> Keys<Block> {
        Keys::with_len(self.num_blocks())
    }

    /// Instructions in a block, in program order.
    fn block_insts(&self, block: Block) -> &[Inst];

    // ---- Instructions ----

    /// Number of instructions ever created in the function, including ones
    /// which have since been removed.
    fn num_insts(&self) -> usize;

    /// Opcode of an instruction.
    fn inst_opcode(&self, inst: Inst) -> Opcode;

    /// Operands of an instruction.
    fn inst_operands(&self, inst: Inst) -> &[Operand];

    /// Memory accesses made by an instruction.
    fn inst_mem_operands(&self, inst: Inst) -> &[MemOperand];

    /// Block containing an instruction.
    fn inst_block(&self, inst: Inst) -> Block;

    // ---- Values ----

    /// Number of values ever created in the function.
    fn num_values(&self) -> usize;

    /// Iterator over all values in the function.
    #[inline]
    fn values(&self) -> Keys<Value> {
        Keys::with_len(self.num_values())
    }

    /// Type of a value.
    fn value_type(&self, value: Value) -> Type;

    /// Bank assigned to a value, if any.
    fn value_bank(&self, value: Value) -> Option<RegBank>;

    /// Instruction defining a value, or `None` for live-in values.
    fn value_def(&self, value: Value) -> Option<Inst>;

    // ---- Mutation ----

    /// Assigns a bank to a value.
    fn set_value_bank(&mut self, value: Value, bank: RegBank);

    /// Creates a new value with no definition and no bank.
    fn create_value(&mut self, ty: Type) -> Value;

    /// Inserts a new instruction. Any values defined by `operands` now have
    /// the new instruction as their definition.
    fn insert_inst(&mut self, at: InsertPoint, opcode: Opcode, operands: &[Operand]) -> Inst;

    /// Replaces one operand of an instruction, updating value definitions if
    /// a `Def` operand is added or removed.
    fn set_inst_operand(&mut self, inst: Inst, idx: usize, operand: Operand);

    /// Removes an instruction from its block. Values defined by it no longer
    /// have a definition.
    fn remove_inst(&mut self, inst: Inst);
}
