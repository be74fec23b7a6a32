//! Generic implementation of a [`Function`] which can be used for testing bank
//! selection.

use alloc::vec::Vec;
use core::fmt;

use cranelift_entity::PrimaryMap;

use super::DisplayFunction;
use crate::function::{Block, Function, InsertPoint, Inst, MemOperand, Opcode, Operand, Type, Value};
use crate::regbank::RegBank;

#[cfg(feature = "arbitrary")]
mod arbitrary;
#[cfg(feature = "arbitrary")]
pub use arbitrary::ArbitraryFunctionConfig;

#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct BlockData {
    insts: Vec<Inst>,
}

#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct InstData {
    opcode: Opcode,
    operands: Vec<Operand>,
    mem_operands: Vec<MemOperand>,
    block: Block,
}

#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct ValueData {
    ty: Type,
    bank: Option<RegBank>,
    def: Option<Inst>,
}

/// A generic implementation of [`Function`] which can be built incrementally
/// or constructed from an existing `Function`.
///
/// This is primarily useful for development and debugging of bank selection
/// since it supports every mutation that bank selection performs.
#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenericFunction {
    blocks: PrimaryMap<Block, BlockData>,
    insts: PrimaryMap<Inst, InstData>,
    values: PrimaryMap<Value, ValueData>,
}

impl fmt::Debug for GenericFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DisplayFunction(self).fmt(f)
    }
}

impl fmt::Display for GenericFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DisplayFunction(self).fmt(f)
    }
}

impl GenericFunction {
    /// Creates an empty function.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new empty block.
    pub fn add_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Creates a new value with no bank assigned.
    pub fn add_value(&mut self, ty: Type) -> Value {
        self.values.push(ValueData {
            ty,
            bank: None,
            def: None,
        })
    }

    /// Creates a new value which is already assigned to `bank`.
    pub fn add_value_in_bank(&mut self, ty: Type, bank: RegBank) -> Value {
        self.values.push(ValueData {
            ty,
            bank: Some(bank),
            def: None,
        })
    }

    /// Appends an instruction with no memory operands to the end of `block`.
    pub fn push_inst(&mut self, block: Block, opcode: Opcode, operands: &[Operand]) -> Inst {
        self.push_mem_inst(block, opcode, operands, &[])
    }

    /// Appends an instruction accessing memory to the end of `block`.
    pub fn push_mem_inst(
        &mut self,
        block: Block,
        opcode: Opcode,
        operands: &[Operand],
        mem_operands: &[MemOperand],
    ) -> Inst {
        let inst = self.new_inst(block, opcode, operands, mem_operands);
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Creates the instruction data without placing it in a block.
    fn new_inst(
        &mut self,
        block: Block,
        opcode: Opcode,
        operands: &[Operand],
        mem_operands: &[MemOperand],
    ) -> Inst {
        let inst = self.insts.push(InstData {
            opcode,
            operands: operands.into(),
            mem_operands: mem_operands.into(),
            block,
        });
        for op in operands {
            if let Operand::Def(value) = *op {
                self.values[value].def = Some(inst);
            }
        }
        inst
    }

    /// Returns the position of `inst` within its block.
    fn position(&self, inst: Inst) -> (Block, usize) {
        let block = self.insts[inst].block;
        let pos = self.blocks[block]
            .insts
            .iter()
            .position(|&i| i == inst)
            .unwrap_or_else(|| panic!("{inst} is not in {block}"));
        (block, pos)
    }

    /// Constructs a `GenericFunction` from an existing object which implements
    /// the [`Function`] trait.
    pub fn from_function(func: &impl Function) -> Self {
        let mut blocks = PrimaryMap::new();
        let mut insts = PrimaryMap::new();
        let mut values = PrimaryMap::new();
        for block in func.blocks() {
            blocks.push(BlockData {
                insts: func.block_insts(block).into(),
            });
        }
        for inst in (0..func.num_insts()).map(cranelift_entity::EntityRef::new) {
            insts.push(InstData {
                opcode: func.inst_opcode(inst),
                operands: func.inst_operands(inst).into(),
                mem_operands: func.inst_mem_operands(inst).into(),
                block: func.inst_block(inst),
            });
        }
        for value in func.values() {
            values.push(ValueData {
                ty: func.value_type(value),
                bank: func.value_bank(value),
                def: func.value_def(value),
            });
        }
        Self {
            blocks,
            insts,
            values,
        }
    }
}

impl Function for GenericFunction {
    #[inline]
    fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block].insts
    }

    #[inline]
    fn num_insts(&self) -> usize {
        self.insts.len()
    }

    #[inline]
    fn inst_opcode(&self, inst: Inst) -> Opcode {
        self.insts[inst].opcode
    }

    #[inline]
    fn inst_operands(&self, inst: Inst) -> &[Operand] {
        &self.insts[inst].operands
    }

    #[inline]
    fn inst_mem_operands(&self, inst: Inst) -> &[MemOperand] {
        &self.insts[inst].mem_operands
    }

    #[inline]
    fn inst_block(&self, inst: Inst) -> Block {
        self.insts[inst].block
    }

    #[inline]
    fn num_values(&self) -> usize {
        self.values.len()
    }

    #[inline]
    fn value_type(&self, value: Value) -> Type {
        self.values[value].ty
    }

    #[inline]
    fn value_bank(&self, value: Value) -> Option<RegBank> {
        self.values[value].bank
    }

    #[inline]
    fn value_def(&self, value: Value) -> Option<Inst> {
        self.values[value].def
    }

    #[inline]
    fn set_value_bank(&mut self, value: Value, bank: RegBank) {
        self.values[value].bank = Some(bank);
    }

    #[inline]
    fn create_value(&mut self, ty: Type) -> Value {
        self.add_value(ty)
    }

    fn insert_inst(&mut self, at: InsertPoint, opcode: Opcode, operands: &[Operand]) -> Inst {
        let (block, pos) = match at {
            InsertPoint::Before(anchor) => self.position(anchor),
            InsertPoint::After(anchor) => {
                let (block, pos) = self.position(anchor);
                (block, pos + 1)
            }
        };
        let inst = self.new_inst(block, opcode, operands, &[]);
        self.blocks[block].insts.insert(pos, inst);
        inst
    }

    fn set_inst_operand(&mut self, inst: Inst, idx: usize, operand: Operand) {
        if let Operand::Def(old) = self.insts[inst].operands[idx] {
            if self.values[old].def == Some(inst) {
                self.values[old].def = None;
            }
        }
        if let Operand::Def(new) = operand {
            self.values[new].def = Some(inst);
        }
        self.insts[inst].operands[idx] = operand;
    }

    fn remove_inst(&mut self, inst: Inst) {
        let (block, pos) = self.position(inst);
        self.blocks[block].insts.remove(pos);
        for i in 0..self.insts[inst].operands.len() {
            if let Operand::Def(value) = self.insts[inst].operands[i] {
                if self.values[value].def == Some(inst) {
                    self.values[value].def = None;
                }
            }
        }
    }
}
