//! Support for displaying human-readable representations of types implementing
//! [`Function`].

use core::cell::Cell;
use core::fmt;

use crate::function::{Function, Inst, Operand};

/// Helper type to display a separated list of displayable values.
pub(crate) struct DisplayIter<T> {
    iter: Cell<Option<T>>,
    separator: &'static str,
}
impl<T: IntoIterator> fmt::Display for DisplayIter<T>
where
    T::Item: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(iter) = self.iter.take() else {
            return Ok(());
        };
        for (i, val) in iter.into_iter().enumerate() {
            if i == 0 {
                write!(f, "{val}")?;
            } else {
                write!(f, "{} {val}", self.separator)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn display_iter<I: IntoIterator<Item = impl fmt::Display>>(
    iter: I,
    separator: &'static str,
) -> DisplayIter<I> {
    DisplayIter {
        iter: Cell::new(Some(iter)),
        separator,
    }
}

/// Wrapper around a type implementing [`Function`] that provides a [`Display`]
/// implementation which dumps the function in a human-readable format.
///
/// Values are listed first with their type and bank (`_` if no bank has been
/// assigned yet), followed by the instructions of each block:
///
/// ```text
/// %0: s64 vgpr
/// %1: s64 _
///
/// block0:
///     inst0: %2, %3 = uaddo %0, %1
/// ```
///
/// [`Display`]: core::fmt::Display
pub struct DisplayFunction<'a, F: Function>(pub &'a F);

impl<F: Function> fmt::Debug for DisplayFunction<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<F: Function> fmt::Display for DisplayFunction<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Value declarations
        for value in self.0.values() {
            write!(f, "{value}: {}", self.0.value_type(value))?;
            match self.0.value_bank(value) {
                Some(bank) => writeln!(f, " {bank}")?,
                None => writeln!(f, " _")?,
            }
        }

        // Blocks
        for block in self.0.blocks() {
            writeln!(f)?;
            writeln!(f, "{block}:")?;
            for &inst in self.0.block_insts(block) {
                writeln!(f, "    {}", DisplayInst(self.0, inst))?;
            }
        }

        Ok(())
    }
}

/// Internal helper type to format a single instruction.
pub(crate) struct DisplayInst<'a, F>(pub(crate) &'a F, pub(crate) Inst);

impl<F: Function> fmt::Display for DisplayInst<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let DisplayInst(func, inst) = *self;
        let operands = func.inst_operands(inst);
        write!(f, "{inst}: ")?;

        // Definitions on the left-hand side.
        let defs = operands.iter().filter_map(|op| match op {
            Operand::Def(value) => Some(value),
            _ => None,
        });
        if operands.iter().any(|op| op.is_def()) {
            write!(f, "{} = ", display_iter(defs, ","))?;
        }

        write!(f, "{}", func.inst_opcode(inst))?;
        let inputs = operands.iter().filter(|op| !op.is_def());
        for (i, op) in inputs.enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        for mem in func.inst_mem_operands(inst) {
            write!(f, " {mem}")?;
        }
        Ok(())
    }
}
