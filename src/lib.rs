//! Register bank selection for generic machine IR targeting GPUs with
//! separate scalar and vector register files.
//!
//! This crate is compatible with `#![no_std]` and only requires `alloc`.
//!
//! # Overview
//!
//! Before instruction selection, values in a program are generic virtual
//! registers with a width but no storage class. This crate decides which
//! [`RegBank`] each value lives in and rewrites the program so that every
//! instruction only reads and writes banks that the hardware supports:
//!
//! * Values which are identical across all lanes can be kept in scalar
//!   registers and operated on by the scalar unit.
//! * Values which may differ between lanes must live in vector registers.
//! * Single-bit conditions live in either the uniform condition flag or a
//!   per-lane mask.
//!
//! For each instruction a set of legal [mappings](mapping::InstructionMapping)
//! is computed by the [`resolver`], the cheapest one is picked by the
//! [`selector`] and the instruction is then rewritten to match: values are
//! assigned banks, copies are inserted for operands living in the wrong bank,
//! and 64-bit operations which the vector unit can't perform directly are
//! broken down into 32-bit halves.
//!
//! # Usage
//!
//! The program is described by a type implementing the [`Function`] trait.
//! See the [`function`] module documentation for details. Bank selection is
//! invoked by creating a [`RegBankSelect`] and calling [`RegBankSelect::run`]
//! with the [`BANK_CATALOG`] describing the target.
//!
//! # Reusing allocations
//!
//! [`RegBankSelect`] keeps its temporary allocations between calls to
//! [`RegBankSelect::run`] so that processing many functions doesn't require
//! repeated calls to the memory allocator.
//!
//! # Validation
//!
//! It is recommended to check inputs with
//! [`debug_utils::validate_function`] while developing a client of this
//! crate, and to check the result with
//! [`debug_utils::check_bank_assignment`]. Invalid inputs may cause bank
//! selection to panic or produce a malformed program.
//!
//! [`BANK_CATALOG`]: regbank::BANK_CATALOG
//! [`RegBank`]: regbank::RegBank

#![no_std]
#![warn(rust_2018_idioms, missing_docs)]
#![allow(
    clippy::collapsible_if,
    clippy::collapsible_else_if,
    clippy::cast_possible_truncation,
    clippy::too_many_lines,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::doc_markdown
)]
#![warn(
    clippy::explicit_iter_loop,
    clippy::range_plus_one,
    clippy::map_unwrap_or,
    clippy::cloned_instead_of_copied,
    clippy::semicolon_if_nothing_returned,
    clippy::must_use_candidate,
    clippy::uninlined_format_args,
    clippy::ignored_unit_patterns
)]

extern crate alloc;

// The `arbitrary` derive macros expand to paths under `::std`.
#[cfg(feature = "arbitrary")]
extern crate std;

use alloc::vec::Vec;
use core::fmt;

use function::{Function, Inst, Opcode};
use internal::applier::Applier;
use regbank::BankCatalog;

// Even when trace logging is disabled, the trace macro has a significant
// performance cost so it is only compiled in with the `trace-log` feature.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}

// Macro for collecting statistics.
macro_rules! stat {
    ($stats:expr, $field:ident) => {
        $stats.$field += 1
    };
    ($stats:expr, $field:ident, $count:expr) => {
        $stats.$field += $count
    };
}

pub mod analysis;
pub mod debug_utils;
pub mod function;
pub mod mapping;
pub mod regbank;
pub mod resolver;
pub mod selector;

mod internal;

/// Structure holding persistent memory allocations that can be reused across
/// multiple invocations of bank selection.
pub struct RegBankSelect {
    applier: Applier,
    block_insts: Vec<Inst>,
    stats: Stats,
}

impl Default for RegBankSelect {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl RegBankSelect {
    /// Creates a new `RegBankSelect` instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            applier: Applier::new(),
            block_insts: Vec::new(),
            stats: Stats::default(),
        }
    }

    /// Assigns banks to every value in `func`, rewriting instructions as
    /// needed.
    ///
    /// Instructions are processed in program order. Instructions inserted
    /// while rewriting are already legal and are not processed again.
    ///
    /// On error, `func` may have been partially rewritten.
    pub fn run<F: Function>(
        &mut self,
        func: &mut F,
        catalog: &BankCatalog,
        options: &Options,
    ) -> Result<(), RegBankError> {
        trace!("Input function:\n{}", debug_utils::DisplayFunction(&*func));

        self.stats = Stats::default();
        stat!(self.stats, blocks, func.num_blocks());
        stat!(self.stats, input_insts, func.num_insts());
        stat!(self.stats, input_values, func.num_values());
        self.applier.reset();

        // Iterate over a snapshot of each block since the applier inserts and
        // removes instructions.
        let mut block_insts = core::mem::take(&mut self.block_insts);
        let mut result = Ok(());
        'outer: for block in func.blocks() {
            block_insts.clear();
            block_insts.extend_from_slice(func.block_insts(block));
            for &inst in &block_insts {
                if let Err(e) = self.process_inst(func, catalog, inst, options) {
                    result = Err(e);
                    break 'outer;
                }
            }
        }
        self.block_insts = block_insts;
        result?;

        trace!("Output function:\n{}", debug_utils::DisplayFunction(&*func));
        trace!("{}", self.stats);
        Ok(())
    }

    fn process_inst<F: Function>(
        &mut self,
        func: &mut F,
        catalog: &BankCatalog,
        inst: Inst,
        options: &Options,
    ) -> Result<(), RegBankError> {
        stat!(self.stats, processed_insts);
        let candidates = resolver::candidates(&*func, catalog, inst, options.mode);
        trace!(
            "{inst} ({}): canonical {}",
            func.inst_opcode(inst),
            candidates.canonical
        );
        let mapping = selector::select(&*func, catalog, self.applier.splits(), inst, &candidates)?;
        if !core::ptr::eq(mapping, &candidates.canonical) {
            trace!("  selected alternative {mapping}");
            stat!(self.stats, alternatives_selected);
        }
        self.applier.apply(func, inst, mapping, &mut self.stats);
        Ok(())
    }

    /// Returns the statistics collected by the last call to
    /// [`RegBankSelect::run`].
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Controls how much effort is spent choosing between mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Only use the canonical mapping of each instruction.
    ///
    /// This is faster but may insert more copies than necessary.
    Fast,

    /// Consider alternative mappings and pick the cheapest one, taking the
    /// cost of copies into account.
    #[default]
    Greedy,
}

/// Configuration options for bank selection.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Options {
    /// How mappings are chosen.
    pub mode: Mode,
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for Mode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        u.choose(&[Self::Fast, Self::Greedy]).copied()
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for Options {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self {
            mode: u.arbitrary()?,
        })
    }
}

/// Error returned by bank selection when an instruction can't be mapped to
/// any bank combination supported by the target.
///
/// This does not cover errors returned by the function validator. If invalid
/// inputs are given then bank selection may panic.
#[derive(Debug)]
#[non_exhaustive]
pub enum RegBankError {
    /// No legal mapping exists for an instruction.
    ///
    /// This happens for opcodes and intrinsics that the target doesn't
    /// support, and when operands have been placed in banks from which they
    /// can't be copied to where the instruction needs them.
    InvalidMapping {
        /// The instruction which couldn't be mapped.
        inst: Inst,

        /// Opcode of the instruction.
        opcode: Opcode,
    },
}

impl fmt::Display for RegBankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegBankError::InvalidMapping { inst, opcode } => {
                write!(f, "no legal register bank mapping for {inst} ({opcode})")
            }
        }
    }
}

impl core::error::Error for RegBankError {}

/// Statistics collected by bank selection.
///
/// This is an opaque type since the set of statistics may vary between
/// different versions of this crate, even across minor versions.
///
/// The only supported operations on this type are:
/// * Default initialization
/// * Printing with `Debug` or `Display`
#[derive(Debug, Default, Clone)]
pub struct Stats {
    // Stats from input function.
    blocks: usize,
    input_insts: usize,
    input_values: usize,

    // Stats from mapping selection.
    processed_insts: usize,
    alternatives_selected: usize,

    // Stats from rewriting.
    repair_copies: usize,
    split_insts: usize,
    unmerges: usize,
    merges: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:#?}")
    }
}
