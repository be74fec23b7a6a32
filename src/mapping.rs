//! Descriptions of where the operands of an instruction should live.
//!
//! A [`ValueMapping`] describes how the bits of a single value are laid out
//! across register banks. Most values live entirely in one bank, but a 64-bit
//! value which must be processed by 32-bit vector instructions is broken down
//! into two 32-bit halves.
//!
//! An [`InstructionMapping`] assigns a [`ValueMapping`] to every register
//! operand of an instruction, together with the cost of executing the
//! instruction in that form.

use core::fmt;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::{SmallVec, smallvec};

use crate::function::Value;
use crate::regbank::{Cost, RegBank};

/// Width of a value which is broken down into two halves.
pub const SPLIT_WIDTH: u32 = 64;

/// A contiguous range of bits of a value which is held in a single bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialMapping {
    /// Index of the first bit of this piece.
    pub start: u32,

    /// Number of bits in this piece.
    pub length: u32,

    /// Bank holding this piece.
    pub bank: RegBank,
}

/// Breakdown of a value into pieces, each of which lives in a bank.
///
/// The pieces are ordered from the least significant bits upwards and cover
/// the whole value without gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueMapping {
    pieces: SmallVec<[PartialMapping; 2]>,
}

impl ValueMapping {
    /// Mapping of a whole `size`-bit value into `bank`.
    #[must_use]
    pub fn single(bank: RegBank, size: u32) -> Self {
        Self {
            pieces: smallvec![PartialMapping {
                start: 0,
                length: size,
                bank,
            }],
        }
    }

    /// Mapping of a `size`-bit value into two equal halves in `bank`.
    #[must_use]
    pub fn halves(bank: RegBank, size: u32) -> Self {
        let half = size / 2;
        Self {
            pieces: smallvec![
                PartialMapping {
                    start: 0,
                    length: half,
                    bank,
                },
                PartialMapping {
                    start: half,
                    length: half,
                    bank,
                },
            ],
        }
    }

    /// Mapping of a value into `bank`, broken down into halves when the value
    /// is 64 bits wide and the bank can't operate on 64-bit values directly.
    ///
    /// Only the scalar bank has 64-bit bitwise and select instructions.
    #[must_use]
    pub fn split_unless_scalar(bank: RegBank, size: u32) -> Self {
        if size == SPLIT_WIDTH && bank != RegBank::Scalar {
            Self::halves(bank, size)
        } else {
            Self::single(bank, size)
        }
    }

    /// Builds a mapping from an explicit list of pieces.
    ///
    /// No validation is performed here. Use [`breakdown_cost`] to check
    /// whether a multi-piece mapping has a supported shape.
    #[must_use]
    pub fn from_pieces(pieces: &[PartialMapping]) -> Self {
        Self {
            pieces: pieces.into(),
        }
    }

    /// Pieces of the value, from the lowest bits upwards.
    #[inline]
    #[must_use]
    pub fn pieces(&self) -> &[PartialMapping] {
        &self.pieces
    }

    /// Returns whether the value is broken down into more than one piece.
    #[inline]
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.pieces.len() > 1
    }

    /// Bank of the lowest piece.
    ///
    /// For every mapping produced by this crate all pieces share this bank.
    #[inline]
    #[must_use]
    pub fn bank(&self) -> RegBank {
        self.pieces[0].bank
    }

    /// Total number of bits covered by the mapping.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u32 {
        self.pieces.iter().map(|p| p.length).sum()
    }
}

impl fmt::Display for ValueMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, piece) in self.pieces.iter().enumerate() {
            if i != 0 {
                f.write_str("+")?;
            }
            write!(f, "{}:{}", piece.bank, piece.length)?;
        }
        Ok(())
    }
}

/// Returns the cost of accessing the pieces of a broken-down value.
///
/// The only supported breakdown is a 64-bit value split into two contiguous
/// 32-bit halves in the same bank. Those halves are sub-registers of the full
/// value so accessing them costs a single unit.
///
/// # Panics
///
/// Panics if the mapping has any other shape. Breakdowns are only ever
/// constructed by this crate so another shape indicates a bug.
#[must_use]
pub fn breakdown_cost(mapping: &ValueMapping) -> Cost {
    let pieces = mapping.pieces();
    assert!(
        pieces.len() == 2
            && pieces[0].start == 0
            && pieces[0].length == SPLIT_WIDTH / 2
            && pieces[1].start == SPLIT_WIDTH / 2
            && pieces[1].length == SPLIT_WIDTH / 2
            && pieces[0].bank == pieces[1].bank,
        "unsupported value breakdown: {mapping}"
    );
    Cost::new(1)
}

/// Identifier of an instruction mapping.
///
/// The canonical mapping of an instruction has ID 1 and alternatives are
/// numbered from 1 upwards in the order they are offered.
pub type MappingId = u32;

/// ID reserved for the invalid mapping.
pub const INVALID_MAPPING_ID: MappingId = u32::MAX;

/// Complete description of how an instruction's operands map to banks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionMapping {
    id: MappingId,
    cost: Cost,
    operands: SmallVec<[Option<ValueMapping>; 4]>,
}

impl InstructionMapping {
    /// Creates a new mapping with one entry per instruction operand.
    ///
    /// Non-register operands must have a `None` entry.
    #[must_use]
    pub fn new(id: MappingId, cost: u32, operands: SmallVec<[Option<ValueMapping>; 4]>) -> Self {
        debug_assert!(id != INVALID_MAPPING_ID);
        Self {
            id,
            cost: Cost::new(cost),
            operands,
        }
    }

    /// The mapping which marks an instruction as unsupported.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            id: INVALID_MAPPING_ID,
            cost: Cost::INFEASIBLE,
            operands: SmallVec::new(),
        }
    }

    /// Returns whether the mapping can be applied.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.id != INVALID_MAPPING_ID
    }

    /// Identifier of the mapping.
    #[inline]
    #[must_use]
    pub fn id(&self) -> MappingId {
        self.id
    }

    /// Cost of executing the instruction with this mapping, excluding any
    /// copies needed to move operands into place.
    #[inline]
    #[must_use]
    pub fn cost(&self) -> Cost {
        self.cost
    }

    /// Per-operand mappings, `None` for non-register operands.
    #[inline]
    #[must_use]
    pub fn operands(&self) -> &[Option<ValueMapping>] {
        &self.operands
    }

    /// Mapping of a single operand.
    #[inline]
    #[must_use]
    pub fn operand(&self, idx: usize) -> Option<&ValueMapping> {
        self.operands.get(idx).and_then(Option::as_ref)
    }

    /// Returns whether any operand is broken down into several pieces.
    #[inline]
    #[must_use]
    pub fn has_split_operand(&self) -> bool {
        self.operands.iter().flatten().any(ValueMapping::is_split)
    }
}

impl fmt::Display for InstructionMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("invalid");
        }
        write!(f, "#{} cost({}) [", self.id, self.cost)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            match op {
                Some(mapping) => write!(f, "{mapping}")?,
                None => f.write_str("_")?,
            }
        }
        f.write_str("]")
    }
}

/// The two 32-bit halves that a 64-bit value has been broken down into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitValue {
    /// Low and high halves, in that order.
    pub halves: [Value; 2],

    /// Bank holding both halves.
    pub bank: RegBank,

    /// Whether the original instruction defining the value was replaced by
    /// instructions defining the halves. Such a value no longer has a
    /// definition and must be reassembled before it can be used whole.
    pub replaced: bool,
}

/// Record of the values which have been broken down into halves during bank
/// selection.
///
/// Later instructions that need the halves of a value reuse existing ones
/// instead of decomposing the value again.
#[derive(Debug, Clone, Default)]
pub struct SplitValues {
    map: HashMap<Value, SplitValue, FxBuildHasher>,
}

impl SplitValues {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all recorded splits.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Returns the halves of a value, if it has been split.
    #[inline]
    #[must_use]
    pub fn get(&self, value: Value) -> Option<SplitValue> {
        self.map.get(&value).copied()
    }

    /// Records that `value` has been split.
    pub fn insert(&mut self, value: Value, split: SplitValue) {
        self.map.insert(value, split);
    }

    /// Returns the number of recorded splits.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns whether no value has been split.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
