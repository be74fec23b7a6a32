//! Register banks and the costs of moving values between them.
//!
//! The target has four classes of storage which are modelled as
//! [`RegBank`]s:
//!
//! * [`RegBank::Scalar`] holds values which are identical across all lanes of
//!   a wave. It can hold values of any width.
//! * [`RegBank::Vector`] holds one value per lane. It can hold values of any
//!   width.
//! * [`RegBank::UniformFlag`] is a single-bit condition flag written by scalar
//!   compares and read by scalar selects and branches.
//! * [`RegBank::LaneMask`] is a single-bit-per-lane condition mask written by
//!   vector compares and read by vector selects and branches.
//!
//! Moving values between banks is described by the [`BankCatalog`], which is
//! a constant table of transfer rules. Some transfers are impossible (there is
//! no way to turn a per-lane value into a uniform one with a plain copy) and
//! these are reported as [`Cost::INFEASIBLE`].

use core::fmt;

/// A class of storage which a value can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum RegBank {
    /// Uniform scalar registers.
    Scalar,

    /// Per-lane vector registers.
    Vector,

    /// Single-bit uniform condition flag.
    UniformFlag,

    /// Single-bit per-lane condition mask.
    LaneMask,
}

/// How the contents of a bank relate to the lanes of a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BankKind {
    /// One value shared by all lanes.
    Uniform,

    /// One value per lane.
    PerLane,
}

/// Set of value widths which a bank can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SizeDomain {
    /// Values of any width.
    Any,

    /// Only single-bit values.
    OneBit,
}

impl SizeDomain {
    /// Returns whether a value of `width` bits fits in this domain.
    #[inline]
    #[must_use]
    pub fn contains(self, width: u32) -> bool {
        match self {
            SizeDomain::Any => width != 0,
            SizeDomain::OneBit => width == 1,
        }
    }
}

impl RegBank {
    /// All register banks, in declaration order.
    pub const ALL: [RegBank; 4] = [
        RegBank::Scalar,
        RegBank::Vector,
        RegBank::UniformFlag,
        RegBank::LaneMask,
    ];

    /// Returns whether the bank holds uniform or per-lane values.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> BankKind {
        match self {
            RegBank::Scalar | RegBank::UniformFlag => BankKind::Uniform,
            RegBank::Vector | RegBank::LaneMask => BankKind::PerLane,
        }
    }

    /// Returns the set of widths that can be held in this bank.
    #[inline]
    #[must_use]
    pub const fn size_domain(self) -> SizeDomain {
        match self {
            RegBank::Scalar | RegBank::Vector => SizeDomain::Any,
            RegBank::UniformFlag | RegBank::LaneMask => SizeDomain::OneBit,
        }
    }

    /// Returns whether this is one of the single-bit condition banks.
    #[inline]
    #[must_use]
    pub const fn is_flag(self) -> bool {
        matches!(self, RegBank::UniformFlag | RegBank::LaneMask)
    }

    /// Returns whether values in this bank may differ between lanes.
    #[inline]
    #[must_use]
    pub const fn is_per_lane(self) -> bool {
        matches!(self.kind(), BankKind::PerLane)
    }
}

impl fmt::Display for RegBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegBank::Scalar => "sgpr",
            RegBank::Vector => "vgpr",
            RegBank::UniformFlag => "scc",
            RegBank::LaneMask => "vcc",
        };
        f.write_str(name)
    }
}

/// Abstract cost of an operation, measured in instructions.
///
/// Costs saturate at [`Cost::INFEASIBLE`] which marks something that cannot
/// be done at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cost(u32);

impl Cost {
    /// Free operation.
    pub const ZERO: Cost = Cost(0);

    /// Marker for an operation that cannot be performed.
    pub const INFEASIBLE: Cost = Cost(u32::MAX);

    /// Creates a new finite cost.
    #[inline]
    #[must_use]
    pub const fn new(cost: u32) -> Self {
        debug_assert!(cost != u32::MAX);
        Self(cost)
    }

    /// Returns the raw cost, or `None` if infeasible.
    #[inline]
    #[must_use]
    pub const fn get(self) -> Option<u32> {
        if self.0 == u32::MAX {
            None
        } else {
            Some(self.0)
        }
    }

    /// Returns whether the cost is finite.
    #[inline]
    #[must_use]
    pub const fn is_feasible(self) -> bool {
        self.0 != u32::MAX
    }
}

impl core::ops::Add for Cost {
    type Output = Cost;

    #[inline]
    fn add(self, rhs: Cost) -> Cost {
        if !self.is_feasible() || !rhs.is_feasible() {
            return Cost::INFEASIBLE;
        }
        Cost(self.0.saturating_add(rhs.0).min(u32::MAX - 1))
    }
}

impl core::ops::AddAssign for Cost {
    #[inline]
    fn add_assign(&mut self, rhs: Cost) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(cost) => write!(f, "{cost}"),
            None => f.write_str("infeasible"),
        }
    }
}

/// Which value widths a [`TransferRule`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleWidth {
    /// The rule applies at every width.
    Any,

    /// The rule only applies to values of exactly this many bits.
    Exactly(u32),
}

impl RuleWidth {
    #[inline]
    const fn matches(self, width: u32) -> bool {
        match self {
            RuleWidth::Any => true,
            RuleWidth::Exactly(w) => w == width,
        }
    }
}

/// A transfer from one bank into another which cannot be done with a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRule {
    /// Bank being copied into.
    pub dst: RegBank,

    /// Bank being copied from.
    pub src: RegBank,

    /// Widths this rule applies to.
    pub width: RuleWidth,
}

/// Number of bits moved by a single register copy.
const REG_BITS: u32 = 32;

const INFEASIBLE_TRANSFERS: [TransferRule; 4] = [
    // Per-lane values can never become uniform through a copy.
    TransferRule {
        dst: RegBank::Scalar,
        src: RegBank::Vector,
        width: RuleWidth::Any,
    },
    TransferRule {
        dst: RegBank::UniformFlag,
        src: RegBank::Scalar,
        width: RuleWidth::Exactly(1),
    },
    TransferRule {
        dst: RegBank::UniformFlag,
        src: RegBank::Vector,
        width: RuleWidth::Exactly(1),
    },
    TransferRule {
        dst: RegBank::UniformFlag,
        src: RegBank::LaneMask,
        width: RuleWidth::Any,
    },
];

/// Constant description of the register banks of the target and the cost of
/// transferring values between them.
///
/// A single instance is available as [`BANK_CATALOG`]. It is safe to share
/// between threads since it is never modified.
#[derive(Debug, Clone, Copy)]
pub struct BankCatalog {
    infeasible: &'static [TransferRule],
}

/// The catalog describing the target's register banks.
pub static BANK_CATALOG: BankCatalog = BankCatalog::new();

impl Default for BankCatalog {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl BankCatalog {
    /// Creates the catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            infeasible: &INFEASIBLE_TRANSFERS,
        }
    }

    /// Returns the rules describing transfers that are impossible.
    #[inline]
    #[must_use]
    pub fn infeasible_transfers(&self) -> &'static [TransferRule] {
        self.infeasible
    }

    /// Returns the cost of copying a value of `width` bits from `src` into
    /// `dst`.
    ///
    /// Copying within a bank is free. Otherwise each 32-bit register moved
    /// costs one instruction.
    #[must_use]
    pub fn copy_cost(&self, dst: RegBank, src: RegBank, width: u32) -> Cost {
        if dst == src {
            return Cost::ZERO;
        }
        let forbidden = self
            .infeasible
            .iter()
            .any(|rule| rule.dst == dst && rule.src == src && rule.width.matches(width));
        if forbidden {
            return Cost::INFEASIBLE;
        }
        Cost::new(width.div_ceil(REG_BITS).max(1))
    }

    /// Returns whether a value of `width` bits can be copied from `src` into
    /// `dst`.
    #[inline]
    #[must_use]
    pub fn can_copy(&self, dst: RegBank, src: RegBank, width: u32) -> bool {
        self.copy_cost(dst, src, width).is_feasible()
    }
}
