//! Condition flags and instruction predicates.
//!
//! The same 4-bit mask serves two roles: the CPU's current condition
//! (exactly one of M, Z, P, V after an arithmetic instruction, or ALWAYS at
//! reset) and an instruction's predicate (any combination). An instruction
//! executes when the two masks share a bit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// A condition-code bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CondFlag(u8);

impl CondFlag {
    /// Result was negative ("minus").
    pub const M: CondFlag = CondFlag(1);
    /// Result was zero.
    pub const Z: CondFlag = CondFlag(2);
    /// Result was positive.
    pub const P: CondFlag = CondFlag(4);
    /// Arithmetic fault: overflow or division by zero.
    pub const V: CondFlag = CondFlag(8);
    /// Matches nothing.
    pub const NEVER: CondFlag = CondFlag(0);
    /// Matches every condition.
    pub const ALWAYS: CondFlag = CondFlag(15);

    /// Individual flags in display order.
    pub const ALL: [CondFlag; 4] = [Self::M, Self::Z, Self::P, Self::V];

    /// Build from the low 4 bits of a field value.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        CondFlag((bits & 0xF) as u8)
    }

    /// Raw mask value.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0 as u32
    }

    /// True if no bit is set.
    #[inline]
    pub const fn is_never(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: CondFlag) -> bool {
        self.0 & other.0 == other.0
    }

    /// Classify an arithmetic result by sign.
    pub fn from_sign(value: i32) -> Self {
        match value.signum() {
            -1 => Self::M,
            0 => Self::Z,
            _ => Self::P,
        }
    }

    fn letter(self) -> char {
        match self {
            Self::M => 'M',
            Self::Z => 'Z',
            Self::P => 'P',
            _ => 'V',
        }
    }
}

impl BitAnd for CondFlag {
    type Output = CondFlag;

    fn bitand(self, rhs: CondFlag) -> CondFlag {
        CondFlag(self.0 & rhs.0)
    }
}

impl BitOr for CondFlag {
    type Output = CondFlag;

    fn bitor(self, rhs: CondFlag) -> CondFlag {
        CondFlag(self.0 | rhs.0)
    }
}

impl Default for CondFlag {
    fn default() -> Self {
        Self::ALWAYS
    }
}

impl fmt::Display for CondFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ALWAYS => write!(f, "ALWAYS"),
            Self::NEVER => write!(f, "NEVER"),
            flags => {
                for flag in Self::ALL {
                    if flags.contains(flag) {
                        write!(f, "{}", flag.letter())?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for CondFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CondFlag({})", self)
    }
}
