//! # Relocatable addresses
//!
//! Every memory cell and every address argument is a [`MaybeRelocatable`]:
//! either a plain field element or a [`Relocatable`] reference into a segment
//! whose final position is only fixed once the run has finished.
//!
//! ## Ordering
//!
//! Relocatables compare by `(segment_index, offset)`. Any `Int` sorts below
//! any `RelocatableValue`, so plain values come first in memory scans.

use crate::error::ValueError;
use crate::field::Felt;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Rem, Sub};

/// A symbolic address: an offset into a segment that has not been placed yet.
///
/// The offset may be negative while the value is held in a register or a
/// memory cell; as a memory key it must be non-negative.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relocatable {
    pub segment_index: u32,
    pub offset: i64,
}

impl Relocatable {
    #[inline]
    pub const fn new(segment_index: u32, offset: i64) -> Self {
        Self { segment_index, offset }
    }

    /// Difference of two addresses in the same segment
    pub fn sub_rel(&self, other: &Relocatable) -> Result<i64, ValueError> {
        if self.segment_index != other.segment_index {
            return Err(ValueError::CrossSegmentSubtraction { lhs: *self, rhs: *other });
        }
        Ok(self.offset - other.offset)
    }

    /// Checked offset shift
    pub fn checked_add(&self, delta: i64) -> Result<Relocatable, ValueError> {
        self.offset
            .checked_add(delta)
            .map(|offset| Relocatable::new(self.segment_index, offset))
            .ok_or_else(|| ValueError::OffsetOverflow { base: *self, delta: delta.to_string() })
    }

    /// Shift by a field element read as a signed integer
    pub fn add_felt(&self, delta: &Felt) -> Result<Relocatable, ValueError> {
        let signed = delta.to_signed();
        let overflow = || ValueError::OffsetOverflow { base: *self, delta: signed.to_string() };
        let delta = signed.to_i64().ok_or_else(overflow)?;
        self.checked_add(delta).map_err(|_| overflow())
    }

    /// Offset as an index, for addresses that are known to be valid memory keys
    pub fn offset_index(&self) -> Option<usize> {
        usize::try_from(self.offset).ok()
    }
}

impl Add<i64> for Relocatable {
    type Output = Relocatable;

    #[inline]
    fn add(self, rhs: i64) -> Relocatable {
        Relocatable::new(self.segment_index, self.offset + rhs)
    }
}

impl Add<usize> for Relocatable {
    type Output = Relocatable;

    #[inline]
    fn add(self, rhs: usize) -> Relocatable {
        Relocatable::new(self.segment_index, self.offset + rhs as i64)
    }
}

impl Sub<i64> for Relocatable {
    type Output = Relocatable;

    #[inline]
    fn sub(self, rhs: i64) -> Relocatable {
        Relocatable::new(self.segment_index, self.offset - rhs)
    }
}

impl Sub<usize> for Relocatable {
    type Output = Relocatable;

    #[inline]
    fn sub(self, rhs: usize) -> Relocatable {
        Relocatable::new(self.segment_index, self.offset - rhs as i64)
    }
}

/// Offset modulo, used to find a cell's role within a builtin instance
impl Rem<i64> for Relocatable {
    type Output = Relocatable;

    #[inline]
    fn rem(self, rhs: i64) -> Relocatable {
        Relocatable::new(self.segment_index, self.offset.rem_euclid(rhs))
    }
}

impl fmt::Display for Relocatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_index, self.offset)
    }
}

/// The type of every memory cell and every address.
///
/// Variant order matters: the derived `Ord` puts every `Int` before every
/// `RelocatableValue`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MaybeRelocatable {
    Int(Felt),
    RelocatableValue(Relocatable),
}

impl MaybeRelocatable {
    pub fn get_int(&self) -> Option<&Felt> {
        match self {
            MaybeRelocatable::Int(value) => Some(value),
            MaybeRelocatable::RelocatableValue(_) => None,
        }
    }

    pub fn get_relocatable(&self) -> Option<Relocatable> {
        match self {
            MaybeRelocatable::Int(_) => None,
            MaybeRelocatable::RelocatableValue(rel) => Some(*rel),
        }
    }

    #[inline]
    pub fn is_relocatable(&self) -> bool {
        matches!(self, MaybeRelocatable::RelocatableValue(_))
    }

    /// Addition. `Rel + Rel` has no meaning and fails.
    pub fn add(&self, other: &MaybeRelocatable) -> Result<MaybeRelocatable, ValueError> {
        match (self, other) {
            (MaybeRelocatable::Int(a), MaybeRelocatable::Int(b)) => {
                Ok(MaybeRelocatable::Int(a + b))
            }
            (MaybeRelocatable::RelocatableValue(rel), MaybeRelocatable::Int(delta))
            | (MaybeRelocatable::Int(delta), MaybeRelocatable::RelocatableValue(rel)) => {
                Ok(MaybeRelocatable::RelocatableValue(rel.add_felt(delta)?))
            }
            (MaybeRelocatable::RelocatableValue(_), MaybeRelocatable::RelocatableValue(_)) => {
                Err(ValueError::InvalidOperation { lhs: self.clone(), op: "+", rhs: other.clone() })
            }
        }
    }

    /// Subtraction. `Rel - Rel` yields the signed offset difference as a field
    /// element and fails across segments; `Int - Rel` fails.
    pub fn sub(&self, other: &MaybeRelocatable) -> Result<MaybeRelocatable, ValueError> {
        match (self, other) {
            (MaybeRelocatable::Int(a), MaybeRelocatable::Int(b)) => {
                Ok(MaybeRelocatable::Int(a - b))
            }
            (MaybeRelocatable::RelocatableValue(rel), MaybeRelocatable::Int(delta)) => {
                Ok(MaybeRelocatable::RelocatableValue(rel.add_felt(&-delta)?))
            }
            (MaybeRelocatable::RelocatableValue(a), MaybeRelocatable::RelocatableValue(b)) => {
                Ok(MaybeRelocatable::Int(Felt::from(a.sub_rel(b)?)))
            }
            (MaybeRelocatable::Int(_), MaybeRelocatable::RelocatableValue(_)) => {
                Err(ValueError::InvalidOperation { lhs: self.clone(), op: "-", rhs: other.clone() })
            }
        }
    }
}

impl From<Relocatable> for MaybeRelocatable {
    fn from(rel: Relocatable) -> Self {
        MaybeRelocatable::RelocatableValue(rel)
    }
}

impl From<Felt> for MaybeRelocatable {
    fn from(value: Felt) -> Self {
        MaybeRelocatable::Int(value)
    }
}

impl From<u64> for MaybeRelocatable {
    fn from(value: u64) -> Self {
        MaybeRelocatable::Int(Felt::from(value))
    }
}

impl From<i64> for MaybeRelocatable {
    fn from(value: i64) -> Self {
        MaybeRelocatable::Int(Felt::from(value))
    }
}

impl From<BigInt> for MaybeRelocatable {
    fn from(value: BigInt) -> Self {
        MaybeRelocatable::Int(Felt::from(value))
    }
}

impl fmt::Display for MaybeRelocatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeRelocatable::Int(value) => write!(f, "{}", value),
            MaybeRelocatable::RelocatableValue(rel) => write!(f, "{}", rel),
        }
    }
}
