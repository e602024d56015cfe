//! # Error Types for the CVM value model

use crate::layout::LayoutError;
use crate::relocatable::{MaybeRelocatable, Relocatable};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    // Address algebra errors
    #[error("Cannot subtract relocatable values from different segments: {lhs} - {rhs}")]
    CrossSegmentSubtraction { lhs: Relocatable, rhs: Relocatable },

    #[error("Offset overflow: {base} + {delta} does not fit in a segment offset")]
    OffsetOverflow { base: Relocatable, delta: String },

    #[error("Invalid operation: {lhs} {op} {rhs}")]
    InvalidOperation {
        lhs: MaybeRelocatable,
        op: &'static str,
        rhs: MaybeRelocatable,
    },

    // Encoding errors
    #[error("Value {value} does not fit in {n_bytes} bytes with the top bit clear")]
    ValueTooLarge { value: String, n_bytes: usize },

    #[error("Segment index {0} does not fit in the encoded segment field")]
    SegmentIndexTooLarge(u32),

    #[error("Offset {0} is out of the encodable range")]
    OffsetOutOfRange(i64),

    #[error("Decoded integer {0} is not below the field prime")]
    NotAFieldElement(String),

    #[error("Relocatable encoding {0} sets bits outside the segment and offset fields")]
    NonCanonicalRelocatable(String),

    #[error("Encoding width of {0} bytes cannot hold a relocatable value")]
    EncodingWidthTooSmall(usize),

    #[error("Truncated input: expected {expected} bytes, found {found} bytes")]
    Truncated { expected: usize, found: usize },

    // Configuration errors
    #[error("Invalid layout: {0}")]
    InvalidLayout(#[from] LayoutError),
}

impl ValueError {
    /// Encoding errors are reported when persisting memory, not while running
    pub fn is_encoding_error(&self) -> bool {
        matches!(
            self,
            ValueError::ValueTooLarge { .. }
                | ValueError::SegmentIndexTooLarge(_)
                | ValueError::OffsetOutOfRange(_)
                | ValueError::EncodingWidthTooSmall(_)
                | ValueError::NotAFieldElement(_)
                | ValueError::NonCanonicalRelocatable(_)
                | ValueError::Truncated { .. }
        )
    }
}
