//! # CVM value model
//!
//! Values and addresses of a VM whose execution is later re-expressed as
//! algebraic constraints.
//!
//! ## Key Features
//! - 252-bit prime field (P = 2^251 + 17 * 2^192 + 1)
//! - Relocatable addresses: `(segment, offset)` pairs placed only after the run
//! - Fixed-width wire encoding shared by addresses and values
//! - Layouts describing the available builtin coprocessors

pub mod field;
pub mod relocatable;
pub mod encoding;
pub mod layout;
pub mod error;

pub use field::{Felt, PRIME};
pub use relocatable::{MaybeRelocatable, Relocatable};
pub use layout::{BuiltinDef, Layout, LayoutError};
pub use error::ValueError;

/// First address of the relocated memory; address 0 is never used
pub const FIRST_MEMORY_ADDR: u64 = 1;

/// Width of an encoded address
pub const ADDR_SIZE_IN_BYTES: usize = 8;

/// Width of an encoded field element
pub const FIELD_BYTES: usize = 32;

/// Bits reserved for the segment index in the relocatable encoding
pub const SEGMENT_BITS: u32 = 16;

/// Bits reserved for the offset in the relocatable encoding
pub const OFFSET_BITS: u32 = 47;
