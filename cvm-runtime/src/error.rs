//! Runtime error types for the CVM memory model

use cvm_spec::{LayoutError, MaybeRelocatable, Relocatable, ValueError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    // Memory errors
    #[error("Unknown value for memory cell at address {address}")]
    UnknownMemory { address: MaybeRelocatable },

    #[error("Inconsistent memory assignment at address {address}: {old} != {new}")]
    InconsistentMemory {
        address: MaybeRelocatable,
        old: MaybeRelocatable,
        new: MaybeRelocatable,
    },

    #[error(
        "Inconsistent auto deduction rule at address {address} of builtin {builtin}: \
         {current} != {deduced}"
    )]
    InconsistentAutoDeduction {
        builtin: &'static str,
        address: Relocatable,
        current: MaybeRelocatable,
        deduced: MaybeRelocatable,
    },

    #[error("Invalid memory address {address}: offset must be non-negative")]
    InvalidAddress { address: Relocatable },

    #[error("Memory is frozen and cannot be written: address {address}")]
    FrozenMemory { address: MaybeRelocatable },

    // Builtin errors
    #[error("Validation failed at address {address}: {reason}")]
    Validation { address: Relocatable, reason: String },

    #[error("{builtin} builtin: {reason}")]
    Builtin { builtin: &'static str, reason: String },

    #[error("Invalid stop pointer for {builtin}. Expected: {expected}, found: {found}")]
    InvalidStopPointer {
        builtin: &'static str,
        expected: Relocatable,
        found: MaybeRelocatable,
    },

    #[error("Builtin {builtin} used {used} cells but only {allocated} were allocated")]
    BuiltinCellsExceeded { builtin: &'static str, used: usize, allocated: usize },

    #[error(
        "Number of steps must be at least {min_steps} for the {builtin} builtin, \
         got {n_steps}"
    )]
    InsufficientSteps { builtin: &'static str, min_steps: usize, n_steps: usize },

    #[error("Insufficient allocated {resource} units: used {used}, available {available}")]
    InsufficientAllocatedCells { resource: &'static str, used: usize, available: usize },

    // Segment errors
    #[error("Segment {segment} must be finalized before relocation")]
    SegmentNotFinalized { segment: u32 },

    #[error("Segment {segment} exceeded its allocated size: used {used}, size {size}")]
    SegmentExceededSize { segment: u32, used: usize, size: usize },

    #[error("Unknown segment {segment}")]
    UnknownSegment { segment: u32 },

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Additional data error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Post-run violations of the invariants the constraint system enforces.
///
/// Kept apart from [`RuntimeError`]: a run that fails here may be locally
/// consistent, yet it cannot be proven.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("Accessed address {address} is not relocatable")]
    NonRelocatableAddress { address: MaybeRelocatable },

    #[error("Accessed address {address} has negative offset")]
    NegativeOffset { address: Relocatable },

    #[error("Out of bounds access to program segment at {address} (program length {program_len})")]
    ProgramOutOfBounds { address: Relocatable, program_len: usize },

    #[error("Missing stop pointer for builtin {builtin}")]
    MissingStopPointer { builtin: &'static str },

    #[error("Out of bounds access to builtin segment {builtin} at {address} (segment size {size})")]
    BuiltinOutOfBounds { builtin: &'static str, address: Relocatable, size: usize },

    #[error("Invalid memory value at {address}: {value}")]
    InvalidMemoryValue { address: Relocatable, value: MaybeRelocatable },

    #[error("Security check for builtin {builtin} failed: {reason}")]
    BuiltinCheck { builtin: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
