//! # CVM Runtime
//!
//! Memory and builtin coprocessors for a constraint-system VM.
//!
//! Addresses stay symbolic (segment, offset) while a run executes and are
//! mapped to one linear address space once every segment has a final size.
//!
//! ## Features
//!
//! - **Write-once memory**: rewriting a cell with a different value is an error
//! - **Validated memory**: per-segment rules run on every write
//! - **Segments**: allocation, finalization, relocation, public memory
//! - **Builtins**: output, pedersen, range check, ECDSA, bitwise, EC op, keccak, poseidon
//! - **Security verifier**: rejects runs the constraint system cannot enforce
//! - **Archives**: a finished run packaged with `bincode`
//!
//! ## Example
//!
//! ```rust,no_run
//! use cvm_runtime::{verify_secure_runner, Primitives, Runner};
//! use cvm_spec::Layout;
//!
//! let mut runner = Runner::new(Layout::plain(), &[], Primitives::default()).unwrap();
//! runner.initialize_segments();
//! runner.load_program(&[1u64.into(), 2u64.into()]).unwrap();
//! runner.initialize_builtins_memory().unwrap();
//! runner.end_run().unwrap();
//! runner.finalize_segments().unwrap();
//! verify_secure_runner(&runner, true, None).unwrap();
//! let relocated = runner.relocate().unwrap();
//! println!("{} public cells", relocated.public_memory.len());
//! ```

pub mod error;
pub mod memory;
pub mod validated_memory;
pub mod segments;
pub mod crypto;
pub mod builtins;
pub mod runner;
pub mod security;
pub mod archive;

pub use archive::{ExecutionResources, RunArchive, RunMetadata, SegmentInfo};
pub use builtins::{BuiltinCore, BuiltinRunner};
pub use crypto::{PairHasher, Permutation, SignatureVerifier, StarkEcdsa};
pub use error::{Result, RuntimeError, SecurityError};
pub use memory::Memory;
pub use runner::{Primitives, RelocatedRun, Runner};
pub use security::verify_secure_runner;
pub use segments::{CairoArg, MemorySegmentManager, PublicMemoryEntry};
pub use validated_memory::{ValidatedMemory, ValidationRule};
