//! Runner context
//!
//! Owns everything one run touches: the layout, the segments with their
//! validated memory, and the builtins. The interpreter drives it through a
//! fixed lifecycle:
//!
//! 1. [`Runner::initialize_segments`], [`Runner::load_program`],
//!    [`Runner::initialize_stack`], [`Runner::initialize_builtins_memory`]
//! 2. [`Runner::get`] / [`Runner::insert`] while stepping
//! 3. [`Runner::read_return_values`], [`Runner::end_run`],
//!    [`Runner::finalize_segments`], [`Runner::relocate`]

use crate::archive::{ExecutionResources, RunArchive, RunMetadata, SegmentInfo};
use crate::builtins::{
    BitwiseBuiltin, BuiltinRunner, EcOpBuiltin, HashBuiltin, KeccakBuiltin, OutputBuiltin,
    PoseidonBuiltin, RangeCheckBuiltin, SignatureBuiltin,
};
use crate::crypto::{PairHasher, Permutation, SignatureVerifier, StarkEcdsa};
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use crate::segments::{CairoArg, MemorySegmentManager, PublicMemoryEntry};
use cvm_spec::{BuiltinDef, Layout, MaybeRelocatable, Relocatable, FIELD_BYTES};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Cryptographic functions the builtins need from the embedder
#[derive(Clone)]
pub struct Primitives {
    pub pedersen: Option<Rc<dyn PairHasher>>,
    pub poseidon: Option<Rc<dyn Permutation>>,
    pub signature: Rc<dyn SignatureVerifier>,
}

impl Primitives {
    pub fn with_pedersen(mut self, hasher: Rc<dyn PairHasher>) -> Self {
        self.pedersen = Some(hasher);
        self
    }

    pub fn with_poseidon(mut self, permutation: Rc<dyn Permutation>) -> Self {
        self.poseidon = Some(permutation);
        self
    }

    pub fn with_signature(mut self, verifier: Rc<dyn SignatureVerifier>) -> Self {
        self.signature = verifier;
        self
    }
}

impl Default for Primitives {
    fn default() -> Self {
        Self { pedersen: None, poseidon: None, signature: Rc::new(StarkEcdsa) }
    }
}

impl std::fmt::Debug for Primitives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Primitives")
            .field("pedersen", &self.pedersen.is_some())
            .field("poseidon", &self.poseidon.is_some())
            .finish()
    }
}

/// Memory after relocation, with the public memory the prover commits to
#[derive(Debug, Clone)]
pub struct RelocatedRun {
    pub segment_offsets: BTreeMap<u32, u64>,
    pub memory: Memory,
    pub public_memory: Vec<PublicMemoryEntry>,
}

pub struct Runner {
    layout: Layout,
    pub segments: MemorySegmentManager,
    builtins: Vec<Box<dyn BuiltinRunner>>,
    program_base: Option<Relocatable>,
    execution_base: Option<Relocatable>,
    program_len: usize,
    /// Execution segment offsets that hold the initial stack
    execution_public_memory: Vec<usize>,
}

fn missing_primitive(builtin: &'static str) -> RuntimeError {
    RuntimeError::Builtin {
        builtin,
        reason: "no hash function supplied for this builtin".to_string(),
    }
}

impl Runner {
    /// Build a runner for `layout`. Every layout builtin gets a runner; those
    /// named in `program_builtins` are included in the run.
    pub fn new(
        layout: Layout,
        program_builtins: &[String],
        primitives: Primitives,
    ) -> Result<Self> {
        layout.validate()?;
        layout.check_program_builtins(program_builtins)?;

        let mut builtins: Vec<Box<dyn BuiltinRunner>> = Vec::with_capacity(layout.builtins.len());
        for def in &layout.builtins {
            let included = program_builtins.iter().any(|name| name == def.name());
            let builtin: Box<dyn BuiltinRunner> = match def {
                BuiltinDef::Output => Box::new(OutputBuiltin::new(included)),
                BuiltinDef::Pedersen(def) => {
                    let hasher =
                        primitives.pedersen.clone().ok_or_else(|| missing_primitive("pedersen"))?;
                    Box::new(HashBuiltin::new(def, included, hasher))
                }
                BuiltinDef::RangeCheck(def) => Box::new(RangeCheckBuiltin::new(def, included)),
                BuiltinDef::Ecdsa(def) => {
                    Box::new(SignatureBuiltin::new(def, included, Rc::clone(&primitives.signature)))
                }
                BuiltinDef::Bitwise(def) => Box::new(BitwiseBuiltin::new(def, included)),
                BuiltinDef::EcOp(def) => Box::new(EcOpBuiltin::new(def, included)),
                BuiltinDef::Keccak(def) => Box::new(KeccakBuiltin::new(def, included)),
                BuiltinDef::Poseidon(def) => {
                    let permutation =
                        primitives.poseidon.clone().ok_or_else(|| missing_primitive("poseidon"))?;
                    Box::new(PoseidonBuiltin::new(def, included, permutation)?)
                }
            };
            builtins.push(builtin);
        }
        info!(%layout, ?program_builtins, "created runner");

        Ok(Self {
            layout,
            segments: MemorySegmentManager::new(),
            builtins,
            program_base: None,
            execution_base: None,
            program_len: 0,
            execution_public_memory: Vec::new(),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn program_base(&self) -> Option<Relocatable> {
        self.program_base
    }

    pub fn execution_base(&self) -> Option<Relocatable> {
        self.execution_base
    }

    pub fn program_len(&self) -> usize {
        self.program_len
    }

    pub fn builtins(&self) -> &[Box<dyn BuiltinRunner>] {
        &self.builtins
    }

    pub fn builtin(&self, name: &str) -> Option<&dyn BuiltinRunner> {
        self.builtins.iter().find(|builtin| builtin.name() == name).map(|builtin| builtin.as_ref())
    }

    /// The builtin of concrete type `T`, for hint-driven APIs such as output pages or signatures
    pub fn builtin_mut<T: BuiltinRunner>(&mut self) -> Option<&mut T> {
        self.builtins.iter_mut().find_map(|builtin| builtin.as_any_mut().downcast_mut::<T>())
    }

    fn bases(&self) -> Result<(Relocatable, Relocatable)> {
        match (self.program_base, self.execution_base) {
            (Some(program), Some(execution)) => Ok((program, execution)),
            _ => Err(RuntimeError::Other("Runner segments are not initialized".to_string())),
        }
    }

    /// Program segment, execution segment, then one segment per builtin
    pub fn initialize_segments(&mut self) {
        self.program_base = Some(self.segments.add(None));
        self.execution_base = Some(self.segments.add(None));
        for builtin in &mut self.builtins {
            builtin.initialize_segments(&mut self.segments);
        }
        debug!(n_segments = self.segments.n_segments(), "initialized segments");
    }

    pub fn load_program(&mut self, data: &[MaybeRelocatable]) -> Result<Relocatable> {
        let (program_base, _) = self.bases()?;
        let end = self.segments.load_data(program_base, data)?;
        self.program_len = data.len();
        Ok(end)
    }

    /// Write the builtin bases followed by `args` at the start of the
    /// execution segment. Returns the pointer past them.
    pub fn initialize_stack(&mut self, args: &[CairoArg]) -> Result<Relocatable> {
        let (_, execution_base) = self.bases()?;
        let mut stack: Vec<MaybeRelocatable> =
            self.builtins.iter().flat_map(|builtin| builtin.initial_stack()).collect();
        for arg in args {
            stack.push(self.segments.gen_arg(arg)?);
        }
        self.execution_public_memory = (0..stack.len()).collect();
        self.segments.load_data(execution_base, &stack)
    }

    /// Install the builtins' validation rules and check what is already written
    pub fn initialize_builtins_memory(&mut self) -> Result<()> {
        for builtin in &self.builtins {
            builtin.add_validation_rules(&mut self.segments.memory);
        }
        self.segments.memory.validate_existing_memory()
    }

    fn builtin_for(&self, address: Relocatable) -> Option<&dyn BuiltinRunner> {
        self.execution_base?;
        self.builtins
            .iter()
            .find(|builtin| builtin.core().owns(address))
            .map(|builtin| builtin.as_ref())
    }

    /// Read a cell, deducing it through its builtin when it is missing.
    /// A deduced value is written back through validated memory.
    pub fn get(&mut self, address: Relocatable) -> Result<MaybeRelocatable> {
        if let Some(value) = self.segments.memory().get_rel(address) {
            return Ok(value.clone());
        }
        let deduced = match self.builtin_for(address) {
            Some(builtin) => builtin.deduce_memory_cell(address, self.segments.memory())?,
            None => None,
        };
        let value = deduced.ok_or(RuntimeError::UnknownMemory { address: address.into() })?;
        self.segments.memory.insert(address.into(), value.clone())?;
        Ok(value)
    }

    pub fn insert(&mut self, address: MaybeRelocatable, value: MaybeRelocatable) -> Result<()> {
        self.segments.memory.insert(address, value)
    }

    /// Every written builtin cell must agree with what its builtin deduces
    pub fn verify_auto_deductions(&self) -> Result<()> {
        if self.execution_base.is_none() {
            return Ok(());
        }
        let memory = self.segments.memory();
        for builtin in &self.builtins {
            for (address, current) in memory.segment_cells(builtin.base().segment_index) {
                if let Some(deduced) = builtin.deduce_memory_cell(address, memory)? {
                    if deduced != *current {
                        return Err(RuntimeError::InconsistentAutoDeduction {
                            builtin: builtin.name(),
                            address,
                            current: current.clone(),
                            deduced,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Consume the builtins' stop pointers, last builtin first, from the
    /// return values ending at `pointer`
    pub fn read_return_values(&mut self, pointer: Relocatable) -> Result<Relocatable> {
        let mut pointer = pointer;
        for builtin in self.builtins.iter_mut().rev() {
            pointer = builtin.final_stack(&self.segments, pointer)?;
        }
        Ok(pointer)
    }

    /// Check deductions and freeze memory
    pub fn end_run(&mut self) -> Result<()> {
        self.verify_auto_deductions()?;
        self.segments.memory.freeze();
        info!(cells = self.segments.memory().len(), "run ended");
        Ok(())
    }

    /// Fix every segment's size and public memory
    pub fn finalize_segments(&mut self) -> Result<()> {
        let (program_base, execution_base) = self.bases()?;
        self.segments.finalize(
            program_base.segment_index,
            Some(self.program_len),
            (0..self.program_len).map(|offset| (offset, 0)).collect(),
        );
        self.segments.finalize(
            execution_base.segment_index,
            None,
            self.execution_public_memory.iter().map(|&offset| (offset, 0)).collect(),
        );
        for builtin in &mut self.builtins {
            builtin.finalize_segments(&mut self.segments)?;
        }
        self.segments.finalize_all_by_effective_size();
        info!(n_segments = self.segments.n_segments(), "finalized segments");
        Ok(())
    }

    pub fn relocate(&self) -> Result<RelocatedRun> {
        let segment_offsets = self.segments.relocate_segments()?;
        let memory = self.segments.memory().relocate(&segment_offsets)?;
        let public_memory = self.segments.get_public_memory(&segment_offsets)?;
        Ok(RelocatedRun { segment_offsets, memory, public_memory })
    }

    /// Builtin cells, range-check units and diluted units must fit what `n_steps` pays for
    pub fn check_used_cells(&self, n_steps: usize) -> Result<()> {
        for builtin in self.builtins.iter().filter(|builtin| builtin.included()) {
            let used = builtin.get_used_cells(&self.segments);
            let allocated = builtin.get_allocated_memory_units(&self.segments, n_steps)?;
            if used > allocated {
                return Err(RuntimeError::BuiltinCellsExceeded {
                    builtin: builtin.name(),
                    used,
                    allocated,
                });
            }
        }
        self.check_range_check_usage(n_steps)?;
        self.check_diluted_check_usage(n_steps)
    }

    fn check_range_check_usage(&self, n_steps: usize) -> Result<()> {
        let memory = self.segments.memory();
        let Some((rc_min, rc_max)) = self
            .builtins
            .iter()
            .filter_map(|builtin| builtin.get_range_check_usage(memory))
            .reduce(|(min_a, max_a), (min_b, max_b)| (min_a.min(min_b), max_a.max(max_b)))
        else {
            return Ok(());
        };
        let used_by_builtins: usize = self
            .builtins
            .iter()
            .map(|builtin| builtin.get_used_perm_range_check_units(&self.segments))
            .sum();
        // Three units per step belong to the instruction offsets
        let available = (self.layout.rc_units as usize).saturating_sub(3) * n_steps;
        let used = used_by_builtins + (rc_max - rc_min);
        if used > available {
            return Err(RuntimeError::InsufficientAllocatedCells {
                resource: "range_check",
                used,
                available,
            });
        }
        Ok(())
    }

    fn check_diluted_check_usage(&self, n_steps: usize) -> Result<()> {
        let Some(pool) = self.layout.diluted_pool else {
            return Ok(());
        };
        let used: usize = self
            .builtins
            .iter()
            .filter_map(|builtin| {
                let ratio = builtin.core().ratio? as usize;
                let per_instance = builtin.get_used_diluted_check_units(pool.spacing, pool.n_bits);
                Some(per_instance * (n_steps / ratio))
            })
            .sum();
        let available = pool.units_per_step as usize * n_steps;
        if used > available {
            return Err(RuntimeError::InsufficientAllocatedCells {
                resource: "diluted",
                used,
                available,
            });
        }
        Ok(())
    }

    pub fn get_execution_resources(&self, n_steps: usize) -> ExecutionResources {
        let builtin_segments: HashSet<u32> =
            self.builtins.iter().map(|builtin| builtin.base().segment_index).collect();
        ExecutionResources {
            n_steps,
            n_memory_holes: self.segments.get_memory_holes(&builtin_segments),
            builtin_instance_counter: self
                .builtins
                .iter()
                .filter(|builtin| builtin.included())
                .map(|builtin| {
                    (builtin.name().to_string(), builtin.get_used_instances(&self.segments))
                })
                .collect(),
        }
    }

    /// Segment index and size (up to the stop pointer) of every included builtin
    pub fn get_builtin_segments_info(&self) -> Result<BTreeMap<String, SegmentInfo>> {
        self.builtins
            .iter()
            .filter(|builtin| builtin.included())
            .map(|builtin| -> Result<(String, SegmentInfo)> {
                let (base, stop_ptr) = builtin.get_memory_segment_addresses();
                let stop_ptr = stop_ptr.ok_or_else(|| RuntimeError::Builtin {
                    builtin: builtin.name(),
                    reason: "Stop pointer was not set".to_string(),
                })?;
                let size = stop_ptr.sub_rel(&base)? as usize;
                Ok((builtin.name().to_string(), SegmentInfo { index: base.segment_index, size }))
            })
            .collect()
    }

    pub fn air_private_input(&self) -> BTreeMap<String, Vec<Value>> {
        let memory = self.segments.memory();
        self.builtins
            .iter()
            .map(|builtin| (builtin.name().to_string(), builtin.air_private_input(memory)))
            .collect()
    }

    pub fn get_additional_data(&self) -> BTreeMap<String, Value> {
        self.builtins
            .iter()
            .map(|builtin| (builtin.name().to_string(), builtin.get_additional_data()))
            .collect()
    }

    /// Merge additional data from another run. Untrusted data is only taken
    /// over where the builtin can check it again.
    pub fn extend_additional_data(
        &mut self,
        data: &BTreeMap<String, Value>,
        trusted: bool,
    ) -> Result<()> {
        for (name, value) in data {
            match self.builtins.iter_mut().find(|builtin| builtin.name() == name.as_str()) {
                Some(builtin) => builtin.extend_additional_data(value, trusted)?,
                None => warn!(builtin = %name, "no builtin for additional data"),
            }
        }
        info!(builtins = data.len(), trusted, "merged additional data");
        Ok(())
    }

    pub fn archive(&self, n_steps: usize) -> Result<RunArchive> {
        let (program_base, execution_base) = self.bases()?;
        let metadata = RunMetadata {
            layout: self.layout.name.clone(),
            field_bytes: FIELD_BYTES,
            program_segment: SegmentInfo {
                index: program_base.segment_index,
                size: self.program_len,
            },
            execution_segment: SegmentInfo {
                index: execution_base.segment_index,
                size: self.segments.get_segment_size(execution_base.segment_index),
            },
            builtin_segments: self.get_builtin_segments_info()?,
        };
        Ok(RunArchive {
            metadata,
            memory: self.segments.memory().serialize(FIELD_BYTES)?,
            additional_data: serde_json::to_string(&self.get_additional_data())?,
            execution_resources: self.get_execution_resources(n_steps),
        })
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let builtins: Vec<_> = self.builtins.iter().map(|builtin| builtin.name()).collect();
        f.debug_struct("Runner")
            .field("layout", &self.layout.name)
            .field("segments", &self.segments)
            .field("builtins", &builtins)
            .field("program_base", &self.program_base)
            .field("execution_base", &self.execution_base)
            .finish()
    }
}
