//! Builtin coprocessors
//!
//! Every builtin owns one segment made of fixed-width instances. The first
//! `n_input_cells` cells of an instance are inputs, the rest are outputs.
//! Builtins take part in a run in two ways:
//!
//! - validation rules, registered on [`ValidatedMemory`], run on every write
//! - [`BuiltinRunner::deduce_memory_cell`] computes a missing output cell on read
//!
//! After the run they report their usage, their private input for the prover
//! and the state that survives merging several runs.

pub mod bitwise;
pub mod ec_op;
pub mod hash;
pub mod keccak;
pub mod output;
pub mod poseidon;
pub mod range_check;
pub mod signature;

pub use bitwise::BitwiseBuiltin;
pub use ec_op::EcOpBuiltin;
pub use hash::HashBuiltin;
pub use keccak::KeccakBuiltin;
pub use output::{OutputBuiltin, PublicMemoryPage};
pub use poseidon::PoseidonBuiltin;
pub use range_check::RangeCheckBuiltin;
pub use signature::SignatureBuiltin;

use crate::error::{Result, RuntimeError, SecurityError};
use crate::memory::Memory;
use crate::segments::MemorySegmentManager;
use crate::validated_memory::ValidatedMemory;
use cvm_spec::{Felt, MaybeRelocatable, Relocatable};
use std::any::Any;
use std::collections::BTreeSet;
use tracing::debug;

/// State shared by every builtin
#[derive(Debug, Clone)]
pub struct BuiltinCore {
    pub name: &'static str,
    /// Whether the program uses this builtin
    pub included: bool,
    /// Steps per instance. `None` for builtins without a fixed ratio.
    pub ratio: Option<u32>,
    /// Instances the prover lays out together; allocation rounds to whole components
    pub instances_per_component: usize,
    pub cells_per_instance: usize,
    pub n_input_cells: usize,
    pub base: Relocatable,
    pub stop_ptr: Option<Relocatable>,
}

impl BuiltinCore {
    pub fn new(
        name: &'static str,
        included: bool,
        ratio: Option<u32>,
        cells_per_instance: usize,
        n_input_cells: usize,
    ) -> Self {
        Self {
            name,
            included,
            ratio,
            instances_per_component: 1,
            cells_per_instance,
            n_input_cells,
            base: Relocatable::new(0, 0),
            stop_ptr: None,
        }
    }

    pub fn with_instances_per_component(mut self, instances_per_component: usize) -> Self {
        self.instances_per_component = instances_per_component;
        self
    }

    /// Position of a cell inside its instance
    pub fn cell_index(&self, address: Relocatable) -> usize {
        (address % self.cells_per_instance as i64).offset as usize
    }

    /// First cell of the instance holding `address`
    pub fn instance_start(&self, address: Relocatable) -> Relocatable {
        address - self.cell_index(address)
    }

    pub fn instance_index(&self, address: Relocatable) -> usize {
        address.offset as usize / self.cells_per_instance
    }

    pub fn owns(&self, address: Relocatable) -> bool {
        address.segment_index == self.base.segment_index
    }
}

/// Common protocol of all builtins
pub trait BuiltinRunner: Any {
    fn core(&self) -> &BuiltinCore;

    fn core_mut(&mut self) -> &mut BuiltinCore;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn name(&self) -> &'static str {
        self.core().name
    }

    fn included(&self) -> bool {
        self.core().included
    }

    fn base(&self) -> Relocatable {
        self.core().base
    }

    fn initialize_segments(&mut self, segments: &mut MemorySegmentManager) {
        let base = segments.add(None);
        debug!(builtin = self.name(), %base, "builtin segment");
        self.core_mut().base = base;
    }

    fn initial_stack(&self) -> Vec<MaybeRelocatable> {
        if self.included() {
            vec![self.base().into()]
        } else {
            Vec::new()
        }
    }

    /// Reads the stop pointer just below `pointer` and returns the pointer past it
    fn final_stack(
        &mut self,
        segments: &MemorySegmentManager,
        pointer: Relocatable,
    ) -> Result<Relocatable> {
        if !self.included() {
            let base = self.base();
            self.core_mut().stop_ptr = Some(base);
            return Ok(pointer);
        }

        let stop_pointer_addr = pointer - 1i64;
        let found = segments.memory().get_value(&stop_pointer_addr.into())?;
        let used = self.get_used_instances(segments) * self.core().cells_per_instance;
        let expected = self.base() + used;
        match found.get_relocatable() {
            Some(stop_ptr) if stop_ptr == expected => {
                self.core_mut().stop_ptr = Some(stop_ptr);
                Ok(stop_pointer_addr)
            }
            _ => Err(RuntimeError::InvalidStopPointer { builtin: self.name(), expected, found }),
        }
    }

    fn add_validation_rules(&self, _memory: &mut ValidatedMemory) {}

    /// Value of a missing cell, if the builtin can compute it.
    /// `Ok(None)` means the inputs are not all there yet.
    fn deduce_memory_cell(
        &self,
        _address: Relocatable,
        _memory: &Memory,
    ) -> Result<Option<MaybeRelocatable>> {
        Ok(None)
    }

    fn get_used_cells(&self, segments: &MemorySegmentManager) -> usize {
        segments.get_segment_used_size(self.base().segment_index)
    }

    fn get_used_instances(&self, segments: &MemorySegmentManager) -> usize {
        self.get_used_cells(segments).div_ceil(self.core().cells_per_instance)
    }

    /// Cells paid for by `n_steps` execution steps. A builtin with a ratio
    /// needs at least one full component.
    fn get_allocated_memory_units(
        &self,
        segments: &MemorySegmentManager,
        n_steps: usize,
    ) -> Result<usize> {
        let core = self.core();
        let Some(ratio) = core.ratio else {
            return Ok(self.get_used_cells(segments));
        };
        let component_steps = ratio as usize * core.instances_per_component;
        if n_steps < component_steps {
            return Err(RuntimeError::InsufficientSteps {
                builtin: core.name,
                min_steps: component_steps,
                n_steps,
            });
        }
        let n_instances = n_steps / component_steps * core.instances_per_component;
        Ok(core.cells_per_instance * n_instances)
    }

    /// Diluted units one instance consumes
    fn get_used_diluted_check_units(&self, _spacing: u32, _n_bits: u32) -> usize {
        0
    }

    /// Range-check units taken from the shared pool
    fn get_used_perm_range_check_units(&self, _segments: &MemorySegmentManager) -> usize {
        0
    }

    /// Smallest and largest 16-bit part checked by this builtin
    fn get_range_check_usage(&self, _memory: &Memory) -> Option<(usize, usize)> {
        None
    }

    /// `(base, stop_ptr)` of the builtin segment
    fn get_memory_segment_addresses(&self) -> (Relocatable, Option<Relocatable>) {
        (self.base(), self.core().stop_ptr)
    }

    /// Per-instance records for the prover, sorted by instance index
    fn air_private_input(&self, _memory: &Memory) -> Vec<serde_json::Value> {
        Vec::new()
    }

    fn get_additional_data(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn extend_additional_data(&mut self, _data: &serde_json::Value, _trusted: bool) -> Result<()> {
        Ok(())
    }

    fn finalize_segments(&mut self, _segments: &mut MemorySegmentManager) -> Result<()> {
        Ok(())
    }

    fn run_security_checks(&self, memory: &Memory) -> std::result::Result<(), SecurityError> {
        check_instances(self, memory)
    }
}

/// Every input cell up to the last touched instance must be present, and
/// every missing output cell must be deducible.
pub fn check_instances<B: BuiltinRunner + ?Sized>(
    builtin: &B,
    memory: &Memory,
) -> std::result::Result<(), SecurityError> {
    let core = builtin.core();
    let cells_per_instance = core.cells_per_instance;
    let fail = |reason: String| SecurityError::BuiltinCheck { builtin: core.name, reason };

    let offsets: BTreeSet<usize> = memory
        .segment_cells(core.base.segment_index)
        .filter_map(|(address, _)| address.offset_index())
        .collect();
    let Some(&max_offset) = offsets.last() else {
        return Ok(());
    };
    let n_instances = max_offset / cells_per_instance + 1;

    for instance in 0..n_instances {
        for cell in 0..core.n_input_cells {
            let offset = instance * cells_per_instance + cell;
            if !offsets.contains(&offset) {
                return Err(fail(format!(
                    "Missing memory cells for builtin {}: {}",
                    core.name,
                    core.base + offset
                )));
            }
        }
    }

    for instance in 0..n_instances {
        for cell in core.n_input_cells..cells_per_instance {
            let offset = instance * cells_per_instance + cell;
            if offsets.contains(&offset) {
                continue;
            }
            let address = core.base + offset;
            builtin
                .deduce_memory_cell(address, memory)
                .map_err(|err| fail(format!("Output cell {address} cannot be deduced: {err}")))?;
        }
    }
    Ok(())
}

/// Input cells of the instance starting at `start`. `Ok(None)` if any is missing.
pub(crate) fn read_inputs(
    builtin: &'static str,
    memory: &Memory,
    start: Relocatable,
    n_inputs: usize,
) -> Result<Option<Vec<Felt>>> {
    let mut values = Vec::with_capacity(n_inputs);
    for i in 0..n_inputs {
        let address = start + i;
        match memory.get_rel(address) {
            None => return Ok(None),
            Some(MaybeRelocatable::Int(value)) => values.push(value.clone()),
            Some(other) => {
                return Err(RuntimeError::Builtin {
                    builtin,
                    reason: format!("Expected integer at address {address}, found {other}"),
                })
            }
        }
    }
    Ok(Some(values))
}

/// Instances whose inputs are all present integers, as `(index, inputs)`
pub(crate) fn complete_instances(core: &BuiltinCore, memory: &Memory) -> Vec<(usize, Vec<Felt>)> {
    let used = memory.segment_used_size(core.base.segment_index);
    (0..used.div_ceil(core.cells_per_instance))
        .filter_map(|index| {
            let start = core.base + index * core.cells_per_instance;
            read_inputs(core.name, memory, start, core.n_input_cells)
                .ok()
                .flatten()
                .map(|inputs| (index, inputs))
        })
        .collect()
}

pub(crate) fn hex(value: &Felt) -> String {
    format!("{value:#x}")
}
