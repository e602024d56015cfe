//! Bitwise builtin
//!
//! Instances are `[x, y, x & y, x ^ y, x | y]`; both inputs must fit in
//! `total_n_bits` bits.

use super::{complete_instances, hex, read_inputs, BuiltinCore, BuiltinRunner};
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use cvm_spec::layout::BitwiseInstanceDef;
use cvm_spec::{Felt, MaybeRelocatable, Relocatable};
use serde_json::{json, Value};
use std::any::Any;
use tracing::debug;

const NAME: &str = "bitwise";
const CELLS_PER_INSTANCE: usize = 5;
const INPUT_CELLS: usize = 2;

#[derive(Debug, Clone)]
pub struct BitwiseBuiltin {
    core: BuiltinCore,
    total_n_bits: u32,
}

impl BitwiseBuiltin {
    pub fn new(def: &BitwiseInstanceDef, included: bool) -> Self {
        Self {
            core: BuiltinCore::new(
                NAME,
                included,
                Some(def.ratio),
                CELLS_PER_INSTANCE,
                INPUT_CELLS,
            ),
            total_n_bits: def.total_n_bits,
        }
    }
}

impl BuiltinRunner for BitwiseBuiltin {
    fn core(&self) -> &BuiltinCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BuiltinCore {
        &mut self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn deduce_memory_cell(
        &self,
        address: Relocatable,
        memory: &Memory,
    ) -> Result<Option<MaybeRelocatable>> {
        let index = self.core.cell_index(address);
        if index < INPUT_CELLS {
            return Ok(None);
        }
        let x_addr = self.core.instance_start(address);
        let Some(inputs) = read_inputs(NAME, memory, x_addr, INPUT_CELLS)? else {
            return Ok(None);
        };
        for (i, value) in inputs.iter().enumerate() {
            if value.bits() > self.total_n_bits as u64 {
                return Err(RuntimeError::Builtin {
                    builtin: NAME,
                    reason: format!(
                        "Expected integer at address {} to be smaller than 2^{}. Got: {value}.",
                        x_addr + i,
                        self.total_n_bits
                    ),
                });
            }
        }

        let (x, y) = (inputs[0].value(), inputs[1].value());
        let result = match index {
            2 => x & y,
            3 => x ^ y,
            _ => x | y,
        };
        debug!(%address, "deduced bitwise cell");
        Ok(Some(MaybeRelocatable::Int(Felt::new(result))))
    }

    /// Diluted cells used by one instance
    fn get_used_diluted_check_units(&self, spacing: u32, n_bits: u32) -> usize {
        let total_n_bits = self.total_n_bits as u64;
        let (spacing, n_bits) = (spacing as u64, n_bits as u64);
        let partition: Vec<u64> = (0..total_n_bits)
            .step_by((spacing * n_bits) as usize)
            .flat_map(|i| (0..spacing).map(move |j| i + j))
            .collect();
        let num_trimmed = partition
            .iter()
            .filter(|&&x| x + spacing * (n_bits - 1) + 1 > total_n_bits)
            .count();
        4 * partition.len() + num_trimmed
    }

    fn air_private_input(&self, memory: &Memory) -> Vec<Value> {
        complete_instances(&self.core, memory)
            .into_iter()
            .map(|(index, inputs)| {
                json!({ "index": index, "x": hex(&inputs[0]), "y": hex(&inputs[1]) })
            })
            .collect()
    }
}
