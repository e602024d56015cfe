//! Keccak builtin
//!
//! Instances hold the 1600-bit keccak state twice: eight 200-bit input cells
//! followed by eight output cells. Outputs are keccak-f[1600] of the input
//! state, read as little-endian bytes.

use super::{complete_instances, hex, read_inputs, BuiltinCore, BuiltinRunner};
use crate::crypto::keccak_f1600_bytes;
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use cvm_spec::layout::KeccakInstanceDef;
use cvm_spec::{Felt, MaybeRelocatable, Relocatable};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::debug;

const NAME: &str = "keccak";
const STATE_BYTES: usize = 200;

#[derive(Debug)]
pub struct KeccakBuiltin {
    core: BuiltinCore,
    /// Bit width of each state cell
    state_rep: Vec<u32>,
    cache: RefCell<HashMap<Relocatable, MaybeRelocatable>>,
}

impl KeccakBuiltin {
    pub fn new(def: &KeccakInstanceDef, included: bool) -> Self {
        let n_input_cells = def.state_rep.len();
        Self {
            core: BuiltinCore::new(
                NAME,
                included,
                Some(def.ratio),
                2 * n_input_cells,
                n_input_cells,
            )
            .with_instances_per_component(def.instances_per_component as usize),
            state_rep: def.state_rep.clone(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Pack the input cells into the little-endian state, each cell taking its own width
    fn pack_state(&self, start: Relocatable, inputs: &[Felt]) -> Result<[u8; STATE_BYTES]> {
        let mut state = [0u8; STATE_BYTES];
        let mut bit_offset = 0usize;
        for (i, (value, width)) in inputs.iter().zip(&self.state_rep).enumerate() {
            if value.bits() > *width as u64 {
                return Err(RuntimeError::Builtin {
                    builtin: NAME,
                    reason: format!(
                        "Expected integer at address {} to be smaller than 2^{width}. Got: {value}.",
                        start + i
                    ),
                });
            }
            for bit in 0..*width as u64 {
                if value.value().bit(bit) {
                    let position = bit_offset + bit as usize;
                    state[position / 8] |= 1 << (position % 8);
                }
            }
            bit_offset += *width as usize;
        }
        Ok(state)
    }

    /// Split the output state back into cells of the same widths
    fn unpack_state(&self, state: &[u8; STATE_BYTES]) -> Vec<Felt> {
        let mut bit_offset = 0usize;
        self.state_rep
            .iter()
            .map(|width| {
                let mut value = num_bigint::BigUint::default();
                for bit in 0..*width as u64 {
                    let position = bit_offset + bit as usize;
                    if state[position / 8] >> (position % 8) & 1 == 1 {
                        value.set_bit(bit, true);
                    }
                }
                bit_offset += *width as usize;
                Felt::new(value)
            })
            .collect()
    }
}

impl BuiltinRunner for KeccakBuiltin {
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
        let n_inputs = self.core.n_input_cells;
        if self.core.cell_index(address) < n_inputs {
            return Ok(None);
        }
        if let Some(value) = self.cache.borrow().get(&address) {
            return Ok(Some(value.clone()));
        }

        let start = self.core.instance_start(address);
        let Some(inputs) = read_inputs(NAME, memory, start, n_inputs)? else {
            return Ok(None);
        };
        let output = keccak_f1600_bytes(&self.pack_state(start, &inputs)?);
        debug!(%start, "deduced keccak instance");

        let mut cache = self.cache.borrow_mut();
        for (i, value) in self.unpack_state(&output).into_iter().enumerate() {
            cache.insert(start + (n_inputs + i), MaybeRelocatable::Int(value));
        }
        Ok(cache.get(&address).cloned())
    }

    /// Diluted cells used by one instance, independent of the pool's spacing
    fn get_used_diluted_check_units(&self, _spacing: u32, n_bits: u32) -> usize {
        262_144 / n_bits as usize
    }

    fn air_private_input(&self, memory: &Memory) -> Vec<Value> {
        complete_instances(&self.core, memory)
            .into_iter()
            .map(|(index, inputs)| {
                let mut record = Map::new();
                record.insert("index".to_string(), json!(index));
                for (i, value) in inputs.iter().enumerate() {
                    record.insert(format!("input_s{i}"), json!(hex(value)));
                }
                Value::Object(record)
            })
            .collect()
    }
}
