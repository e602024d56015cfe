//! EC-op builtin
//!
//! Instances are `[p_x, p_y, q_x, q_y, m, r_x, r_y]` with `R = P + m * Q` on
//! the STARK curve. Deduction follows the circuit's double-and-add exactly and
//! fails where the circuit cannot compute.

use super::{complete_instances, hex, read_inputs, BuiltinCore, BuiltinRunner};
use crate::crypto::{ec_op_impl, point_on_curve};
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use cvm_spec::layout::EcOpInstanceDef;
use cvm_spec::{MaybeRelocatable, Relocatable};
use serde_json::{json, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::debug;

const NAME: &str = "ec_op";
const CELLS_PER_INSTANCE: usize = 7;
const INPUT_CELLS: usize = 5;

/// Cell offsets of the two input points
const POINT_INDICES: [(usize, usize); 2] = [(0, 1), (2, 3)];

#[derive(Debug)]
pub struct EcOpBuiltin {
    core: BuiltinCore,
    scalar_height: u32,
    cache: RefCell<HashMap<Relocatable, MaybeRelocatable>>,
}

impl EcOpBuiltin {
    pub fn new(def: &EcOpInstanceDef, included: bool) -> Self {
        Self {
            core: BuiltinCore::new(
                NAME,
                included,
                Some(def.ratio),
                CELLS_PER_INSTANCE,
                INPUT_CELLS,
            ),
            scalar_height: def.scalar_height,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl BuiltinRunner for EcOpBuiltin {
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
        if self.core.cell_index(address) < INPUT_CELLS {
            return Ok(None);
        }
        if let Some(value) = self.cache.borrow().get(&address) {
            return Ok(Some(value.clone()));
        }

        let start = self.core.instance_start(address);
        let Some(inputs) = read_inputs(NAME, memory, start, INPUT_CELLS)? else {
            return Ok(None);
        };
        for (x, y) in POINT_INDICES {
            if !point_on_curve(&inputs[x], &inputs[y]) {
                return Err(RuntimeError::Builtin {
                    builtin: NAME,
                    reason: format!(
                        "Point ({}, {}) at address {} is not on the curve",
                        inputs[x],
                        inputs[y],
                        start + x
                    ),
                });
            }
        }

        let p = (inputs[0].clone(), inputs[1].clone());
        let q = (inputs[2].clone(), inputs[3].clone());
        let (r_x, r_y) = ec_op_impl(&p, &q, &inputs[4], self.scalar_height)
            .map_err(|reason| RuntimeError::Builtin { builtin: NAME, reason })?;
        debug!(%start, "deduced ec_op instance");

        let mut cache = self.cache.borrow_mut();
        cache.insert(start + INPUT_CELLS, MaybeRelocatable::Int(r_x));
        cache.insert(start + (INPUT_CELLS + 1), MaybeRelocatable::Int(r_y));
        Ok(cache.get(&address).cloned())
    }

    fn air_private_input(&self, memory: &Memory) -> Vec<Value> {
        complete_instances(&self.core, memory)
            .into_iter()
            .map(|(index, inputs)| {
                json!({
                    "index": index,
                    "p_x": hex(&inputs[0]),
                    "p_y": hex(&inputs[1]),
                    "q_x": hex(&inputs[2]),
                    "q_y": hex(&inputs[3]),
                    "m": hex(&inputs[4]),
                })
            })
            .collect()
    }
}
