//! Poseidon builtin
//!
//! Instances are `[s0, s1, s2, s0', s1', s2']`, the outputs being the
//! permuted state. The permutation comes from the embedder.

use super::{complete_instances, hex, read_inputs, BuiltinCore, BuiltinRunner};
use crate::crypto::Permutation;
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use cvm_spec::layout::PoseidonInstanceDef;
use cvm_spec::{MaybeRelocatable, Relocatable};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

const NAME: &str = "poseidon";
const STATE_SIZE: usize = 3;

pub struct PoseidonBuiltin {
    core: BuiltinCore,
    permutation: Rc<dyn Permutation>,
    cache: RefCell<HashMap<Relocatable, MaybeRelocatable>>,
}

impl PoseidonBuiltin {
    pub fn new(
        def: &PoseidonInstanceDef,
        included: bool,
        permutation: Rc<dyn Permutation>,
    ) -> Result<Self> {
        if permutation.width() != STATE_SIZE {
            return Err(RuntimeError::Builtin {
                builtin: NAME,
                reason: format!(
                    "Permutation width must be {STATE_SIZE}, got {}",
                    permutation.width()
                ),
            });
        }
        Ok(Self {
            core: BuiltinCore::new(NAME, included, Some(def.ratio), 2 * STATE_SIZE, STATE_SIZE),
            permutation,
            cache: RefCell::new(HashMap::new()),
        })
    }
}

impl std::fmt::Debug for PoseidonBuiltin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseidonBuiltin")
            .field("core", &self.core)
            .field("cache", &self.cache)
            .finish()
    }
}

impl BuiltinRunner for PoseidonBuiltin {
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
        if self.core.cell_index(address) < STATE_SIZE {
            return Ok(None);
        }
        if let Some(value) = self.cache.borrow().get(&address) {
            return Ok(Some(value.clone()));
        }

        let start = self.core.instance_start(address);
        let Some(mut state) = read_inputs(NAME, memory, start, STATE_SIZE)? else {
            return Ok(None);
        };
        self.permutation.permute(&mut state);
        debug!(%start, "deduced poseidon instance");

        let mut cache = self.cache.borrow_mut();
        for (i, value) in state.into_iter().enumerate() {
            cache.insert(start + (STATE_SIZE + i), MaybeRelocatable::Int(value));
        }
        Ok(cache.get(&address).cloned())
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
