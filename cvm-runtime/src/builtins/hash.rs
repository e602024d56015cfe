//! Pedersen hash builtin
//!
//! Instances are `[x, y, hash(x, y)]`. The hash function itself comes from the
//! embedder through [`PairHasher`].

use super::{complete_instances, hex, read_inputs, BuiltinCore, BuiltinRunner};
use crate::crypto::PairHasher;
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use cvm_spec::layout::PedersenInstanceDef;
use cvm_spec::{MaybeRelocatable, Relocatable};
use serde_json::{json, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use tracing::{debug, warn};

const NAME: &str = "pedersen";
const CELLS_PER_INSTANCE: usize = 3;
const INPUT_CELLS: usize = 2;

pub struct HashBuiltin {
    core: BuiltinCore,
    hasher: Rc<dyn PairHasher>,
    /// Output cells already computed, including those taken over from merged runs
    verified_addresses: RefCell<BTreeSet<Relocatable>>,
    cache: RefCell<HashMap<Relocatable, MaybeRelocatable>>,
}

impl HashBuiltin {
    pub fn new(def: &PedersenInstanceDef, included: bool, hasher: Rc<dyn PairHasher>) -> Self {
        Self {
            core: BuiltinCore::new(
                NAME,
                included,
                Some(def.ratio),
                CELLS_PER_INSTANCE,
                INPUT_CELLS,
            ),
            hasher,
            verified_addresses: RefCell::new(BTreeSet::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn verified_addresses(&self) -> Vec<Relocatable> {
        self.verified_addresses.borrow().iter().copied().collect()
    }
}

impl std::fmt::Debug for HashBuiltin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashBuiltin")
            .field("core", &self.core)
            .field("verified_addresses", &self.verified_addresses.borrow().len())
            .finish()
    }
}

impl BuiltinRunner for HashBuiltin {
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
        if self.core.cell_index(address) != INPUT_CELLS {
            return Ok(None);
        }
        if let Some(value) = self.cache.borrow().get(&address) {
            return Ok(Some(value.clone()));
        }
        if self.verified_addresses.borrow().contains(&address) {
            return Ok(None);
        }

        let start = self.core.instance_start(address);
        let Some(inputs) = read_inputs(NAME, memory, start, INPUT_CELLS)? else {
            return Ok(None);
        };
        let value = MaybeRelocatable::Int(self.hasher.hash(&inputs[0], &inputs[1]));
        debug!(%address, "deduced pedersen hash");
        self.verified_addresses.borrow_mut().insert(address);
        self.cache.borrow_mut().insert(address, value.clone());
        Ok(Some(value))
    }

    fn air_private_input(&self, memory: &Memory) -> Vec<Value> {
        complete_instances(&self.core, memory)
            .into_iter()
            .map(|(index, inputs)| {
                json!({ "index": index, "x": hex(&inputs[0]), "y": hex(&inputs[1]) })
            })
            .collect()
    }

    fn get_additional_data(&self) -> Value {
        let addresses: Vec<Value> = self
            .verified_addresses
            .borrow()
            .iter()
            .map(|address| json!([address.segment_index, address.offset]))
            .collect();
        Value::Array(addresses)
    }

    /// Verified addresses are only taken over from trusted runs
    fn extend_additional_data(&mut self, data: &Value, trusted: bool) -> Result<()> {
        if !trusted {
            warn!(builtin = NAME, "ignoring untrusted additional data");
            return Ok(());
        }
        let addresses: Vec<(u32, i64)> =
            serde_json::from_value(data.clone()).map_err(|err| RuntimeError::Builtin {
                builtin: NAME,
                reason: format!("Malformed additional data: {err}"),
            })?;
        self.verified_addresses.borrow_mut().extend(
            addresses.into_iter().map(|(segment, offset)| Relocatable::new(segment, offset)),
        );
        Ok(())
    }
}
