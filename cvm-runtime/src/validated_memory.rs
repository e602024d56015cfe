//! Validated memory
//!
//! Wraps [`Memory`] and runs per-segment validation rules on every write into
//! a relocatable address. Each rule reports the addresses it has validated so
//! that a cell is never validated twice.

use crate::error::Result;
use crate::memory::Memory;
use cvm_spec::{MaybeRelocatable, Relocatable};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A write-time check scoped to one segment.
///
/// Returns the addresses that are now validated. A rule may return nothing
/// when it is still waiting for sibling cells.
pub trait ValidationRule {
    fn validate(&self, memory: &Memory, address: Relocatable) -> Result<Vec<Relocatable>>;
}

impl<F> ValidationRule for F
where
    F: Fn(&Memory, Relocatable) -> Result<Vec<Relocatable>>,
{
    fn validate(&self, memory: &Memory, address: Relocatable) -> Result<Vec<Relocatable>> {
        self(memory, address)
    }
}

#[derive(Default)]
pub struct ValidatedMemory {
    memory: Memory,
    validation_rules: HashMap<u32, Vec<Box<dyn ValidationRule>>>,
    validated_addresses: HashSet<Relocatable>,
}

impl ValidatedMemory {
    pub fn new(memory: Memory) -> Self {
        Self { memory, validation_rules: HashMap::new(), validated_addresses: HashSet::new() }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn into_memory(self) -> Memory {
        self.memory
    }

    pub fn get(&self, address: &MaybeRelocatable) -> Option<&MaybeRelocatable> {
        self.memory.get(address)
    }

    pub fn add_validation_rule(&mut self, segment_index: u32, rule: Box<dyn ValidationRule>) {
        debug!(segment_index, "registering validation rule");
        self.validation_rules.entry(segment_index).or_default().push(rule);
    }

    /// Write through to memory, then validate the cell
    pub fn insert(&mut self, address: MaybeRelocatable, value: MaybeRelocatable) -> Result<()> {
        self.memory.insert(address.clone(), value)?;
        if let MaybeRelocatable::RelocatableValue(rel) = address {
            self.validate_memory_cell(rel)?;
        }
        Ok(())
    }

    fn validate_memory_cell(&mut self, address: Relocatable) -> Result<()> {
        if self.validated_addresses.contains(&address) {
            return Ok(());
        }
        let Some(rules) = self.validation_rules.get(&address.segment_index) else {
            return Ok(());
        };
        for rule in rules {
            let validated = rule.validate(&self.memory, address)?;
            self.validated_addresses.extend(validated);
        }
        Ok(())
    }

    /// Run the validation rules over every cell already in memory
    pub fn validate_existing_memory(&mut self) -> Result<()> {
        let addresses: Vec<Relocatable> = self
            .memory
            .iter()
            .filter_map(|(address, _)| address.get_relocatable())
            .filter(|rel| self.validation_rules.contains_key(&rel.segment_index))
            .collect();
        for address in addresses {
            self.validate_memory_cell(address)?;
        }
        Ok(())
    }

    pub fn validated_addresses(&self) -> &HashSet<Relocatable> {
        &self.validated_addresses
    }

    pub fn is_validated(&self, address: &Relocatable) -> bool {
        self.validated_addresses.contains(address)
    }

    pub fn freeze(&mut self) {
        self.memory.freeze();
    }
}

impl std::fmt::Debug for ValidatedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedMemory")
            .field("memory", &self.memory)
            .field("rule_segments", &self.validation_rules.keys().collect::<Vec<_>>())
            .field("validated_addresses", &self.validated_addresses.len())
            .finish()
    }
}
