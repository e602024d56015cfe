//! Memory subsystem
//!
//! A write-once map from address to value. Before relocation addresses are
//! relocatable; after relocation they are plain integers.

use crate::error::{Result, RuntimeError};
use cvm_spec::encoding::{from_bytes, to_bytes};
use cvm_spec::{Felt, MaybeRelocatable, Relocatable, ValueError, ADDR_SIZE_IN_BYTES};
use std::collections::btree_map;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    data: BTreeMap<MaybeRelocatable, MaybeRelocatable>,
    frozen: bool,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, address: &MaybeRelocatable) -> bool {
        self.data.contains_key(address)
    }

    pub fn get(&self, address: &MaybeRelocatable) -> Option<&MaybeRelocatable> {
        self.data.get(address)
    }

    /// Read a relocatable address
    pub fn get_rel(&self, address: Relocatable) -> Option<&MaybeRelocatable> {
        self.data.get(&MaybeRelocatable::RelocatableValue(address))
    }

    /// Read a cell that must already hold a value
    pub fn get_value(&self, address: &MaybeRelocatable) -> Result<MaybeRelocatable> {
        self.data
            .get(address)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownMemory { address: address.clone() })
    }

    /// Read a cell that must hold a field element
    pub fn get_felt(&self, address: Relocatable) -> Result<Felt> {
        match self.get_rel(address) {
            Some(MaybeRelocatable::Int(value)) => Ok(value.clone()),
            Some(other) => Err(RuntimeError::Other(format!(
                "Expected integer at address {address}, found {other}"
            ))),
            None => Err(RuntimeError::UnknownMemory { address: address.into() }),
        }
    }

    /// Write a value. Writing the same value twice is a no-op; writing a
    /// different value fails.
    pub fn insert(&mut self, address: MaybeRelocatable, value: MaybeRelocatable) -> Result<()> {
        if let MaybeRelocatable::RelocatableValue(rel) = &address {
            if rel.offset < 0 {
                return Err(RuntimeError::InvalidAddress { address: *rel });
            }
        }

        match self.data.entry(address) {
            btree_map::Entry::Occupied(entry) => {
                if *entry.get() != value {
                    return Err(RuntimeError::InconsistentMemory {
                        address: entry.key().clone(),
                        old: entry.get().clone(),
                        new: value,
                    });
                }
                Ok(())
            }
            btree_map::Entry::Vacant(entry) => {
                if self.frozen {
                    return Err(RuntimeError::FrozenMemory { address: entry.key().clone() });
                }
                entry.insert(value);
                Ok(())
            }
        }
    }

    /// Fetch `size` consecutive cells, failing at the first gap
    pub fn get_range(&self, address: Relocatable, size: usize) -> Result<Vec<MaybeRelocatable>> {
        (0..size)
            .map(|i| self.get_value(&MaybeRelocatable::RelocatableValue(address + i)))
            .collect()
    }

    pub fn get_range_as_felts(&self, address: Relocatable, size: usize) -> Result<Vec<Felt>> {
        (0..size).map(|i| self.get_felt(address + i)).collect()
    }

    /// Highest written offset + 1 in a segment (0 if untouched)
    pub fn segment_used_size(&self, segment_index: u32) -> usize {
        let start = MaybeRelocatable::RelocatableValue(Relocatable::new(segment_index, 0));
        let end = MaybeRelocatable::RelocatableValue(Relocatable::new(segment_index, i64::MAX));
        self.data
            .range(start..=end)
            .next_back()
            .and_then(|(address, _)| address.get_relocatable())
            .and_then(|rel| rel.offset_index())
            .map_or(0, |offset| offset + 1)
    }

    /// Cells of one segment, in offset order
    pub fn segment_cells(
        &self,
        segment_index: u32,
    ) -> impl Iterator<Item = (Relocatable, &MaybeRelocatable)> + '_ {
        let start = MaybeRelocatable::RelocatableValue(Relocatable::new(segment_index, 0));
        let end = MaybeRelocatable::RelocatableValue(Relocatable::new(segment_index, i64::MAX));
        self.data
            .range(start..=end)
            .filter_map(|(address, value)| address.get_relocatable().map(|rel| (rel, value)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MaybeRelocatable, &MaybeRelocatable)> {
        self.data.iter()
    }

    /// After freezing, only idempotent writes are accepted
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Map every relocatable key and value to its final integer address
    pub fn relocate(&self, segment_offsets: &BTreeMap<u32, u64>) -> Result<Memory> {
        let mut relocated = Memory::new();
        for (address, value) in &self.data {
            relocated.insert(
                relocate_value(address, segment_offsets)?,
                relocate_value(value, segment_offsets)?,
            )?;
        }
        Ok(relocated)
    }

    /// Encode as a sequence of (address, value) pairs: 8-byte addresses,
    /// `field_bytes`-wide values, both little-endian.
    pub fn serialize(&self, field_bytes: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.data.len() * (ADDR_SIZE_IN_BYTES + field_bytes));
        for (address, value) in &self.data {
            out.extend(to_bytes(address, ADDR_SIZE_IN_BYTES)?);
            out.extend(to_bytes(value, field_bytes)?);
        }
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8], field_bytes: usize) -> Result<Memory> {
        let pair_size = ADDR_SIZE_IN_BYTES + field_bytes;
        if bytes.len() % pair_size != 0 {
            return Err(ValueError::Truncated {
                expected: bytes.len().div_ceil(pair_size) * pair_size,
                found: bytes.len(),
            }
            .into());
        }

        let mut memory = Memory::new();
        for pair in bytes.chunks_exact(pair_size) {
            let (address, value) = pair.split_at(ADDR_SIZE_IN_BYTES);
            memory.insert(from_bytes(address)?, from_bytes(value)?)?;
        }
        Ok(memory)
    }
}

impl FromIterator<(MaybeRelocatable, MaybeRelocatable)> for Memory {
    /// Collect pairs; later duplicates overwrite earlier ones.
    fn from_iter<I: IntoIterator<Item = (MaybeRelocatable, MaybeRelocatable)>>(iter: I) -> Self {
        Memory { data: iter.into_iter().collect(), frozen: false }
    }
}

/// Map a value through the final segment placement
pub fn relocate_value(
    value: &MaybeRelocatable,
    segment_offsets: &BTreeMap<u32, u64>,
) -> Result<MaybeRelocatable> {
    match value {
        MaybeRelocatable::Int(_) => Ok(value.clone()),
        MaybeRelocatable::RelocatableValue(rel) => {
            let base = segment_offsets
                .get(&rel.segment_index)
                .ok_or(RuntimeError::UnknownSegment { segment: rel.segment_index })?;
            let address = i128::from(*base) + i128::from(rel.offset);
            let address = u64::try_from(address).map_err(|_| {
                RuntimeError::Other(format!("Relocated value {rel} is negative"))
            })?;
            Ok(MaybeRelocatable::from(address))
        }
    }
}
