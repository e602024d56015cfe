//! Memory segment manager
//!
//! Segments are allocated during the run, finalized once their size is known,
//! and then placed one after another in the final linear address space.

use crate::error::{Result, RuntimeError};
use crate::memory::{relocate_value, Memory};
use crate::validated_memory::ValidatedMemory;
use cvm_spec::{Felt, MaybeRelocatable, Relocatable, FIRST_MEMORY_ADDR};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// A structured call argument, flattened into memory by [`MemorySegmentManager::gen_arg`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CairoArg {
    Int(BigInt),
    Value(MaybeRelocatable),
    Array(Vec<CairoArg>),
}

impl From<i64> for CairoArg {
    fn from(value: i64) -> Self {
        CairoArg::Int(BigInt::from(value))
    }
}

impl From<BigInt> for CairoArg {
    fn from(value: BigInt) -> Self {
        CairoArg::Int(value)
    }
}

impl From<Felt> for CairoArg {
    fn from(value: Felt) -> Self {
        CairoArg::Value(value.into())
    }
}

impl From<Relocatable> for CairoArg {
    fn from(value: Relocatable) -> Self {
        CairoArg::Value(value.into())
    }
}

impl From<MaybeRelocatable> for CairoArg {
    fn from(value: MaybeRelocatable) -> Self {
        CairoArg::Value(value)
    }
}

impl<T: Into<CairoArg>> From<Vec<T>> for CairoArg {
    fn from(values: Vec<T>) -> Self {
        CairoArg::Array(values.into_iter().map(Into::into).collect())
    }
}

/// A cell of public memory after relocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMemoryEntry {
    pub address: u64,
    pub value: Felt,
    pub page: usize,
}

#[derive(Debug, Default)]
pub struct MemorySegmentManager {
    pub memory: ValidatedMemory,
    n_segments: u32,
    segment_sizes: BTreeMap<u32, usize>,
    public_memory_offsets: BTreeMap<u32, Vec<(usize, usize)>>,
}

impl MemorySegmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(memory: ValidatedMemory) -> Self {
        Self { memory, ..Self::default() }
    }

    pub fn n_segments(&self) -> u32 {
        self.n_segments
    }

    /// Allocate the next segment. A given size finalizes it immediately.
    pub fn add(&mut self, size: Option<usize>) -> Relocatable {
        let segment_index = self.n_segments;
        self.n_segments += 1;
        if let Some(size) = size {
            self.finalize(segment_index, Some(size), Vec::new());
        }
        debug!(segment_index, ?size, "allocated segment");
        Relocatable::new(segment_index, 0)
    }

    /// Record a segment's final size and its `(offset, page_id)` public memory cells
    pub fn finalize(
        &mut self,
        segment_index: u32,
        size: Option<usize>,
        public_memory: Vec<(usize, usize)>,
    ) {
        if let Some(size) = size {
            self.segment_sizes.insert(segment_index, size);
        }
        debug!(segment_index, ?size, public_cells = public_memory.len(), "finalized segment");
        self.public_memory_offsets.insert(segment_index, public_memory);
    }

    pub fn is_finalized(&self, segment_index: u32) -> bool {
        self.segment_sizes.contains_key(&segment_index)
    }

    /// Give every unfinalized segment its effective size (highest written offset + 1)
    pub fn finalize_all_by_effective_size(&mut self) {
        for segment_index in 0..self.n_segments {
            if !self.segment_sizes.contains_key(&segment_index) {
                let size = self.get_segment_used_size(segment_index);
                self.segment_sizes.insert(segment_index, size);
                self.public_memory_offsets.entry(segment_index).or_default();
            }
        }
    }

    pub fn get_segment_used_size(&self, segment_index: u32) -> usize {
        self.memory.memory().segment_used_size(segment_index)
    }

    /// Finalized size, or the used size for segments not finalized yet
    pub fn get_segment_size(&self, segment_index: u32) -> usize {
        self.segment_sizes
            .get(&segment_index)
            .copied()
            .unwrap_or_else(|| self.get_segment_used_size(segment_index))
    }

    /// Place every segment after the previous one, starting at `FIRST_MEMORY_ADDR`
    pub fn relocate_segments(&self) -> Result<BTreeMap<u32, u64>> {
        let mut current_addr = FIRST_MEMORY_ADDR;
        let mut offsets = BTreeMap::new();
        for segment_index in 0..self.n_segments {
            let size = *self
                .segment_sizes
                .get(&segment_index)
                .ok_or(RuntimeError::SegmentNotFinalized { segment: segment_index })?;
            let used = self.get_segment_used_size(segment_index);
            if used > size {
                return Err(RuntimeError::SegmentExceededSize {
                    segment: segment_index,
                    used,
                    size,
                });
            }
            offsets.insert(segment_index, current_addr);
            current_addr += size as u64;
        }
        info!(
            n_segments = self.n_segments,
            total_size = current_addr - FIRST_MEMORY_ADDR,
            "relocated segments"
        );
        Ok(offsets)
    }

    /// `(final_address, page_id)` for every public memory cell, in segment order
    pub fn get_public_memory_addresses(
        &self,
        segment_offsets: &BTreeMap<u32, u64>,
    ) -> Result<Vec<(u64, usize)>> {
        let mut addresses = Vec::new();
        for segment_index in 0..self.n_segments {
            let Some(public_memory) = self.public_memory_offsets.get(&segment_index) else {
                continue;
            };
            let base = segment_offsets
                .get(&segment_index)
                .ok_or(RuntimeError::UnknownSegment { segment: segment_index })?;
            addresses
                .extend(public_memory.iter().map(|(offset, page)| (base + *offset as u64, *page)));
        }
        Ok(addresses)
    }

    /// Public memory cells with their relocated values
    pub fn get_public_memory(
        &self,
        segment_offsets: &BTreeMap<u32, u64>,
    ) -> Result<Vec<PublicMemoryEntry>> {
        let mut entries = Vec::new();
        for segment_index in 0..self.n_segments {
            let Some(public_memory) = self.public_memory_offsets.get(&segment_index) else {
                continue;
            };
            let base = segment_offsets
                .get(&segment_index)
                .ok_or(RuntimeError::UnknownSegment { segment: segment_index })?;
            for (offset, page) in public_memory {
                let address = Relocatable::new(segment_index, *offset as i64);
                let value = self.memory.memory().get_value(&address.into())?;
                let Some(value) = relocate_value(&value, segment_offsets)?.get_int().cloned() else {
                    return Err(RuntimeError::Other(format!(
                        "Public memory cell {address} was not relocated"
                    )));
                };
                entries.push(PublicMemoryEntry {
                    address: base + *offset as u64,
                    value,
                    page: *page,
                });
            }
        }
        Ok(entries)
    }

    /// Flatten an argument into memory: integers are reduced into the field,
    /// arrays are written into a fresh segment and replaced by a pointer to it
    pub fn gen_arg(&mut self, arg: &CairoArg) -> Result<MaybeRelocatable> {
        match arg {
            CairoArg::Int(value) => Ok(MaybeRelocatable::Int(Felt::from(value.clone()))),
            CairoArg::Value(value) => Ok(value.clone()),
            CairoArg::Array(items) => {
                let base = self.add(None);
                self.write_arg(base, items)?;
                Ok(base.into())
            }
        }
    }

    /// Write a sequence of arguments starting at `ptr`; returns the end pointer
    pub fn write_arg(&mut self, ptr: Relocatable, args: &[CairoArg]) -> Result<Relocatable> {
        let values = args.iter().map(|arg| self.gen_arg(arg)).collect::<Result<Vec<_>>>()?;
        self.load_data(ptr, &values)
    }

    /// Write consecutive values starting at `ptr`; returns the end pointer
    pub fn load_data(
        &mut self,
        ptr: Relocatable,
        data: &[MaybeRelocatable],
    ) -> Result<Relocatable> {
        for (i, value) in data.iter().enumerate() {
            self.memory.insert((ptr + i).into(), value.clone())?;
        }
        Ok(ptr + data.len())
    }

    /// Relocatable values must point into an allocated segment
    pub fn is_valid_memory_value(&self, value: &MaybeRelocatable) -> bool {
        match value {
            MaybeRelocatable::Int(_) => true,
            MaybeRelocatable::RelocatableValue(rel) => rel.segment_index < self.n_segments,
        }
    }

    /// Unwritten cells inside the used range of every segment not in `excluded`
    pub fn get_memory_holes(&self, excluded: &HashSet<u32>) -> usize {
        let memory = self.memory.memory();
        (0..self.n_segments)
            .filter(|segment_index| !excluded.contains(segment_index))
            .map(|segment_index| {
                let used = memory.segment_used_size(segment_index);
                used - memory.segment_cells(segment_index).count()
            })
            .sum()
    }

    pub fn memory(&self) -> &Memory {
        self.memory.memory()
    }
}
