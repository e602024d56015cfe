//! Run archive
//!
//! Packages a finished run for downstream tooling: segment metadata, the
//! pre-relocation memory in wire form, the builtins' additional data and the
//! execution resources.

use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub index: u32,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub layout: String,
    /// Width of a memory value in the wire form
    pub field_bytes: usize,
    pub program_segment: SegmentInfo,
    pub execution_segment: SegmentInfo,
    pub builtin_segments: BTreeMap<String, SegmentInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResources {
    pub n_steps: usize,
    pub n_memory_holes: usize,
    pub builtin_instance_counter: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArchive {
    pub metadata: RunMetadata,
    /// Memory in wire form, before relocation
    pub memory: Vec<u8>,
    /// Additional data keyed by builtin name, as a JSON document
    pub additional_data: String,
    pub execution_resources: ExecutionResources,
}

fn archive_err(err: bincode::Error) -> RuntimeError {
    RuntimeError::Archive(err.to_string())
}

impl RunArchive {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(archive_err)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(archive_err)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, self).map_err(archive_err)
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        bincode::deserialize_from(reader).map_err(archive_err)
    }

    /// Decode the archived memory
    pub fn memory(&self) -> Result<Memory> {
        Memory::deserialize(&self.memory, self.metadata.field_bytes)
    }

    pub fn additional_data(&self) -> Result<BTreeMap<String, Value>> {
        Ok(serde_json::from_str(&self.additional_data)?)
    }
}
