//! Range-check builtin
//!
//! Every cell must hold an integer in `[0, 2^(16 * n_parts))`. The check runs
//! as a validation rule, so an out-of-range write fails immediately.
//!
//! The prover decomposes each value into `n_parts` 16-bit parts; the smallest
//! and largest part bound the shared range-check pool.

use super::{hex, BuiltinCore, BuiltinRunner};
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use crate::segments::MemorySegmentManager;
use crate::validated_memory::ValidatedMemory;
use cvm_spec::layout::RangeCheckInstanceDef;
use cvm_spec::{MaybeRelocatable, Relocatable};
use num_bigint::BigUint;
use num_traits::One;
use serde_json::{json, Value};
use std::any::Any;

const NAME: &str = "range_check";

/// Bits per range-check part
pub const INNER_RC_BOUND_SHIFT: u32 = 16;

#[derive(Debug, Clone)]
pub struct RangeCheckBuiltin {
    core: BuiltinCore,
    n_parts: u32,
    bound: BigUint,
}

impl RangeCheckBuiltin {
    pub fn new(def: &RangeCheckInstanceDef, included: bool) -> Self {
        Self {
            core: BuiltinCore::new(NAME, included, Some(def.ratio), 1, 1),
            n_parts: def.n_parts,
            bound: BigUint::one() << (INNER_RC_BOUND_SHIFT * def.n_parts),
        }
    }

    pub fn bound(&self) -> &BigUint {
        &self.bound
    }

    pub fn n_parts(&self) -> u32 {
        self.n_parts
    }
}

impl BuiltinRunner for RangeCheckBuiltin {
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

    fn add_validation_rules(&self, memory: &mut ValidatedMemory) {
        let bound = self.bound.clone();
        let base = self.core.base;
        let rule = move |memory: &Memory, address: Relocatable| -> Result<Vec<Relocatable>> {
            let index = address.offset - base.offset;
            match memory.get_rel(address) {
                Some(MaybeRelocatable::Int(value)) if *value.value() < bound => Ok(vec![address]),
                Some(MaybeRelocatable::Int(value)) => Err(RuntimeError::Validation {
                    address,
                    reason: format!(
                        "Value {value}, in range check builtin {index}, is out of range [0, {bound})"
                    ),
                }),
                Some(other) => Err(RuntimeError::Validation {
                    address,
                    reason: format!(
                        "Range-check builtin: Expected value at address {address} to be an integer. \
                         Got: {other}"
                    ),
                }),
                None => Err(RuntimeError::UnknownMemory { address: address.into() }),
            }
        };
        memory.add_validation_rule(base.segment_index, Box::new(rule));
    }

    fn get_used_perm_range_check_units(&self, segments: &MemorySegmentManager) -> usize {
        self.get_used_cells(segments) * self.n_parts as usize
    }

    fn get_range_check_usage(&self, memory: &Memory) -> Option<(usize, usize)> {
        let n_bytes = (INNER_RC_BOUND_SHIFT / 8 * self.n_parts) as usize;
        let mut usage: Option<(usize, usize)> = None;
        for (_, value) in memory.segment_cells(self.core.base.segment_index) {
            let Some(bytes) = value.get_int().and_then(|v| v.to_bytes_le(n_bytes)) else {
                continue;
            };
            for part in bytes.chunks_exact(2) {
                let part = u16::from_le_bytes([part[0], part[1]]) as usize;
                usage = Some(match usage {
                    Some((min, max)) => (min.min(part), max.max(part)),
                    None => (part, part),
                });
            }
        }
        usage
    }

    fn air_private_input(&self, memory: &Memory) -> Vec<Value> {
        memory
            .segment_cells(self.core.base.segment_index)
            .filter_map(|(address, value)| {
                let value = value.get_int()?;
                Some(json!({ "index": self.core.instance_index(address), "value": hex(value) }))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvm_spec::Felt;

    fn setup(n_parts: u32) -> (RangeCheckBuiltin, MemorySegmentManager) {
        let mut segments = MemorySegmentManager::new();
        segments.add(None);
        let def = RangeCheckInstanceDef { ratio: 8, n_parts };
        let mut builtin = RangeCheckBuiltin::new(&def, true);
        builtin.initialize_segments(&mut segments);
        builtin.add_validation_rules(&mut segments.memory);
        (builtin, segments)
    }

    #[test]
    fn test_bound() {
        let (builtin, _) = setup(8);
        assert_eq!(*builtin.bound(), BigUint::one() << 128u32);
    }

    #[test]
    fn test_values_below_bound_pass() {
        let (builtin, mut segments) = setup(1);
        let base = builtin.base();
        segments.load_data(base, &[0u64.into(), 65535u64.into()]).unwrap();
        assert!(segments.memory.is_validated(&base));
        assert!(segments.memory.is_validated(&(base + 1usize)));
    }

    #[test]
    fn test_value_at_bound_fails() {
        let (builtin, mut segments) = setup(1);
        let base = builtin.base();
        let err = segments.load_data(base + 3usize, &[65536u64.into()]).unwrap_err();
        match err {
            RuntimeError::Validation { address, reason } => {
                assert_eq!(address, base + 3usize);
                assert_eq!(
                    reason,
                    "Value 65536, in range check builtin 3, is out of range [0, 65536)"
                );
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_negative_value_fails() {
        // -1 is P - 1 in the field
        let (builtin, mut segments) = setup(8);
        let minus_one = MaybeRelocatable::Int(-Felt::one());
        assert!(segments.load_data(builtin.base(), &[minus_one]).is_err());
    }

    #[test]
    fn test_relocatable_value_fails() {
        let (builtin, mut segments) = setup(8);
        let err = segments.load_data(builtin.base(), &[Relocatable::new(0, 0).into()]).unwrap_err();
        assert!(err.to_string().contains("to be an integer"));
    }

    #[test]
    fn test_range_check_usage() {
        let (builtin, mut segments) = setup(2);
        assert_eq!(builtin.get_range_check_usage(segments.memory()), None);
        // 0x0003_0010 splits into parts 0x0010 and 0x0003
        segments.load_data(builtin.base(), &[0x0003_0010u64.into(), 0xffffu64.into()]).unwrap();
        assert_eq!(builtin.get_range_check_usage(segments.memory()), Some((0, 0xffff)));
        assert_eq!(builtin.get_used_perm_range_check_units(&segments), 4);
    }

    #[test]
    fn test_air_private_input() {
        let (builtin, mut segments) = setup(8);
        segments.load_data(builtin.base(), &[7u64.into(), 300u64.into()]).unwrap();
        assert_eq!(
            builtin.air_private_input(segments.memory()),
            vec![json!({ "index": 0, "value": "0x7" }), json!({ "index": 1, "value": "0x12c" })]
        );
    }
}
