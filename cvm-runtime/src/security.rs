//! Security verifier
//!
//! A final pass over the pre-relocation memory, run before a run is handed to
//! the prover. It rejects runs that are locally consistent but that the
//! constraint system could not enforce.

use crate::builtins::BuiltinRunner;
use crate::error::SecurityError;
use crate::runner::Runner;
use cvm_spec::MaybeRelocatable;
use std::collections::HashMap;
use tracing::{debug, info};

/// Check every memory cell of a finished run, then each builtin's own checks.
///
/// - every address is relocatable with a non-negative offset
/// - program segment accesses stay below `program_segment_size` (the program
///   length by default)
/// - with `verify_builtins`, every builtin of the layout has a stop pointer and
///   its segment accesses stay below it. A builtin the program does not
///   include stops at its base, so its segment must stay empty.
/// - every value is a valid memory value
pub fn verify_secure_runner(
    runner: &Runner,
    verify_builtins: bool,
    program_segment_size: Option<usize>,
) -> Result<(), SecurityError> {
    let program_segment_size = program_segment_size.unwrap_or(runner.program_len());
    let program_segment = runner.program_base().map(|base| base.segment_index);

    let builtin_segments: HashMap<u32, (&'static str, usize)> = if verify_builtins {
        runner
            .builtins()
            .iter()
            .map(|builtin| {
                let (base, stop_ptr) = builtin.get_memory_segment_addresses();
                let stop_ptr = stop_ptr
                    .ok_or(SecurityError::MissingStopPointer { builtin: builtin.name() })?;
                let size = (stop_ptr.offset - base.offset).max(0) as usize;
                Ok((base.segment_index, (builtin.name(), size)))
            })
            .collect::<Result<_, SecurityError>>()?
    } else {
        HashMap::new()
    };

    for (address, value) in runner.segments.memory().iter() {
        let MaybeRelocatable::RelocatableValue(address) = address else {
            return Err(SecurityError::NonRelocatableAddress { address: address.clone() });
        };
        let address = *address;
        if address.offset < 0 {
            return Err(SecurityError::NegativeOffset { address });
        }
        let offset = address.offset as usize;
        if let Some(&(builtin, size)) = builtin_segments.get(&address.segment_index) {
            if offset >= size {
                return Err(SecurityError::BuiltinOutOfBounds { builtin, address, size });
            }
        }
        if program_segment == Some(address.segment_index) && offset >= program_segment_size {
            return Err(SecurityError::ProgramOutOfBounds {
                address,
                program_len: program_segment_size,
            });
        }
        if !runner.segments.is_valid_memory_value(value) {
            return Err(SecurityError::InvalidMemoryValue { address, value: value.clone() });
        }
    }
    debug!(cells = runner.segments.memory().len(), "memory accesses verified");

    if verify_builtins {
        let memory = runner.segments.memory();
        for builtin in runner.builtins() {
            builtin.run_security_checks(memory)?;
        }
    }
    info!("run passed security checks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use crate::builtins::BitwiseBuiltin;
    use crate::runner::Primitives;
    use crate::validated_memory::ValidatedMemory;
    use cvm_spec::layout::BitwiseInstanceDef;
    use cvm_spec::{BuiltinDef, Layout, Relocatable};

    fn runner_for(program_builtins: &[String]) -> Runner {
        let layout = Layout {
            name: "bitwise_only".to_string(),
            rc_units: 4,
            public_memory_fraction: 4,
            diluted_pool: None,
            builtins: vec![BuiltinDef::Bitwise(BitwiseInstanceDef { ratio: 8, total_n_bits: 251 })],
        };
        let mut runner = Runner::new(layout, program_builtins, Primitives::default()).unwrap();
        runner.initialize_segments();
        runner.load_program(&[1u64.into(), 2u64.into(), 3u64.into()]).unwrap();
        runner.initialize_builtins_memory().unwrap();
        runner
    }

    /// Bitwise included, stop pointer at the segment base
    fn runner() -> Runner {
        let mut runner = runner_for(&["bitwise".to_string()]);
        set_stop_ptr(&mut runner, 0);
        runner
    }

    fn set_stop_ptr(runner: &mut Runner, offset: usize) {
        let builtin = runner.builtin_mut::<BitwiseBuiltin>().unwrap();
        let base = builtin.base();
        builtin.core_mut().stop_ptr = Some(base + offset);
    }

    #[test]
    fn test_clean_run_passes() {
        let mut runner = runner();
        runner.insert(Relocatable::new(1, 0).into(), Relocatable::new(0, 2).into()).unwrap();
        assert_eq!(verify_secure_runner(&runner, true, None), Ok(()));
    }

    #[test]
    fn test_program_out_of_bounds() {
        let mut runner = runner();
        runner.insert(Relocatable::new(0, 5).into(), 1u64.into()).unwrap();
        let err = verify_secure_runner(&runner, true, None).unwrap_err();
        assert_eq!(
            err,
            SecurityError::ProgramOutOfBounds { address: Relocatable::new(0, 5), program_len: 3 }
        );
        // A larger program segment size makes the access legal
        assert!(verify_secure_runner(&runner, true, Some(6)).is_ok());
    }

    #[test]
    fn test_value_into_unknown_segment() {
        let mut runner = runner();
        runner.insert(Relocatable::new(1, 0).into(), Relocatable::new(9, 0).into()).unwrap();
        let err = verify_secure_runner(&runner, true, None).unwrap_err();
        assert!(matches!(err, SecurityError::InvalidMemoryValue { .. }));
    }

    #[test]
    fn test_non_relocatable_address() {
        let mut runner = runner();
        runner.insert(MaybeRelocatable::from(17u64), 1u64.into()).unwrap();
        let err = verify_secure_runner(&runner, true, None).unwrap_err();
        let address = MaybeRelocatable::from(17u64);
        assert_eq!(err, SecurityError::NonRelocatableAddress { address });
    }

    #[test]
    fn test_negative_offset_key() {
        let mut runner = runner();
        let memory: Memory =
            [(Relocatable::new(1, -1).into(), MaybeRelocatable::from(1u64))].into_iter().collect();
        runner.segments.memory = ValidatedMemory::new(memory);
        let err = verify_secure_runner(&runner, true, None).unwrap_err();
        assert_eq!(err, SecurityError::NegativeOffset { address: Relocatable::new(1, -1) });
    }

    #[test]
    fn test_builtin_out_of_bounds() {
        let mut runner = runner();
        let base = runner.builtin("bitwise").unwrap().base();
        runner.insert(base.into(), 1u64.into()).unwrap();
        runner.insert((base + 1usize).into(), 2u64.into()).unwrap();
        set_stop_ptr(&mut runner, 1);
        let err = verify_secure_runner(&runner, true, None).unwrap_err();
        assert_eq!(
            err,
            SecurityError::BuiltinOutOfBounds {
                builtin: "bitwise",
                address: base + 1usize,
                size: 1,
            }
        );
    }

    #[test]
    fn test_builtin_checks_can_be_skipped() {
        let mut runner = runner();
        let base = runner.builtin("bitwise").unwrap().base();
        // Output without inputs
        runner.insert((base + 2usize).into(), 0u64.into()).unwrap();
        set_stop_ptr(&mut runner, 5);
        assert!(matches!(
            verify_secure_runner(&runner, true, None),
            Err(SecurityError::BuiltinCheck { builtin: "bitwise", .. })
        ));
        assert!(verify_secure_runner(&runner, false, None).is_ok());
    }

    #[test]
    fn test_missing_stop_pointer() {
        let runner = runner_for(&["bitwise".to_string()]);
        let err = verify_secure_runner(&runner, true, None).unwrap_err();
        assert_eq!(err, SecurityError::MissingStopPointer { builtin: "bitwise" });
        assert!(verify_secure_runner(&runner, false, None).is_ok());
    }

    #[test]
    fn test_writes_into_non_included_builtin() {
        let mut runner = runner_for(&[]);
        let base = runner.builtin("bitwise").unwrap().base();
        for offset in 0..40usize {
            runner.segments.memory.insert((base + offset).into(), 1u64.into()).unwrap();
        }
        let end = runner.execution_base().unwrap();
        runner.read_return_values(end).unwrap();
        let err = verify_secure_runner(&runner, true, None).unwrap_err();
        assert_eq!(
            err,
            SecurityError::BuiltinOutOfBounds { builtin: "bitwise", address: base, size: 0 }
        );
    }

    #[test]
    fn test_untouched_non_included_builtin_passes() {
        let mut runner = runner_for(&[]);
        let end = runner.execution_base().unwrap();
        runner.read_return_values(end).unwrap();
        assert_eq!(verify_secure_runner(&runner, true, None), Ok(()));
    }
}
