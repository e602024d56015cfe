//! Cross-module interaction tests
//!
//! Tests the integration between the value model (layouts, encoding) and the
//! runtime (runner, memory, export).

use cvm_runtime::{Memory, Primitives, Runner, RuntimeError};
use cvm_spec::encoding::{from_bytes, to_bytes};
use cvm_spec::{
    Felt, Layout, LayoutError, MaybeRelocatable, Relocatable, ADDR_SIZE_IN_BYTES, FIELD_BYTES,
};

const CUSTOM_LAYOUT: &str = r#"{
    "name": "custom",
    "rc_units": 4,
    "public_memory_fraction": 8,
    "diluted_pool": { "units_per_step": 16, "spacing": 4, "n_bits": 16 },
    "builtins": [
        { "name": "output" },
        { "name": "bitwise", "ratio": 8, "total_n_bits": 251 }
    ]
}"#;

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Output and one bitwise instance, stop pointers read
fn custom_run(layout: Layout) -> Runner {
    let mut runner =
        Runner::new(layout, &names(&["output", "bitwise"]), Primitives::default()).unwrap();
    runner.initialize_segments();
    runner.load_program(&[MaybeRelocatable::from(1u64)]).unwrap();
    let stack_end = runner.initialize_stack(&[]).unwrap();
    runner.initialize_builtins_memory().unwrap();

    let output = runner.builtin("output").unwrap().base();
    let bitwise = runner.builtin("bitwise").unwrap().base();
    runner.segments.load_data(bitwise, &[0xf0u64.into(), 0x3cu64.into()]).unwrap();
    let xor = runner.get(bitwise + 3usize).unwrap();
    runner.insert(output.into(), xor).unwrap();

    let return_values = [(output + 1usize).into(), (bitwise + 5usize).into()];
    let end = runner.segments.load_data(stack_end, &return_values).unwrap();
    runner.read_return_values(end).unwrap();
    runner.end_run().unwrap();
    runner.finalize_segments().unwrap();
    runner
}

// ============================================================================
// Layout -> Runner
// ============================================================================

#[test]
fn test_layout_from_json_drives_runner() {
    let layout = Layout::from_json(CUSTOM_LAYOUT).unwrap();
    assert_eq!(layout.to_string(), "custom [output, bitwise]");

    let runner = custom_run(layout);
    let output = runner.builtin("output").unwrap().base();
    assert_eq!(runner.segments.memory().get_rel(output), Some(&MaybeRelocatable::from(0xccu64)));
    runner.check_used_cells(8).unwrap();
}

#[test]
fn test_layout_json_round_trip() {
    let layout = Layout::all_cairo();
    let json = serde_json::to_string(&layout).unwrap();
    assert_eq!(Layout::from_json(&json).unwrap(), layout);
}

#[test]
fn test_out_of_order_layout_rejected() {
    let json = CUSTOM_LAYOUT.replace(r#"{ "name": "output" },"#, "").replace(
        r#"{ "name": "bitwise", "ratio": 8, "total_n_bits": 251 }"#,
        r#"{ "name": "bitwise", "ratio": 8, "total_n_bits": 251 }, { "name": "output" }"#,
    );
    assert_eq!(Layout::from_json(&json), Err(LayoutError::BuiltinOutOfOrder("output")));
}

#[test]
fn test_program_builtins_must_be_in_layout() {
    let layout = Layout::from_json(CUSTOM_LAYOUT).unwrap();
    let err = Runner::new(layout, &names(&["range_check"]), Primitives::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::Layout(LayoutError::UnsupportedBuiltins(_))));
}

#[test]
fn test_program_builtins_must_keep_layout_order() {
    let layout = Layout::from_json(CUSTOM_LAYOUT).unwrap();
    assert!(Runner::new(layout, &names(&["bitwise", "output"]), Primitives::default()).is_err());
}

#[test]
fn test_runner_rejects_zero_width_diluted_pool() {
    let mut layout = Layout::from_json(CUSTOM_LAYOUT).unwrap();
    if let Some(pool) = layout.diluted_pool.as_mut() {
        pool.n_bits = 0;
    }
    let err = Runner::new(layout, &names(&["bitwise"]), Primitives::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::Layout(LayoutError::InvalidDilutedPool("n_bits"))));
}

#[test]
fn test_diluted_pool_from_layout() {
    // one bitwise instance needs 68 diluted units; 4 units per step over 8 steps is not enough
    let json = CUSTOM_LAYOUT.replace(r#""units_per_step": 16"#, r#""units_per_step": 4"#);
    let runner = custom_run(Layout::from_json(&json).unwrap());
    let err = runner.check_used_cells(8).unwrap_err();
    match err {
        RuntimeError::InsufficientAllocatedCells { resource, used, available } => {
            assert_eq!(resource, "diluted");
            assert_eq!(used, 68);
            assert_eq!(available, 32);
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Runtime memory -> wire encoding
// ============================================================================

#[test]
fn test_runner_memory_on_the_wire() {
    let runner = custom_run(Layout::from_json(CUSTOM_LAYOUT).unwrap());
    let memory = runner.segments.memory();
    let bytes = memory.serialize(FIELD_BYTES).unwrap();
    let pair_size = ADDR_SIZE_IN_BYTES + FIELD_BYTES;
    assert_eq!(bytes.len(), memory.len() * pair_size);

    for pair in bytes.chunks_exact(pair_size) {
        let (address, value) = pair.split_at(ADDR_SIZE_IN_BYTES);
        let address = from_bytes(address).unwrap();
        assert!(address.is_relocatable());
        assert_eq!(memory.get(&address), Some(&from_bytes(value).unwrap()));
    }
}

#[test]
fn test_relocatable_values_carry_the_top_bit() {
    let value: MaybeRelocatable = Relocatable::new(3, 7).into();
    let bytes = to_bytes(&value, FIELD_BYTES).unwrap();
    assert_eq!(bytes[FIELD_BYTES - 1] & 0x80, 0x80);

    let memory: Memory = [(Relocatable::new(1, 0).into(), value.clone())].into_iter().collect();
    let bytes = memory.serialize(FIELD_BYTES).unwrap();
    let decoded = Memory::deserialize(&bytes, FIELD_BYTES).unwrap();
    assert_eq!(decoded.get_rel(Relocatable::new(1, 0)), Some(&value));
}

#[test]
fn test_relocated_memory_on_the_wire() {
    let runner = custom_run(Layout::from_json(CUSTOM_LAYOUT).unwrap());
    let relocated = runner.relocate().unwrap();
    let bytes = relocated.memory.serialize(FIELD_BYTES).unwrap();
    let decoded = Memory::deserialize(&bytes, FIELD_BYTES).unwrap();
    assert_eq!(decoded, relocated.memory);
    assert!(decoded.iter().all(|(address, _)| !address.is_relocatable()));
}

// ============================================================================
// Runtime export -> value model
// ============================================================================

#[test]
fn test_private_input_parses_as_field_elements() {
    let runner = custom_run(Layout::from_json(CUSTOM_LAYOUT).unwrap());
    let input = runner.air_private_input();
    let record = &input["bitwise"][0];
    let x: Felt = serde_json::from_value(record["x"].clone()).unwrap();
    let y: Felt = serde_json::from_value(record["y"].clone()).unwrap();
    assert_eq!((x, y), (Felt::from(0xf0u64), Felt::from(0x3cu64)));
}

#[test]
fn test_public_memory_values_serialize_as_hex() {
    let runner = custom_run(Layout::from_json(CUSTOM_LAYOUT).unwrap());
    let relocated = runner.relocate().unwrap();
    let last = relocated.public_memory.last().unwrap();
    let json = serde_json::to_value(last).unwrap();
    assert_eq!(json["value"], "0xcc");
    assert_eq!(json["page"], 0);
}
