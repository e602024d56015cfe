//! Full runs over the `all_cairo` layout
//!
//! Each test drives a runner through its whole lifecycle: segments, stack,
//! builtin traffic, return values, finalization, security checks, relocation
//! and export.

use cvm_runtime::builtins::{HashBuiltin, OutputBuiltin, SignatureBuiltin};
use cvm_runtime::{
    verify_secure_runner, PairHasher, Permutation, Primitives, RunArchive, Runner, RuntimeError,
    StarkEcdsa,
};
use cvm_spec::{Felt, Layout, MaybeRelocatable, Relocatable};
use num_bigint::BigUint;
use serde_json::json;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Stand-in pedersen: x + 2y
struct LinearHash;

impl PairHasher for LinearHash {
    fn hash(&self, x: &Felt, y: &Felt) -> Felt {
        x + &(y + y)
    }
}

/// Stand-in poseidon: rotate the state left
struct Rotate;

impl Permutation for Rotate {
    fn width(&self) -> usize {
        3
    }

    fn permute(&self, state: &mut [Felt]) {
        state.rotate_left(1);
    }
}

fn primitives() -> Primitives {
    Primitives::default().with_pedersen(Rc::new(LinearHash)).with_poseidon(Rc::new(Rotate))
}

fn program_builtins() -> Vec<String> {
    Layout::all_cairo().builtins.iter().map(|def| def.name().to_string()).collect()
}

fn base(runner: &Runner, name: &str) -> Relocatable {
    runner.builtin(name).unwrap().base()
}

fn felts(values: &[u64]) -> Vec<MaybeRelocatable> {
    values.iter().copied().map(MaybeRelocatable::from).collect()
}

/// One full keccak component: ratio 2048, 16 instances per component
const N_STEPS: usize = 32_768;

/// A run that touches the output, pedersen, range check, ECDSA, bitwise and
/// poseidon builtins and returns every stop pointer
fn finished_run() -> Runner {
    init_tracing();
    let mut runner = Runner::new(Layout::all_cairo(), &program_builtins(), primitives()).unwrap();
    runner.initialize_segments();
    runner.load_program(&felts(&[0x10, 0x20, 0x30, 0x40])).unwrap();
    let stack_end = runner.initialize_stack(&[]).unwrap();
    runner.initialize_builtins_memory().unwrap();

    // output: three cells, the last two on page 1
    let output = base(&runner, "output");
    runner.segments.load_data(output, &felts(&[7, 8, 9])).unwrap();
    let output_builtin = runner.builtin_mut::<OutputBuiltin>().unwrap();
    output_builtin.add_page(1, output + 1usize, 2).unwrap();
    output_builtin.add_attribute("gps_fact_topology", json!([1, 0]));

    // pedersen: hash(3, 4) = 11
    let pedersen = base(&runner, "pedersen");
    runner.segments.load_data(pedersen, &felts(&[3, 4])).unwrap();
    assert_eq!(runner.get(pedersen + 2usize).unwrap(), MaybeRelocatable::from(11u64));

    let range_check = base(&runner, "range_check");
    runner.segments.load_data(range_check, &felts(&[1000, 42])).unwrap();

    let ecdsa = base(&runner, "ecdsa");
    let private_key = BigUint::from(77_777u32);
    let message = Felt::from(1234u64);
    let signature = StarkEcdsa::sign(&message, &private_key, &BigUint::from(99_999u32)).unwrap();
    let public_key = StarkEcdsa::public_key(&private_key).unwrap();
    runner.builtin_mut::<SignatureBuiltin>().unwrap().add_signature(ecdsa, signature).unwrap();
    runner.segments.load_data(ecdsa, &[public_key.into(), message.into()]).unwrap();

    let bitwise = base(&runner, "bitwise");
    runner.segments.load_data(bitwise, &felts(&[0b1100, 0b1010])).unwrap();
    for offset in 2..5usize {
        runner.get(bitwise + offset).unwrap();
    }

    let poseidon = base(&runner, "poseidon");
    runner.segments.load_data(poseidon, &felts(&[1, 2, 3])).unwrap();
    runner.get(poseidon + 4usize).unwrap();

    // return values: one stop pointer per builtin, in layout order
    let stop_pointers = [
        output + 3usize,
        pedersen + 3usize,
        range_check + 2usize,
        ecdsa + 2usize,
        bitwise + 5usize,
        base(&runner, "ec_op"),
        base(&runner, "keccak"),
        poseidon + 6usize,
    ];
    let stop_values: Vec<MaybeRelocatable> = stop_pointers.iter().map(|&ptr| ptr.into()).collect();
    let return_end = runner.segments.load_data(stack_end, &stop_values).unwrap();
    assert_eq!(runner.read_return_values(return_end).unwrap(), stack_end);

    runner.end_run().unwrap();
    runner.finalize_segments().unwrap();
    runner
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_segment_order() {
    let runner = finished_run();
    let names =
        ["output", "pedersen", "range_check", "ecdsa", "bitwise", "ec_op", "keccak", "poseidon"];
    for (i, name) in names.iter().enumerate() {
        assert_eq!(base(&runner, name), Relocatable::new(2 + i as u32, 0), "{name}");
    }
}

#[test]
fn test_finished_run_is_secure() {
    let runner = finished_run();
    verify_secure_runner(&runner, true, None).unwrap();
    runner.check_used_cells(N_STEPS).unwrap();
}

#[test]
fn test_too_few_steps_for_ecdsa() {
    let runner = finished_run();
    let err = runner.check_used_cells(1024).unwrap_err();
    match err {
        RuntimeError::InsufficientSteps { builtin, min_steps, n_steps } => {
            assert_eq!(builtin, "ecdsa");
            assert_eq!(min_steps, 2048);
            assert_eq!(n_steps, 1024);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_keccak_needs_a_full_component() {
    let runner = finished_run();
    let err = runner.check_used_cells(N_STEPS / 2).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Number of steps must be at least 32768 for the keccak builtin, got 16384"
    );
}

#[test]
fn test_allocation_rounds_to_whole_components() {
    let runner = finished_run();
    let keccak = runner.builtin("keccak").unwrap();
    // 40000 steps pay for one component of 16 instances of 16 cells
    assert_eq!(keccak.get_allocated_memory_units(&runner.segments, 40_000).unwrap(), 256);
    assert_eq!(keccak.get_allocated_memory_units(&runner.segments, 2 * N_STEPS).unwrap(), 512);
    // ratio 16, one instance per component, 5 cells each
    let bitwise = runner.builtin("bitwise").unwrap();
    assert_eq!(bitwise.get_allocated_memory_units(&runner.segments, 40).unwrap(), 10);
}

#[test]
fn test_deduced_cells_were_written_back() {
    let runner = finished_run();
    let bitwise = base(&runner, "bitwise");
    let memory = runner.segments.memory();
    assert_eq!(memory.get_rel(bitwise + 2usize), Some(&MaybeRelocatable::from(0b1000u64)));
    assert_eq!(memory.get_rel(bitwise + 3usize), Some(&MaybeRelocatable::from(0b0110u64)));
    assert_eq!(memory.get_rel(bitwise + 4usize), Some(&MaybeRelocatable::from(0b1110u64)));

    // Unread poseidon outputs stay deducible but are not stored
    let poseidon = base(&runner, "poseidon");
    assert_eq!(memory.get_rel(poseidon + 4usize), Some(&MaybeRelocatable::from(3u64)));
    assert_eq!(memory.get_rel(poseidon + 3usize), None);
}

#[test]
fn test_memory_is_frozen_after_run() {
    let mut runner = finished_run();
    let err = runner.insert(Relocatable::new(1, 100).into(), 1u64.into()).unwrap_err();
    assert!(matches!(err, RuntimeError::FrozenMemory { .. }));
}

#[test]
fn test_execution_resources() {
    let runner = finished_run();
    let resources = runner.get_execution_resources(N_STEPS);
    assert_eq!(resources.n_steps, N_STEPS);
    assert_eq!(resources.n_memory_holes, 0);
    let counter = &resources.builtin_instance_counter;
    assert_eq!(counter["output"], 3);
    assert_eq!(counter["pedersen"], 1);
    assert_eq!(counter["range_check"], 2);
    assert_eq!(counter["ecdsa"], 1);
    assert_eq!(counter["bitwise"], 1);
    assert_eq!(counter["ec_op"], 0);
    assert_eq!(counter["poseidon"], 1);
}

// ============================================================================
// Relocation and public memory
// ============================================================================

#[test]
fn test_relocation_and_public_memory() {
    let runner = finished_run();
    let relocated = runner.relocate().unwrap();

    // program (4 cells) at 1, execution (8 bases + 8 stop pointers) at 5, output at 21
    assert_eq!(relocated.segment_offsets[&0], 1);
    assert_eq!(relocated.segment_offsets[&1], 5);
    assert_eq!(relocated.segment_offsets[&2], 21);
    assert_eq!(
        relocated.memory.get(&MaybeRelocatable::from(5u64)),
        Some(&MaybeRelocatable::from(21u64))
    );

    let public: Vec<(u64, usize)> =
        relocated.public_memory.iter().map(|entry| (entry.address, entry.page)).collect();
    let mut expected: Vec<(u64, usize)> = (1..5).map(|address| (address, 0)).collect();
    expected.extend((5..13).map(|address| (address, 0)));
    expected.extend([(21, 0), (22, 1), (23, 1)]);
    assert_eq!(public, expected);
    assert_eq!(relocated.public_memory.last().unwrap().value, Felt::from(9u64));
}

#[test]
fn test_builtin_segments_info() {
    let runner = finished_run();
    let info = runner.get_builtin_segments_info().unwrap();
    assert_eq!(info["output"].size, 3);
    assert_eq!(info["bitwise"].size, 5);
    assert_eq!(info["keccak"].size, 0);
    assert_eq!(info["poseidon"].index, 9);
}

// ============================================================================
// Export
// ============================================================================

#[test]
fn test_air_private_input() {
    let runner = finished_run();
    let input = runner.air_private_input();
    assert_eq!(input["pedersen"], vec![json!({ "index": 0, "x": "0x3", "y": "0x4" })]);
    assert_eq!(input["bitwise"], vec![json!({ "index": 0, "x": "0xc", "y": "0xa" })]);
    assert_eq!(
        input["poseidon"],
        vec![json!({ "index": 0, "input_s0": "0x1", "input_s1": "0x2", "input_s2": "0x3" })]
    );
    assert_eq!(input["range_check"].len(), 2);
    assert_eq!(input["ecdsa"][0]["msg"], "0x4d2");
    assert!(input["ec_op"].is_empty());
    assert!(input["output"].is_empty());
}

#[test]
fn test_additional_data() {
    let runner = finished_run();
    let data = runner.get_additional_data();
    assert_eq!(
        data["output"],
        json!({ "pages": { "1": [1, 2] }, "attributes": { "gps_fact_topology": [1, 0] } })
    );
    assert_eq!(data["pedersen"], json!([[3, 2]]));
    assert_eq!(data["ecdsa"].as_array().unwrap().len(), 1);
}

#[test]
fn test_archive_round_trip() {
    let runner = finished_run();
    let archive = runner.archive(N_STEPS).unwrap();
    assert_eq!(archive.metadata.layout, "all_cairo");
    assert_eq!(archive.metadata.program_segment.size, 4);
    assert_eq!(archive.metadata.execution_segment.size, 16);

    let mut buffer = Vec::new();
    archive.write_to(&mut buffer).unwrap();
    let restored = RunArchive::read_from(buffer.as_slice()).unwrap();
    assert_eq!(restored, archive);
    // the archived copy is not frozen, so compare cells
    assert!(restored.memory().unwrap().iter().eq(runner.segments.memory().iter()));
    assert_eq!(restored.additional_data().unwrap(), runner.get_additional_data());
}

#[test]
fn test_merge_additional_data() {
    let first = finished_run();
    let data = first.get_additional_data();

    let mut second = Runner::new(Layout::all_cairo(), &program_builtins(), primitives()).unwrap();
    second.initialize_segments();
    second.extend_additional_data(&data, false).unwrap();

    // untrusted pedersen data is dropped, signatures and pages are taken over
    assert!(second.builtin_mut::<HashBuiltin>().unwrap().verified_addresses().is_empty());
    assert_eq!(second.builtin_mut::<SignatureBuiltin>().unwrap().signatures().len(), 1);
    assert_eq!(second.builtin_mut::<OutputBuiltin>().unwrap().pages().len(), 1);

    second.extend_additional_data(&data, true).unwrap();
    assert_eq!(
        second.builtin_mut::<HashBuiltin>().unwrap().verified_addresses(),
        vec![Relocatable::new(3, 2)]
    );
}
