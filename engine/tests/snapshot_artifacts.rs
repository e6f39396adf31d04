// Snapshot tests: lock the textual form of compiler artifacts to detect
// unintended structural changes.
//
// Snapshots are inline and managed by `insta`. Run `cargo insta review`
// after intentional output changes to update them.

use patchflow::normalize::{normalize, MAX_COMPOSITE_DEPTH};
use patchflow::patch::Patch;
use patchflow::registry::BlockRegistry;

fn registry() -> BlockRegistry {
    patchflow::stdlib::standard_registry().unwrap()
}

fn error_text(patch: &Patch) -> String {
    let errors = patchflow::compile(patch, &registry()).expect_err("patch must be rejected");
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn snapshot_normalized_delay_loop() {
    let reg = registry();
    let result = normalize(&patchflow::demos::delay_loop(), &reg, MAX_COMPOSITE_DEPTH);
    assert!(result.diagnostics.is_empty());
    insta::assert_snapshot!(result.graph.to_string(), @r"
    b0 time : TimeRoot
    b1 add : Add
    b2 delay : UnitDelay
    b0.1 -> b1.0
    b1.0 -> b2.0
    b2.0 -> b1.1
    ");
}

#[test]
fn snapshot_unknown_block_type() {
    let mut patch = Patch::new();
    patch.block("time", "TimeRoot");
    patch.block("wobble", "Wobbler");
    insta::assert_snapshot!(error_text(&patch), @"error[E0003]: wobble: unknown block type 'Wobbler'");
}

#[test]
fn snapshot_duplicate_block_id() {
    let mut patch = Patch::new();
    patch.block("time", "TimeRoot");
    patch.block("x", "Add");
    patch.block("x", "Mul");
    insta::assert_snapshot!(error_text(&patch), @"error[E0005]: x: block id 'x' is used more than once");
}
