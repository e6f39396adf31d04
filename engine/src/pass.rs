// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's six passes, their dependency edges, and the
// artifacts they produce. Used by the pipeline to compute the minimal pass
// subset for each `--emit` target, and by `StageCert` implementors to
// report verified postconditions.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Normalize,
    TypeResolve,
    AxisValidate,
    Dependencies,
    Lower,
    Schedule,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Normalized,   // NormalizedGraph
    Solved,       // TypeResolution
    Typed,        // TypedGraph
    Dependencies, // DependencyAnalysis
    Lowered,      // LoweredProgram
    LowerCert,    // LowerCert
    Schedule,     // Schedule
    ScheduleCert, // ScheduleCert
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics and log output.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Postconditions, documentation only.
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Normalize => PassDescriptor {
            name: "normalize",
            inputs: &[],
            outputs: &[ArtifactId::Normalized],
            invalidation_key: "patch + registry",
            invariants: "composites expanded, defaults and adapters explicit",
        },
        PassId::TypeResolve => PassDescriptor {
            name: "type_resolve",
            inputs: &[PassId::Normalize],
            outputs: &[ArtifactId::Solved],
            invalidation_key: "normalized + registry",
            invariants: "every port has a solved type",
        },
        PassId::AxisValidate => PassDescriptor {
            name: "axis_validate",
            inputs: &[PassId::TypeResolve],
            outputs: &[ArtifactId::Typed],
            invalidation_key: "normalized + solved",
            invariants: "every port type is a concrete CanonicalType",
        },
        PassId::Dependencies => PassDescriptor {
            name: "dependencies",
            inputs: &[PassId::Normalize],
            outputs: &[ArtifactId::Dependencies],
            invalidation_key: "normalized",
            invariants: "every cycle crosses a stateful block, lowering order total",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::AxisValidate, PassId::Dependencies],
            outputs: &[ArtifactId::Lowered, ArtifactId::LowerCert],
            invalidation_key: "typed + dependencies + registry",
            invariants: "L1-L4 obligations verified",
        },
        PassId::Schedule => PassDescriptor {
            name: "schedule",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Schedule, ArtifactId::ScheduleCert],
            invalidation_key: "lowered + typed",
            invariants: "S1-S4 obligations verified",
        },
    }
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;

    /// `(obligation name, passed)` pairs, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 6] = [
    PassId::Normalize,
    PassId::TypeResolve,
    PassId::AxisValidate,
    PassId::Dependencies,
    PassId::Lower,
    PassId::Schedule,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_dependencies_skips_types() {
        let passes = required_passes(PassId::Dependencies);
        assert_eq!(passes, vec![PassId::Normalize, PassId::Dependencies]);
        assert!(!passes.contains(&PassId::TypeResolve));
    }

    #[test]
    fn required_passes_schedule_includes_all() {
        let passes = required_passes(PassId::Schedule);
        assert_eq!(
            passes,
            vec![
                PassId::Normalize,
                PassId::TypeResolve,
                PassId::AxisValidate,
                PassId::Dependencies,
                PassId::Lower,
                PassId::Schedule,
            ]
        );
    }

    #[test]
    fn required_passes_normalize_is_minimal() {
        assert_eq!(required_passes(PassId::Normalize), vec![PassId::Normalize]);
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            assert!(
                !descriptor(*pass).outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                let self_pos = order.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    struct Fake(bool, bool);

    impl StageCert for Fake {
        fn all_pass(&self) -> bool {
            self.0 && self.1
        }
        fn obligations(&self) -> Vec<(&'static str, bool)> {
            vec![("A", self.0), ("B", self.1)]
        }
    }

    #[test]
    fn failed_lists_broken_obligations() {
        assert_eq!(Fake(true, false).failed(), vec!["B"]);
        assert!(Fake(true, true).failed().is_empty());
    }
}
