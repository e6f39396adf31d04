// pipeline.rs — Compilation state and pass orchestration
//
// Holds every pass artifact in one `CompilationState` and runs the minimal
// set of passes for a terminal `PassId`. A pass runs only when all of its
// input passes succeeded, so independent passes (dependency analysis and
// type resolution) still report their errors together.
//
// Preconditions: the registry is immutable for the whole run.
// Postconditions: artifacts for every pass that could run are populated;
//   `failed` lists the passes that produced error-level diagnostics.
// Failure modes: any pass emitting error-level diagnostics; a failed
//   certificate (E06xx).
// Side effects: calls the `PassTap` after each pass; emits tracing events.

use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, debug_span};

use crate::axis::TypedGraph;
use crate::diag::{codes, has_errors, CompileError, DiagLevel, Diagnostic, Location};
use crate::graph::DependencyAnalysis;
use crate::lower::{LowerCert, LoweredProgram};
use crate::normalize::{NormalizedGraph, MAX_COMPOSITE_DEPTH};
use crate::pass::{descriptor, required_passes, PassId};
use crate::patch::Patch;
use crate::registry::BlockRegistry;
use crate::schedule::{Schedule, ScheduleCert};
use crate::type_infer::TypeResolution;

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompileOptions {
    /// Composite nesting beyond this depth is `CompositeDepthExceeded`.
    pub max_composite_depth: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            max_composite_depth: MAX_COMPOSITE_DEPTH,
        }
    }
}

/// `Inspect` runs the axis gate even when type resolution failed, so
/// editors see every unresolved port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Compile,
    Inspect,
}

// ── Inspection hook ─────────────────────────────────────────────────────────

/// Read-only view of one pass's output.
#[derive(Debug, Clone, Copy)]
pub enum PassArtifact<'a> {
    Normalized(&'a NormalizedGraph),
    Solved(&'a TypeResolution),
    Typed(&'a TypedGraph),
    Dependencies(&'a DependencyAnalysis),
    Lowered(&'a LoweredProgram),
    Scheduled(&'a Schedule),
}

/// Observer called after each pass. It cannot change the result.
pub trait PassTap {
    fn on_pass(&mut self, pass: PassId, artifact: Option<PassArtifact<'_>>, diagnostics: &[Diagnostic]);
}

/// Tap that ignores everything.
pub struct NoTap;

impl PassTap for NoTap {
    fn on_pass(&mut self, _: PassId, _: Option<PassArtifact<'_>>, _: &[Diagnostic]) {}
}

impl<F> PassTap for F
where
    F: FnMut(PassId, Option<PassArtifact<'_>>, &[Diagnostic]),
{
    fn on_pass(&mut self, pass: PassId, artifact: Option<PassArtifact<'_>>, diagnostics: &[Diagnostic]) {
        self(pass, artifact, diagnostics)
    }
}

// ── Artifact storage ────────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState<'a> {
    pub patch: &'a Patch,
    pub registry: &'a BlockRegistry,
    pub normalized: Option<NormalizedGraph>,
    pub resolution: Option<TypeResolution>,
    pub typed: Option<TypedGraph>,
    pub deps: Option<DependencyAnalysis>,
    pub lowered: Option<LoweredProgram>,
    pub lower_cert: Option<LowerCert>,
    pub schedule: Option<Schedule>,
    pub schedule_cert: Option<ScheduleCert>,
    pub diagnostics: Vec<Diagnostic>,
    /// Passes that completed without errors.
    pub succeeded: Vec<PassId>,
    pub failed: Vec<PassId>,
}

impl<'a> CompilationState<'a> {
    pub fn new(patch: &'a Patch, registry: &'a BlockRegistry) -> Self {
        CompilationState {
            patch,
            registry,
            normalized: None,
            resolution: None,
            typed: None,
            deps: None,
            lowered: None,
            lower_cert: None,
            schedule: None,
            schedule_cert: None,
            diagnostics: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        !self.failed.is_empty()
    }

    /// The executable program, if the run reached `Schedule` without errors.
    /// Warnings collected so far travel with it.
    pub fn into_program(self) -> Option<CompiledProgramIR> {
        if self.has_error() {
            return None;
        }
        Some(CompiledProgramIR {
            program: self.lowered?,
            schedule: self.schedule?,
            warnings: self.diagnostics,
            registry_fingerprint: registry_fingerprint(self.registry),
        })
    }

    fn ready(&self, pass: PassId, mode: RunMode) -> bool {
        descriptor(pass).inputs.iter().all(|dep| {
            self.succeeded.contains(dep)
                || (mode == RunMode::Inspect
                    && pass == PassId::AxisValidate
                    && *dep == PassId::TypeResolve
                    && self.resolution.is_some())
        })
    }
}

/// Everything a successful compile produced, pass by pass.
pub struct Stages {
    pub normalized: NormalizedGraph,
    pub typed: TypedGraph,
    pub deps: DependencyAnalysis,
    pub lowered: LoweredProgram,
    pub lower_cert: LowerCert,
    pub schedule: Schedule,
    pub schedule_cert: ScheduleCert,
    pub warnings: Vec<Diagnostic>,
}

/// The executable result of `compile`.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledProgramIR {
    pub program: LoweredProgram,
    pub schedule: Schedule,
    pub warnings: Vec<Diagnostic>,
    /// SHA-256 of the registry's canonical JSON.
    pub registry_fingerprint: String,
}

impl CompiledProgramIR {
    /// Fingerprint of the schedule's canonical text form.
    pub fn fingerprint(&self) -> String {
        self.schedule.fingerprint()
    }
}

pub fn registry_fingerprint(registry: &BlockRegistry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(registry.canonical_json().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ── Pipeline runner ─────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: inputs ready? → execute → tap → accumulate.
pub fn run_pipeline(
    state: &mut CompilationState<'_>,
    terminal: PassId,
    options: &CompileOptions,
    mode: RunMode,
    tap: &mut dyn PassTap,
) {
    for pass in required_passes(terminal) {
        if !state.ready(pass, mode) {
            debug!(pass = descriptor(pass).name, "skipped, inputs failed");
            continue;
        }
        let span = debug_span!("pass", name = descriptor(pass).name);
        let _enter = span.enter();
        let t = Instant::now();
        let diags = run_pass(state, pass, options);
        debug!(
            elapsed_ms = t.elapsed().as_secs_f64() * 1000.0,
            diagnostics = diags.len(),
            "pass complete"
        );
        tap.on_pass(pass, artifact_of(state, pass), &diags);
        if has_errors(&diags) {
            state.failed.push(pass);
        } else {
            state.succeeded.push(pass);
        }
        state.diagnostics.extend(diags);
    }
}

fn run_pass(state: &mut CompilationState<'_>, pass: PassId, options: &CompileOptions) -> Vec<Diagnostic> {
    match pass {
        PassId::Normalize => {
            let r = crate::normalize::normalize(
                state.patch,
                state.registry,
                options.max_composite_depth,
            );
            state.normalized = Some(r.graph);
            r.diagnostics
        }
        PassId::TypeResolve => {
            let Some(graph) = &state.normalized else {
                return missing_input(pass);
            };
            let r = crate::type_infer::resolve(graph, state.registry);
            let diags = r.diagnostics.clone();
            state.resolution = Some(r);
            diags
        }
        PassId::AxisValidate => {
            let (Some(graph), Some(resolution)) = (&state.normalized, &state.resolution) else {
                return missing_input(pass);
            };
            match crate::axis::validate(graph, resolution, state.registry) {
                Ok(typed) => {
                    state.typed = Some(typed);
                    Vec::new()
                }
                Err(errors) => errors,
            }
        }
        PassId::Dependencies => {
            let Some(graph) = &state.normalized else {
                return missing_input(pass);
            };
            let r = crate::graph::analyze(graph);
            state.deps = Some(r.analysis);
            r.diagnostics
        }
        PassId::Lower => {
            let (Some(typed), Some(deps)) = (&state.typed, &state.deps) else {
                return missing_input(pass);
            };
            let r = crate::lower::lower(typed, state.registry, deps);
            state.lowered = Some(r.program);
            state.lower_cert = Some(r.cert);
            r.diagnostics
        }
        PassId::Schedule => {
            let (Some(lowered), Some(typed)) = (&state.lowered, &state.typed) else {
                return missing_input(pass);
            };
            let r = crate::schedule::schedule(lowered, typed);
            state.schedule = Some(r.schedule);
            state.schedule_cert = Some(r.cert);
            r.diagnostics
        }
    }
}

fn missing_input(pass: PassId) -> Vec<Diagnostic> {
    vec![Diagnostic::new(
        DiagLevel::Error,
        Location::patch(),
        format!("pass {} ran without its inputs", descriptor(pass).name),
    )
    .with_code(codes::E0600)]
}

fn artifact_of<'s>(state: &'s CompilationState<'_>, pass: PassId) -> Option<PassArtifact<'s>> {
    match pass {
        PassId::Normalize => state.normalized.as_ref().map(PassArtifact::Normalized),
        PassId::TypeResolve => state.resolution.as_ref().map(PassArtifact::Solved),
        PassId::AxisValidate => state.typed.as_ref().map(PassArtifact::Typed),
        PassId::Dependencies => state.deps.as_ref().map(PassArtifact::Dependencies),
        PassId::Lower => state.lowered.as_ref().map(PassArtifact::Lowered),
        PassId::Schedule => state.schedule.as_ref().map(PassArtifact::Scheduled),
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Compile with default options. All-or-nothing: on failure every
/// error-level diagnostic is returned and nothing else.
#[tracing::instrument(level = "debug", skip_all, fields(blocks = patch.blocks.len()))]
pub fn compile(patch: &Patch, registry: &BlockRegistry) -> Result<CompiledProgramIR, Vec<CompileError>> {
    compile_with(patch, registry, &CompileOptions::default(), &mut NoTap)
}

pub fn compile_with(
    patch: &Patch,
    registry: &BlockRegistry,
    options: &CompileOptions,
    tap: &mut dyn PassTap,
) -> Result<CompiledProgramIR, Vec<CompileError>> {
    let stages = compile_stages_with(patch, registry, options, tap)?;
    Ok(CompiledProgramIR {
        program: stages.lowered,
        schedule: stages.schedule,
        warnings: stages.warnings,
        registry_fingerprint: registry_fingerprint(registry),
    })
}

/// Like `compile`, but keeps every intermediate artifact.
pub fn compile_stages(
    patch: &Patch,
    registry: &BlockRegistry,
    options: &CompileOptions,
) -> Result<Stages, Vec<CompileError>> {
    compile_stages_with(patch, registry, options, &mut NoTap)
}

fn compile_stages_with(
    patch: &Patch,
    registry: &BlockRegistry,
    options: &CompileOptions,
    tap: &mut dyn PassTap,
) -> Result<Stages, Vec<CompileError>> {
    let mut state = CompilationState::new(patch, registry);
    run_pipeline(&mut state, PassId::Schedule, options, RunMode::Compile, tap);
    if state.has_error() {
        return Err(state
            .diagnostics
            .into_iter()
            .filter(Diagnostic::is_error)
            .collect());
    }
    let warnings = state.diagnostics;
    match (
        state.normalized,
        state.typed,
        state.deps,
        state.lowered,
        state.lower_cert,
        state.schedule,
        state.schedule_cert,
    ) {
        (
            Some(normalized),
            Some(typed),
            Some(deps),
            Some(lowered),
            Some(lower_cert),
            Some(schedule),
            Some(schedule_cert),
        ) => Ok(Stages {
            normalized,
            typed,
            deps,
            lowered,
            lower_cert,
            schedule,
            schedule_cert,
            warnings,
        }),
        _ => Err(vec![Diagnostic::new(
            DiagLevel::Error,
            Location::patch(),
            "pipeline finished without producing a schedule",
        )
        .with_code(codes::E0600)]),
    }
}

// ── Inspection ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Validity {
    Valid,
    /// Artifacts may be shown but must never be executed.
    InvalidDisplayOnly,
}

/// Text form of one pass's artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub pass: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub validity: Validity,
    /// Every artifact the run got to, in pass order.
    pub artifacts: Vec<ArtifactSummary>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Run the pipeline as far as it goes for display. Never yields an
/// executable program.
pub fn inspect(patch: &Patch, registry: &BlockRegistry) -> Inspection {
    let mut artifacts = Vec::new();
    let mut tap = |pass: PassId, artifact: Option<PassArtifact<'_>>, _: &[Diagnostic]| {
        let text = match artifact {
            Some(PassArtifact::Normalized(g)) => g.to_string(),
            Some(PassArtifact::Solved(r)) => format!("{} blocks solved", r.ports.len()),
            Some(PassArtifact::Typed(t)) => t.to_string(),
            Some(PassArtifact::Dependencies(d)) => d.to_string(),
            Some(PassArtifact::Lowered(l)) => l.to_string(),
            Some(PassArtifact::Scheduled(s)) => s.to_string(),
            None => return,
        };
        artifacts.push(ArtifactSummary {
            pass: descriptor(pass).name,
            text,
        });
    };
    let mut state = CompilationState::new(patch, registry);
    run_pipeline(
        &mut state,
        PassId::Schedule,
        &CompileOptions::default(),
        RunMode::Inspect,
        &mut tap,
    );
    Inspection {
        validity: if state.has_error() {
            Validity::InvalidDisplayOnly
        } else {
            Validity::Valid
        },
        artifacts,
        diagnostics: state.diagnostics,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::ErrorKind;
    use crate::pass::StageCert;
    use crate::stdlib::standard_registry;

    fn dots() -> Patch {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array").num("count", 3.0);
        p.block("line", "LineLayout");
        p.block("render", "Render");
        p.connect(("arr", "t"), ("line", "t"));
        p.connect(("line", "pos"), ("render", "pos"));
        p
    }

    #[test]
    fn compile_produces_certified_stages() {
        let reg = standard_registry().unwrap();
        let s = compile_stages(&dots(), &reg, &CompileOptions::default()).unwrap();
        assert!(s.lower_cert.all_pass());
        assert!(s.schedule_cert.all_pass());
        assert!(s.warnings.is_empty());
    }

    #[test]
    fn tap_sees_every_pass_in_order() {
        let reg = standard_registry().unwrap();
        let mut seen = Vec::new();
        let mut tap = |pass: PassId, artifact: Option<PassArtifact<'_>>, _: &[Diagnostic]| {
            assert!(artifact.is_some());
            seen.push(pass);
        };
        compile_with(&dots(), &reg, &CompileOptions::default(), &mut tap).unwrap();
        assert_eq!(seen, required_passes(PassId::Schedule));
    }

    #[test]
    fn finished_state_yields_the_compiled_program() {
        let reg = standard_registry().unwrap();
        let patch = dots();
        let mut state = CompilationState::new(&patch, &reg);
        run_pipeline(&mut state, PassId::Schedule, &CompileOptions::default(), RunMode::Compile, &mut NoTap);
        let program = state.into_program().expect("schedule reached");
        assert_eq!(program.fingerprint(), compile(&patch, &reg).unwrap().fingerprint());

        let mut partial = CompilationState::new(&patch, &reg);
        run_pipeline(&mut partial, PassId::Lower, &CompileOptions::default(), RunMode::Compile, &mut NoTap);
        assert!(partial.into_program().is_none());
    }

    #[test]
    fn every_artifact_formats_for_debugging() {
        let reg = standard_registry().unwrap();
        let mut printed = Vec::new();
        let mut tap = |pass: PassId, artifact: Option<PassArtifact<'_>>, _: &[Diagnostic]| {
            printed.push((pass, format!("{artifact:?}")));
        };
        compile_with(&dots(), &reg, &CompileOptions::default(), &mut tap).unwrap();
        assert_eq!(printed.len(), required_passes(PassId::Schedule).len());
        let (_, solved) = printed
            .iter()
            .find(|(pass, _)| *pass == PassId::TypeResolve)
            .expect("type resolution artifact");
        assert!(solved.contains("TypeResolution"), "{solved}");
        assert!(printed.iter().all(|(_, text)| text.starts_with("Some(")));
    }

    #[test]
    fn cycle_and_type_errors_are_reported_together() {
        let reg = standard_registry().unwrap();
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array");
        p.block("line", "LineLayout");
        p.block("mix", "Add");
        p.block("loop", "Add");
        p.connect(("arr", "t"), ("line", "t"));
        p.connect(("line", "pos"), ("mix", "a"));
        p.connect(("arr", "index"), ("mix", "b"));
        p.connect(("loop", "out"), ("loop", "a"));
        let errors = compile(&p, &reg).unwrap_err();
        let kinds: Vec<_> = errors.iter().filter_map(Diagnostic::kind).collect();
        assert!(kinds.contains(&ErrorKind::TypeMismatch), "{kinds:?}");
        assert!(kinds.contains(&ErrorKind::CycleWithoutStateBoundary), "{kinds:?}");
    }

    #[test]
    fn failed_compile_returns_only_errors() {
        let reg = standard_registry().unwrap();
        let mut p = Patch::new();
        p.block("arr", "Array").num("bogus", 1.0);
        let errors = compile(&p, &reg).unwrap_err();
        assert!(errors.iter().all(Diagnostic::is_error));
        assert_eq!(errors[0].kind(), Some(ErrorKind::MissingTimeRoot));
    }

    #[test]
    fn inspect_marks_invalid_programs() {
        let reg = standard_registry().unwrap();
        let ok = inspect(&dots(), &reg);
        assert_eq!(ok.validity, Validity::Valid);
        assert_eq!(ok.artifacts.len(), 6);

        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("add", "Add");
        let bad = inspect(&p, &reg);
        assert_eq!(bad.validity, Validity::InvalidDisplayOnly);
        assert!(bad
            .diagnostics
            .iter()
            .any(|d| d.kind() == Some(ErrorKind::UnresolvedTypeVariable)));
        assert!(bad.artifacts.iter().any(|a| a.pass == "normalize"));
    }

    #[test]
    fn registry_fingerprint_is_hex_sha256() {
        let reg = standard_registry().unwrap();
        let fp = registry_fingerprint(&reg);
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, registry_fingerprint(&standard_registry().unwrap()));
    }
}
