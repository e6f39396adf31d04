// schedule.rs — Two-phase frame schedule generation
//
// Allocates a storage slot for every IR value and every state cell, then
// orders one frame's steps into two phases. Phase 1 reads last frame's
// state: it evaluates, materializes and fires values in id order (which
// lowering made topological), builds continuity maps, applies continuity
// and collects render output. Phase 2 commits next-frame state.
//
// Preconditions: `program` passed lowering verification (L1-L4) and was
//   lowered from `typed`.
// Postconditions: returns a `Schedule` whose Phase-2 steps all follow its
//   Phase-1 steps, plus `ScheduleCert` evidence (S1-S4).
// Failure modes: failed obligations are compiler defects (E0602).
// Side effects: none.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::axis::TypedGraph;
use crate::diag::{codes, DiagLevel, Diagnostic, Location};
use crate::id::{InstanceIdx, StateId, ValueId};
use crate::ir::{ExprOp, SlotSource};
use crate::lower::LoweredProgram;
use crate::pass::StageCert;
use crate::registry::BlockRole;
use crate::types::{PayloadType, TypeFamily, Unit};

// ── Public types ────────────────────────────────────────────────────────────

/// One executable step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Step {
    /// Compute a signal or constant into scalar scratch.
    EvalScalar { value: ValueId },
    /// Compute a field element-by-element into its pooled buffer.
    MaterializeField { value: ValueId, instance: InstanceIdx },
    /// Compute an event (one flag, or one flag per element).
    FireEvent { value: ValueId },
    /// Decide how this frame's elements of `instance` relate to the last
    /// frame's. `hint` is the continuity target used for spatial matching.
    ContinuityMapBuild {
        instance: InstanceIdx,
        hint: Option<u32>,
    },
    ContinuityApply { target: u32 },
    RenderCollect { sink: u32 },
    WriteState { state: StateId, value: ValueId },
    WriteFieldState {
        state: StateId,
        value: ValueId,
        instance: InstanceIdx,
    },
}

impl Step {
    pub fn is_commit(&self) -> bool {
        matches!(self, Step::WriteState { .. } | Step::WriteFieldState { .. })
    }

    /// Values this step reads.
    fn reads(&self, program: &LoweredProgram) -> Vec<ValueId> {
        match self {
            Step::EvalScalar { value }
            | Step::MaterializeField { value, .. }
            | Step::FireEvent { value } => program.expr(*value).operands(),
            Step::ContinuityMapBuild { .. } => Vec::new(),
            Step::ContinuityApply { target } => {
                vec![program.continuity[*target as usize].source]
            }
            Step::RenderCollect { sink } => {
                let s = &program.sinks[*sink as usize];
                vec![s.pos, s.color, s.size, s.shape]
            }
            Step::WriteState { value, .. } | Step::WriteFieldState { value, .. } => vec![*value],
        }
    }

    /// Values this step produces.
    fn writes(&self, program: &LoweredProgram) -> Option<ValueId> {
        match self {
            Step::EvalScalar { value }
            | Step::MaterializeField { value, .. }
            | Step::FireEvent { value } => Some(*value),
            Step::ContinuityApply { target } => Some(program.continuity[*target as usize].output),
            _ => None,
        }
    }
}

/// Storage address of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Slot {
    /// `stride` components at `offset` in scalar scratch.
    Scalar { offset: usize, stride: usize },
    /// Pooled buffer `buffer`, `count × stride` components.
    Field {
        buffer: usize,
        stride: usize,
        instance: InstanceIdx,
    },
}

impl Slot {
    pub fn stride(&self) -> usize {
        match *self {
            Slot::Scalar { stride, .. } | Slot::Field { stride, .. } => stride,
        }
    }
}

/// Range of one state cell in the persistent state array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSlot {
    pub offset: usize,
    pub stride: usize,
    /// Elements stored; 1 for signal state.
    pub count: usize,
    pub instance: Option<InstanceIdx>,
}

impl StateSlot {
    pub fn len(&self) -> usize {
        self.count * self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub steps: Vec<Step>,
    /// Index of the first Phase-2 step.
    pub commit_start: usize,
    /// Indexed by `ValueId`; `None` for state writes, which produce nothing.
    pub slots: Vec<Option<Slot>>,
    /// Indexed by `StateId`.
    pub state_slots: Vec<StateSlot>,
    pub scalar_len: usize,
    pub field_buffers: usize,
    pub state_len: usize,
    /// Largest domain count; pooled buffers are sized from it.
    pub max_count: usize,
}

impl Schedule {
    pub fn phase1(&self) -> &[Step] {
        &self.steps[..self.commit_start]
    }

    pub fn phase2(&self) -> &[Step] {
        &self.steps[self.commit_start..]
    }

    pub fn slot(&self, v: ValueId) -> Option<Slot> {
        self.slots.get(v.0 as usize).copied().flatten()
    }

    /// SHA-256 of the canonical text form, as 64 hex characters.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

pub struct ScheduleResult {
    pub schedule: Schedule,
    pub cert: ScheduleCert,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for schedule postconditions (S1-S4).
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleCert {
    /// S1: every value a step reads or writes has a slot, and every domain
    ///     block has a map-build step.
    pub s1_slots_complete: bool,
    /// S2: no Phase-1 step follows a Phase-2 step.
    pub s2_two_phase: bool,
    /// S3: every value is produced before any step reads it.
    pub s3_produced_before_read: bool,
    /// S4: every state is written at most once per frame.
    pub s4_single_writer: bool,
}

impl StageCert for ScheduleCert {
    fn all_pass(&self) -> bool {
        self.s1_slots_complete
            && self.s2_two_phase
            && self.s3_produced_before_read
            && self.s4_single_writer
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("S1_slots_complete", self.s1_slots_complete),
            ("S2_two_phase", self.s2_two_phase),
            ("S3_produced_before_read", self.s3_produced_before_read),
            ("S4_single_writer", self.s4_single_writer),
        ]
    }
}

pub fn verify_schedule(
    schedule: &Schedule,
    program: &LoweredProgram,
    typed: &TypedGraph,
) -> ScheduleCert {
    ScheduleCert {
        s1_slots_complete: verify_s1(schedule, program, typed),
        s2_two_phase: verify_s2(schedule),
        s3_produced_before_read: verify_s3(schedule, program),
        s4_single_writer: verify_s4(schedule),
    }
}

fn verify_s1(schedule: &Schedule, program: &LoweredProgram, typed: &TypedGraph) -> bool {
    let values_ok = schedule.steps.iter().all(|step| {
        step.reads(program)
            .into_iter()
            .chain(step.writes(program))
            .all(|v| schedule.slot(v).is_some())
    });
    let domain_blocks = typed
        .graph
        .blocks
        .iter()
        .filter(|b| matches!(b.caps.role, BlockRole::Domain { .. }))
        .count();
    let map_builds = schedule
        .steps
        .iter()
        .filter(|s| matches!(s, Step::ContinuityMapBuild { .. }))
        .count();
    values_ok && domain_blocks == map_builds && map_builds == program.domains.len()
}

fn verify_s2(schedule: &Schedule) -> bool {
    schedule.phase1().iter().all(|s| !s.is_commit())
        && schedule.phase2().iter().all(Step::is_commit)
}

fn verify_s3(schedule: &Schedule, program: &LoweredProgram) -> bool {
    let mut produced: HashSet<ValueId> = HashSet::new();
    for step in &schedule.steps {
        if !step.reads(program).iter().all(|v| produced.contains(v)) {
            return false;
        }
        if let Some(v) = step.writes(program) {
            produced.insert(v);
        }
    }
    true
}

fn verify_s4(schedule: &Schedule) -> bool {
    let mut written = HashSet::new();
    schedule.phase2().iter().all(|s| match s {
        Step::WriteState { state, .. } | Step::WriteFieldState { state, .. } => {
            written.insert(*state)
        }
        _ => true,
    })
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn schedule(program: &LoweredProgram, typed: &TypedGraph) -> ScheduleResult {
    let (slots, scalar_len, field_buffers) = allocate_values(program);
    let (state_slots, state_len) = allocate_states(program);

    let mut steps = Vec::new();
    let mut commits = Vec::new();
    for (i, e) in program.exprs.iter().enumerate() {
        let value = ValueId(i as u32);
        match &e.op {
            ExprOp::SlotRead(_) => {}
            ExprOp::StateWrite { state, value: v } => {
                let decl = program.state(*state);
                commits.push(match decl.instance {
                    Some(instance) => Step::WriteFieldState {
                        state: *state,
                        value: *v,
                        instance,
                    },
                    None => Step::WriteState {
                        state: *state,
                        value: *v,
                    },
                });
            }
            _ => steps.push(match (e.ty.family(), slots[i]) {
                (TypeFamily::Event, _) => Step::FireEvent { value },
                (_, Some(Slot::Field { instance, .. })) => {
                    Step::MaterializeField { value, instance }
                }
                _ => Step::EvalScalar { value },
            }),
        }
    }
    for d in &program.domains {
        steps.push(Step::ContinuityMapBuild {
            instance: d.idx,
            hint: spatial_hint(program, d.idx),
        });
    }
    for target in 0..program.continuity.len() {
        steps.push(Step::ContinuityApply {
            target: target as u32,
        });
    }
    for sink in 0..program.sinks.len() {
        steps.push(Step::RenderCollect { sink: sink as u32 });
    }
    let commit_start = steps.len();
    steps.extend(commits);

    let schedule = Schedule {
        steps,
        commit_start,
        slots,
        state_slots,
        scalar_len,
        field_buffers,
        state_len,
        max_count: program.domains.iter().map(|d| d.count).max().unwrap_or(0),
    };

    let cert = verify_schedule(&schedule, program, typed);
    let mut diagnostics = Vec::new();
    let failed = cert.failed();
    if !failed.is_empty() {
        diagnostics.push(
            Diagnostic::new(
                DiagLevel::Error,
                Location::patch(),
                format!("schedule verification failed: {}", failed.join(", ")),
            )
            .with_code(codes::E0602),
        );
    }
    debug!(
        steps = schedule.steps.len(),
        commits = schedule.phase2().len(),
        scalar_len = schedule.scalar_len,
        field_buffers = schedule.field_buffers,
        state_len = schedule.state_len,
        "built schedule"
    );
    ScheduleResult {
        schedule,
        cert,
        diagnostics,
    }
}

// ── Slot allocation ─────────────────────────────────────────────────────────

fn allocate_values(program: &LoweredProgram) -> (Vec<Option<Slot>>, usize, usize) {
    let mut scalar_len = 0;
    let mut buffers = 0;
    let mut slots = Vec::with_capacity(program.exprs.len());
    for (i, e) in program.exprs.iter().enumerate() {
        if e.is_state_write() {
            slots.push(None);
            continue;
        }
        let stride = e.ty.stride();
        let instance = match &e.op {
            ExprOp::SlotRead(SlotSource::Continuity(c)) => program.continuity[*c as usize].instance,
            _ => field_instance(program, ValueId(i as u32)),
        };
        slots.push(Some(match instance {
            Some(instance) => {
                buffers += 1;
                Slot::Field {
                    buffer: buffers - 1,
                    stride,
                    instance,
                }
            }
            None => {
                scalar_len += stride;
                Slot::Scalar {
                    offset: scalar_len - stride,
                    stride,
                }
            }
        }));
    }
    (slots, scalar_len, buffers)
}

/// Domain of a `many` value, found through the declarations lowering made.
fn field_instance(program: &LoweredProgram, v: ValueId) -> Option<InstanceIdx> {
    let inst = program.expr(v).ty.instance()?;
    program
        .domains
        .iter()
        .find(|d| &d.instance == inst)
        .map(|d| d.idx)
}

fn allocate_states(program: &LoweredProgram) -> (Vec<StateSlot>, usize) {
    let mut offset = 0;
    let slots = program
        .states
        .iter()
        .map(|s| {
            let count = s.instance.map_or(1, |i| program.domain(i).count);
            let slot = StateSlot {
                offset,
                stride: s.ty.stride(),
                count,
                instance: s.instance,
            };
            offset += slot.len();
            slot
        })
        .collect();
    (slots, offset)
}

/// First `vec2<world>` continuity target over `instance`: its positions
/// drive nearest-neighbour matching when elements carry no ids.
fn spatial_hint(program: &LoweredProgram, instance: InstanceIdx) -> Option<u32> {
    program
        .continuity
        .iter()
        .position(|c| {
            let ty = &program.expr(c.source).ty;
            c.instance == Some(instance) && ty.payload == PayloadType::Vec2 && ty.unit == Unit::World
        })
        .map(|i| i as u32)
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::EvalScalar { value } => write!(f, "eval v{}", value.0),
            Step::MaterializeField { value, instance } => {
                write!(f, "materialize v{} over i{}", value.0, instance.0)
            }
            Step::FireEvent { value } => write!(f, "fire v{}", value.0),
            Step::ContinuityMapBuild { instance, hint } => match hint {
                Some(h) => write!(f, "map_build i{} hint=continuity#{h}", instance.0),
                None => write!(f, "map_build i{}", instance.0),
            },
            Step::ContinuityApply { target } => write!(f, "apply continuity#{target}"),
            Step::RenderCollect { sink } => write!(f, "render sink#{sink}"),
            Step::WriteState { state, value } => {
                write!(f, "write_state s{} <- v{}", state.0, value.0)
            }
            Step::WriteFieldState {
                state,
                value,
                instance,
            } => write!(
                f,
                "write_field_state s{} <- v{} over i{}",
                state.0, value.0, instance.0
            ),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "slots: scalar={} fields={} state={} max_count={}",
            self.scalar_len, self.field_buffers, self.state_len, self.max_count
        )?;
        for (i, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(Slot::Scalar { offset, stride }) => {
                    writeln!(f, "  v{i} scalar[{offset}..{}]", offset + stride)?
                }
                Some(Slot::Field {
                    buffer,
                    stride,
                    instance,
                }) => writeln!(f, "  v{i} field#{buffer} x{stride} over i{}", instance.0)?,
                None => {}
            }
        }
        for (i, s) in self.state_slots.iter().enumerate() {
            writeln!(f, "  s{i} state[{}..{}]", s.offset, s.offset + s.len())?;
        }
        writeln!(f, "phase 1:")?;
        for step in self.phase1() {
            writeln!(f, "  {step}")?;
        }
        writeln!(f, "phase 2:")?;
        for step in self.phase2() {
            writeln!(f, "  {step}")?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;
    use crate::pipeline::{compile_stages, CompileOptions};
    use crate::stdlib::standard_registry;

    fn stages(p: &Patch) -> crate::pipeline::Stages {
        compile_stages(p, &standard_registry().unwrap(), &CompileOptions::default()).unwrap()
    }

    fn delay_loop() -> Patch {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("add", "Add");
        p.block("delay", "UnitDelay");
        p.connect(("time", "phase"), ("add", "a"));
        p.connect(("add", "out"), ("delay", "in"));
        p.connect(("delay", "out"), ("add", "b"));
        p
    }

    fn dots() -> Patch {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array").num("count", 4.0);
        p.block("line", "LineLayout");
        p.block("render", "Render");
        p.connect(("arr", "t"), ("line", "t"));
        p.connect(("line", "pos"), ("render", "pos"));
        p
    }

    #[test]
    fn state_writes_are_phase_two_only() {
        let s = stages(&delay_loop());
        let sched = &s.schedule;
        assert!(s.schedule_cert.all_pass(), "{:?}", s.schedule_cert);
        assert_eq!(sched.phase2().len(), 1);
        assert!(matches!(sched.phase2()[0], Step::WriteState { .. }));
        assert!(sched.phase1().iter().all(|st| !st.is_commit()));
    }

    #[test]
    fn fields_get_buffers_and_signals_get_scratch() {
        let s = stages(&dots());
        let sched = &s.schedule;
        assert!(sched.field_buffers >= 3);
        assert_eq!(sched.max_count, 4);
        let line = s.lowered.block_outputs[s.typed.graph.find("line").unwrap().idx.0 as usize][0];
        assert!(matches!(
            sched.slot(line),
            Some(Slot::Field { stride: 2, .. })
        ));
        let time = s.lowered.block_outputs[s.typed.graph.find("time").unwrap().idx.0 as usize][0];
        assert!(matches!(sched.slot(time), Some(Slot::Scalar { stride: 1, .. })));
    }

    #[test]
    fn map_build_uses_position_hint() {
        let s = stages(&dots());
        let build = s
            .schedule
            .steps
            .iter()
            .find(|st| matches!(st, Step::ContinuityMapBuild { .. }))
            .unwrap();
        let Step::ContinuityMapBuild { hint: Some(h), .. } = build else {
            panic!("no hint: {build:?}");
        };
        assert_eq!(s.lowered.continuity[*h as usize].key.as_str(), "render.pos");
    }

    #[test]
    fn phase_one_order_is_values_maps_applies_renders() {
        let s = stages(&dots());
        let rank = |st: &Step| match st {
            Step::EvalScalar { .. } | Step::MaterializeField { .. } | Step::FireEvent { .. } => 0,
            Step::ContinuityMapBuild { .. } => 1,
            Step::ContinuityApply { .. } => 2,
            Step::RenderCollect { .. } => 3,
            _ => 4,
        };
        let ranks: Vec<u8> = s.schedule.steps.iter().map(rank).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{ranks:?}");
    }

    #[test]
    fn verifier_catches_commit_in_phase_one() {
        let s = stages(&delay_loop());
        let mut bad = s.schedule.clone();
        let commit = bad.steps.remove(bad.commit_start);
        bad.steps.insert(0, commit);
        bad.commit_start += 1;
        let cert = verify_schedule(&bad, &s.lowered, &s.typed);
        assert!(!cert.s2_two_phase);
        assert!(!cert.s3_produced_before_read);
    }

    #[test]
    fn verifier_catches_double_write() {
        let s = stages(&delay_loop());
        let mut bad = s.schedule.clone();
        let commit = bad.steps[bad.commit_start].clone();
        bad.steps.push(commit);
        let cert = verify_schedule(&bad, &s.lowered, &s.typed);
        assert_eq!(cert.failed(), vec!["S4_single_writer"]);
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = stages(&dots()).schedule.fingerprint();
        let b = stages(&dots()).schedule.fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, stages(&delay_loop()).schedule.fingerprint());
    }
}
