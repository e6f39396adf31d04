// runtime/state.rs — Persistent runtime state and hot-swap migration
//
// Preconditions: a `RuntimeState` is created from the program it runs and
//   only changes program through `hot_swap`.
// Postconditions: after `hot_swap(old, new)` the state array has `new`'s
//   layout; every state cell whose `TargetKey` exists in both programs
//   holds its old value (per element through the id map), all others hold
//   their declared initial value.
// Failure modes: none; a state array that does not match `old` is
//   reinitialized rather than misread.
// Side effects: emits tracing events.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use super::continuity::{map_by_ids, ContinuityBuffer, DomainSnapshot, ElementMapping};
use super::render::{DrawInstruction, Fade};
use crate::config::RuntimeConfig;
use crate::id::{InstanceIdx, TargetKey};
use crate::ir::{DomainDecl, StateDecl, TimeModel};
use crate::lower::LoweredProgram;
use crate::pipeline::CompiledProgramIR;
use crate::types::InstanceRef;

// ── Time ────────────────────────────────────────────────────────────────────

/// Frame clock derived from the host's wall clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimeState {
    /// Wall-clock time of the first frame.
    pub start_ms: Option<f64>,
    pub last_ms: Option<f64>,
    /// Milliseconds since the first frame.
    pub t_ms: f64,
    /// Milliseconds since the previous frame; 0 on the first frame.
    pub dt_ms: f64,
    /// Position in the time root's period, in cycles.
    pub phase: f64,
    /// Whether the phase wrapped on this frame.
    pub wrapped: bool,
    /// Completed periods.
    pub cycle: u64,
}

impl TimeState {
    pub fn advance(&mut self, wall_ms: f64, model: TimeModel) {
        let first = self.last_ms.is_none();
        let start = *self.start_ms.get_or_insert(wall_ms);
        self.dt_ms = self.last_ms.map_or(0.0, |last| (wall_ms - last).max(0.0));
        self.last_ms = Some(wall_ms);
        self.t_ms = (wall_ms - start).max(0.0);
        let cycle = (self.t_ms / model.period_ms).floor() as u64;
        self.wrapped = !first && cycle > self.cycle;
        self.cycle = cycle;
        self.phase = self.t_ms.rem_euclid(model.period_ms) / model.period_ms;
    }

    fn rebase_period(&mut self, model: TimeModel) {
        self.cycle = (self.t_ms / model.period_ms).floor() as u64;
    }
}

// ── Migration report ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// State cells that kept their values.
    pub carried: Vec<TargetKey>,
    /// New or incompatible cells, started from their initial value.
    pub reinitialized: Vec<TargetKey>,
    /// Old cells with no counterpart.
    pub dropped: Vec<TargetKey>,
    /// Continuity buffers carried into the new program.
    pub continuity: Vec<TargetKey>,
    /// Domains whose element set changed.
    pub remapped_domains: Vec<String>,
}

// ── Runtime state ───────────────────────────────────────────────────────────

/// Everything that survives from one frame to the next.
pub struct RuntimeState {
    pub config: RuntimeConfig,
    pub time: TimeState,
    /// Persistent state cells, laid out by `Schedule::state_slots`.
    pub(crate) state: Vec<f64>,
    /// Per-frame scalar scratch.
    pub(crate) scalars: Vec<f64>,
    pub(crate) continuity: HashMap<TargetKey, ContinuityBuffer>,
    /// Element sets seen on the last map build.
    pub(crate) domains: HashMap<InstanceRef, DomainSnapshot>,
    /// Domains changed by a hot swap and not yet remapped.
    pub(crate) pending: HashSet<InstanceRef>,
    /// This frame's mapping, indexed by `InstanceIdx`.
    pub(crate) mappings: Vec<ElementMapping>,
    pub(crate) last_draw: HashMap<TargetKey, Vec<DrawInstruction>>,
    pub(crate) fades: HashMap<TargetKey, Fade>,
    pub(crate) frame: u64,
}

/// Frame-mutable parts of a `RuntimeState`. The state array is not
/// included: Phase 2 commits are staged and only land on success.
pub(crate) struct Checkpoint {
    time: TimeState,
    continuity: HashMap<TargetKey, ContinuityBuffer>,
    domains: HashMap<InstanceRef, DomainSnapshot>,
    pending: HashSet<InstanceRef>,
    mappings: Vec<ElementMapping>,
    last_draw: HashMap<TargetKey, Vec<DrawInstruction>>,
    fades: HashMap<TargetKey, Fade>,
}

impl RuntimeState {
    pub fn new(program: &CompiledProgramIR) -> Self {
        Self::with_config(program, RuntimeConfig::default())
    }

    pub fn with_config(program: &CompiledProgramIR, config: RuntimeConfig) -> Self {
        RuntimeState {
            config,
            time: TimeState::default(),
            state: initial_state(program),
            scalars: vec![0.0; program.schedule.scalar_len],
            continuity: HashMap::new(),
            domains: HashMap::new(),
            pending: HashSet::new(),
            mappings: vec![ElementMapping::Fresh; program.program.domains.len()],
            last_draw: HashMap::new(),
            fades: HashMap::new(),
            frame: 0,
        }
    }

    /// Frames executed so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Current value of the state cell `key`, all elements.
    pub fn state_value(&self, program: &CompiledProgramIR, key: &str) -> Option<&[f64]> {
        let decl = program.program.states.iter().find(|s| s.key.as_str() == key)?;
        let slot = program.schedule.state_slots.get(decl.id.0 as usize)?;
        self.state.get(slot.offset..slot.offset + slot.len())
    }

    pub fn continuity_buffer(&self, key: &str) -> Option<&ContinuityBuffer> {
        self.continuity.get(&TargetKey(key.to_string()))
    }

    /// Copy everything a frame changes before its commits.
    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            time: self.time,
            continuity: self.continuity.clone(),
            domains: self.domains.clone(),
            pending: self.pending.clone(),
            mappings: self.mappings.clone(),
            last_draw: self.last_draw.clone(),
            fades: self.fades.clone(),
        }
    }

    /// Roll back to `c` after a failed frame.
    pub(crate) fn restore(&mut self, c: Checkpoint) {
        self.time = c.time;
        self.continuity = c.continuity;
        self.domains = c.domains;
        self.pending = c.pending;
        self.mappings = c.mappings;
        self.last_draw = c.last_draw;
        self.fades = c.fades;
    }

    pub(crate) fn mapping(&self, instance: Option<InstanceIdx>) -> &ElementMapping {
        static IDENTITY: ElementMapping = ElementMapping::Identity;
        match instance {
            Some(i) => self.mappings.get(i.0 as usize).unwrap_or(&IDENTITY),
            None => &IDENTITY,
        }
    }

    /// Move this state from `old` to `new` between frames.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn hot_swap(&mut self, old: &CompiledProgramIR, new: &CompiledProgramIR) -> MigrationReport {
        let mut report = MigrationReport::default();
        let layout_ok = self.state.len() == old.schedule.state_len;
        let mut next = initial_state(new);

        let old_by_key: HashMap<&TargetKey, &StateDecl> =
            old.program.states.iter().map(|s| (&s.key, s)).collect();
        for s in &new.program.states {
            let compatible = old_by_key.get(&s.key).filter(|o| {
                layout_ok && o.ty.stride() == s.ty.stride() && o.instance.is_some() == s.instance.is_some()
            });
            let Some(o) = compatible else {
                report.reinitialized.push(s.key.clone());
                continue;
            };
            let from = old.schedule.state_slots[o.id.0 as usize];
            let to = new.schedule.state_slots[s.id.0 as usize];
            let map = element_map(
                o.instance.map(|i| old.program.domain(i)),
                s.instance.map(|i| new.program.domain(i)),
            );
            let stride = to.stride;
            for (j, &k) in map.iter().enumerate().take(to.count) {
                let Ok(k) = usize::try_from(k) else { continue };
                if k >= from.count {
                    continue;
                }
                let src = from.offset + k * stride;
                let dst = to.offset + j * stride;
                next[dst..dst + stride].copy_from_slice(&self.state[src..src + stride]);
            }
            report.carried.push(s.key.clone());
        }
        let new_keys: HashSet<&TargetKey> = new.program.states.iter().map(|s| &s.key).collect();
        report.dropped = old
            .program
            .states
            .iter()
            .filter(|s| !new_keys.contains(&s.key))
            .map(|s| s.key.clone())
            .collect();
        self.state = next;

        let targets: HashMap<&TargetKey, usize> = new
            .program
            .continuity
            .iter()
            .map(|c| (&c.key, c.stride))
            .collect();
        self.continuity
            .retain(|key, buf| targets.get(key).is_some_and(|&stride| stride == buf.stride));
        for (key, buf) in self.continuity.iter_mut() {
            buf.rebase = true;
            report.continuity.push(key.clone());
        }
        report.continuity.sort();

        let live: HashSet<&InstanceRef> = new.program.domains.iter().map(|d| &d.instance).collect();
        self.domains.retain(|inst, _| live.contains(inst));
        for d in &new.program.domains {
            if let Some(seen) = self.domains.get(&d.instance) {
                if *seen != snapshot(d) {
                    self.pending.insert(d.instance.clone());
                    report.remapped_domains.push(d.instance.to_string());
                }
            }
        }

        let sinks: HashSet<&TargetKey> = new.program.sinks.iter().map(|s| &s.key).collect();
        self.last_draw.retain(|k, _| sinks.contains(k));
        self.fades.retain(|k, _| sinks.contains(k));

        self.scalars = vec![0.0; new.schedule.scalar_len];
        self.mappings = vec![ElementMapping::Fresh; new.program.domains.len()];
        self.time.rebase_period(new.program.time_model);

        info!(
            carried = report.carried.len(),
            reinitialized = report.reinitialized.len(),
            dropped = report.dropped.len(),
            remapped_domains = report.remapped_domains.len(),
            "hot swap"
        );
        report
    }
}

pub(crate) fn snapshot(d: &DomainDecl) -> DomainSnapshot {
    DomainSnapshot {
        count: d.count,
        element_ids: d.element_ids.clone(),
    }
}

fn initial_state(program: &CompiledProgramIR) -> Vec<f64> {
    let mut state = vec![0.0; program.schedule.state_len];
    fill_initial(&program.program, &program.schedule.state_slots, &mut state);
    state
}

fn fill_initial(program: &LoweredProgram, slots: &[crate::schedule::StateSlot], state: &mut [f64]) {
    for decl in &program.states {
        let slot = slots[decl.id.0 as usize];
        for e in 0..slot.count {
            let at = slot.offset + e * slot.stride;
            state[at..at + slot.stride].copy_from_slice(&decl.initial);
        }
    }
    debug!(cells = program.states.len(), len = state.len(), "initialized state");
}

/// New→old element indices between two layouts of one state cell.
fn element_map(old: Option<&DomainDecl>, new: Option<&DomainDecl>) -> Vec<i64> {
    match (old, new) {
        (Some(o), Some(n)) => match (&o.element_ids, &n.element_ids) {
            (Some(a), Some(b)) => map_by_ids(a, b),
            _ => (0..n.count)
                .map(|j| if j < o.count { j as i64 } else { -1 })
                .collect(),
        },
        _ => vec![0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_has_zero_dt_and_no_wrap() {
        let mut t = TimeState::default();
        let model = TimeModel { period_ms: 1000.0 };
        t.advance(5000.0, model);
        assert_eq!(t.t_ms, 0.0);
        assert_eq!(t.dt_ms, 0.0);
        assert!(!t.wrapped);
        t.advance(5250.0, model);
        assert_eq!(t.dt_ms, 250.0);
        assert!((t.phase - 0.25).abs() < 1e-12);
        t.advance(6100.0, model);
        assert!(t.wrapped);
        assert!((t.phase - 0.1).abs() < 1e-9);
        t.advance(6200.0, model);
        assert!(!t.wrapped);
    }

    #[test]
    fn clock_going_backwards_clamps_dt() {
        let mut t = TimeState::default();
        let model = TimeModel::default();
        t.advance(100.0, model);
        t.advance(50.0, model);
        assert_eq!(t.dt_ms, 0.0);
        assert_eq!(t.t_ms, 0.0);
    }

    #[test]
    fn element_map_by_ids_and_by_index() {
        use crate::ir::IdentityMode;
        let inst = InstanceRef::new("array", "arr");
        let old = DomainDecl::new(InstanceIdx(0), inst.clone(), 3, IdentityMode::Stable);
        let new = DomainDecl::new(InstanceIdx(0), inst.clone(), 2, IdentityMode::Stable);
        assert_eq!(element_map(Some(&old), Some(&new)), vec![0, 1]);
        let old = DomainDecl::new(InstanceIdx(0), inst.clone(), 1, IdentityMode::None);
        let new = DomainDecl::new(InstanceIdx(0), inst, 3, IdentityMode::None);
        assert_eq!(element_map(Some(&old), Some(&new)), vec![0, -1, -1]);
        assert_eq!(element_map(None, None), vec![0]);
    }
}
