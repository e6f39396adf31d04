// ir.rs — Lowered value-expression IR
//
// One closed union (`ValueExpr`) covers every computed value: constants,
// external reads, per-element intrinsics, kernel calls, state access, time
// reads, event constructors and combinators, and continuity slot reads.
// Whether a value is a signal, a field or an event is read from its
// `CanonicalType`; the IR never tracks it separately.
//
// Kernels are the only place arithmetic happens. Each kernel is a pure
// function over one element's argument components; the executor iterates
// elements and broadcasts non-field arguments.

use std::f64::consts::TAU;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{InstanceIdx, StateId, TargetKey, ValueId};
use crate::types::{CanonicalType, InstanceRef};

// ── Kernels ─────────────────────────────────────────────────────────────────

/// Pure per-element computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Kernel {
    /// Component-wise `a + b` (shorter operand repeats).
    Add,
    /// Component-wise `a * b`.
    Mul,
    /// `a * b + c`, component-wise.
    MulAdd,
    /// Component-wise `a * k`.
    Scale(f64),
    /// Copy the single argument.
    Identity,
    /// `sin(2π·phase)`, phase in cycles.
    SinCycles,
    /// `start + t·(end − start)` for vec2 endpoints.
    Lerp2,
    /// `center + radius·(cos, sin)(2π·(t + phase))`.
    CirclePoint,
    /// HSV (hue in cycles) to RGBA with alpha 1.
    HsvToRgba,
    /// `cond != 0 ? a : b`.
    Select,
}

impl Kernel {
    pub fn name(self) -> &'static str {
        match self {
            Kernel::Add => "add",
            Kernel::Mul => "mul",
            Kernel::MulAdd => "mul_add",
            Kernel::Scale(_) => "scale",
            Kernel::Identity => "identity",
            Kernel::SinCycles => "sin_cycles",
            Kernel::Lerp2 => "lerp2",
            Kernel::CirclePoint => "circle_point",
            Kernel::HsvToRgba => "hsv_to_rgba",
            Kernel::Select => "select",
        }
    }

    /// Number of arguments the kernel takes.
    pub fn arity(self) -> usize {
        match self {
            Kernel::Scale(_) | Kernel::Identity | Kernel::SinCycles => 1,
            Kernel::Add | Kernel::Mul => 2,
            Kernel::MulAdd | Kernel::Lerp2 | Kernel::Select | Kernel::HsvToRgba => 3,
            Kernel::CirclePoint => 4,
        }
    }

    /// Evaluate one element. `args[k]` holds argument `k`'s components for
    /// this element; `out` has the result stride. Fails on the first
    /// argument that is missing or has no components.
    pub fn eval(self, args: &[&[f64]], out: &mut [f64]) -> Result<(), EmptyArgument> {
        if let Some(k) = (0..self.arity()).find(|&k| args.get(k).map_or(true, |a| a.is_empty())) {
            return Err(EmptyArgument(k));
        }
        let at = |k: usize, c: usize| -> f64 {
            let a = args[k];
            a[c % a.len()]
        };
        match self {
            Kernel::Add => {
                for (c, o) in out.iter_mut().enumerate() {
                    *o = at(0, c) + at(1, c);
                }
            }
            Kernel::Mul => {
                for (c, o) in out.iter_mut().enumerate() {
                    *o = at(0, c) * at(1, c);
                }
            }
            Kernel::MulAdd => {
                for (c, o) in out.iter_mut().enumerate() {
                    *o = at(0, c) * at(1, c) + at(2, c);
                }
            }
            Kernel::Scale(k) => {
                for (c, o) in out.iter_mut().enumerate() {
                    *o = at(0, c) * k;
                }
            }
            Kernel::Identity => {
                for (c, o) in out.iter_mut().enumerate() {
                    *o = at(0, c);
                }
            }
            Kernel::SinCycles => {
                for (c, o) in out.iter_mut().enumerate() {
                    *o = (TAU * at(0, c)).sin();
                }
            }
            Kernel::Lerp2 => {
                let t = at(0, 0);
                for (c, o) in out.iter_mut().enumerate() {
                    let (a, b) = (at(1, c), at(2, c));
                    *o = a + t * (b - a);
                }
            }
            Kernel::CirclePoint => {
                let angle = TAU * (at(0, 0) + at(3, 0));
                let r = at(2, 0);
                if let [x, y, ..] = out {
                    *x = at(1, 0) + r * angle.cos();
                    *y = at(1, 1) + r * angle.sin();
                }
            }
            Kernel::HsvToRgba => {
                let rgb = hsv_to_rgb(at(0, 0), at(1, 0), at(2, 0));
                for (c, o) in out.iter_mut().enumerate() {
                    *o = if c < 3 { rgb[c] } else { 1.0 };
                }
            }
            Kernel::Select => {
                let pick = if at(0, 0) != 0.0 { 1 } else { 2 };
                for (c, o) in out.iter_mut().enumerate() {
                    *o = at(pick, c);
                }
            }
        }
        Ok(())
    }
}

/// Index of a kernel argument with no components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyArgument(pub usize);

fn hsv_to_rgb(hue: f64, sat: f64, val: f64) -> [f64; 3] {
    let h = hue.rem_euclid(1.0) * 6.0;
    let i = h.floor();
    let f = h - i;
    let p = val * (1.0 - sat);
    let q = val * (1.0 - sat * f);
    let t = val * (1.0 - sat * (1.0 - f));
    match i as u32 {
        0 => [val, t, p],
        1 => [q, val, p],
        2 => [p, val, t],
        3 => [p, q, val],
        4 => [t, p, val],
        _ => [val, p, q],
    }
}

// ── Expression operands ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeSignal {
    /// Seconds since the first frame.
    Seconds,
    /// Position within the time root's period, in cycles.
    Phase,
    /// Seconds since the previous frame.
    Dt,
    /// Fires on frames where the phase wrapped.
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Intrinsic {
    Index,
    /// `i / (n − 1)`; `0.5` when the domain has one element.
    NormalizedIndex,
    /// Deterministic hash of the element id into `[0, 1)`.
    RandomId,
    /// `i / n`: evenly spaced around a closed loop, never reaching 1.
    CyclicIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CombineMode {
    Any,
    All,
}

/// Where a slot read gets its value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SlotSource {
    /// Output of the continuity target at this index.
    Continuity(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprOp {
    Const { value: Vec<f64> },
    External { channel: String, default: Vec<f64> },
    Intrinsic(Intrinsic),
    Kernel { kernel: Kernel, args: Vec<ValueId> },
    StateRead { state: StateId },
    StateWrite { state: StateId, value: ValueId },
    Time(TimeSignal),
    EventNever,
    /// Fires when `value` crosses `level` upward since `previous`.
    EventEdge {
        value: ValueId,
        previous: ValueId,
        level: ValueId,
    },
    EventCombine { mode: CombineMode, args: Vec<ValueId> },
    SlotRead(SlotSource),
}

/// One IR node. Every node carries its resolved type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueExpr {
    pub ty: CanonicalType,
    pub op: ExprOp,
}

impl ValueExpr {
    /// Values this expression reads.
    pub fn operands(&self) -> Vec<ValueId> {
        match &self.op {
            ExprOp::Kernel { args, .. } | ExprOp::EventCombine { args, .. } => args.clone(),
            ExprOp::StateWrite { value, .. } => vec![*value],
            ExprOp::EventEdge {
                value,
                previous,
                level,
            } => vec![*value, *previous, *level],
            _ => Vec::new(),
        }
    }

    pub fn is_state_write(&self) -> bool {
        matches!(self.op, ExprOp::StateWrite { .. })
    }
}

impl fmt::Display for ExprOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(ids: &[ValueId]) -> String {
            ids.iter()
                .map(|v| format!("v{}", v.0))
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            ExprOp::Const { value } => write!(f, "const {value:?}"),
            ExprOp::External { channel, default } => {
                write!(f, "external '{channel}' default {default:?}")
            }
            ExprOp::Intrinsic(i) => write!(f, "intrinsic {i:?}"),
            ExprOp::Kernel { kernel, args } => match kernel {
                Kernel::Scale(k) => write!(f, "kernel scale({k})({})", list(args)),
                _ => write!(f, "kernel {}({})", kernel.name(), list(args)),
            },
            ExprOp::StateRead { state } => write!(f, "state_read s{}", state.0),
            ExprOp::StateWrite { state, value } => {
                write!(f, "state_write s{} <- v{}", state.0, value.0)
            }
            ExprOp::Time(s) => write!(f, "time {s:?}"),
            ExprOp::EventNever => write!(f, "event never"),
            ExprOp::EventEdge {
                value,
                previous,
                level,
            } => write!(
                f,
                "event edge(v{}, prev v{}, level v{})",
                value.0, previous.0, level.0
            ),
            ExprOp::EventCombine { mode, args } => {
                write!(f, "event {:?}({})", mode, list(args))
            }
            ExprOp::SlotRead(SlotSource::Continuity(c)) => write!(f, "slot_read continuity#{c}"),
        }
    }
}

// ── Declarations ────────────────────────────────────────────────────────────

/// A persistent state cell that survives across frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDecl {
    pub id: StateId,
    /// Stable key used by hot-swap migration.
    pub key: TargetKey,
    pub ty: CanonicalType,
    /// One element's initial components.
    pub initial: Vec<f64>,
    /// Domain the state is laid out over, if it is per-element.
    pub instance: Option<InstanceIdx>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    Stable,
    None,
}

/// A domain of elements created by a domain block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainDecl {
    pub idx: InstanceIdx,
    pub instance: InstanceRef,
    pub count: usize,
    /// Stable per-element ids, present when `identity == Stable`.
    pub element_ids: Option<Vec<u64>>,
    pub identity: IdentityMode,
}

impl DomainDecl {
    pub fn new(idx: InstanceIdx, instance: InstanceRef, count: usize, identity: IdentityMode) -> Self {
        let element_ids = match identity {
            IdentityMode::Stable => Some((0..count as u64).collect()),
            IdentityMode::None => None,
        };
        DomainDecl {
            idx,
            instance,
            count,
            element_ids,
            identity,
        }
    }
}

/// How a continuity target smooths changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContinuityPolicy {
    /// Hard cut.
    None,
    /// Gauge offsets persist indefinitely.
    Preserve,
    /// Low-pass filter toward the base value every frame.
    Slew { tau_ms: f64 },
    /// Gauge offsets decay toward zero.
    Project { tau_ms: f64 },
    /// Blend old and new output over a fixed window.
    Crossfade { window_ms: f64 },
}

/// A value whose output is made continuous across recompiles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuityTarget {
    pub key: TargetKey,
    /// The raw (base) value.
    pub source: ValueId,
    /// The `SlotRead` value carrying the smoothed output.
    pub output: ValueId,
    /// `None` defers to the runtime configuration.
    pub policy: Option<ContinuityPolicy>,
    pub instance: Option<InstanceIdx>,
    pub stride: usize,
}

/// Render sink: per-element draw instructions over one domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderSink {
    pub key: TargetKey,
    pub instance: InstanceIdx,
    pub pos: ValueId,
    pub color: ValueId,
    pub size: ValueId,
    pub shape: ValueId,
}

/// Period of the patch's time root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeModel {
    pub period_ms: f64,
}

impl Default for TimeModel {
    fn default() -> Self {
        TimeModel { period_ms: 1000.0 }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(k: Kernel, args: &[&[f64]], stride: usize) -> Vec<f64> {
        let mut out = vec![0.0; stride];
        k.eval(args, &mut out).unwrap();
        out
    }

    #[test]
    fn empty_or_missing_arguments_are_reported() {
        let mut out = [0.0; 2];
        assert_eq!(
            Kernel::Add.eval(&[&[1.0], &[]], &mut out),
            Err(EmptyArgument(1))
        );
        assert_eq!(Kernel::MulAdd.eval(&[&[1.0], &[2.0]], &mut out), Err(EmptyArgument(2)));
        assert_eq!(out, [0.0; 2]);
    }

    #[test]
    fn arithmetic_broadcasts_short_operands() {
        assert_eq!(eval(Kernel::Add, &[&[1.0, 2.0], &[10.0]], 2), vec![11.0, 12.0]);
        assert_eq!(eval(Kernel::Mul, &[&[3.0], &[2.0, 4.0]], 2), vec![6.0, 12.0]);
        assert_eq!(eval(Kernel::MulAdd, &[&[2.0], &[3.0], &[1.0]], 1), vec![7.0]);
        assert_eq!(eval(Kernel::Scale(0.5), &[&[4.0, 8.0]], 2), vec![2.0, 4.0]);
    }

    #[test]
    fn sin_uses_cycles() {
        let v = eval(Kernel::SinCycles, &[&[0.25]], 1);
        assert!((v[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lerp_and_circle() {
        let p = eval(Kernel::Lerp2, &[&[0.5], &[0.0, 0.0], &[1.0, 2.0]], 2);
        assert_eq!(p, vec![0.5, 1.0]);
        let c = eval(Kernel::CirclePoint, &[&[0.0], &[1.0, 1.0], &[2.0], &[0.0]], 2);
        assert!((c[0] - 3.0).abs() < 1e-12 && (c[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn hsv_primary_hues() {
        assert_eq!(
            eval(Kernel::HsvToRgba, &[&[0.0], &[1.0], &[1.0]], 4),
            vec![1.0, 0.0, 0.0, 1.0]
        );
        let green = eval(Kernel::HsvToRgba, &[&[1.0 / 3.0], &[1.0], &[1.0]], 4);
        assert!((green[1] - 1.0).abs() < 1e-9 && green[0].abs() < 1e-9);
    }

    #[test]
    fn select_picks_by_condition() {
        assert_eq!(eval(Kernel::Select, &[&[1.0], &[5.0], &[7.0]], 1), vec![5.0]);
        assert_eq!(eval(Kernel::Select, &[&[0.0], &[5.0], &[7.0]], 1), vec![7.0]);
    }

    #[test]
    fn stable_domains_issue_sequential_ids() {
        let d = DomainDecl::new(
            InstanceIdx(0),
            InstanceRef::new("array", "dots"),
            3,
            IdentityMode::Stable,
        );
        assert_eq!(d.element_ids, Some(vec![0, 1, 2]));
        let n = DomainDecl::new(
            InstanceIdx(0),
            InstanceRef::new("array", "dots"),
            3,
            IdentityMode::None,
        );
        assert!(n.element_ids.is_none());
    }

    #[test]
    fn display_names_operands() {
        let op = ExprOp::Kernel {
            kernel: Kernel::Add,
            args: vec![ValueId(1), ValueId(2)],
        };
        assert_eq!(op.to_string(), "kernel add(v1, v2)");
    }
}
