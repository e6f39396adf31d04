// runtime/continuity.rs — Element mapping and value smoothing
//
// When a recompile changes a domain, each new element is matched to the
// old element it continues: by stable id first, then by nearest position,
// and with no match at all the domain crossfades. Continuity buffers then
// hold a per-component gauge offset (old effective value minus new base)
// that the target's policy keeps, decays or filters away.
//
// Buffers are keyed by `TargetKey`, never by slot index, so they survive
// recompiles that renumber values.

use std::collections::HashMap;

use crate::id::TargetKey;
use crate::ir::ContinuityPolicy;

// ── Element mapping ─────────────────────────────────────────────────────────

/// How this frame's elements relate to the previous frame's.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementMapping {
    /// The domain has no previous frame.
    Fresh,
    Identity,
    /// `new_to_old[j]` is the old index new element `j` continues, or -1.
    Remap(Vec<i64>),
    /// No usable mapping: values cut and render output crossfades.
    Crossfade,
}

/// What the runtime remembers about a domain between frames.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSnapshot {
    pub count: usize,
    pub element_ids: Option<Vec<u64>>,
}

pub fn map_by_ids(old: &[u64], new: &[u64]) -> Vec<i64> {
    let index: HashMap<u64, usize> = old.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    new.iter()
        .map(|id| index.get(id).map_or(-1, |&i| i as i64))
        .collect()
}

/// Greedy nearest-neighbour match on vec2 positions. New elements claim
/// the closest unclaimed old element within `radius`, in index order.
pub fn map_nearest(old_pos: &[f64], new_pos: &[f64], radius: f64) -> Vec<i64> {
    let old_n = old_pos.len() / 2;
    let mut taken = vec![false; old_n];
    let r2 = radius * radius;
    new_pos
        .chunks_exact(2)
        .map(|p| {
            let mut best: Option<(usize, f64)> = None;
            for (k, q) in old_pos.chunks_exact(2).enumerate() {
                if taken[k] {
                    continue;
                }
                let d2 = (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2);
                if d2 <= r2 && best.map_or(true, |(_, b)| d2 < b) {
                    best = Some((k, d2));
                }
            }
            match best {
                Some((k, _)) => {
                    taken[k] = true;
                    k as i64
                }
                None => -1,
            }
        })
        .collect()
}

/// Decide the mapping between two snapshots of one domain. `positions` is
/// `(old, new)` spatial-hint values when the domain has one.
pub fn build_mapping(
    old: &DomainSnapshot,
    new: &DomainSnapshot,
    positions: Option<(&[f64], &[f64])>,
    nn_radius: f64,
) -> ElementMapping {
    if let (Some(a), Some(b)) = (&old.element_ids, &new.element_ids) {
        return if a == b {
            ElementMapping::Identity
        } else {
            ElementMapping::Remap(map_by_ids(a, b))
        };
    }
    if let Some((old_pos, new_pos)) = positions {
        let map = map_nearest(old_pos, new_pos, nn_radius);
        if map.iter().any(|&m| m >= 0) || new.count == 0 {
            return ElementMapping::Remap(map);
        }
    }
    if old.count == new.count && old.element_ids.is_none() && new.element_ids.is_none() {
        return ElementMapping::Identity;
    }
    ElementMapping::Crossfade
}

// ── Buffers ─────────────────────────────────────────────────────────────────

/// `α = 1 − e^(−dt/τ)`; a non-positive τ snaps immediately.
pub fn smoothing_alpha(dt_ms: f64, tau_ms: f64) -> f64 {
    if tau_ms <= 0.0 {
        1.0
    } else {
        1.0 - (-dt_ms / tau_ms).exp()
    }
}

/// Per-target continuity memory. All vectors are `count × stride`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityBuffer {
    pub stride: usize,
    pub gauge: Vec<f64>,
    /// Slew filter output.
    pub y: Vec<f64>,
    /// Crossfade-policy start values.
    pub from: Vec<f64>,
    pub fade_start_ms: f64,
    /// Last effective (output) value.
    pub last: Vec<f64>,
    /// Re-anchor against the new base on the next apply.
    pub rebase: bool,
}

impl ContinuityBuffer {
    pub fn new(base: &[f64], stride: usize) -> Self {
        ContinuityBuffer {
            stride,
            gauge: vec![0.0; base.len()],
            y: base.to_vec(),
            from: base.to_vec(),
            fade_start_ms: 0.0,
            last: base.to_vec(),
            rebase: false,
        }
    }

    /// Hard cut to `base`.
    pub fn reset(&mut self, base: &[f64]) {
        *self = ContinuityBuffer::new(base, self.stride);
    }

    /// Start a gauge from the last effective values so the output does not
    /// jump. `map` is new→old; `None` keeps element positions.
    pub fn regauge(&mut self, base: &[f64], map: Option<&[i64]>, t_ms: f64) {
        let stride = self.stride.max(1);
        let old = std::mem::take(&mut self.last);
        let old_n = old.len() / stride;
        self.gauge = vec![0.0; base.len()];
        self.y = base.to_vec();
        for (j, b) in base.chunks(stride).enumerate() {
            let src = match map {
                None => Some(j),
                Some(m) => m.get(j).and_then(|&k| usize::try_from(k).ok()),
            };
            let Some(k) = src.filter(|&k| k < old_n) else {
                continue;
            };
            for (c, base_c) in b.iter().enumerate() {
                let o = old[k * stride + c];
                self.gauge[j * stride + c] = o - base_c;
                self.y[j * stride + c] = o;
            }
        }
        self.from = self.y.clone();
        self.fade_start_ms = t_ms;
        self.last = self.y.clone();
        self.rebase = false;
    }

    /// Produce this frame's output. `fresh` marks the frame that set the
    /// gauge: it is never decayed or filtered.
    pub fn step(&mut self, policy: ContinuityPolicy, base: &[f64], dt_ms: f64, t_ms: f64, fresh: bool, out: &mut [f64]) {
        match policy {
            ContinuityPolicy::None => out.copy_from_slice(base),
            ContinuityPolicy::Preserve => {
                for ((o, b), g) in out.iter_mut().zip(base).zip(&self.gauge) {
                    *o = b + g;
                }
            }
            ContinuityPolicy::Project { tau_ms } => {
                if !fresh {
                    let keep = 1.0 - smoothing_alpha(dt_ms, tau_ms);
                    self.gauge.iter_mut().for_each(|g| *g *= keep);
                }
                for ((o, b), g) in out.iter_mut().zip(base).zip(&self.gauge) {
                    *o = b + g;
                }
            }
            ContinuityPolicy::Slew { tau_ms } => {
                if !fresh {
                    let a = smoothing_alpha(dt_ms, tau_ms);
                    for (y, b) in self.y.iter_mut().zip(base) {
                        *y += a * (b - *y);
                    }
                }
                out.copy_from_slice(&self.y);
            }
            ContinuityPolicy::Crossfade { window_ms } => {
                let w = if window_ms <= 0.0 {
                    1.0
                } else {
                    ((t_ms - self.fade_start_ms) / window_ms).clamp(0.0, 1.0)
                };
                for ((o, b), f) in out.iter_mut().zip(base).zip(&self.from) {
                    *o = f * (1.0 - w) + b * w;
                }
            }
        }
        self.last.clear();
        self.last.extend_from_slice(out);
    }
}

/// Timing inputs for one apply.
#[derive(Debug, Clone, Copy)]
pub struct ApplyClock {
    pub dt_ms: f64,
    pub t_ms: f64,
}

/// Run one target's continuity: create or re-anchor its buffer as the
/// mapping requires, then step the policy into `out`.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    buffers: &mut HashMap<TargetKey, ContinuityBuffer>,
    key: &TargetKey,
    mapping: &ElementMapping,
    policy: ContinuityPolicy,
    base: &[f64],
    stride: usize,
    clock: ApplyClock,
    out: &mut [f64],
) {
    let mut fresh = false;
    let buf = buffers.entry(key.clone()).or_insert_with(|| {
        fresh = true;
        ContinuityBuffer::new(base, stride)
    });
    if !fresh {
        match mapping {
            ElementMapping::Remap(map) => {
                buf.regauge(base, Some(map), clock.t_ms);
                fresh = true;
            }
            ElementMapping::Crossfade => {
                buf.reset(base);
                fresh = true;
            }
            ElementMapping::Fresh | ElementMapping::Identity => {
                if buf.rebase || buf.last.len() != base.len() {
                    buf.regauge(base, None, clock.t_ms);
                    fresh = true;
                }
            }
        }
    }
    buf.step(policy, base, clock.dt_ms, clock.t_ms, fresh, out);
}

// ── Tests ───────────────────────────────────────────────────────────────────
