// runtime/executor.rs — Two-phase frame execution
//
// Runs one frame of a compiled schedule. Phase 1 advances the clock,
// computes every value from last frame's state, builds continuity
// mappings, applies continuity and assembles draw instructions. Phase 2
// copies next-frame values into the persistent state array.
//
// Preconditions: `state` was created for `program` (or hot-swapped to it).
// Postconditions: on `Ok`, the state array holds next-frame state and the
//   draw list holds one instruction per rendered element.
// Failure modes: `RuntimeError` for slots, strides, operands or references
//   the schedule does not back; `state` is rolled back to where the frame
//   started. Missing external channels and continuity fallbacks are
//   warnings, not errors.
// Side effects: grows `BufferPool`; mutates `state`.

use tracing::debug;

use super::continuity::{self, ApplyClock, ElementMapping};
use super::render::{self, Fade, SinkValues};
use super::state::{snapshot, RuntimeState};
use super::{ExternalInputs, FrameResult, RuntimeError};
use crate::diag::{codes, DiagLevel, Diagnostic, Location};
use crate::id::{InstanceIdx, StateId, ValueId};
use crate::ir::{CombineMode, ContinuityTarget, EmptyArgument, ExprOp, Intrinsic, TimeSignal};
use crate::lower::LoweredProgram;
use crate::pipeline::CompiledProgramIR;
use crate::schedule::{Schedule, Slot, Step};

// ── Buffer pool ─────────────────────────────────────────────────────────────

/// Pooled per-field buffers. Buffers only grow, so steady-state frames
/// allocate nothing for field values.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<Vec<f64>>,
    /// Reused output scratch for scalar values.
    scratch: Vec<f64>,
    /// Reused copy of a continuity target's base value.
    base: Vec<f64>,
    grown: u64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every field buffer the schedule uses at least `count × stride`.
    fn prepare(&mut self, schedule: &Schedule, program: &LoweredProgram) {
        if self.buffers.len() < schedule.field_buffers {
            self.buffers.resize_with(schedule.field_buffers, Vec::new);
        }
        for slot in schedule.slots.iter().flatten() {
            if let Slot::Field {
                buffer,
                stride,
                instance,
            } = *slot
            {
                let need = program.domain(instance).count * stride;
                let buf = &mut self.buffers[buffer];
                if buf.len() < need {
                    buf.resize(need, 0.0);
                    self.grown += 1;
                }
            }
        }
    }

    /// Total `f64`s held.
    pub fn capacity(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    /// How many times any buffer had to grow.
    pub fn grow_count(&self) -> u64 {
        self.grown
    }
}

// ── Operands ────────────────────────────────────────────────────────────────

/// A computed value as seen by its consumers.
#[derive(Clone, Copy)]
enum Operand<'a> {
    /// One element, broadcast to every consumer element.
    Scalar(&'a [f64]),
    Field { data: &'a [f64], stride: usize },
}

impl<'a> Operand<'a> {
    /// Components of element `i`. `v` names the operand in the error.
    fn element(self, v: ValueId, i: usize) -> Result<&'a [f64], RuntimeError> {
        let el = match self {
            Operand::Scalar(s) => Some(s),
            Operand::Field { data, stride } => data.get(i * stride..(i + 1) * stride),
        };
        el.filter(|e| !e.is_empty())
            .ok_or(RuntimeError::MissingOperand { value: v.0, element: i })
    }

    fn data(self) -> &'a [f64] {
        match self {
            Operand::Scalar(s) | Operand::Field { data: s, .. } => s,
        }
    }

    fn flag(self, v: ValueId, i: usize) -> Result<bool, RuntimeError> {
        Ok(self.first(v, i)? != 0.0)
    }

    fn first(self, v: ValueId, i: usize) -> Result<f64, RuntimeError> {
        Ok(self.element(v, i)?[0])
    }
}

// ── Frame driver ────────────────────────────────────────────────────────────

/// Execute one frame at host time `wall_ms`.
#[tracing::instrument(level = "debug", skip_all, fields(frame = state.frame))]
pub fn execute_frame(
    program: &CompiledProgramIR,
    state: &mut RuntimeState,
    pool: &mut BufferPool,
    wall_ms: f64,
    inputs: &ExternalInputs,
) -> Result<FrameResult, RuntimeError> {
    let schedule = &program.schedule;
    if state.state.len() != schedule.state_len {
        return Err(RuntimeError::StateLayout {
            expected: schedule.state_len,
            found: state.state.len(),
        });
    }
    if state.scalars.len() < schedule.scalar_len {
        state.scalars.resize(schedule.scalar_len, 0.0);
    }
    if state.mappings.len() != program.program.domains.len() {
        state.mappings = vec![ElementMapping::Fresh; program.program.domains.len()];
    }
    pool.prepare(schedule, &program.program);

    // Commits are staged, so a failing frame leaves the state array untouched.
    let checkpoint = state.checkpoint();
    state.time.advance(wall_ms, program.program.time_model);

    let mut frame = Frame {
        program: &program.program,
        schedule,
        state,
        pool,
        inputs,
        out: FrameResult::default(),
    };
    let result = frame.run();
    let mut out = frame.out;
    if let Err(e) = result {
        state.restore(checkpoint);
        return Err(e);
    }
    state.frame += 1;
    debug!(
        draw = out.draw.len(),
        warnings = out.diagnostics.len(),
        t_ms = state.time.t_ms,
        "frame complete"
    );
    out.draw.shrink_to_fit();
    Ok(out)
}

struct Frame<'a> {
    program: &'a LoweredProgram,
    schedule: &'a Schedule,
    state: &'a mut RuntimeState,
    pool: &'a mut BufferPool,
    inputs: &'a ExternalInputs,
    out: FrameResult,
}

impl<'a> Frame<'a> {
    fn run(&mut self) -> Result<(), RuntimeError> {
        let schedule = self.schedule;
        for step in schedule.phase1() {
            self.step(step)?;
        }
        let mut staged: Vec<(usize, Vec<f64>)> = Vec::with_capacity(schedule.phase2().len());
        for step in schedule.phase2() {
            staged.push(self.stage_commit(step)?);
        }
        for (offset, values) in staged {
            self.state.state[offset..offset + values.len()].copy_from_slice(&values);
        }
        Ok(())
    }

    fn step(&mut self, step: &Step) -> Result<(), RuntimeError> {
        match *step {
            Step::EvalScalar { value } | Step::MaterializeField { value, .. } | Step::FireEvent { value } => {
                self.eval(value)
            }
            Step::ContinuityMapBuild { instance, hint } => self.map_build(instance, hint),
            Step::ContinuityApply { target } => self.apply(target),
            Step::RenderCollect { sink } => self.render(sink),
            Step::WriteState { .. } | Step::WriteFieldState { .. } => Ok(()),
        }
    }

    // ── Value access ────────────────────────────────────────────────────────

    fn slot(&self, v: ValueId) -> Result<Slot, RuntimeError> {
        self.schedule.slot(v).ok_or(RuntimeError::MissingSlot(v.0))
    }

    fn count(&self, instance: InstanceIdx) -> Result<usize, RuntimeError> {
        self.program
            .domains
            .get(instance.0 as usize)
            .map(|d| d.count)
            .ok_or(RuntimeError::UnknownReference {
                what: "instance",
                index: instance.0,
            })
    }

    fn read(&self, v: ValueId) -> Result<Operand<'_>, RuntimeError> {
        match self.slot(v)? {
            Slot::Scalar { offset, stride } => self
                .state
                .scalars
                .get(offset..offset + stride)
                .map(Operand::Scalar)
                .ok_or(RuntimeError::MissingSlot(v.0)),
            Slot::Field {
                buffer,
                stride,
                instance,
            } => {
                let len = self.count(instance)? * stride;
                self.pool
                    .buffers
                    .get(buffer)
                    .and_then(|b| b.get(..len))
                    .map(|data| Operand::Field { data, stride })
                    .ok_or(RuntimeError::MissingSlot(v.0))
            }
        }
    }

    // ── Evaluation ──────────────────────────────────────────────────────────

    fn eval(&mut self, v: ValueId) -> Result<(), RuntimeError> {
        let slot = self.slot(v)?;
        let (count, stride) = match slot {
            Slot::Scalar { stride, .. } => (1, stride),
            Slot::Field { stride, instance, .. } => (self.count(instance)?, stride),
        };
        let mut out = match slot {
            Slot::Field { buffer, .. } => std::mem::take(&mut self.pool.buffers[buffer]),
            Slot::Scalar { .. } => std::mem::take(&mut self.pool.scratch),
        };
        if out.len() < count * stride {
            out.resize(count * stride, 0.0);
        }
        let instance = match slot {
            Slot::Field { instance, .. } => Some(instance),
            Slot::Scalar { .. } => None,
        };
        let result = self.compute(v, instance, count, stride, &mut out[..count * stride]);
        match slot {
            Slot::Field { buffer, .. } => self.pool.buffers[buffer] = out,
            Slot::Scalar { offset, .. } => {
                if result.is_ok() {
                    self.state.scalars[offset..offset + stride].copy_from_slice(&out[..stride]);
                }
                self.pool.scratch = out;
            }
        }
        result
    }

    fn compute(
        &mut self,
        v: ValueId,
        instance: Option<InstanceIdx>,
        count: usize,
        stride: usize,
        out: &mut [f64],
    ) -> Result<(), RuntimeError> {
        let (program, inputs) = (self.program, self.inputs);
        let expr = program
            .exprs
            .get(v.0 as usize)
            .ok_or(RuntimeError::UnknownReference {
                what: "value",
                index: v.0,
            })?;
        match &expr.op {
            ExprOp::Const { value } => fill(v, out, stride, value)?,
            ExprOp::External { channel, default } => match inputs.get(channel) {
                Some(values) if !values.is_empty() => fill(v, out, stride, values)?,
                _ => {
                    fill(v, out, stride, default)?;
                    self.out.diagnostics.push(
                        Diagnostic::new(
                            DiagLevel::Warning,
                            Location::block(program.block_ids[program.expr_block[v.0 as usize].0 as usize].clone()),
                            format!("external channel '{channel}' not supplied; using default"),
                        )
                        .with_code(codes::W0500),
                    );
                }
            },
            ExprOp::Intrinsic(which) => {
                let ids = instance.and_then(|i| program.domain(i).element_ids.as_deref());
                for (i, o) in out.chunks_mut(stride).enumerate() {
                    let x = match which {
                        Intrinsic::Index => i as f64,
                        Intrinsic::NormalizedIndex if count <= 1 => 0.5,
                        Intrinsic::NormalizedIndex => i as f64 / (count - 1) as f64,
                        Intrinsic::CyclicIndex => i as f64 / count as f64,
                        Intrinsic::RandomId => unit_hash(ids.map_or(i as u64, |ids| ids[i])),
                    };
                    o.fill(x);
                }
            }
            ExprOp::Kernel { kernel, args } => {
                let ops = args.iter().map(|a| self.read(*a)).collect::<Result<Vec<_>, _>>()?;
                if ops.len() != kernel.arity() {
                    return Err(RuntimeError::BadArity {
                        value: v.0,
                        expected: kernel.arity(),
                        found: ops.len(),
                    });
                }
                let mut el: [&[f64]; 4] = [&[]; 4];
                for (i, o) in out.chunks_mut(stride).enumerate() {
                    for (k, (op, a)) in ops.iter().zip(args).enumerate() {
                        el[k] = op.element(*a, i)?;
                    }
                    kernel
                        .eval(&el[..ops.len()], o)
                        .map_err(|EmptyArgument(k)| RuntimeError::MissingOperand {
                            value: args[k].0,
                            element: i,
                        })?;
                }
            }
            ExprOp::StateRead { state } => {
                let src = self.state_range(*state)?;
                if src.len() != out.len() && src.len() != stride {
                    return Err(RuntimeError::BadStride {
                        value: v.0,
                        expected: out.len(),
                        found: src.len(),
                    });
                }
                fill(v, out, stride, &self.state.state[src])?;
            }
            ExprOp::Time(signal) => {
                let t = &self.state.time;
                let x = match signal {
                    TimeSignal::Seconds => t.t_ms / 1000.0,
                    TimeSignal::Phase => t.phase,
                    TimeSignal::Dt => t.dt_ms / 1000.0,
                    TimeSignal::Wrap => f64::from(u8::from(t.wrapped)),
                };
                out.fill(x);
            }
            ExprOp::EventNever => out.fill(0.0),
            ExprOp::EventEdge {
                value,
                previous,
                level,
            } => {
                let ids = [*value, *previous, *level];
                let [x_op, p_op, l_op] = ids.map(|id| self.read(id));
                let (x_op, p_op, l_op) = (x_op?, p_op?, l_op?);
                for (i, o) in out.chunks_mut(stride).enumerate() {
                    let x = x_op.first(ids[0], i)?;
                    let p = p_op.first(ids[1], i)?;
                    let l = l_op.first(ids[2], i)?;
                    o.fill(f64::from(u8::from(p < l && x >= l)));
                }
            }
            ExprOp::EventCombine { mode, args } => {
                let ops = args.iter().map(|a| self.read(*a)).collect::<Result<Vec<_>, _>>()?;
                for (i, o) in out.chunks_mut(stride).enumerate() {
                    let mut flags = ops.iter().zip(args).map(|(op, a)| op.flag(*a, i));
                    let fired = match mode {
                        CombineMode::Any => flags.try_fold(false, |acc, f| f.map(|f| acc || f))?,
                        CombineMode::All => flags.try_fold(true, |acc, f| f.map(|f| acc && f))?,
                    };
                    o.fill(f64::from(u8::from(fired)));
                }
            }
            ExprOp::StateWrite { .. } | ExprOp::SlotRead(_) => {
                return Err(RuntimeError::NotEvaluable(v.0));
            }
        }
        Ok(())
    }

    fn state_range(&self, id: StateId) -> Result<std::ops::Range<usize>, RuntimeError> {
        let slot = self
            .schedule
            .state_slots
            .get(id.0 as usize)
            .ok_or(RuntimeError::UnknownReference {
                what: "state",
                index: id.0,
            })?;
        Ok(slot.offset..slot.offset + slot.len())
    }

    // ── Continuity ──────────────────────────────────────────────────────────

    fn map_build(&mut self, instance: InstanceIdx, hint: Option<u32>) -> Result<(), RuntimeError> {
        let program = self.program;
        let decl = program
            .domains
            .get(instance.0 as usize)
            .ok_or(RuntimeError::UnknownReference {
                what: "instance",
                index: instance.0,
            })?;
        let mapping = match self.state.domains.get(&decl.instance) {
            None => ElementMapping::Fresh,
            Some(_) if !self.state.pending.contains(&decl.instance) => ElementMapping::Identity,
            Some(old) => {
                let new = snapshot(decl);
                let positions = match hint {
                    Some(h) => {
                        let target = self.target(h)?;
                        let old_pos = self.state.continuity.get(&target.key).map(|b| b.last.as_slice());
                        let new_pos = self.read(target.source)?.data();
                        old_pos.map(|o| (o, new_pos))
                    }
                    None => None,
                };
                let mapping = continuity::build_mapping(old, &new, positions, self.state.config.continuity.nn_radius);
                if mapping == ElementMapping::Crossfade {
                    self.out.diagnostics.push(
                        Diagnostic::new(
                            DiagLevel::Warning,
                            Location::block(decl.instance.instance_id.clone()),
                            format!("no element mapping for {}; crossfading", decl.instance),
                        )
                        .with_code(codes::W0501),
                    );
                }
                debug!(instance = %decl.instance, ?mapping, "remapped domain");
                mapping
            }
        };
        if mapping != ElementMapping::Identity {
            self.state.domains.insert(decl.instance.clone(), snapshot(decl));
            self.state.pending.remove(&decl.instance);
        }
        self.state.mappings[instance.0 as usize] = mapping;
        Ok(())
    }

    fn target(&self, index: u32) -> Result<&'a ContinuityTarget, RuntimeError> {
        let program: &'a LoweredProgram = self.program;
        program
            .continuity
            .get(index as usize)
            .ok_or(RuntimeError::UnknownReference {
                what: "continuity target",
                index,
            })
    }

    fn apply(&mut self, index: u32) -> Result<(), RuntimeError> {
        let target = self.target(index)?;
        let mut base = std::mem::take(&mut self.pool.base);
        base.clear();
        base.extend_from_slice(self.read(target.source)?.data());

        let out_slot = self.slot(target.output)?;
        if let Slot::Scalar { stride, .. } = out_slot {
            if base.len() != stride {
                return Err(RuntimeError::BadStride {
                    value: target.output.0,
                    expected: stride,
                    found: base.len(),
                });
            }
        }
        let mut out = match out_slot {
            Slot::Field { buffer, .. } => std::mem::take(&mut self.pool.buffers[buffer]),
            Slot::Scalar { .. } => std::mem::take(&mut self.pool.scratch),
        };
        if out.len() < base.len() {
            out.resize(base.len(), 0.0);
        }
        let policy = target
            .policy
            .unwrap_or_else(|| self.state.config.continuity.default_policy());
        let clock = ApplyClock {
            dt_ms: self.state.time.dt_ms,
            t_ms: self.state.time.t_ms,
        };
        let mapping = self.state.mapping(target.instance).clone();
        continuity::apply(
            &mut self.state.continuity,
            &target.key,
            &mapping,
            policy,
            &base,
            target.stride,
            clock,
            &mut out[..base.len()],
        );
        match out_slot {
            Slot::Field { buffer, .. } => self.pool.buffers[buffer] = out,
            Slot::Scalar { offset, stride } => {
                self.state.scalars[offset..offset + stride].copy_from_slice(&out[..stride]);
                self.pool.scratch = out;
            }
        }
        self.pool.base = base;
        Ok(())
    }

    // ── Render ──────────────────────────────────────────────────────────────

    fn render(&mut self, index: u32) -> Result<(), RuntimeError> {
        let program = self.program;
        let sink = program
            .sinks
            .get(index as usize)
            .ok_or(RuntimeError::UnknownReference {
                what: "render sink",
                index,
            })?;
        let decl = program.domain(sink.instance);
        let values = SinkValues {
            count: decl.count,
            element_ids: decl.element_ids.as_deref(),
            pos: self.sink_input(sink.pos, decl.count, 2)?,
            color: self.sink_input(sink.color, decl.count, 4)?,
            size: self.sink_input(sink.size, decl.count, 1)?,
            shape: self.read(sink.shape)?.first(sink.shape, 0)?,
        };
        let draw = render::assemble(&sink.key, &values);

        let t_ms = self.state.time.t_ms;
        if *self.state.mapping(Some(sink.instance)) == ElementMapping::Crossfade {
            let old = self.state.last_draw.get(&sink.key).cloned().unwrap_or_default();
            let window_ms = self.state.config.continuity.crossfade_ms;
            self.state.fades.insert(
                sink.key.clone(),
                Fade {
                    old,
                    start_ms: t_ms,
                    window_ms,
                },
            );
        }
        let emitted = match self.state.fades.get(&sink.key) {
            Some(fade) => {
                let w = fade.progress(t_ms);
                let blended = fade.blend(&draw, w);
                if w >= 1.0 {
                    self.state.fades.remove(&sink.key);
                }
                blended
            }
            None => draw.clone(),
        };
        self.out.draw.extend(emitted);
        self.state.last_draw.insert(sink.key.clone(), draw);
        Ok(())
    }

    /// A sink input holding one element per draw, or one broadcast element.
    fn sink_input(&self, v: ValueId, count: usize, stride: usize) -> Result<&[f64], RuntimeError> {
        let data = self.read(v)?.data();
        if data.len() == count * stride || data.len() == stride {
            Ok(data)
        } else {
            Err(RuntimeError::BadStride {
                value: v.0,
                expected: count * stride,
                found: data.len(),
            })
        }
    }

    // ── Commit ──────────────────────────────────────────────────────────────

    fn stage_commit(&self, step: &Step) -> Result<(usize, Vec<f64>), RuntimeError> {
        let (state, value) = match *step {
            Step::WriteState { state, value } | Step::WriteFieldState { state, value, .. } => (state, value),
            _ => return Err(RuntimeError::NotEvaluable(u32::MAX)),
        };
        let range = self.state_range(state)?;
        let data = self.read(value)?.data();
        if data.len() != range.len() {
            return Err(RuntimeError::BadStride {
                value: value.0,
                expected: range.len(),
                found: data.len(),
            });
        }
        Ok((range.start, data.to_vec()))
    }
}

/// Repeat `src` over `out`: one element broadcast when `src` has `stride`
/// components, a straight copy when lengths agree, cycled otherwise.
fn fill(v: ValueId, out: &mut [f64], stride: usize, src: &[f64]) -> Result<(), RuntimeError> {
    if src.is_empty() {
        return Err(RuntimeError::MissingOperand { value: v.0, element: 0 });
    }
    if src.len() == out.len() {
        out.copy_from_slice(src);
        return Ok(());
    }
    for o in out.chunks_mut(stride.max(1)) {
        for (c, x) in o.iter_mut().enumerate() {
            *x = src[c % src.len()];
        }
    }
    Ok(())
}

/// SplitMix64 of `id`, mapped to `[0, 1)`.
pub fn unit_hash(id: u64) -> f64 {
    let mut z = id.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_broadcasts_and_copies() {
        let v = ValueId(0);
        let mut out = [0.0; 6];
        fill(v, &mut out, 2, &[1.0, 2.0]).unwrap();
        assert_eq!(out, [1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        fill(v, &mut out, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn fill_from_nothing_is_an_error() {
        let mut out = [7.0; 4];
        assert_eq!(
            fill(ValueId(3), &mut out, 2, &[]),
            Err(RuntimeError::MissingOperand { value: 3, element: 0 })
        );
    }

    #[test]
    fn unit_hash_is_deterministic_and_in_range() {
        for id in 0..1000 {
            let x = unit_hash(id);
            assert!((0.0..1.0).contains(&x));
            assert_eq!(x, unit_hash(id));
        }
        assert_ne!(unit_hash(1), unit_hash(2));
    }

    #[test]
    fn operand_elements() {
        let data = [1.0, 2.0, 3.0, 4.0];
        let v = ValueId(9);
        let f = Operand::Field { data: &data, stride: 2 };
        assert_eq!(f.element(v, 1), Ok(&[3.0, 4.0][..]));
        assert_eq!(
            f.element(v, 2),
            Err(RuntimeError::MissingOperand { value: 9, element: 2 })
        );
        let s = Operand::Scalar(&data[..1]);
        assert_eq!(s.element(v, 7), Ok(&[1.0][..]));
        assert_eq!(s.flag(v, 0), Ok(true));
        let empty = Operand::Scalar(&[]);
        assert!(empty.first(v, 0).is_err());
    }
}
