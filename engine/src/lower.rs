// lower.rs — Backend lowering & verification
//
// Calls each block's lowering function in dependency order, collecting the
// emitted `ValueExpr`s, state declarations, domains, render sinks and
// continuity targets into one `LoweredProgram`. Blocks with a commit
// function are revisited once every block is lowered, with all inputs
// available, to emit their state writes. Then verifies L1-L4.
//
// Preconditions: `typed` passed axis validation; `deps.order` is a total
//   topological order of the cut dependency graph.
// Postconditions: `LoweredProgram` whose value ids are allocated in
//   topological order, plus `LowerCert` evidence.
// Failure modes: a block's lowering function rejects its inputs or params
//   (`LoweringFailed`); a failed obligation is an internal error.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::axis::TypedGraph;
use crate::diag::{codes, DiagLevel, Diagnostic, ErrorKind, Location};
use crate::graph::DependencyAnalysis;
use crate::id::{BlockIdx, IdAllocator, InstanceIdx, StateId, TargetKey, ValueId};
use crate::ir::{
    CombineMode, ContinuityPolicy, ContinuityTarget, DomainDecl, ExprOp, IdentityMode, Intrinsic,
    Kernel, RenderSink, SlotSource, StateDecl, TimeModel, TimeSignal, ValueExpr,
};
use crate::normalize::NormBlock;
use crate::patch::ParamValue;
use crate::registry::{BlockBody, BlockRegistry, BlockRole};
use crate::types::{CanonicalType, InstanceRef};

// ── Errors ──────────────────────────────────────────────────────────────────

/// Why a block's lowering function refused to lower.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LowerError {
    #[error("input '{0}' is not available before the block's state is committed")]
    InputNotReady(&'static str),
    #[error("block has no input port '{0}'")]
    UnknownInput(String),
    #[error("block has no output port #{0}")]
    UnknownOutput(usize),
    #[error("parameter '{name}': {reason}")]
    BadParam { name: String, reason: String },
    #[error("input '{0}' must be a compile-time constant")]
    NotConstant(&'static str),
    #[error("state '{0}' was never declared")]
    UnknownState(String),
    #[error("value of type {ty} cannot hold {len} components")]
    BadConstant { ty: String, len: usize },
    #[error("field type without a declared domain: {0}")]
    UnknownDomain(String),
    #[error("{0}")]
    Invalid(String),
}

impl LowerError {
    pub fn bad_param(name: &str, reason: impl Into<String>) -> Self {
        LowerError::BadParam {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

// ── Output types ────────────────────────────────────────────────────────────

pub struct LowerResult {
    pub program: LoweredProgram,
    pub cert: LowerCert,
    pub diagnostics: Vec<Diagnostic>,
}

/// Everything lowering produced, ready for scheduling.
#[derive(Debug, Clone, Serialize)]
pub struct LoweredProgram {
    /// Indexed by `ValueId`; references only earlier ids.
    pub exprs: Vec<ValueExpr>,
    /// Block that emitted each expression.
    pub expr_block: Vec<BlockIdx>,
    /// Stable id of every normalized block, indexed by `BlockIdx`.
    pub block_ids: Vec<String>,
    /// Output values of every block, indexed by `BlockIdx` then port.
    pub block_outputs: Vec<Vec<ValueId>>,
    pub states: Vec<StateDecl>,
    /// Indexed by `InstanceIdx`.
    pub domains: Vec<DomainDecl>,
    pub sinks: Vec<RenderSink>,
    pub continuity: Vec<ContinuityTarget>,
    pub time_model: TimeModel,
}

impl LoweredProgram {
    pub fn expr(&self, id: ValueId) -> &ValueExpr {
        &self.exprs[id.0 as usize]
    }

    pub fn domain(&self, idx: InstanceIdx) -> &DomainDecl {
        &self.domains[idx.0 as usize]
    }

    pub fn state(&self, id: StateId) -> &StateDecl {
        &self.states[id.0 as usize]
    }
}

impl fmt::Display for LoweredProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "time period_ms={}", self.time_model.period_ms)?;
        for d in &self.domains {
            writeln!(
                f,
                "domain i{} {} count={} identity={:?}",
                d.idx.0, d.instance, d.count, d.identity
            )?;
        }
        for s in &self.states {
            writeln!(f, "state s{} {} : {} init {:?}", s.id.0, s.key, s.ty, s.initial)?;
        }
        for (i, e) in self.exprs.iter().enumerate() {
            let block = &self.block_ids[self.expr_block[i].0 as usize];
            writeln!(f, "v{i} = {} : {} @ {block}", e.op, e.ty)?;
        }
        for (i, c) in self.continuity.iter().enumerate() {
            writeln!(
                f,
                "continuity#{i} {} v{} -> v{} {:?}",
                c.key, c.source.0, c.output.0, c.policy
            )?;
        }
        for s in &self.sinks {
            writeln!(
                f,
                "render {} over i{} pos=v{} color=v{} size=v{} shape=v{}",
                s.key, s.instance.0, s.pos.0, s.color.0, s.size.0, s.shape.0
            )?;
        }
        Ok(())
    }
}

/// Machine-checkable evidence for lowering postconditions (L1-L4).
#[derive(Debug, Clone, Serialize)]
pub struct LowerCert {
    /// L1: every block output port has a value.
    pub l1_ports_complete: bool,
    /// L2: every state access names a declared state; every domain block
    ///     declared its domain.
    pub l2_declarations_complete: bool,
    /// L3: operands precede their users and agree in arity and domain.
    pub l3_operands_consistent: bool,
    /// L4: block output values carry their port's type.
    pub l4_output_types_match: bool,
}

impl crate::pass::StageCert for LowerCert {
    fn all_pass(&self) -> bool {
        self.l1_ports_complete
            && self.l2_declarations_complete
            && self.l3_operands_consistent
            && self.l4_output_types_match
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("L1_ports_complete", self.l1_ports_complete),
            ("L2_declarations_complete", self.l2_declarations_complete),
            ("L3_operands_consistent", self.l3_operands_consistent),
            ("L4_output_types_match", self.l4_output_types_match),
        ]
    }
}

// ── Block-facing API ────────────────────────────────────────────────────────

/// Resolved inputs and parameters of the block being lowered.
pub struct BlockInputs<'a> {
    block: &'a NormBlock,
    names: Vec<&'static str>,
    values: Vec<Option<ValueId>>,
    input_types: &'a [CanonicalType],
    output_types: &'a [CanonicalType],
}

impl<'a> BlockInputs<'a> {
    pub fn stable_id(&self) -> &str {
        &self.block.stable_id
    }

    fn position(&self, name: &str) -> Result<usize, LowerError> {
        self.names
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| LowerError::UnknownInput(name.to_string()))
    }

    pub fn input(&self, name: &str) -> Result<ValueId, LowerError> {
        let i = self.position(name)?;
        self.values[i].ok_or(LowerError::InputNotReady(self.names[i]))
    }

    pub fn input_type(&self, name: &str) -> Result<&CanonicalType, LowerError> {
        let i = self.position(name)?;
        Ok(&self.input_types[i])
    }

    pub fn output_type(&self, port: usize) -> Result<&CanonicalType, LowerError> {
        self.output_types
            .get(port)
            .ok_or(LowerError::UnknownOutput(port))
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.block.params.get(name)
    }

    pub fn param_f64(&self, name: &str) -> Result<f64, LowerError> {
        self.param(name)
            .and_then(ParamValue::as_f64)
            .ok_or_else(|| LowerError::bad_param(name, "expected a number"))
    }

    pub fn param_numbers(&self, name: &str) -> Result<Vec<f64>, LowerError> {
        self.param(name)
            .and_then(ParamValue::as_numbers)
            .ok_or_else(|| LowerError::bad_param(name, "expected a number or list of numbers"))
    }

    pub fn param_text(&self, name: &str) -> Result<&str, LowerError> {
        self.param(name)
            .and_then(ParamValue::as_str)
            .ok_or_else(|| LowerError::bad_param(name, "expected a string"))
    }
}

/// The only mutable surface a lowering function sees.
pub struct LowerCtx<'a> {
    b: &'a mut Builder,
    block: BlockIdx,
    stable_id: &'a str,
}

impl<'a> LowerCtx<'a> {
    fn push(&mut self, ty: CanonicalType, op: ExprOp) -> ValueId {
        let id = self.b.ids.alloc_value();
        self.b.exprs.push(ValueExpr { ty, op });
        self.b.expr_block.push(self.block);
        id
    }

    /// Type of an already-emitted value.
    pub fn type_of(&self, v: ValueId) -> &CanonicalType {
        &self.b.exprs[v.0 as usize].ty
    }

    /// Constant of type `ty`. A single component is splatted to the stride.
    pub fn constant(&mut self, ty: &CanonicalType, value: &[f64]) -> Result<ValueId, LowerError> {
        let stride = ty.stride();
        let value = match value.len() {
            n if n == stride => value.to_vec(),
            1 => vec![value[0]; stride],
            len => {
                return Err(LowerError::BadConstant {
                    ty: ty.to_string(),
                    len,
                })
            }
        };
        Ok(self.push(ty.clone(), ExprOp::Const { value }))
    }

    /// Compile-time value of `v`, if it is a constant.
    pub fn const_value(&self, v: ValueId) -> Option<&[f64]> {
        match &self.b.exprs[v.0 as usize].op {
            ExprOp::Const { value } => Some(value),
            _ => None,
        }
    }

    pub fn kernel(&mut self, ty: &CanonicalType, kernel: Kernel, args: &[ValueId]) -> ValueId {
        self.push(
            ty.clone(),
            ExprOp::Kernel {
                kernel,
                args: args.to_vec(),
            },
        )
    }

    pub fn time(&mut self, ty: &CanonicalType, signal: TimeSignal) -> ValueId {
        self.push(ty.clone(), ExprOp::Time(signal))
    }

    pub fn set_time_model(&mut self, model: TimeModel) {
        self.b.time_model = model;
    }

    pub fn external(&mut self, ty: &CanonicalType, channel: &str, default: Vec<f64>) -> ValueId {
        self.push(
            ty.clone(),
            ExprOp::External {
                channel: channel.to_string(),
                default,
            },
        )
    }

    pub fn intrinsic(&mut self, ty: &CanonicalType, intrinsic: Intrinsic) -> ValueId {
        self.push(ty.clone(), ExprOp::Intrinsic(intrinsic))
    }

    /// Declare a persistent state cell keyed `<block>.<label>`. `initial`
    /// is one element's value; per-element state follows `ty`'s domain.
    pub fn declare_state(
        &mut self,
        label: &str,
        ty: &CanonicalType,
        initial: &[f64],
    ) -> Result<StateId, LowerError> {
        let instance = self.instance_of(ty)?;
        let stride = ty.stride();
        let initial = match initial.len() {
            n if n == stride => initial.to_vec(),
            1 => vec![initial[0]; stride],
            len => {
                return Err(LowerError::BadConstant {
                    ty: ty.to_string(),
                    len,
                })
            }
        };
        let id = self.b.ids.alloc_state();
        let key = TargetKey::new(self.stable_id, label);
        self.b.state_by_key.insert(key.clone(), id);
        self.b.states.push(StateDecl {
            id,
            key,
            ty: ty.clone(),
            initial,
            instance,
        });
        Ok(id)
    }

    /// State previously declared by this block.
    pub fn state(&self, label: &str) -> Result<StateId, LowerError> {
        let key = TargetKey::new(self.stable_id, label);
        self.b
            .state_by_key
            .get(&key)
            .copied()
            .ok_or(LowerError::UnknownState(key.0))
    }

    pub fn state_read(&mut self, state: StateId) -> ValueId {
        let ty = self.b.states[state.0 as usize].ty.clone();
        self.push(ty, ExprOp::StateRead { state })
    }

    /// Schedule `value` to become the state's content for the next frame.
    pub fn state_write(&mut self, state: StateId, value: ValueId) -> ValueId {
        let ty = self.b.states[state.0 as usize].ty.clone();
        self.push(ty, ExprOp::StateWrite { state, value })
    }

    /// Declare the domain this block creates.
    pub fn declare_domain(
        &mut self,
        domain_type: &str,
        count: usize,
        identity: IdentityMode,
    ) -> Result<InstanceIdx, LowerError> {
        let inst = InstanceRef::new(domain_type, self.stable_id);
        let idx = *self
            .b
            .instances
            .get(&inst)
            .ok_or_else(|| LowerError::UnknownDomain(inst.to_string()))?;
        self.b.domains[idx.0 as usize] = Some(DomainDecl::new(idx, inst, count, identity));
        Ok(idx)
    }

    pub fn event_never(&mut self, ty: &CanonicalType) -> ValueId {
        self.push(ty.clone(), ExprOp::EventNever)
    }

    pub fn event_edge(&mut self, ty: &CanonicalType, value: ValueId, previous: ValueId, level: ValueId) -> ValueId {
        self.push(
            ty.clone(),
            ExprOp::EventEdge {
                value,
                previous,
                level,
            },
        )
    }

    pub fn event_combine(&mut self, ty: &CanonicalType, mode: CombineMode, args: &[ValueId]) -> ValueId {
        self.push(
            ty.clone(),
            ExprOp::EventCombine {
                mode,
                args: args.to_vec(),
            },
        )
    }

    /// Mark `value` as a continuity target keyed `<block>.<label>`. Returns
    /// the value carrying the smoothed output.
    pub fn continuity(
        &mut self,
        value: ValueId,
        policy: Option<ContinuityPolicy>,
        label: &str,
    ) -> Result<ValueId, LowerError> {
        let ty = self.type_of(value).clone();
        let instance = self.instance_of(&ty)?;
        let index = self.b.continuity.len() as u32;
        let output = self.push(ty.clone(), ExprOp::SlotRead(SlotSource::Continuity(index)));
        self.b.continuity.push(ContinuityTarget {
            key: TargetKey::new(self.stable_id, label),
            source: value,
            output,
            policy,
            instance,
            stride: ty.stride(),
        });
        Ok(output)
    }

    pub fn render_sink(
        &mut self,
        instance: InstanceIdx,
        pos: ValueId,
        color: ValueId,
        size: ValueId,
        shape: ValueId,
    ) {
        self.b.sinks.push(RenderSink {
            key: TargetKey::new(self.stable_id, "render"),
            instance,
            pos,
            color,
            size,
            shape,
        });
    }

    /// Domain index of a field type; `None` for signals and events.
    pub fn instance_of(&self, ty: &CanonicalType) -> Result<Option<InstanceIdx>, LowerError> {
        match ty.instance() {
            None => Ok(None),
            Some(inst) => self
                .b
                .instances
                .get(inst)
                .copied()
                .map(Some)
                .ok_or_else(|| LowerError::UnknownDomain(inst.to_string())),
        }
    }
}

// ── Internal builder ────────────────────────────────────────────────────────

struct Builder {
    ids: IdAllocator,
    exprs: Vec<ValueExpr>,
    expr_block: Vec<BlockIdx>,
    states: Vec<StateDecl>,
    state_by_key: HashMap<TargetKey, StateId>,
    instances: HashMap<InstanceRef, InstanceIdx>,
    domains: Vec<Option<DomainDecl>>,
    sinks: Vec<RenderSink>,
    continuity: Vec<ContinuityTarget>,
    time_model: TimeModel,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn lower(
    typed: &TypedGraph,
    registry: &BlockRegistry,
    deps: &DependencyAnalysis,
) -> LowerResult {
    let graph = &typed.graph;
    let mut b = Builder {
        ids: IdAllocator::new(),
        exprs: Vec::new(),
        expr_block: Vec::new(),
        states: Vec::new(),
        state_by_key: HashMap::new(),
        instances: HashMap::new(),
        domains: Vec::new(),
        sinks: Vec::new(),
        continuity: Vec::new(),
        time_model: TimeModel::default(),
    };
    // Domain indices are fixed up front so per-element state can be declared
    // before its domain block is lowered.
    for block in &graph.blocks {
        if let BlockRole::Domain { domain_type } = block.caps.role {
            let idx = b.ids.alloc_instance();
            b.instances
                .insert(InstanceRef::new(domain_type, block.stable_id.clone()), idx);
            b.domains.push(None);
        }
    }

    let mut diagnostics = Vec::new();
    let mut outputs: Vec<Option<Vec<ValueId>>> = vec![None; graph.blocks.len()];

    for &idx in &deps.order {
        let block = graph.block(idx);
        let def = registry.get(block.def);
        let BlockBody::Primitive { lower: lower_fn, .. } = &def.body else {
            continue;
        };
        let inputs = gather_inputs(typed, block, registry, &outputs);
        let mut ctx = LowerCtx {
            b: &mut b,
            block: idx,
            stable_id: &block.stable_id,
        };
        match lower_fn(&mut ctx, &inputs) {
            Ok(values) if values.len() == def.outputs.len() => {
                outputs[idx.0 as usize] = Some(values);
            }
            Ok(values) => diagnostics.push(lowering_failed(
                block,
                &format!(
                    "produced {} outputs, block type declares {}",
                    values.len(),
                    def.outputs.len()
                ),
            )),
            Err(e) => diagnostics.push(lowering_failed(block, &e.to_string())),
        }
    }

    for &idx in &deps.order {
        let block = graph.block(idx);
        let def = registry.get(block.def);
        let BlockBody::Primitive {
            commit: Some(commit_fn),
            ..
        } = &def.body
        else {
            continue;
        };
        if outputs[idx.0 as usize].is_none() {
            continue;
        }
        let inputs = gather_inputs(typed, block, registry, &outputs);
        let mut ctx = LowerCtx {
            b: &mut b,
            block: idx,
            stable_id: &block.stable_id,
        };
        if let Err(e) = commit_fn(&mut ctx, &inputs) {
            diagnostics.push(lowering_failed(block, &e.to_string()));
        }
    }

    let domains_declared = b.domains.iter().all(Option::is_some);
    let program = LoweredProgram {
        exprs: b.exprs,
        expr_block: b.expr_block,
        block_ids: graph.blocks.iter().map(|bl| bl.stable_id.clone()).collect(),
        block_outputs: outputs
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect(),
        states: b.states,
        domains: b.domains.into_iter().flatten().collect(),
        sinks: b.sinks,
        continuity: b.continuity,
        time_model: b.time_model,
    };

    let cert = if diagnostics.iter().any(Diagnostic::is_error) {
        // Obligations are only meaningful for a complete program.
        LowerCert {
            l1_ports_complete: false,
            l2_declarations_complete: domains_declared,
            l3_operands_consistent: true,
            l4_output_types_match: true,
        }
    } else {
        verify_lowered(&program, typed, registry, domains_declared)
    };
    if !diagnostics.iter().any(Diagnostic::is_error) {
        use crate::pass::StageCert;
        for name in cert.failed() {
            diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Error,
                    Location::patch(),
                    format!("lowering obligation {name} failed"),
                )
                .with_code(codes::E0601),
            );
        }
    }
    debug!(
        exprs = program.exprs.len(),
        states = program.states.len(),
        domains = program.domains.len(),
        "lowered program"
    );
    LowerResult {
        program,
        cert,
        diagnostics,
    }
}

fn gather_inputs<'a>(
    typed: &'a TypedGraph,
    block: &'a NormBlock,
    registry: &BlockRegistry,
    outputs: &[Option<Vec<ValueId>>],
) -> BlockInputs<'a> {
    let def = registry.get(block.def);
    let values = (0..def.inputs.len())
        .map(|port| {
            typed.graph.incoming(block.idx, port).and_then(|e| {
                outputs[e.from.0 as usize]
                    .as_ref()
                    .and_then(|o| o.get(e.from_port).copied())
            })
        })
        .collect();
    BlockInputs {
        block,
        names: def.inputs.iter().map(|p| p.name).collect(),
        values,
        input_types: typed.input_types(block.idx.0 as usize),
        output_types: typed.output_types(block.idx.0 as usize),
    }
}

fn lowering_failed(block: &NormBlock, reason: &str) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::LoweringFailed,
        Location::block(block.stable_id.clone()),
        format!("cannot lower '{}' ({}): {reason}", block.stable_id, block.type_name),
    )
}

// ── Verification ────────────────────────────────────────────────────────────

pub fn verify_lowered(
    program: &LoweredProgram,
    typed: &TypedGraph,
    registry: &BlockRegistry,
    domains_declared: bool,
) -> LowerCert {
    LowerCert {
        l1_ports_complete: verify_l1(program, typed, registry),
        l2_declarations_complete: domains_declared && verify_l2(program),
        l3_operands_consistent: verify_l3(program),
        l4_output_types_match: verify_l4(program, typed),
    }
}

fn verify_l1(program: &LoweredProgram, typed: &TypedGraph, registry: &BlockRegistry) -> bool {
    typed.graph.blocks.iter().all(|b| {
        let expected = registry.get(b.def).outputs.len();
        program
            .block_outputs
            .get(b.idx.0 as usize)
            .is_some_and(|o| o.len() == expected)
    })
}

fn verify_l2(program: &LoweredProgram) -> bool {
    let n = program.states.len() as u32;
    program.exprs.iter().all(|e| match &e.op {
        ExprOp::StateRead { state } | ExprOp::StateWrite { state, .. } => state.0 < n,
        _ => true,
    })
}

fn verify_l3(program: &LoweredProgram) -> bool {
    program.exprs.iter().enumerate().all(|(i, e)| {
        let operands = e.operands();
        let ordered = operands.iter().all(|v| (v.0 as usize) < i);
        let arity = match &e.op {
            ExprOp::Kernel { kernel, args } => kernel.arity() == args.len(),
            ExprOp::EventCombine { args, .. } => !args.is_empty(),
            _ => true,
        };
        let same_domain = operands.iter().all(|v| {
            program
                .exprs
                .get(v.0 as usize)
                .is_some_and(|o| o.ty.instance().is_none() || o.ty.instance() == e.ty.instance())
        });
        let write_ok = match &e.op {
            ExprOp::StateWrite { value, .. } => program
                .exprs
                .get(value.0 as usize)
                .is_some_and(|v| v.ty.payload == e.ty.payload),
            _ => true,
        };
        ordered && arity && same_domain && write_ok
    })
}

fn verify_l4(program: &LoweredProgram, typed: &TypedGraph) -> bool {
    program
        .block_outputs
        .iter()
        .enumerate()
        .all(|(b, outs)| {
            outs.iter().zip(typed.output_types(b)).all(|(v, ty)| {
                let actual = &program.expr(*v).ty;
                actual.payload == ty.payload
                    && actual.unit == ty.unit
                    && actual.extent.cardinality == ty.extent.cardinality
                    && actual.extent.temporality == ty.extent.temporality
            })
        })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{compile_stages, CompileOptions};
    use crate::patch::Patch;
    use crate::pass::StageCert;
    use crate::stdlib::standard_registry;
    use crate::types::{PayloadType, Unit};

    fn dots(count: f64) -> Patch {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array").num("count", count);
        p.block("line", "LineLayout");
        p.block("render", "Render");
        p.connect(("arr", "t"), ("line", "t"));
        p.connect(("line", "pos"), ("render", "pos"));
        p
    }

    #[test]
    fn ids_are_topological_and_cert_passes() {
        let reg = standard_registry().unwrap();
        let stages = compile_stages(&dots(5.0), &reg, &CompileOptions::default()).unwrap();
        assert!(stages.lower_cert.all_pass(), "{:?}", stages.lower_cert);
        for (i, e) in stages.lowered.exprs.iter().enumerate() {
            assert!(e.operands().iter().all(|v| (v.0 as usize) < i));
        }
        assert_eq!(stages.lowered.domains.len(), 1);
        assert_eq!(stages.lowered.domains[0].count, 5);
        assert_eq!(stages.lowered.sinks.len(), 1);
    }

    #[test]
    fn constants_splat_to_stride() {
        let mut b = Builder {
            ids: IdAllocator::new(),
            exprs: Vec::new(),
            expr_block: Vec::new(),
            states: Vec::new(),
            state_by_key: HashMap::new(),
            instances: HashMap::new(),
            domains: Vec::new(),
            sinks: Vec::new(),
            continuity: Vec::new(),
            time_model: TimeModel::default(),
        };
        let mut ctx = LowerCtx {
            b: &mut b,
            block: BlockIdx(0),
            stable_id: "k",
        };
        let ty = CanonicalType::signal(PayloadType::Color, Unit::None);
        let v = ctx.constant(&ty, &[0.5]).unwrap();
        assert_eq!(ctx.const_value(v), Some(&[0.5, 0.5, 0.5, 0.5][..]));
        let err = ctx.constant(&ty, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, LowerError::BadConstant { len: 2, .. }));
        let s = ctx
            .declare_state("mem", &CanonicalType::signal(PayloadType::Float, Unit::Scalar), &[0.0])
            .unwrap();
        assert_eq!(ctx.state("mem"), Ok(s));
        assert!(matches!(ctx.state("other"), Err(LowerError::UnknownState(_))));
    }

    #[test]
    fn unknown_field_domain_is_an_error() {
        let mut b = Builder {
            ids: IdAllocator::new(),
            exprs: Vec::new(),
            expr_block: Vec::new(),
            states: Vec::new(),
            state_by_key: HashMap::new(),
            instances: HashMap::new(),
            domains: Vec::new(),
            sinks: Vec::new(),
            continuity: Vec::new(),
            time_model: TimeModel::default(),
        };
        let ctx = LowerCtx {
            b: &mut b,
            block: BlockIdx(0),
            stable_id: "k",
        };
        let ty = CanonicalType::field(PayloadType::Float, Unit::Scalar, InstanceRef::new("array", "x"));
        assert!(matches!(ctx.instance_of(&ty), Err(LowerError::UnknownDomain(_))));
    }

    #[test]
    fn silent_event_defaults_and_all_events_lower() {
        use crate::ir::{CombineMode, ExprOp};
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("acc", "Accumulator");
        p.block("all", "AllEvents");
        p.connect(("time", "pulse"), ("all", "a"));
        p.connect(("time", "pulse"), ("all", "b"));
        let reg = standard_registry().unwrap();
        let stages = compile_stages(&p, &reg, &CompileOptions::default()).unwrap();
        let lowered = &stages.lowered;
        let reset = lowered
            .block_ids
            .iter()
            .position(|id| id == "acc.reset#default")
            .unwrap();
        let never = lowered.block_outputs[reset][0];
        assert_eq!(lowered.exprs[never.0 as usize].op, ExprOp::EventNever);
        let all = lowered.block_ids.iter().position(|id| id == "all").unwrap();
        let combined = lowered.block_outputs[all][0];
        assert!(matches!(
            lowered.exprs[combined.0 as usize].op,
            ExprOp::EventCombine { mode: CombineMode::All, .. }
        ));
    }
}
