// stdlib.rs — Standard block catalog
//
// The blocks every patch can use: time root, constants and external
// inputs, the `Array` domain, layouts, arithmetic, colour, stateful
// blocks, event blocks, the render sink, adapters and one composite.
// Each definition is plain data plus a lowering function over `LowerCtx`;
// the compiler never matches on these names.
//
// Preconditions: none.
// Postconditions: `standard_registry` returns a registry whose default
//   source is `Const` and whose broadcast adapter is `Broadcast`.
// Failure modes: a malformed definition (duplicate names) is a
//   `RegistryError`.
// Side effects: none.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use crate::id::ValueId;
use crate::ir::{CombineMode, ContinuityPolicy, IdentityMode, Intrinsic, Kernel, TimeModel, TimeSignal};
use crate::lower::{BlockInputs, LowerCtx, LowerError};
use crate::patch::ParamValue;
use crate::registry::{
    AxisSpec, BlockBody, BlockCapabilities, BlockDef, BlockRegistry, BlockRole, CardSpec,
    CardinalityMode, CompositeBlock, CompositeDef, ExposedPort, InnerPort, ParamDecl, PortDecl,
    RegistryError, TailSpec,
};
use crate::types::{Binding, Branch, CanonicalType, Perspective, PayloadType, Temporality, TypeFamily, Unit};

use AxisSpec::{Fixed, Var};

/// Unit conversions normalization may insert: `(from, to, block, factor)`.
const UNIT_ADAPTERS: [(Unit, Unit, &str, f64); 6] = [
    (Unit::Phase, Unit::Radians, "PhaseToRadians", TAU),
    (Unit::Radians, Unit::Phase, "RadiansToPhase", 1.0 / TAU),
    (Unit::Degrees, Unit::Radians, "DegreesToRadians", TAU / 360.0),
    (Unit::Seconds, Unit::Milliseconds, "SecondsToMs", 1000.0),
    (Unit::Milliseconds, Unit::Seconds, "MsToSeconds", 0.001),
    (Unit::Normalized, Unit::Phase, "NormalizedToPhase", 1.0),
];

/// Build the standard catalog.
pub fn standard_registry() -> Result<BlockRegistry, RegistryError> {
    let mut reg = BlockRegistry::new();
    let defs = [
        time_root(),
        constant(),
        external(),
        array(),
        line_layout(),
        circle_layout(),
        oscillator(),
        add(),
        mul(),
        hue_color(),
        unit_delay(),
        accumulator(),
        sample_hold(),
        threshold(),
        any_event(),
        all_events(),
        render(),
        broadcast(),
        dot_ring(),
    ];
    for def in defs {
        reg.register(def)?;
    }
    for (from, to, name, factor) in UNIT_ADAPTERS {
        reg.register(unit_adapter(name, from, to, factor))?;
        reg.register_unit_adapter(from, to, name)?;
    }
    reg.set_broadcast_adapter("Broadcast");
    reg.set_default_source("Const");
    Ok(reg)
}

// ── Definition helpers ──────────────────────────────────────────────────────

fn primitive(
    type_name: &'static str,
    inputs: Vec<PortDecl>,
    outputs: Vec<PortDecl>,
    params: Vec<ParamDecl>,
    caps: BlockCapabilities,
    lower: crate::registry::LowerFn,
) -> BlockDef {
    BlockDef {
        type_name,
        inputs,
        outputs,
        params,
        caps,
        tail: TailSpec::Inherit,
        body: BlockBody::Primitive {
            lower,
            commit: None,
        },
    }
}

fn with_commit(mut def: BlockDef, commit: crate::registry::CommitFn) -> BlockDef {
    if let BlockBody::Primitive { lower, .. } = def.body {
        def.body = BlockBody::Primitive {
            lower,
            commit: Some(commit),
        };
    }
    def
}

fn param(name: &'static str, default: ParamValue) -> ParamDecl {
    ParamDecl { name, default }
}

fn float(name: &'static str, unit: Unit, card: CardSpec) -> PortDecl {
    PortDecl::fixed(name, PayloadType::Float, unit, card)
}

fn stateful(cardinality: CardinalityMode) -> BlockCapabilities {
    BlockCapabilities {
        stateful: true,
        ..BlockCapabilities::operator(cardinality)
    }
}

fn role(role: BlockRole, cardinality: CardinalityMode) -> BlockCapabilities {
    BlockCapabilities {
        role,
        ..BlockCapabilities::operator(cardinality)
    }
}

/// Output type of port 0, owned.
fn out_type(inputs: &BlockInputs<'_>) -> Result<CanonicalType, LowerError> {
    inputs.output_type(0).cloned()
}

// ── Time and sources ────────────────────────────────────────────────────────

/// The clock always runs on the main branch, unbound, in the default
/// perspective; preview-only blocks cannot read it.
fn time_root() -> BlockDef {
    let def = primitive(
        "TimeRoot",
        vec![],
        vec![
            float("time", Unit::Seconds, CardSpec::One),
            float("phase", Unit::Phase, CardSpec::One),
            PortDecl::event("pulse"),
        ],
        vec![param("period_ms", ParamValue::Number(1000.0))],
        BlockCapabilities {
            singleton: true,
            ..role(BlockRole::TimeRoot, CardinalityMode::SignalOnly)
        },
        lower_time_root,
    );
    BlockDef {
        tail: TailSpec::Fixed(Binding::Unbound, Perspective::Default, Branch::Main),
        ..def
    }
}

fn lower_time_root(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let period_ms = inputs.param_f64("period_ms")?;
    if !(period_ms > 0.0) {
        return Err(LowerError::bad_param("period_ms", "must be positive"));
    }
    ctx.set_time_model(TimeModel { period_ms });
    let time = ctx.time(inputs.output_type(0)?, TimeSignal::Seconds);
    let phase = ctx.time(inputs.output_type(1)?, TimeSignal::Phase);
    let pulse = ctx.time(inputs.output_type(2)?, TimeSignal::Wrap);
    Ok(vec![time, phase, pulse])
}

fn constant() -> BlockDef {
    primitive(
        "Const",
        vec![],
        vec![PortDecl::new("out", Var("T"), Var("U"), CardSpec::Var("C"))
            .with_temporality(Var("K"))],
        vec![param("value", ParamValue::Numbers(vec![0.0]))],
        role(BlockRole::DefaultSource, CardinalityMode::Preserve),
        lower_constant,
    )
}

/// An all-zero event constant is an event that never fires.
fn lower_constant(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let ty = out_type(inputs)?;
    let value = inputs.param_numbers("value")?;
    if ty.family() == TypeFamily::Event && value.iter().all(|&x| x == 0.0) {
        return Ok(vec![ctx.event_never(&ty)]);
    }
    Ok(vec![ctx.constant(&ty, &value)?])
}

fn external() -> BlockDef {
    primitive(
        "External",
        vec![],
        vec![PortDecl::new("out", Var("T"), Var("U"), CardSpec::One)],
        vec![
            param("channel", ParamValue::Text(String::new())),
            param("default", ParamValue::Numbers(vec![0.0])),
        ],
        role(BlockRole::Source, CardinalityMode::SignalOnly),
        lower_external,
    )
}

fn lower_external(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let ty = out_type(inputs)?;
    let channel = inputs.param_text("channel")?;
    if channel.is_empty() {
        return Err(LowerError::bad_param("channel", "must name an input channel"));
    }
    let mut default = inputs.param_numbers("default")?;
    match default.len() {
        n if n == ty.stride() => {}
        1 => default = vec![default[0]; ty.stride()],
        len => {
            return Err(LowerError::BadConstant {
                ty: ty.to_string(),
                len,
            })
        }
    }
    Ok(vec![ctx.external(&ty, channel, default)])
}

// ── Domain ──────────────────────────────────────────────────────────────────

fn array() -> BlockDef {
    primitive(
        "Array",
        vec![PortDecl::fixed("count", PayloadType::Int, Unit::Count, CardSpec::Zero).with_default(&[16.0])],
        vec![
            float("index", Unit::Scalar, CardSpec::OwnInstance),
            float("t", Unit::Normalized, CardSpec::OwnInstance),
            float("rand", Unit::Normalized, CardSpec::OwnInstance),
            float("turn", Unit::Normalized, CardSpec::OwnInstance),
        ],
        vec![param("identity", ParamValue::Text("stable".to_string()))],
        role(
            BlockRole::Domain {
                domain_type: "array",
            },
            CardinalityMode::Transform,
        ),
        lower_array,
    )
}

fn lower_array(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let count = ctx
        .const_value(inputs.input("count")?)
        .and_then(|v| v.first().copied())
        .ok_or(LowerError::NotConstant("count"))?;
    if count < 0.0 || count.fract() != 0.0 || !count.is_finite() {
        return Err(LowerError::Invalid(format!(
            "count must be a non-negative integer, found {count}"
        )));
    }
    let identity = match inputs.param_text("identity")? {
        "stable" => IdentityMode::Stable,
        "none" => IdentityMode::None,
        other => {
            return Err(LowerError::bad_param(
                "identity",
                format!("expected 'stable' or 'none', found '{other}'"),
            ))
        }
    };
    ctx.declare_domain("array", count as usize, identity)?;
    let index = ctx.intrinsic(inputs.output_type(0)?, Intrinsic::Index);
    let t = ctx.intrinsic(inputs.output_type(1)?, Intrinsic::NormalizedIndex);
    let rand = ctx.intrinsic(inputs.output_type(2)?, Intrinsic::RandomId);
    let turn = ctx.intrinsic(inputs.output_type(3)?, Intrinsic::CyclicIndex);
    Ok(vec![index, t, rand, turn])
}

// ── Layout, arithmetic, colour ──────────────────────────────────────────────

fn vec2(name: &'static str, card: CardSpec) -> PortDecl {
    PortDecl::fixed(name, PayloadType::Vec2, Unit::World, card)
}

fn line_layout() -> BlockDef {
    primitive(
        "LineLayout",
        vec![
            float("t", Unit::Normalized, CardSpec::Join),
            vec2("start", CardSpec::Join).with_default(&[-0.8, 0.0]),
            vec2("end", CardSpec::Join).with_default(&[0.8, 0.0]),
        ],
        vec![vec2("pos", CardSpec::Join)],
        vec![],
        BlockCapabilities::operator(CardinalityMode::Preserve),
        |ctx, inputs| kernel_of(ctx, inputs, Kernel::Lerp2, &["t", "start", "end"]),
    )
}

fn circle_layout() -> BlockDef {
    primitive(
        "CircleLayout",
        vec![
            float("t", Unit::Normalized, CardSpec::Join),
            vec2("center", CardSpec::Join).with_default(&[0.0, 0.0]),
            float("radius", Unit::World, CardSpec::Join).with_default(&[0.5]),
            float("phase", Unit::Phase, CardSpec::Join).with_default(&[0.0]),
        ],
        vec![vec2("pos", CardSpec::Join)],
        vec![],
        BlockCapabilities::operator(CardinalityMode::Preserve),
        |ctx, inputs| {
            kernel_of(ctx, inputs, Kernel::CirclePoint, &["t", "center", "radius", "phase"])
        },
    )
}

/// One kernel over the named inputs, typed like output 0.
fn kernel_of(
    ctx: &mut LowerCtx<'_>,
    inputs: &BlockInputs<'_>,
    kernel: Kernel,
    names: &[&str],
) -> Result<Vec<ValueId>, LowerError> {
    let ty = out_type(inputs)?;
    let args = names
        .iter()
        .map(|n| inputs.input(n))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(vec![ctx.kernel(&ty, kernel, &args)])
}

fn oscillator() -> BlockDef {
    primitive(
        "Oscillator",
        vec![
            float("phase", Unit::Phase, CardSpec::Join),
            PortDecl::new("amplitude", Fixed(PayloadType::Float), Var("U"), CardSpec::Join)
                .with_default(&[1.0]),
            PortDecl::new("offset", Fixed(PayloadType::Float), Var("U"), CardSpec::Join)
                .with_default(&[0.0]),
        ],
        vec![PortDecl::new("out", Fixed(PayloadType::Float), Var("U"), CardSpec::Join)],
        vec![],
        BlockCapabilities::operator(CardinalityMode::Preserve),
        lower_oscillator,
    )
}

fn lower_oscillator(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let ty = out_type(inputs)?;
    let wave_ty = CanonicalType {
        unit: Unit::Scalar,
        ..ty.clone()
    };
    let wave = ctx.kernel(&wave_ty, Kernel::SinCycles, &[inputs.input("phase")?]);
    let amplitude = inputs.input("amplitude")?;
    let offset = inputs.input("offset")?;
    Ok(vec![ctx.kernel(&ty, Kernel::MulAdd, &[wave, amplitude, offset])])
}

fn add() -> BlockDef {
    primitive(
        "Add",
        vec![
            PortDecl::new("a", Var("T"), Var("U"), CardSpec::Join).with_default(&[0.0]),
            PortDecl::new("b", Var("T"), Var("U"), CardSpec::Join).with_default(&[0.0]),
        ],
        vec![PortDecl::new("out", Var("T"), Var("U"), CardSpec::Join)],
        vec![],
        BlockCapabilities::operator(CardinalityMode::Preserve),
        |ctx, inputs| kernel_of(ctx, inputs, Kernel::Add, &["a", "b"]),
    )
}

fn mul() -> BlockDef {
    primitive(
        "Mul",
        vec![
            PortDecl::new("a", Var("T"), Var("U"), CardSpec::Join).with_default(&[0.0]),
            float("b", Unit::Scalar, CardSpec::Join).with_default(&[1.0]),
        ],
        vec![PortDecl::new("out", Var("T"), Var("U"), CardSpec::Join)],
        vec![],
        BlockCapabilities::operator(CardinalityMode::Preserve),
        |ctx, inputs| kernel_of(ctx, inputs, Kernel::Mul, &["a", "b"]),
    )
}

fn hue_color() -> BlockDef {
    primitive(
        "HueColor",
        vec![
            float("hue", Unit::Phase, CardSpec::Join),
            float("saturation", Unit::Normalized, CardSpec::Join).with_default(&[0.8]),
            float("value", Unit::Normalized, CardSpec::Join).with_default(&[1.0]),
        ],
        vec![PortDecl::fixed("color", PayloadType::Color, Unit::None, CardSpec::Join)],
        vec![],
        BlockCapabilities::operator(CardinalityMode::Preserve),
        |ctx, inputs| kernel_of(ctx, inputs, Kernel::HsvToRgba, &["hue", "saturation", "value"]),
    )
}

// ── Stateful blocks ─────────────────────────────────────────────────────────

fn unit_delay() -> BlockDef {
    let def = primitive(
        "UnitDelay",
        vec![PortDecl::new("in", Var("T"), Var("U"), CardSpec::Var("C"))],
        vec![PortDecl::new("out", Var("T"), Var("U"), CardSpec::Var("C"))],
        vec![param("initial", ParamValue::Numbers(vec![0.0]))],
        stateful(CardinalityMode::Preserve),
        lower_held_state,
    );
    with_commit(def, |ctx, inputs| {
        let state = ctx.state("state")?;
        ctx.state_write(state, inputs.input("in")?);
        Ok(())
    })
}

/// Declare state `state` typed like output 0 and output its previous value.
fn lower_held_state(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let ty = out_type(inputs)?;
    let initial = inputs.param_numbers("initial")?;
    let state = ctx.declare_state("state", &ty, &initial)?;
    Ok(vec![ctx.state_read(state)])
}

fn accumulator() -> BlockDef {
    let def = primitive(
        "Accumulator",
        vec![
            float("rate", Unit::Scalar, CardSpec::One).with_default(&[1.0]),
            PortDecl::event("reset").with_default(&[0.0]),
        ],
        vec![float("out", Unit::Scalar, CardSpec::One)],
        vec![param("initial", ParamValue::Numbers(vec![0.0]))],
        stateful(CardinalityMode::SignalOnly),
        lower_held_state,
    );
    with_commit(def, commit_accumulator)
}

/// `next = reset ? initial : state + rate·dt`.
fn commit_accumulator(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<(), LowerError> {
    let ty = out_type(inputs)?;
    let state = ctx.state("state")?;
    let dt = ctx.time(
        &CanonicalType::signal(PayloadType::Float, Unit::Seconds),
        TimeSignal::Dt,
    );
    let current = ctx.state_read(state);
    let integrated = ctx.kernel(&ty, Kernel::MulAdd, &[inputs.input("rate")?, dt, current]);
    let initial = ctx.constant(&ty, &inputs.param_numbers("initial")?)?;
    let next = ctx.kernel(&ty, Kernel::Select, &[inputs.input("reset")?, initial, integrated]);
    ctx.state_write(state, next);
    Ok(())
}

fn sample_hold() -> BlockDef {
    let def = primitive(
        "SampleHold",
        vec![
            PortDecl::new("value", Var("T"), Var("U"), CardSpec::One),
            PortDecl::event("trigger").with_default(&[0.0]),
        ],
        vec![PortDecl::new("out", Var("T"), Var("U"), CardSpec::One)],
        vec![param("initial", ParamValue::Numbers(vec![0.0]))],
        stateful(CardinalityMode::SignalOnly),
        lower_held_state,
    );
    with_commit(def, |ctx, inputs| {
        let ty = out_type(inputs)?;
        let state = ctx.state("state")?;
        let held = ctx.state_read(state);
        let next = ctx.kernel(
            &ty,
            Kernel::Select,
            &[inputs.input("trigger")?, inputs.input("value")?, held],
        );
        ctx.state_write(state, next);
        Ok(())
    })
}

// ── Events ──────────────────────────────────────────────────────────────────

fn threshold() -> BlockDef {
    let def = primitive(
        "Threshold",
        vec![
            PortDecl::new("value", Fixed(PayloadType::Float), Var("U"), CardSpec::Var("C")),
            PortDecl::new("level", Fixed(PayloadType::Float), Var("U"), CardSpec::Var("C"))
                .with_default(&[0.5]),
        ],
        vec![PortDecl::fixed("event", PayloadType::Bool, Unit::None, CardSpec::Var("C"))
            .with_temporality(Fixed(Temporality::Discrete))],
        vec![],
        BlockCapabilities::operator(CardinalityMode::Preserve),
        lower_threshold,
    );
    with_commit(def, |ctx, inputs| {
        let previous = ctx.state("previous")?;
        ctx.state_write(previous, inputs.input("value")?);
        let primed = ctx.state("primed")?;
        let one = ctx.constant(&primed_type(), &[1.0])?;
        ctx.state_write(primed, one);
        Ok(())
    })
}

fn primed_type() -> CanonicalType {
    CanonicalType::signal(PayloadType::Float, Unit::Scalar)
}

/// Fires on the frame `value` rises through `level`. Keeps the last value
/// as internal state; the block itself is not a cycle boundary. Until the
/// first commit the previous value is the current sample, so an input that
/// starts above the level does not fire on the first frame.
fn lower_threshold(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let value_ty = inputs.input_type("value")?.clone();
    let previous = ctx.declare_state("previous", &value_ty, &[0.0])?;
    let primed = ctx.declare_state("primed", &primed_type(), &[0.0])?;
    let value = inputs.input("value")?;
    let level = inputs.input("level")?;
    let (prev, primed) = (ctx.state_read(previous), ctx.state_read(primed));
    let prev = ctx.kernel(&value_ty, Kernel::Select, &[primed, prev, value]);
    Ok(vec![ctx.event_edge(&out_type(inputs)?, value, prev, level)])
}

fn any_event() -> BlockDef {
    primitive(
        "AnyEvent",
        vec![
            PortDecl::event("a").with_default(&[0.0]),
            PortDecl::event("b").with_default(&[0.0]),
        ],
        vec![PortDecl::event("event")],
        vec![],
        BlockCapabilities::operator(CardinalityMode::SignalOnly),
        |ctx, inputs| {
            let ty = out_type(inputs)?;
            let args = [inputs.input("a")?, inputs.input("b")?];
            Ok(vec![ctx.event_combine(&ty, CombineMode::Any, &args)])
        },
    )
}

fn all_events() -> BlockDef {
    primitive(
        "AllEvents",
        vec![PortDecl::event("a"), PortDecl::event("b")],
        vec![PortDecl::event("event")],
        vec![],
        BlockCapabilities::operator(CardinalityMode::SignalOnly),
        |ctx, inputs| {
            let ty = out_type(inputs)?;
            let args = [inputs.input("a")?, inputs.input("b")?];
            Ok(vec![ctx.event_combine(&ty, CombineMode::All, &args)])
        },
    )
}

// ── Render sink ─────────────────────────────────────────────────────────────

fn render() -> BlockDef {
    primitive(
        "Render",
        vec![
            vec2("pos", CardSpec::Field("I")),
            PortDecl::fixed("color", PayloadType::Color, Unit::None, CardSpec::Field("I"))
                .with_default(&[1.0, 1.0, 1.0, 1.0]),
            float("size", Unit::World, CardSpec::Field("I")).with_default(&[0.03]),
            PortDecl::fixed("shape", PayloadType::Shape, Unit::None, CardSpec::Zero)
                .with_default(&[0.0]),
        ],
        vec![],
        vec![
            param("continuity", ParamValue::Text("default".to_string())),
            param("tau_ms", ParamValue::Number(250.0)),
            param("window_ms", ParamValue::Number(300.0)),
        ],
        role(BlockRole::Sink, CardinalityMode::FieldOnly),
        lower_render,
    )
}

fn lower_render(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let pos_ty = inputs.input_type("pos")?.clone();
    let instance = ctx
        .instance_of(&pos_ty)?
        .ok_or_else(|| LowerError::Invalid("pos must be a field".to_string()))?;
    let policy = continuity_policy(inputs)?;
    let pos = ctx.continuity(inputs.input("pos")?, policy, "pos")?;
    let color = ctx.continuity(inputs.input("color")?, policy, "color")?;
    let size = ctx.continuity(inputs.input("size")?, policy, "size")?;
    let shape = inputs.input("shape")?;
    ctx.render_sink(instance, pos, color, size, shape);
    Ok(Vec::new())
}

/// `None` means the runtime configuration decides.
fn continuity_policy(inputs: &BlockInputs<'_>) -> Result<Option<ContinuityPolicy>, LowerError> {
    let policy = match inputs.param_text("continuity")? {
        "default" => return Ok(None),
        "none" => ContinuityPolicy::None,
        "preserve" => ContinuityPolicy::Preserve,
        "slew" => ContinuityPolicy::Slew {
            tau_ms: positive(inputs, "tau_ms")?,
        },
        "project" => ContinuityPolicy::Project {
            tau_ms: positive(inputs, "tau_ms")?,
        },
        "crossfade" => ContinuityPolicy::Crossfade {
            window_ms: positive(inputs, "window_ms")?,
        },
        other => {
            return Err(LowerError::bad_param(
                "continuity",
                format!("unknown policy '{other}'"),
            ))
        }
    };
    Ok(Some(policy))
}

fn positive(inputs: &BlockInputs<'_>, name: &str) -> Result<f64, LowerError> {
    let v = inputs.param_f64(name)?;
    if v > 0.0 {
        Ok(v)
    } else {
        Err(LowerError::bad_param(name, "must be positive"))
    }
}

// ── Adapters ────────────────────────────────────────────────────────────────

fn broadcast() -> BlockDef {
    primitive(
        "Broadcast",
        vec![PortDecl::new("in", Var("T"), Var("U"), CardSpec::Var("C"))],
        vec![PortDecl::new("out", Var("T"), Var("U"), CardSpec::Field("I"))],
        vec![],
        role(BlockRole::Adapter, CardinalityMode::FieldOnly),
        |ctx, inputs| kernel_of(ctx, inputs, Kernel::Identity, &["in"]),
    )
}

fn unit_adapter(name: &'static str, from: Unit, to: Unit, factor: f64) -> BlockDef {
    BlockDef {
        type_name: name,
        inputs: vec![PortDecl::new("in", Var("T"), Fixed(from), CardSpec::Var("C"))],
        outputs: vec![PortDecl::new("out", Var("T"), Fixed(to), CardSpec::Var("C"))],
        params: vec![param("factor", ParamValue::Number(factor))],
        caps: role(BlockRole::Adapter, CardinalityMode::Preserve),
        tail: TailSpec::Inherit,
        body: BlockBody::Primitive {
            lower: lower_unit_adapter,
            commit: None,
        },
    }
}

fn lower_unit_adapter(ctx: &mut LowerCtx<'_>, inputs: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
    let factor = inputs.param_f64("factor")?;
    let kernel = if factor == 1.0 {
        Kernel::Identity
    } else {
        Kernel::Scale(factor)
    };
    kernel_of(ctx, inputs, kernel, &["in"])
}

// ── Composites ──────────────────────────────────────────────────────────────

fn inner(block: &'static str, port: &'static str) -> InnerPort {
    InnerPort { block, port }
}

fn dot_ring() -> BlockDef {
    let block = |id, block_type| CompositeBlock {
        id,
        block_type,
        params: BTreeMap::new(),
    };
    BlockDef {
        type_name: "DotRing",
        inputs: vec![
            PortDecl::fixed("count", PayloadType::Int, Unit::Count, CardSpec::Zero).with_default(&[16.0]),
            float("phase", Unit::Phase, CardSpec::Join).with_default(&[0.0]),
        ],
        outputs: vec![vec2("pos", CardSpec::Join)],
        params: vec![
            param("count", ParamValue::Number(16.0)),
            param("identity", ParamValue::Text("stable".to_string())),
            param("continuity", ParamValue::Text("default".to_string())),
        ],
        caps: role(BlockRole::Composite, CardinalityMode::Transform),
        tail: TailSpec::Inherit,
        body: BlockBody::Composite(CompositeDef {
            blocks: vec![
                block("arr", "Array"),
                block("layout", "CircleLayout"),
                block("hue", "HueColor"),
                block("render", "Render"),
            ],
            edges: vec![
                (inner("arr", "turn"), inner("layout", "t")),
                (inner("arr", "turn"), inner("hue", "hue")),
                (inner("layout", "pos"), inner("render", "pos")),
                (inner("hue", "color"), inner("render", "color")),
            ],
            inputs: vec![
                ExposedPort {
                    name: "count",
                    inner: inner("arr", "count"),
                },
                ExposedPort {
                    name: "phase",
                    inner: inner("layout", "phase"),
                },
            ],
            outputs: vec![ExposedPort {
                name: "pos",
                inner: inner("layout", "pos"),
            }],
            forwarded_params: vec![
                ("count", inner("arr", "count")),
                ("identity", inner("arr", "identity")),
                ("continuity", inner("render", "continuity")),
            ],
        }),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_registers() {
        let reg = standard_registry().unwrap();
        for name in ["TimeRoot", "Const", "Array", "Render", "DotRing", "NormalizedToPhase"] {
            assert!(reg.lookup(name).is_some(), "{name}");
        }
        assert!(reg.unit_adapter(Unit::Phase, Unit::Radians).is_some());
        assert!(reg.unit_adapter(Unit::Seconds, Unit::Phase).is_none());
        assert_eq!(reg.default_source(), reg.lookup("Const"));
        assert_eq!(reg.broadcast_adapter(), reg.lookup("Broadcast"));
    }

    #[test]
    fn stateful_flags_come_from_capabilities() {
        let reg = standard_registry().unwrap();
        let stateful: Vec<&str> = ["UnitDelay", "Accumulator", "SampleHold", "Threshold", "Add"]
            .into_iter()
            .filter(|n| reg.lookup(n).is_some_and(|id| reg.get(id).caps.stateful))
            .collect();
        assert_eq!(stateful, vec!["UnitDelay", "Accumulator", "SampleHold"]);
    }

    #[test]
    fn only_time_root_is_singleton() {
        let reg = standard_registry().unwrap();
        let id = reg.lookup("TimeRoot").unwrap();
        assert!(reg.get(id).caps.singleton);
        let id = reg.lookup("Array").unwrap();
        assert!(!reg.get(id).caps.singleton);
    }

    #[test]
    fn composite_ports_resolve() {
        let reg = standard_registry().unwrap();
        let ring = reg.get(reg.lookup("DotRing").unwrap());
        assert!(ring.is_composite());
        assert_eq!(ring.input_index("phase"), Some(1));
        assert_eq!(ring.output_index("pos"), Some(0));
    }
}
