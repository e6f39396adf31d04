// registry.rs — Block definition registry
//
// A `BlockRegistry` is an immutable value handed to normalization and
// lowering. Each `BlockDef` is opaque to the compiler: a typed port list,
// a capability record, parameter defaults, and either a pure lowering
// function or a composite body to expand.
//
// Capabilities are resolved once, when normalization looks a block type up
// by name. Later passes read `BlockCapabilities` and never match on names.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::lower::{BlockInputs, LowerCtx, LowerError};
use crate::patch::ParamValue;
use crate::types::{Binding, Branch, PayloadType, Perspective, Temporality, Unit};
use crate::id::ValueId;

// ── Port type templates ─────────────────────────────────────────────────────

/// One axis of a port type: fixed, or a variable named within the block.
/// Variables with the same name on the same block instance are the same
/// variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AxisSpec<T> {
    Fixed(T),
    Var(&'static str),
}

/// Cardinality template of a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CardSpec {
    Zero,
    One,
    /// Polymorphic; shares the variable with other ports naming it.
    Var(&'static str),
    /// Must resolve to `many(_)`; the instance is a block-scoped variable.
    Field(&'static str),
    /// Cardinality-preserving operand: outputs are the join of every
    /// `Join` input on the block.
    Join,
    /// `many` over the domain this block creates.
    OwnInstance,
}

/// Declared shape of one port.
#[derive(Debug, Clone, Serialize)]
pub struct PortDecl {
    pub name: &'static str,
    pub payload: AxisSpec<PayloadType>,
    pub unit: AxisSpec<Unit>,
    pub card: CardSpec,
    pub temporality: AxisSpec<Temporality>,
    /// Value used when an input is left unconnected. `None` makes the
    /// input required.
    pub default: Option<Vec<f64>>,
}

impl PortDecl {
    pub fn new(
        name: &'static str,
        payload: AxisSpec<PayloadType>,
        unit: AxisSpec<Unit>,
        card: CardSpec,
    ) -> Self {
        PortDecl {
            name,
            payload,
            unit,
            card,
            temporality: AxisSpec::Fixed(Temporality::Continuous),
            default: None,
        }
    }

    /// Fixed-payload, fixed-unit port.
    pub fn fixed(name: &'static str, payload: PayloadType, unit: Unit, card: CardSpec) -> Self {
        Self::new(name, AxisSpec::Fixed(payload), AxisSpec::Fixed(unit), card)
    }

    /// Discrete boolean unit-less port.
    pub fn event(name: &'static str) -> Self {
        PortDecl {
            temporality: AxisSpec::Fixed(Temporality::Discrete),
            ..Self::fixed(name, PayloadType::Bool, Unit::None, CardSpec::One)
        }
    }

    pub fn with_default(mut self, value: &[f64]) -> Self {
        self.default = Some(value.to_vec());
        self
    }

    pub fn with_temporality(mut self, t: AxisSpec<Temporality>) -> Self {
        self.temporality = t;
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    /// Statically known cardinality requirement, used by normalization to
    /// decide on broadcast adapters before types are solved.
    pub fn requires_many(&self) -> bool {
        matches!(self.card, CardSpec::Field(_) | CardSpec::OwnInstance)
    }

    pub fn is_fixed_scalar(&self) -> bool {
        matches!(self.card, CardSpec::Zero | CardSpec::One)
    }

    pub fn fixed_unit(&self) -> Option<Unit> {
        match self.unit {
            AxisSpec::Fixed(u) => Some(u),
            AxisSpec::Var(_) => None,
        }
    }
}

/// Binding / perspective / branch template shared by all ports of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TailSpec {
    /// One block-scoped variable per axis, defaulted when unconstrained.
    Inherit,
    Fixed(Binding, Perspective, Branch),
}

// ── Capabilities ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CardinalityMode {
    SignalOnly,
    Preserve,
    FieldOnly,
    /// Creates a new domain.
    Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockRole {
    TimeRoot,
    Source,
    Operator,
    Domain { domain_type: &'static str },
    Sink,
    Adapter,
    DefaultSource,
    Composite,
}

/// Closed capability record, resolved once per block during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockCapabilities {
    /// Outputs depend only on state written in the previous frame, so the
    /// block breaks dependency cycles.
    pub stateful: bool,
    /// At most one instance per patch.
    pub singleton: bool,
    pub cardinality: CardinalityMode,
    pub role: BlockRole,
}

impl BlockCapabilities {
    pub fn operator(cardinality: CardinalityMode) -> Self {
        BlockCapabilities {
            stateful: false,
            singleton: false,
            cardinality,
            role: BlockRole::Operator,
        }
    }
}

// ── Parameters ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ParamDecl {
    pub name: &'static str,
    pub default: ParamValue,
}

// ── Block bodies ────────────────────────────────────────────────────────────

/// Pure lowering: resolved inputs in, output values out (one per output
/// port, in declaration order).
pub type LowerFn = fn(&mut LowerCtx<'_>, &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError>;

/// Runs after every block is lowered, with all inputs available. Emits
/// the block's state writes.
pub type CommitFn = fn(&mut LowerCtx<'_>, &BlockInputs<'_>) -> Result<(), LowerError>;

/// A port of a composite's inner graph.
#[derive(Debug, Clone, Serialize)]
pub struct InnerPort {
    pub block: &'static str,
    pub port: &'static str,
}

/// Exposed port of a composite, forwarded to an inner block's port.
#[derive(Debug, Clone, Serialize)]
pub struct ExposedPort {
    pub name: &'static str,
    pub inner: InnerPort,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeBlock {
    pub id: &'static str,
    pub block_type: &'static str,
    pub params: BTreeMap<String, ParamValue>,
}

/// Macro block: expanded by normalization into its inner graph.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeDef {
    pub blocks: Vec<CompositeBlock>,
    pub edges: Vec<(InnerPort, InnerPort)>,
    pub inputs: Vec<ExposedPort>,
    pub outputs: Vec<ExposedPort>,
    /// Composite param → (inner block, inner param).
    pub forwarded_params: Vec<(&'static str, InnerPort)>,
}

#[derive(Clone)]
pub enum BlockBody {
    Primitive {
        lower: LowerFn,
        commit: Option<CommitFn>,
    },
    Composite(CompositeDef),
}

/// A registered block type.
#[derive(Clone)]
pub struct BlockDef {
    pub type_name: &'static str,
    pub inputs: Vec<PortDecl>,
    pub outputs: Vec<PortDecl>,
    pub params: Vec<ParamDecl>,
    pub caps: BlockCapabilities,
    pub tail: TailSpec,
    pub body: BlockBody,
}

impl BlockDef {
    pub fn input_index(&self, name: &str) -> Option<usize> {
        match &self.body {
            BlockBody::Composite(c) => c.inputs.iter().position(|p| p.name == name),
            BlockBody::Primitive { .. } => self.inputs.iter().position(|p| p.name == name),
        }
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        match &self.body {
            BlockBody::Composite(c) => c.outputs.iter().position(|p| p.name == name),
            BlockBody::Primitive { .. } => self.outputs.iter().position(|p| p.name == name),
        }
    }

    pub fn param_default(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.default)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.body, BlockBody::Composite(_))
    }
}

impl std::fmt::Debug for BlockDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDef")
            .field("type_name", &self.type_name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("caps", &self.caps)
            .finish()
    }
}

// ── Adapters ────────────────────────────────────────────────────────────────

/// Unit conversion that normalization may insert on an edge.
#[derive(Debug, Clone, Serialize)]
pub struct UnitAdapter {
    pub from: Unit,
    pub to: Unit,
    pub block_type: &'static str,
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate block type '{0}'")]
    DuplicateBlock(String),
    #[error("block type '{block}': port '{port}' declared twice")]
    DuplicatePort { block: String, port: String },
    #[error("composite '{block}' references unknown inner block '{inner}'")]
    UnknownInnerBlock { block: String, inner: String },
    #[error("adapter {from:?}->{to:?} names unregistered block type '{block}'")]
    UnknownAdapter { from: Unit, to: Unit, block: String },
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Dense handle to a registered block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockDefId(pub u32);

/// Immutable catalog of block types plus adapter rules.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    defs: Vec<BlockDef>,
    by_name: HashMap<&'static str, BlockDefId>,
    unit_adapters: Vec<UnitAdapter>,
    broadcast: Option<&'static str>,
    default_source: Option<&'static str>,
}

#[derive(Serialize)]
struct DefSummary<'a> {
    name: &'a str,
    inputs: &'a [PortDecl],
    outputs: &'a [PortDecl],
    params: &'a [ParamDecl],
    caps: &'a BlockCapabilities,
    tail: &'a TailSpec,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: BlockDef) -> Result<BlockDefId, RegistryError> {
        if self.by_name.contains_key(def.type_name) {
            return Err(RegistryError::DuplicateBlock(def.type_name.to_string()));
        }
        for ports in [&def.inputs, &def.outputs] {
            for (i, p) in ports.iter().enumerate() {
                if ports[..i].iter().any(|q| q.name == p.name) {
                    return Err(RegistryError::DuplicatePort {
                        block: def.type_name.to_string(),
                        port: p.name.to_string(),
                    });
                }
            }
        }
        if let BlockBody::Composite(c) = &def.body {
            for edge in &c.edges {
                for end in [&edge.0, &edge.1] {
                    if !c.blocks.iter().any(|b| b.id == end.block) {
                        return Err(RegistryError::UnknownInnerBlock {
                            block: def.type_name.to_string(),
                            inner: end.block.to_string(),
                        });
                    }
                }
            }
        }
        let id = BlockDefId(self.defs.len() as u32);
        self.by_name.insert(def.type_name, id);
        self.defs.push(def);
        Ok(id)
    }

    pub fn register_unit_adapter(
        &mut self,
        from: Unit,
        to: Unit,
        block_type: &'static str,
    ) -> Result<(), RegistryError> {
        if !self.by_name.contains_key(block_type) {
            return Err(RegistryError::UnknownAdapter {
                from,
                to,
                block: block_type.to_string(),
            });
        }
        self.unit_adapters.push(UnitAdapter {
            from,
            to,
            block_type,
        });
        Ok(())
    }

    pub fn set_broadcast_adapter(&mut self, block_type: &'static str) {
        self.broadcast = Some(block_type);
    }

    pub fn set_default_source(&mut self, block_type: &'static str) {
        self.default_source = Some(block_type);
    }

    pub fn lookup(&self, name: &str) -> Option<BlockDefId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: BlockDefId) -> &BlockDef {
        &self.defs[id.0 as usize]
    }

    pub fn unit_adapter(&self, from: Unit, to: Unit) -> Option<BlockDefId> {
        self.unit_adapters
            .iter()
            .find(|a| a.from == from && a.to == to)
            .and_then(|a| self.lookup(a.block_type))
    }

    pub fn broadcast_adapter(&self) -> Option<BlockDefId> {
        self.broadcast.and_then(|n| self.lookup(n))
    }

    pub fn default_source(&self) -> Option<BlockDefId> {
        self.default_source.and_then(|n| self.lookup(n))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Canonical compact JSON of every definition's declared surface,
    /// in name order. Stable across runs; used for program fingerprints.
    pub fn canonical_json(&self) -> String {
        let mut defs: Vec<&BlockDef> = self.defs.iter().collect();
        defs.sort_by_key(|d| d.type_name);
        let summaries: Vec<DefSummary<'_>> = defs
            .iter()
            .map(|d| DefSummary {
                name: d.type_name,
                inputs: &d.inputs,
                outputs: &d.outputs,
                params: &d.params,
                caps: &d.caps,
                tail: &d.tail,
            })
            .collect();
        serde_json::to_string(&summaries).unwrap_or_default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
