// axis.rs — Axis validation gate
//
// The only producer of `CanonicalType` for ports. Converts solved port
// types into concrete canonical types or reports every violation.
//
// Preconditions: `resolution` came from `type_infer::resolve` on `graph`.
// Postconditions: on success every port of every block has a fully
//   concrete `CanonicalType`; discrete values are bool/none; every `many`
//   names an instance created by a domain block of `graph`; signal-only
//   blocks touch no field and field-only blocks touch at least one.
// Failure modes: unresolved variables, discrete non-bool values, fields
//   without a domain, fields over instances no block creates, ports that
//   break the block's cardinality mode.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::diag::{Diagnostic, ErrorKind, Location};
use crate::normalize::{NormBlock, NormalizedGraph};
use crate::registry::{BlockDef, BlockRegistry, BlockRole, CardinalityMode};
use crate::type_infer::{PortTypes, SolvedCard, SolvedPort, TypeResolution};
use crate::types::{CanonicalType, Cardinality, Extent, InstanceRef, PayloadType, Temporality, Unit};

/// Normalized graph with concrete port types.
#[derive(Debug, Clone, Serialize)]
pub struct TypedGraph {
    pub graph: NormalizedGraph,
    /// Indexed by `BlockIdx`.
    pub ports: Vec<PortTypes<CanonicalType>>,
}

impl TypedGraph {
    pub fn input_types(&self, block: usize) -> &[CanonicalType] {
        &self.ports[block].inputs
    }

    pub fn output_types(&self, block: usize) -> &[CanonicalType] {
        &self.ports[block].outputs
    }
}

impl fmt::Display for TypedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (block, ports) in self.graph.blocks.iter().zip(&self.ports) {
            writeln!(f, "{} : {}", block.stable_id, block.type_name)?;
            for (i, t) in ports.inputs.iter().enumerate() {
                writeln!(f, "  in{i}  {t}")?;
            }
            for (i, t) in ports.outputs.iter().enumerate() {
                writeln!(f, "  out{i} {t}")?;
            }
        }
        Ok(())
    }
}

/// Run the gate. Returns every violation; there is no partial result.
pub fn validate(
    graph: &NormalizedGraph,
    resolution: &TypeResolution,
    registry: &BlockRegistry,
) -> Result<TypedGraph, Vec<Diagnostic>> {
    let domains: Vec<InstanceRef> = graph
        .blocks
        .iter()
        .filter_map(|b| match b.caps.role {
            BlockRole::Domain { domain_type } => {
                Some(InstanceRef::new(domain_type, b.stable_id.clone()))
            }
            _ => None,
        })
        .collect();

    let mut errors = Vec::new();
    let mut ports = Vec::with_capacity(graph.blocks.len());
    for (block, solved) in graph.blocks.iter().zip(&resolution.ports) {
        let def = registry.get(block.def);
        let mut check = |name: &'static str, s: &SolvedPort| {
            let loc = Location::port(block.stable_id.clone(), name);
            match concretize(s, &domains) {
                Ok(t) => Some(t),
                Err(msg) => {
                    errors.push(violation(block, loc, msg));
                    None
                }
            }
        };
        let inputs: Vec<Option<CanonicalType>> = def
            .inputs
            .iter()
            .zip(&solved.inputs)
            .map(|(p, s)| check(p.name, s))
            .collect();
        let outputs: Vec<Option<CanonicalType>> = def
            .outputs
            .iter()
            .zip(&solved.outputs)
            .map(|(p, s)| check(p.name, s))
            .collect();
        errors.extend(cardinality_mode(block, def, &inputs, &outputs));
        ports.push(PortTypes {
            inputs: inputs.into_iter().flatten().collect::<Vec<_>>(),
            outputs: outputs.into_iter().flatten().collect::<Vec<_>>(),
        });
    }

    if errors.is_empty() {
        Ok(TypedGraph {
            graph: graph.clone(),
            ports,
        })
    } else {
        Err(errors)
    }
}

/// Check concrete port types against the block's declared cardinality mode.
fn cardinality_mode(
    block: &NormBlock,
    def: &BlockDef,
    inputs: &[Option<CanonicalType>],
    outputs: &[Option<CanonicalType>],
) -> Vec<Diagnostic> {
    let names = def.inputs.iter().chain(&def.outputs).map(|p| p.name);
    let types: Vec<(&'static str, &Option<CanonicalType>)> = names.zip(inputs.iter().chain(outputs)).collect();
    match block.caps.cardinality {
        CardinalityMode::SignalOnly => types
            .iter()
            .filter_map(|(name, t)| {
                let inst = t.as_ref()?.instance()?;
                Some(Diagnostic::error(
                    ErrorKind::CardinalityMismatch,
                    Location::port(block.stable_id.clone(), *name),
                    format!("{} is signal-only, found a field over {inst}", block.type_name),
                ))
            })
            .collect(),
        CardinalityMode::FieldOnly => {
            let concrete = types.iter().all(|(_, t)| t.is_some());
            let any_field = types
                .iter()
                .any(|(_, t)| t.as_ref().is_some_and(|t| t.instance().is_some()));
            if concrete && !any_field {
                vec![Diagnostic::error(
                    ErrorKind::CardinalityMismatch,
                    Location::block(block.stable_id.clone()),
                    format!("{} works on fields, but none of its ports is one", block.type_name),
                )]
            } else {
                Vec::new()
            }
        }
        CardinalityMode::Preserve | CardinalityMode::Transform => Vec::new(),
    }
}

enum Violation {
    Unresolved(&'static str),
    Axis(String),
}

fn violation(block: &NormBlock, loc: Location, v: Violation) -> Diagnostic {
    match v {
        Violation::Unresolved(axis) => Diagnostic::error(
            ErrorKind::UnresolvedTypeVariable,
            loc,
            format!("{axis} of this port could not be inferred"),
        )
        .with_hint(format!(
            "connect '{}' to a port with a concrete {axis}, or remove it",
            block.stable_id
        )),
        Violation::Axis(msg) => Diagnostic::error(ErrorKind::AxisViolation, loc, msg),
    }
}

fn concretize(s: &SolvedPort, domains: &[InstanceRef]) -> Result<CanonicalType, Violation> {
    let payload = s.payload.ok_or(Violation::Unresolved("payload"))?;
    let unit = s.unit.ok_or(Violation::Unresolved("unit"))?;
    let temporality = s.temporality.ok_or(Violation::Unresolved("temporality"))?;
    let cardinality = match s.cardinality.as_ref().ok_or(Violation::Unresolved("cardinality"))? {
        SolvedCard::Zero => Cardinality::Zero,
        SolvedCard::One => Cardinality::One,
        SolvedCard::Many(None) => {
            return Err(Violation::Axis(
                "expected a field over a concrete domain, found many(?)".to_string(),
            ))
        }
        SolvedCard::Many(Some(inst)) => {
            if !domains.contains(inst) {
                return Err(Violation::Axis(format!(
                    "field refers to instance {inst}, which no domain block creates"
                )));
            }
            Cardinality::Many(inst.clone())
        }
    };
    if temporality == Temporality::Discrete && (payload != PayloadType::Bool || unit != Unit::None)
    {
        return Err(Violation::Axis(format!(
            "discrete values must be bool<none>, found {}<{}>",
            payload.name(),
            unit.name()
        )));
    }
    Ok(CanonicalType::new(
        payload,
        unit,
        Extent {
            cardinality,
            temporality,
            binding: s.binding,
            perspective: s.perspective,
            branch: s.branch,
        },
    ))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ValueId;
    use crate::lower::{BlockInputs, LowerCtx, LowerError};
    use crate::normalize::normalize;
    use crate::patch::Patch;
    use crate::registry::{AxisSpec, BlockBody, BlockCapabilities, CardSpec, PortDecl, TailSpec};
    use crate::stdlib::standard_registry;
    use crate::types::{Binding, Branch, Perspective};

    fn no_values(_: &mut LowerCtx<'_>, _: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
        Ok(Vec::new())
    }

    /// A sink with one polymorphic input and the given cardinality mode.
    fn sink(name: &'static str, mode: CardinalityMode) -> BlockDef {
        BlockDef {
            type_name: name,
            inputs: vec![PortDecl::new(
                "in",
                AxisSpec::Var("T"),
                AxisSpec::Var("U"),
                CardSpec::Var("C"),
            )],
            outputs: vec![],
            params: vec![],
            caps: BlockCapabilities::operator(mode),
            tail: TailSpec::Inherit,
            body: BlockBody::Primitive {
                lower: no_values,
                commit: None,
            },
        }
    }

    fn registry() -> BlockRegistry {
        let mut reg = standard_registry().unwrap();
        reg.register(sink("Meter", CardinalityMode::SignalOnly)).unwrap();
        reg.register(sink("Scatter", CardinalityMode::FieldOnly)).unwrap();
        reg
    }

    /// `from` feeding a `block_type` block named `sink`.
    fn typed(block_type: &str, from: (&str, &str)) -> Result<TypedGraph, Vec<Diagnostic>> {
        let reg = registry();
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array").num("count", 3.0);
        p.block("sink", block_type);
        p.connect(from, ("sink", "in"));
        let n = normalize(&p, &reg, 16);
        assert!(n.diagnostics.iter().all(|d| !d.is_error()), "{:?}", n.diagnostics);
        let r = crate::type_infer::resolve(&n.graph, &reg);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        validate(&n.graph, &r, &reg)
    }

    #[test]
    fn signal_only_block_rejects_a_field() {
        assert!(typed("Meter", ("time", "phase")).is_ok());
        let errors = typed("Meter", ("arr", "t")).expect_err("field into a signal-only block");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), Some(ErrorKind::CardinalityMismatch));
        assert_eq!(errors[0].location, Location::port("sink", "in"));
    }

    #[test]
    fn field_only_block_needs_a_field() {
        assert!(typed("Scatter", ("arr", "t")).is_ok());
        let errors = typed("Scatter", ("time", "phase")).expect_err("signal into a field-only block");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), Some(ErrorKind::CardinalityMismatch));
        assert_eq!(errors[0].location, Location::block("sink"));
    }

    fn solved() -> SolvedPort {
        SolvedPort {
            payload: Some(PayloadType::Float),
            unit: Some(Unit::Scalar),
            cardinality: Some(SolvedCard::One),
            temporality: Some(Temporality::Continuous),
            binding: Binding::Unbound,
            perspective: Perspective::Default,
            branch: Branch::Main,
        }
    }

    #[test]
    fn concrete_signal_passes() {
        let t = concretize(&solved(), &[]).ok().unwrap();
        assert_eq!(t, CanonicalType::signal(PayloadType::Float, Unit::Scalar));
    }

    #[test]
    fn unresolved_unit_is_rejected() {
        let s = SolvedPort {
            unit: None,
            ..solved()
        };
        assert!(matches!(
            concretize(&s, &[]),
            Err(Violation::Unresolved("unit"))
        ));
    }

    #[test]
    fn discrete_must_be_bool_none() {
        let s = SolvedPort {
            temporality: Some(Temporality::Discrete),
            ..solved()
        };
        assert!(matches!(concretize(&s, &[]), Err(Violation::Axis(_))));
    }

    #[test]
    fn field_needs_known_domain() {
        let inst = InstanceRef::new("array", "dots");
        let s = SolvedPort {
            cardinality: Some(SolvedCard::Many(Some(inst.clone()))),
            ..solved()
        };
        assert!(concretize(&s, &[]).is_err());
        let t = concretize(&s, &[inst.clone()]).ok().unwrap();
        assert_eq!(t.instance(), Some(&inst));
        let anon = SolvedPort {
            cardinality: Some(SolvedCard::Many(None)),
            ..solved()
        };
        assert!(concretize(&anon, &[inst]).is_err());
    }
}
