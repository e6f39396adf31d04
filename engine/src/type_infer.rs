// type_infer.rs — Type resolution over the normalized graph
//
// Introduces one type variable per polymorphic axis of every port, unifies
// variables across edges with union-find, and solves cardinality-preserving
// operators with join constraints (`output ⊒ ⊔ inputs`).
//
// Preconditions: graph is normalized (every input has one incoming edge,
//   adapters inserted, composites expanded).
// Postconditions: every port has a `SolvedPort`; axes that nothing
//   constrained are `None` except binding/perspective/branch, which take
//   their defaults. Axis validation decides whether the result is legal.
// Failure modes: payload/unit/temporality/cardinality conflicts on an
//   edge; joins over two different instances.
// Side effects: none.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::diag::{Diagnostic, ErrorKind, Location};
use crate::normalize::{NormBlock, NormalizedGraph};
use crate::registry::{AxisSpec, BlockRegistry, BlockRole, CardSpec, PortDecl, TailSpec};
use crate::types::{Binding, Branch, InstanceRef, PayloadType, Perspective, Temporality, Unit};

// ── Output types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SolvedCard {
    Zero,
    One,
    /// `None` when the instance variable was never bound to a domain.
    Many(Option<InstanceRef>),
}

/// A port type after unification. `None` marks an unresolved variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolvedPort {
    pub payload: Option<PayloadType>,
    pub unit: Option<Unit>,
    pub cardinality: Option<SolvedCard>,
    pub temporality: Option<Temporality>,
    pub binding: Binding,
    pub perspective: Perspective,
    pub branch: Branch,
}

/// Per-block port types, indexed like the block definition's port lists.
#[derive(Debug, Clone, Serialize)]
pub struct PortTypes<T> {
    pub inputs: Vec<T>,
    pub outputs: Vec<T>,
}

#[derive(Debug)]
pub struct TypeResolution {
    /// Indexed by `BlockIdx`.
    pub ports: Vec<PortTypes<SolvedPort>>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Union-find ──────────────────────────────────────────────────────────────

struct UnionFind<V> {
    parent: Vec<usize>,
    value: Vec<Option<V>>,
}

impl<V: Clone + PartialEq> UnionFind<V> {
    fn new() -> Self {
        UnionFind {
            parent: Vec::new(),
            value: Vec::new(),
        }
    }

    fn fresh(&mut self, value: Option<V>) -> usize {
        self.parent.push(self.parent.len());
        self.value.push(value);
        self.parent.len() - 1
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn get(&mut self, x: usize) -> Option<V> {
        let r = self.find(x);
        self.value[r].clone()
    }

    fn set(&mut self, x: usize, v: V) {
        let r = self.find(x);
        self.value[r] = Some(v);
    }

    /// Merge two classes whose values must be equal.
    fn unify(&mut self, a: usize, b: usize) -> Result<(), (V, V)> {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return Ok(());
        }
        match (&self.value[ra], &self.value[rb]) {
            (Some(x), Some(y)) if x != y => return Err((x.clone(), y.clone())),
            (None, Some(_)) => {
                self.parent[ra] = rb;
                return Ok(());
            }
            _ => {}
        }
        self.parent[rb] = ra;
        Ok(())
    }
}

// ── Cardinality terms ───────────────────────────────────────────────────────

/// Resolved value of a cardinality class; `Many` points at an instance
/// variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardTerm {
    Zero,
    One,
    Many(usize),
}

fn rank(t: CardTerm) -> u8 {
    match t {
        CardTerm::Zero => 0,
        CardTerm::One => 1,
        CardTerm::Many(_) => 2,
    }
}

#[derive(Debug, Clone, Copy)]
struct PortVars {
    payload: usize,
    unit: usize,
    card: usize,
    temp: usize,
    binding: usize,
    perspective: usize,
    branch: usize,
}

struct JoinConstraint {
    block: usize,
    output: usize,
    inputs: Vec<usize>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Solve every port type of `graph`.
pub fn resolve(graph: &NormalizedGraph, registry: &BlockRegistry) -> TypeResolution {
    let mut s = Solver::new();
    let mut vars: Vec<PortTypes<PortVars>> = Vec::with_capacity(graph.blocks.len());
    for block in &graph.blocks {
        vars.push(s.declare_block(block, registry));
    }
    for edge in &graph.edges {
        let src = vars[edge.from.0 as usize].outputs[edge.from_port];
        let dst = vars[edge.to.0 as usize].inputs[edge.to_port];
        let to = graph.block(edge.to);
        let from = graph.block(edge.from);
        let to_def = registry.get(to.def);
        let from_def = registry.get(from.def);
        let loc = Location::port(to.stable_id.clone(), to_def.inputs[edge.to_port].name);
        let src_loc = Location::port(from.stable_id.clone(), from_def.outputs[edge.from_port].name);
        s.unify_ports(src, dst, loc, src_loc);
    }
    s.solve_joins();
    s.default_sources();
    s.solve_joins();
    s.check_joins(graph);

    let ports = vars
        .iter()
        .map(|pt| PortTypes {
            inputs: pt.inputs.iter().map(|v| s.solved(v)).collect(),
            outputs: pt.outputs.iter().map(|v| s.solved(v)).collect(),
        })
        .collect();
    debug!(
        classes = s.card.parent.len(),
        errors = s.diagnostics.len(),
        "resolved port types"
    );
    TypeResolution {
        ports,
        diagnostics: s.diagnostics,
    }
}

// ── Solver ──────────────────────────────────────────────────────────────────

struct Solver {
    payload: UnionFind<PayloadType>,
    unit: UnionFind<Unit>,
    card: UnionFind<CardTerm>,
    instance: UnionFind<InstanceRef>,
    temp: UnionFind<Temporality>,
    binding: UnionFind<Binding>,
    perspective: UnionFind<Perspective>,
    branch: UnionFind<Branch>,
    joins: Vec<JoinConstraint>,
    /// `(cardinality, temporality)` classes of source outputs that become
    /// `zero` and `continuous` when nothing else constrains them.
    source_defaults: Vec<(usize, usize)>,
    diagnostics: Vec<Diagnostic>,
}

impl Solver {
    fn new() -> Self {
        Solver {
            payload: UnionFind::new(),
            unit: UnionFind::new(),
            card: UnionFind::new(),
            instance: UnionFind::new(),
            temp: UnionFind::new(),
            binding: UnionFind::new(),
            perspective: UnionFind::new(),
            branch: UnionFind::new(),
            joins: Vec::new(),
            source_defaults: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn declare_block(&mut self, block: &NormBlock, registry: &BlockRegistry) -> PortTypes<PortVars> {
        let def = registry.get(block.def);
        let (binding, perspective, branch) = match def.tail {
            TailSpec::Inherit => (
                self.binding.fresh(None),
                self.perspective.fresh(None),
                self.branch.fresh(None),
            ),
            TailSpec::Fixed(b, p, r) => (
                self.binding.fresh(Some(b)),
                self.perspective.fresh(Some(p)),
                self.branch.fresh(Some(r)),
            ),
        };
        let mut scope = BlockScope {
            named: HashMap::new(),
            join_output: None,
            join_inputs: Vec::new(),
            tail: (binding, perspective, branch),
        };
        let own_instance = match block.caps.role {
            BlockRole::Domain { domain_type } => {
                Some(InstanceRef::new(domain_type, block.stable_id.clone()))
            }
            _ => None,
        };

        let inputs: Vec<PortVars> = def
            .inputs
            .iter()
            .map(|p| self.port_vars(p, &mut scope, true, own_instance.as_ref()))
            .collect();
        let outputs: Vec<PortVars> = def
            .outputs
            .iter()
            .map(|p| self.port_vars(p, &mut scope, false, own_instance.as_ref()))
            .collect();

        if def.inputs.is_empty() {
            for v in &outputs {
                self.source_defaults.push((v.card, v.temp));
            }
        }
        if let Some(output) = scope.join_output {
            self.joins.push(JoinConstraint {
                block: block.idx.0 as usize,
                output,
                inputs: scope.join_inputs,
            });
        }
        PortTypes { inputs, outputs }
    }

    fn port_vars(
        &mut self,
        p: &PortDecl,
        scope: &mut BlockScope,
        is_input: bool,
        own_instance: Option<&InstanceRef>,
    ) -> PortVars {
        let payload = match p.payload {
            AxisSpec::Fixed(v) => self.payload.fresh(Some(v)),
            AxisSpec::Var(n) => scope.var("payload", n, &mut self.payload),
        };
        let unit = match p.unit {
            AxisSpec::Fixed(v) => self.unit.fresh(Some(v)),
            AxisSpec::Var(n) => scope.var("unit", n, &mut self.unit),
        };
        let temp = match p.temporality {
            AxisSpec::Fixed(v) => self.temp.fresh(Some(v)),
            AxisSpec::Var(n) => scope.var("temporality", n, &mut self.temp),
        };
        let card = match p.card {
            CardSpec::Zero => self.card.fresh(Some(CardTerm::Zero)),
            CardSpec::One => self.card.fresh(Some(CardTerm::One)),
            CardSpec::Var(n) => scope.var("card", n, &mut self.card),
            CardSpec::Field(n) => {
                let inst = scope.var("instance", n, &mut self.instance);
                self.card.fresh(Some(CardTerm::Many(inst)))
            }
            CardSpec::Join => {
                if is_input {
                    let v = self.card.fresh(None);
                    scope.join_inputs.push(v);
                    v
                } else {
                    *scope
                        .join_output
                        .get_or_insert_with(|| self.card.fresh(None))
                }
            }
            CardSpec::OwnInstance => {
                let inst = self.instance.fresh(own_instance.cloned());
                self.card.fresh(Some(CardTerm::Many(inst)))
            }
        };
        let (binding, perspective, branch) = scope.tail;
        PortVars {
            payload,
            unit,
            card,
            temp,
            binding,
            perspective,
            branch,
        }
    }

    // ── Edge unification ────────────────────────────────────────────────

    fn unify_ports(&mut self, src: PortVars, dst: PortVars, loc: Location, src_loc: Location) {
        if let Err((want, got)) = self.payload.unify(dst.payload, src.payload) {
            self.mismatch(
                ErrorKind::TypeMismatch,
                &loc,
                &src_loc,
                "payload",
                want.name(),
                got.name(),
            );
        }
        if let Err((want, got)) = self.unit.unify(dst.unit, src.unit) {
            self.mismatch(
                ErrorKind::UnitMismatch,
                &loc,
                &src_loc,
                "unit",
                want.name(),
                got.name(),
            );
        }
        if let Err((want, got)) = self.temp.unify(dst.temp, src.temp) {
            self.mismatch(
                ErrorKind::TypeMismatch,
                &loc,
                &src_loc,
                "temporality",
                &format!("{want:?}").to_lowercase(),
                &format!("{got:?}").to_lowercase(),
            );
        }
        if let Err((want, got)) = self.unify_card(dst.card, src.card) {
            let (w, g) = (self.card_name(want), self.card_name(got));
            self.mismatch(ErrorKind::CardinalityMismatch, &loc, &src_loc, "cardinality", &w, &g);
        }
        let tail_ok = self.binding.unify(dst.binding, src.binding).is_ok()
            && self.perspective.unify(dst.perspective, src.perspective).is_ok()
            && self.branch.unify(dst.branch, src.branch).is_ok();
        if !tail_ok {
            self.diagnostics.push(
                Diagnostic::error(
                    ErrorKind::AxisViolation,
                    loc,
                    "binding, perspective or branch differs across this edge",
                )
                .with_related(src_loc, "source port"),
            );
        }
    }

    fn mismatch(
        &mut self,
        kind: ErrorKind,
        loc: &Location,
        src_loc: &Location,
        axis: &str,
        expected: &str,
        found: &str,
    ) {
        self.diagnostics.push(
            Diagnostic::error(
                kind,
                loc.clone(),
                format!("{axis} mismatch: expected {expected}, found {found}"),
            )
            .with_related(src_loc.clone(), format!("source produces {found}")),
        );
    }

    fn unify_card(&mut self, a: usize, b: usize) -> Result<(), (CardTerm, CardTerm)> {
        let (ra, rb) = (self.card.find(a), self.card.find(b));
        if ra == rb {
            return Ok(());
        }
        if let (Some(CardTerm::Many(ia)), Some(CardTerm::Many(ib))) =
            (self.card.value[ra], self.card.value[rb])
        {
            if self.instance.unify(ia, ib).is_err() {
                return Err((CardTerm::Many(ia), CardTerm::Many(ib)));
            }
            self.card.parent[rb] = ra;
            return Ok(());
        }
        self.card.unify(a, b)
    }

    fn card_name(&mut self, t: CardTerm) -> String {
        match t {
            CardTerm::Zero => "zero".to_string(),
            CardTerm::One => "one".to_string(),
            CardTerm::Many(i) => match self.instance.get(i) {
                Some(inst) => format!("many({inst})"),
                None => "many(?)".to_string(),
            },
        }
    }

    // ── Join constraints ────────────────────────────────────────────────

    /// Propagate `output ⊒ ⊔ inputs` to unresolved outputs until nothing
    /// changes. Joins whose inputs are all known go first; when those run
    /// out, a join with some known inputs takes the least upper bound of
    /// those, which yields the least solution through feedback loops.
    fn solve_joins(&mut self) {
        loop {
            if !self.propagate_joins(false) && !self.propagate_joins(true) {
                break;
            }
        }
    }

    fn propagate_joins(&mut self, partial: bool) -> bool {
        let mut changed = false;
        for j in 0..self.joins.len() {
            let out = self.joins[j].output;
            if self.card.get(out).is_some() {
                continue;
            }
            let inputs = self.joins[j].inputs.clone();
            let known: Vec<CardTerm> = inputs.iter().filter_map(|&v| self.card.get(v)).collect();
            if known.is_empty() || (!partial && known.len() < inputs.len()) {
                continue;
            }
            if let Ok(lub) = self.join_terms(&known) {
                self.card.set(out, lub);
                changed = true;
                if partial {
                    break;
                }
            }
        }
        changed
    }

    /// Report every join whose inputs exceed its output.
    fn check_joins(&mut self, graph: &NormalizedGraph) {
        for j in 0..self.joins.len() {
            let inputs = self.joins[j].inputs.clone();
            let terms: Option<Vec<CardTerm>> = inputs.iter().map(|&v| self.card.get(v)).collect();
            let Some(terms) = terms else { continue };
            let block = &graph.blocks[self.joins[j].block];
            let lub = match self.join_terms(&terms) {
                Ok(lub) => lub,
                Err((x, y)) => {
                    let (x, y) = (self.card_name(x), self.card_name(y));
                    self.diagnostics.push(
                        Diagnostic::error(
                            ErrorKind::CardinalityMismatch,
                            Location::block(block.stable_id.clone()),
                            format!("cannot combine fields over different domains {x} and {y}"),
                        )
                        .with_hint("route both inputs from the same domain"),
                    );
                    continue;
                }
            };
            if let Some(existing) = self.card.get(self.joins[j].output) {
                self.check_bound(lub, existing, block);
            }
        }
    }

    fn join_terms(&mut self, terms: &[CardTerm]) -> Result<CardTerm, (CardTerm, CardTerm)> {
        let mut acc = CardTerm::Zero;
        for &t in terms {
            acc = match (acc, t) {
                (CardTerm::Many(a), CardTerm::Many(b)) => {
                    if self.instance.unify(a, b).is_err() {
                        return Err((acc, t));
                    }
                    CardTerm::Many(a)
                }
                (a, b) => {
                    if rank(b) > rank(a) {
                        b
                    } else {
                        a
                    }
                }
            };
        }
        Ok(acc)
    }

    /// `lub ≤ existing` must hold for an already-constrained output.
    fn check_bound(&mut self, lub: CardTerm, existing: CardTerm, block: &NormBlock) {
        let ok = match (lub, existing) {
            (CardTerm::Many(a), CardTerm::Many(b)) => self.instance.unify(a, b).is_ok(),
            (CardTerm::Many(_), _) => false,
            (l, e) => rank(l) <= rank(e),
        };
        if !ok {
            let (l, e) = (self.card_name(lub), self.card_name(existing));
            self.diagnostics.push(Diagnostic::error(
                ErrorKind::CardinalityMismatch,
                Location::block(block.stable_id.clone()),
                format!("inputs have cardinality {l} but the output is used as {e}"),
            ));
        }
    }

    /// Unconstrained source outputs are continuous compile-time constants.
    fn default_sources(&mut self) {
        for (card, temp) in self.source_defaults.clone() {
            if self.card.get(card).is_none() {
                self.card.set(card, CardTerm::Zero);
            }
            if self.temp.get(temp).is_none() {
                self.temp.set(temp, Temporality::Continuous);
            }
        }
    }

    // ── Read-back ───────────────────────────────────────────────────────

    fn solved(&mut self, v: &PortVars) -> SolvedPort {
        let cardinality = self.card.get(v.card).map(|t| match t {
            CardTerm::Zero => SolvedCard::Zero,
            CardTerm::One => SolvedCard::One,
            CardTerm::Many(i) => SolvedCard::Many(self.instance.get(i)),
        });
        SolvedPort {
            payload: self.payload.get(v.payload),
            unit: self.unit.get(v.unit),
            cardinality,
            temporality: self.temp.get(v.temp),
            binding: self.binding.get(v.binding).unwrap_or(Binding::Unbound),
            perspective: self.perspective.get(v.perspective).unwrap_or(Perspective::Default),
            branch: self.branch.get(v.branch).unwrap_or(Branch::Main),
        }
    }
}

/// Block-local variable names.
struct BlockScope {
    named: HashMap<(&'static str, &'static str), usize>,
    join_output: Option<usize>,
    join_inputs: Vec<usize>,
    tail: (usize, usize, usize),
}

impl BlockScope {
    fn var<V: Clone + PartialEq>(
        &mut self,
        axis: &'static str,
        name: &'static str,
        uf: &mut UnionFind<V>,
    ) -> usize {
        *self
            .named
            .entry((axis, name))
            .or_insert_with(|| uf.fresh(None))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::patch::Patch;
    use crate::stdlib::standard_registry;

    fn solve(p: &Patch) -> (NormalizedGraph, TypeResolution) {
        let reg = standard_registry().unwrap();
        let n = normalize(p, &reg, 16);
        assert!(n.diagnostics.iter().all(|d| !d.is_error()), "{:?}", n.diagnostics);
        let r = resolve(&n.graph, &reg);
        (n.graph, r)
    }

    fn out(g: &NormalizedGraph, r: &TypeResolution, id: &str, port: usize) -> SolvedPort {
        r.ports[g.find(id).unwrap().idx.0 as usize].outputs[port].clone()
    }

    #[test]
    fn union_find_merges_values() {
        let mut uf: UnionFind<Unit> = UnionFind::new();
        let a = uf.fresh(None);
        let b = uf.fresh(Some(Unit::Phase));
        uf.unify(a, b).unwrap();
        assert_eq!(uf.get(a), Some(Unit::Phase));
        let c = uf.fresh(Some(Unit::Seconds));
        assert_eq!(uf.unify(a, c), Err((Unit::Phase, Unit::Seconds)));
    }

    #[test]
    fn join_of_signal_and_field_is_field() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array").num("count", 4.0);
        p.block("add", "Add");
        p.connect(("arr", "t"), ("add", "a"));
        p.connect(("time", "time"), ("add", "b"));
        let (g, r) = solve(&p);
        let add = out(&g, &r, "add", 0);
        assert_eq!(
            add.cardinality,
            Some(SolvedCard::Many(Some(InstanceRef::new("array", "arr"))))
        );
        assert!(r.diagnostics.iter().any(|d| d.kind() == Some(ErrorKind::UnitMismatch)));
    }

    #[test]
    fn unconnected_const_defaults_to_zero_cardinality() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array");
        let (g, r) = solve(&p);
        let count = out(&g, &r, "arr.count#default", 0);
        assert_eq!(count.cardinality, Some(SolvedCard::Zero));
        assert_eq!(count.payload, Some(PayloadType::Int));
        assert_eq!(count.unit, Some(Unit::Count));
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
    }

    #[test]
    fn fields_from_different_domains_do_not_join() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("a", "Array");
        p.block("b", "Array");
        p.block("add", "Add");
        p.connect(("a", "t"), ("add", "a"));
        p.connect(("b", "t"), ("add", "b"));
        let (_, r) = solve(&p);
        assert!(r
            .diagnostics
            .iter()
            .any(|d| d.kind() == Some(ErrorKind::CardinalityMismatch)));
    }

    #[test]
    fn time_root_stays_on_the_main_branch() {
        use crate::id::ValueId;
        use crate::lower::{BlockInputs, LowerCtx, LowerError};
        use crate::registry::{AxisSpec, BlockBody, BlockCapabilities, BlockDef, CardinalityMode, PortDecl};
        use crate::types::{Binding, Branch, Perspective};

        fn no_values(_: &mut LowerCtx<'_>, _: &BlockInputs<'_>) -> Result<Vec<ValueId>, LowerError> {
            Ok(Vec::new())
        }
        let mut reg = standard_registry().unwrap();
        reg.register(BlockDef {
            type_name: "PreviewScope",
            inputs: vec![PortDecl::new("in", AxisSpec::Var("T"), AxisSpec::Var("U"), CardSpec::Var("C"))],
            outputs: vec![],
            params: vec![],
            caps: BlockCapabilities::operator(CardinalityMode::Preserve),
            tail: TailSpec::Fixed(Binding::Unbound, Perspective::Default, Branch::Preview),
            body: BlockBody::Primitive {
                lower: no_values,
                commit: None,
            },
        })
        .unwrap();

        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("add", "Add");
        p.connect(("time", "phase"), ("add", "a"));
        let n = normalize(&p, &reg, 16);
        let r = resolve(&n.graph, &reg);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(out(&n.graph, &r, "time", 1).branch, Branch::Main);
        assert_eq!(out(&n.graph, &r, "add", 0).branch, Branch::Main);

        p.block("scope", "PreviewScope");
        p.connect(("time", "phase"), ("scope", "in"));
        let n = normalize(&p, &reg, 16);
        let r = resolve(&n.graph, &reg);
        let d = r
            .diagnostics
            .iter()
            .find(|d| d.kind() == Some(ErrorKind::AxisViolation))
            .expect("branch conflict");
        assert_eq!(d.location, Location::port("scope", "in"));
    }

    #[test]
    fn payload_conflict_reports_both_sides() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array");
        p.block("line", "LineLayout");
        p.block("add", "Add");
        p.connect(("line", "pos"), ("add", "a"));
        p.connect(("arr", "index"), ("add", "b"));
        p.connect(("arr", "t"), ("line", "t"));
        let (_, r) = solve(&p);
        let d = r
            .diagnostics
            .iter()
            .find(|d| d.kind() == Some(ErrorKind::TypeMismatch))
            .expect("payload mismatch");
        assert_eq!(d.location, Location::port("add", "b"));
        assert_eq!(d.related.len(), 1);
    }
}
