// normalize.rs — Patch → index-based normalized graph
//
// Expands composite blocks, resolves block types and port names once,
// inserts explicit default-source blocks for unconnected inputs, and
// inserts unit / broadcast adapter blocks on edges whose declared port
// shapes disagree.
//
// Preconditions: `patch` is arbitrary authored data; `registry` is immutable.
// Postconditions: every primitive input port has exactly one incoming
//   edge; every block carries its resolved `BlockDefId` and capabilities;
//   no composite blocks remain.
// Failure modes: unknown types/ports, duplicate ids, multiple writers,
//   missing required inputs, missing or duplicated singletons, unit pairs
//   without an adapter, composite nesting beyond the configured depth.
// Side effects: none.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::diag::{codes, DiagLevel, Diagnostic, ErrorKind, Location};
use crate::id::{BlockIdx, EdgeIdx};
use crate::patch::{ParamValue, Patch, PortRef};
use crate::registry::{
    BlockBody, BlockCapabilities, BlockDefId, BlockRegistry, BlockRole, CompositeDef,
};

/// Default maximum nesting of composite blocks.
pub const MAX_COMPOSITE_DEPTH: u32 = 16;

// ── Output types ────────────────────────────────────────────────────────────

/// Why a normalized block exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BlockOrigin {
    Authored,
    /// Expanded from the composite with the given stable id.
    Composite { parent: String },
    /// Default value for an unconnected input.
    DefaultSource { block: String, port: String },
    /// Conversion inserted on an edge.
    Adapter { block: String, port: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct NormBlock {
    pub idx: BlockIdx,
    /// Stable id; composite children are `parent/child`, synthesized blocks
    /// are `block.port#suffix`.
    pub stable_id: String,
    pub def: BlockDefId,
    pub type_name: &'static str,
    pub caps: BlockCapabilities,
    /// Declared defaults overridden by authored values.
    pub params: BTreeMap<String, ParamValue>,
    pub origin: BlockOrigin,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormEdge {
    pub idx: EdgeIdx,
    pub from: BlockIdx,
    pub from_port: usize,
    pub to: BlockIdx,
    pub to_port: usize,
}

/// The normalized graph: block array plus integer edge list.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedGraph {
    pub blocks: Vec<NormBlock>,
    pub edges: Vec<NormEdge>,
}

impl NormalizedGraph {
    pub fn block(&self, idx: BlockIdx) -> &NormBlock {
        &self.blocks[idx.0 as usize]
    }

    /// The single edge feeding `(block, port)`, if any.
    pub fn incoming(&self, block: BlockIdx, port: usize) -> Option<&NormEdge> {
        self.edges
            .iter()
            .find(|e| e.to == block && e.to_port == port)
    }

    pub fn find(&self, stable_id: &str) -> Option<&NormBlock> {
        self.blocks.iter().find(|b| b.stable_id == stable_id)
    }
}

impl fmt::Display for NormalizedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.blocks {
            writeln!(f, "b{} {} : {}", b.idx.0, b.stable_id, b.type_name)?;
        }
        for e in &self.edges {
            writeln!(f, "b{}.{} -> b{}.{}", e.from.0, e.from_port, e.to.0, e.to_port)?;
        }
        Ok(())
    }
}

pub struct NormalizeResult {
    pub graph: NormalizedGraph,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Normalize an authored patch against `registry`.
pub fn normalize(patch: &Patch, registry: &BlockRegistry, max_depth: u32) -> NormalizeResult {
    let mut n = Normalizer {
        registry,
        max_depth,
        blocks: Vec::new(),
        by_id: HashMap::new(),
        edges: Vec::new(),
        diagnostics: Vec::new(),
        port_maps: PortMaps::default(),
        pending_inner_edges: Vec::new(),
    };
    n.expand_blocks(patch);
    n.connect_edges(patch);
    n.check_singletons();
    n.insert_adapters();
    n.insert_default_sources();
    debug!(
        blocks = n.blocks.len(),
        edges = n.edges.len(),
        "normalized patch"
    );
    NormalizeResult {
        graph: NormalizedGraph {
            blocks: n.blocks,
            edges: n.edges,
        },
        diagnostics: n.diagnostics,
    }
}

// ── Internal builder ────────────────────────────────────────────────────────

/// Where an authored `(block, port)` lands after composite expansion.
type PortMap = HashMap<(String, String), PortRef>;

#[derive(Default)]
struct PortMaps {
    inputs: PortMap,
    outputs: PortMap,
}

struct Normalizer<'a> {
    registry: &'a BlockRegistry,
    max_depth: u32,
    blocks: Vec<NormBlock>,
    by_id: HashMap<String, BlockIdx>,
    edges: Vec<NormEdge>,
    diagnostics: Vec<Diagnostic>,
    /// Authored composite ports → primitive ports.
    port_maps: PortMaps,
    /// Composite inner edges, connected together with authored edges.
    pending_inner_edges: Vec<(PortRef, PortRef)>,
}

struct Expanded {
    inputs: PortMap,
    outputs: PortMap,
}

impl<'a> Normalizer<'a> {
    fn error(&mut self, kind: ErrorKind, location: Location, message: String) {
        self.diagnostics
            .push(Diagnostic::error(kind, location, message));
    }

    fn add_block(
        &mut self,
        stable_id: String,
        def: BlockDefId,
        authored: &BTreeMap<String, ParamValue>,
        origin: BlockOrigin,
    ) -> BlockIdx {
        let d = self.registry.get(def);
        let mut params: BTreeMap<String, ParamValue> = d
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.default.clone()))
            .collect();
        for (k, v) in authored {
            // A param named like an input port sets that port's default value.
            let is_port_default = d.inputs.iter().any(|p| p.name == k.as_str());
            if !params.contains_key(k) && !is_port_default {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagLevel::Warning,
                        Location::block(stable_id.clone()),
                        format!("block type '{}' has no parameter '{}'", d.type_name, k),
                    )
                    .with_code(codes::W0100),
                );
            }
            params.insert(k.clone(), v.clone());
        }
        let idx = BlockIdx(self.blocks.len() as u32);
        self.by_id.insert(stable_id.clone(), idx);
        self.blocks.push(NormBlock {
            idx,
            stable_id,
            def,
            type_name: d.type_name,
            caps: d.caps,
            params,
            origin,
        });
        idx
    }

    // ── Composite expansion ─────────────────────────────────────────────

    fn expand_blocks(&mut self, patch: &Patch) {
        let mut seen = HashSet::new();
        for block in &patch.blocks {
            if !seen.insert(block.id.clone()) {
                self.error(
                    ErrorKind::DuplicateBlockId,
                    Location::block(block.id.clone()),
                    format!("block id '{}' is used more than once", block.id),
                );
                continue;
            }
            let Some(def) = self.registry.lookup(&block.block_type) else {
                self.error(
                    ErrorKind::UnknownBlockType,
                    Location::block(block.id.clone()),
                    format!("unknown block type '{}'", block.block_type),
                );
                continue;
            };
            if let Some(exp) =
                self.expand_one(&block.id, def, &block.params, BlockOrigin::Authored, 0)
            {
                self.port_maps.inputs.extend(exp.inputs);
                self.port_maps.outputs.extend(exp.outputs);
            }
        }
    }

    /// Add a block (recursively expanding composites). Returns how its
    /// exposed ports map onto primitive blocks.
    fn expand_one(
        &mut self,
        stable_id: &str,
        def: BlockDefId,
        params: &BTreeMap<String, ParamValue>,
        origin: BlockOrigin,
        depth: u32,
    ) -> Option<Expanded> {
        let d = self.registry.get(def);
        let composite: CompositeDef = match &d.body {
            BlockBody::Primitive { .. } => {
                self.add_block(stable_id.to_string(), def, params, origin);
                return Some(Expanded {
                    inputs: PortMap::new(),
                    outputs: PortMap::new(),
                });
            }
            BlockBody::Composite(c) => c.clone(),
        };
        if depth >= self.max_depth {
            self.error(
                ErrorKind::CompositeDepthExceeded,
                Location::block(stable_id.to_string()),
                format!(
                    "composite '{}' expansion exceeds maximum depth ({})",
                    d.type_name, self.max_depth
                ),
            );
            return None;
        }

        let mut inner_maps = Expanded {
            inputs: PortMap::new(),
            outputs: PortMap::new(),
        };
        for inner in &composite.blocks {
            let inner_id = format!("{stable_id}/{}", inner.id);
            let Some(inner_def) = self.registry.lookup(inner.block_type) else {
                self.error(
                    ErrorKind::UnknownBlockType,
                    Location::block(inner_id),
                    format!("unknown block type '{}'", inner.block_type),
                );
                continue;
            };
            let mut inner_params = inner.params.clone();
            for (outer, target) in &composite.forwarded_params {
                if target.block == inner.id {
                    if let Some(v) = params.get(*outer) {
                        inner_params.insert(target.port.to_string(), v.clone());
                    }
                }
            }
            let child_origin = BlockOrigin::Composite {
                parent: stable_id.to_string(),
            };
            if let Some(exp) =
                self.expand_one(&inner_id, inner_def, &inner_params, child_origin, depth + 1)
            {
                inner_maps.inputs.extend(exp.inputs);
                inner_maps.outputs.extend(exp.outputs);
            }
        }

        // Inner edges are resolved immediately; endpoints may themselves be
        // nested composites.
        for (from, to) in &composite.edges {
            let src = resolve_endpoint(
                &inner_maps.outputs,
                &format!("{stable_id}/{}", from.block),
                from.port,
            );
            let dst = resolve_endpoint(
                &inner_maps.inputs,
                &format!("{stable_id}/{}", to.block),
                to.port,
            );
            self.pending_inner_edges.push((src, dst));
        }

        let mut exposed = Expanded {
            inputs: PortMap::new(),
            outputs: PortMap::new(),
        };
        for p in &composite.inputs {
            let target = resolve_endpoint(
                &inner_maps.inputs,
                &format!("{stable_id}/{}", p.inner.block),
                p.inner.port,
            );
            exposed
                .inputs
                .insert((stable_id.to_string(), p.name.to_string()), target);
        }
        for p in &composite.outputs {
            let source = resolve_endpoint(
                &inner_maps.outputs,
                &format!("{stable_id}/{}", p.inner.block),
                p.inner.port,
            );
            exposed
                .outputs
                .insert((stable_id.to_string(), p.name.to_string()), source);
        }
        exposed.inputs.extend(inner_maps.inputs);
        exposed.outputs.extend(inner_maps.outputs);
        Some(exposed)
    }

    // ── Edge resolution ─────────────────────────────────────────────────

    fn connect_edges(&mut self, patch: &Patch) {
        let inner = std::mem::take(&mut self.pending_inner_edges);
        let authored: Vec<(PortRef, PortRef)> = patch
            .edges
            .iter()
            .map(|e| {
                (
                    resolve_endpoint(&self.port_maps.outputs, &e.from.block, &e.from.port),
                    resolve_endpoint(&self.port_maps.inputs, &e.to.block, &e.to.port),
                )
            })
            .collect();

        let mut writers: HashMap<(BlockIdx, usize), String> = HashMap::new();
        for (from, to) in inner.into_iter().chain(authored) {
            let Some((src, src_port)) = self.resolve_port(&from, false) else {
                continue;
            };
            let Some((dst, dst_port)) = self.resolve_port(&to, true) else {
                continue;
            };
            if let Some(prev) = writers.get(&(dst, dst_port)) {
                let msg = format!(
                    "input '{}.{}' has more than one incoming edge",
                    to.block, to.port
                );
                let d = Diagnostic::error(
                    ErrorKind::MultipleWriters,
                    Location::port(to.block.clone(), to.port.clone()),
                    msg,
                )
                .with_related(Location::block(prev.clone()), "first writer");
                self.diagnostics.push(d);
                continue;
            }
            writers.insert((dst, dst_port), from.block.clone());
            self.push_edge(src, src_port, dst, dst_port);
        }
    }

    fn push_edge(&mut self, from: BlockIdx, from_port: usize, to: BlockIdx, to_port: usize) {
        let idx = EdgeIdx(self.edges.len() as u32);
        self.edges.push(NormEdge {
            idx,
            from,
            from_port,
            to,
            to_port,
        });
    }

    fn resolve_port(&mut self, r: &PortRef, input: bool) -> Option<(BlockIdx, usize)> {
        let Some(&idx) = self.by_id.get(&r.block) else {
            // Unknown or failed blocks already reported.
            if !self.diagnostics.iter().any(|d| {
                d.location.block.as_deref() == Some(r.block.as_str())
                    || d.location
                        .block
                        .as_deref()
                        .is_some_and(|b| r.block.starts_with(&format!("{b}/")))
            }) {
                self.error(
                    ErrorKind::UnknownPort,
                    Location::port(r.block.clone(), r.port.clone()),
                    format!("edge references unknown block '{}'", r.block),
                );
            }
            return None;
        };
        let def = self.registry.get(self.blocks[idx.0 as usize].def);
        let pos = if input {
            def.input_index(&r.port)
        } else {
            def.output_index(&r.port)
        };
        match pos {
            Some(p) => Some((idx, p)),
            None => {
                self.error(
                    ErrorKind::UnknownPort,
                    Location::port(r.block.clone(), r.port.clone()),
                    format!(
                        "block type '{}' has no {} port '{}'",
                        def.type_name,
                        if input { "input" } else { "output" },
                        r.port
                    ),
                );
                None
            }
        }
    }

    // ── Singletons ──────────────────────────────────────────────────────

    fn check_singletons(&mut self) {
        let roots: Vec<String> = self
            .blocks
            .iter()
            .filter(|b| b.caps.role == BlockRole::TimeRoot)
            .map(|b| b.stable_id.clone())
            .collect();
        if roots.is_empty() {
            self.diagnostics.push(
                Diagnostic::error(
                    ErrorKind::MissingTimeRoot,
                    Location::patch(),
                    "patch has no time root block",
                )
                .with_hint("add a TimeRoot block"),
            );
        }

        let mut first: HashMap<BlockDefId, String> = HashMap::new();
        let mut dups = Vec::new();
        for b in self.blocks.iter().filter(|b| b.caps.singleton) {
            match first.get(&b.def) {
                Some(prev) => dups.push((b.stable_id.clone(), b.type_name, prev.clone())),
                None => {
                    first.insert(b.def, b.stable_id.clone());
                }
            }
        }
        for (id, type_name, prev) in dups {
            self.diagnostics.push(
                Diagnostic::error(
                    ErrorKind::DuplicateSingleton,
                    Location::block(id),
                    format!("only one '{type_name}' block is allowed per patch"),
                )
                .with_related(Location::block(prev), "first instance"),
            );
        }
    }

    // ── Adapters ────────────────────────────────────────────────────────

    fn insert_adapters(&mut self) {
        let original = std::mem::take(&mut self.edges);
        for edge in original {
            let src_def = self.registry.get(self.blocks[edge.from.0 as usize].def);
            let dst_def = self.registry.get(self.blocks[edge.to.0 as usize].def);
            let src_decl = &src_def.outputs[edge.from_port];
            let dst_decl = &dst_def.inputs[edge.to_port];
            let dst_id = self.blocks[edge.to.0 as usize].stable_id.clone();
            let port_name = dst_decl.name.to_string();

            let mut chain: Vec<BlockDefId> = Vec::new();
            if let (Some(from), Some(to)) = (src_decl.fixed_unit(), dst_decl.fixed_unit()) {
                if from != to {
                    match self.registry.unit_adapter(from, to) {
                        Some(a) => chain.push(a),
                        None => {
                            let src_id = self.blocks[edge.from.0 as usize].stable_id.clone();
                            self.diagnostics.push(
                                Diagnostic::error(
                                    ErrorKind::UnitMismatch,
                                    Location::port(dst_id.clone(), port_name.clone()),
                                    format!(
                                        "cannot connect unit '{}' to unit '{}'",
                                        from.name(),
                                        to.name()
                                    ),
                                )
                                .with_related(
                                    Location::port(src_id, src_decl.name),
                                    "source port",
                                ),
                            );
                            continue;
                        }
                    }
                }
            }
            if src_decl.is_fixed_scalar() && dst_decl.requires_many() {
                if let Some(b) = self.registry.broadcast_adapter() {
                    chain.push(b);
                }
            }

            let (mut from, mut from_port) = (edge.from, edge.from_port);
            for adapter in chain {
                let a = self.registry.get(adapter);
                let id = format!("{dst_id}.{port_name}#{}", a.type_name);
                let origin = BlockOrigin::Adapter {
                    block: dst_id.clone(),
                    port: port_name.clone(),
                };
                let idx = self.add_block(id, adapter, &BTreeMap::new(), origin);
                self.push_edge(from, from_port, idx, 0);
                from = idx;
                from_port = 0;
            }
            self.push_edge(from, from_port, edge.to, edge.to_port);
        }
    }

    // ── Default sources ─────────────────────────────────────────────────

    fn insert_default_sources(&mut self) {
        let connected: HashSet<(BlockIdx, usize)> =
            self.edges.iter().map(|e| (e.to, e.to_port)).collect();
        let source_def = self.registry.default_source();
        let count = self.blocks.len();
        for i in 0..count {
            let (block_idx, def_id, stable_id) = {
                let b = &self.blocks[i];
                (b.idx, b.def, b.stable_id.clone())
            };
            let def = self.registry.get(def_id);
            for (port_idx, port) in def.inputs.iter().enumerate() {
                if connected.contains(&(block_idx, port_idx)) {
                    continue;
                }
                let authored = self.blocks[i].params.get(port.name).and_then(ParamValue::as_numbers);
                let (Some(value), Some(src)) = (authored.or_else(|| port.default.clone()), source_def)
                else {
                    self.error(
                        ErrorKind::MissingRequiredInput,
                        Location::port(stable_id.clone(), port.name),
                        format!("required input '{}' is not connected", port.name),
                    );
                    continue;
                };
                let mut params = BTreeMap::new();
                params.insert("value".to_string(), ParamValue::Numbers(value));
                let id = format!("{stable_id}.{}#default", port.name);
                let origin = BlockOrigin::DefaultSource {
                    block: stable_id.clone(),
                    port: port.name.to_string(),
                };
                let idx = self.add_block(id, src, &params, origin);
                self.push_edge(idx, 0, block_idx, port_idx);
            }
        }
    }
}

fn resolve_endpoint(map: &PortMap, block: &str, port: &str) -> PortRef {
    map.get(&(block.to_string(), port.to_string()))
        .cloned()
        .unwrap_or_else(|| PortRef::new(block, port))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::standard_registry;

    fn run(p: &Patch) -> NormalizeResult {
        normalize(p, &standard_registry().unwrap(), MAX_COMPOSITE_DEPTH)
    }

    fn kinds(r: &NormalizeResult) -> Vec<ErrorKind> {
        r.diagnostics.iter().filter_map(Diagnostic::kind).collect()
    }

    #[test]
    fn missing_time_root_is_reported() {
        let mut p = Patch::new();
        p.block("arr", "Array");
        assert_eq!(kinds(&run(&p)), vec![ErrorKind::MissingTimeRoot]);
    }

    #[test]
    fn second_time_root_is_rejected() {
        let mut p = Patch::new();
        p.block("t1", "TimeRoot");
        p.block("t2", "TimeRoot");
        let r = run(&p);
        assert_eq!(kinds(&r), vec![ErrorKind::DuplicateSingleton]);
        assert_eq!(r.diagnostics[0].location, Location::block("t2"));
    }

    #[test]
    fn unknown_type_and_port() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("x", "Nope");
        p.block("add", "Add");
        p.connect(("time", "phase"), ("add", "c"));
        p.connect(("x", "out"), ("add", "a"));
        let k = kinds(&run(&p));
        assert!(k.contains(&ErrorKind::UnknownBlockType));
        assert_eq!(k.iter().filter(|k| **k == ErrorKind::UnknownPort).count(), 1);
    }

    #[test]
    fn two_writers_on_one_input() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("add", "Add");
        p.connect(("time", "time"), ("add", "a"));
        p.connect(("time", "time"), ("add", "a"));
        let r = run(&p);
        assert_eq!(kinds(&r), vec![ErrorKind::MultipleWriters]);
        assert_eq!(r.diagnostics[0].related.len(), 1);
    }

    #[test]
    fn unconnected_inputs_get_default_sources() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array").num("count", 5.0);
        let r = run(&p);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let src = r.graph.find("arr.count#default").unwrap();
        assert_eq!(src.type_name, "Const");
        assert_eq!(src.params["value"], ParamValue::Numbers(vec![5.0]));
        assert_eq!(
            src.origin,
            BlockOrigin::DefaultSource {
                block: "arr".into(),
                port: "count".into()
            }
        );
        let arr = r.graph.find("arr").unwrap();
        let e = r.graph.incoming(arr.idx, 0).unwrap();
        assert_eq!(e.from, src.idx);
    }

    #[test]
    fn required_input_without_edge() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("line", "LineLayout");
        let r = run(&p);
        assert_eq!(kinds(&r), vec![ErrorKind::MissingRequiredInput]);
        assert_eq!(r.diagnostics[0].location, Location::port("line", "t"));
    }

    #[test]
    fn normalized_into_phase_gets_unit_adapter() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array");
        p.block("hue", "HueColor");
        p.connect(("arr", "t"), ("hue", "hue"));
        let r = run(&p);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let a = r.graph.find("hue.hue#NormalizedToPhase").unwrap();
        assert!(matches!(a.origin, BlockOrigin::Adapter { .. }));
    }

    #[test]
    fn unit_pair_without_adapter() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("hue", "HueColor");
        p.connect(("time", "time"), ("hue", "hue"));
        let r = run(&p);
        assert_eq!(kinds(&r), vec![ErrorKind::UnitMismatch]);
    }

    #[test]
    fn signal_into_field_port_gets_broadcast() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array");
        p.block("line", "LineLayout");
        p.block("ext", "External").text("channel", "size");
        p.block("render", "Render");
        p.connect(("arr", "t"), ("line", "t"));
        p.connect(("line", "pos"), ("render", "pos"));
        p.connect(("ext", "out"), ("render", "size"));
        let r = run(&p);
        assert!(r.graph.find("render.size#Broadcast").is_some());
    }

    #[test]
    fn composite_expands_with_forwarded_params() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("ring", "DotRing").num("count", 7.0);
        p.connect(("time", "phase"), ("ring", "phase"));
        let r = run(&p);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert!(r.graph.blocks.iter().all(|b| !b.type_name.eq("DotRing")));
        let arr = r.graph.find("ring/arr").unwrap();
        assert_eq!(
            arr.origin,
            BlockOrigin::Composite {
                parent: "ring".into()
            }
        );
        let count = r.graph.find("ring/arr.count#default").unwrap();
        assert_eq!(count.params["value"], ParamValue::Numbers(vec![7.0]));
        let layout = r.graph.find("ring/layout").unwrap();
        let time = r.graph.find("time").unwrap();
        assert!(r
            .graph
            .edges
            .iter()
            .any(|e| e.from == time.idx && e.to == layout.idx));
    }

    #[test]
    fn composite_depth_limit() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("ring", "DotRing");
        let r = normalize(&p, &standard_registry().unwrap(), 0);
        assert!(kinds(&r).contains(&ErrorKind::CompositeDepthExceeded));
    }

    #[test]
    fn unknown_param_warns() {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("arr", "Array").num("colour", 1.0);
        let r = run(&p);
        assert_eq!(r.diagnostics.len(), 1);
        assert!(!r.diagnostics[0].is_error());
        assert_eq!(r.diagnostics[0].code, Some(codes::W0100));
    }
}
