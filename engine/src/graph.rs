// graph.rs — Block dependency graph, SCCs and lowering order
//
// Builds integer adjacency over normalized block indices, runs Tarjan's
// SCC algorithm, and checks that every feedback cycle crosses a stateful
// block. Stateful blocks read the previous frame, so edges into them are
// cut before the legality check and before computing the lowering order.
//
// Preconditions: `graph` is normalized.
// Postconditions: on success `order` lists every block exactly once, and
//   every cut-graph edge goes from an earlier block to a later one.
// Failure modes: any remaining cycle → `CycleWithoutStateBoundary`.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::diag::{Diagnostic, ErrorKind, Location};
use crate::id::BlockIdx;
use crate::normalize::NormalizedGraph;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DependencyAnalysis {
    /// Strongly connected components of the full dependency graph, in
    /// Tarjan completion order. Members are sorted by index.
    pub sccs: Vec<Vec<BlockIdx>>,
    /// Topological order over the graph with edges into stateful blocks
    /// removed.
    pub order: Vec<BlockIdx>,
    /// Number of edges cut at stateful blocks.
    pub cut_edges: usize,
}

pub struct DependencyResult {
    pub analysis: DependencyAnalysis,
    pub diagnostics: Vec<Diagnostic>,
}

/// Integer adjacency list: `succ[a]` holds every `b` with an edge `a → b`.
#[derive(Debug, Clone)]
pub struct Adjacency {
    pub succ: Vec<Vec<usize>>,
}

impl Adjacency {
    fn new(n: usize) -> Self {
        Adjacency {
            succ: vec![Vec::new(); n],
        }
    }

    fn add(&mut self, from: usize, to: usize) {
        if !self.succ[from].contains(&to) {
            self.succ[from].push(to);
        }
    }

    fn has_self_edge(&self, v: usize) -> bool {
        self.succ[v].contains(&v)
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn analyze(graph: &NormalizedGraph) -> DependencyResult {
    let n = graph.blocks.len();
    let mut full = Adjacency::new(n);
    let mut cut = Adjacency::new(n);
    let mut cut_edges = 0;
    for e in &graph.edges {
        let (from, to) = (e.from.0 as usize, e.to.0 as usize);
        full.add(from, to);
        if graph.blocks[to].caps.stateful {
            cut_edges += 1;
        } else {
            cut.add(from, to);
        }
    }

    let sccs: Vec<Vec<BlockIdx>> = tarjan_scc(&full)
        .into_iter()
        .map(|c| c.into_iter().map(|v| BlockIdx(v as u32)).collect())
        .collect();

    let mut diagnostics = Vec::new();
    for comp in tarjan_scc(&cut) {
        if comp.len() == 1 && !cut.has_self_edge(comp[0]) {
            continue;
        }
        let names: Vec<&str> = comp
            .iter()
            .map(|&v| graph.blocks[v].stable_id.as_str())
            .collect();
        let mut d = Diagnostic::error(
            ErrorKind::CycleWithoutStateBoundary,
            Location::block(names[0]),
            format!(
                "feedback cycle through [{}] has no stateful block",
                names.join(", ")
            ),
        )
        .with_hint("insert a UnitDelay (or another stateful block) into the loop");
        for name in &names[1..] {
            d = d.with_related(Location::block(*name), "cycle member");
        }
        diagnostics.push(d);
    }

    let order = if diagnostics.is_empty() {
        topological_order(&cut)
    } else {
        Vec::new()
    };
    debug!(
        blocks = n,
        sccs = sccs.len(),
        cut_edges,
        cycles = diagnostics.len(),
        "dependency analysis"
    );
    DependencyResult {
        analysis: DependencyAnalysis {
            sccs,
            order: order.into_iter().map(|v| BlockIdx(v as u32)).collect(),
            cut_edges,
        },
        diagnostics,
    }
}

// ── Tarjan ──────────────────────────────────────────────────────────────────

/// Tarjan's SCC algorithm, iterative. Components are returned in
/// completion order with members sorted ascending.
pub fn tarjan_scc(adj: &Adjacency) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = adj.succ.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next = 0;
    let mut out = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        // (vertex, next successor position)
        let mut work: Vec<(usize, usize)> = vec![(root, 0)];
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(&(v, pos)) = work.last() {
            if let Some(&w) = adj.succ[v].get(pos) {
                if let Some(top) = work.last_mut() {
                    top.1 += 1;
                }
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }
            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut comp = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    comp.push(w);
                    if w == v {
                        break;
                    }
                }
                comp.sort_unstable();
                out.push(comp);
            }
        }
    }
    out
}

// ── Topological order ───────────────────────────────────────────────────────

/// Kahn's algorithm; ready blocks are taken lowest index first so the order
/// is deterministic.
fn topological_order(adj: &Adjacency) -> Vec<usize> {
    let n = adj.succ.len();
    let mut in_degree = vec![0u32; n];
    for succ in &adj.succ {
        for &w in succ {
            in_degree[w] += 1;
        }
    }
    let mut ready: BTreeSet<usize> = (0..n).filter(|&v| in_degree[v] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(v) = ready.pop_first() {
        order.push(v);
        for &w in &adj.succ[v] {
            in_degree[w] -= 1;
            if in_degree[w] == 0 {
                ready.insert(w);
            }
        }
    }
    order
}

impl fmt::Display for DependencyAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order: Vec<String> = self.order.iter().map(|b| format!("b{}", b.0)).collect();
        writeln!(f, "order: {}", order.join(" "))?;
        for comp in self.sccs.iter().filter(|c| c.len() > 1) {
            let members: Vec<String> = comp.iter().map(|b| format!("b{}", b.0)).collect();
            writeln!(f, "scc: {{{}}}", members.join(", "))?;
        }
        write!(f, "cut edges: {}", self.cut_edges)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::patch::Patch;
    use crate::stdlib::standard_registry;

    fn adj(n: usize, edges: &[(usize, usize)]) -> Adjacency {
        let mut a = Adjacency::new(n);
        for &(x, y) in edges {
            a.add(x, y);
        }
        a
    }

    #[test]
    fn tarjan_finds_components() {
        let a = adj(5, &[(0, 1), (1, 2), (2, 0), (3, 4)]);
        let mut sccs = tarjan_scc(&a);
        sccs.sort();
        assert_eq!(sccs, vec![vec![0, 1, 2], vec![3], vec![4]]);
    }

    #[test]
    fn kahn_is_lowest_index_first() {
        let a = adj(4, &[(3, 0), (2, 1)]);
        assert_eq!(topological_order(&a), vec![2, 1, 3, 0]);
    }

    fn feedback_patch(delay: bool) -> Patch {
        let mut p = Patch::new();
        p.block("time", "TimeRoot");
        p.block("add", "Add");
        p.connect(("time", "phase"), ("add", "a"));
        if delay {
            p.block("delay", "UnitDelay");
            p.connect(("add", "out"), ("delay", "in"));
            p.connect(("delay", "out"), ("add", "b"));
        } else {
            p.connect(("add", "out"), ("add", "b"));
        }
        p
    }

    #[test]
    fn self_feedback_without_state_is_rejected() {
        let reg = standard_registry().unwrap();
        let n = normalize(&feedback_patch(false), &reg, 16);
        let r = analyze(&n.graph);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(
            r.diagnostics[0].kind(),
            Some(ErrorKind::CycleWithoutStateBoundary)
        );
        assert_eq!(r.diagnostics[0].location, Location::block("add"));
    }

    #[test]
    fn delay_breaks_the_cycle() {
        let reg = standard_registry().unwrap();
        let n = normalize(&feedback_patch(true), &reg, 16);
        let r = analyze(&n.graph);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(r.analysis.order.len(), n.graph.blocks.len());
        assert!(r.analysis.sccs.iter().any(|c| c.len() == 2));
        let pos = |id: &str| {
            let idx = n.graph.find(id).unwrap().idx;
            r.analysis.order.iter().position(|b| *b == idx).unwrap()
        };
        assert!(pos("delay") < pos("add"));
    }
}
