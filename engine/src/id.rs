// id.rs — Index and stable identifiers shared across passes
//
// Index ids (BlockIdx, ValueId, StateId, ...) are dense positions into the
// vectors of one compilation and may shift between compiles. `TargetKey`
// is the only identifier that survives recompilation: it is derived from
// authored block ids and is what hot-swap and continuity key on.

use std::fmt;

use serde::Serialize;

/// Position of a block in the normalized graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockIdx(pub u32);

/// Position of an edge in the normalized graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeIdx(pub u32);

/// Index of an IR expression. Allocation order is topological: an
/// expression only ever references ids allocated before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueId(pub u32);

/// Index of a declared persistent state cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StateId(pub u32);

/// Index of a domain instance in the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceIdx(pub u32);

/// Stable identifier that survives recompilation (e.g. `"osc.out"`,
/// `"ring/layout.pos#continuity"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetKey(pub String);

impl TargetKey {
    pub fn new(block: &str, label: &str) -> Self {
        TargetKey(format!("{block}.{label}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocator for dense ids. Produces monotonically increasing ids in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_value: u32,
    next_state: u32,
    next_instance: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    pub fn alloc_state(&mut self) -> StateId {
        let id = StateId(self.next_state);
        self.next_state += 1;
        id
    }

    pub fn alloc_instance(&mut self) -> InstanceIdx {
        let id = InstanceIdx(self.next_instance);
        self.next_instance += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic_per_kind() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_value(), ValueId(0));
        assert_eq!(ids.alloc_state(), StateId(0));
        assert_eq!(ids.alloc_value(), ValueId(1));
        assert_eq!(ids.alloc_instance(), InstanceIdx(0));
        assert_eq!(ids.alloc_state(), StateId(1));
    }

    #[test]
    fn target_key_joins_block_and_label() {
        assert_eq!(TargetKey::new("osc", "out").as_str(), "osc.out");
    }
}
