// patch.rs — The authored dataflow graph handed to `compile()`
//
// A patch is plain data produced by an external editor: blocks with
// stable string ids, a block type name, parameter values, and edges
// between named ports. Nothing here is validated; normalization reports
// every structural problem.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A parameter value as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Numbers(Vec<f64>),
    Text(String),
    Bool(bool),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Numbers(v) if v.len() == 1 => Some(v[0]),
            ParamValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_numbers(&self) -> Option<Vec<f64>> {
        match self {
            ParamValue::Number(n) => Some(vec![*n]),
            ParamValue::Numbers(v) => Some(v.clone()),
            ParamValue::Bool(b) => Some(vec![if *b { 1.0 } else { 0.0 }]),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One block instance in the authored graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchBlock {
    /// Stable id, unique within the patch. Survives edits and recompiles.
    pub id: String,
    pub block_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

/// `(block id, port name)` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub block: String,
    pub port: String,
}

impl PortRef {
    pub fn new(block: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            port: port.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEdge {
    pub from: PortRef,
    pub to: PortRef,
}

/// The authored graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub blocks: Vec<PatchBlock>,
    pub edges: Vec<PatchEdge>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block and return its id for chaining into `connect`.
    pub fn block(&mut self, id: &str, block_type: &str) -> &mut PatchBlock {
        self.blocks.push(PatchBlock {
            id: id.to_string(),
            block_type: block_type.to_string(),
            params: BTreeMap::new(),
        });
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    /// Connect `from_block.from_port` to `to_block.to_port`.
    pub fn connect(&mut self, from: (&str, &str), to: (&str, &str)) -> &mut Self {
        self.edges.push(PatchEdge {
            from: PortRef::new(from.0, from.1),
            to: PortRef::new(to.0, to.1),
        });
        self
    }

    pub fn find_block(&self, id: &str) -> Option<&PatchBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn find_block_mut(&mut self, id: &str) -> Option<&mut PatchBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }
}

impl PatchBlock {
    pub fn param(&mut self, name: &str, value: ParamValue) -> &mut Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn num(&mut self, name: &str, value: f64) -> &mut Self {
        self.param(name, ParamValue::Number(value))
    }

    pub fn nums(&mut self, name: &str, values: &[f64]) -> &mut Self {
        self.param(name, ParamValue::Numbers(values.to_vec()))
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.param(name, ParamValue::Text(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chains() {
        let mut p = Patch::new();
        p.block("k", "Const").num("value", 5.0);
        p.block("arr", "Array");
        p.connect(("k", "out"), ("arr", "count"));
        assert_eq!(p.blocks.len(), 2);
        assert_eq!(p.edges[0].to, PortRef::new("arr", "count"));
        assert_eq!(
            p.find_block("k").unwrap().params["value"],
            ParamValue::Number(5.0)
        );
    }

    #[test]
    fn param_coercions() {
        assert_eq!(ParamValue::Number(2.0).as_numbers(), Some(vec![2.0]));
        assert_eq!(ParamValue::Numbers(vec![3.0]).as_f64(), Some(3.0));
        assert_eq!(ParamValue::Numbers(vec![1.0, 2.0]).as_f64(), None);
        assert_eq!(ParamValue::Text("circle".into()).as_str(), Some("circle"));
        assert_eq!(ParamValue::Bool(true).as_f64(), Some(1.0));
    }

    #[test]
    fn untagged_json_params() {
        let json = r#"{"blocks":[{"id":"k","block_type":"Const","params":{"value":[0.5,0.5]}}],"edges":[]}"#;
        let p: Patch = serde_json::from_str(json).unwrap();
        assert_eq!(
            p.blocks[0].params["value"],
            ParamValue::Numbers(vec![0.5, 0.5])
        );
    }
}
