// runtime/mod.rs — Frame runtime
//
// Executes a compiled schedule once per frame against a persistent
// `RuntimeState`. Everything here is single-threaded; `&mut RuntimeState`
// serializes frames and hot swaps.

pub mod continuity;
pub mod executor;
pub mod render;
pub mod state;

use std::collections::HashMap;

use thiserror::Error;

use crate::diag::Diagnostic;

pub use executor::{execute_frame, BufferPool};
pub use render::{DrawInstruction, Geometry, ShapeKind, Style, Transform};
pub use state::{MigrationReport, RuntimeState, TimeState};

/// Fatal invariant violations. A frame that returns one of these produced
/// no output and committed no state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("value v{0} has no slot")]
    MissingSlot(u32),
    #[error("value v{value} has {found} components per element, expected {expected}")]
    BadStride {
        value: u32,
        expected: usize,
        found: usize,
    },
    #[error("value v{value} has no components for element {element}")]
    MissingOperand { value: u32, element: usize },
    #[error("kernel at v{value} takes {expected} arguments, found {found}")]
    BadArity {
        value: u32,
        expected: usize,
        found: usize,
    },
    #[error("schedule step references unknown {what} #{index}")]
    UnknownReference { what: &'static str, index: u32 },
    #[error("value v{0} is not computed by a schedule step")]
    NotEvaluable(u32),
    #[error("state array holds {found} values, program needs {expected}")]
    StateLayout { expected: usize, found: usize },
}

/// Named `f64` channels the host supplies each frame.
#[derive(Debug, Clone, Default)]
pub struct ExternalInputs {
    channels: HashMap<String, Vec<f64>>,
}

impl ExternalInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, channel: impl Into<String>, value: impl Into<Vec<f64>>) -> &mut Self {
        self.channels.insert(channel.into(), value.into());
        self
    }

    pub fn get(&self, channel: &str) -> Option<&[f64]> {
        self.channels.get(channel).map(Vec::as_slice)
    }
}

/// Output of one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    pub draw: Vec<DrawInstruction>,
    /// Non-fatal conditions (missing inputs, continuity fallbacks).
    pub diagnostics: Vec<Diagnostic>,
}
