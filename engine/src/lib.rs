// patchflow — typed dataflow patches compiled to two-phase frame schedules
//
// Library root. Compiler passes run in module order below `patch`; the
// runtime executes their output.

pub mod axis;
pub mod config;
pub mod demos;
pub mod diag;
pub mod graph;
pub mod id;
pub mod ir;
pub mod lower;
pub mod normalize;
pub mod pass;
pub mod patch;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod stdlib;
pub mod type_infer;
pub mod types;

pub use pipeline::{compile, inspect, CompiledProgramIR};
pub use runtime::{execute_frame, BufferPool, ExternalInputs, RuntimeState};
