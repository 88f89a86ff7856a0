//! Braid Workflow
//!
//! This crate provides the graph compiler for braid. Compiling a
//! [`braid_config::WorkflowDef`] yields a [`CompiledWorkflow`]: a validated
//! form of the definition that is ready for execution.
//!
//! Key differences from `braid-config`:
//! - Graph structure is validated (unique steps, known edges, no self-loops, acyclic)
//! - Variable references are checked to point at upstream steps
//! - Edge mappings are merged into the target steps' parameters
//! - Entry points, ancestors and descendants are available
//!
//! The compiled form is a validity certificate rather than a fixed schedule:
//! the engine may run independent branches in any interleaving, as long as no
//! step starts before every step with an edge into it is terminal.

mod compile;
mod error;
mod graph;
mod workflow;

pub use compile::compile;
pub use error::GraphError;
pub use graph::Graph;
pub use workflow::CompiledWorkflow;
