use std::collections::BTreeMap;

use braid_config::{EdgeDef, StepDef};

use crate::graph::Graph;

/// A validated workflow, ready for execution.
///
/// Holding a `CompiledWorkflow` is proof that the definition forms a DAG over
/// known steps and that every variable reference points at an upstream step.
/// Step parameters already include values fed by edge mappings.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
  pub workflow_id: String,
  pub name: String,
  pub(crate) steps: BTreeMap<String, StepDef>,
  pub(crate) edges: Vec<EdgeDef>,
  pub(crate) graph: Graph,
  pub(crate) order: Vec<String>,
}

impl CompiledWorkflow {
  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&StepDef> {
    self.steps.get(step_id)
  }

  /// All steps, keyed by ID.
  pub fn steps(&self) -> &BTreeMap<String, StepDef> {
    &self.steps
  }

  /// Step IDs in sorted order.
  pub fn step_ids(&self) -> impl Iterator<Item = &String> {
    self.steps.keys()
  }

  /// The graph structure for traversal.
  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// One valid topological order of the steps.
  ///
  /// Execution does not follow this order exactly; independent branches may
  /// interleave in any way.
  pub fn topological_order(&self) -> &[String] {
    &self.order
  }

  /// Edges whose target is `step_id`.
  pub fn incoming_edges<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a EdgeDef> {
    self.edges.iter().filter(move |e| e.target == step_id)
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}
