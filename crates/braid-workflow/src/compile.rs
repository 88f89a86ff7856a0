//! Graph compilation.
//!
//! Validates a [`WorkflowDef`] and produces a [`CompiledWorkflow`]:
//!
//! 1. step ids are unique
//! 2. no edge is a self-loop
//! 3. every edge names known steps
//! 4. the edges form a DAG (Kahn's algorithm)
//! 5. every variable reference names a step upstream of the referencing step

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use braid_config::{Condition, EdgeDef, ParamValue, VariableReference, WorkflowDef};
use minijinja::Environment;
use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::workflow::CompiledWorkflow;

/// Compile a workflow definition.
pub fn compile(definition: &WorkflowDef) -> Result<CompiledWorkflow, GraphError> {
  let mut steps = BTreeMap::new();
  for step in &definition.steps {
    if steps.insert(step.step_id.clone(), step.clone()).is_some() {
      return Err(GraphError::DuplicateStep {
        step_id: step.step_id.clone(),
      });
    }
  }

  // Self-loops are rejected regardless of the rest of the graph shape.
  if let Some(edge) = definition.edges.iter().find(|e| e.source == e.target) {
    return Err(GraphError::SelfLoop {
      step_id: edge.source.clone(),
    });
  }

  for edge in &definition.edges {
    for endpoint in [&edge.source, &edge.target] {
      if !steps.contains_key(endpoint) {
        return Err(GraphError::UnknownStepReference {
          step_id: endpoint.clone(),
          referenced_by: format!("edge '{}' -> '{}'", edge.source, edge.target),
        });
      }
    }
  }

  let order = topological_order(&steps, &definition.edges)?;
  let graph = Graph::new(&definition.steps, &definition.edges);

  // Feed edge mappings into target parameters. Explicit parameters win.
  for edge in &definition.edges {
    let mapped = edge
      .mapped_parameters()
      .map_err(|source| GraphError::InvalidReference {
        step_id: edge.target.clone(),
        source,
      })?;
    if let Some(target) = steps.get_mut(&edge.target) {
      for (name, reference) in mapped {
        target
          .parameters
          .entry(name)
          .or_insert(ParamValue::Reference(reference));
      }
    }
  }

  for step in steps.values() {
    let ancestors = graph.ancestors(&step.step_id);
    let incoming: Vec<&EdgeDef> = definition
      .edges
      .iter()
      .filter(|e| e.target == step.step_id)
      .collect();

    let mut references = step
      .references()
      .map_err(|source| GraphError::InvalidReference {
        step_id: step.step_id.clone(),
        source,
      })?;
    let mut conditions: Vec<&Condition> = step.condition.iter().collect();
    for edge in &incoming {
      if let Some(condition) = &edge.condition {
        references.extend(condition.references().into_iter().cloned());
        conditions.push(condition);
      }
    }

    let mut roots: BTreeSet<String> = references
      .iter()
      .map(|r: &VariableReference| r.source_step_id.clone())
      .collect();
    for condition in conditions {
      for expr in condition.expressions() {
        roots.extend(expression_roots(&step.step_id, expr)?);
      }
    }

    for source_step_id in roots {
      if !steps.contains_key(&source_step_id) {
        return Err(GraphError::UnknownStepReference {
          step_id: source_step_id,
          referenced_by: format!("step '{}'", step.step_id),
        });
      }
      if !ancestors.contains(&source_step_id) {
        return Err(GraphError::UnreachableReference {
          step_id: step.step_id.clone(),
          source_step_id,
        });
      }
    }

    if step.continue_on_error {
      warn!(
        workflow_id = %definition.workflow_id,
        step_id = %step.step_id,
        "continue_on_error is accepted but not honored; dependents of a failed step still halt"
      );
    }
  }

  debug!(
    workflow_id = %definition.workflow_id,
    steps = steps.len(),
    edges = definition.edges.len(),
    entry_points = ?graph.entry_points(),
    order = ?order,
    "workflow_compiled"
  );

  Ok(CompiledWorkflow {
    workflow_id: definition.workflow_id.clone(),
    name: definition.name.clone(),
    steps,
    edges: definition.edges.clone(),
    graph,
    order,
  })
}

/// Kahn's algorithm. Fails with the unextracted steps when a cycle exists.
fn topological_order<V>(
  steps: &BTreeMap<String, V>,
  edges: &[EdgeDef],
) -> Result<Vec<String>, GraphError> {
  let mut in_degree: BTreeMap<&str, usize> = steps.keys().map(|id| (id.as_str(), 0)).collect();
  let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

  for edge in edges {
    *in_degree.entry(edge.target.as_str()).or_default() += 1;
    successors
      .entry(edge.source.as_str())
      .or_default()
      .push(edge.target.as_str());
  }

  let mut queue: VecDeque<&str> = in_degree
    .iter()
    .filter(|(_, degree)| **degree == 0)
    .map(|(id, _)| *id)
    .collect();
  let mut order = Vec::with_capacity(steps.len());

  while let Some(id) = queue.pop_front() {
    order.push(id.to_string());
    for next in successors.get(id).into_iter().flatten() {
      if let Some(degree) = in_degree.get_mut(next) {
        *degree -= 1;
        if *degree == 0 {
          queue.push_back(next);
        }
      }
    }
  }

  if order.len() < steps.len() {
    let steps: Vec<String> = in_degree
      .into_iter()
      .filter(|(_, degree)| *degree > 0)
      .map(|(id, _)| id.to_string())
      .collect();
    return Err(GraphError::CycleDetected { steps });
  }

  Ok(order)
}

/// Top-level variable names of a condition expression. Each is a step id.
fn expression_roots(step_id: &str, expr: &str) -> Result<BTreeSet<String>, GraphError> {
  let env = Environment::new();
  let expression = env
    .compile_expression(expr)
    .map_err(|e| GraphError::InvalidExpression {
      step_id: step_id.to_string(),
      message: e.to_string(),
    })?;
  Ok(expression.undeclared_variables(false).into_iter().collect())
}
