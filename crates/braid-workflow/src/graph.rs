use std::collections::{BTreeSet, HashMap, VecDeque};

use braid_config::{EdgeDef, StepDef};

/// Graph structure for traversal and analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: step_id -> list of downstream step_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step_id -> list of upstream step_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Steps with no incoming edges, sorted.
  entry_points: Vec<String>,
}

impl Graph {
  /// Build a graph from steps and edges.
  ///
  /// Edges are assumed to reference known steps; repeated edges between the
  /// same pair of steps collapse into one adjacency entry.
  pub fn new(steps: &[StepDef], edges: &[EdgeDef]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for step in steps {
      adjacency.entry(step.step_id.clone()).or_default();
      reverse_adjacency.entry(step.step_id.clone()).or_default();
    }

    for edge in edges {
      let downstream = adjacency.entry(edge.source.clone()).or_default();
      if !downstream.contains(&edge.target) {
        downstream.push(edge.target.clone());
      }
      let upstream = reverse_adjacency.entry(edge.target.clone()).or_default();
      if !upstream.contains(&edge.source) {
        upstream.push(edge.source.clone());
      }
    }

    let mut entry_points: Vec<String> = steps
      .iter()
      .map(|s| &s.step_id)
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();
    entry_points.sort();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  /// Get entry points (steps with no incoming edges).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream steps for a given step.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream steps for a given step.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every step reachable by following edges backwards from `step_id`.
  pub fn ancestors(&self, step_id: &str) -> BTreeSet<String> {
    walk(step_id, |id| self.upstream(id))
  }

  /// Every step reachable by following edges forwards from `step_id`.
  pub fn descendants(&self, step_id: &str) -> BTreeSet<String> {
    walk(step_id, |id| self.downstream(id))
  }
}

fn walk<'a, F>(start: &str, next: F) -> BTreeSet<String>
where
  F: Fn(&str) -> &'a [String],
{
  let mut seen = BTreeSet::new();
  let mut queue: VecDeque<&str> = next(start).iter().map(|s| s.as_str()).collect();
  while let Some(id) = queue.pop_front() {
    if seen.insert(id.to_string()) {
      queue.extend(next(id).iter().map(|s| s.as_str()));
    }
  }
  seen
}

#[cfg(test)]
mod tests {
  use super::*;

  fn diamond() -> Graph {
    let steps: Vec<StepDef> = ["a", "b", "c", "d"]
      .iter()
      .map(|id| StepDef::new(*id, "noop"))
      .collect();
    let edges = vec![
      EdgeDef::new("a", "b"),
      EdgeDef::new("a", "c"),
      EdgeDef::new("b", "d"),
      EdgeDef::new("c", "d"),
      EdgeDef::new("c", "d"),
    ];
    Graph::new(&steps, &edges)
  }

  #[test]
  fn test_entry_points_and_collapsed_edges() {
    let graph = diamond();
    assert_eq!(graph.entry_points(), &["a".to_string()]);
    assert_eq!(graph.upstream("d").len(), 2);
  }

  #[test]
  fn test_ancestors_and_descendants() {
    let graph = diamond();
    let ancestors: Vec<_> = graph.ancestors("d").into_iter().collect();
    assert_eq!(ancestors, vec!["a", "b", "c"]);
    let descendants: Vec<_> = graph.descendants("a").into_iter().collect();
    assert_eq!(descendants, vec!["b", "c", "d"]);
    assert!(graph.descendants("d").is_empty());
  }
}
