//! Single graph abstraction over a workflow's steps.
//!
//! Steps may describe edges from either end: `dependencies` name
//! predecessors, `connections` name successors. `WorkflowGraph` merges both
//! into one edge set, so the engine (predecessor view), the simulation walker
//! and the validator (successor view) always see the same DAG.
//!
//! Uses `petgraph` for the edge set and reachability.
//! Cycle reporting uses its own explicit-stack DFS so the offending path can
//! be returned, not just one node on it.

use std::collections::{HashMap, HashSet};

use flowforge_types::workflow::WorkflowStep;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structural problems of a workflow graph. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate step id: '{0}'")]
    DuplicateStepId(String),

    #[error("circular dependency detected in steps: [{}]", step_ids.join(", "))]
    CircularDependency { step_ids: Vec<String> },
}

/// Which encoding an edge reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Dependency,
    Connection,
}

/// An edge naming a step id that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub step_id: String,
    pub target: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// Normalised DAG over a workflow's steps, in authoring order.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    steps: Vec<WorkflowStep>,
    index: HashMap<String, usize>,
    /// Ordered, deduplicated predecessor ids. Unknown ids are kept so the
    /// engine's runtime readiness check still blocks on them.
    preds: Vec<Vec<String>>,
    /// Ordered, deduplicated successor ids, unknown ids included.
    succs: Vec<Vec<String>>,
    /// Known successors by index, for traversal.
    succ_idx: Vec<Vec<usize>>,
    graph: DiGraph<usize, ()>,
}

impl WorkflowGraph {
    /// Build the graph from both edge encodings.
    ///
    /// Edges are `{dep -> s | dep in s.dependencies}` united with
    /// `{s -> c | c in s.connections}`.
    pub fn build(steps: &[WorkflowStep]) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateStepId(step.id.clone()));
            }
        }

        let mut preds: Vec<Vec<String>> = steps
            .iter()
            .map(|s| dedup_ordered(&s.dependencies))
            .collect();
        let mut succs: Vec<Vec<String>> = steps
            .iter()
            .map(|s| dedup_ordered(&s.connections))
            .collect();

        for step in steps {
            for target in &step.connections {
                if let Some(&t) = index.get(target) {
                    push_unique(&mut preds[t], &step.id);
                }
            }
            for dep in &step.dependencies {
                if let Some(&d) = index.get(dep) {
                    push_unique(&mut succs[d], &step.id);
                }
            }
        }

        let succ_idx: Vec<Vec<usize>> = succs
            .iter()
            .map(|ids| ids.iter().filter_map(|id| index.get(id).copied()).collect())
            .collect();

        let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), 0);
        for i in 0..steps.len() {
            graph.add_node(i);
        }
        for (from, targets) in succ_idx.iter().enumerate() {
            for &to in targets {
                graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
            }
        }

        Ok(Self {
            steps: steps.to_vec(),
            index,
            preds,
            succs,
            succ_idx,
            graph,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Steps in authoring order, as given to [`WorkflowGraph::build`].
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Predecessor ids of a step (execution view).
    pub fn predecessors(&self, id: &str) -> &[String] {
        self.index
            .get(id)
            .map(|&i| self.preds[i].as_slice())
            .unwrap_or_default()
    }

    /// Successor ids of a step (simulation and validation view).
    pub fn successors(&self, id: &str) -> &[String] {
        self.index
            .get(id)
            .map(|&i| self.succs[i].as_slice())
            .unwrap_or_default()
    }

    /// Steps rewritten so `dependencies` and `connections` agree.
    pub fn normalized_steps(&self) -> Vec<WorkflowStep> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let mut step = step.clone();
                step.dependencies = self.preds[i].clone();
                step.connections = self.succs[i].clone();
                step
            })
            .collect()
    }

    /// Edges naming unknown step ids, in authoring order.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut out = Vec::new();
        for step in &self.steps {
            for dep in dedup_ordered(&step.dependencies) {
                if !self.contains(&dep) {
                    out.push(DanglingReference {
                        step_id: step.id.clone(),
                        target: dep,
                        kind: EdgeKind::Dependency,
                    });
                }
            }
            for conn in dedup_ordered(&step.connections) {
                if !self.contains(&conn) {
                    out.push(DanglingReference {
                        step_id: step.id.clone(),
                        target: conn,
                        kind: EdgeKind::Connection,
                    });
                }
            }
        }
        out
    }

    /// First cycle found, as the path `[a, b, .., a]`.
    ///
    /// Roots are tried in authoring order and successors in declared order,
    /// so the reported cycle is deterministic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut state = vec![Visit::New; self.steps.len()];

        for root in 0..self.steps.len() {
            if state[root] != Visit::New {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            state[root] = Visit::OnStack;

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let children = &self.succ_idx[node];
                if frame.1 < children.len() {
                    let child = children[frame.1];
                    frame.1 += 1;
                    match state[child] {
                        Visit::New => {
                            state[child] = Visit::OnStack;
                            stack.push((child, 0));
                        }
                        Visit::OnStack => {
                            let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                            let mut cycle: Vec<String> = stack[start..]
                                .iter()
                                .map(|(n, _)| self.steps[*n].id.clone())
                                .collect();
                            cycle.push(self.steps[child].id.clone());
                            return Some(cycle);
                        }
                        Visit::Done => {}
                    }
                } else {
                    state[node] = Visit::Done;
                    stack.pop();
                }
            }
        }

        None
    }

    /// Ids reachable from any of `starts` (the starts included).
    pub fn reachable_from<'a>(&self, starts: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
        let mut reached = HashSet::new();
        for start in starts {
            let Some(&i) = self.index.get(start) else {
                continue;
            };
            let mut dfs = Dfs::new(&self.graph, NodeIndex::new(i));
            while let Some(nx) = dfs.next(&self.graph) {
                reached.insert(self.steps[self.graph[nx]].id.clone());
            }
        }
        reached
    }
}

fn dedup_ordered(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        push_unique(&mut out, id);
    }
    out
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|x| x == id) {
        list.push(id.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn dep_step(id: &str, deps: &[&str]) -> WorkflowStep {
        let mut step = WorkflowStep::new(id, "transform");
        step.dependencies = deps.iter().map(|s| s.to_string()).collect();
        step
    }

    fn conn_step(id: &str, conns: &[&str]) -> WorkflowStep {
        let mut step = WorkflowStep::new(id, "transform");
        step.connections = conns.iter().map(|s| s.to_string()).collect();
        step
    }

    // -----------------------------------------------------------------------
    // Encoding normalisation
    // -----------------------------------------------------------------------

    #[test]
    fn connections_derive_predecessors() {
        let steps = vec![conn_step("a", &["b"]), conn_step("b", &["c"]), conn_step("c", &[])];
        let graph = WorkflowGraph::build(&steps).unwrap();
        assert_eq!(graph.predecessors("b"), ["a"]);
        assert_eq!(graph.predecessors("c"), ["b"]);
        assert!(graph.predecessors("a").is_empty());
    }

    #[test]
    fn dependencies_derive_successors() {
        let steps = vec![dep_step("a", &[]), dep_step("b", &["a"]), dep_step("c", &["a"])];
        let graph = WorkflowGraph::build(&steps).unwrap();
        assert_eq!(graph.successors("a"), ["b", "c"]);
    }

    #[test]
    fn mixed_encodings_merge_without_duplicates() {
        let mut a = conn_step("a", &["b"]);
        a.dependencies = vec![];
        let b = dep_step("b", &["a", "a"]);
        let graph = WorkflowGraph::build(&[a, b]).unwrap();
        assert_eq!(graph.predecessors("b"), ["a"]);
        assert_eq!(graph.successors("a"), ["b"]);

        let normalized = graph.normalized_steps();
        assert_eq!(normalized[0].connections, vec!["b"]);
        assert_eq!(normalized[1].dependencies, vec!["a"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = WorkflowGraph::build(&[dep_step("a", &[]), dep_step("a", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateStepId("a".into()));
    }

    #[test]
    fn unknown_references_are_kept_and_reported() {
        let mut a = dep_step("a", &["ghost"]);
        a.connections = vec!["nowhere".into()];
        let graph = WorkflowGraph::build(&[a]).unwrap();
        assert_eq!(graph.predecessors("a"), ["ghost"]);

        let dangling = graph.dangling_references();
        assert_eq!(dangling.len(), 2);
        assert_eq!(dangling[0].kind, EdgeKind::Dependency);
        assert_eq!(dangling[1].target, "nowhere");
        assert_eq!(dangling[1].kind, EdgeKind::Connection);
    }

    // -----------------------------------------------------------------------
    // Cycles and reachability
    // -----------------------------------------------------------------------

    #[test]
    fn cycle_path_is_reported() {
        let steps = vec![conn_step("a", &["b"]), conn_step("b", &["c"]), conn_step("c", &["a"])];
        let graph = WorkflowGraph::build(&steps).unwrap();
        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let graph = WorkflowGraph::build(&[dep_step("a", &["a"])]).unwrap();
        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let steps = vec![dep_step("a", &[]), dep_step("b", &["a"]), dep_step("c", &["a", "b"])];
        assert!(WorkflowGraph::build(&steps).unwrap().find_cycle().is_none());
    }

    #[test]
    fn reachability_follows_successors() {
        let steps = vec![
            conn_step("start", &["a"]),
            conn_step("a", &["b"]),
            conn_step("b", &[]),
            conn_step("island", &[]),
        ];
        let graph = WorkflowGraph::build(&steps).unwrap();
        let reached = graph.reachable_from(["start"]);
        assert!(reached.contains("b"));
        assert!(!reached.contains("island"));
        assert!(graph.reachable_from(["missing"]).is_empty());
    }
}
