//! Step graph construction and cycle detection.
//!
//! Steps are stored in an arena (declaration order) and dependencies become
//! adjacency lists of integer indices into it. `petgraph` runs the topological
//! sort that rejects cycles before a workflow is ever registered, so the
//! scheduler can never stall on a graph that has no valid execution order.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use stepflow_types::workflow::StepDefinition;

use super::error::WorkflowError;

/// Index-based view of a workflow's dependency graph.
#[derive(Debug, Clone)]
pub struct StepGraph {
    /// `dependencies[i]` holds the arena indices step `i` waits on.
    dependencies: Vec<Vec<usize>>,
    /// A valid execution order (dependencies before dependents).
    order: Vec<usize>,
}

impl StepGraph {
    /// Build and validate the graph.
    ///
    /// Fails with `InvalidGraph` on duplicate step ids, dependencies on
    /// undeclared steps, or a cycle (including a step depending on itself).
    pub fn build<'a, I>(steps: I) -> Result<Self, WorkflowError>
    where
        I: IntoIterator<Item = &'a StepDefinition>,
    {
        let steps: Vec<&StepDefinition> = steps.into_iter().collect();

        let mut id_to_idx: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if id_to_idx.insert(step.id.as_str(), i).is_some() {
                return Err(WorkflowError::InvalidGraph(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        // Node i in the graph is arena slot i; edges run dependency -> dependent.
        let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), 0);
        let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();
        let mut dependencies = vec![Vec::new(); steps.len()];

        for (i, step) in steps.iter().enumerate() {
            for dep in &step.dependencies {
                let from = *id_to_idx.get(dep.as_str()).ok_or_else(|| {
                    WorkflowError::InvalidGraph(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    ))
                })?;
                if !dependencies[i].contains(&from) {
                    dependencies[i].push(from);
                    graph.add_edge(nodes[from], nodes[i], ());
                }
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            let step_id = &steps[graph[cycle.node_id()]].id;
            WorkflowError::InvalidGraph(format!("cycle detected involving step '{step_id}'"))
        })?;
        let order = sorted.into_iter().map(|n| graph[n]).collect();

        Ok(Self {
            dependencies,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Arena indices of the steps `index` depends on.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
