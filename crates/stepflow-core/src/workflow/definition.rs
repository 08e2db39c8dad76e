//! Structural validation of workflow definitions.
//!
//! Runs before anything is registered so an invalid graph can never be
//! scheduled. Checks:
//! - Step ids and names are non-empty
//! - Step ids are unique, and step names are unique (names are context keys)
//! - `max_concurrency` >= 1 if set
//! - `retries.max_attempts` >= 1 if set
//! - Every dependency names a declared step and the graph is acyclic
//! - Actor and capability references resolve, when an `ActorRegistry` is given

use std::collections::HashSet;

use stepflow_types::workflow::{StepDefinition, WorkflowDefinition};

use super::capability::ActorRegistry;
use super::dag::StepGraph;
use super::error::WorkflowError;

/// Validate a definition and return its dependency graph.
pub fn validate_definition(
    def: &WorkflowDefinition,
    actors: Option<&dyn ActorRegistry>,
) -> Result<StepGraph, WorkflowError> {
    if let Some(0) = def.max_concurrency {
        return Err(WorkflowError::InvalidGraph(
            "max_concurrency must be >= 1".to_string(),
        ));
    }

    let mut seen_names = HashSet::new();
    for step in &def.steps {
        validate_step(step)?;
        if !seen_names.insert(step.name.as_str()) {
            return Err(WorkflowError::InvalidGraph(format!(
                "duplicate step name '{}' (step '{}')",
                step.name, step.id
            )));
        }
    }

    let graph = StepGraph::build(&def.steps)?;

    if let Some(actors) = actors {
        validate_references(&def.steps, actors)?;
    }

    Ok(graph)
}

fn validate_step(step: &StepDefinition) -> Result<(), WorkflowError> {
    if step.id.trim().is_empty() {
        return Err(WorkflowError::InvalidGraph(
            "step id must not be empty".to_string(),
        ));
    }
    if step.name.trim().is_empty() {
        return Err(WorkflowError::InvalidGraph(format!(
            "step '{}' has an empty name",
            step.id
        )));
    }
    if let Some(retries) = &step.retries {
        if retries.max_attempts < 1 {
            return Err(WorkflowError::InvalidGraph(format!(
                "step '{}': retries.max_attempts must be >= 1",
                step.id
            )));
        }
    }
    Ok(())
}

/// Check every step's actor and capability against the registry.
pub fn validate_references(
    steps: &[StepDefinition],
    actors: &dyn ActorRegistry,
) -> Result<(), WorkflowError> {
    for step in steps {
        if !actors.exists(&step.agent_id) {
            return Err(WorkflowError::UnknownActor {
                step_id: step.id.clone(),
                agent_id: step.agent_id.clone(),
            });
        }
        if !actors.has_capability(&step.agent_id, &step.capability) {
            return Err(WorkflowError::UnknownCapability {
                step_id: step.id.clone(),
                agent_id: step.agent_id.clone(),
                capability: step.capability.clone(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
