//! Workflow lifecycle events.
//!
//! Published by the scheduler and step runners on the engine's broadcast
//! `EventBus`. Consumers (progress displays, audit sinks) subscribe; the
//! engine never waits on them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted while a workflow runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// `run` accepted the workflow and marked it running.
    WorkflowStarted {
        workflow_id: Uuid,
        workflow_name: String,
    },

    /// A step attempt has been handed to the capability executor.
    StepStarted {
        workflow_id: Uuid,
        step_id: String,
        attempt: u32,
    },

    /// A step completed successfully.
    StepCompleted {
        workflow_id: Uuid,
        step_id: String,
        attempt: u32,
        duration_ms: u64,
    },

    /// A step attempt failed and will be retried after `delay_ms`.
    StepRetrying {
        workflow_id: Uuid,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// A step exhausted its attempts (or was cancelled).
    StepFailed {
        workflow_id: Uuid,
        step_id: String,
        attempt: u32,
        error: String,
    },

    /// A step's `skip_if` gate evaluated truthy.
    StepSkipped {
        workflow_id: Uuid,
        step_id: String,
    },

    /// A step can never become ready (dependency not completed, or a
    /// `run_if` that nothing in flight can change).
    StepBlocked {
        workflow_id: Uuid,
        step_id: String,
        reason: String,
    },

    WorkflowCompleted {
        workflow_id: Uuid,
        duration_ms: u64,
        steps_completed: u32,
    },

    WorkflowFailed {
        workflow_id: Uuid,
        failed_steps: Vec<String>,
    },

    WorkflowCancelled {
        workflow_id: Uuid,
    },
}

impl WorkflowEvent {
    /// The workflow every event belongs to.
    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::StepStarted { workflow_id, .. }
            | WorkflowEvent::StepCompleted { workflow_id, .. }
            | WorkflowEvent::StepRetrying { workflow_id, .. }
            | WorkflowEvent::StepFailed { workflow_id, .. }
            | WorkflowEvent::StepSkipped { workflow_id, .. }
            | WorkflowEvent::StepBlocked { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. }
            | WorkflowEvent::WorkflowCancelled { workflow_id } => *workflow_id,
        }
    }
}
