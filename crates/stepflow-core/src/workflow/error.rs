//! Error taxonomy for workflow registration and execution.

use thiserror::Error;
use uuid::Uuid;

use super::capability::CapabilityError;

/// Errors surfaced to callers of the registry, scheduler and engine.
///
/// Gate-expression failures have no variant: they are logged as
/// warnings and resolved fail-open, never returned.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Unknown workflow id or template name.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// `run` was called on a workflow that is already running.
    #[error("workflow {0} is already running")]
    AlreadyRunning(Uuid),

    /// The operation is not valid for the workflow's current status.
    #[error("workflow {id} is {status}: {reason}")]
    InvalidState {
        id: Uuid,
        status: String,
        reason: String,
    },

    /// Malformed step graph: duplicate id, dangling dependency, cycle.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A template with this name is already registered.
    #[error("template '{0}' already exists")]
    TemplateExists(String),

    /// A step references an actor the actor registry does not know.
    #[error("step '{step_id}' references unknown actor '{agent_id}'")]
    UnknownActor { step_id: String, agent_id: String },

    /// A step references a capability its actor does not provide.
    #[error("step '{step_id}': actor '{agent_id}' has no capability '{capability}'")]
    UnknownCapability {
        step_id: String,
        agent_id: String,
        capability: String,
    },

    /// The capability executor failed a step after all attempts.
    #[error("step '{step_id}' failed: {source}")]
    StepExecution {
        step_id: String,
        #[source]
        source: CapabilityError,
    },

    /// At least one step ended `failed`.
    #[error("workflow failed: {failed} step(s) failed: {}", step_ids.join(", "))]
    WorkflowFailed { failed: usize, step_ids: Vec<String> },

    /// The workflow was cancelled while running.
    #[error("workflow {0} was cancelled")]
    Cancelled(Uuid),

    /// Engine configuration could not be parsed or is out of range.
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    pub(crate) fn workflow_not_found(id: Uuid) -> Self {
        WorkflowError::NotFound {
            kind: "workflow",
            id: id.to_string(),
        }
    }

    pub(crate) fn template_not_found(name: &str) -> Self {
        WorkflowError::NotFound {
            kind: "template",
            id: name.to_string(),
        }
    }
}
