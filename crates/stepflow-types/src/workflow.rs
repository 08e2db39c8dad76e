//! Workflow domain types for stepflow.
//!
//! A `WorkflowDefinition` (or a registered `WorkflowTemplate`) is the
//! caller-supplied shape of a step graph. Registration turns it into a
//! `Workflow`: the runtime record whose statuses, timestamps and global
//! context are mutated by the scheduler and step runners during a run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Caller-supplied description of a workflow to register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps in declaration order (not execution order).
    pub steps: Vec<StepDefinition>,
    /// Per-workflow dispatch limit (overrides the engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Initial contents of the global context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, Value>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
            max_concurrency: None,
            context: HashMap::new(),
        }
    }
}

/// A single capability invocation in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Unique within its workflow.
    pub id: String,
    /// Context key prefix for this step's result (`<name>_result`).
    pub name: String,
    /// Actor that owns the capability, resolved by the executor.
    pub agent_id: String,
    /// Capability to invoke on the actor.
    pub capability: String,
    /// Structured input; `{{var}}` placeholders are resolved at dispatch time.
    #[serde(default)]
    pub input: Value,
    /// Step IDs that must be `completed` before this step may run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Optional `run_if` / `skip_if` gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<StepConditions>,
    /// Retry policy (default: a single attempt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetryPolicy>,
    /// Capability call timeout in milliseconds (default from engine config).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepDefinition {
    /// Create a step whose name equals its id, with null input and no edges.
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            agent_id: agent_id.into(),
            capability: capability.into(),
            input: Value::Null,
            dependencies: Vec::new(),
            conditions: None,
            retries: None,
            timeout_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn run_if(mut self, expression: impl Into<String>) -> Self {
        self.conditions.get_or_insert_with(StepConditions::default).run_if = Some(expression.into());
        self
    }

    pub fn skip_if(mut self, expression: impl Into<String>) -> Self {
        self.conditions.get_or_insert_with(StepConditions::default).skip_if = Some(expression.into());
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.retries = Some(RetryPolicy {
            max_attempts,
            backoff_ms,
        });
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// The effective retry policy (default when none is configured).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retries.clone().unwrap_or_default()
    }
}

/// Boolean gate expressions evaluated against the global context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepConditions {
    /// Step runs only when this evaluates truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<String>,
    /// Step is skipped when this evaluates truthy. Checked before `run_if`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<String>,
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry configuration for a workflow step.
///
/// Backoff is linear: the wait before attempt `k + 1` is `backoff_ms * k`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (default 1 = no retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff in milliseconds.
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an individual step.
///
/// `Completed`, `Failed` and `Skipped` are terminal: a step reaches exactly
/// one of them and never returns to `Pending` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Runtime records
// ---------------------------------------------------------------------------

/// A step inside a registered workflow: its definition plus run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub definition: StepDefinition,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution attempts so far (0 until first dispatch).
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

impl From<StepDefinition> for Step {
    fn from(definition: StepDefinition) -> Self {
        Self {
            definition,
            status: StepStatus::Pending,
            result: None,
            error: None,
            attempt: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// A registered workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned at registration.
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps in declaration order.
    pub steps: Vec<Step>,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-run key/value store shared by all steps of this workflow.
    pub global_context: HashMap<String, Value>,
}

impl Workflow {
    /// Build a `pending` workflow with all steps `pending`.
    ///
    /// Does not validate the step graph; the registry does that before
    /// calling this.
    pub fn from_definition(definition: WorkflowDefinition) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: definition.name,
            description: definition.description,
            steps: definition.steps.into_iter().map(Step::from).collect(),
            status: WorkflowStatus::Pending,
            max_concurrency: definition.max_concurrency,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            global_context: definition.context,
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }

    /// IDs of steps with the given status, in declaration order.
    pub fn step_ids_with_status(&self, status: StepStatus) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.id().to_string())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A named, reusable step graph.
///
/// `{{var}}` placeholders in step inputs stay unresolved at instantiation and
/// are bound lazily when each step is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
            max_concurrency: None,
        }
    }

    /// Deep-copy the step graph into a definition seeded with `context`.
    pub fn instantiate(&self, context: HashMap<String, Value>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            steps: self.steps.clone(),
            max_concurrency: self.max_concurrency,
            context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
