//! In-memory registry of workflows and templates.
//!
//! Workflows are keyed by UUIDv7 and shared as `Arc<RwLock<Workflow>>` so the
//! scheduler, its step runners and readers can all hold the same record.
//! Templates are immutable once registered.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use stepflow_types::workflow::{Workflow, WorkflowDefinition, WorkflowTemplate};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::capability::ActorRegistry;
use super::definition::validate_definition;
use super::error::WorkflowError;

/// Shared handle to a registered workflow.
pub type WorkflowHandle = Arc<RwLock<Workflow>>;

#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: DashMap<Uuid, WorkflowHandle>,
    templates: DashMap<String, Arc<WorkflowTemplate>>,
    actors: Option<Arc<dyn ActorRegistry>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that validates actor and capability references on creation.
    pub fn with_actors(actors: Arc<dyn ActorRegistry>) -> Self {
        Self {
            actors: Some(actors),
            ..Self::default()
        }
    }

    /// Validate and register a workflow with every step `pending`.
    ///
    /// Nothing is registered if validation fails.
    pub fn create_workflow(&self, definition: WorkflowDefinition) -> Result<Uuid, WorkflowError> {
        validate_definition(&definition, self.actors.as_deref())?;

        let workflow = Workflow::from_definition(definition);
        let id = workflow.id;
        tracing::info!(
            workflow_id = %id,
            workflow_name = %workflow.name,
            steps = workflow.steps.len(),
            "workflow registered"
        );
        self.workflows.insert(id, Arc::new(RwLock::new(workflow)));
        Ok(id)
    }

    /// Register a reusable template. Names are unique.
    pub fn register_template(&self, template: WorkflowTemplate) -> Result<(), WorkflowError> {
        validate_definition(&template.instantiate(HashMap::new()), self.actors.as_deref())?;

        match self.templates.entry(template.name.clone()) {
            Entry::Occupied(_) => Err(WorkflowError::TemplateExists(template.name)),
            Entry::Vacant(slot) => {
                tracing::debug!(template = %template.name, "template registered");
                slot.insert(Arc::new(template));
                Ok(())
            }
        }
    }

    /// Instantiate a template as a new workflow seeded with `context`.
    ///
    /// Steps are deep-copied; placeholders in their inputs are resolved only
    /// when each step is dispatched.
    pub fn create_from_template(
        &self,
        template_name: &str,
        context: HashMap<String, Value>,
    ) -> Result<Uuid, WorkflowError> {
        let template = self.get_template(template_name)?;
        self.create_workflow(template.instantiate(context))
    }

    /// Shared handle for the scheduler and step runners.
    pub fn handle(&self, id: Uuid) -> Result<WorkflowHandle, WorkflowError> {
        self.workflows
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| WorkflowError::workflow_not_found(id))
    }

    /// Point-in-time copy of a workflow.
    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, WorkflowError> {
        let handle = self.handle(id)?;
        let snapshot = handle.read().await.clone();
        Ok(snapshot)
    }

    pub fn list_workflows(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.workflows.iter().map(|e| *e.key()).collect();
        // v7 ids sort by creation time
        ids.sort();
        ids
    }

    pub fn get_template(&self, name: &str) -> Result<Arc<WorkflowTemplate>, WorkflowError> {
        self.templates
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| WorkflowError::template_not_found(name))
    }

    pub fn list_templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflows.len())
            .field("templates", &self.templates.len())
            .field("validates_actors", &self.actors.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
