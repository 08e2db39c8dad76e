//! `WorkflowEngine`: the public entry point wiring registry, scheduler and
//! event bus together around one capability executor.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use stepflow_types::config::EngineConfig;
use stepflow_types::event::WorkflowEvent;
use stepflow_types::workflow::{Workflow, WorkflowDefinition, WorkflowTemplate};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::capability::{ActorRegistry, CapabilityExecutor};
use super::error::WorkflowError;
use super::registry::WorkflowRegistry;
use super::scheduler::DependencyScheduler;
use crate::event::bus::EventBus;

pub struct WorkflowEngine<E> {
    registry: Arc<WorkflowRegistry>,
    scheduler: DependencyScheduler<E>,
    event_bus: EventBus,
    config: EngineConfig,
}

impl<E: CapabilityExecutor + 'static> WorkflowEngine<E> {
    pub fn new(executor: Arc<E>, config: EngineConfig) -> Self {
        Self::with_registry(WorkflowRegistry::new(), executor, config)
    }

    /// Engine that rejects steps naming unknown actors or capabilities.
    pub fn with_actors(
        executor: Arc<E>,
        actors: Arc<dyn ActorRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self::with_registry(WorkflowRegistry::with_actors(actors), executor, config)
    }

    fn with_registry(registry: WorkflowRegistry, executor: Arc<E>, config: EngineConfig) -> Self {
        let registry = Arc::new(registry);
        let event_bus = EventBus::new(config.event_capacity);
        let scheduler = DependencyScheduler::new(
            Arc::clone(&registry),
            executor,
            event_bus.clone(),
            config.clone(),
        );
        Self {
            registry,
            scheduler,
            event_bus,
            config,
        }
    }

    pub fn create_workflow(&self, definition: WorkflowDefinition) -> Result<Uuid, WorkflowError> {
        self.registry.create_workflow(definition)
    }

    pub fn register_template(&self, template: WorkflowTemplate) -> Result<(), WorkflowError> {
        self.registry.register_template(template)
    }

    pub fn create_from_template(
        &self,
        template_name: &str,
        context: HashMap<String, Value>,
    ) -> Result<Uuid, WorkflowError> {
        self.registry.create_from_template(template_name, context)
    }

    /// Run a workflow to completion. See [`DependencyScheduler::run`].
    pub async fn run(&self, workflow_id: Uuid) -> Result<Workflow, WorkflowError> {
        self.scheduler.run(workflow_id).await
    }

    pub async fn cancel(&self, workflow_id: Uuid) -> Result<(), WorkflowError> {
        self.scheduler.cancel(workflow_id).await
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, WorkflowError> {
        self.registry.get_workflow(workflow_id).await
    }

    pub fn list_workflows(&self) -> Vec<Uuid> {
        self.registry.list_workflows()
    }

    pub fn get_template(&self, name: &str) -> Result<Arc<WorkflowTemplate>, WorkflowError> {
        self.registry.get_template(name)
    }

    pub fn list_templates(&self) -> Vec<String> {
        self.registry.list_templates()
    }

    /// Receive every lifecycle event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_bus.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
