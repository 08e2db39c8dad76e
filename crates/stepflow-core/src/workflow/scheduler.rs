//! Dependency-driven scheduler.
//!
//! A single polling loop per run:
//!
//! 1. Reap settled step runners.
//! 2. Compute the ready set: `pending` steps not in flight whose dependencies
//!    are all `completed`, in declaration order, filtered through the gate.
//!    Steps whose `skip_if` holds are marked `skipped` on the spot.
//! 3. Exit when nothing is ready and nothing is in flight.
//! 4. Dispatch up to `max_concurrency - in_flight` ready steps onto a
//!    `JoinSet` without waiting for them.
//! 5. Sleep for the poll interval (or until cancelled) and repeat.
//!
//! Pending steps left over at exit can never run. They are failed with a
//! blocked reason or left `pending`, per `EngineConfig::fail_blocked_steps`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use stepflow_types::config::EngineConfig;
use stepflow_types::event::WorkflowEvent;
use stepflow_types::workflow::{StepStatus, Workflow, WorkflowStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::capability::CapabilityExecutor;
use super::dag::StepGraph;
use super::error::WorkflowError;
use super::gate::{GateDecision, GateEvaluator};
use super::registry::{WorkflowHandle, WorkflowRegistry};
use super::step_runner::StepRunner;
use crate::event::bus::EventBus;

pub struct DependencyScheduler<E> {
    registry: Arc<WorkflowRegistry>,
    runner: Arc<StepRunner<E>>,
    gate: GateEvaluator,
    event_bus: EventBus,
    config: EngineConfig,
    /// Cancellation tokens keyed by workflow id, present while running.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

/// Result of one readiness pass.
struct ReadyPass {
    ready: Vec<usize>,
    skipped: Vec<usize>,
}

impl<E: CapabilityExecutor + 'static> DependencyScheduler<E> {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        executor: Arc<E>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        let runner = StepRunner::new(
            executor,
            event_bus.clone(),
            Duration::from_millis(config.default_step_timeout_ms),
        );
        Self {
            registry,
            runner: Arc::new(runner),
            gate: GateEvaluator::new(),
            event_bus,
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Run a registered workflow to a terminal status.
    ///
    /// Returns the final snapshot on success. Fails with `NotFound`,
    /// `AlreadyRunning`, `InvalidState` (already finished), `WorkflowFailed`
    /// (one or more steps failed) or `Cancelled`.
    pub async fn run(&self, workflow_id: Uuid) -> Result<Workflow, WorkflowError> {
        let handle = self.registry.handle(workflow_id)?;

        let (graph, max_concurrency, token, workflow_name) = {
            let mut wf = handle.write().await;
            match wf.status {
                WorkflowStatus::Running => return Err(WorkflowError::AlreadyRunning(workflow_id)),
                status if status.is_terminal() => {
                    return Err(WorkflowError::InvalidState {
                        id: workflow_id,
                        status: status.to_string(),
                        reason: "workflow has already finished".to_string(),
                    })
                }
                _ => {}
            }

            let graph = StepGraph::build(wf.steps.iter().map(|s| &s.definition))?;
            let max_concurrency = wf
                .max_concurrency
                .unwrap_or(self.config.max_concurrency)
                .max(1);

            let token = CancellationToken::new();
            self.cancellation_tokens.insert(workflow_id, token.clone());
            wf.status = WorkflowStatus::Running;
            wf.started_at = Some(Utc::now());
            (graph, max_concurrency, token, wf.name.clone())
        };

        tracing::info!(
            workflow_id = %workflow_id,
            workflow_name = %workflow_name,
            steps = graph.len(),
            max_concurrency,
            "workflow started"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowStarted {
            workflow_id,
            workflow_name,
        });

        let started = Instant::now();
        let cancelled = self
            .drive(&handle, &graph, max_concurrency, &token)
            .await;

        self.cancellation_tokens.remove(&workflow_id);

        if cancelled {
            return Err(self.finish_cancelled(&handle, workflow_id).await);
        }

        if self.config.fail_blocked_steps {
            self.fail_blocked(&handle, &graph, workflow_id).await;
        } else {
            let wf = handle.read().await;
            let pending = wf.step_ids_with_status(StepStatus::Pending);
            if !pending.is_empty() {
                tracing::warn!(
                    workflow_id = %workflow_id,
                    steps = ?pending,
                    "steps can never become ready and are left pending"
                );
            }
        }

        self.finalize(&handle, workflow_id, started).await
    }

    /// Request cancellation of a running workflow.
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<(), WorkflowError> {
        let handle = self.registry.handle(workflow_id)?;
        let status = handle.read().await.status;
        if status != WorkflowStatus::Running {
            return Err(WorkflowError::InvalidState {
                id: workflow_id,
                status: status.to_string(),
                reason: "only a running workflow can be cancelled".to_string(),
            });
        }

        // The token is gone once the loop has exited, even if the status has
        // not been finalized yet.
        let Some(token) = self.cancellation_tokens.get(&workflow_id) else {
            return Err(WorkflowError::InvalidState {
                id: workflow_id,
                status: status.to_string(),
                reason: "workflow is already finishing".to_string(),
            });
        };
        token.cancel();
        tracing::info!(workflow_id = %workflow_id, "workflow cancellation requested");
        Ok(())
    }

    /// The scheduling loop. Returns `true` if the run was cancelled.
    async fn drive(
        &self,
        handle: &WorkflowHandle,
        graph: &StepGraph,
        max_concurrency: usize,
        token: &CancellationToken,
    ) -> bool {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut join_set: JoinSet<Result<(), WorkflowError>> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, usize> = HashMap::new();

        loop {
            if token.is_cancelled() {
                // Child tokens are already cancelled; runners mark their steps failed.
                self.drain(handle, &mut join_set, &mut in_flight).await;
                return true;
            }

            while let Some(joined) = join_set.try_join_next_with_id() {
                let (task_id, outcome) = match joined {
                    Ok((task_id, result)) => (task_id, Ok(result)),
                    Err(join_error) => (join_error.id(), Err(join_error)),
                };
                if let Some(index) = in_flight.remove(&task_id) {
                    self.settle(handle, index, outcome).await;
                }
            }

            let pass = self.ready_steps(handle, graph, &in_flight).await;
            if !pass.skipped.is_empty() {
                self.mark_skipped(handle, &pass.skipped).await;
            }

            if pass.ready.is_empty() && in_flight.is_empty() {
                return false;
            }

            let slots = max_concurrency.saturating_sub(in_flight.len());
            for index in pass.ready.into_iter().take(slots) {
                let runner = Arc::clone(&self.runner);
                let workflow = Arc::clone(handle);
                let child = token.child_token();
                let abort = join_set.spawn(async move {
                    runner.execute_step(workflow, index, child).await
                });
                in_flight.insert(abort.id(), index);
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = token.cancelled() => {}
            }
        }
    }

    /// Wait for every dispatched runner and settle each outcome.
    async fn drain(
        &self,
        handle: &WorkflowHandle,
        join_set: &mut JoinSet<Result<(), WorkflowError>>,
        in_flight: &mut HashMap<tokio::task::Id, usize>,
    ) {
        while let Some(joined) = join_set.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((task_id, result)) => (task_id, Ok(result)),
                Err(join_error) => (join_error.id(), Err(join_error)),
            };
            if let Some(index) = in_flight.remove(&task_id) {
                self.settle(handle, index, outcome).await;
            }
        }
    }

    async fn settle(
        &self,
        handle: &WorkflowHandle,
        index: usize,
        outcome: Result<Result<(), WorkflowError>, tokio::task::JoinError>,
    ) {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(step_index = index, error = %e, "step runner settled with failure");
            }
            Err(join_error) => {
                tracing::error!(step_index = index, error = %join_error, "step runner panicked");
                let mut wf = handle.write().await;
                if let Some(step) = wf.steps.get_mut(index).filter(|s| !s.status.is_terminal()) {
                    step.status = StepStatus::Failed;
                    step.error = Some(format!("step runner panicked: {join_error}"));
                    step.completed_at = Some(Utc::now());
                }
            }
        }
    }

    async fn ready_steps(
        &self,
        handle: &WorkflowHandle,
        graph: &StepGraph,
        in_flight: &HashMap<tokio::task::Id, usize>,
    ) -> ReadyPass {
        let wf = handle.read().await;
        let mut pass = ReadyPass {
            ready: Vec::new(),
            skipped: Vec::new(),
        };

        for (index, step) in wf.steps.iter().enumerate() {
            if step.status != StepStatus::Pending || in_flight.values().any(|&i| i == index) {
                continue;
            }
            let deps_done = graph
                .dependencies(index)
                .iter()
                .all(|&dep| wf.steps[dep].status == StepStatus::Completed);
            if !deps_done {
                continue;
            }

            match self.gate.should_run(&step.definition, &wf.global_context) {
                GateDecision::Run => pass.ready.push(index),
                GateDecision::Skip => pass.skipped.push(index),
                GateDecision::Defer => {
                    tracing::debug!(workflow_id = %wf.id, step_id = %step.id(), "run_if not satisfied, deferring");
                }
            }
        }
        pass
    }

    async fn mark_skipped(&self, handle: &WorkflowHandle, indices: &[usize]) {
        let mut wf = handle.write().await;
        let workflow_id = wf.id;
        for &index in indices {
            let step = &mut wf.steps[index];
            if step.status.is_terminal() {
                continue;
            }
            step.status = StepStatus::Skipped;
            step.completed_at = Some(Utc::now());
            tracing::debug!(workflow_id = %workflow_id, step_id = %step.id(), "step skipped");
            self.event_bus.publish(WorkflowEvent::StepSkipped {
                workflow_id,
                step_id: step.id().to_string(),
            });
        }
    }

    /// Fail every step still `pending` after the loop has drained.
    async fn fail_blocked(&self, handle: &WorkflowHandle, graph: &StepGraph, workflow_id: Uuid) {
        let mut wf = handle.write().await;

        // Topological order so a blocked dependency is reported before its dependents.
        for &index in graph.topological_order() {
            if wf.steps[index].status != StepStatus::Pending {
                continue;
            }

            let blocker = graph
                .dependencies(index)
                .iter()
                .map(|&dep| &wf.steps[dep])
                .find(|dep| dep.status != StepStatus::Completed);
            let reason = match blocker {
                Some(dep) => format!("dependency '{}' is {}", dep.id(), dep.status),
                None => "run_if condition was never satisfied".to_string(),
            };

            let step = &mut wf.steps[index];
            step.status = StepStatus::Failed;
            step.error = Some(format!("blocked: {reason}"));
            step.completed_at = Some(Utc::now());

            tracing::warn!(
                workflow_id = %workflow_id,
                step_id = %step.id(),
                reason = %reason,
                "step blocked"
            );
            self.event_bus.publish(WorkflowEvent::StepBlocked {
                workflow_id,
                step_id: step.id().to_string(),
                reason,
            });
        }
    }

    async fn finalize(
        &self,
        handle: &WorkflowHandle,
        workflow_id: Uuid,
        started: Instant,
    ) -> Result<Workflow, WorkflowError> {
        let mut wf = handle.write().await;
        wf.completed_at = Some(Utc::now());

        let failed = wf.step_ids_with_status(StepStatus::Failed);
        if !failed.is_empty() {
            wf.status = WorkflowStatus::Failed;
            tracing::info!(
                workflow_id = %workflow_id,
                failed_steps = ?failed,
                "workflow failed"
            );
            self.event_bus.publish(WorkflowEvent::WorkflowFailed {
                workflow_id,
                failed_steps: failed.clone(),
            });
            return Err(WorkflowError::WorkflowFailed {
                failed: failed.len(),
                step_ids: failed,
            });
        }

        wf.status = WorkflowStatus::Completed;
        let steps_completed = wf
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count() as u32;
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            workflow_id = %workflow_id,
            duration_ms,
            steps_completed,
            "workflow completed"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowCompleted {
            workflow_id,
            duration_ms,
            steps_completed,
        });
        Ok(wf.clone())
    }

    async fn finish_cancelled(&self, handle: &WorkflowHandle, workflow_id: Uuid) -> WorkflowError {
        let mut wf = handle.write().await;
        wf.status = WorkflowStatus::Cancelled;
        wf.completed_at = Some(Utc::now());

        tracing::info!(workflow_id = %workflow_id, "workflow cancelled");
        self.event_bus
            .publish(WorkflowEvent::WorkflowCancelled { workflow_id });
        WorkflowError::Cancelled(workflow_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::MockExecutor;
    use serde_json::json;
    use stepflow_types::workflow::{StepDefinition, WorkflowDefinition};

    fn config() -> EngineConfig {
        EngineConfig {
            poll_interval_ms: 5,
            ..EngineConfig::default()
        }
    }

    type Setup = (
        Arc<WorkflowRegistry>,
        Arc<MockExecutor>,
        Arc<DependencyScheduler<MockExecutor>>,
    );

    fn setup(executor: MockExecutor, config: EngineConfig) -> Setup {
        let (setup, _events) = setup_with_events(executor, config);
        setup
    }

    fn setup_with_events(
        executor: MockExecutor,
        config: EngineConfig,
    ) -> (Setup, tokio::sync::broadcast::Receiver<WorkflowEvent>) {
        stepflow_observe::tracing_setup::init_test_tracing();
        let registry = Arc::new(WorkflowRegistry::new());
        let executor = Arc::new(executor);
        let bus = EventBus::new(256);
        let events = bus.subscribe();
        let scheduler = DependencyScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            bus,
            config,
        );
        ((registry, executor, Arc::new(scheduler)), events)
    }

    fn status_of(wf: &Workflow, id: &str) -> StepStatus {
        wf.step(id).unwrap().status
    }

    #[tokio::test]
    async fn test_linear_chain_completes() {
        let (registry, exec, scheduler) = setup(MockExecutor::new(), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "chain",
                vec![
                    StepDefinition::new("fetch", "a", "fetch"),
                    StepDefinition::new("clean", "a", "clean").depends_on(["fetch"]),
                    StepDefinition::new("report", "a", "report").depends_on(["clean"]),
                ],
            ))
            .unwrap();

        let wf = scheduler.run(id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.started_at.is_some() && wf.completed_at.is_some());
        for key in ["fetch_result", "clean_result", "report_result"] {
            assert!(wf.global_context.contains_key(key), "missing {key}");
        }
        let order: Vec<String> = exec.calls().into_iter().map(|c| c.capability).collect();
        assert_eq!(order, vec!["fetch", "clean", "report"]);
    }

    #[tokio::test]
    async fn test_dependency_starts_after_completion() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new().delay("slow", 50), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "deps",
                vec![
                    StepDefinition::new("slow", "a", "slow"),
                    StepDefinition::new("after", "a", "after").depends_on(["slow"]),
                ],
            ))
            .unwrap();

        let wf = scheduler.run(id).await.unwrap();
        let slow_done = wf.step("slow").unwrap().completed_at.unwrap();
        let after_start = wf.step("after").unwrap().started_at.unwrap();
        assert!(after_start >= slow_done);
    }

    #[tokio::test]
    async fn test_concurrency_bounded() {
        let exec = MockExecutor::new().delay("work", 40);
        let (registry, exec, scheduler) = setup(exec, config());
        let steps = (0..8)
            .map(|i| StepDefinition::new(format!("s{i}"), "a", "work"))
            .collect();
        let mut def = WorkflowDefinition::new("wide", steps);
        def.max_concurrency = Some(3);
        let id = registry.create_workflow(def).unwrap();

        scheduler.run(id).await.unwrap();
        assert_eq!(exec.call_count("work"), 8);
        assert!(exec.max_in_flight() <= 3, "max in flight {}", exec.max_in_flight());
        assert!(exec.max_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_global_concurrency_default() {
        let config = EngineConfig {
            max_concurrency: 1,
            ..config()
        };
        let (registry, exec, scheduler) = setup(MockExecutor::new().delay("work", 10), config);
        let steps = (0..4)
            .map(|i| StepDefinition::new(format!("s{i}"), "a", "work"))
            .collect();
        let id = registry
            .create_workflow(WorkflowDefinition::new("serial", steps))
            .unwrap();

        scheduler.run(id).await.unwrap();
        assert_eq!(exec.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_failed_step_fails_workflow() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new().always_fail("bad"), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "f",
                vec![
                    StepDefinition::new("ok", "a", "ok"),
                    StepDefinition::new("bad", "a", "bad"),
                ],
            ))
            .unwrap();

        let err = scheduler.run(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowFailed { failed: 1, ref step_ids } if step_ids == &["bad"]));

        let wf = registry.get_workflow(id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert!(wf.completed_at.is_some());
        assert_eq!(status_of(&wf, "ok"), StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_dependent_of_failed_step_is_blocked() {
        let (registry, exec, scheduler) = setup(MockExecutor::new().always_fail("bad"), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "f",
                vec![
                    StepDefinition::new("bad", "a", "bad"),
                    StepDefinition::new("next", "a", "next").depends_on(["bad"]),
                ],
            ))
            .unwrap();

        let err = scheduler.run(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowFailed { failed: 2, .. }));
        assert_eq!(exec.call_count("next"), 0);

        let wf = registry.get_workflow(id).await.unwrap();
        let next = wf.step("next").unwrap();
        assert_eq!(next.status, StepStatus::Failed);
        assert_eq!(next.error.as_deref(), Some("blocked: dependency 'bad' is failed"));
    }

    #[tokio::test]
    async fn test_skip_if_skips_and_blocks_dependents() {
        // `a` keeps the loop polling for several passes after `b` is skipped.
        let ((registry, exec, scheduler), mut events) =
            setup_with_events(MockExecutor::new().delay("a", 40), config());
        let mut def = WorkflowDefinition::new(
            "skip",
            vec![
                StepDefinition::new("a", "x", "a"),
                StepDefinition::new("b", "x", "b").skip_if("x===true"),
                StepDefinition::new("c", "x", "c").depends_on(["b"]),
            ],
        );
        def.context.insert("x".to_string(), json!(true));
        let id = registry.create_workflow(def).unwrap();

        let err = scheduler.run(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowFailed { failed: 1, .. }));

        let wf = registry.get_workflow(id).await.unwrap();
        assert_eq!(status_of(&wf, "a"), StepStatus::Completed);
        assert_eq!(status_of(&wf, "b"), StepStatus::Skipped);
        assert_eq!(status_of(&wf, "c"), StepStatus::Failed);
        assert_eq!(
            wf.step("c").unwrap().error.as_deref(),
            Some("blocked: dependency 'b' is skipped")
        );
        assert_eq!(exec.call_count("b"), 0);

        let mut skipped_b = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WorkflowEvent::StepSkipped { ref step_id, .. } if step_id == "b") {
                skipped_b += 1;
            }
        }
        assert_eq!(skipped_b, 1);
    }

    #[tokio::test]
    async fn test_ready_steps_dispatch_in_declaration_order() {
        let config = EngineConfig {
            max_concurrency: 1,
            ..config()
        };
        let (registry, exec, scheduler) = setup(MockExecutor::new(), config);
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "ordered",
                vec![
                    StepDefinition::new("s0", "a", "c0"),
                    StepDefinition::new("s1", "a", "c1"),
                    StepDefinition::new("s2", "a", "c2"),
                    StepDefinition::new("s3", "a", "c3").depends_on(["s0"]),
                ],
            ))
            .unwrap();

        scheduler.run(id).await.unwrap();
        let order: Vec<String> = exec.calls().into_iter().map(|c| c.capability).collect();
        assert_eq!(order, vec!["c0", "c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn test_blocked_steps_left_pending_when_configured() {
        let config = EngineConfig {
            fail_blocked_steps: false,
            ..config()
        };
        let (registry, _exec, scheduler) = setup(MockExecutor::new(), config);
        let mut def = WorkflowDefinition::new(
            "skip",
            vec![
                StepDefinition::new("b", "x", "b").skip_if("x===true"),
                StepDefinition::new("c", "x", "c").depends_on(["b"]),
            ],
        );
        def.context.insert("x".to_string(), json!(true));
        let id = registry.create_workflow(def).unwrap();

        let wf = scheduler.run(id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(status_of(&wf, "b"), StepStatus::Skipped);
        assert_eq!(status_of(&wf, "c"), StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_if_reads_upstream_result() {
        let exec = MockExecutor::new()
            .respond("verify", json!({ "ok": true }))
            .respond("check", json!({ "ok": false }));
        let (registry, exec, scheduler) = setup(exec, config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "gated",
                vec![
                    StepDefinition::new("verify", "a", "verify"),
                    StepDefinition::new("check", "a", "check"),
                    StepDefinition::new("go", "a", "go")
                        .depends_on(["verify"])
                        .run_if("verify_result.ok == true"),
                    StepDefinition::new("stay", "a", "stay")
                        .depends_on(["check"])
                        .run_if("check_result.ok === true"),
                ],
            ))
            .unwrap();

        let err = scheduler.run(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowFailed { failed: 1, ref step_ids } if step_ids == &["stay"]));
        assert_eq!(exec.call_count("go"), 1);
        assert_eq!(exec.call_count("stay"), 0);

        let wf = registry.get_workflow(id).await.unwrap();
        assert_eq!(
            wf.step("stay").unwrap().error.as_deref(),
            Some("blocked: run_if condition was never satisfied")
        );
    }

    #[tokio::test]
    async fn test_late_binding_uses_upstream_result() {
        let exec = MockExecutor::new().respond("fetch", json!({ "url": "https://a.test" }));
        let (registry, exec, scheduler) = setup(exec, config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "bind",
                vec![
                    StepDefinition::new("fetch", "a", "fetch"),
                    StepDefinition::new("report", "a", "report")
                        .depends_on(["fetch"])
                        .with_input(json!({ "source": "{{fetch_result.url}}" })),
                ],
            ))
            .unwrap();

        scheduler.run(id).await.unwrap();
        let report = exec
            .calls()
            .into_iter()
            .find(|c| c.capability == "report")
            .unwrap();
        assert_eq!(report.input, json!({ "source": "https://a.test" }));
    }

    #[tokio::test]
    async fn test_empty_workflow_completes() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new(), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new("empty", vec![]))
            .unwrap();
        let wf = scheduler.run(id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_unknown_workflow() {
        let (_registry, _exec, scheduler) = setup(MockExecutor::new(), config());
        let err = scheduler.run(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_running() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new().delay("slow", 200), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "once",
                vec![StepDefinition::new("slow", "a", "slow")],
            ))
            .unwrap();

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(id).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = scheduler.run(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyRunning(got) if got == id));

        first.await.unwrap().unwrap();
        let again = scheduler.run(id).await.unwrap_err();
        assert!(matches!(again, WorkflowError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_cancel_running_workflow() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new().delay("slow", 5_000), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "cancel",
                vec![
                    StepDefinition::new("slow", "a", "slow"),
                    StepDefinition::new("later", "a", "later").depends_on(["slow"]),
                ],
            ))
            .unwrap();

        let run = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.cancel(id).await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run did not observe cancellation")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled(got) if got == id));

        let wf = registry.get_workflow(id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Cancelled);
        assert_eq!(status_of(&wf, "slow"), StepStatus::Failed);
        assert_eq!(status_of(&wf, "later"), StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_requires_running() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new(), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new("idle", vec![]))
            .unwrap();

        let err = scheduler.cancel(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState { .. }));
        let err = scheduler.cancel(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_without_live_loop_rejected() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new(), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new("finishing", vec![]))
            .unwrap();
        // Running but with no registered token: the loop has already exited.
        registry.handle(id).unwrap().write().await.status = WorkflowStatus::Running;

        let err = scheduler.cancel(id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState { ref reason, .. } if reason.contains("finishing")));
    }

    #[tokio::test]
    async fn test_drain_fails_panicked_runner() {
        let (registry, _exec, scheduler) = setup(MockExecutor::new(), config());
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "panics",
                vec![
                    StepDefinition::new("boom", "a", "boom"),
                    StepDefinition::new("fine", "a", "fine"),
                ],
            ))
            .unwrap();
        let handle = registry.handle(id).unwrap();
        {
            let mut wf = handle.write().await;
            wf.steps[0].status = StepStatus::Running;
            wf.steps[1].status = StepStatus::Completed;
        }

        let mut join_set: JoinSet<Result<(), WorkflowError>> = JoinSet::new();
        let mut in_flight = HashMap::new();
        let abort = join_set.spawn(async {
            if true {
                panic!("runner blew up");
            }
            Ok(())
        });
        in_flight.insert(abort.id(), 0);
        let abort = join_set.spawn(async { Ok(()) });
        in_flight.insert(abort.id(), 1);

        scheduler.drain(&handle, &mut join_set, &mut in_flight).await;

        assert!(in_flight.is_empty());
        let wf = handle.read().await;
        assert_eq!(wf.steps[0].status, StepStatus::Failed);
        assert!(wf.steps[0].error.as_deref().unwrap().contains("panicked"));
        // Already-terminal steps are left alone.
        assert_eq!(wf.steps[1].status, StepStatus::Completed);
        assert!(wf.steps[1].error.is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let registry = Arc::new(WorkflowRegistry::new());
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        let scheduler = DependencyScheduler::new(
            Arc::clone(&registry),
            Arc::new(MockExecutor::new()),
            bus,
            config(),
        );
        let id = registry
            .create_workflow(WorkflowDefinition::new(
                "events",
                vec![StepDefinition::new("only", "a", "only")],
            ))
            .unwrap();

        scheduler.run(id).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::WorkflowCompleted { steps_completed: 1, .. })
        ));
        assert!(events.iter().all(|e| e.workflow_id() == id));
    }
}
