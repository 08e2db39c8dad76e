//! Single-step lifecycle: attempt bookkeeping, input interpolation, the
//! capability call, result/error recording and the retry loop.
//!
//! The runner holds the workflow's write lock only for short bookkeeping
//! sections; the capability call and backoff sleeps run unlocked so
//! independent steps of the same workflow proceed concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use stepflow_types::event::WorkflowEvent;
use stepflow_types::workflow::{StepStatus, Workflow};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::capability::{CapabilityError, CapabilityExecutor};
use super::context::merge_step_result;
use super::error::WorkflowError;
use super::retry::RetryHandler;
use super::template::interpolate;
use crate::event::bus::EventBus;

/// Drives one step of a workflow through its attempts.
pub struct StepRunner<E> {
    executor: Arc<E>,
    event_bus: EventBus,
    default_timeout: Duration,
}

impl<E: CapabilityExecutor> StepRunner<E> {
    pub fn new(executor: Arc<E>, event_bus: EventBus, default_timeout: Duration) -> Self {
        Self {
            executor,
            event_bus,
            default_timeout,
        }
    }

    /// Run the step at `index` until it completes or exhausts its attempts.
    ///
    /// Every attempt increments `attempt`, sets `running` and re-interpolates
    /// the input against a fresh context snapshot. Between failed attempts
    /// the step is reset to `pending` and the runner sleeps
    /// `backoff_ms * attempt`. Cancellation is observed during the call and
    /// during backoff; a cancelled step ends `failed`.
    pub async fn execute_step(
        &self,
        workflow: Arc<RwLock<Workflow>>,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<(), WorkflowError> {
        loop {
            let (workflow_id, definition, attempt, context) = {
                let mut wf = workflow.write().await;
                let workflow_id = wf.id;
                let context = wf.global_context.clone();
                let step = wf.steps.get_mut(index).ok_or_else(|| {
                    WorkflowError::InvalidGraph(format!("step index {index} out of range"))
                })?;
                step.status = StepStatus::Running;
                step.started_at = Some(Utc::now());
                step.attempt += 1;
                (workflow_id, step.definition.clone(), step.attempt, context)
            };

            tracing::debug!(
                workflow_id = %workflow_id,
                step_id = %definition.id,
                attempt,
                "step attempt started"
            );
            self.event_bus.publish(WorkflowEvent::StepStarted {
                workflow_id,
                step_id: definition.id.clone(),
                attempt,
            });

            let input = interpolate(&definition.input, &context);
            let timeout = definition
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout);
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CapabilityError::Cancelled),
                result = self.executor.execute(
                    &definition.agent_id,
                    &definition.capability,
                    input,
                    timeout,
                ) => result,
            };

            let error = match outcome {
                Ok(result) => {
                    {
                        let mut wf = workflow.write().await;
                        merge_step_result(&mut wf.global_context, &definition.name, &result);
                        let step = &mut wf.steps[index];
                        step.result = Some(result);
                        step.error = None;
                        step.status = StepStatus::Completed;
                        step.completed_at = Some(Utc::now());
                    }

                    let duration_ms = started.elapsed().as_millis() as u64;
                    tracing::debug!(
                        workflow_id = %workflow_id,
                        step_id = %definition.id,
                        attempt,
                        duration_ms,
                        "step completed"
                    );
                    self.event_bus.publish(WorkflowEvent::StepCompleted {
                        workflow_id,
                        step_id: definition.id.clone(),
                        attempt,
                        duration_ms,
                    });
                    return Ok(());
                }
                Err(error) => error,
            };

            let policy = definition.retry_policy();
            if matches!(error, CapabilityError::Cancelled)
                || !RetryHandler::should_retry(&policy, attempt)
            {
                return Err(self
                    .fail_step(&workflow, index, workflow_id, &definition.id, attempt, error)
                    .await);
            }

            let delay = RetryHandler::backoff_delay(&policy, attempt);
            let message = error.to_string();
            {
                let mut wf = workflow.write().await;
                let step = &mut wf.steps[index];
                step.error = Some(message.clone());
                step.status = StepStatus::Pending;
            }

            tracing::warn!(
                workflow_id = %workflow_id,
                step_id = %definition.id,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "step attempt failed, retrying"
            );
            self.event_bus.publish(WorkflowEvent::StepRetrying {
                workflow_id,
                step_id: definition.id.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: message,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self
                        .fail_step(
                            &workflow,
                            index,
                            workflow_id,
                            &definition.id,
                            attempt,
                            CapabilityError::Cancelled,
                        )
                        .await);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Record a terminal failure and build the error returned to the scheduler.
    async fn fail_step(
        &self,
        workflow: &RwLock<Workflow>,
        index: usize,
        workflow_id: uuid::Uuid,
        step_id: &str,
        attempt: u32,
        error: CapabilityError,
    ) -> WorkflowError {
        let message = error.to_string();
        {
            let mut wf = workflow.write().await;
            let step = &mut wf.steps[index];
            step.error = Some(message.clone());
            step.status = StepStatus::Failed;
            step.completed_at = Some(Utc::now());
        }

        tracing::warn!(
            workflow_id = %workflow_id,
            step_id,
            attempt,
            error = %message,
            "step failed"
        );
        self.event_bus.publish(WorkflowEvent::StepFailed {
            workflow_id,
            step_id: step_id.to_string(),
            attempt,
            error: message,
        });

        WorkflowError::StepExecution {
            step_id: step_id.to_string(),
            source: error,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
