//! Ports to the external collaborators: the capability executor that performs
//! each step's work, and the optional actor registry used to validate step
//! references at registration time.
//!
//! `CapabilityExecutor` uses native async fn in traits (RPITIT), the same
//! approach as the LLM provider port. Implementations live outside this crate.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

// ---------------------------------------------------------------------------
// CapabilityError
// ---------------------------------------------------------------------------

/// Errors returned by a capability executor.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// The call did not settle within its timeout.
    #[error("capability '{capability}' on '{agent_id}' timed out after {timeout_ms}ms")]
    Timeout {
        agent_id: String,
        capability: String,
        timeout_ms: u64,
    },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent '{agent_id}' has no capability '{capability}'")]
    CapabilityNotFound { agent_id: String, capability: String },

    /// The capability ran and reported a failure.
    #[error("capability failed: {0}")]
    Failed(String),

    /// The step was cancelled while its call was in flight or backing off.
    #[error("step cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// CapabilityExecutor
// ---------------------------------------------------------------------------

/// Performs the work behind a step.
///
/// The executor must enforce `timeout` itself and fail with
/// [`CapabilityError::Timeout`] when it elapses; wrap an executor in
/// [`TimeoutGuard`] if it cannot.
pub trait CapabilityExecutor: Send + Sync {
    fn execute(
        &self,
        agent_id: &str,
        capability: &str,
        input: Value,
        timeout: Duration,
    ) -> impl Future<Output = Result<Value, CapabilityError>> + Send;
}

/// Enforces the per-call timeout around an executor that does not.
pub struct TimeoutGuard<E> {
    inner: E,
}

impl<E: CapabilityExecutor> TimeoutGuard<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

impl<E: CapabilityExecutor> CapabilityExecutor for TimeoutGuard<E> {
    async fn execute(
        &self,
        agent_id: &str,
        capability: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, CapabilityError> {
        match tokio::time::timeout(
            timeout,
            self.inner.execute(agent_id, capability, input, timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(CapabilityError::Timeout {
                agent_id: agent_id.to_string(),
                capability: capability.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ActorRegistry
// ---------------------------------------------------------------------------

/// Lookup-only view of the actors and capabilities available to steps.
pub trait ActorRegistry: Send + Sync {
    fn exists(&self, agent_id: &str) -> bool;

    fn has_capability(&self, agent_id: &str, capability: &str) -> bool;
}
