//! Workflow engine core: registration, dependency scheduling and step execution.
//!
//! - `definition` -- structural validation of workflow definitions
//! - `dag` -- index-based step graph with cycle detection
//! - `registry` -- in-memory store of workflows and templates
//! - `context` -- global context writes, reads and size limits
//! - `template` -- `{{var}}` interpolation of step inputs
//! - `gate` -- JEXL evaluation of `run_if` / `skip_if`
//! - `retry` -- attempt limit and linear backoff
//! - `capability` -- executor and actor-registry ports
//! - `step_runner` -- one step's attempt loop
//! - `scheduler` -- readiness polling, dispatch and finalization
//! - `engine` -- facade over all of the above

pub mod capability;
pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod error;
pub mod gate;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod step_runner;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{ActorRegistry, CapabilityError, CapabilityExecutor, TimeoutGuard};
pub use engine::WorkflowEngine;
pub use error::WorkflowError;
