//! Workflow orchestration engine for stepflow.
//!
//! Executes a dependency-ordered graph of capability invocations. The actual
//! work of each step is delegated to an external [`CapabilityExecutor`]; this
//! crate owns scheduling, gating, retries and cross-step data flow.
//!
//! [`CapabilityExecutor`]: workflow::capability::CapabilityExecutor

pub mod config;
pub mod event;
pub mod workflow;
