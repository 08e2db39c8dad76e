//! Shared domain types for stepflow.
//!
//! Workflow and step definitions, the runtime records the scheduler mutates,
//! lifecycle events, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod config;
pub mod event;
pub mod workflow;
