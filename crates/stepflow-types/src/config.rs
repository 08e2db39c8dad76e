//! Engine configuration.
//!
//! `EngineConfig` is the TOML document that tunes the scheduler. Every field
//! has a default, so an empty file yields a working engine.

use serde::{Deserialize, Serialize};

/// Scheduler and runner settings shared by every workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum steps in flight per workflow, unless the workflow overrides it.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Delay between scheduler readiness passes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capability call timeout for steps that do not set `timeout_ms`.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Fail steps that can never become ready instead of leaving them pending.
    #[serde(default = "default_fail_blocked_steps")]
    pub fail_blocked_steps: bool,

    /// Capacity of the workflow event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_fail_blocked_steps() -> bool {
    true
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            default_step_timeout_ms: default_step_timeout_ms(),
            fail_blocked_steps: default_fail_blocked_steps(),
            event_capacity: default_event_capacity(),
        }
    }
}
