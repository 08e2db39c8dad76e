//! Scriptable `CapabilityExecutor` for runner, scheduler and engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};

use super::capability::{CapabilityError, CapabilityExecutor};

/// A single recorded call.
#[derive(Debug, Clone)]
pub struct Call {
    pub agent_id: String,
    pub capability: String,
    pub input: Value,
}

#[derive(Debug, Clone, Default)]
struct Script {
    result: Option<Value>,
    delay: Duration,
    /// Fail this many calls before succeeding.
    failures: u32,
}

/// Mock executor keyed by capability name.
///
/// Unscripted capabilities succeed immediately with
/// `{ "capability": <name>, "input": <input> }`, which lets tests observe
/// the interpolated input through the context.
#[derive(Debug, Default)]
pub struct MockExecutor {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, capability: &str, result: Value) -> Self {
        self.script(capability, |s| s.result = Some(result));
        self
    }

    pub fn delay(self, capability: &str, ms: u64) -> Self {
        self.script(capability, |s| s.delay = Duration::from_millis(ms));
        self
    }

    pub fn fail_times(self, capability: &str, failures: u32) -> Self {
        self.script(capability, |s| s.failures = failures);
        self
    }

    pub fn always_fail(self, capability: &str) -> Self {
        self.fail_times(capability, u32::MAX)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, capability: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.capability == capability)
            .count()
    }

    /// Highest number of calls observed executing at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self, capability: &str, f: impl FnOnce(&mut Script)) {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(capability.to_string()).or_default());
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CapabilityExecutor for MockExecutor {
    async fn execute(
        &self,
        agent_id: &str,
        capability: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, CapabilityError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(capability)
            .cloned()
            .unwrap_or_default();

        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                agent_id: agent_id.to_string(),
                capability: capability.to_string(),
                input: input.clone(),
            });
            calls.iter().filter(|c| c.capability == capability).count() as u32
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if script.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(CapabilityError::Timeout {
                agent_id: agent_id.to_string(),
                capability: capability.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        if call_number <= script.failures {
            return Err(CapabilityError::Failed(format!(
                "scripted failure {call_number} for '{capability}'"
            )));
        }

        Ok(script
            .result
            .unwrap_or_else(|| json!({ "capability": capability, "input": input })))
    }
}
