//! Observability setup for stepflow: structured logging with an optional
//! OpenTelemetry bridge.

pub mod tracing_setup;
