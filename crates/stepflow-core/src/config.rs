//! Engine configuration loader.
//!
//! Reads an [`EngineConfig`] from a TOML file. Unlike optional user settings,
//! an engine config that was explicitly pointed at must exist and be valid:
//! a missing file is an I/O error and a malformed or out-of-range one is a
//! config error.

use std::path::Path;

use stepflow_types::config::EngineConfig;

use crate::workflow::error::WorkflowError;

/// Load and validate engine configuration from `path`.
pub async fn load_engine_config(path: &Path) -> Result<EngineConfig, WorkflowError> {
    let content = tokio::fs::read_to_string(path).await?;
    let config = parse_engine_config(&content).map_err(|e| match e {
        WorkflowError::Config(msg) => WorkflowError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })?;
    tracing::debug!(path = %path.display(), ?config, "engine config loaded");
    Ok(config)
}

/// Parse and validate engine configuration from a TOML string.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, WorkflowError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| WorkflowError::Config(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<(), WorkflowError> {
    if config.max_concurrency < 1 {
        return Err(WorkflowError::Config("max_concurrency must be >= 1".to_string()));
    }
    if config.poll_interval_ms < 1 {
        return Err(WorkflowError::Config("poll_interval_ms must be >= 1".to_string()));
    }
    Ok(())
}
