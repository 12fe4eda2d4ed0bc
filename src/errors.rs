//! Typed error hierarchy for mend.
//!
//! Three top-level enums cover the three subsystems:
//! - `PipelineError`: orchestrator faults and state-machine defects
//! - `ConfigError`: CLI-level misconfiguration, reported before a run starts
//! - `SandboxError`: artifact paths escaping the target root

use crate::pipeline::{Event, PipelineState, StageRole};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the orchestrator core.
///
/// `StageFault` and `StageTimeout` end a run in `DONE_ABORTED` and are recorded on the
/// run context. `InvalidTransition`, `RunSealed` and `OutOfOrder` indicate a defect in the
/// orchestrator itself and propagate out of `Orchestrator::run`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{role} stage '{stage}' failed: {message}")]
    StageFault {
        role: StageRole,
        stage: String,
        message: String,
    },

    #[error("{role} stage '{stage}' timed out after {}s", timeout.as_secs())]
    StageTimeout {
        role: StageRole,
        stage: String,
        timeout: Duration,
    },

    #[error("Invalid transition: no edge from {from} on '{event}'")]
    InvalidTransition { from: PipelineState, event: Event },

    #[error("Run is sealed in {state}; no further mutation is allowed")]
    RunSealed { state: PipelineState },

    #[error("Cannot {operation} while in {state}")]
    OutOfOrder {
        operation: &'static str,
        state: PipelineState,
    },
}

impl PipelineError {
    /// Whether the error is an expected stage failure rather than an orchestrator defect.
    pub fn is_stage_failure(&self) -> bool {
        matches!(self, Self::StageFault { .. } | Self::StageTimeout { .. })
    }
}

/// Errors raised while resolving CLI arguments and configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Target not found: {}", path.display())]
    TargetNotFound { path: PathBuf },

    #[error("Target is not a directory: {}", path.display())]
    TargetNotDirectory { path: PathBuf },

    #[error("Config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from sandbox path validation.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path outside sandbox: '{}' is outside '{}'", path.display(), root.display())]
    OutsideSandbox { path: PathBuf, root: PathBuf },

    #[error("Home directory expansion is not allowed: '{}'", path.display())]
    HomeExpansion { path: PathBuf },

    #[error("Failed to resolve '{}': {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
