//! Final report of a completed run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::Encoding;
use super::context::RunContext;
use super::records::{FixRecord, Issue, VerificationError};
use super::state::{PipelineState, TerminalOutcome};

/// A run that reached a terminal state, with its sealed context.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub outcome: TerminalOutcome,
    pub context: RunContext,
    pub encoding: Encoding,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl CompletedRun {
    pub fn report(&self) -> RunReport {
        let ctx = &self.context;
        RunReport {
            outcome: self.outcome,
            final_state: ctx.state(),
            target_root: ctx.targets().root().to_path_buf(),
            artifact_count: ctx.targets().len(),
            detected_issues: ctx.detected_issues().to_vec(),
            fix_history: ctx.fix_history().to_vec(),
            verification_errors: ctx.verification_errors().to_vec(),
            healing_attempts: ctx.healing_attempts(),
            max_iterations: ctx.max_iterations(),
            halt_reason: ctx.halt_reason().map(str::to_string),
            encoding: self.encoding,
            dry_run: self.dry_run,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: TerminalOutcome,
    pub final_state: PipelineState,
    pub target_root: PathBuf,
    pub artifact_count: usize,
    pub detected_issues: Vec<Issue>,
    pub fix_history: Vec<FixRecord>,
    pub verification_errors: Vec<VerificationError>,
    pub healing_attempts: u32,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    pub encoding: Encoding,
    #[serde(default)]
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunReport {
    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}
