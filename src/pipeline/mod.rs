//! The detect → correct → verify pipeline.
//!
//! - [`state`]: states, events and the transition table every step is resolved against
//! - [`context`]: the run context and its guarded mutators
//! - [`stage`]: the detector, corrector and verifier capabilities
//! - [`orchestrator`]: stage invocation, timeouts, cancellation and telemetry
//! - [`relay`] / [`graph`]: the two interchangeable encodings of the sequencing loop

pub mod context;
pub mod graph;
pub mod orchestrator;
pub mod records;
mod relay;
pub mod report;
pub mod stage;
pub mod state;

pub use context::RunContext;
pub use graph::ExecutionGraph;
pub use orchestrator::{DEFAULT_MAX_ITERATIONS, Orchestrator, RunOptions, StageTimeouts};
pub use records::{
    Feedback, FeedbackKind, FixRecord, Issue, IssueKind, Location, Severity, VerificationError,
};
pub use report::{CompletedRun, RunReport};
pub use stage::{
    AnalysisRecord, Correction, Corrector, Detection, Detector, StageRole, Stages, Verdict,
    Verifier,
};
pub use state::{Event, PipelineState, TRANSITIONS, TerminalOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the sequencing loop is dispatched. Both encodings produce identical runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Relay,
    Graph,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Graph => "graph",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relay" | "loop" => Ok(Self::Relay),
            "graph" => Ok(Self::Graph),
            other => Err(format!("unknown encoding '{other}' (expected relay or graph)")),
        }
    }
}
