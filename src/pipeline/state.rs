//! Pipeline states, events and the transition table.
//!
//! [`TRANSITIONS`] is the single authority on sequencing. The relay loop resolves every step
//! through it and the execution graph is generated from it, so the two encodings cannot drift.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::stage::StageRole;

/// Machine state attached to a run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    #[default]
    Init,
    Detecting,
    NoIssues,
    IssuesFound,
    Correcting,
    Verifying,
    Verified,
    VerificationFailed,
    DoneSuccess,
    DoneFailure,
    DoneExhausted,
    DoneAborted,
}

impl PipelineState {
    pub const ALL: [PipelineState; 12] = [
        Self::Init,
        Self::Detecting,
        Self::NoIssues,
        Self::IssuesFound,
        Self::Correcting,
        Self::Verifying,
        Self::Verified,
        Self::VerificationFailed,
        Self::DoneSuccess,
        Self::DoneFailure,
        Self::DoneExhausted,
        Self::DoneAborted,
    ];

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    /// Terminal outcome for `DONE_*` states, `None` for every active state.
    pub fn outcome(&self) -> Option<TerminalOutcome> {
        match self {
            Self::DoneSuccess => Some(TerminalOutcome::Success),
            Self::DoneFailure => Some(TerminalOutcome::Failure),
            Self::DoneExhausted => Some(TerminalOutcome::Exhausted),
            Self::DoneAborted => Some(TerminalOutcome::Aborted),
            _ => None,
        }
    }

    /// The stage invoked while the machine sits in this state.
    pub fn stage(&self) -> Option<StageRole> {
        match self {
            Self::Detecting => Some(StageRole::Detector),
            Self::Correcting => Some(StageRole::Corrector),
            Self::Verifying => Some(StageRole::Verifier),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Detecting => "DETECTING",
            Self::NoIssues => "NO_ISSUES",
            Self::IssuesFound => "ISSUES_FOUND",
            Self::Correcting => "CORRECTING",
            Self::Verifying => "VERIFYING",
            Self::Verified => "VERIFIED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::DoneSuccess => "DONE_SUCCESS",
            Self::DoneFailure => "DONE_FAILURE",
            Self::DoneExhausted => "DONE_EXHAUSTED",
            Self::DoneAborted => "DONE_ABORTED",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable final classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalOutcome {
    Success,
    Failure,
    Exhausted,
    Aborted,
}

impl TerminalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Exhausted => "EXHAUSTED",
            Self::Aborted => "ABORTED",
        }
    }

    /// Process exit code reported by the CLI for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Exhausted => 3,
            Self::Failure | Self::Aborted => 4,
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals observed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Start,
    /// Detector returned no issues.
    Clean,
    /// Detector returned at least one issue.
    IssuesDetected,
    /// Leave ISSUES_FOUND toward correction.
    Proceed,
    /// Dry run: report the findings and stop.
    ReportOnly,
    Corrected,
    Passed,
    Failed,
    Retry,
    Finish,
    /// A detector or corrector could not complete.
    Fault,
    /// Cooperative cancellation.
    Cancel,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Clean => "clean",
            Self::IssuesDetected => "issues_detected",
            Self::Proceed => "proceed",
            Self::ReportOnly => "report_only",
            Self::Corrected => "corrected",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Finish => "finish",
            Self::Fault => "fault",
            Self::Cancel => "cancel",
        }
    }

    /// Events that may interrupt any active state.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Fault | Self::Cancel)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter values a guard is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub healing_attempts: u32,
    pub max_iterations: u32,
}

/// Condition attached to a table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    Always,
    /// At least one correction cycle is permitted.
    HasBudget,
    /// `max_iterations == 0`.
    NoBudget,
    /// Counting the current cycle still leaves room for another.
    CanRetry,
    /// Counting the current cycle uses up the budget.
    RetriesSpent,
}

impl Guard {
    pub fn holds(&self, budget: Budget) -> bool {
        let next = budget.healing_attempts.saturating_add(1);
        match self {
            Self::Always => true,
            Self::HasBudget => budget.max_iterations > 0,
            Self::NoBudget => budget.max_iterations == 0,
            Self::CanRetry => next < budget.max_iterations,
            Self::RetriesSpent => next >= budget.max_iterations,
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Always => None,
            Self::HasBudget => Some("max_iterations > 0"),
            Self::NoBudget => Some("max_iterations = 0"),
            Self::CanRetry => Some("attempts + 1 < max"),
            Self::RetriesSpent => Some("attempts + 1 >= max"),
        }
    }
}

/// Side effect applied to the run context as part of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    None,
    /// Count one completed correction/verification cycle.
    CountAttempt,
}

/// Where a row applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    State(PipelineState),
    /// Every non-terminal state.
    AnyActive,
}

impl Source {
    pub fn matches(&self, state: PipelineState) -> bool {
        match self {
            Self::State(s) => *s == state,
            Self::AnyActive => !state.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Source,
    pub event: Event,
    pub guard: Guard,
    pub effect: Effect,
    pub to: PipelineState,
}

const fn row(
    from: PipelineState,
    event: Event,
    guard: Guard,
    effect: Effect,
    to: PipelineState,
) -> Transition {
    Transition {
        from: Source::State(from),
        event,
        guard,
        effect,
        to,
    }
}

use Effect::CountAttempt;
use Event as E;
use Guard as G;
use PipelineState as S;

pub const TRANSITIONS: &[Transition] = &[
    row(S::Init, E::Start, G::Always, Effect::None, S::Detecting),
    row(S::Detecting, E::Clean, G::Always, Effect::None, S::NoIssues),
    row(S::Detecting, E::IssuesDetected, G::Always, Effect::None, S::IssuesFound),
    row(S::NoIssues, E::Finish, G::Always, Effect::None, S::DoneSuccess),
    row(S::IssuesFound, E::ReportOnly, G::Always, Effect::None, S::DoneSuccess),
    row(S::IssuesFound, E::Proceed, G::HasBudget, Effect::None, S::Correcting),
    row(S::IssuesFound, E::Proceed, G::NoBudget, Effect::None, S::DoneExhausted),
    row(S::Correcting, E::Corrected, G::Always, Effect::None, S::Verifying),
    row(S::Verifying, E::Passed, G::Always, CountAttempt, S::Verified),
    row(S::Verifying, E::Failed, G::CanRetry, CountAttempt, S::VerificationFailed),
    row(S::Verifying, E::Failed, G::RetriesSpent, CountAttempt, S::DoneExhausted),
    row(S::Verified, E::Finish, G::Always, Effect::None, S::DoneSuccess),
    row(S::VerificationFailed, E::Retry, G::Always, Effect::None, S::Correcting),
    Transition {
        from: Source::AnyActive,
        event: E::Fault,
        guard: G::Always,
        effect: Effect::None,
        to: S::DoneAborted,
    },
    Transition {
        from: Source::AnyActive,
        event: E::Cancel,
        guard: G::Always,
        effect: Effect::None,
        to: S::DoneFailure,
    },
];

/// Find the row that applies to `event` in `from` under `budget`.
///
/// Terminal states have no outgoing rows.
pub fn resolve(from: PipelineState, event: Event, budget: Budget) -> Option<&'static Transition> {
    if from.is_terminal() {
        return None;
    }
    TRANSITIONS
        .iter()
        .find(|t| t.from.matches(from) && t.event == event && t.guard.holds(budget))
}

/// Every state reachable from `from` in one step, regardless of guards.
pub fn successors(from: PipelineState) -> Vec<PipelineState> {
    let mut out: Vec<PipelineState> = TRANSITIONS
        .iter()
        .filter(|t| !from.is_terminal() && t.from.matches(from))
        .map(|t| t.to)
        .collect();
    out.sort();
    out.dedup();
    out
}
