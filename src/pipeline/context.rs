//! Run context: the record threading state across stage invocations.
//!
//! All mutation goes through guarded helpers. Each helper checks that the machine is in the
//! state the operation belongs to, and [`RunContext::advance`] only moves along rows of
//! [`TRANSITIONS`](super::state::TRANSITIONS). Once a `DONE_*` state is reached the context
//! rejects every further mutation.

use chrono::Utc;
use serde::Serialize;

use super::records::{Feedback, FeedbackKind, FixRecord, Issue, VerificationError};
use super::stage::{Correction, Verdict};
use super::state::{self, Budget, Effect, Event, PipelineState, TerminalOutcome, Transition};
use crate::errors::PipelineError;
use crate::target::TargetSet;

#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    target_set: TargetSet,
    current_state: PipelineState,
    detected_issues: Vec<Issue>,
    fix_history: Vec<FixRecord>,
    verification_errors: Vec<VerificationError>,
    healing_attempts: u32,
    max_iterations: u32,
    terminal_outcome: Option<TerminalOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    halt_reason: Option<String>,
}

impl RunContext {
    pub fn new(target_set: TargetSet, max_iterations: u32) -> Self {
        Self {
            target_set,
            current_state: PipelineState::Init,
            detected_issues: Vec::new(),
            fix_history: Vec::new(),
            verification_errors: Vec::new(),
            healing_attempts: 0,
            max_iterations,
            terminal_outcome: None,
            halt_reason: None,
        }
    }

    pub fn targets(&self) -> &TargetSet {
        &self.target_set
    }

    pub fn state(&self) -> PipelineState {
        self.current_state
    }

    pub fn detected_issues(&self) -> &[Issue] {
        &self.detected_issues
    }

    pub fn fix_history(&self) -> &[FixRecord] {
        &self.fix_history
    }

    pub fn verification_errors(&self) -> &[VerificationError] {
        &self.verification_errors
    }

    pub fn healing_attempts(&self) -> u32 {
        self.healing_attempts
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn terminal_outcome(&self) -> Option<TerminalOutcome> {
        self.terminal_outcome
    }

    /// Why the run was aborted or cancelled, if it was.
    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn is_sealed(&self) -> bool {
        self.current_state.is_terminal()
    }

    pub fn budget(&self) -> Budget {
        Budget {
            healing_attempts: self.healing_attempts,
            max_iterations: self.max_iterations,
        }
    }

    /// Apply the table row matching `event` in the current state.
    ///
    /// The row's guard is evaluated and its effect applied in the same call, so a counted
    /// attempt and the routing decision it drives can never be observed apart.
    pub fn advance(&mut self, event: Event) -> Result<&'static Transition, PipelineError> {
        self.ensure_open()?;
        let from = self.current_state;
        let transition = state::resolve(from, event, self.budget())
            .ok_or(PipelineError::InvalidTransition { from, event })?;

        if transition.effect == Effect::CountAttempt {
            self.healing_attempts += 1;
        }
        if transition.to == PipelineState::Verifying {
            self.verification_errors.clear();
        }
        self.current_state = transition.to;
        self.terminal_outcome = transition.to.outcome();

        debug_assert!(
            self.invariant_violation().is_none(),
            "{:?}",
            self.invariant_violation()
        );
        Ok(transition)
    }

    /// Fire an interrupt (`Fault` or `Cancel`) and remember why.
    pub fn halt(
        &mut self,
        event: Event,
        reason: impl Into<String>,
    ) -> Result<&'static Transition, PipelineError> {
        let from = self.current_state;
        if !event.is_interrupt() {
            return Err(PipelineError::InvalidTransition { from, event });
        }
        let transition = self.advance(event)?;
        self.halt_reason = Some(reason.into());
        Ok(transition)
    }

    /// Replace the detected issues wholesale with the detector's latest findings.
    pub fn record_detection(&mut self, issues: Vec<Issue>) -> Result<Event, PipelineError> {
        self.expect_state(PipelineState::Detecting, "record detection")?;
        self.detected_issues = issues;
        Ok(if self.detected_issues.is_empty() {
            Event::Clean
        } else {
            Event::IssuesDetected
        })
    }

    /// Feedback for the next correction: detector issues before any fix, verification errors
    /// afterwards.
    pub fn feedback(&self) -> Feedback {
        if self.fix_history.is_empty() {
            Feedback::Issues(self.detected_issues.clone())
        } else {
            Feedback::Errors(self.verification_errors.clone())
        }
    }

    pub fn record_fix(
        &mut self,
        correction: Correction,
        feedback: FeedbackKind,
    ) -> Result<Event, PipelineError> {
        self.expect_state(PipelineState::Correcting, "record a fix")?;
        self.fix_history.push(FixRecord {
            cycle: self.healing_attempts + 1,
            feedback,
            summary: correction.summary,
            touched: correction.touched,
            applied_at: Utc::now(),
        });
        Ok(Event::Corrected)
    }

    pub fn record_verdict(&mut self, verdict: Verdict) -> Result<Event, PipelineError> {
        self.expect_state(PipelineState::Verifying, "record a verdict")?;
        let verdict = verdict.normalized();
        self.verification_errors = verdict.errors;
        Ok(if verdict.passed {
            Event::Passed
        } else {
            Event::Failed
        })
    }

    /// Describe the first broken invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        if self.healing_attempts > self.max_iterations {
            return Some(format!(
                "healing_attempts {} exceeds max_iterations {}",
                self.healing_attempts, self.max_iterations
            ));
        }

        // The corrector has already appended this cycle's fix while verification runs.
        let expected_fixes = match self.current_state {
            PipelineState::Verifying => self.healing_attempts + 1,
            _ => self.healing_attempts,
        };
        if self.fix_history.len() as u32 != expected_fixes {
            return Some(format!(
                "fix_history has {} entries in {} with {} attempts",
                self.fix_history.len(),
                self.current_state,
                self.healing_attempts
            ));
        }

        if !self.verification_errors.is_empty()
            && !matches!(
                self.current_state,
                PipelineState::VerificationFailed
                    | PipelineState::Correcting
                    | PipelineState::DoneExhausted
                    | PipelineState::DoneAborted
                    | PipelineState::DoneFailure
            )
        {
            return Some(format!(
                "verification_errors set in {}",
                self.current_state
            ));
        }

        if self.terminal_outcome != self.current_state.outcome() {
            return Some(format!(
                "terminal_outcome {:?} disagrees with {}",
                self.terminal_outcome, self.current_state
            ));
        }
        None
    }

    fn ensure_open(&self) -> Result<(), PipelineError> {
        if self.is_sealed() {
            return Err(PipelineError::RunSealed {
                state: self.current_state,
            });
        }
        Ok(())
    }

    fn expect_state(
        &self,
        expected: PipelineState,
        operation: &'static str,
    ) -> Result<(), PipelineError> {
        self.ensure_open()?;
        if self.current_state != expected {
            return Err(PipelineError::OutOfOrder {
                operation,
                state: self.current_state,
            });
        }
        Ok(())
    }
}
