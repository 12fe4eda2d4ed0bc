//! The orchestrator: sequences stages through the transition table.
//!
//! Stage invocation, timeouts, cancellation and telemetry live here and are shared by both
//! encodings. An encoding only decides how the next step is dispatched: by matching on the
//! current state ([`relay`](super::relay)) or by walking the generated
//! [`ExecutionGraph`](super::graph::ExecutionGraph).

use chrono::Utc;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::context::RunContext;
use super::graph::{self, ExecutionGraph};
use super::records::VerificationError;
use super::relay;
use super::report::CompletedRun;
use super::stage::{StageRole, Stages, Verdict};
use super::state::{Event, PipelineState, TRANSITIONS, Transition};
use super::Encoding;
use crate::errors::PipelineError;
use crate::target::TargetSet;
use crate::telemetry::{ActionKind, EventSink, TelemetryEvent};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Per-invocation time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub detect: Duration,
    pub correct: Duration,
    pub verify: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            detect: Duration::from_secs(300),
            correct: Duration::from_secs(900),
            verify: Duration::from_secs(600),
        }
    }
}

impl StageTimeouts {
    pub fn for_role(&self, role: StageRole) -> Duration {
        match role {
            StageRole::Detector => self.detect,
            StageRole::Corrector => self.correct,
            StageRole::Verifier => self.verify,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_iterations: u32,
    /// Run the detector only and report its findings.
    pub dry_run: bool,
    pub encoding: Encoding,
    pub timeouts: StageTimeouts,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            dry_run: false,
            encoding: Encoding::Relay,
            timeouts: StageTimeouts::default(),
        }
    }
}

/// Why a step produced no event.
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// A detector or corrector failed or timed out.
    Fault(PipelineError),
    Cancelled,
    /// The orchestrator itself misbehaved.
    Defect(PipelineError),
}

impl From<PipelineError> for Interrupt {
    fn from(err: PipelineError) -> Self {
        Self::Defect(err)
    }
}

pub(crate) type Step = Result<Event, Interrupt>;

pub struct Orchestrator {
    stages: Stages,
    sink: Arc<dyn EventSink>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(stages: Stages, sink: Arc<dyn EventSink>, options: RunOptions) -> Self {
        Self {
            stages,
            sink,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token; cancelling it ends the run in `DONE_FAILURE`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Drive one run over `targets` to a terminal state.
    ///
    /// Stage faults, timeouts and cancellation end the run normally with the matching terminal
    /// outcome. An `Err` is returned only for orchestrator defects.
    pub async fn run(&self, targets: TargetSet) -> Result<CompletedRun, PipelineError> {
        let started_at = Utc::now();
        let mut ctx = RunContext::new(targets, self.options.max_iterations);
        tracing::info!(
            root = %ctx.targets().root().display(),
            artifacts = ctx.targets().len(),
            max_iterations = self.options.max_iterations,
            dry_run = self.options.dry_run,
            encoding = %self.options.encoding,
            "Starting run"
        );

        let driven = match self.options.encoding {
            Encoding::Relay => relay::drive(self, &mut ctx).await,
            Encoding::Graph => {
                let graph = ExecutionGraph::from_table(TRANSITIONS);
                graph::drive(self, &graph, &mut ctx).await
            }
        };
        if let Err(err) = driven {
            tracing::error!(state = %ctx.state(), error = %err, "Orchestrator defect");
            return Err(err);
        }

        let outcome = ctx
            .terminal_outcome()
            .ok_or(PipelineError::OutOfOrder {
                operation: "finish a run",
                state: ctx.state(),
            })?;
        tracing::info!(
            outcome = %outcome,
            healing_attempts = ctx.healing_attempts(),
            fixes = ctx.fix_history().len(),
            "Run finished"
        );

        Ok(CompletedRun {
            outcome,
            context: ctx,
            encoding: self.options.encoding,
            dry_run: self.options.dry_run,
            started_at,
            ended_at: Utc::now(),
        })
    }

    /// Invoke the stage bound to the current state and turn its result into an event.
    pub(crate) async fn invoke(&self, role: StageRole, ctx: &mut RunContext) -> Step {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        match role {
            StageRole::Detector => self.detect(ctx).await,
            StageRole::Corrector => self.correct(ctx).await,
            StageRole::Verifier => self.verify(ctx).await,
        }
    }

    /// Pick the event for a state that invokes no stage.
    pub(crate) fn decide(&self, ctx: &RunContext) -> Step {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        let state = ctx.state();
        match state {
            PipelineState::Init => Ok(Event::Start),
            PipelineState::NoIssues | PipelineState::Verified => Ok(Event::Finish),
            PipelineState::IssuesFound if self.options.dry_run => Ok(Event::ReportOnly),
            PipelineState::IssuesFound => Ok(Event::Proceed),
            PipelineState::VerificationFailed => Ok(Event::Retry),
            _ => Err(Interrupt::Defect(PipelineError::OutOfOrder {
                operation: "decide without a stage",
                state,
            })),
        }
    }

    /// Apply a step to the context and report the resulting transition.
    pub(crate) fn commit(
        &self,
        ctx: &mut RunContext,
        step: Step,
    ) -> Result<&'static Transition, PipelineError> {
        let from = ctx.state();
        let attempts_before = ctx.healing_attempts();
        let transition = match step {
            Ok(event) => ctx.advance(event)?,
            Err(Interrupt::Fault(err)) => {
                let reason = err.to_string();
                self.emit(TelemetryEvent::new(
                    "orchestrator",
                    ActionKind::Fault,
                    json!({ "state": from }),
                    json!({ "reason": reason }),
                    false,
                ));
                ctx.halt(Event::Fault, reason)?
            }
            Err(Interrupt::Cancelled) => ctx.halt(Event::Cancel, "run cancelled")?,
            Err(Interrupt::Defect(err)) => return Err(err),
        };

        tracing::debug!(
            from = %from,
            event = %transition.event,
            to = %transition.to,
            healing_attempts = ctx.healing_attempts(),
            "Transition"
        );
        self.emit(TelemetryEvent::new(
            "orchestrator",
            ActionKind::Transition,
            json!({ "from": from, "event": transition.event, "healing_attempts": attempts_before }),
            json!({ "to": transition.to, "healing_attempts": ctx.healing_attempts() }),
            true,
        ));
        Ok(transition)
    }

    async fn detect(&self, ctx: &mut RunContext) -> Step {
        let role = StageRole::Detector;
        let input = json!({ "artifacts": ctx.targets().artifacts() });
        let outcome = self
            .guarded(role, self.stages.detector.detect(ctx.targets()))
            .await;

        match outcome {
            Ok(detection) => {
                tracing::info!(issues = detection.issues.len(), "Detection complete");
                self.emit_stage(
                    role,
                    input,
                    json!({ "issues": detection.issues, "record": detection.record }),
                    true,
                );
                Ok(ctx.record_detection(detection.issues)?)
            }
            Err(interrupt) => {
                self.emit_interrupted(role, input, &interrupt);
                Err(interrupt)
            }
        }
    }

    async fn correct(&self, ctx: &mut RunContext) -> Step {
        let role = StageRole::Corrector;
        let feedback = ctx.feedback();
        let cycle = ctx.healing_attempts() + 1;
        let input = json!({ "cycle": cycle, "feedback": feedback });
        let outcome = self
            .guarded(role, self.stages.corrector.correct(ctx.targets(), &feedback))
            .await;

        match outcome {
            Ok(correction) => {
                tracing::info!(cycle, summary = %correction.summary, "Correction applied");
                self.emit_stage(
                    role,
                    input,
                    json!({ "summary": correction.summary, "touched": correction.touched }),
                    true,
                );
                Ok(ctx.record_fix(correction, feedback.kind())?)
            }
            Err(interrupt) => {
                self.emit_interrupted(role, input, &interrupt);
                Err(interrupt)
            }
        }
    }

    async fn verify(&self, ctx: &mut RunContext) -> Step {
        let role = StageRole::Verifier;
        let cycle = ctx.healing_attempts() + 1;
        let input = json!({ "cycle": cycle, "artifacts": ctx.targets().len() });
        let outcome = self
            .guarded(role, self.stages.verifier.verify(ctx.targets()))
            .await;

        let verdict = match outcome {
            Ok(verdict) => verdict.normalized(),
            Err(Interrupt::Fault(err)) => {
                // Unexecutable verification counts as a failed cycle.
                tracing::warn!(cycle, error = %err, "Verifier could not execute");
                Verdict::fail(vec![VerificationError::execution_fault(err.to_string())])
            }
            Err(interrupt) => {
                self.emit_interrupted(role, input, &interrupt);
                return Err(interrupt);
            }
        };

        tracing::info!(
            cycle,
            passed = verdict.passed,
            errors = verdict.errors.len(),
            "Verification complete"
        );
        self.emit_stage(role, input, json!(verdict), verdict.passed);
        Ok(ctx.record_verdict(verdict)?)
    }

    /// Await a stage future under its timeout, racing the cancellation token.
    async fn guarded<T, F>(&self, role: StageRole, fut: F) -> Result<T, Interrupt>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let limit = self.options.timeouts.for_role(role);
        let stage = self.stages.name_of(role).to_string();
        tracing::debug!(role = %role, stage = %stage, timeout_secs = limit.as_secs(), "Invoking stage");

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            outcome = tokio::time::timeout(limit, fut) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(Interrupt::Fault(PipelineError::StageFault {
                    role,
                    stage,
                    message: format!("{e:#}"),
                })),
                Err(_) => Err(Interrupt::Fault(PipelineError::StageTimeout {
                    role,
                    stage,
                    timeout: limit,
                })),
            },
        }
    }

    fn component(&self, role: StageRole) -> String {
        format!("{}:{}", role, self.stages.name_of(role))
    }

    fn emit_stage(&self, role: StageRole, input: Value, output: Value, success: bool) {
        self.emit(TelemetryEvent::new(
            self.component(role),
            role.action(),
            input,
            output,
            success,
        ));
    }

    fn emit_interrupted(&self, role: StageRole, input: Value, interrupt: &Interrupt) {
        let output = match interrupt {
            Interrupt::Fault(err) | Interrupt::Defect(err) => json!({ "error": err.to_string() }),
            Interrupt::Cancelled => json!({ "error": "cancelled" }),
        };
        self.emit_stage(role, input, output, false);
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Err(e) = self.sink.record(&event) {
            tracing::warn!(error = %e, component = %event.component, "Telemetry sink failed");
        }
    }
}
