//! End-to-end orchestrator scenarios with scripted in-memory stages.
//!
//! Every scenario runs under both encodings; the outcome, counters, stage call counts and
//! transition traces must be identical.

use async_trait::async_trait;
use mend::pipeline::{
    Correction, Corrector, Detection, Detector, Encoding, FeedbackKind, Issue, Location,
    Orchestrator, PipelineState, RunOptions, Severity, StageTimeouts, Stages, TerminalOutcome,
    Verdict, VerificationError, Verifier, Feedback, CompletedRun,
};
use mend::target::{ArtifactId, TargetSet};
use mend::telemetry::{ActionKind, EventSink, MemorySink, TelemetryEvent};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
enum Step {
    Ok,
    Crash,
    Hang,
}

#[derive(Clone, Copy, Debug)]
enum Check {
    Pass,
    Fail,
    Crash,
    Hang,
}

#[derive(Clone, Debug)]
struct Script {
    issues: usize,
    detector: Step,
    /// Per-cycle corrector behaviour; the last entry repeats.
    corrector: Vec<Step>,
    /// Per-cycle verifier behaviour; the last entry repeats.
    verifier: Vec<Check>,
    max_iterations: u32,
    dry_run: bool,
}

impl Script {
    fn new(issues: usize, verifier: Vec<Check>, max_iterations: u32) -> Self {
        Self {
            issues,
            detector: Step::Ok,
            corrector: vec![Step::Ok],
            verifier,
            max_iterations,
            dry_run: false,
        }
    }
}

#[derive(Default)]
struct Recorder {
    detector_calls: AtomicU32,
    corrector_calls: AtomicU32,
    verifier_calls: AtomicU32,
    feedback: Mutex<Vec<FeedbackKind>>,
    /// Set when a stage starts while the trace says the run is already terminal.
    invoked_after_done: AtomicBool,
    sink: MemorySink,
}

impl Recorder {
    fn check_not_done(&self) {
        let last_to = self
            .sink
            .events()
            .iter()
            .rev()
            .find(|e| e.action == ActionKind::Transition)
            .and_then(|e| e.output["to"].as_str().map(str::to_string));
        if last_to.is_some_and(|to| to.starts_with("DONE_")) {
            self.invoked_after_done.store(true, Ordering::SeqCst);
        }
    }
}

struct RecorderSink(Arc<Recorder>);

impl EventSink for RecorderSink {
    fn record(&self, event: &TelemetryEvent) -> anyhow::Result<()> {
        self.0.sink.record(event)
    }
}

fn pick<T: Copy>(steps: &[T], call: u32) -> T {
    let idx = (call as usize).min(steps.len() - 1);
    steps[idx]
}

async fn hang() {
    tokio::time::sleep(Duration::from_secs(30)).await;
}

struct ScriptedDetector {
    script: Script,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect(&self, targets: &TargetSet) -> anyhow::Result<Detection> {
        self.recorder.check_not_done();
        self.recorder.detector_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.detector {
            Step::Crash => anyhow::bail!("analyzer crashed"),
            Step::Hang => hang().await,
            Step::Ok => {}
        }
        let issues = (0..self.script.issues)
            .map(|i| {
                Issue::new(
                    Location::new("calc.py", Some(i as u32 + 1)),
                    Severity::Warning,
                    format!("issue {i}"),
                )
            })
            .collect();
        Ok(Detection {
            issues,
            record: mend::pipeline::AnalysisRecord {
                analyzed: targets.artifacts().to_vec(),
                notes: Vec::new(),
            },
        })
    }
}

struct ScriptedCorrector {
    script: Script,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Corrector for ScriptedCorrector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn correct(&self, _targets: &TargetSet, feedback: &Feedback) -> anyhow::Result<Correction> {
        self.recorder.check_not_done();
        let call = self.recorder.corrector_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.recorder.feedback.lock() {
            seen.push(feedback.kind());
        }
        match pick(&self.script.corrector, call) {
            Step::Crash => anyhow::bail!("model backend unavailable"),
            Step::Hang => hang().await,
            Step::Ok => {}
        }
        Ok(Correction::new(format!("fix #{}", call + 1)))
    }
}

struct ScriptedVerifier {
    script: Script,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn verify(&self, _targets: &TargetSet) -> anyhow::Result<Verdict> {
        self.recorder.check_not_done();
        let call = self.recorder.verifier_calls.fetch_add(1, Ordering::SeqCst);
        match pick(&self.script.verifier, call) {
            Check::Pass => Ok(Verdict::pass()),
            Check::Fail => Ok(Verdict::fail(vec![VerificationError::new(
                format!("expected 4, got 5 (cycle {})", call + 1),
                "AssertionError",
            )
            .at(Location::new("calc.py", Some(3)))])),
            Check::Crash => anyhow::bail!("pytest: command not found"),
            Check::Hang => {
                hang().await;
                Ok(Verdict::pass())
            }
        }
    }
}

fn targets() -> TargetSet {
    TargetSet::new("/work/project", vec![ArtifactId::from("calc.py")])
}

fn short_timeouts() -> StageTimeouts {
    StageTimeouts {
        detect: Duration::from_millis(200),
        correct: Duration::from_millis(200),
        verify: Duration::from_millis(200),
    }
}

fn build(script: &Script, encoding: Encoding) -> (Orchestrator, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let stages = Stages::new(
        ScriptedDetector {
            script: script.clone(),
            recorder: recorder.clone(),
        },
        ScriptedCorrector {
            script: script.clone(),
            recorder: recorder.clone(),
        },
        ScriptedVerifier {
            script: script.clone(),
            recorder: recorder.clone(),
        },
    );
    let options = RunOptions {
        max_iterations: script.max_iterations,
        dry_run: script.dry_run,
        encoding,
        timeouts: short_timeouts(),
    };
    let orch = Orchestrator::new(stages, Arc::new(RecorderSink(recorder.clone())), options);
    (orch, recorder)
}

fn trace(recorder: &Recorder) -> Vec<(String, String, String)> {
    recorder
        .sink
        .events()
        .iter()
        .filter(|e| e.action == ActionKind::Transition)
        .map(|e| {
            (
                e.input["from"].as_str().unwrap_or_default().to_string(),
                e.input["event"].as_str().unwrap_or_default().to_string(),
                e.output["to"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

struct Observed {
    run: CompletedRun,
    recorder: Arc<Recorder>,
}

impl Observed {
    fn calls(&self) -> (u32, u32, u32) {
        (
            self.recorder.detector_calls.load(Ordering::SeqCst),
            self.recorder.corrector_calls.load(Ordering::SeqCst),
            self.recorder.verifier_calls.load(Ordering::SeqCst),
        )
    }
}

/// Run the script under both encodings, check they agree, and return the relay run.
async fn run_both(script: Script) -> Observed {
    let (relay, relay_recorder) = build(&script, Encoding::Relay);
    let relay_run = relay.run(targets()).await.expect("relay run");
    let (graph, graph_recorder) = build(&script, Encoding::Graph);
    let graph_run = graph.run(targets()).await.expect("graph run");

    let relay = Observed {
        run: relay_run,
        recorder: relay_recorder,
    };
    let graph = Observed {
        run: graph_run,
        recorder: graph_recorder,
    };

    assert_eq!(relay.run.outcome, graph.run.outcome, "{script:?}");
    assert_eq!(relay.run.context.state(), graph.run.context.state());
    assert_eq!(
        relay.run.context.healing_attempts(),
        graph.run.context.healing_attempts()
    );
    assert_eq!(
        relay.run.context.fix_history().len(),
        graph.run.context.fix_history().len()
    );
    assert_eq!(relay.calls(), graph.calls(), "{script:?}");
    assert_eq!(trace(&relay.recorder), trace(&graph.recorder), "{script:?}");

    for observed in [&relay, &graph] {
        let ctx = &observed.run.context;
        assert!(ctx.is_sealed());
        assert!(ctx.healing_attempts() <= ctx.max_iterations());
        assert!(ctx.invariant_violation().is_none(), "{:?}", ctx.invariant_violation());
        assert!(!observed.recorder.invoked_after_done.load(Ordering::SeqCst));
    }
    relay
}

#[tokio::test]
async fn test_no_issues_skips_correction_and_verification() {
    let obs = run_both(Script::new(0, vec![Check::Fail], 5)).await;
    assert_eq!(obs.run.outcome, TerminalOutcome::Success);
    assert_eq!(obs.calls(), (1, 0, 0));
    assert!(obs.run.context.fix_history().is_empty());
    assert_eq!(
        trace(&obs.recorder).last().map(|t| t.0.as_str()),
        Some("NO_ISSUES")
    );
}

#[tokio::test]
async fn test_rerun_on_clean_artifacts_is_idempotent() {
    for _ in 0..2 {
        let obs = run_both(Script::new(0, vec![Check::Pass], 10)).await;
        assert_eq!(obs.run.context.state(), PipelineState::DoneSuccess);
        assert!(obs.run.context.fix_history().is_empty());
        assert_eq!(obs.run.context.healing_attempts(), 0);
    }
}

#[tokio::test]
async fn test_single_fix_that_verifies_succeeds() {
    let obs = run_both(Script::new(1, vec![Check::Pass], 10)).await;
    assert_eq!(obs.run.context.state(), PipelineState::DoneSuccess);
    assert_eq!(obs.run.context.healing_attempts(), 1);
    assert_eq!(obs.run.context.fix_history().len(), 1);
    assert_eq!(obs.calls(), (1, 1, 1));
    assert!(obs.run.context.verification_errors().is_empty());
}

#[tokio::test]
async fn test_persistent_failure_exhausts_the_budget() {
    let obs = run_both(Script::new(1, vec![Check::Fail], 3)).await;
    let ctx = &obs.run.context;
    assert_eq!(ctx.state(), PipelineState::DoneExhausted);
    assert_eq!(obs.calls(), (1, 3, 3));
    assert_eq!(ctx.fix_history().len(), 3);
    assert_eq!(ctx.healing_attempts(), 3);
    assert!(!ctx.verification_errors().is_empty());
    assert!(ctx.verification_errors()[0].description.contains("cycle 3"));
}

#[tokio::test]
async fn test_zero_budget_never_invokes_the_corrector() {
    let obs = run_both(Script::new(2, vec![Check::Pass], 0)).await;
    assert_eq!(obs.run.context.state(), PipelineState::DoneExhausted);
    assert_eq!(obs.calls(), (1, 0, 0));
    assert_eq!(obs.run.context.healing_attempts(), 0);
    assert_eq!(obs.run.context.detected_issues().len(), 2);
}

#[tokio::test]
async fn test_verifier_crash_counts_as_a_failed_cycle() {
    let obs = run_both(Script::new(1, vec![Check::Crash, Check::Pass], 2)).await;
    let ctx = &obs.run.context;
    assert_eq!(ctx.state(), PipelineState::DoneSuccess);
    assert_eq!(ctx.healing_attempts(), 2);
    assert_eq!(obs.calls(), (1, 2, 2));
    assert!(ctx.halt_reason().is_none());
}

#[tokio::test]
async fn test_verifier_timeout_counts_as_a_failed_cycle() {
    let obs = run_both(Script::new(1, vec![Check::Hang, Check::Pass], 2)).await;
    assert_eq!(obs.run.outcome, TerminalOutcome::Success);
    assert_eq!(obs.run.context.healing_attempts(), 2);
}

#[tokio::test]
async fn test_verifier_crash_on_last_cycle_exhausts_with_synthetic_error() {
    let obs = run_both(Script::new(1, vec![Check::Crash], 1)).await;
    let ctx = &obs.run.context;
    assert_eq!(ctx.state(), PipelineState::DoneExhausted);
    assert_eq!(ctx.verification_errors().len(), 1);
    assert!(
        ctx.verification_errors()[0]
            .diagnostic
            .contains("command not found")
    );
}

#[tokio::test]
async fn test_attempts_never_exceed_budget() {
    for max in 0..6 {
        for verifier in [vec![Check::Fail], vec![Check::Crash], vec![Check::Fail, Check::Pass]] {
            let obs = run_both(Script::new(1, verifier.clone(), max)).await;
            let ctx = &obs.run.context;
            assert!(ctx.healing_attempts() <= max, "max={max} {verifier:?}");
            let (_, corrector, verifier_calls) = obs.calls();
            assert_eq!(corrector, verifier_calls);
            assert_eq!(corrector, ctx.healing_attempts());
        }
    }
}

#[tokio::test]
async fn test_detector_fault_aborts_before_any_correction() {
    let mut script = Script::new(1, vec![Check::Pass], 3);
    script.detector = Step::Crash;
    let obs = run_both(script).await;
    assert_eq!(obs.run.outcome, TerminalOutcome::Aborted);
    assert_eq!(obs.calls(), (1, 0, 0));
    let reason = obs.run.context.halt_reason().unwrap_or_default();
    assert!(reason.contains("analyzer crashed"), "{reason}");
}

#[tokio::test]
async fn test_detector_timeout_aborts() {
    let mut script = Script::new(1, vec![Check::Pass], 3);
    script.detector = Step::Hang;
    let obs = run_both(script).await;
    assert_eq!(obs.run.context.state(), PipelineState::DoneAborted);
    assert!(obs.run.context.halt_reason().unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn test_corrector_fault_keeps_partial_history() {
    let mut script = Script::new(1, vec![Check::Fail], 5);
    script.corrector = vec![Step::Ok, Step::Crash];
    let obs = run_both(script).await;
    let ctx = &obs.run.context;
    assert_eq!(ctx.state(), PipelineState::DoneAborted);
    assert_eq!(ctx.fix_history().len(), 1);
    assert_eq!(ctx.healing_attempts(), 1);
    assert_eq!(obs.calls(), (1, 2, 1));
    // The errors that drove the failed correction are still reported.
    assert!(!ctx.verification_errors().is_empty());
}

#[tokio::test]
async fn test_corrector_timeout_aborts() {
    let mut script = Script::new(1, vec![Check::Pass], 3);
    script.corrector = vec![Step::Hang];
    let obs = run_both(script).await;
    assert_eq!(obs.run.outcome, TerminalOutcome::Aborted);
    assert_eq!(obs.calls(), (1, 1, 0));
    assert!(obs.run.context.fix_history().is_empty());
}

#[tokio::test]
async fn test_dry_run_reports_without_correcting() {
    let mut script = Script::new(3, vec![Check::Fail], 5);
    script.dry_run = true;
    let obs = run_both(script).await;
    assert_eq!(obs.run.outcome, TerminalOutcome::Success);
    assert_eq!(obs.calls(), (1, 0, 0));
    assert_eq!(obs.run.context.detected_issues().len(), 3);
    assert!(obs.run.dry_run);
}

#[tokio::test]
async fn test_corrector_gets_issues_first_then_errors() {
    let obs = run_both(Script::new(1, vec![Check::Fail, Check::Fail, Check::Pass], 5)).await;
    let seen = obs.recorder.feedback.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            FeedbackKind::Issues,
            FeedbackKind::Errors,
            FeedbackKind::Errors
        ]
    );
    let history = obs.run.context.fix_history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].feedback, FeedbackKind::Issues);
    assert_eq!(history.iter().map(|f| f.cycle).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_every_stage_call_is_reported() {
    let obs = run_both(Script::new(1, vec![Check::Fail, Check::Pass], 5)).await;
    let events = obs.recorder.sink.events();
    let count = |action: ActionKind| events.iter().filter(|e| e.action == action).count();
    assert_eq!(count(ActionKind::Analysis), 1);
    assert_eq!(count(ActionKind::Generation), 2);
    assert_eq!(count(ActionKind::Verification), 2);
    let failed_verifications = events
        .iter()
        .filter(|e| e.action == ActionKind::Verification && !e.success)
        .count();
    assert_eq!(failed_verifications, 1);
    for event in events.iter().filter(|e| e.action.is_stage_action()) {
        assert!(event.component.ends_with(":scripted"));
        assert!(!event.input.is_null());
        assert!(!event.output.is_null());
    }
}

#[tokio::test]
async fn test_cancelled_token_ends_in_failure() {
    let (orch, recorder) = build(&Script::new(1, vec![Check::Pass], 3), Encoding::Relay);
    let token = CancellationToken::new();
    token.cancel();
    let orch = orch.with_cancellation(token);
    let run = orch.run(targets()).await.unwrap();
    assert_eq!(run.outcome, TerminalOutcome::Failure);
    assert_eq!(run.context.state(), PipelineState::DoneFailure);
    assert_eq!(recorder.detector_calls.load(Ordering::SeqCst), 0);
    assert_eq!(run.context.halt_reason(), Some("run cancelled"));
}

#[tokio::test]
async fn test_cancellation_interrupts_an_in_flight_stage() {
    for encoding in [Encoding::Relay, Encoding::Graph] {
        let mut script = Script::new(1, vec![Check::Pass], 3);
        script.corrector = vec![Step::Hang];
        let (orch, recorder) = build(&script, encoding);
        let orch = orch.with_cancellation(CancellationToken::new());
        let token = orch.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let run = orch.run(targets()).await.unwrap();
        assert_eq!(run.outcome, TerminalOutcome::Failure, "{encoding}");
        assert_eq!(recorder.corrector_calls.load(Ordering::SeqCst), 1);
        assert!(run.context.fix_history().is_empty());
    }
}

struct BrokenSink;

impl EventSink for BrokenSink {
    fn record(&self, _event: &TelemetryEvent) -> anyhow::Result<()> {
        anyhow::bail!("collector offline")
    }
}

#[tokio::test]
async fn test_failing_sink_does_not_change_the_run() {
    let script = Script::new(1, vec![Check::Fail, Check::Pass], 3);
    let recorder = Arc::new(Recorder::default());
    let stages = Stages::new(
        ScriptedDetector {
            script: script.clone(),
            recorder: recorder.clone(),
        },
        ScriptedCorrector {
            script: script.clone(),
            recorder: recorder.clone(),
        },
        ScriptedVerifier {
            script: script.clone(),
            recorder: recorder.clone(),
        },
    );
    let orch = Orchestrator::new(stages, Arc::new(BrokenSink), RunOptions::default());
    let run = orch.run(targets()).await.unwrap();
    assert_eq!(run.outcome, TerminalOutcome::Success);
    assert_eq!(run.context.healing_attempts(), 2);
}

#[tokio::test]
async fn test_report_carries_history_and_errors() {
    let obs = run_both(Script::new(1, vec![Check::Fail], 2)).await;
    let report = obs.run.report();
    assert_eq!(report.outcome, TerminalOutcome::Exhausted);
    assert_eq!(report.exit_code(), 3);
    assert_eq!(report.fix_history.len(), 2);
    assert_eq!(report.verification_errors.len(), 1);
    assert_eq!(report.artifact_count, 1);
    assert_eq!(report.encoding, Encoding::Relay);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"], "EXHAUSTED");
    assert_eq!(json["final_state"], "DONE_EXHAUSTED");
}
