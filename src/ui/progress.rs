use crate::pipeline::{PipelineState, RunReport, TerminalOutcome};
use crate::telemetry::{ActionKind, EventSink, TelemetryEvent};
use crate::ui::icons::{CHECK, CLOCK, CROSS, FOLDER, HOURGLASS, RETRY, SEARCH, SPARKLE, STOP, TEST, WRENCH};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Items listed per section in the final summary before eliding the rest.
const SUMMARY_LIST_LIMIT: usize = 10;
const MAX_WRAP_WIDTH: usize = 100;

/// Terminal UI for a pipeline run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Cycle bar: healing attempts spent against the iteration budget
/// - Stage bar: spinner showing the state the run is in
///
/// The UI is driven entirely by telemetry, so it is installed as one more [`EventSink`]
/// next to the telemetry log.
pub struct PipelineUI {
    multi: MultiProgress,
    cycle_bar: ProgressBar,
    stage_bar: ProgressBar,
    verbose: bool,
    max_iterations: u32,
    attempts: AtomicU32,
    state: Mutex<PipelineState>,
}

impl PipelineUI {
    pub fn new(max_iterations: u32, verbose: bool) -> Self {
        Self::with_draw_target(max_iterations, verbose, ProgressDrawTarget::stderr())
    }

    /// A UI without progress bars; lines still go to stderr.
    pub fn hidden(max_iterations: u32) -> Self {
        Self::with_draw_target(max_iterations, false, ProgressDrawTarget::hidden())
    }

    fn with_draw_target(max_iterations: u32, verbose: bool, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let cycle_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let cycle_bar = multi.add(ProgressBar::new(u64::from(max_iterations)));
        cycle_bar.set_style(cycle_style);
        cycle_bar.set_prefix("Cycles");

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix(" Stage");

        Self {
            multi,
            cycle_bar,
            stage_bar,
            verbose,
            max_iterations,
            attempts: AtomicU32::new(0),
            state: Mutex::new(PipelineState::Init),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` when bars are not drawn
    /// (non-terminal stderr) or the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// The last state reported by a transition event.
    pub fn current_state(&self) -> PipelineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PipelineState::Init)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn print_header(&self, target: &Path, artifacts: usize, dry_run: bool) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
        self.print_line(format!(
            "{} {} {}",
            style("▶").green().bold(),
            FOLDER,
            style(target.display()).yellow().bold()
        ));
        self.print_line(format!(
            "{}  {} artifacts, {} healing cycles max{}",
            style("Scope:").dim(),
            artifacts,
            self.max_iterations,
            if dry_run { ", dry run" } else { "" }
        ));
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
        self.stage_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    fn on_transition(&self, event: &TelemetryEvent) {
        let Some(to) = field::<PipelineState>(&event.output, "to") else {
            return;
        };
        let attempts = event.output["healing_attempts"].as_u64().unwrap_or(0) as u32;
        self.attempts.store(attempts, Ordering::SeqCst);
        if let Ok(mut state) = self.state.lock() {
            *state = to;
        }
        self.cycle_bar.set_position(u64::from(attempts));

        if self.verbose
            && let (Some(from), Some(via)) = (
                field::<PipelineState>(&event.input, "from"),
                event.input["event"].as_str(),
            )
        {
            self.print_line(format!(
                "    {} {} {} {}",
                style("→").dim(),
                style(from).dim(),
                style(format!("--{via}-->")).dim(),
                style(to).dim()
            ));
        }

        let cycle = attempts + 1;
        match to {
            PipelineState::Detecting => self.stage_bar.set_message(format!("{SEARCH}detecting issues")),
            PipelineState::Correcting => self.stage_bar.set_message(format!(
                "{WRENCH}correcting {}",
                style(format!("(cycle {cycle}/{})", self.max_iterations)).dim()
            )),
            PipelineState::Verifying => self.stage_bar.set_message(format!(
                "{TEST}verifying {}",
                style(format!("(cycle {cycle}/{})", self.max_iterations)).dim()
            )),
            PipelineState::VerificationFailed => {
                self.stage_bar.set_message(format!("{RETRY}deciding on retry"));
            }
            state if state.is_terminal() => {
                self.stage_bar
                    .finish_with_message(format!("{} {}", outcome_icon(state.outcome()), state));
                self.cycle_bar.finish();
            }
            _ => {}
        }
    }

    fn on_stage(&self, event: &TelemetryEvent) {
        if let Some(error) = event.output.get("error").and_then(Value::as_str) {
            self.print_line(format!("  {}{}: {}", CROSS, event.component, style(error).red()));
            return;
        }
        match event.action {
            ActionKind::Analysis if event.success => {
                let count = event.output["issues"].as_array().map_or(0, Vec::len);
                self.print_line(format!(
                    "  {}Detection found {} issue{}",
                    SEARCH,
                    style(count).cyan().bold(),
                    if count == 1 { "" } else { "s" }
                ));
            }
            ActionKind::Generation if event.success => {
                let summary = event.output["summary"].as_str().unwrap_or("");
                self.print_line(format!("  {}Correction applied: {}", WRENCH, style(summary).yellow()));
            }
            ActionKind::Verification => {
                if event.success {
                    self.print_line(format!("  {}Verification passed", CHECK));
                } else {
                    let errors = event.output["errors"].as_array().map_or(0, Vec::len);
                    self.print_line(format!(
                        "  {}Verification failed with {} error{}",
                        CROSS,
                        style(errors).red().bold(),
                        if errors == 1 { "" } else { "s" }
                    ));
                }
            }
            ActionKind::Fault => {
                let reason = event.output["reason"].as_str().unwrap_or("unknown fault");
                self.print_line(format!("  {}{}", STOP, style(reason).red()));
            }
            _ => {}
        }
    }

    /// Stop the bars and print the run summary.
    pub fn finish(&self, report: &RunReport) {
        self.stage_bar.finish_and_clear();
        self.cycle_bar.finish_and_clear();
        let width = console::Term::stderr()
            .size_checked()
            .map_or(MAX_WRAP_WIDTH, |(_, cols)| usize::from(cols).min(MAX_WRAP_WIDTH));
        for line in render_summary(report, width).lines() {
            self.print_line(line);
        }
    }
}

impl EventSink for PipelineUI {
    fn record(&self, event: &TelemetryEvent) -> anyhow::Result<()> {
        match event.action {
            ActionKind::Transition => self.on_transition(event),
            _ => self.on_stage(event),
        }
        Ok(())
    }
}

fn field<T: serde::de::DeserializeOwned>(value: &Value, key: &str) -> Option<T> {
    serde_json::from_value(value.get(key)?.clone()).ok()
}

fn outcome_icon(outcome: Option<TerminalOutcome>) -> console::Emoji<'static, 'static> {
    match outcome {
        Some(TerminalOutcome::Success) => SPARKLE,
        Some(TerminalOutcome::Exhausted) => HOURGLASS,
        Some(TerminalOutcome::Aborted) => STOP,
        _ => CROSS,
    }
}

/// Render the end-of-run summary, wrapping long descriptions to `width` columns.
pub fn render_summary(report: &RunReport, width: usize) -> String {
    let mut out = String::new();
    let headline = match report.outcome {
        TerminalOutcome::Success => style(report.outcome.as_str()).green().bold(),
        TerminalOutcome::Exhausted => style(report.outcome.as_str()).yellow().bold(),
        _ => style(report.outcome.as_str()).red().bold(),
    };
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}{} {}",
        outcome_icon(Some(report.outcome)),
        headline,
        style(format!("({})", report.final_state)).dim()
    );
    let _ = writeln!(
        out,
        "  {} {} ({} artifacts)",
        style("Target:  ").dim(),
        report.target_root.display(),
        report.artifact_count
    );
    let _ = writeln!(
        out,
        "  {} {} detected",
        style("Issues:  ").dim(),
        report.detected_issues.len()
    );
    let _ = writeln!(
        out,
        "  {} {}/{}",
        style("Cycles:  ").dim(),
        report.healing_attempts,
        report.max_iterations
    );
    let _ = writeln!(
        out,
        "  {} {}{:.1}s",
        style("Duration:").dim(),
        CLOCK,
        report.duration_secs()
    );
    if report.dry_run {
        let _ = writeln!(out, "  {} dry run, no corrections applied", style("Mode:    ").dim());
    }
    if let Some(reason) = &report.halt_reason {
        let _ = writeln!(out, "  {} {}", style("Halted:  ").dim(), style(reason).red());
    }

    let wrap = |text: &str| {
        let options = textwrap::Options::new(width.max(20))
            .initial_indent("    - ")
            .subsequent_indent("      ");
        textwrap::fill(text, options)
    };

    if !report.detected_issues.is_empty() {
        let _ = writeln!(out, "\n  {}", style("Detected issues").underlined());
        for issue in report.detected_issues.iter().take(SUMMARY_LIST_LIMIT) {
            let _ = writeln!(out, "{}", wrap(&issue.to_string()));
        }
        elided(&mut out, report.detected_issues.len());
    }

    if !report.fix_history.is_empty() {
        let _ = writeln!(out, "\n  {}", style("Fix history").underlined());
        for fix in &report.fix_history {
            let line = format!("cycle {} ({}): {}", fix.cycle, fix.feedback, fix.summary);
            let _ = writeln!(out, "{}", wrap(&line));
        }
    }

    if !report.verification_errors.is_empty() {
        let _ = writeln!(out, "\n  {}", style("Outstanding verification errors").underlined());
        for error in report.verification_errors.iter().take(SUMMARY_LIST_LIMIT) {
            let _ = writeln!(out, "{}", wrap(&error.to_string()));
        }
        elided(&mut out, report.verification_errors.len());
    }
    out
}

fn elided(out: &mut String, total: usize) {
    if total > SUMMARY_LIST_LIMIT {
        let _ = writeln!(out, "      ... and {} more", total - SUMMARY_LIST_LIMIT);
    }
}
