//! Persisted telemetry inspection: `mend telemetry`.

use anyhow::{Result, anyhow};
use console::style;
use std::path::Path;

use mend::config::{CONFIG_DIR, resolve_target};
use mend::telemetry::{TelemetryLog, TelemetryRun, TelemetrySummary, validate_events};

pub fn cmd_telemetry(target: &Path, run: Option<&Path>, validate: bool, verbose: bool) -> Result<u8> {
    let _log_guard = mend::logging::init(verbose, None);
    let root = resolve_target(target)?;
    let log = TelemetryLog::new(&root.join(CONFIG_DIR).join("telemetry"));

    let record = match run {
        Some(path) => log.load_run(path)?,
        None => match log.latest_run()? {
            Some(record) => record,
            None => log
                .load_current()?
                .ok_or_else(|| anyhow!("No telemetry runs found in {}", log.dir().display()))?,
        },
    };

    print_run(&record);
    if validate {
        print_quality(&record);
    }
    Ok(0)
}

fn print_run(record: &TelemetryRun) {
    let summary = TelemetrySummary::from_events(&record.events);

    println!();
    println!("{} {}", style("Run").bold(), record.run_id);
    println!("  Target:      {}", record.manifest.target.display());
    println!(
        "  Settings:    {} artifacts, max_iterations = {}, encoding = {}{}",
        record.manifest.artifact_count,
        record.manifest.max_iterations,
        record.manifest.encoding,
        if record.manifest.dry_run { ", dry run" } else { "" }
    );
    println!("  Started:     {}", record.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    match record.ended_at {
        Some(ended) => println!("  Ended:       {}", ended.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Ended:       {}", style("still running or interrupted").yellow()),
    }
    if let Some(report) = &record.report {
        println!(
            "  Outcome:     {} ({}), {} healing attempts",
            report.outcome, report.final_state, report.healing_attempts
        );
    }

    println!();
    println!(
        "{} {} events, {} succeeded, {} failed ({:.1}% success)",
        style("Events:").bold(),
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.success_rate()
    );
    if let (Some(first), Some(last)) = (summary.first_at, summary.last_at) {
        let span = (last - first).num_milliseconds() as f64 / 1000.0;
        println!("  Time range:  {span:.1}s");
    }

    println!();
    println!("{}", style("By action:").bold());
    for (action, count) in &summary.by_action {
        println!("  {:<14} {}", action.as_str(), count);
    }

    println!();
    println!("{}", style("By component:").bold());
    for (component, stats) in &summary.by_component {
        println!(
            "  {:<28} {:>4} total {:>4} ok {:>4} failed  {:>5.1}%",
            component,
            stats.total,
            stats.succeeded,
            stats.failed,
            stats.success_rate()
        );
    }
    println!();
}

fn print_quality(record: &TelemetryRun) {
    let quality = validate_events(&record.events);
    if quality.is_valid() && quality.warnings.is_empty() {
        println!("{} Telemetry is consistent.", style("✓").green());
        println!();
        return;
    }
    for issue in &quality.issues {
        println!("  {} {}", style("issue:").red().bold(), issue);
    }
    for warning in &quality.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    println!();
}
