//! Pipeline execution: `mend run <TARGET>`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mend::config::{CliOverrides, MendConfig};
use mend::pipeline::{Encoding, Orchestrator, RunReport};
use mend::stages::build_stages;
use mend::target::TargetSet;
use mend::telemetry::{FanoutSink, RunManifest, TelemetryLog, TracingSink};
use mend::ui::PipelineUI;

/// Flags of the `run` subcommand.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub target: PathBuf,
    pub max_iterations: Option<u32>,
    pub dry_run: bool,
    pub graph: bool,
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub verbose: bool,
}

pub async fn cmd_run(args: RunArgs) -> Result<u8> {
    let config = MendConfig::resolve(
        &args.target,
        CliOverrides {
            config_file: args.config.clone(),
            max_iterations: args.max_iterations,
            encoding: args.graph.then_some(Encoding::Graph),
            dry_run: args.dry_run,
            verbose: args.verbose,
        },
    )?;
    let _log_guard = mend::logging::init(config.verbose, Some(&config.log_dir()));
    for warning in config.validate() {
        tracing::warn!(%warning, "Configuration warning");
    }

    let targets = TargetSet::discover(
        &config.target_dir,
        &config.toml.artifacts.include,
        &config.toml.artifacts.exclude,
    )
    .context("Failed to discover artifacts")?;
    let options = config.run_options();

    let ui = Arc::new(PipelineUI::new(options.max_iterations, config.verbose));
    let mut sink = FanoutSink::new().with(ui.clone()).with(Arc::new(TracingSink));
    let telemetry = if config.toml.telemetry.enabled {
        let log = Arc::new(TelemetryLog::new(&config.telemetry_dir()));
        match log.start_run(RunManifest {
            target: config.target_dir.clone(),
            artifact_count: targets.len(),
            max_iterations: options.max_iterations,
            dry_run: options.dry_run,
            encoding: options.encoding,
        }) {
            Ok(run_id) => {
                tracing::debug!(%run_id, dir = %log.dir().display(), "Telemetry run started");
                sink = sink.with(log.clone());
                Some(log)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start telemetry log; continuing without it");
                None
            }
        }
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    ui.print_header(&config.target_dir, targets.len(), options.dry_run);
    let orchestrator = Orchestrator::new(build_stages(&config), Arc::new(sink), options)
        .with_cancellation(cancel);
    let completed = orchestrator.run(targets).await;
    interrupt.abort();

    let run = match completed {
        Ok(run) => run,
        Err(err) => {
            if let Some(log) = &telemetry
                && let Err(e) = log.finish_run(None)
            {
                tracing::warn!(error = %e, "Failed to persist telemetry");
            }
            return Err(anyhow::Error::new(err).context("Pipeline run failed"));
        }
    };

    let report = run.report();
    ui.finish(&report);
    if let Some(log) = &telemetry {
        match log.finish_run(Some(report.clone())) {
            Ok(path) => tracing::info!(path = %path.display(), "Telemetry saved"),
            Err(e) => tracing::warn!(error = %e, "Failed to persist telemetry"),
        }
    }
    if let Some(output) = &args.output {
        write_report(&report, output)?;
    }
    Ok(report.exit_code() as u8)
}

fn write_report(report: &RunReport, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report: {}", path.display()))?;
    Ok(())
}
