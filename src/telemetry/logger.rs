use super::{EventSink, TelemetryEvent};
use crate::pipeline::{Encoding, RunReport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Settings a run was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub target: PathBuf,
    pub artifact_count: usize,
    pub max_iterations: u32,
    pub dry_run: bool,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub manifest: RunManifest,
    pub events: Vec<TelemetryEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

impl TelemetryRun {
    pub fn new(manifest: RunManifest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            manifest,
            events: Vec::new(),
            report: None,
        }
    }

    pub fn finish(&mut self, report: Option<RunReport>) {
        self.ended_at = Some(Utc::now());
        self.report = report;
    }
}

/// Persists telemetry for one run at a time.
///
/// `current-run.json` is rewritten after every event so a crashed run still leaves a trace;
/// [`TelemetryLog::finish_run`] moves the record into `runs/<timestamp>_<id8>.json`.
pub struct TelemetryLog {
    dir: PathBuf,
    current_run: Mutex<Option<TelemetryRun>>,
    current_run_file: PathBuf,
}

impl TelemetryLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            current_run: Mutex::new(None),
            current_run_file: dir.join("current-run.json"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn start_run(&self, manifest: RunManifest) -> Result<Uuid> {
        fs::create_dir_all(self.dir.join("runs"))
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let run = TelemetryRun::new(manifest);
        let run_id = run.run_id;
        *self.lock()? = Some(run);
        self.save_current()?;
        Ok(run_id)
    }

    /// Append an event to the active run.
    ///
    /// Returns an error if no run is active, so events are never dropped silently.
    pub fn add_event(&self, event: TelemetryEvent) -> Result<()> {
        {
            let mut guard = self.lock()?;
            let run = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("add_event called with no active run"))?;
            run.events.push(event);
        }
        self.save_current()
    }

    pub fn finish_run(&self, report: Option<RunReport>) -> Result<PathBuf> {
        let mut guard = self.lock()?;
        let run = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;
        run.finish(report);

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let run_file = self.dir.join("runs").join(&filename);

        let json = serde_json::to_string_pretty(&run).context("Failed to serialize telemetry run")?;
        fs::write(&run_file, json).context("Failed to write telemetry run file")?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }

        *guard = None;
        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<()> {
        let guard = self.lock()?;
        if let Some(run) = guard.as_ref() {
            let json =
                serde_json::to_string_pretty(run).context("Failed to serialize current run")?;
            fs::write(&self.current_run_file, json).context("Failed to write current run file")?;
        }
        Ok(())
    }

    /// Load an unfinished run left behind by an earlier process.
    pub fn load_current(&self) -> Result<Option<TelemetryRun>> {
        if !self.current_run_file.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.current_run_file)
            .context("Failed to read current run file")?;
        let run: TelemetryRun =
            serde_json::from_str(&content).context("Failed to parse current run file")?;
        Ok(Some(run))
    }

    pub fn current_run(&self) -> Option<TelemetryRun> {
        self.current_run.lock().ok().and_then(|guard| guard.clone())
    }

    /// Finished runs, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)
            .with_context(|| format!("Failed to read {}", runs_dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();

        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn latest_run(&self) -> Result<Option<TelemetryRun>> {
        match self.list_runs()?.first() {
            Some(path) => self.load_run(path).map(Some),
            None => Ok(None),
        }
    }

    pub fn load_run(&self, path: &Path) -> Result<TelemetryRun> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read telemetry run {}", path.display()))?;
        let run: TelemetryRun =
            serde_json::from_str(&content).context("Failed to parse telemetry run file")?;
        Ok(run)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<TelemetryRun>>> {
        self.current_run
            .lock()
            .map_err(|_| anyhow::anyhow!("telemetry log lock poisoned"))
    }
}

impl EventSink for TelemetryLog {
    fn record(&self, event: &TelemetryEvent) -> Result<()> {
        self.add_event(event.clone())
    }
}
