//! Detector backed by a linter that emits a JSON message array (pylint's JSON format).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::command::{self, CommandOutput, CommandSpec};
use crate::pipeline::{
    AnalysisRecord, Detection, Detector, Issue, IssueKind, Location, Severity,
};
use crate::target::TargetSet;

/// pylint sets bit 32 on usage errors and bit 1 on fatal messages.
const USAGE_ERROR_BIT: i32 = 32;

#[derive(Debug, Deserialize)]
struct LintMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    symbol: String,
}

pub struct CommandDetector {
    spec: CommandSpec,
}

impl CommandDetector {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn default_spec() -> CommandSpec {
        CommandSpec::new("pylint", &["--output-format=json", "{artifacts}"])
    }
}

#[async_trait]
impl Detector for CommandDetector {
    fn name(&self) -> &str {
        &self.spec.command
    }

    async fn detect(&self, targets: &TargetSet) -> Result<Detection> {
        let record = AnalysisRecord {
            analyzed: targets.artifacts().to_vec(),
            notes: vec![format!("command: {}", self.spec.display())],
        };
        if targets.is_empty() {
            return Ok(Detection {
                issues: Vec::new(),
                record,
            });
        }

        let output = command::run(&self.spec, targets, None).await?;
        check_exit(&self.spec.command, &output)?;

        let issues = parse_messages(&output.stdout, targets).with_context(|| {
            format!(
                "'{}' produced unreadable output (exit {:?}): {}",
                self.spec.command,
                output.code,
                output.stderr.trim()
            )
        })?;
        let mut detection = Detection { issues, record };
        detection
            .record
            .notes
            .push(format!("{} issues after dedup", detection.issues.len()));
        Ok(detection)
    }
}

/// Fail on usage errors and on crashes. A linter that ran reports its findings on stdout
/// even when it exits non-zero, so a failing exit with empty stdout means it never ran.
fn check_exit(command: &str, output: &CommandOutput) -> Result<()> {
    if output.code.is_some_and(|c| c & USAGE_ERROR_BIT != 0) {
        anyhow::bail!("'{command}' reported a usage error: {}", output.stderr.trim());
    }
    if !output.success() && output.stdout.trim().is_empty() {
        let status = match output.code {
            Some(code) => format!("exit {code}"),
            None => "a signal".to_string(),
        };
        anyhow::bail!(
            "'{command}' failed with {status} and no output: {}",
            output.stderr.trim()
        );
    }
    Ok(())
}

/// Parse linter JSON into deduplicated issues. Empty output means no findings.
pub fn parse_messages(stdout: &str, targets: &TargetSet) -> Result<Vec<Issue>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let messages: Vec<LintMessage> =
        serde_json::from_str(trimmed).context("Expected a JSON array of lint messages")?;

    let issues = messages
        .into_iter()
        .map(|m| {
            let artifact = targets
                .lookup(&m.path)
                .unwrap_or_else(|| m.path.as_str().into());
            let description = if m.symbol.is_empty() {
                m.message
            } else {
                format!("[{}] {}", m.symbol, m.message)
            };
            Issue::new(
                Location::new(artifact, m.line),
                severity_of(&m.kind),
                description,
            )
            .with_kind(kind_of(&m.kind))
        })
        .collect();
    Ok(dedup(issues))
}

fn severity_of(kind: &str) -> Severity {
    match kind.to_ascii_lowercase().as_str() {
        "fatal" | "error" => Severity::Critical,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn kind_of(kind: &str) -> IssueKind {
    match kind.to_ascii_lowercase().as_str() {
        "fatal" | "error" | "warning" => IssueKind::Bug,
        "refactor" => IssueKind::Performance,
        _ => IssueKind::Style,
    }
}

/// Keep one issue per (artifact, line, kind): the most severe, then one carrying a fix.
/// First-seen order is preserved.
fn dedup(issues: Vec<Issue>) -> Vec<Issue> {
    let mut order = Vec::new();
    let mut kept: HashMap<(Location, IssueKind), Issue> = HashMap::new();
    for issue in issues {
        let key = (issue.location.clone(), issue.kind);
        match kept.get(&key) {
            None => {
                order.push(key.clone());
                kept.insert(key, issue);
            }
            Some(existing) => {
                let better = issue.severity > existing.severity
                    || (issue.severity == existing.severity
                        && issue.suggested_fix.is_some()
                        && existing.suggested_fix.is_none());
                if better {
                    kept.insert(key, issue);
                }
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| kept.remove(&key))
        .collect()
}
