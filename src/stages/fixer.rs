//! Corrector backed by a generative CLI that edits files in the target root.
//!
//! The feedback is rendered into a plain-text request and written to the tool's stdin.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::command::{self, CommandSpec};
use crate::pipeline::{Correction, Corrector, Feedback, Issue, VerificationError};
use crate::target::{ArtifactId, TargetSet};

const SUMMARY_LIMIT: usize = 200;

pub struct CommandCorrector {
    spec: CommandSpec,
}

impl CommandCorrector {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn default_spec() -> CommandSpec {
        CommandSpec::new("claude", &["--dangerously-skip-permissions", "--print"])
    }
}

#[async_trait]
impl Corrector for CommandCorrector {
    fn name(&self) -> &str {
        &self.spec.command
    }

    async fn correct(&self, targets: &TargetSet, feedback: &Feedback) -> Result<Correction> {
        let request = render_request(targets, feedback);
        let output = command::run(&self.spec, targets, Some(&request)).await?;
        if !output.success() {
            anyhow::bail!(
                "'{}' exited with {:?}: {}",
                self.spec.command,
                output.code,
                output.stderr.trim()
            );
        }

        Ok(Correction {
            summary: summarize(&output.stdout),
            touched: touched_artifacts(feedback),
        })
    }
}

/// Render the request sent to the corrector.
pub fn render_request(targets: &TargetSet, feedback: &Feedback) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Edit the files under {} in place. Only touch these files:",
        targets.root().display()
    );
    for artifact in targets.artifacts() {
        let _ = writeln!(out, "- {artifact}");
    }
    out.push('\n');

    match feedback {
        Feedback::Issues(issues) => {
            let _ = writeln!(out, "Fix the following issues found by static analysis:");
            for (artifact, group) in group_issues(issues) {
                let _ = writeln!(out, "\n## {artifact}");
                for issue in group {
                    let line = issue
                        .location
                        .line
                        .map(|l| format!("line {l}"))
                        .unwrap_or_else(|| "file".to_string());
                    let _ = writeln!(
                        out,
                        "- [{}/{}] {}: {}",
                        issue.severity,
                        issue.kind.as_str(),
                        line,
                        issue.description
                    );
                    if let Some(fix) = &issue.suggested_fix {
                        let _ = writeln!(out, "  suggested: {fix}");
                    }
                }
            }
        }
        Feedback::Errors(errors) => {
            let _ = writeln!(
                out,
                "The previous fix did not pass verification. Address these failures:"
            );
            for error in errors {
                write_error(&mut out, error);
            }
        }
    }

    out.push_str("\nReply with a one-line summary of the change first.\n");
    out
}

fn write_error(out: &mut String, error: &VerificationError) {
    let _ = writeln!(out, "\n- {error}");
    let diagnostic = error.diagnostic.trim();
    if !diagnostic.is_empty() {
        for line in diagnostic.lines() {
            let _ = writeln!(out, "    {line}");
        }
    }
}

fn group_issues(issues: &[Issue]) -> BTreeMap<&ArtifactId, Vec<&Issue>> {
    let mut groups: BTreeMap<&ArtifactId, Vec<&Issue>> = BTreeMap::new();
    for issue in issues {
        groups.entry(&issue.location.artifact).or_default().push(issue);
    }
    groups
}

fn touched_artifacts(feedback: &Feedback) -> Vec<ArtifactId> {
    let mut touched: Vec<ArtifactId> = match feedback {
        Feedback::Issues(issues) => issues.iter().map(|i| i.location.artifact.clone()).collect(),
        Feedback::Errors(errors) => errors
            .iter()
            .filter_map(|e| e.location.as_ref().map(|l| l.artifact.clone()))
            .collect(),
    };
    touched.sort();
    touched.dedup();
    touched
}

/// First non-empty output line, truncated.
fn summarize(stdout: &str) -> String {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("correction applied (no summary)");
    if line.chars().count() > SUMMARY_LIMIT {
        let cut: String = line.chars().take(SUMMARY_LIMIT).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
