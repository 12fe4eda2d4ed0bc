//! Spawning external tools for the command-backed stages.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::target::TargetSet;

/// Placeholder expanded to one argument per artifact.
pub const ARTIFACTS_PLACEHOLDER: &str = "{artifacts}";
/// Placeholder replaced with the target root.
pub const ROOT_PLACEHOLDER: &str = "{root}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Split a whitespace-separated command line, as given in an environment override.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let command = parts.next()?;
        Some(Self {
            command,
            args: parts.collect(),
        })
    }

    /// Arguments with placeholders expanded. Artifacts are passed root-relative; the command
    /// runs with the target root as its working directory.
    pub fn expand_args(&self, targets: &TargetSet) -> Vec<String> {
        let root = targets.root().to_string_lossy();
        let mut out = Vec::with_capacity(self.args.len() + targets.len());
        for arg in &self.args {
            if arg == ARTIFACTS_PLACEHOLDER {
                out.extend(targets.artifacts().iter().map(|a| a.as_str().to_string()));
            } else {
                out.push(arg.replace(ROOT_PLACEHOLDER, &root));
            }
        }
        out
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, for tools that split diagnostics across both.
    pub fn combined(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run `spec` in the target root, optionally feeding `input` on stdin.
///
/// The child is killed if the returned future is dropped, so an orchestrator timeout never
/// leaves a stray process behind.
pub async fn run(spec: &CommandSpec, targets: &TargetSet, input: Option<&str>) -> Result<CommandOutput> {
    let args = spec.expand_args(targets);
    tracing::debug!(command = %spec.command, args = ?args, "Spawning stage command");

    let mut child = Command::new(&spec.command)
        .args(&args)
        .current_dir(targets.root())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", spec.command))?;

    if let Some(text) = input
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin
            .write_all(text.as_bytes())
            .await
            .context("Failed to write to stdin")?;
        stdin.shutdown().await.context("Failed to close stdin")?;
    }

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("Failed to wait for '{}'", spec.command))?;

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    tracing::debug!(command = %spec.command, code = ?result.code, "Stage command finished");
    Ok(result)
}
