//! Verifier backed by a test runner with pytest-style output.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use super::command::{self, CommandSpec};
use crate::pipeline::{Location, Verdict, VerificationError, Verifier};
use crate::target::{ArtifactId, TargetSet};

/// pytest exit code when no tests were collected.
const NO_TESTS_COLLECTED: i32 = 5;
const DIAGNOSTIC_TAIL_LINES: usize = 40;

static PASSED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+passed").unwrap());
static FAILED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").unwrap());
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+errors?\b").unwrap());
static SKIPPED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+skipped").unwrap());
static RESULT_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w./\\-]+\.py)::(\S+)\s+(PASSED|FAILED|ERROR|SKIPPED)").unwrap()
});
static SUMMARY_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(FAILED|ERROR)\s+([\w./\\-]+\.py)(?:::(\S+))?(?:\s+-\s+(.*))?$").unwrap()
});
static SECTION_HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^_{3,} (.+?) _{3,}\s*$").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl TestCounts {
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.errors + self.skipped
    }
}

impl fmt::Display for TestCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} errors, {} skipped",
            self.passed, self.failed, self.errors, self.skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub file: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct TestReport {
    pub counts: TestCounts,
    pub results: Vec<TestResult>,
    pub failures: Vec<VerificationError>,
    pub no_tests: bool,
}

pub struct CommandVerifier {
    spec: CommandSpec,
}

impl CommandVerifier {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn default_spec() -> CommandSpec {
        CommandSpec::new("pytest", &["--tb=short", "-q", "-rfE"])
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    fn name(&self) -> &str {
        &self.spec.command
    }

    async fn verify(&self, targets: &TargetSet) -> Result<Verdict> {
        let output = command::run(&self.spec, targets, None).await?;
        let text = output.combined();
        let report = parse_output(&text, targets);
        tracing::debug!(
            passed = report.counts.passed,
            failed = report.counts.failed,
            errors = report.counts.errors,
            skipped = report.counts.skipped,
            no_tests = report.no_tests,
            "Parsed test output"
        );

        let clean = report.counts.failed == 0 && report.counts.errors == 0;
        let passed = (output.code == Some(0) && clean)
            || (report.no_tests && matches!(output.code, Some(0) | Some(NO_TESTS_COLLECTED)));
        if passed {
            return Ok(Verdict::pass());
        }

        let mut errors = report.failures;
        if errors.is_empty() {
            errors.push(VerificationError::new(
                format!(
                    "'{}' exited with {:?}; expected a clean test run ({})",
                    self.spec.command, output.code, report.counts
                ),
                tail(&text, DIAGNOSTIC_TAIL_LINES),
            ));
        }
        Ok(Verdict::fail(errors))
    }
}

/// Parse pytest output into counts, per-test results and failure records.
pub fn parse_output(output: &str, targets: &TargetSet) -> TestReport {
    let count = |re: &Regex| {
        re.captures_iter(output)
            .last()
            .and_then(|c| c[1].parse::<u32>().ok())
            .unwrap_or(0)
    };
    let counts = TestCounts {
        passed: count(&PASSED_REGEX),
        failed: count(&FAILED_REGEX),
        errors: count(&ERROR_REGEX),
        skipped: count(&SKIPPED_REGEX),
    };

    let results: Vec<TestResult> = RESULT_LINE_REGEX
        .captures_iter(output)
        .map(|c| TestResult {
            file: c[1].to_string(),
            name: c[2].to_string(),
            status: c[3].to_ascii_lowercase(),
        })
        .collect();

    let sections = failure_sections(output);
    let mut failures: Vec<VerificationError> = SUMMARY_LINE_REGEX
        .captures_iter(output)
        .map(|c| {
            let file = &c[2];
            let test = c.get(3).map(|m| m.as_str());
            let message = c.get(4).map(|m| m.as_str().trim()).unwrap_or("");
            let artifact = targets
                .lookup(file)
                .unwrap_or_else(|| ArtifactId::new(file));

            let description = match (test, message.is_empty()) {
                (Some(test), false) => format!("{test}: {message}"),
                (Some(test), true) => format!("{test} {}", c[1].to_ascii_lowercase()),
                (None, false) => message.to_string(),
                (None, true) => format!("{file} could not be collected"),
            };
            let diagnostic = test
                .and_then(|t| section_for(&sections, t))
                .unwrap_or(message)
                .to_string();
            VerificationError::new(description, diagnostic).at(Location::new(artifact, None))
        })
        .collect();

    // Without a short summary (no `-rfE`), fall back to the per-test result lines.
    if failures.is_empty() {
        failures = results
            .iter()
            .filter(|r| r.status == "failed" || r.status == "error")
            .map(|r| {
                let artifact = targets
                    .lookup(&r.file)
                    .unwrap_or_else(|| ArtifactId::new(r.file.as_str()));
                let diagnostic = section_for(&sections, &r.name).unwrap_or("").to_string();
                VerificationError::new(format!("{} {}", r.name, r.status), diagnostic)
                    .at(Location::new(artifact, None))
            })
            .collect();
    }

    let lower = output.to_lowercase();
    let no_tests = lower.contains("no tests ran") || lower.contains("collected 0 items");

    TestReport {
        counts,
        results,
        failures,
        no_tests,
    }
}

/// Map each `____ header ____` to the text that follows it.
fn failure_sections(output: &str) -> HashMap<String, &str> {
    let headers: Vec<_> = SECTION_HEADER_REGEX.captures_iter(output).collect();
    let mut sections = HashMap::new();
    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(title)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(output.len());
        sections.insert(title.as_str().trim().to_string(), output[whole.end()..end].trim());
    }
    sections
}

/// Find the failure block for a node id like `test_calc.py::TestCalc::test_add[1-2]`.
fn section_for<'a>(sections: &HashMap<String, &'a str>, node: &str) -> Option<&'a str> {
    let dotted = node.replace("::", ".");
    let short = node.rsplit("::").next().unwrap_or(node);
    sections
        .get(&dotted)
        .or_else(|| sections.get(short))
        .copied()
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
