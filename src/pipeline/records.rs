//! Records exchanged between the orchestrator and its stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::target::ArtifactId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Bug,
    Style,
    Performance,
    Security,
    #[default]
    Other,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Style => "style",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub artifact: ArtifactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Location {
    pub fn new(artifact: impl Into<ArtifactId>, line: Option<u32>) -> Self {
        Self {
            artifact: artifact.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.artifact, line),
            None => write!(f, "{}", self.artifact),
        }
    }
}

/// A candidate defect reported by the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub location: Location,
    #[serde(default)]
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl Issue {
    pub fn new(location: Location, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            location,
            kind: IssueKind::Other,
            severity,
            description: description.into(),
            suggested_fix: None,
        }
    }

    pub fn with_kind(mut self, kind: IssueKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.location, self.severity, self.description)
    }
}

/// Why a verification check failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Expected versus observed behaviour.
    pub description: String,
    /// Raw diagnostic text from the verification tool.
    #[serde(default)]
    pub diagnostic: String,
}

impl VerificationError {
    pub fn new(description: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            location: None,
            description: description.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Synthetic record standing in for a verifier that could not execute.
    pub fn execution_fault(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            "verification could not execute; expected a completed verification run",
            message,
        )
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{loc}: {}", self.description),
            None => f.write_str(&self.description),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Issues,
    Errors,
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Issues => "issues",
            Self::Errors => "errors",
        })
    }
}

/// What the corrector is asked to address: detector findings on the first cycle, the previous
/// cycle's verification errors afterwards. Never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum Feedback {
    Issues(Vec<Issue>),
    Errors(Vec<VerificationError>),
}

impl Feedback {
    pub fn kind(&self) -> FeedbackKind {
        match self {
            Self::Issues(_) => FeedbackKind::Issues,
            Self::Errors(_) => FeedbackKind::Errors,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Issues(items) => items.len(),
            Self::Errors(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One applied correction, appended per corrector invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    /// 1-based correction cycle.
    pub cycle: u32,
    pub feedback: FeedbackKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub touched: Vec<ArtifactId>,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::new("calc.py", Some(12)).to_string(), "calc.py:12");
        assert_eq!(Location::new("calc.py", None).to_string(), "calc.py");
    }

    #[test]
    fn test_feedback_is_tagged() {
        let fb = Feedback::Errors(vec![VerificationError::new("expected 3, got 4", "assert")]);
        assert_eq!(fb.kind(), FeedbackKind::Errors);
        assert_eq!(fb.len(), 1);
        let json = serde_json::to_value(&fb).unwrap();
        assert_eq!(json["kind"], "errors");
        assert_eq!(json["items"][0]["description"], "expected 3, got 4");
    }

    #[test]
    fn test_execution_fault_keeps_message_as_diagnostic() {
        let err = VerificationError::execution_fault("pytest: command not found");
        assert!(err.location.is_none());
        assert_eq!(err.diagnostic, "pytest: command not found");
        assert!(!err.description.is_empty());
    }

    #[test]
    fn test_issue_builder() {
        let issue = Issue::new(Location::new("a.py", Some(3)), Severity::Warning, "unused import")
            .with_kind(IssueKind::Style)
            .with_suggested_fix("remove it");
        assert_eq!(issue.kind, IssueKind::Style);
        assert_eq!(issue.suggested_fix.as_deref(), Some("remove it"));
    }
}
