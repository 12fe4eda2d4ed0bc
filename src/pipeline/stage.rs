//! The three stage capabilities the orchestrator sequences.
//!
//! Stages borrow the target set for the duration of one call and return owned results, so no
//! stage can keep a handle on run state after it returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::records::{Feedback, Issue, VerificationError};
use crate::target::{ArtifactId, TargetSet};
use crate::telemetry::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Detector,
    Corrector,
    Verifier,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detector => "detector",
            Self::Corrector => "corrector",
            Self::Verifier => "verifier",
        }
    }

    pub fn action(&self) -> ActionKind {
        match self {
            Self::Detector => ActionKind::Analysis,
            Self::Corrector => ActionKind::Generation,
            Self::Verifier => ActionKind::Verification,
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the detector looked at, for observability only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub analyzed: Vec<ArtifactId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub issues: Vec<Issue>,
    pub record: AnalysisRecord,
}

#[derive(Debug, Clone, Default)]
pub struct Correction {
    pub summary: String,
    pub touched: Vec<ArtifactId>,
}

impl Correction {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            touched: Vec::new(),
        }
    }
}

/// Verification outcome. `errors` is empty exactly when `passed` is true.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub errors: Vec<VerificationError>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    pub fn fail(errors: Vec<VerificationError>) -> Self {
        Self {
            passed: false,
            errors,
        }
    }

    /// Restore the pass/errors pairing for verifiers that report inconsistently.
    pub fn normalized(mut self) -> Self {
        if self.passed {
            self.errors.clear();
        } else if self.errors.is_empty() {
            self.errors.push(VerificationError::new(
                "verification failed without diagnostics",
                "",
            ));
        }
        self
    }
}

/// Finds candidate defects. An `Err` is fatal to the run.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, targets: &TargetSet) -> anyhow::Result<Detection>;
}

/// Rewrites artifacts in place to address the given feedback. An `Err` is fatal to the run.
#[async_trait]
pub trait Corrector: Send + Sync {
    fn name(&self) -> &str;

    async fn correct(&self, targets: &TargetSet, feedback: &Feedback)
    -> anyhow::Result<Correction>;
}

/// Checks the (possibly corrected) artifacts.
///
/// An `Err` means verification could not execute; the orchestrator folds it into a failed
/// verdict that counts against the retry budget.
#[async_trait]
pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(&self, targets: &TargetSet) -> anyhow::Result<Verdict>;
}

/// The three stages a run is built from.
pub struct Stages {
    pub detector: Box<dyn Detector>,
    pub corrector: Box<dyn Corrector>,
    pub verifier: Box<dyn Verifier>,
}

impl Stages {
    pub fn new(
        detector: impl Detector + 'static,
        corrector: impl Corrector + 'static,
        verifier: impl Verifier + 'static,
    ) -> Self {
        Self {
            detector: Box::new(detector),
            corrector: Box::new(corrector),
            verifier: Box::new(verifier),
        }
    }

    pub fn name_of(&self, role: StageRole) -> &str {
        match role {
            StageRole::Detector => self.detector.name(),
            StageRole::Corrector => self.corrector.name(),
            StageRole::Verifier => self.verifier.name(),
        }
    }
}
