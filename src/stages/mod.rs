//! Command-backed stage implementations.
//!
//! Each stage wraps an external tool: a linter for detection, a generative CLI for correction
//! and a test runner for verification. Commands come from `mend.toml` or `MEND_*_CMD`.

pub mod analyzer;
pub mod command;
pub mod fixer;
pub mod judge;

pub use analyzer::CommandDetector;
pub use command::{CommandOutput, CommandSpec};
pub use fixer::CommandCorrector;
pub use judge::CommandVerifier;

use crate::config::MendConfig;
use crate::pipeline::Stages;

/// Build the three stages from resolved configuration.
pub fn build_stages(config: &MendConfig) -> Stages {
    Stages::new(
        CommandDetector::new(config.detector_spec()),
        CommandCorrector::new(config.corrector_spec()),
        CommandVerifier::new(config.verifier_spec()),
    )
}
