//! Layered configuration for mend.
//!
//! Settings are read from `mend.toml` (either `--config <path>` or `<target>/.mend/mend.toml`),
//! then overridden by `MEND_*` environment variables, then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! max_iterations = 10
//! encoding = "relay"        # or "graph"
//!
//! [timeouts]
//! detect_secs = 300
//! correct_secs = 900
//! verify_secs = 600
//!
//! [artifacts]
//! include = ["**/*.py"]
//! exclude = ["tests/fixtures/*"]
//!
//! [detector]
//! command = "pylint"
//! args = ["--output-format=json", "{artifacts}"]
//!
//! [corrector]
//! command = "claude"
//! args = ["--dangerously-skip-permissions", "--print"]
//!
//! [verifier]
//! command = "pytest"
//! args = ["--tb=short", "-q", "-rfE"]
//!
//! [telemetry]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::pipeline::{DEFAULT_MAX_ITERATIONS, Encoding, RunOptions, StageTimeouts};
use crate::stages::{CommandDetector, CommandCorrector, CommandSpec, CommandVerifier};

pub const CONFIG_DIR: &str = ".mend";
pub const CONFIG_FILE: &str = "mend.toml";

/// Iteration counts above this draw a warning.
const HIGH_ITERATION_WARNING: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub encoding: Encoding,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            encoding: Encoding::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_detect_secs")]
    pub detect_secs: u64,
    #[serde(default = "default_correct_secs")]
    pub correct_secs: u64,
    #[serde(default = "default_verify_secs")]
    pub verify_secs: u64,
}

fn default_detect_secs() -> u64 {
    300
}

fn default_correct_secs() -> u64 {
    900
}

fn default_verify_secs() -> u64 {
    600
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            detect_secs: default_detect_secs(),
            correct_secs: default_correct_secs(),
            verify_secs: default_verify_secs(),
        }
    }
}

impl TimeoutsSection {
    pub fn to_stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            detect: Duration::from_secs(self.detect_secs),
            correct: Duration::from_secs(self.correct_secs),
            verify: Duration::from_secs(self.verify_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_include() -> Vec<String> {
    vec!["**/*.py".to_string()]
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: Vec::new(),
        }
    }
}

impl ArtifactsSection {
    /// Reject any include/exclude entry that is not a valid glob.
    pub fn check_globs(&self) -> Result<(), ConfigError> {
        let lists = [
            ("artifacts.include", &self.include),
            ("artifacts.exclude", &self.exclude),
        ];
        for (key, patterns) in lists {
            for pattern in patterns {
                if let Err(e) = glob::Pattern::new(pattern) {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("invalid glob pattern '{pattern}': {e}"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Command override for one stage. Unset fields fall back to the stage's default command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl StageSection {
    pub fn to_spec(&self, default: CommandSpec) -> CommandSpec {
        match (&self.command, &self.args) {
            (None, None) => default,
            (Some(command), args) => CommandSpec {
                command: command.clone(),
                args: args.clone().unwrap_or_default(),
            },
            (None, Some(args)) => CommandSpec {
                command: default.command,
                args: args.clone(),
            },
        }
    }

    fn set_command_line(&mut self, line: &str) -> bool {
        match CommandSpec::parse(line) {
            Some(spec) => {
                self.command = Some(spec.command);
                self.args = Some(spec.args);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,
}

fn default_telemetry_enabled() -> bool {
    true
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
        }
    }
}

/// The complete mend.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MendToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub detector: StageSection,
    #[serde(default)]
    pub corrector: StageSection,
    #[serde(default)]
    pub verifier: StageSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl MendToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `<mend_dir>/mend.toml`, or defaults when it does not exist.
    pub fn load_or_default(mend_dir: &Path) -> Result<Self, ConfigError> {
        let path = mend_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let content = toml::to_string_pretty(self).context("Failed to serialize mend.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `MEND_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `MEND_*` overrides read through `lookup`.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("MEND_MAX_ITERATIONS") {
            self.pipeline.max_iterations =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "MEND_MAX_ITERATIONS".to_string(),
                        message: format!("'{raw}' is not a non-negative integer"),
                    })?;
        }
        if let Some(raw) = lookup("MEND_ENCODING") {
            self.pipeline.encoding =
                raw.parse().map_err(|message| ConfigError::InvalidValue {
                    key: "MEND_ENCODING".to_string(),
                    message,
                })?;
        }

        let stages = [
            ("MEND_DETECTOR_CMD", &mut self.detector),
            ("MEND_CORRECTOR_CMD", &mut self.corrector),
            ("MEND_VERIFIER_CMD", &mut self.verifier),
        ];
        for (key, section) in stages {
            if let Some(line) = lookup(key)
                && !section.set_command_line(&line)
            {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "command must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pipeline.max_iterations > HIGH_ITERATION_WARNING {
            warnings.push(format!(
                "max_iterations = {} is unusually high; each cycle invokes the corrector",
                self.pipeline.max_iterations
            ));
        }
        if self.artifacts.include.is_empty() {
            warnings.push("[artifacts] include is empty; no artifacts will be managed".to_string());
        }
        let timeouts = [
            ("detect_secs", self.timeouts.detect_secs),
            ("correct_secs", self.timeouts.correct_secs),
            ("verify_secs", self.timeouts.verify_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                warnings.push(format!("[timeouts] {name} = 0 makes every invocation time out"));
            }
        }

        warnings
    }
}

/// Flags given on the command line; `None` leaves the file/env value in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub encoding: Option<Encoding>,
    pub dry_run: bool,
    pub verbose: bool,
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct MendConfig {
    pub target_dir: PathBuf,
    pub mend_dir: PathBuf,
    /// The file the settings were read from, if any.
    pub config_file: Option<PathBuf>,
    pub toml: MendToml,
    pub dry_run: bool,
    pub verbose: bool,
}

impl MendConfig {
    /// Resolve the target directory and merge file → env → CLI settings.
    pub fn resolve(target: &Path, cli: CliOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with_env(target, cli, |key| std::env::var(key).ok())
    }

    pub fn resolve_with_env(
        target: &Path,
        cli: CliOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let target_dir = resolve_target(target)?;
        let mend_dir = target_dir.join(CONFIG_DIR);

        let (mut toml, config_file) = match cli.config_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::ConfigNotFound { path });
                }
                (MendToml::load(&path)?, Some(path))
            }
            None => {
                let default_path = mend_dir.join(CONFIG_FILE);
                let found = default_path.is_file().then_some(default_path);
                (MendToml::load_or_default(&mend_dir)?, found)
            }
        };
        toml.apply_env_from(lookup)?;

        if let Some(max) = cli.max_iterations {
            toml.pipeline.max_iterations = max;
        }
        if let Some(encoding) = cli.encoding {
            toml.pipeline.encoding = encoding;
        }
        toml.artifacts.check_globs()?;

        Ok(Self {
            target_dir,
            mend_dir,
            config_file,
            toml,
            dry_run: cli.dry_run,
            verbose: cli.verbose,
        })
    }

    pub fn max_iterations(&self) -> u32 {
        self.toml.pipeline.max_iterations
    }

    pub fn encoding(&self) -> Encoding {
        self.toml.pipeline.encoding
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_iterations: self.max_iterations(),
            dry_run: self.dry_run,
            encoding: self.encoding(),
            timeouts: self.toml.timeouts.to_stage_timeouts(),
        }
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.mend_dir.join("telemetry")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.mend_dir.join("logs")
    }

    pub fn detector_spec(&self) -> CommandSpec {
        self.toml.detector.to_spec(CommandDetector::default_spec())
    }

    pub fn corrector_spec(&self) -> CommandSpec {
        self.toml.corrector.to_spec(CommandCorrector::default_spec())
    }

    pub fn verifier_spec(&self) -> CommandSpec {
        self.toml.verifier.to_spec(CommandVerifier::default_spec())
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// Check the target exists and is a directory, and return its canonical path.
pub fn resolve_target(target: &Path) -> Result<PathBuf, ConfigError> {
    if !target.exists() {
        return Err(ConfigError::TargetNotFound {
            path: target.to_path_buf(),
        });
    }
    if !target.is_dir() {
        return Err(ConfigError::TargetNotDirectory {
            path: target.to_path_buf(),
        });
    }
    target.canonicalize().map_err(|source| ConfigError::Io {
        path: target.to_path_buf(),
        source,
    })
}
