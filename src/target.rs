//! Target set discovery.
//!
//! A [`TargetSet`] is the ordered, fixed list of artifacts a run manages. Artifact ids are
//! root-relative and `/`-separated, so they read the same in reports on every platform.

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::sandbox::Sandbox;

/// Directories never descended into during discovery.
pub const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    ".venv",
    "venv",
    ".git",
    ".pytest_cache",
    ".mypy_cache",
    "node_modules",
    "build",
    "dist",
    ".mend",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSet {
    root: PathBuf,
    artifacts: Vec<ArtifactId>,
}

impl TargetSet {
    /// Build a target set from known ids. Ids are sorted and deduplicated.
    pub fn new(root: impl Into<PathBuf>, artifacts: Vec<ArtifactId>) -> Self {
        let mut artifacts = artifacts;
        artifacts.sort();
        artifacts.dedup();
        Self {
            root: root.into(),
            artifacts,
        }
    }

    /// Walk `root` and collect files matching any `include` glob and no `exclude` glob.
    ///
    /// Globs are matched against the root-relative id.
    pub fn discover(root: &Path, include: &[String], exclude: &[String]) -> Result<Self> {
        let sandbox = Sandbox::new(root)
            .with_context(|| format!("Failed to open target root {}", root.display()))?;
        let include = compile(include)?;
        let exclude = compile(exclude)?;

        let mut artifacts = Vec::new();
        let walker = WalkDir::new(sandbox.root())
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e));

        for entry in walker {
            let entry = entry.context("Failed to walk target directory")?;
            if !entry.file_type().is_file() {
                continue;
            }
            // Paths that fail sandbox resolution (e.g. escaping symlinks) are skipped.
            let Ok(id) = sandbox.relative(entry.path()) else {
                tracing::debug!(path = %entry.path().display(), "Skipping path outside sandbox");
                continue;
            };
            let matched = include.iter().any(|p| p.matches(&id));
            let skipped = exclude.iter().any(|p| p.matches(&id));
            if matched && !skipped {
                artifacts.push(ArtifactId::new(id));
            }
        }

        tracing::debug!(root = %sandbox.root().display(), count = artifacts.len(), "Discovered artifacts");
        Ok(Self::new(sandbox.root().to_path_buf(), artifacts))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts(&self) -> &[ArtifactId] {
        &self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.artifacts.binary_search(id).is_ok()
    }

    /// Absolute path for an artifact id.
    pub fn path_of(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Map a path reported by a tool back to an artifact id, if it names one in the set.
    pub fn lookup(&self, reported: &str) -> Option<ArtifactId> {
        let trimmed = reported.trim_start_matches("./").replace('\\', "/");
        let candidate = match Path::new(&trimmed).strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => trimmed,
        };
        let id = ArtifactId::new(candidate);
        self.contains(&id).then_some(id)
    }
}

fn compile(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|g| Pattern::new(g).with_context(|| format!("Invalid glob pattern '{g}'")))
        .collect()
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name) || name.ends_with(".egg-info"))
}
