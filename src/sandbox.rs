//! Path confinement for the target root.
//!
//! Every artifact path the pipeline hands to a collaborator passes through [`Sandbox::resolve`],
//! which rejects home expansion, absolute paths elsewhere, `..` escapes, and symlinks pointing
//! outside the root.

use crate::errors::SandboxError;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`, which must exist.
    pub fn new(root: &Path) -> Result<Self, SandboxError> {
        let root = root.canonicalize().map_err(|source| SandboxError::Resolve {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative to the root, or absolute) to an absolute path inside the root.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, SandboxError> {
        if path.to_string_lossy().starts_with('~') {
            return Err(SandboxError::HomeExpansion {
                path: path.to_path_buf(),
            });
        }

        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = normalize(&joined);
        let resolved = resolve_existing_prefix(&normalized)?;

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(SandboxError::OutsideSandbox {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })
        }
    }

    pub fn is_safe(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }

    /// Root-relative, `/`-separated form of a path already inside the sandbox.
    pub fn relative(&self, path: &Path) -> Result<String, SandboxError> {
        let resolved = self.resolve(path)?;
        let rel = resolved
            .strip_prefix(&self.root)
            .map_err(|_| SandboxError::OutsideSandbox {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }
}

/// Lexically fold `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix so symlinks are followed, then re-append the rest.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf, SandboxError> {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                rest.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|source| SandboxError::Resolve {
            path: path.to_path_buf(),
            source,
        })?;
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
