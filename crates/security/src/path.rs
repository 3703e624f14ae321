//! Path validation — filesystem sandboxing to the project root.
//!
//! Every path a tool receives goes through [`Workspace::resolve`], which
//! rejects traversal, keeps the result inside the root (unless explicitly
//! allowed otherwise), and refuses sensitive files.

use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::sensitive::SensitiveFiles;

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path must not be empty")]
    Empty,

    #[error("Path '{path}' is outside the project root")]
    OutsideRoot { path: String },

    #[error("Access denied: '{path}' matches sensitive pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal not allowed: '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// The project directory tools operate in.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    allow_outside_root: bool,
    sensitive: SensitiveFiles,
}

impl Workspace {
    /// Open a workspace. The root must exist; it is canonicalized so symlinked
    /// roots compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathValidationError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|e| PathValidationError::CanonicalizeFailed {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            root: canonical,
            allow_outside_root: false,
            sensitive: SensitiveFiles::default(),
        })
    }

    /// Permit absolute, `~` and `..` paths that leave the root.
    pub fn allow_outside_root(mut self, allow: bool) -> Self {
        self.allow_outside_root = allow;
        self
    }

    pub fn with_sensitive_files(mut self, sensitive: SensitiveFiles) -> Self {
        self.sensitive = sensitive;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied path to an absolute, canonical location.
    ///
    /// Checks, in order:
    /// 1. No `..` components (unless outside access is allowed)
    /// 2. Symlinks are resolved through the deepest existing ancestor
    /// 3. The result lies under the root (unless outside access is allowed)
    /// 4. The path does not match a sensitive pattern
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, PathValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathValidationError::Empty);
        }

        let expanded = if self.allow_outside_root {
            expand_tilde(trimmed)
        } else {
            trimmed.to_string()
        };
        let input = Path::new(&expanded);

        if !self.allow_outside_root && input.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PathValidationError::PathTraversal { path: raw.into() });
        }

        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.root.join(input)
        };
        let canonical = canonicalize_existing_prefix(&joined).map_err(|e| {
            PathValidationError::CanonicalizeFailed {
                path: raw.into(),
                reason: e.to_string(),
            }
        })?;

        let inside = canonical.starts_with(&self.root);
        if !inside && !self.allow_outside_root {
            debug!(path = %raw, "Rejected path outside project root");
            return Err(PathValidationError::OutsideRoot { path: raw.into() });
        }

        let relative = canonical.strip_prefix(&self.root).unwrap_or(&canonical);
        if let Some(pattern) = self.sensitive.matching_pattern(relative) {
            debug!(path = %raw, pattern, "Rejected sensitive path");
            return Err(PathValidationError::ForbiddenPath {
                path: raw.into(),
                pattern: pattern.to_string(),
            });
        }

        Ok(canonical)
    }

    /// Whether a root-relative path is on the sensitive list.
    pub fn is_sensitive(&self, relative: &Path) -> bool {
        self.sensitive.is_sensitive(relative)
    }

    /// A stable key for a tool-supplied path: `src/./a.rs` and `src/a.rs`
    /// share one. Unresolvable paths key as themselves.
    pub fn key(&self, raw: &str) -> String {
        match self.resolve(raw) {
            Ok(path) => self.display(&path),
            Err(_) => raw.trim().to_string(),
        }
    }

    /// A root-relative string for output and cache keys; absolute when the
    /// path lies outside the root.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Canonicalize the deepest ancestor that exists and re-append the rest,
/// so paths about to be created are still checked through symlinks.
fn canonicalize_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if existing.exists() {
            let mut out = existing.canonicalize()?;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return Ok(normalize_lexically(&out));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                existing = parent;
            }
            _ => return Ok(normalize_lexically(path)),
        }
    }
}

/// Fold `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
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

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}
