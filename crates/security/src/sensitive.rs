//! Files the agent must not touch even inside the workspace.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::warn;

/// Default deny-list, matched against the path relative to the workspace root.
pub const DEFAULT_PATTERNS: &[&str] = &[
    "**/.env",
    "**/.env.*",
    "**/*.pem",
    "**/*.key",
    "**/id_rsa*",
    "**/.git/**",
];

/// A compiled set of sensitive-file globs.
#[derive(Debug, Clone)]
pub struct SensitiveFiles {
    patterns: Vec<String>,
    set: GlobSet,
}

impl SensitiveFiles {
    /// Compile the given patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self, globset::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        }
        Ok(Self {
            patterns,
            set: builder.build()?,
        })
    }

    /// Nothing is sensitive.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// The first pattern matching `relative`, if any.
    pub fn matching_pattern(&self, relative: &Path) -> Option<&str> {
        self.set
            .matches(relative)
            .first()
            .map(|&idx| self.patterns[idx].as_str())
    }

    pub fn is_sensitive(&self, relative: &Path) -> bool {
        self.set.is_match(relative)
    }
}

impl Default for SensitiveFiles {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS.iter().copied()).unwrap_or_else(|e| {
            warn!(error = %e, "Default sensitive-file patterns failed to compile");
            Self::none()
        })
    }
}
