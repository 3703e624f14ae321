//! Read-before-write tracking.
//!
//! `write_file` (overwrite) and `edit` refuse to touch a file the agent has not
//! read recently, so the model never clobbers content it has not seen.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// How long a read keeps a file writable.
pub const READ_EXPIRATION: Duration = Duration::from_secs(300);

/// Shared between the read, write and edit tools of one registry.
#[derive(Debug)]
pub struct ReadTracker {
    expiration: Duration,
    reads: Mutex<HashMap<PathBuf, Instant>>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::with_expiration(READ_EXPIRATION)
    }

    pub fn with_expiration(expiration: Duration) -> Self {
        Self {
            expiration,
            reads: Mutex::new(HashMap::new()),
        }
    }

    pub fn mark_read(&self, path: &Path) {
        if let Ok(mut reads) = self.reads.lock() {
            reads.insert(path.to_path_buf(), Instant::now());
        }
    }

    pub fn was_read_recently(&self, path: &Path) -> bool {
        self.reads
            .lock()
            .ok()
            .and_then(|reads| reads.get(path).copied())
            .is_some_and(|at| at.elapsed() < self.expiration)
    }

    pub fn forget(&self, path: &Path) {
        if let Ok(mut reads) = self.reads.lock() {
            reads.remove(path);
        }
    }
}

impl Default for ReadTracker {
    fn default() -> Self {
        Self::new()
    }
}
