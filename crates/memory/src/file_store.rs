//! File-based memory store — one pretty-printed JSON array per project.
//!
//! Storage location: `<project>/.forgehand/memory.json`
//!
//! The file is human-inspectable and safe to edit by hand. Loading is
//! forgiving: a missing file is empty, a corrupt file is empty with a warning,
//! and the legacy `{"items": [...]}` wrapper is accepted.

use async_trait::async_trait;
use forgehand_core::error::MemoryError;
use forgehand_core::memory::{MemoryCard, MemoryStore};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Directory under the project root that holds forgehand state.
pub const STATE_DIR: &str = ".forgehand";

const FILE_NAME: &str = "memory.json";

#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    List(Vec<MemoryCard>),
    Wrapped { items: Vec<MemoryCard> },
}

/// A JSON-file memory store.
///
/// Every operation reads or writes the whole file; a process-local lock
/// serializes read-modify-write cycles.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// The deterministic store for a project root.
    pub fn for_project(root: &Path) -> Self {
        Self::new(Self::project_path(root))
    }

    pub fn project_path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_cards(&self) -> Vec<MemoryCard> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(_) => return Vec::new(), // File doesn't exist yet — start empty
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<OnDisk>(&content) {
            Ok(OnDisk::List(cards)) | Ok(OnDisk::Wrapped { items: cards }) => cards,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt memory file");
                Vec::new()
            }
        }
    }

    async fn write_cards(&self, cards: &[MemoryCard]) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }
        let json = serde_json::to_string_pretty(cards)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize memory cards: {e}")))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        debug!(path = %self.path.display(), count = cards.len(), "Memory file written");
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn load(&self) -> Result<Vec<MemoryCard>, MemoryError> {
        Ok(self.read_cards().await)
    }

    async fn save(&self, cards: &[MemoryCard]) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock().await;
        self.write_cards(cards).await
    }

    async fn append(&self, new_cards: Vec<MemoryCard>) -> Result<usize, MemoryError> {
        if new_cards.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut cards = self.read_cards().await;
        let mut seen: HashSet<String> = cards.iter().map(|c| c.content.trim().to_string()).collect();
        let before = cards.len();
        for card in new_cards {
            let key = card.content.trim().to_string();
            if !key.is_empty() && seen.insert(key) {
                cards.push(card);
            }
        }
        let added = cards.len() - before;
        if added > 0 {
            self.write_cards(&cards).await?;
        }
        Ok(added)
    }
}
