//! Stale-read suppression.
//!
//! Maps a file path to the history slot of its most recent full read. When
//! a newer read of the same file lands, the older tool message is rewritten
//! to a short placeholder, so only one full copy of each file stays in the
//! transcript.

use forgehand_core::message::Message;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Message metadata key marking a tool message as a full read of a path.
pub const READ_PATH_KEY: &str = "read_path";

#[derive(Debug, Default, Clone)]
pub struct ReadIndex {
    slots: HashMap<String, usize>,
    modified: HashSet<String>,
}

impl ReadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `messages[slot]` is now the latest full read of `path`,
    /// superseding the previous one. Returns the rewritten slot, if any.
    pub fn record_read(&mut self, messages: &mut [Message], path: &str, slot: usize) -> Option<usize> {
        if let Some(message) = messages.get_mut(slot) {
            message
                .metadata
                .insert(READ_PATH_KEY.into(), serde_json::Value::String(path.to_string()));
        }

        let modified = self.modified.remove(path);
        let previous = self.slots.insert(path.to_string(), slot)?;
        if previous == slot {
            return None;
        }
        let message = messages.get_mut(previous)?;
        let reason = if modified {
            "the file was modified and re-read"
        } else {
            "a later read"
        };
        message.content = format!("(superseded) Earlier read of {path} replaced by {reason}");
        message.metadata.remove(READ_PATH_KEY);
        debug!(path, slot = previous, "Superseded earlier read");
        Some(previous)
    }

    /// Note a successful write to `path`. The latest read stays intact.
    pub fn record_write(&mut self, path: &str) {
        if self.slots.contains_key(path) {
            self.modified.insert(path.to_string());
        }
    }

    pub fn slot(&self, path: &str) -> Option<usize> {
        self.slots.get(path).copied()
    }

    /// Rebuild from message metadata, after history has been rewritten.
    pub fn rebuild(&mut self, messages: &[Message]) {
        self.slots.clear();
        self.modified.clear();
        for (slot, message) in messages.iter().enumerate() {
            if let Some(path) = message.metadata.get(READ_PATH_KEY).and_then(|v| v.as_str()) {
                self.slots.insert(path.to_string(), slot);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(content: &str) -> Message {
        Message::tool_result("c", "read_file", content)
    }

    #[test]
    fn later_read_supersedes_earlier() {
        let mut index = ReadIndex::new();
        let mut messages = vec![Message::user("go"), read("v1")];
        assert_eq!(index.record_read(&mut messages, "a.rs", 1), None);

        messages.push(read("v1 again"));
        assert_eq!(index.record_read(&mut messages, "a.rs", 2), Some(1));
        assert_eq!(messages[1].content, "(superseded) Earlier read of a.rs replaced by a later read");
        assert!(!messages[1].metadata.contains_key(READ_PATH_KEY));
        assert_eq!(messages[2].content, "v1 again");
        assert_eq!(index.slot("a.rs"), Some(2));
    }

    #[test]
    fn write_between_reads_changes_reason() {
        let mut index = ReadIndex::new();
        let mut messages = vec![read("v1")];
        index.record_read(&mut messages, "a.rs", 0);
        index.record_write("a.rs");
        assert_eq!(messages[0].content, "v1");

        messages.push(read("v2"));
        index.record_read(&mut messages, "a.rs", 1);
        assert!(messages[0].content.ends_with("the file was modified and re-read"));
    }

    #[test]
    fn writes_to_unread_paths_are_ignored() {
        let mut index = ReadIndex::new();
        index.record_write("b.rs");
        let mut messages = vec![read("b")];
        index.record_read(&mut messages, "b.rs", 0);
        messages.push(read("b"));
        index.record_read(&mut messages, "b.rs", 1);
        assert!(messages[0].content.ends_with("a later read"));
    }

    #[test]
    fn rebuild_from_metadata() {
        let mut index = ReadIndex::new();
        let mut messages = vec![read("a"), read("b")];
        index.record_read(&mut messages, "a.rs", 0);
        index.record_read(&mut messages, "b.rs", 1);

        let shifted: Vec<Message> = std::iter::once(Message::assistant("summary"))
            .chain(messages)
            .collect();
        index.rebuild(&shifted);
        assert_eq!(index.slot("a.rs"), Some(1));
        assert_eq!(index.slot("b.rs"), Some(2));
        assert_eq!(index.len(), 2);
    }
}
