//! Memory cards — small facts and decisions that outlive a session.
//!
//! Cards are produced by the context summarizer and read back by the memory
//! injector. The store is an append-ordered log: it is loaded in full and
//! re-ranked in memory, and nothing is ever deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::MemoryError;

/// What a card records.
///
/// Serialized as its lowercase label. Labels we do not model are kept
/// verbatim in `Other` so they survive a load/save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryKind {
    Goal,
    Decision,
    Constraint,
    Todo,
    Code,
    #[default]
    Fact,
    Other(String),
}

impl MemoryKind {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryKind::Goal => "goal",
            MemoryKind::Decision => "decision",
            MemoryKind::Constraint => "constraint",
            MemoryKind::Todo => "todo",
            MemoryKind::Code => "code",
            MemoryKind::Fact => "fact",
            MemoryKind::Other(label) => label,
        }
    }
}

impl From<String> for MemoryKind {
    fn from(label: String) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "goal" => MemoryKind::Goal,
            "decision" => MemoryKind::Decision,
            "constraint" => MemoryKind::Constraint,
            "todo" => MemoryKind::Todo,
            "code" => MemoryKind::Code,
            "fact" | "" => MemoryKind::Fact,
            _ => MemoryKind::Other(label),
        }
    }
}

impl From<MemoryKind> for String {
    fn from(kind: MemoryKind) -> Self {
        match kind {
            MemoryKind::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

/// A single long-term memory card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCard {
    pub content: String,

    #[serde(rename = "type", default)]
    pub kind: MemoryKind,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Where the card came from (e.g. "context_summary")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MemoryCard {
    pub fn new(content: impl Into<String>, kind: MemoryKind) -> Self {
        Self {
            content: content.into(),
            kind,
            tags: Vec::new(),
            created_at: Utc::now(),
            source: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Persistent storage for memory cards.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Load every stored card, in append order.
    async fn load(&self) -> Result<Vec<MemoryCard>, MemoryError>;

    /// Replace the stored cards.
    async fn save(&self, cards: &[MemoryCard]) -> Result<(), MemoryError>;

    /// Append cards, skipping any whose trimmed content is already stored.
    /// Returns how many were added.
    async fn append(&self, new_cards: Vec<MemoryCard>) -> Result<usize, MemoryError> {
        if new_cards.is_empty() {
            return Ok(0);
        }
        let mut cards = self.load().await?;
        let mut seen: HashSet<String> = cards.iter().map(|c| c.content.trim().to_string()).collect();
        let mut added = 0;
        for card in new_cards {
            let key = card.content.trim().to_string();
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            cards.push(card);
            added += 1;
        }
        if added > 0 {
            self.save(&cards).await?;
        }
        Ok(added)
    }
}
