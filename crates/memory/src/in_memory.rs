//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use forgehand_core::error::MemoryError;
use forgehand_core::memory::{MemoryCard, MemoryStore};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps cards in a Vec.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    cards: Arc<RwLock<Vec<MemoryCard>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given cards.
    pub fn with_cards(cards: Vec<MemoryCard>) -> Self {
        Self {
            cards: Arc::new(RwLock::new(cards)),
        }
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cards.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<Vec<MemoryCard>, MemoryError> {
        Ok(self.cards.read().await.clone())
    }

    async fn save(&self, cards: &[MemoryCard]) -> Result<(), MemoryError> {
        *self.cards.write().await = cards.to_vec();
        Ok(())
    }
}
