//! `forgehand memory` — inspect the project's memory cards.

use anyhow::Context;
use forgehand_core::memory::{MemoryCard, MemoryStore};
use forgehand_memory::JsonFileStore;
use std::path::Path;

pub async fn run(root: &Path, query: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let store = JsonFileStore::for_project(root);
    let cards = match query {
        Some(query) => forgehand_memory::search(&store, query, limit).await,
        None => store.load().await,
    }
    .with_context(|| format!("Failed to read {}", store.path().display()))?;

    if cards.is_empty() {
        match query {
            Some(query) => println!("No memories match \"{query}\"."),
            None => println!("No memories stored in {}.", store.path().display()),
        }
        return Ok(());
    }
    for (i, card) in cards.iter().enumerate() {
        println!("{}", format_card(i + 1, card));
    }
    Ok(())
}

fn format_card(n: usize, card: &MemoryCard) -> String {
    let mut line = format!(
        "{n:>3}. [{}] {} ({})",
        card.kind.as_str(),
        card.content,
        card.created_at.format("%Y-%m-%d")
    );
    if !card.tags.is_empty() {
        line.push_str(&format!("\n     tags: {}", card.tags.join(", ")));
    }
    line
}
