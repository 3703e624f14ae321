//! Deterministic relevance ranking for memory cards.
//!
//! Score = 3 points per distinct query term that occurs in the card's
//! lower-cased `content + tags`. Cards scoring zero are dropped; ties go to the
//! newest card. No embeddings, no hidden state: the same store and query
//! always give the same answer.

use forgehand_core::error::MemoryError;
use forgehand_core::memory::{MemoryCard, MemoryStore};
use regex::Regex;
use std::sync::LazyLock;

const POINTS_PER_TERM: usize = 3;

static TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9_]+|[\x{4e00}-\x{9fff}]+").expect("static regex"));

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Query terms: ASCII word tokens, plus 2-4 char n-grams of CJK runs longer
/// than two characters. Falls back to whitespace splitting when the query has
/// no word characters at all.
pub fn extract_terms(query: &str) -> Vec<String> {
    let query = query.trim().to_lowercase();
    let mut terms: Vec<String> = Vec::new();

    for m in TERM.find_iter(&query) {
        let chars: Vec<char> = m.as_str().chars().collect();
        if chars.len() > 2 && chars.iter().all(|&c| is_cjk(c)) {
            for n in 2..=4 {
                if chars.len() < n {
                    continue;
                }
                for window in chars.windows(n) {
                    push_unique(&mut terms, window.iter().collect());
                }
            }
        } else {
            push_unique(&mut terms, m.as_str().to_string());
        }
    }

    if terms.is_empty() {
        for word in query.split_whitespace() {
            push_unique(&mut terms, word.to_string());
        }
    }
    terms
}

fn push_unique(terms: &mut Vec<String>, term: String) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

/// Relevance of one card against pre-extracted terms.
pub fn score(card: &MemoryCard, terms: &[String]) -> usize {
    let text = format!("{} {}", card.content, card.tags.join(" ")).to_lowercase();
    terms.iter().filter(|t| text.contains(t.as_str())).count() * POINTS_PER_TERM
}

/// The top `k` cards for `query` (at least one if anything matches).
pub fn rank(cards: Vec<MemoryCard>, query: &str, k: usize) -> Vec<MemoryCard> {
    let terms = extract_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, MemoryCard)> = cards
        .into_iter()
        .map(|card| (score(&card, &terms), card))
        .filter(|(s, _)| *s > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.created_at.cmp(&a.1.created_at)));
    scored.into_iter().take(k.max(1)).map(|(_, card)| card).collect()
}

/// Load a store and rank its cards.
pub async fn search(store: &dyn MemoryStore, query: &str, k: usize) -> Result<Vec<MemoryCard>, MemoryError> {
    Ok(rank(store.load().await?, query, k))
}
