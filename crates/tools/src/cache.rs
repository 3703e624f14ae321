//! Tool call deduplication cache.
//!
//! Keyed by tool name plus canonical arguments. Entries remember the paths
//! they depend on so a successful write can evict exactly what it made stale.

use forgehand_core::tool::ToolResult;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Prepended to the tool message content of a cache hit.
pub const CACHE_HIT_PREFIX: &str = "(cache hit) ";

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 64,
            ttl: Duration::from_secs(300),
        }
    }
}

/// `(tool name, canonical JSON of the arguments)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tool: String,
    arguments: String,
}

impl CacheKey {
    pub fn new(tool: &str, arguments: &serde_json::Value) -> Self {
        Self {
            tool: tool.to_string(),
            arguments: canonical_json(arguments),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

/// Object keys sorted at every depth, no insignificant whitespace.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                serde_json::Value::Object(out)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

struct Entry {
    result: ToolResult,
    paths: Vec<String>,
    inserted: Instant,
}

/// Bounded, time-limited store of successful read-only results.
pub struct ToolCache {
    config: CacheConfig,
    entries: HashMap<CacheKey, Entry>,
    order: VecDeque<CacheKey>,
}

impl ToolCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// A cached result, if one exists and is inside the recency window.
    pub fn get(&mut self, key: &CacheKey) -> Option<ToolResult> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted.elapsed() >= self.config.ttl,
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.result.clone())
    }

    /// Store a result. `paths` are the files it was derived from; an empty
    /// list means it depends on the tree as a whole.
    pub fn insert(&mut self, key: CacheKey, result: ToolResult, paths: Vec<String>) {
        if self.config.max_entries == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            Entry {
                result,
                paths,
                inserted: Instant::now(),
            },
        );
        while self.order.len() > self.config.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Evict everything a write to `path` may have made stale.
    pub fn invalidate_path(&mut self, path: &str) {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.paths.is_empty() || e.paths.iter().any(|p| p == path))
            .map(|(k, _)| k.clone())
            .collect();
        if !stale.is_empty() {
            debug!(path, evicted = stale.len(), "Invalidated cached tool results");
        }
        for key in stale {
            self.remove(&key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
