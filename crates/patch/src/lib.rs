//! # forgehand-patch
//!
//! Fuzzy search-and-replace for source files.
//!
//! A fragment is located by a fixed cascade of [`Strategy`]s, from exact
//! substring match to increasingly lenient forms. The first strategy that
//! yields a candidate occurring exactly once wins; a candidate that occurs
//! several times escalates to the next strategy. Edit distance is only used
//! to explain failures, never to choose a match.
//!
//! ```
//! let out = forgehand_patch::replace("let x = 1;\n", "x = 1", "x = 2").unwrap();
//! assert_eq!(out.content, "let x = 2;\n");
//! ```

pub mod diff;
pub mod error;
pub mod indent;
pub mod replacers;
pub mod similarity;

pub use diff::{DiffStats, diff_stats, unified_diff};
pub use error::{NearMiss, PatchError};
pub use indent::validate_indentation;
pub use replacers::Strategy;
pub use similarity::{levenshtein, nearest_miss};

use tracing::debug;

/// A successful replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// The full new file text
    pub content: String,
    /// Which strategy located the fragment
    pub strategy: Strategy,
    /// How many occurrences were replaced
    pub occurrences: usize,
    /// The text actually matched in the original file
    pub matched: String,
    /// 1-based line where the first replaced region started
    pub line: usize,
}

/// Replace the unique occurrence of `old` with `new`.
pub fn replace(content: &str, old: &str, new: &str) -> Result<Replacement, PatchError> {
    apply(content, old, new, false)
}

/// Replace every occurrence of `old` with `new`.
pub fn replace_all(content: &str, old: &str, new: &str) -> Result<Replacement, PatchError> {
    apply(content, old, new, true)
}

fn line_of(content: &str, byte_offset: usize) -> usize {
    content[..byte_offset].matches('\n').count() + 1
}

/// Run the cascade.
///
/// With `replace_all` the first candidate that occurs at all is replaced
/// everywhere. Otherwise a candidate must occur exactly once.
pub fn apply(content: &str, old: &str, new: &str, replace_all: bool) -> Result<Replacement, PatchError> {
    if old == new {
        return Err(PatchError::Identical);
    }

    let mut found_any = false;
    let mut ambiguous: Option<(usize, Vec<usize>)> = None;

    for strategy in Strategy::CASCADE {
        for candidate in strategy.candidates(content, old) {
            let search = candidate.as_ref();
            if search.is_empty() {
                continue;
            }
            let Some(index) = content.find(search) else {
                continue;
            };
            found_any = true;

            if replace_all {
                let occurrences = content.matches(search).count();
                debug!(strategy = %strategy, occurrences, "Replacing all occurrences");
                return Ok(Replacement {
                    content: content.replace(search, new),
                    strategy,
                    occurrences,
                    matched: search.to_string(),
                    line: line_of(content, index),
                });
            }

            let last = content.rfind(search).unwrap_or(index);
            if index != last {
                let lines: Vec<usize> = content
                    .match_indices(search)
                    .map(|(offset, _)| line_of(content, offset))
                    .collect();
                debug!(strategy = %strategy, count = lines.len(), "Ambiguous candidate, escalating");
                ambiguous = Some((lines.len().max(2), lines));
                continue;
            }

            debug!(strategy = %strategy, line = line_of(content, index), "Fragment located");
            let mut out = String::with_capacity(content.len() - search.len() + new.len());
            out.push_str(&content[..index]);
            out.push_str(new);
            out.push_str(&content[index + search.len()..]);
            return Ok(Replacement {
                content: out,
                strategy,
                occurrences: 1,
                matched: search.to_string(),
                line: line_of(content, index),
            });
        }
    }

    match ambiguous {
        Some((count, lines)) if found_any => Err(PatchError::MultipleMatches { count, lines }),
        _ => Err(PatchError::not_found(content, nearest_miss(content, old))),
    }
}
