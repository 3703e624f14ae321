//! Unified diffs for display and audit.

use similar::{ChangeTag, TextDiff};

const CONTEXT_LINES: usize = 3;

/// Added and removed line counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
}

/// A `git diff`-style unified diff with `a/` and `b/` headers.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

pub fn diff_stats(old: &str, new: &str) -> DiffStats {
    let diff = TextDiff::from_lines(old, new);
    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.additions += 1,
            ChangeTag::Delete => stats.deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_has_headers_and_hunks() {
        let diff = unified_diff("src/lib.rs", "a\nb\nc\n", "a\nB\nc\n");
        assert!(diff.starts_with("--- a/src/lib.rs\n+++ b/src/lib.rs\n"));
        assert!(diff.contains("@@"));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+B\n"));
    }

    #[test]
    fn identical_input_is_empty() {
        assert_eq!(unified_diff("x", "same\n", "same\n"), "");
    }

    #[test]
    fn stats_count_lines() {
        let stats = diff_stats("one\ntwo\n", "one\n2\nthree\n");
        assert_eq!(stats, DiffStats { additions: 2, deletions: 1 });
    }
}
