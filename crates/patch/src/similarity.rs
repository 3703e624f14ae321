//! Edit distance. Used for block-anchor scoring and for near-miss
//! diagnostics, never to pick a fuzzy winner on its own.

use crate::error::NearMiss;

/// Below this score a near miss is not worth reporting.
const NEAR_MISS_FLOOR: f64 = 0.3;

/// How many anchor positions are expanded into full windows.
const NEAR_MISS_CANDIDATES: usize = 3;

/// Levenshtein distance over chars, two-row.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return a.len().max(b.len());
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / max_len`, with two empty strings counting as identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Locate the region of `content` that most resembles `find`.
///
/// The longest line of the fragment is used as an anchor: every file line is
/// scored against it, and the best few positions are expanded into windows
/// the size of the fragment and scored line by line.
pub fn nearest_miss(content: &str, find: &str) -> Option<NearMiss> {
    let mut find_lines: Vec<&str> = find.split('\n').map(str::trim).collect();
    if find_lines.last() == Some(&"") {
        find_lines.pop();
    }
    let (anchor_idx, anchor) = find_lines
        .iter()
        .enumerate()
        .max_by_key(|(_, line)| line.chars().count())
        .map(|(i, line)| (i, *line))?;
    if anchor.is_empty() {
        return None;
    }

    let content_lines: Vec<&str> = content.split('\n').collect();
    let mut anchors: Vec<(f64, usize)> = content_lines
        .iter()
        .enumerate()
        .map(|(i, line)| (similarity(line.trim(), anchor), i))
        .collect();
    anchors.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut best: Option<NearMiss> = None;
    for (_, line_idx) in anchors.into_iter().take(NEAR_MISS_CANDIDATES) {
        let start = line_idx.saturating_sub(anchor_idx);
        let end = (start + find_lines.len()).min(content_lines.len());
        let window = &content_lines[start..end];

        let total: f64 = find_lines
            .iter()
            .enumerate()
            .map(|(k, f)| window.get(k).map_or(0.0, |w| similarity(w.trim(), f)))
            .sum();
        let score = total / find_lines.len() as f64;

        if best.as_ref().is_none_or(|b| score > b.similarity) {
            best = Some(NearMiss {
                start_line: start + 1,
                end_line: end,
                similarity: score,
                text: window.join("\n"),
            });
        }
    }

    best.filter(|miss| miss.similarity >= NEAR_MISS_FLOOR)
}
