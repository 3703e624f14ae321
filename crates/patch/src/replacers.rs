//! The matching cascade.
//!
//! Each [`Strategy`] turns a requested fragment into zero or more concrete
//! candidate strings that literally occur in the file. The engine then checks
//! each candidate for uniqueness; a candidate found more than once escalates to
//! the next strategy.

use std::borrow::Cow;

use regex::Regex;

use crate::similarity::levenshtein;

const SINGLE_CANDIDATE_THRESHOLD: f64 = 0.0;
const MULTIPLE_CANDIDATES_THRESHOLD: f64 = 0.3;
const CONTEXT_MATCH_RATIO: f64 = 0.5;

/// One matching strategy, in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Exact,
    LineTrimmed,
    BlockAnchor,
    WhitespaceNormalized,
    IndentationFlexible,
    EscapeNormalized,
    TrimmedBoundary,
    ContextAware,
    MultiOccurrence,
}

impl Strategy {
    /// The fixed cascade. Exact always runs first.
    pub const CASCADE: [Strategy; 9] = [
        Strategy::Exact,
        Strategy::LineTrimmed,
        Strategy::BlockAnchor,
        Strategy::WhitespaceNormalized,
        Strategy::IndentationFlexible,
        Strategy::EscapeNormalized,
        Strategy::TrimmedBoundary,
        Strategy::ContextAware,
        Strategy::MultiOccurrence,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Exact => "exact",
            Strategy::LineTrimmed => "line_trimmed",
            Strategy::BlockAnchor => "block_anchor",
            Strategy::WhitespaceNormalized => "whitespace_normalized",
            Strategy::IndentationFlexible => "indentation_flexible",
            Strategy::EscapeNormalized => "escape_normalized",
            Strategy::TrimmedBoundary => "trimmed_boundary",
            Strategy::ContextAware => "context_aware",
            Strategy::MultiOccurrence => "multi_occurrence",
        }
    }

    /// Candidate strings for `find`, in the order they should be tried.
    pub fn candidates<'a>(&self, content: &'a str, find: &str) -> Vec<Cow<'a, str>> {
        let lines = Lines::new(content);
        match self {
            Strategy::Exact => exact(content, find),
            Strategy::LineTrimmed => line_trimmed(&lines, find),
            Strategy::BlockAnchor => block_anchor(&lines, find),
            Strategy::WhitespaceNormalized => whitespace_normalized(&lines, find),
            Strategy::IndentationFlexible => indentation_flexible(&lines, find),
            Strategy::EscapeNormalized => escape_normalized(content, &lines, find),
            Strategy::TrimmedBoundary => trimmed_boundary(content, &lines, find),
            Strategy::ContextAware => context_aware(&lines, find),
            Strategy::MultiOccurrence => multi_occurrence(content, find),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The file split on `\n`, with byte offsets so blocks can be borrowed.
struct Lines<'a> {
    content: &'a str,
    lines: Vec<&'a str>,
    starts: Vec<usize>,
}

impl<'a> Lines<'a> {
    fn new(content: &'a str) -> Self {
        let lines: Vec<&str> = content.split('\n').collect();
        let mut starts = Vec::with_capacity(lines.len());
        let mut offset = 0;
        for line in &lines {
            starts.push(offset);
            offset += line.len() + 1;
        }
        Self { content, lines, starts }
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    /// Lines `first..=last` joined by their original newlines.
    fn block(&self, first: usize, last: usize) -> &'a str {
        let start = self.starts[first];
        let end = self.starts[last] + self.lines[last].len();
        &self.content[start..end]
    }

    /// Every window of `size` consecutive lines, as `(first, block)`.
    fn windows(&self, size: usize) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        let count = if size == 0 || size > self.len() { 0 } else { self.len() - size + 1 };
        (0..count).map(move |i| (i, self.block(i, i + size - 1)))
    }
}

/// Split a fragment into lines, dropping one trailing empty line.
fn search_lines(find: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = find.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

fn exact<'a>(content: &'a str, find: &str) -> Vec<Cow<'a, str>> {
    match content.find(find) {
        Some(idx) => vec![Cow::Borrowed(&content[idx..idx + find.len()])],
        None => Vec::new(),
    }
}

fn line_trimmed<'a>(lines: &Lines<'a>, find: &str) -> Vec<Cow<'a, str>> {
    let search = search_lines(find);
    lines
        .windows(search.len())
        .filter(|(i, _)| {
            search
                .iter()
                .enumerate()
                .all(|(k, s)| lines.lines[i + k].trim() == s.trim())
        })
        .map(|(_, block)| Cow::Borrowed(block))
        .collect()
}

/// Mean similarity of the interior lines of a candidate block.
fn interior_similarity(lines: &Lines<'_>, search: &[&str], first: usize, last: usize, averaged: bool) -> f64 {
    let search_size = search.len() as isize;
    let actual_size = (last - first + 1) as isize;
    let lines_to_check = (search_size - 2).min(actual_size - 2);
    if lines_to_check <= 0 {
        return 1.0;
    }

    let upper = (search_size - 1).min(actual_size - 1) as usize;
    let mut similarity = 0.0;
    for j in 1..upper {
        let original = lines.lines[first + j].trim();
        let wanted = search[j].trim();
        let max_len = original.chars().count().max(wanted.chars().count());
        if max_len == 0 {
            continue;
        }
        let score = 1.0 - levenshtein(original, wanted) as f64 / max_len as f64;
        if averaged {
            similarity += score;
        } else {
            similarity += score / lines_to_check as f64;
        }
    }
    if averaged {
        similarity /= lines_to_check as f64;
    }
    similarity
}

fn block_anchor<'a>(lines: &Lines<'a>, find: &str) -> Vec<Cow<'a, str>> {
    if find.split('\n').count() < 3 {
        return Vec::new();
    }
    let search = search_lines(find);
    let first_search = search[0].trim();
    let last_search = search[search.len() - 1].trim();

    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for i in 0..lines.len() {
        if lines.lines[i].trim() != first_search {
            continue;
        }
        if let Some(j) = (i + 2..lines.len()).find(|&j| lines.lines[j].trim() == last_search) {
            candidates.push((i, j));
        }
    }

    match candidates.as_slice() {
        [] => Vec::new(),
        [(first, last)] => {
            let score = interior_similarity(lines, &search, *first, *last, false);
            if score >= SINGLE_CANDIDATE_THRESHOLD {
                vec![Cow::Borrowed(lines.block(*first, *last))]
            } else {
                Vec::new()
            }
        }
        many => {
            let mut best: Option<(usize, usize)> = None;
            let mut best_score = -1.0;
            for &(first, last) in many {
                let score = interior_similarity(lines, &search, first, last, true);
                if score > best_score {
                    best_score = score;
                    best = Some((first, last));
                }
            }
            match best {
                Some((first, last)) if best_score >= MULTIPLE_CANDIDATES_THRESHOLD => {
                    vec![Cow::Borrowed(lines.block(first, last))]
                }
                _ => Vec::new(),
            }
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn whitespace_normalized<'a>(lines: &Lines<'a>, find: &str) -> Vec<Cow<'a, str>> {
    let normalized_find = normalize_whitespace(find);
    let mut out = Vec::new();

    let words: Vec<String> = find.split_whitespace().map(regex::escape).collect();
    let pattern = if words.is_empty() {
        None
    } else {
        Regex::new(&words.join(r"\s+")).ok()
    };

    for &line in &lines.lines {
        let normalized_line = normalize_whitespace(line);
        if normalized_line == normalized_find {
            out.push(Cow::Borrowed(line));
        } else if normalized_line.contains(&normalized_find)
            && let Some(re) = &pattern
            && let Some(m) = re.find(line)
        {
            out.push(Cow::Borrowed(m.as_str()));
        }
    }

    let find_len = find.split('\n').count();
    if find_len > 1 {
        for (_, block) in lines.windows(find_len) {
            if normalize_whitespace(block) == normalized_find {
                out.push(Cow::Borrowed(block));
            }
        }
    }
    out
}

fn leading_whitespace(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Remove the smallest indentation shared by the non-blank lines.
fn remove_indentation(text: &str) -> String {
    let min_indent = text
        .split('\n')
        .filter(|l| !l.trim().is_empty())
        .map(leading_whitespace)
        .min();
    let Some(min_indent) = min_indent else {
        return text.to_string();
    };
    text.split('\n')
        .map(|l| {
            if l.trim().is_empty() {
                l.to_string()
            } else {
                l.chars().skip(min_indent).collect()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn indentation_flexible<'a>(lines: &Lines<'a>, find: &str) -> Vec<Cow<'a, str>> {
    let normalized_find = remove_indentation(find);
    lines
        .windows(find.split('\n').count())
        .filter(|(_, block)| remove_indentation(block) == normalized_find)
        .map(|(_, block)| Cow::Borrowed(block))
        .collect()
}

/// Undo the escaping models tend to apply to code they quote.
fn unescape(text: &str) -> String {
    const SEQUENCES: [(&str, &str); 8] = [
        ("\\n", "\n"),
        ("\\t", "\t"),
        ("\\r", "\r"),
        ("\\'", "'"),
        ("\\\"", "\""),
        ("\\`", "`"),
        ("\\\\", "\\"),
        ("\\$", "$"),
    ];
    SEQUENCES
        .iter()
        .fold(text.to_string(), |acc, (escaped, plain)| acc.replace(escaped, plain))
}

fn escape_normalized<'a>(content: &'a str, lines: &Lines<'a>, find: &str) -> Vec<Cow<'a, str>> {
    let unescaped_find = unescape(find);
    let mut out = Vec::new();
    if let Some(idx) = content.find(&unescaped_find) {
        out.push(Cow::Borrowed(&content[idx..idx + unescaped_find.len()]));
    }
    for (_, block) in lines.windows(unescaped_find.split('\n').count()) {
        if unescape(block) == unescaped_find {
            out.push(Cow::Borrowed(block));
        }
    }
    out
}

fn trimmed_boundary<'a>(content: &'a str, lines: &Lines<'a>, find: &str) -> Vec<Cow<'a, str>> {
    let trimmed = find.trim();
    if trimmed == find {
        return Vec::new();
    }
    let mut out = Vec::new();
    if let Some(idx) = content.find(trimmed) {
        out.push(Cow::Borrowed(&content[idx..idx + trimmed.len()]));
    }
    for (_, block) in lines.windows(find.split('\n').count()) {
        if block.trim() == trimmed {
            out.push(Cow::Borrowed(block));
        }
    }
    out
}

fn context_aware<'a>(lines: &Lines<'a>, find: &str) -> Vec<Cow<'a, str>> {
    if find.split('\n').count() < 3 {
        return Vec::new();
    }
    let search = search_lines(find);
    let first_line = search[0].trim();
    let last_line = search[search.len() - 1].trim();
    let mut out = Vec::new();

    for i in 0..lines.len() {
        if lines.lines[i].trim() != first_line {
            continue;
        }
        // Only the nearest closing anchor is considered.
        let Some(j) = (i + 2..lines.len()).find(|&j| lines.lines[j].trim() == last_line) else {
            continue;
        };
        if j - i + 1 != search.len() {
            continue;
        }

        let mut matching = 0usize;
        let mut non_empty = 0usize;
        for k in 1..search.len() - 1 {
            let block_line = lines.lines[i + k].trim();
            let find_line = search[k].trim();
            if !block_line.is_empty() || !find_line.is_empty() {
                non_empty += 1;
                if block_line == find_line {
                    matching += 1;
                }
            }
        }
        if non_empty == 0 || matching as f64 / non_empty as f64 >= CONTEXT_MATCH_RATIO {
            out.push(Cow::Borrowed(lines.block(i, j)));
        }
    }
    out
}

fn multi_occurrence<'a>(content: &'a str, find: &str) -> Vec<Cow<'a, str>> {
    if find.is_empty() {
        return Vec::new();
    }
    content
        .match_indices(find)
        .map(|(_, m)| Cow::Borrowed(m))
        .collect()
}
