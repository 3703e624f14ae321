//! Patch errors carry enough diagnostics for the model to retry.

use thiserror::Error;

const PREVIEW_CHARS: usize = 500;

/// The closest region of the file to a fragment that was not found.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMiss {
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    /// 0.0 ..= 1.0
    pub similarity: f64,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error(
        "old_string and new_string must be different\n\n\
         The text you want to replace is identical to the replacement. Check your edit."
    )]
    Identical,

    #[error("{}", render_not_found(.preview, .nearest.as_ref()))]
    NotFound {
        /// The first characters of the file
        preview: String,
        nearest: Option<NearMiss>,
    },

    #[error("{}", render_multiple(.count, .lines))]
    MultipleMatches {
        count: usize,
        /// 1-based line of each occurrence
        lines: Vec<usize>,
    },
}

impl PatchError {
    pub(crate) fn not_found(content: &str, nearest: Option<NearMiss>) -> Self {
        PatchError::NotFound {
            preview: content.chars().take(PREVIEW_CHARS).collect(),
            nearest,
        }
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PatchError::Identical => "same_content",
            PatchError::NotFound { .. } => "not_found",
            PatchError::MultipleMatches { .. } => "multiple_matches",
        }
    }
}

fn render_not_found(preview: &str, nearest: Option<&NearMiss>) -> String {
    let mut out = String::from(
        "SEARCH STRING NOT FOUND in file content.\n\
         The exact text you provided does not exist in the file.",
    );
    if let Some(miss) = nearest {
        out.push_str(&format!(
            "\n\nClosest match (lines {}-{}, {:.0}% similar):\n{}",
            miss.start_line,
            miss.end_line,
            miss.similarity * 100.0,
            miss.text
        ));
    }
    if !preview.is_empty() {
        out.push_str(&format!("\n\nFirst {PREVIEW_CHARS} chars of file:\n{preview}..."));
    }
    out.push_str(
        "\n\nSuggestions:\n\
         1. Use `read_file` to see the actual file content\n\
         2. Ensure whitespace and indentation match exactly\n\
         3. Copy the text directly from the file content",
    );
    out
}

fn render_multiple(count: &usize, lines: &[usize]) -> String {
    let mut out = format!(
        "MULTIPLE MATCHES FOUND: The search string appears {count} times in the file.\n\
         Cannot determine which occurrence to replace."
    );
    if !lines.is_empty() {
        let listed: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        out.push_str(&format!("\nMatches start at lines: {}", listed.join(", ")));
    }
    out.push_str(
        "\n\nSuggestions:\n\
         1. Add 3-5 surrounding lines to make the match unique\n\
         2. Include distinctive nearby code (comments, function names)\n\
         3. Use `replace_all=true` if you want to replace ALL occurrences",
    );
    out
}
