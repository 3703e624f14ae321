//! Indentation sanity checks for a replacement.
//!
//! These never block an edit; they are appended to the tool output so the
//! model can notice a broken indent before it compiles.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndentChar {
    Tab,
    Space,
}

impl IndentChar {
    fn describe(self) -> &'static str {
        match self {
            IndentChar::Tab => "tabs",
            IndentChar::Space => "spaces",
        }
    }
}

/// The indent character of the first indented, non-blank line.
fn indent_style(text: &str) -> Option<IndentChar> {
    text.split('\n')
        .filter(|line| line.is_empty() || !line.trim().is_empty())
        .find_map(|line| {
            if line.starts_with('\t') {
                Some(IndentChar::Tab)
            } else if line.starts_with(' ') {
                Some(IndentChar::Space)
            } else {
                None
            }
        })
}

fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Compare the replaced region with its replacement and describe any
/// indentation problems.
pub fn validate_indentation(original: &str, replacement: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let has_tabs = replacement.contains('\t');
    let has_spaces = replacement
        .split('\n')
        .any(|line| line.starts_with(' ') && !line.trim().is_empty());
    if has_tabs && has_spaces {
        warnings.push(
            "WARNING: new_string contains mixed tabs and spaces. \
             This may cause indentation errors."
                .to_string(),
        );
    }

    if let Some(old_style) = indent_style(original)
        && let Some(new_style) = indent_style(replacement)
        && old_style != new_style
    {
        warnings.push(format!(
            "WARNING: Indentation style mismatch. File uses {}, but new_string uses {}.",
            old_style.describe(),
            new_style.describe()
        ));
    }

    if let (Some(old_first), Some(new_first)) = (original.split('\n').next(), replacement.split('\n').next()) {
        let old_indent = indent_width(old_first);
        if old_indent > 0 && indent_width(new_first) == 0 && !new_first.trim().is_empty() {
            warnings.push(format!(
                "WARNING: First line of new_string has no indentation, \
                 but original has {old_indent} characters of indent. \
                 Make sure the indentation is correct."
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistent_replacement_has_no_warnings() {
        assert!(validate_indentation("    a();\n    b();", "    c();\n    d();").is_empty());
    }

    #[test]
    fn mixed_tabs_and_spaces() {
        let warnings = validate_indentation("a", "\tx\n  y");
        assert!(warnings.iter().any(|w| w.contains("mixed tabs and spaces")));
    }

    #[test]
    fn style_mismatch() {
        let warnings = validate_indentation("\tfoo();", "    foo();");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("File uses tabs, but new_string uses spaces"));
    }

    #[test]
    fn lost_first_line_indent() {
        let warnings = validate_indentation("        return x;", "return y;");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("original has 8 characters of indent"));
    }
}
