//! Edit tool — search-and-replace through the fuzzy patch engine.
//!
//! The model supplies `old_string` / `new_string`; the patch engine locates
//! the fragment (exactly or through a more lenient strategy), and the tool
//! writes the result and reports a unified diff.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{FileAccess, RiskLevel, Tool, ToolResult};
use forgehand_patch::{diff_stats, unified_diff, validate_indentation};
use forgehand_security::Workspace;
use std::sync::Arc;
use tracing::{debug, info};

use crate::read_tracker::ReadTracker;
use crate::{optional_bool, permission_denied, required_str};

pub struct EditTool {
    workspace: Workspace,
    tracker: Arc<ReadTracker>,
    require_read_first: bool,
}

impl EditTool {
    pub fn new(workspace: Workspace, tracker: Arc<ReadTracker>) -> Self {
        Self {
            workspace,
            tracker,
            require_read_first: true,
        }
    }

    pub fn require_read_first(mut self, require: bool) -> Self {
        self.require_read_first = require;
        self
    }
}

/// Replacing the whole of a multi-line file is a rewrite, not an edit.
fn is_whole_file_rewrite(content: &str, old_string: &str) -> bool {
    let whole = old_string == content || old_string.trim() == content.trim();
    whole && content.trim().lines().count() > 1
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Performs exact string replacements in files.\n\n\
         Usage:\n\
         - You must use `read_file` on the file first. Editing an unread file fails.\n\
         - Preserve the exact indentation (tabs/spaces) as it appears in the file.\n\
         - The edit FAILS if `old_string` is not found, or is found more than once. \
         Add surrounding lines to make it unique, or set `replace_all`.\n\
         - Use `replace_all` to rename a symbol across the file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The file to modify, relative to the project root"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact text to replace (must match, including whitespace)"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement text (must differ from old_string)"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences of old_string (default: false)"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn file_access(&self, arguments: &serde_json::Value) -> Option<FileAccess> {
        let path = arguments.get("file_path")?.as_str()?;
        Some(FileAccess::Write {
            path: self.workspace.key(path),
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let file_path = required_str(&arguments, "file_path")?;
        let old_string = required_str(&arguments, "old_string")?;
        let new_string = required_str(&arguments, "new_string")?;
        let replace_all = optional_bool(&arguments, "replace_all")?.unwrap_or(false);

        if old_string == new_string {
            return Ok(ToolResult::failure("old_string and new_string must be different"));
        }
        if old_string.trim().is_empty() {
            return Ok(ToolResult::failure(
                "old_string cannot be empty. Provide the exact text to replace \
                 (with context) or use a more targeted snippet.",
            ));
        }

        let resolved = self
            .workspace
            .resolve(file_path)
            .map_err(|e| permission_denied(self.name(), e))?;

        match tokio::fs::metadata(&resolved).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => return Ok(ToolResult::failure(format!("Not a file: {file_path}"))),
            Err(_) => return Ok(ToolResult::failure(format!("File not found: {file_path}"))),
        }

        if self.require_read_first && !self.tracker.was_read_recently(&resolved) {
            return Ok(ToolResult::failure(format!(
                "MUST READ FILE FIRST: You must use `read_file` on this file before editing.\n\
                 This prevents blind edits that may corrupt the file.\n\n\
                 Run: read_file('{file_path}')\n\
                 Then retry your edit."
            )));
        }

        let old_content = match tokio::fs::read(&resolved).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return Ok(ToolResult::failure(format!("Cannot read file as text: {file_path}"))),
            },
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read file: {e}"))),
        };

        if is_whole_file_rewrite(&old_content, old_string) {
            return Ok(ToolResult::failure(
                "Refusing full-file replacement. \
                 Provide a smaller old_string snippet or break the change into smaller edits.",
            ));
        }

        let replacement = match forgehand_patch::apply(&old_content, old_string, new_string, replace_all) {
            Ok(r) => r,
            Err(e) => {
                debug!(path = %file_path, kind = e.kind(), "Patch failed");
                return Ok(ToolResult::failure(e.to_string()));
            }
        };
        let warnings = validate_indentation(&replacement.matched, new_string);

        tokio::fs::write(&resolved, &replacement.content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Failed to write file: {e}"),
            })?;
        self.tracker.mark_read(&resolved);

        let shown = self.workspace.display(&resolved);
        let diff = unified_diff(&shown, &old_content, &replacement.content);
        let stats = diff_stats(&old_content, &replacement.content);
        info!(
            path = %shown,
            strategy = %replacement.strategy,
            occurrences = replacement.occurrences,
            "File edited"
        );

        let mut output = format!("Successfully edited {shown}\n\n{diff}");
        if !warnings.is_empty() {
            output.push_str("\n\n");
            output.push_str(&warnings.join("\n"));
        }

        Ok(ToolResult::ok(output)
            .with_metadata("path", shown)
            .with_metadata("strategy", replacement.strategy.name())
            .with_metadata("occurrences", replacement.occurrences)
            .with_metadata("additions", stats.additions)
            .with_metadata("deletions", stats.deletions)
            .with_metadata("old_size", old_content.len())
            .with_metadata("new_size", replacement.content.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(content: &str) -> (TempDir, EditTool, Arc<ReadTracker>) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("lib.rs"), content).unwrap();
        let tracker = Arc::new(ReadTracker::new());
        let tool = EditTool::new(Workspace::new(dir.path()).unwrap(), tracker.clone());
        (dir, tool, tracker)
    }

    fn mark(dir: &TempDir, tracker: &ReadTracker) {
        tracker.mark_read(&dir.path().join("lib.rs").canonicalize().unwrap());
    }

    #[tokio::test]
    async fn edit_requires_prior_read() {
        let (_dir, tool, _) = setup("fn a() {}\nfn b() {}\n");
        let result = tool
            .execute(serde_json::json!({"file_path": "lib.rs", "old_string": "a()", "new_string": "c()"}))
            .await
            .unwrap();
        assert!(result.error.unwrap().starts_with("MUST READ FILE FIRST"));
    }

    #[tokio::test]
    async fn edit_applies_and_reports_diff() {
        let (dir, tool, tracker) = setup("fn a() {\n    one();\n}\nfn b() {}\n");
        mark(&dir, &tracker);
        let result = tool
            .execute(serde_json::json!({
                "file_path": "lib.rs",
                "old_string": "one();",
                "new_string": "two();"
            }))
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert!(result.output.starts_with("Successfully edited lib.rs\n\n--- a/lib.rs\n+++ b/lib.rs"));
        assert_eq!(result.metadata["strategy"], "exact");
        assert_eq!(result.metadata["additions"], 1);
        assert_eq!(result.metadata["deletions"], 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lib.rs")).unwrap(),
            "fn a() {\n    two();\n}\nfn b() {}\n"
        );
    }

    #[tokio::test]
    async fn ambiguous_edit_fails_with_guidance() {
        let (dir, tool, tracker) = setup("x = 1\nx = 1\n");
        mark(&dir, &tracker);
        let result = tool
            .execute(serde_json::json!({"file_path": "lib.rs", "old_string": "x = 1", "new_string": "x = 2"}))
            .await
            .unwrap();
        assert!(result.error.unwrap().starts_with("MULTIPLE MATCHES FOUND"));

        let result = tool
            .execute(serde_json::json!({
                "file_path": "lib.rs",
                "old_string": "x = 1",
                "new_string": "x = 2",
                "replace_all": true
            }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.metadata["occurrences"], 2);
    }

    #[tokio::test]
    async fn whole_file_rewrite_is_refused() {
        let content = "line one\nline two\n";
        let (dir, tool, tracker) = setup(content);
        mark(&dir, &tracker);
        let result = tool
            .execute(serde_json::json!({"file_path": "lib.rs", "old_string": content, "new_string": "x"}))
            .await
            .unwrap();
        assert!(result.error.unwrap().starts_with("Refusing full-file replacement"));
    }

    #[tokio::test]
    async fn indentation_warnings_are_appended() {
        let (dir, tool, tracker) = setup("fn a() {\n    body();\n}\n");
        mark(&dir, &tracker);
        let result = tool
            .execute(serde_json::json!({
                "file_path": "lib.rs",
                "old_string": "    body();",
                "new_string": "other();"
            }))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("WARNING: First line of new_string has no indentation"));
    }

    #[tokio::test]
    async fn identical_strings_rejected() {
        let (_dir, tool, _) = setup("a");
        let result = tool
            .execute(serde_json::json!({"file_path": "lib.rs", "old_string": "a", "new_string": "a"}))
            .await
            .unwrap();
        assert!(!result.success);
    }
}
