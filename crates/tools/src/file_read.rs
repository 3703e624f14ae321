//! File read tool — read file contents inside the workspace.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{FileAccess, RiskLevel, Tool, ToolResult};
use forgehand_security::Workspace;
use std::sync::Arc;
use tracing::debug;

use crate::read_tracker::ReadTracker;
use crate::{optional_usize, permission_denied, required_str};

/// Default size limit: 1 MiB.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

pub struct ReadFileTool {
    workspace: Workspace,
    tracker: Arc<ReadTracker>,
    max_file_size: u64,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace, tracker: Arc<ReadTracker>) -> Self {
        Self {
            workspace,
            tracker,
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }
}

fn is_full_read(arguments: &serde_json::Value) -> bool {
    arguments.get("start_line").is_none_or(|v| v.is_null())
        && arguments.get("end_line").is_none_or(|v| v.is_null())
}

/// Lines `start..=end` (1-based, inclusive), keeping line endings.
fn slice_lines(content: &str, start: Option<usize>, end: Option<usize>) -> String {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let start_idx = start.unwrap_or(1).saturating_sub(1).min(lines.len());
    let end_idx = end.unwrap_or(lines.len()).min(lines.len());
    if start_idx >= end_idx {
        return String::new();
    }
    lines[start_idx..end_idx].concat()
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Path should be relative to the project root \
         (e.g., 'src/main.rs', 'README.md'). Optionally restrict to a 1-based line range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "Starting line number (1-based, optional)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Ending line number (inclusive, optional)"
                }
            },
            "required": ["path"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    fn file_access(&self, arguments: &serde_json::Value) -> Option<FileAccess> {
        let path = arguments.get("path")?.as_str()?;
        Some(FileAccess::Read {
            path: self.workspace.key(path),
            full: is_full_read(arguments),
        })
    }

    /// A cached read still counts as having seen the file.
    fn served_from_cache(&self, arguments: &serde_json::Value) {
        if let Some(path) = arguments.get("path").and_then(|p| p.as_str())
            && let Ok(resolved) = self.workspace.resolve(path)
        {
            self.tracker.mark_read(&resolved);
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, "path")?;
        let start_line = optional_usize(&arguments, "start_line")?;
        let end_line = optional_usize(&arguments, "end_line")?;

        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| permission_denied(self.name(), e))?;

        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(m) => m,
            Err(_) => return Ok(ToolResult::failure(format!("File not found: {path}"))),
        };
        if !metadata.is_file() {
            return Ok(ToolResult::failure(format!("Not a file: {path}")));
        }
        if metadata.len() > self.max_file_size {
            return Ok(ToolResult::failure(format!(
                "File too large: {} bytes (max: {})",
                metadata.len(),
                self.max_file_size
            )));
        }

        let content = match tokio::fs::read(&resolved).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return Ok(ToolResult::failure(format!("Cannot read file as text: {path}"))),
            },
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read file: {e}"))),
        };

        let content = if start_line.is_some() || end_line.is_some() {
            slice_lines(&content, start_line, end_line)
        } else {
            content
        };

        self.tracker.mark_read(&resolved);
        let shown = self.workspace.display(&resolved);
        debug!(path = %shown, bytes = content.len(), "File read");

        let lines = content.lines().count();
        let size = content.len();
        Ok(ToolResult::ok(content)
            .with_metadata("path", shown)
            .with_metadata("size", size)
            .with_metadata("lines", lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ReadFileTool, Arc<ReadTracker>) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let tracker = Arc::new(ReadTracker::new());
        let tool = ReadFileTool::new(Workspace::new(dir.path()).unwrap(), tracker.clone());
        (dir, tool, tracker)
    }

    #[test]
    fn tool_definition() {
        let (_dir, tool, _) = setup();
        assert_eq!(tool.name(), "read_file");
        assert_eq!(tool.risk(), RiskLevel::Low);
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }

    #[tokio::test]
    async fn read_existing_file_marks_it_read() {
        let (dir, tool, tracker) = setup();
        let result = tool.execute(serde_json::json!({"path": "a.txt"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "one\ntwo\nthree\n");
        assert_eq!(result.metadata["path"], "a.txt");
        assert_eq!(result.metadata["lines"], 3);

        let canonical = dir.path().join("a.txt").canonicalize().unwrap();
        assert!(tracker.was_read_recently(&canonical));
    }

    #[test]
    fn cache_hit_refreshes_the_read() {
        let (dir, tool, tracker) = setup();
        let canonical = dir.path().join("a.txt").canonicalize().unwrap();
        tool.served_from_cache(&serde_json::json!({"path": "a.txt"}));
        assert!(tracker.was_read_recently(&canonical));

        tool.served_from_cache(&serde_json::json!({"path": "../outside.txt"}));
        tool.served_from_cache(&serde_json::json!({}));
    }

    #[tokio::test]
    async fn line_range_is_partial() {
        let (_dir, tool, _) = setup();
        let args = serde_json::json!({"path": "a.txt", "start_line": 2, "end_line": 2});
        let result = tool.execute(args.clone()).await.unwrap();
        assert_eq!(result.output, "two\n");
        assert_eq!(
            tool.file_access(&args),
            Some(FileAccess::Read { path: "a.txt".into(), full: false })
        );
        assert!(tool.file_access(&serde_json::json!({"path": "./a.txt"})).unwrap().is_full_read());
    }

    #[tokio::test]
    async fn missing_and_oversized_files_fail() {
        let (dir, tool, _) = setup();
        let result = tool.execute(serde_json::json!({"path": "nope.txt"})).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("File not found: nope.txt"));

        std::fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();
        let small = tool.with_max_file_size(16);
        let result = small.execute(serde_json::json!({"path": "big.txt"})).await.unwrap();
        assert!(result.error.unwrap().starts_with("File too large"));
    }

    #[tokio::test]
    async fn traversal_is_denied() {
        let (_dir, tool, _) = setup();
        let err = tool
            .execute(serde_json::json!({"path": "../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[test]
    fn slicing_clamps_out_of_range() {
        assert_eq!(slice_lines("a\nb\n", Some(5), None), "");
        assert_eq!(slice_lines("a\nb", Some(0), Some(9)), "a\nb");
    }
}
