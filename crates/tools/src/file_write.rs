//! File write tool — create files, or overwrite files the agent has read.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{FileAccess, RiskLevel, Tool, ToolResult};
use forgehand_security::Workspace;
use std::sync::Arc;
use tracing::info;

use crate::read_tracker::ReadTracker;
use crate::{optional_bool, permission_denied, required_str};

pub struct WriteFileTool {
    workspace: Workspace,
    tracker: Arc<ReadTracker>,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace, tracker: Arc<ReadTracker>) -> Self {
        Self { workspace, tracker }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Existing files are \
         only replaced with overwrite=true after reading them; prefer the edit tool for changes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "The full file content"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace an existing file (default: false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn file_access(&self, arguments: &serde_json::Value) -> Option<FileAccess> {
        let path = arguments.get("path")?.as_str()?;
        Some(FileAccess::Write {
            path: self.workspace.key(path),
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = required_str(&arguments, "path")?;
        let content = required_str(&arguments, "content")?;
        let overwrite = optional_bool(&arguments, "overwrite")?.unwrap_or(false);

        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| permission_denied(self.name(), e))?;

        let exists = tokio::fs::try_exists(&resolved).await.unwrap_or(false);
        if exists && !overwrite {
            return Ok(ToolResult::failure(
                "Refusing to overwrite existing file. \
                 Use overwrite=true and include the full file content, or use the edit tool.",
            ));
        }
        if exists && !self.tracker.was_read_recently(&resolved) {
            return Ok(ToolResult::failure(
                "Overwrite requested but file was not read recently. \
                 Read the file first to avoid losing content, or use the edit tool.",
            ));
        }

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Failed to create directory: {e}"),
            })?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Failed to write file: {e}"),
            })?;

        self.tracker.mark_read(&resolved);
        let shown = self.workspace.display(&resolved);
        info!(path = %shown, bytes = content.len(), "File written");

        Ok(
            ToolResult::ok(format!("Successfully wrote {} bytes to {shown}", content.len()))
                .with_metadata("path", shown)
                .with_metadata("size", content.len()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, WriteFileTool, Arc<ReadTracker>) {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(ReadTracker::new());
        let tool = WriteFileTool::new(Workspace::new(dir.path()).unwrap(), tracker.clone());
        (dir, tool, tracker)
    }

    #[tokio::test]
    async fn creates_new_file_with_directories() {
        let (dir, tool, _) = setup();
        let result = tool
            .execute(serde_json::json!({"path": "src/new.rs", "content": "fn x() {}\n"}))
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "Successfully wrote 10 bytes to src/new.rs");
        assert_eq!(std::fs::read_to_string(dir.path().join("src/new.rs")).unwrap(), "fn x() {}\n");
    }

    #[tokio::test]
    async fn refuses_blind_overwrite() {
        let (dir, tool, tracker) = setup();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();

        let result = tool
            .execute(serde_json::json!({"path": "a.txt", "content": "new"}))
            .await
            .unwrap();
        assert!(result.error.unwrap().starts_with("Refusing to overwrite"));

        let args = serde_json::json!({"path": "a.txt", "content": "new", "overwrite": true});
        let result = tool.execute(args.clone()).await.unwrap();
        assert!(result.error.unwrap().contains("not read recently"));

        tracker.mark_read(&dir.path().join("a.txt").canonicalize().unwrap());
        let result = tool.execute(args).await.unwrap();
        assert!(result.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn sensitive_targets_are_denied() {
        let (_dir, tool, _) = setup();
        let err = tool
            .execute(serde_json::json!({"path": ".env", "content": "K=V"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sensitive"));
    }

    #[test]
    fn declares_write_access() {
        let (_dir, tool, _) = setup();
        let access = tool.file_access(&serde_json::json!({"path": "b.txt"})).unwrap();
        assert!(access.is_write());
        assert_eq!(access.path(), "b.txt");
    }
}
