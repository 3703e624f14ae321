//! List files tool — glob over the project, honouring `.gitignore`.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{RiskLevel, Tool, ToolResult};
use forgehand_security::Workspace;
use globset::GlobBuilder;

use crate::{optional_str, optional_usize};

const DEFAULT_PATTERN: &str = "**/*";
const DEFAULT_MAX_RESULTS: usize = 100;

pub struct ListFilesTool {
    workspace: Workspace,
}

impl ListFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

struct Listing {
    files: Vec<String>,
    truncated: bool,
}

fn walk(workspace: &Workspace, pattern: &str, max_results: usize) -> Result<Listing, globset::Error> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();
    let root = workspace.root();

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut files = Vec::new();
    for entry in walker.flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !matcher.is_match(relative) || workspace.is_sensitive(relative) {
            continue;
        }
        files.push(relative.to_string_lossy().replace('\\', "/"));
    }

    files.sort();
    let truncated = files.len() > max_results;
    files.truncate(max_results);
    Ok(Listing { files, truncated })
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List project files matching a glob pattern (e.g. 'src/**/*.rs'). \
         Respects .gitignore. Returns paths relative to the project root."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern (default: **/*)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of paths to return (default: 100)"
                }
            }
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let pattern = optional_str(&arguments, "pattern")?
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PATTERN)
            .to_string();
        let max_results = optional_usize(&arguments, "max_results")?.unwrap_or(DEFAULT_MAX_RESULTS);

        let workspace = self.workspace.clone();
        let glob = pattern.clone();
        let listing = tokio::task::spawn_blocking(move || walk(&workspace, &glob, max_results))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        let listing = match listing {
            Ok(listing) => listing,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid glob pattern: {e}"))),
        };

        let output = if listing.files.is_empty() {
            "(no files found)".to_string()
        } else if listing.truncated {
            format!(
                "{}\n... (truncated at {max_results} results)",
                listing.files.join("\n")
            )
        } else {
            listing.files.join("\n")
        };

        Ok(ToolResult::ok(output)
            .with_metadata("count", listing.files.len())
            .with_metadata("pattern", pattern)
            .with_metadata("truncated", listing.truncated))
    }
}
