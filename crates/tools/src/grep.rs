//! Grep tool — regex search over project file contents.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{RiskLevel, Tool, ToolResult};
use forgehand_security::Workspace;
use regex::Regex;
use std::path::Path;

use crate::{optional_str, optional_usize, permission_denied, required_str};

const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_LINE_LEN: usize = 500;

pub struct GrepTool {
    workspace: Workspace,
}

impl GrepTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

struct Hit {
    file: String,
    line: usize,
    content: String,
}

fn clip(line: &str) -> String {
    if line.len() <= MAX_LINE_LEN {
        return line.to_string();
    }
    let mut end = MAX_LINE_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

fn search_file(workspace: &Workspace, path: &Path, re: &Regex, hits: &mut Vec<Hit>) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    let file = workspace.display(path);
    for (i, line) in content.lines().enumerate() {
        if re.is_match(line) {
            hits.push(Hit {
                file: file.clone(),
                line: i + 1,
                content: clip(line),
            });
        }
    }
}

/// Collect every hit; the caller truncates so it can report the overflow.
fn search(workspace: &Workspace, base: &Path, re: &Regex, include: Option<&globset::GlobMatcher>) -> Vec<Hit> {
    let mut hits = Vec::new();
    if base.is_file() {
        search_file(workspace, base, re, &mut hits);
        return hits;
    }

    let root = workspace.root();
    let walker = ignore::WalkBuilder::new(base)
        .hidden(false)
        .git_ignore(true)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();
    for entry in walker.flatten() {
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Some(matcher) = include {
            let name = path.file_name().map(Path::new).unwrap_or(path);
            if !matcher.is_match(name) {
                continue;
            }
        }
        if let Ok(relative) = path.strip_prefix(root)
            && workspace.is_sensitive(relative)
        {
            continue;
        }
        search_file(workspace, path, re, &mut hits);
    }
    hits
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents for a regex pattern (Rust regex syntax: use | for alternation). \
         Returns matching lines as path:line:content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search in (default: project root)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob pattern to filter file names (e.g. \"*.rs\")"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of matching lines (default: 100)"
                }
            },
            "required": ["pattern"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let pattern = required_str(&arguments, "pattern")?;
        let max_results = optional_usize(&arguments, "max_results")?.unwrap_or(DEFAULT_MAX_RESULTS);

        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid regex pattern: {e}"))),
        };
        let include = match optional_str(&arguments, "include")? {
            Some(glob) => match globset::Glob::new(glob) {
                Ok(g) => Some(g.compile_matcher()),
                Err(e) => return Ok(ToolResult::failure(format!("Invalid include glob: {e}"))),
            },
            None => None,
        };
        let base = match optional_str(&arguments, "path")? {
            Some(path) => self
                .workspace
                .resolve(path)
                .map_err(|e| permission_denied(self.name(), e))?,
            None => self.workspace.root().to_path_buf(),
        };
        if !base.exists() {
            return Ok(ToolResult::failure(format!(
                "Not a file or directory: {}",
                self.workspace.display(&base)
            )));
        }

        let workspace = self.workspace.clone();
        let mut hits = tokio::task::spawn_blocking(move || search(&workspace, &base, &re, include.as_ref()))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("No matches found for pattern: {pattern}"))
                .with_metadata("count", 0));
        }

        let total = hits.len();
        hits.truncate(max_results);
        let mut output = hits
            .iter()
            .map(|h| format!("{}:{}:{}", h.file, h.line, h.content))
            .collect::<Vec<_>>()
            .join("\n");
        if total > max_results {
            output.push_str(&format!("\n... and {} more matches", total - max_results));
        }

        Ok(ToolResult::ok(output)
            .with_metadata("count", total)
            .with_metadata("truncated", total > max_results))
    }
}
