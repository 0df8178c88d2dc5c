//! `get_project_summary`

use crate::tools::{ErrorKind, EventSink, HandlerContext, ToolHandler, ToolSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Tool identifier
pub const TOOL_ID: &str = "get_project_summary";

const IGNORED_DIR: &str = "node_modules";

/// Summary of a JavaScript/TypeScript project root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    /// Package name, `Unknown` when absent
    pub name: String,
    /// Runtime dependency names, sorted
    pub dependencies: Vec<String>,
    /// Entries below the root, excluding `node_modules`
    pub total_files: usize,
    /// Resolved project root
    pub path: PathBuf,
}

impl ProjectSummary {
    /// Plain-text rendering
    pub fn render(&self) -> String {
        format!(
            "Project: {}\nDependencies: {}\nEstimated Files: {}",
            self.name,
            self.dependencies.join(", "),
            self.total_files
        )
    }
}

/// Why a summary could not be produced
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("No package.json found at {}", .0.display())]
    MissingManifest(PathBuf),

    #[error("Failed to analyze project: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to analyze project: invalid package.json: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl SummaryError {
    /// Error kind for the terminal failure event
    pub fn kind(&self) -> ErrorKind {
        match self {
            SummaryError::MissingManifest(_) => ErrorKind::NotFound,
            SummaryError::Io(_) | SummaryError::Manifest(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Deserialize)]
struct PackageManifest {
    name: Option<String>,
    #[serde(default)]
    dependencies: serde_json::Map<String, Value>,
}

/// Read `package.json` and count entries under `root`
pub fn summarize(root: &Path) -> Result<ProjectSummary, SummaryError> {
    let base = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let manifest_path = base.join("package.json");
    if !manifest_path.is_file() {
        return Err(SummaryError::MissingManifest(base));
    }

    let manifest: PackageManifest =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?;
    let mut dependencies: Vec<String> = manifest.dependencies.keys().cloned().collect();
    dependencies.sort();

    Ok(ProjectSummary {
        name: manifest.name.unwrap_or_else(|| "Unknown".to_string()),
        dependencies,
        total_files: count_entries(&base)?,
        path: base,
    })
}

fn count_entries(dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == IGNORED_DIR {
            continue;
        }
        count += 1;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            count += count_entries(&entry.path())?;
        }
    }
    Ok(count)
}

#[derive(Debug, Deserialize)]
struct Input {
    #[serde(default = "default_path")]
    project_path: String,
}

fn default_path() -> String {
    ".".to_string()
}

/// Summarizes a project from its `package.json`
#[derive(Debug, Default)]
pub struct ProjectSummaryHandler;

impl ProjectSummaryHandler {
    /// Input schema
    pub fn input_schema() -> ToolSchema {
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "project_path": {
                    "type": "string",
                    "default": ".",
                    "description": "Relative or absolute path to the project root"
                }
            },
            "additionalProperties": false
        }))
    }

    /// Output schema
    pub fn output_schema() -> ToolSchema {
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "dependencies": { "type": "array", "items": { "type": "string" } },
                "total_files": { "type": "integer", "minimum": 0 },
                "path": { "type": "string" },
                "summary": { "type": "string" }
            },
            "required": ["name", "dependencies", "total_files", "summary"]
        }))
    }
}

#[async_trait]
impl ToolHandler for ProjectSummaryHandler {
    async fn run(&self, input: Value, _ctx: HandlerContext, events: EventSink) {
        let path = serde_json::from_value::<Input>(input)
            .map(|i| i.project_path)
            .unwrap_or_else(|_| default_path());

        let outcome = tokio::task::spawn_blocking(move || summarize(Path::new(&path))).await;

        match outcome {
            Ok(Ok(summary)) => {
                let rendered = summary.render();
                match serde_json::to_value(&summary) {
                    Ok(mut payload) => {
                        payload["summary"] = Value::String(rendered);
                        events.result(payload).await;
                    }
                    Err(e) => {
                        events.failure(ErrorKind::Internal, e.to_string()).await;
                    }
                }
            }
            Ok(Err(e)) => {
                events.failure(e.kind(), e.to_string()).await;
            }
            Err(e) => {
                events
                    .failure(ErrorKind::Internal, format!("summary task failed: {}", e))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_summary_counts_entries_outside_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "ledger-app", "dependencies": {"react": "^18", "@daml/ledger": "2.9"}}"#,
        )
        .unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/index.ts"), "export {}").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/react")).unwrap();
        fs::write(dir.path().join("node_modules/react/index.js"), "").unwrap();

        let summary = summarize(dir.path()).unwrap();

        assert_eq!(summary.name, "ledger-app");
        assert_eq!(summary.dependencies, vec!["@daml/ledger", "react"]);
        // package.json, src, src/index.ts
        assert_eq!(summary.total_files, 3);
        assert!(summary.render().starts_with("Project: ledger-app\n"));
    }

    #[test]
    fn test_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = summarize(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("No package.json found at"));
    }

    #[test]
    fn test_unnamed_package() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        let summary = summarize(dir.path()).unwrap();
        assert_eq!(summary.name, "Unknown");
        assert!(summary.dependencies.is_empty());
        assert_eq!(summary.total_files, 1);
    }
}
