//! Workflow document files.
//!
//! The format follows the file extension: `.json` is JSON, `.yaml` and `.yml`
//! are YAML. Documents are validated on load.

use std::path::{Path, PathBuf};

use weft_core::workflow::definition::{
    WorkflowError, parse_workflow_json, parse_workflow_yaml, serialize_workflow_json,
    serialize_workflow_yaml,
};
use weft_types::workflow::WorkflowIr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowFormat {
    Json,
    Yaml,
}

impl WorkflowFormat {
    /// Detect the format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(WorkflowFormat::Json),
            "yaml" | "yml" => Some(WorkflowFormat::Yaml),
            _ => None,
        }
    }
}

fn format_of(path: &Path) -> Result<WorkflowFormat, WorkflowError> {
    WorkflowFormat::from_path(path).ok_or_else(|| {
        WorkflowError::ParseError(format!(
            "unsupported workflow file extension: {}",
            path.display()
        ))
    })
}

/// Load and validate a workflow file.
pub async fn load_workflow_file(path: &Path) -> Result<WorkflowIr, WorkflowError> {
    let format = format_of(path)?;
    let content = tokio::fs::read_to_string(path).await?;
    match format {
        WorkflowFormat::Json => parse_workflow_json(&content),
        WorkflowFormat::Yaml => parse_workflow_yaml(&content),
    }
}

/// Save a workflow file, creating parent directories if they don't exist.
pub async fn save_workflow_file(path: &Path, ir: &WorkflowIr) -> Result<(), WorkflowError> {
    let content = match format_of(path)? {
        WorkflowFormat::Json => serialize_workflow_json(ir)?,
        WorkflowFormat::Yaml => serialize_workflow_yaml(ir)?,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Discover every workflow file under `base_dir`, recursively.
///
/// Files that fail to load are skipped with a warning. Results are sorted by
/// path.
pub async fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, WorkflowIr)>, WorkflowError> {
    let mut results = Vec::new();
    if !tokio::fs::try_exists(base_dir).await? {
        return Ok(results);
    }

    let mut pending = vec![base_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if WorkflowFormat::from_path(&path).is_some() {
                match load_workflow_file(&path).await {
                    Ok(ir) => results.push((path, ir)),
                    Err(err) => {
                        tracing::warn!(?path, error = %err, "skipping unloadable workflow file");
                    }
                }
            }
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}
