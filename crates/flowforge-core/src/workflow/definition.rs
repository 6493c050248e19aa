//! Workflow definition parsing and file loading.
//!
//! Definitions are authored as YAML or JSON. Parsing only checks that the
//! document deserializes; structural and semantic checks belong to the
//! validator and the graph builder.

use std::path::Path;

use flowforge_types::error::WorkflowError;
use flowforge_types::workflow::WorkflowDefinition;

/// Document formats a definition can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Pick the format from a file extension (`yaml`, `yml`, `json`).
    pub fn from_path(path: &Path) -> Result<Self, WorkflowError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(DefinitionFormat::Yaml),
            "json" => Ok(DefinitionFormat::Json),
            _ => Err(WorkflowError::UnsupportedFormat(ext)),
        }
    }
}

pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))
}

pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))
}

pub fn parse_workflow(content: &str, format: DefinitionFormat) -> Result<WorkflowDefinition, WorkflowError> {
    match format {
        DefinitionFormat::Yaml => parse_workflow_yaml(content),
        DefinitionFormat::Json => parse_workflow_json(content),
    }
}

/// Serialize a definition to YAML.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::Parse(e.to_string()))
}

/// Load a definition from a `.yaml`, `.yml` or `.json` file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let format = DefinitionFormat::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|e| WorkflowError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let def = parse_workflow(&content, format)?;
    tracing::debug!(path = %path.display(), steps = def.steps.len(), "loaded workflow definition");
    Ok(def)
}
