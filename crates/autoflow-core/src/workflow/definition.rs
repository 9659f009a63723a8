//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts JSON and YAML documents into `WorkflowDefinition`s, checks step
//! kinds on the raw document before typed parsing so unknown kinds get a
//! precise error, validates structural constraints, and discovers workflow
//! files on disk.

use std::path::{Path, PathBuf};

use serde_json::Value as Json;
use thiserror::Error;

use autoflow_types::value::Value;
use autoflow_types::workflow::{LoopType, Step, StepKind, WorkflowDefinition, is_known_step_kind};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating a definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A step declares a `type` the engine does not know.
    #[error("unknown step kind '{kind}' at step {path}")]
    UnknownStepKind { path: String, kind: String },

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Document syntax of a workflow file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick a format from a file extension. Unknown extensions are `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(DocumentFormat::Json),
            Some("yaml" | "yml") => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON document into a validated `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let raw: Json = serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    parse_workflow_value(raw)
}

/// Parse a YAML document into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let raw: Json =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    parse_workflow_value(raw)
}

/// Parse an already-decoded document.
///
/// Runs the raw step-kind check, typed deserialization, then
/// `validate_definition`, so the returned value is structurally valid.
pub fn parse_workflow_value(raw: Json) -> Result<WorkflowDefinition, WorkflowError> {
    if let Some(steps) = raw.get("steps") {
        check_step_kinds(steps, "")?;
    }
    let def: WorkflowDefinition =
        serde_json::from_value(raw).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` in the given format.
pub fn serialize_workflow(
    def: &WorkflowDefinition,
    format: DocumentFormat,
) -> Result<String, WorkflowError> {
    match format {
        DocumentFormat::Json => {
            serde_json::to_string_pretty(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
        DocumentFormat::Yaml => {
            serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
    }
}

fn check_step_kinds(steps: &Json, prefix: &str) -> Result<(), WorkflowError> {
    let Some(steps) = steps.as_array() else {
        return Ok(());
    };
    for (index, step) in steps.iter().enumerate() {
        let path = join_path(prefix, &index.to_string());
        let kind = match step.get("type") {
            Some(Json::String(kind)) => kind.as_str(),
            Some(other) => {
                return Err(WorkflowError::UnknownStepKind {
                    path,
                    kind: other.to_string(),
                });
            }
            None => {
                return Err(WorkflowError::UnknownStepKind {
                    path,
                    kind: String::new(),
                });
            }
        };
        if !is_known_step_kind(kind) {
            return Err(WorkflowError::UnknownStepKind {
                path,
                kind: kind.to_string(),
            });
        }
        for key in ["then", "else", "steps"] {
            if let Some(nested) = step.get(key) {
                check_step_kinds(nested, &join_path(&path, key))?;
            }
        }
        if let Some(branches) = step.get("branches").and_then(Json::as_array) {
            for (b, branch) in branches.iter().enumerate() {
                check_step_kinds(branch, &join_path(&path, &format!("branch/{b}")))?;
            }
        }
    }
    Ok(())
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}/{segment}")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - At least one top-level step exists
/// - Loops carry the field their `loopType` needs
/// - Parallel steps have at least one branch
/// - Sub-workflow steps name a workflow
/// - Script steps have non-empty source
///
/// Nested step lists are checked recursively.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }
    validate_steps(&def.steps, "")
}

fn validate_steps(steps: &[Step], prefix: &str) -> Result<(), WorkflowError> {
    for (index, step) in steps.iter().enumerate() {
        let path = join_path(prefix, &index.to_string());
        validate_step(step, &path)?;
    }
    Ok(())
}

fn validate_step(step: &Step, path: &str) -> Result<(), WorkflowError> {
    let invalid = |msg: &str| WorkflowError::ValidationError(format!("step {path}: {msg}"));

    match &step.kind {
        StepKind::Action { .. } | StepKind::Wait { .. } => {}
        StepKind::Condition {
            then_steps,
            else_steps,
            ..
        } => {
            validate_steps(then_steps, &join_path(path, "then"))?;
            validate_steps(else_steps, &join_path(path, "else"))?;
        }
        StepKind::Loop {
            loop_type,
            items,
            condition,
            times,
            steps,
            ..
        } => {
            let missing = match loop_type {
                LoopType::ForEach => items.is_none().then_some("forEach loop requires 'items'"),
                LoopType::While => condition.is_none().then_some("while loop requires 'condition'"),
                LoopType::Times => times.is_none().then_some("times loop requires 'times'"),
            };
            if let Some(msg) = missing {
                return Err(invalid(msg));
            }
            validate_steps(steps, &join_path(path, "steps"))?;
        }
        StepKind::Parallel { branches } => {
            if branches.is_empty() {
                return Err(invalid("parallel step requires at least one branch"));
            }
            for (b, branch) in branches.iter().enumerate() {
                validate_steps(branch, &join_path(path, &format!("branch/{b}")))?;
            }
        }
        StepKind::SubWorkflow { workflow_id, .. } => {
            let empty = match workflow_id {
                Value::Null => true,
                Value::Text(id) => id.trim().is_empty(),
                _ => false,
            };
            if empty {
                return Err(invalid("subWorkflow step requires 'workflowId'"));
            }
        }
        StepKind::Script { script, .. } => {
            if script.trim().is_empty() {
                return Err(invalid("script step requires non-empty 'script'"));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a `.json`, `.yaml` or `.yml` file.
///
/// Files with any other extension are parsed as YAML, which also accepts JSON.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match DocumentFormat::from_path(path) {
        Some(DocumentFormat::Json) => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

/// Save a workflow definition, choosing the format from the extension.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let format = DocumentFormat::from_path(path).unwrap_or(DocumentFormat::Yaml);
    std::fs::write(path, serialize_workflow(def, format)?)?;
    Ok(())
}

/// Discover all workflow files under `base_dir`.
///
/// Scans for `.json`, `.yaml` and `.yml` files recursively. Files that fail
/// to parse are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if DocumentFormat::from_path(&path).is_some() {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(error) => {
                    tracing::warn!(?path, %error, "skipping unparseable workflow file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
