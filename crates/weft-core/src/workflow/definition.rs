//! Workflow IR parsing and structural validation.
//!
//! Converts between JSON/YAML documents and the canonical `WorkflowIr`, and
//! checks the registry-independent constraints: ids, edges, start node,
//! declared inputs, batch configuration, and acyclicity.

use std::collections::HashSet;

use thiserror::Error;
use weft_types::diagnostic::{Diagnostic, DiagnosticKind};
use weft_types::interface::TypeDescriptor;
use weft_types::workflow::{NodeDefinition, WorkflowIr};

use super::dag::WorkflowDag;
use super::store::is_reserved_key;
use super::template::{Template, is_identifier};

/// Inclusive bounds for `batch.max_concurrent`.
pub const MAX_CONCURRENT_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {}", join_messages(.0))]
    ValidationError(Vec<Diagnostic>),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn join_messages(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON document into a validated `WorkflowIr`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowIr, WorkflowError> {
    let ir: WorkflowIr =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&ir)?;
    Ok(ir)
}

/// Parse a YAML document into a validated `WorkflowIr`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowIr, WorkflowError> {
    let ir: WorkflowIr =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&ir)?;
    Ok(ir)
}

pub fn serialize_workflow_json(ir: &WorkflowIr) -> Result<String, WorkflowError> {
    serde_json::to_string_pretty(ir).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

pub fn serialize_workflow_yaml(ir: &WorkflowIr) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(ir).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate every registry-independent constraint.
pub fn validate_definition(ir: &WorkflowIr) -> Result<(), WorkflowError> {
    let mut diagnostics = schema_diagnostics(ir);
    diagnostics.extend(batch_diagnostics(ir));
    if diagnostics.is_empty() {
        diagnostics.extend(cycle_diagnostic(&WorkflowDag::build(ir)));
    }
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::ValidationError(diagnostics))
    }
}

/// Structural checks on ids, edges, the start node and declared inputs.
pub fn schema_diagnostics(ir: &WorkflowIr) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let schema = |msg: String| Diagnostic::error(DiagnosticKind::Schema, msg);

    if ir.nodes.is_empty() {
        out.push(schema("workflow must have at least one node".into()));
    }

    let mut ids = HashSet::new();
    for node in &ir.nodes {
        if !is_valid_node_id(&node.id) {
            out.push(
                schema(format!(
                    "invalid node id '{}': use letters, digits, '_' and '-'",
                    node.id
                ))
                .at_node(&node.id),
            );
        } else if is_reserved_key(&node.id) {
            out.push(schema(format!("node id '{}' is a reserved key", node.id)).at_node(&node.id));
        }
        if !ids.insert(node.id.as_str()) {
            out.push(schema(format!("duplicate node id '{}'", node.id)).at_node(&node.id));
        }
        if node.node_type.trim().is_empty() {
            out.push(schema("node type must not be empty".into()).at_node(&node.id));
        }
    }

    let mut routes = HashSet::new();
    for edge in &ir.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !ids.contains(endpoint.as_str()) {
                out.push(schema(format!(
                    "edge {} -> {} references unknown node '{endpoint}'",
                    edge.from, edge.to
                )));
            }
        }
        if edge.action.trim().is_empty() {
            out.push(schema(format!("edge {} -> {} has an empty action", edge.from, edge.to)).at_node(&edge.from));
        }
        if !routes.insert((edge.from.as_str(), edge.action.as_str())) {
            out.push(
                schema(format!(
                    "node '{}' has more than one edge for action '{}'",
                    edge.from, edge.action
                ))
                .at_node(&edge.from),
            );
        }
    }

    if let Some(start) = &ir.start_node {
        if !ids.contains(start.as_str()) {
            out.push(schema(format!("start node '{start}' does not exist")));
        }
    }

    for (name, input) in &ir.inputs {
        if !is_identifier(name) || is_reserved_key(name) {
            out.push(schema(format!("invalid input name '{name}'")));
        }
        if ids.contains(name.as_str()) {
            out.push(schema(format!("input '{name}' collides with a node id")));
        }
        if let Some(ty) = &input.input_type {
            if let Err(err) = ty.parse::<TypeDescriptor>() {
                out.push(schema(format!("input '{name}': {err}")));
            }
        }
    }

    out
}

/// Checks on every node's batch block.
pub fn batch_diagnostics(ir: &WorkflowIr) -> Vec<Diagnostic> {
    ir.nodes
        .iter()
        .flat_map(|node| node_batch_diagnostics(ir, node))
        .collect()
}

fn node_batch_diagnostics(ir: &WorkflowIr, node: &NodeDefinition) -> Vec<Diagnostic> {
    let Some(batch) = &node.batch else {
        return Vec::new();
    };
    let invalid = |msg: String| {
        Diagnostic::error(DiagnosticKind::InvalidBatchConfig, msg)
            .at_node(&node.id)
            .at_param("batch")
    };

    let mut out = Vec::new();
    if !is_identifier(&batch.alias) || is_reserved_key(&batch.alias) {
        out.push(invalid(format!(
            "batch alias '{}' must be an identifier and not a reserved key",
            batch.alias
        )));
    } else if ir.node(&batch.alias).is_some() {
        out.push(invalid(format!(
            "batch alias '{}' collides with a node id",
            batch.alias
        )));
    } else if ir.inputs.contains_key(&batch.alias) {
        out.push(invalid(format!(
            "batch alias '{}' collides with a workflow input",
            batch.alias
        )));
    }
    if Template::parse(&batch.items).whole_reference().is_none() {
        out.push(invalid(format!(
            "batch items must be a single reference like '${{node.field}}', got '{}'",
            batch.items
        )));
    }
    if let Some(limit) = batch.max_concurrent {
        if !MAX_CONCURRENT_RANGE.contains(&limit) {
            out.push(invalid(format!(
                "batch max_concurrent must be between {} and {}, got {limit}",
                MAX_CONCURRENT_RANGE.start(),
                MAX_CONCURRENT_RANGE.end()
            )));
        }
    }
    out
}

pub(crate) fn cycle_diagnostic(dag: &WorkflowDag) -> Option<Diagnostic> {
    dag.find_cycle().map(|node| {
        Diagnostic::error(
            DiagnosticKind::Cycle,
            format!("cycle detected involving node '{node}'"),
        )
        .at_node(node)
    })
}

fn is_valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
