//! Structured diagnostics produced by compilation and execution.
//!
//! Diagnostics are records, not rendered text: a CLI or editor integration
//! decides how to show them.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// What a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Schema,
    Cycle,
    UnknownNodeType,
    InvalidBatchConfig,
    UnknownReference,
    ReferenceOrder,
    TypeMismatch,
    UnreachableNode,
    UnresolvedReference,
    UnmatchedAction,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Schema => "schema",
            DiagnosticKind::Cycle => "cycle",
            DiagnosticKind::UnknownNodeType => "unknown_node_type",
            DiagnosticKind::InvalidBatchConfig => "invalid_batch_config",
            DiagnosticKind::UnknownReference => "unknown_reference",
            DiagnosticKind::ReferenceOrder => "reference_order",
            DiagnosticKind::TypeMismatch => "type_mismatch",
            DiagnosticKind::UnreachableNode => "unreachable_node",
            DiagnosticKind::UnresolvedReference => "unresolved_reference",
            DiagnosticKind::UnmatchedAction => "unmatched_action",
        }
    }
}

/// One compile-time or run-time finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    pub message: String,
    /// Concrete alternatives known to be valid at this position.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            node_id: None,
            param: None,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    pub fn at_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn at_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.node_id, &self.param) {
            (Some(node), Some(param)) => write!(f, "[{}] {node}.{param}: ", self.kind.as_str())?,
            (Some(node), None) => write!(f, "[{}] {node}: ", self.kind.as_str())?,
            _ => write!(f, "[{}] ", self.kind.as_str())?,
        }
        write!(f, "{}", self.message)?;
        if !self.suggestions.is_empty() {
            write!(f, " (try: {})", self.suggestions.join(", "))?;
        }
        Ok(())
    }
}
