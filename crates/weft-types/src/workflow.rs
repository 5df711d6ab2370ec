//! Workflow IR types for weft.
//!
//! `WorkflowIr` is the canonical graph description: planners, files, and
//! programmatic builders all produce it, and the compiler consumes it. It is
//! a plain serializable document -- nodes, edges, declared inputs -- with no
//! behaviour attached.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action label used when an edge does not name one.
pub const DEFAULT_ACTION: &str = "default";

/// Batch alias used when a batch config does not name one.
pub const DEFAULT_BATCH_ALIAS: &str = "item";

/// Current IR version written by `WorkflowIr::new`.
pub const IR_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Workflow IR
// ---------------------------------------------------------------------------

/// The canonical workflow graph description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowIr {
    /// IR format version.
    #[serde(default = "default_ir_version")]
    pub ir_version: String,
    /// Optional workflow name, used in logs and diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared workflow inputs, referenced from templates as `${name}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, WorkflowInput>,
    /// Steps of the workflow. The first node is the entry point unless
    /// `start_node` says otherwise.
    pub nodes: Vec<NodeDefinition>,
    /// Routing edges between nodes.
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    /// Explicit entry node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node: Option<String>,
}

fn default_ir_version() -> String {
    IR_VERSION.to_string()
}

impl WorkflowIr {
    /// Create an IR from nodes and edges with no declared inputs.
    pub fn new(nodes: Vec<NodeDefinition>, edges: Vec<EdgeDefinition>) -> Self {
        Self {
            ir_version: default_ir_version(),
            name: None,
            description: None,
            inputs: BTreeMap::new(),
            nodes,
            edges,
            start_node: None,
        }
    }

    /// Look up a node by ID.
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The entry node ID: `start_node` if set, otherwise the first node.
    pub fn start_node_id(&self) -> Option<&str> {
        self.start_node
            .as_deref()
            .or_else(|| self.nodes.first().map(|n| n.id.as_str()))
    }

    /// Display name for logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

/// A declared workflow input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WorkflowInput {
    /// Declared type string (e.g. `"str"`, `"list[dict]"`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    /// Whether the caller must supply a value (default true).
    #[serde(default = "default_true")]
    pub required: bool,
    /// Value used when the caller omits the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Nodes and edges
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NodeDefinition {
    /// Node ID, unique within the workflow. Also the node's namespace key.
    pub id: String,
    /// Registered node type name.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Parameters: literal values or `${...}` template strings, nested freely.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Per-item iteration over a resolved list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfig>,
    /// Retry budget for this node (falls back to the runtime defaults).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Execution result used when every attempt fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
    /// Free-text description of what the node is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl NodeDefinition {
    /// Create a node with no params, batch, or retry settings.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            params: Map::new(),
            batch: None,
            retry: None,
            fallback: None,
            purpose: None,
        }
    }

    /// Builder-style param setter.
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Builder-style batch setter.
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Builder-style retry setter.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// A routing edge. The target runs when the source reports `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

impl EdgeDefinition {
    /// Unconditional edge.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            action: default_action(),
        }
    }

    /// Edge taken only for a specific action label.
    pub fn on(from: impl Into<String>, action: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            action: action.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch configuration
// ---------------------------------------------------------------------------

/// Per-item iteration settings for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Whole-value template reference that must resolve to a list.
    pub items: String,
    /// Name under which each item is exposed during its iteration.
    #[serde(rename = "as", default = "default_batch_alias")]
    pub alias: String,
    /// Failure policy for individual items.
    #[serde(default)]
    pub error_handling: ErrorHandling,
    /// Run items concurrently (results are still reported in input order).
    #[serde(default)]
    pub parallel: bool,
    /// Upper bound on in-flight items when `parallel` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

fn default_batch_alias() -> String {
    DEFAULT_BATCH_ALIAS.to_string()
}

impl BatchConfig {
    /// Sequential, fail-fast batch over `items` using the default alias.
    pub fn over(items: impl Into<String>) -> Self {
        Self {
            items: items.into(),
            alias: default_batch_alias(),
            error_handling: ErrorHandling::default(),
            parallel: false,
            max_concurrent: None,
        }
    }
}

/// What happens when one batch item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// The first failure fails the whole node.
    #[default]
    FailFast,
    /// Failures are recorded per item and iteration continues.
    Continue,
}

// ---------------------------------------------------------------------------
// Retry configuration
// ---------------------------------------------------------------------------

/// Retry configuration for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total number of attempts (1 = no retry).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed wait between attempts, in milliseconds.
    #[serde(default)]
    pub wait_ms: u64,
}

fn default_max_retries() -> u32 {
    1
}

/// JSON Schema for `WorkflowIr` documents.
pub fn workflow_schema() -> schemars::Schema {
    schemars::schema_for!(WorkflowIr)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
