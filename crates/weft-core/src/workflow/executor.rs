//! Flow executor: runs a compiled workflow node by node.
//!
//! Execution is sequential. Starting at the start node, each node's composed
//! chain runs against the shared store and reports an action label; the
//! routing table picks the next node. The run ends when a node has no
//! outgoing edges, or halts when its action matches no edge.
//!
//! A run-level timeout and an external [`CancellationToken`] both abort the
//! in-flight node. Partial progress stays in the store.

use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use weft_types::diagnostic::{Diagnostic, DiagnosticKind};
use weft_types::interface::TypeDescriptor;

use super::compiler::{CompiledWorkflow, Route};
use super::instrument::init_execution;
use super::node::NodeError;
use super::store::{SharedStore, Store};
use super::typecheck::{describe_value, is_compatible, type_of_value};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Run-level failures.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("missing required input '{0}'")]
    MissingInput(String),

    #[error("input '{name}' expects {expected}, got {actual}")]
    InvalidInput {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("node '{node_id}' failed: {source}")]
    NodeFailed {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("run timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("node '{node_id}' reported action '{action}' with no matching edge")]
    UnmatchedAction { node_id: String, action: String },
}

impl FlowError {
    /// The node the failure originated from, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            FlowError::NodeFailed { node_id, .. } | FlowError::UnmatchedAction { node_id, .. } => {
                Some(node_id)
            }
            _ => None,
        }
    }

    pub fn failing_param(&self) -> Option<&str> {
        match self {
            FlowError::NodeFailed { source, .. } => source.failing_param(),
            _ => None,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        matches!(self, FlowError::NodeFailed { source, .. } if source.retries_exhausted())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The last node had no outgoing edges.
    Completed,
    /// A node reported an action with no matching edge.
    Halted { node_id: String, action: String },
}

/// Summary of a run whose store the caller owns.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Node ids in execution order.
    pub executed: Vec<String>,
}

/// A finished run together with its final store.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub executed: Vec<String>,
    pub store: SharedStore,
}

impl RunOutcome {
    /// Run-time warnings recorded in `__warnings__`.
    pub fn warnings(&self) -> Vec<Value> {
        self.store.ledger().warnings()
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl CompiledWorkflow {
    /// Run on a fresh store.
    pub async fn execute(&self, inputs: Map<String, Value>) -> Result<RunOutcome, FlowError> {
        let mut store = SharedStore::new();
        let report = self
            .run_with_store(&mut store, inputs, &CancellationToken::new())
            .await?;
        Ok(RunOutcome {
            run_id: report.run_id,
            status: report.status,
            executed: report.executed,
            store,
        })
    }

    /// Run on a caller-owned store, which keeps whatever the run wrote even
    /// when it fails.
    pub async fn run_with_store(
        &self,
        store: &mut SharedStore,
        inputs: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, FlowError> {
        self.apply_inputs(store, inputs)?;

        let run_id = Uuid::now_v7();
        init_execution(store, run_id, Utc::now());
        let span = tracing::info_span!("workflow", workflow = %self.name, run_id = %run_id);

        let mut executed = Vec::new();
        let walk = self.walk(store, cancel, &mut executed).instrument(span);
        let result = match self.config.run_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), walk)
                .await
                .unwrap_or(Err(FlowError::Timeout { secs })),
            None => walk.await,
        };

        match &result {
            Ok(status) => {
                tracing::info!(run_id = %run_id, nodes = executed.len(), status = ?status, "workflow finished");
            }
            Err(err) => {
                tracing::warn!(run_id = %run_id, nodes = executed.len(), error = %err, "workflow failed");
            }
        }
        Ok(RunReport {
            run_id,
            status: result?,
            executed,
        })
    }

    async fn walk(
        &self,
        store: &mut SharedStore,
        cancel: &CancellationToken,
        executed: &mut Vec<String>,
    ) -> Result<RunStatus, FlowError> {
        let mut current = self.start.as_str();
        loop {
            let node = self.nodes.get(current).ok_or_else(|| FlowError::NodeFailed {
                node_id: current.to_string(),
                source: NodeError::Configuration("node was not compiled".into()),
            })?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FlowError::Cancelled),
                outcome = node.run(store) => outcome,
            };
            let action = outcome.map_err(|source| FlowError::NodeFailed {
                node_id: current.to_string(),
                source,
            })?;
            executed.push(current.to_string());

            match self.routes.next(current, &action) {
                Route::Next(next) => current = next,
                Route::Terminal => return Ok(RunStatus::Completed),
                Route::Unmatched => return self.unmatched(store, current, action),
            }
        }
    }

    fn unmatched(&self, store: &SharedStore, node_id: &str, action: String) -> Result<RunStatus, FlowError> {
        if self.config.strict_routing {
            return Err(FlowError::UnmatchedAction {
                node_id: node_id.to_string(),
                action,
            });
        }
        let expected = self.routes.actions(node_id).join(", ");
        tracing::warn!(node_id, action = %action, expected = %expected, "no edge for action, halting");
        store.ledger().push_warning(
            &Diagnostic::warning(
                DiagnosticKind::UnmatchedAction,
                format!("action '{action}' has no matching edge (edges: {expected})"),
            )
            .at_node(node_id),
        );
        Ok(RunStatus::Halted {
            node_id: node_id.to_string(),
            action,
        })
    }

    /// Check declared inputs, apply defaults, and write every input to the root.
    fn apply_inputs(&self, store: &mut SharedStore, mut inputs: Map<String, Value>) -> Result<(), FlowError> {
        for (name, spec) in &self.inputs {
            let value = match inputs.remove(name).or_else(|| spec.default.clone()) {
                Some(value) => value,
                None if spec.required => return Err(FlowError::MissingInput(name.clone())),
                None => continue,
            };
            if let Some(expected) = spec.input_type.as_deref().and_then(|t| t.parse::<TypeDescriptor>().ok()) {
                if !input_matches(&value, &expected) {
                    return Err(FlowError::InvalidInput {
                        name: name.clone(),
                        expected: expected.to_string(),
                        actual: describe_value(&value),
                    });
                }
            }
            store.set(name, value);
        }
        // Undeclared inputs are passed through for extra template roots.
        for (name, value) in inputs {
            store.set(&name, value);
        }
        Ok(())
    }
}

/// Whether an input value fits its declared type. JSON text is accepted for
/// list and dict inputs, since templates parse it on access.
fn input_matches(value: &Value, expected: &TypeDescriptor) -> bool {
    if value.is_null() || is_compatible(&type_of_value(value), expected) {
        return true;
    }
    match value {
        Value::String(text) if !expected.is_str_like() => serde_json::from_str::<Value>(text)
            .map(|parsed| !parsed.is_string() && is_compatible(&type_of_value(&parsed), expected))
            .unwrap_or(false),
        _ => false,
    }
}
