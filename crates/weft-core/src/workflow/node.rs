//! Node lifecycle contract and the retrying execution core.
//!
//! Every node type implements [`Node`]: `prep` reads what it needs from the
//! store, `exec` does the work (and may be retried), `post` writes outputs and
//! picks the action label used for routing. Nodes must behave identically
//! against the real store, a namespace proxy, or an isolated batch fork.
//!
//! [`Executable`] is the contract between composed layers; [`NodeRunner`] is
//! the innermost one that drives the lifecycle.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;
use weft_types::diagnostic::Diagnostic;
use weft_types::workflow::DEFAULT_ACTION;

use super::retry::{RetryHandler, RetryPolicy};
use super::store::Store;
use super::template::TemplateError;

/// Resolved parameters handed to a node's `prep`.
pub type Params = Map<String, Value>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("parameter '{param}': {source}")]
    Template {
        param: String,
        #[source]
        source: TemplateError,
    },

    #[error("batch items must resolve to a list, got {actual}")]
    BatchItemsNotList { actual: String },

    #[error("batch item {index} failed: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<NodeError>,
    },

    #[error("failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<NodeError>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl NodeError {
    pub fn execution(message: impl Into<String>) -> Self {
        NodeError::Execution(message.into())
    }

    /// The parameter whose template failed, looking through wrappers.
    pub fn failing_param(&self) -> Option<&str> {
        match self {
            NodeError::Template { param, .. } => Some(param),
            NodeError::BatchItem { source, .. } | NodeError::RetriesExhausted { source, .. } => {
                source.failing_param()
            }
            _ => None,
        }
    }

    /// Whether retries were exhausted somewhere in the chain.
    pub fn retries_exhausted(&self) -> bool {
        match self {
            NodeError::RetriesExhausted { .. } => true,
            NodeError::BatchItem { source, .. } => source.retries_exhausted(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Node trait
// ---------------------------------------------------------------------------

/// A unit of work with a prepare / execute / finalize lifecycle.
///
/// Uses RPITIT for `exec`; [`NodeDyn`] is the object-safe form used by the
/// runtime.
pub trait Node: Send + Sync {
    /// Build the execution input. Defaults to the resolved params as an object.
    fn prep(&self, params: &Params, _store: &dyn Store) -> Result<Value, NodeError> {
        Ok(Value::Object(params.clone()))
    }

    /// Do the work. Called once per attempt with the same input.
    fn exec(&self, input: &Value) -> impl Future<Output = Result<Value, NodeError>> + Send;

    /// Last-chance value after every attempt failed.
    fn exec_fallback(&self, _input: &Value, _error: &NodeError) -> Option<Value> {
        None
    }

    /// Write outputs and return the action label.
    ///
    /// By default each field of an object result is written to the store and
    /// any other result is stored under `result`.
    fn post(&self, store: &mut dyn Store, _input: &Value, output: Value) -> Result<String, NodeError> {
        write_output(store, output);
        Ok(DEFAULT_ACTION.to_string())
    }
}

/// Default output write shared by nodes that override `post`.
pub fn write_output(store: &mut dyn Store, output: Value) {
    match output {
        Value::Object(fields) => {
            for (key, value) in fields {
                store.set(&key, value);
            }
        }
        Value::Null => {}
        other => store.set("result", other),
    }
}

/// Object-safe version of [`Node`] with a boxed `exec` future.
///
/// A blanket implementation is provided for all types implementing `Node`.
pub trait NodeDyn: Send + Sync {
    fn prep(&self, params: &Params, store: &dyn Store) -> Result<Value, NodeError>;

    fn exec_boxed<'a>(&'a self, input: &'a Value) -> BoxFuture<'a, Result<Value, NodeError>>;

    fn exec_fallback(&self, input: &Value, error: &NodeError) -> Option<Value>;

    fn post(&self, store: &mut dyn Store, input: &Value, output: Value) -> Result<String, NodeError>;
}

impl<T: Node> NodeDyn for T {
    fn prep(&self, params: &Params, store: &dyn Store) -> Result<Value, NodeError> {
        Node::prep(self, params, store)
    }

    fn exec_boxed<'a>(&'a self, input: &'a Value) -> BoxFuture<'a, Result<Value, NodeError>> {
        Box::pin(self.exec(input))
    }

    fn exec_fallback(&self, input: &Value, error: &NodeError) -> Option<Value> {
        Node::exec_fallback(self, input, error)
    }

    fn post(&self, store: &mut dyn Store, input: &Value, output: Value) -> Result<String, NodeError> {
        Node::post(self, store, input, output)
    }
}

// ---------------------------------------------------------------------------
// Layer contract
// ---------------------------------------------------------------------------

/// One layer of a compiled node's execution chain.
///
/// Returns the action label reported by the node.
pub trait Executable: Send + Sync {
    fn run<'a>(&'a self, store: &'a mut dyn Store) -> BoxFuture<'a, Result<String, NodeError>>;
}

/// Params for one attempt and the warnings produced while resolving them.
#[derive(Debug, Clone, Default)]
pub struct ResolvedParams {
    pub params: Params,
    pub warnings: Vec<Diagnostic>,
}

/// Produces the resolved params for one attempt.
///
/// Warnings are returned rather than recorded; the runner publishes those of
/// the final attempt only.
pub trait ParamSource: Send + Sync {
    fn resolve(&self, store: &dyn Store) -> Result<ResolvedParams, NodeError>;
}

impl ParamSource for Params {
    fn resolve(&self, _store: &dyn Store) -> Result<ResolvedParams, NodeError> {
        Ok(ResolvedParams {
            params: self.clone(),
            warnings: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// NodeRunner
// ---------------------------------------------------------------------------

/// The base lifecycle every composed chain delegates to.
///
/// Each attempt resolves params, runs `prep`, then `exec`. A failure in any
/// of the three consumes one attempt. On exhaustion the node's own
/// `exec_fallback` is consulted, then the configured fallback value.
pub struct NodeRunner {
    node_id: String,
    node: Arc<dyn NodeDyn>,
    policy: RetryPolicy,
    fallback: Option<Value>,
}

impl NodeRunner {
    pub fn new(node_id: impl Into<String>, node: Arc<dyn NodeDyn>) -> Self {
        Self {
            node_id: node_id.into(),
            node,
            policy: RetryPolicy::ONCE,
            fallback: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fallback(mut self, fallback: Option<Value>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn run(
        &self,
        store: &mut dyn Store,
        params: &dyn ParamSource,
    ) -> Result<String, NodeError> {
        let mut attempt = 0;
        let mut warnings = Vec::new();

        let (input, output) = loop {
            attempt += 1;
            let prepared = params.resolve(&*store).and_then(|resolved| {
                warnings = resolved.warnings;
                self.node.prep(&resolved.params, &*store)
            });
            let (input, result) = match prepared {
                Ok(input) => {
                    let result = self.node.exec_boxed(&input).await;
                    (input, result)
                }
                Err(err) => (Value::Null, Err(err)),
            };

            let err = match result {
                Ok(output) => break (input, output),
                Err(err) => err,
            };

            if RetryHandler::should_retry(&self.policy, attempt) {
                tracing::warn!(
                    node_id = %self.node_id,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    error = %err,
                    "node attempt failed, retrying"
                );
                RetryHandler::backoff(&self.policy).await;
                continue;
            }

            self.publish(&*store, std::mem::take(&mut warnings));
            if let Some(value) = self.node.exec_fallback(&input, &err) {
                tracing::info!(node_id = %self.node_id, attempts = attempt, "using node fallback");
                break (input, value);
            }
            if let Some(value) = &self.fallback {
                tracing::info!(node_id = %self.node_id, attempts = attempt, "using configured fallback");
                break (input, value.clone());
            }
            return Err(NodeError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        };

        self.publish(&*store, warnings);
        self.node.post(store, &input, output)
    }

    fn publish(&self, store: &dyn Store, warnings: Vec<Diagnostic>) {
        for warning in warnings {
            tracing::warn!(node_id = %self.node_id, param = ?warning.param, "{}", warning.message);
            store.ledger().push_warning(&warning);
        }
    }
}
