//! Workflow compiler: validates an IR against a registry and composes each
//! node's execution chain.
//!
//! Validation runs in stages. Schema and batch-config errors stop compilation
//! before graph analysis; a cycle stops it before reference validation, since
//! "upstream" is meaningless on a cyclic graph. Within the later stages every
//! problem is collected so one compile reports everything.
//!
//! Each node is composed outermost to innermost as
//! `InstrumentedNode -> BatchNode? -> NamespacedNode -> TemplatedNode -> NodeRunner`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use weft_types::config::RuntimeConfig;
use weft_types::diagnostic::{Diagnostic, DiagnosticKind};
use weft_types::interface::NodeInterface;
use weft_types::workflow::{DEFAULT_ACTION, EdgeDefinition, NodeDefinition, WorkflowInput, WorkflowIr};

use super::batch::{BatchNode, BatchSettings};
use super::dag::WorkflowDag;
use super::definition::{
    MAX_CONCURRENT_RANGE, batch_diagnostics, cycle_diagnostic, schema_diagnostics,
};
use super::instrument::InstrumentedNode;
use super::namespace::NamespacedNode;
use super::node::{Executable, NodeRunner};
use super::params::{CompiledParams, TemplatedNode};
use super::registry::Registry;
use super::retry::RetryPolicy;
use super::template::Template;
use super::typecheck::MAX_SUGGESTIONS;
use super::validator::ReferenceValidator;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Compilation failed. Carries every diagnostic found, warnings included.
#[derive(Debug, Error)]
#[error("workflow failed to compile with {} error(s): {}", error_count(.diagnostics), first_error(.diagnostics))]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

fn first_error(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .find(|d| d.is_error())
        .map(ToString::to_string)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Where control goes after a node reports an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Next(&'a str),
    /// The node has no outgoing edges.
    Terminal,
    /// The node has outgoing edges but none for this action.
    Unmatched,
}

/// `(from, action) -> to`, ordered for deterministic comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<(String, String), String>,
}

impl RoutingTable {
    pub fn from_edges(edges: &[EdgeDefinition]) -> Self {
        let routes = edges
            .iter()
            .map(|e| ((e.from.clone(), e.action.clone()), e.to.clone()))
            .collect();
        Self { routes }
    }

    /// Exact match first, then the node's default edge.
    pub fn next(&self, node_id: &str, action: &str) -> Route<'_> {
        let lookup = |action: &str| self.routes.get(&(node_id.to_string(), action.to_string()));
        if let Some(to) = lookup(action).or_else(|| lookup(DEFAULT_ACTION)) {
            return Route::Next(to);
        }
        if self.routes.keys().any(|(from, _)| from == node_id) {
            Route::Unmatched
        } else {
            Route::Terminal
        }
    }

    /// Action labels with an outgoing edge from `node_id`.
    pub fn actions(&self, node_id: &str) -> Vec<&str> {
        self.routes
            .keys()
            .filter(|(from, _)| from == node_id)
            .map(|(_, action)| action.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Compiled workflow
// ---------------------------------------------------------------------------

/// An executable workflow. Immutable; run it any number of times.
pub struct CompiledWorkflow {
    pub(crate) name: String,
    pub(crate) start: String,
    pub(crate) nodes: BTreeMap<String, Box<dyn Executable>>,
    pub(crate) routes: RoutingTable,
    pub(crate) inputs: BTreeMap<String, WorkflowInput>,
    pub(crate) config: RuntimeConfig,
    pub(crate) warnings: Vec<Diagnostic>,
}

impl CompiledWorkflow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Compile-time warnings (unreachable nodes).
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

pub struct WorkflowCompiler {
    registry: Arc<dyn Registry>,
    config: RuntimeConfig,
    extra_roots: BTreeSet<String>,
}

/// Everything the analysis stages produce for the build stage.
struct Analysis {
    diagnostics: Vec<Diagnostic>,
    params: BTreeMap<String, CompiledParams>,
}

impl WorkflowCompiler {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            config: RuntimeConfig::default(),
            extra_roots: BTreeSet::new(),
        }
    }

    /// Use `config` for every compiled workflow. An out-of-range
    /// `batch_max_concurrent` is clamped into [`MAX_CONCURRENT_RANGE`].
    pub fn with_config(mut self, mut config: RuntimeConfig) -> Self {
        let configured = config.batch_max_concurrent;
        let limit = configured.clamp(*MAX_CONCURRENT_RANGE.start(), *MAX_CONCURRENT_RANGE.end());
        if limit != configured {
            tracing::warn!(configured, limit, "batch_max_concurrent out of range, clamped");
            config.batch_max_concurrent = limit;
        }
        self.config = config;
        self
    }

    /// Root names the caller will place in the store before running, so
    /// templates may reference them.
    pub fn with_extra_roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_roots.extend(roots.into_iter().map(Into::into));
        self
    }

    /// Run every validation stage without building anything.
    pub fn check(&self, ir: &WorkflowIr) -> Vec<Diagnostic> {
        self.analyze(ir).diagnostics
    }

    pub fn compile(&self, ir: &WorkflowIr) -> Result<CompiledWorkflow, CompileError> {
        let Analysis { mut diagnostics, mut params } = self.analyze(ir);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(CompileError { diagnostics });
        }

        let mut nodes = BTreeMap::new();
        for def in &ir.nodes {
            let compiled = params
                .remove(&def.id)
                .unwrap_or_else(|| CompiledParams::compile(&def.id, &def.params, self.config.template_resolution_mode));
            match self.build_chain(def, compiled) {
                Ok(chain) => {
                    nodes.insert(def.id.clone(), chain);
                }
                Err(diagnostic) => diagnostics.push(diagnostic),
            }
        }
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(CompileError { diagnostics });
        }

        let Some(start) = ir.start_node_id() else {
            return Err(CompileError {
                diagnostics: vec![Diagnostic::error(
                    DiagnosticKind::Schema,
                    "workflow has no start node",
                )],
            });
        };

        let workflow = CompiledWorkflow {
            name: ir.display_name().to_string(),
            start: start.to_string(),
            nodes,
            routes: RoutingTable::from_edges(&ir.edges),
            inputs: ir.inputs.clone(),
            config: self.config.clone(),
            warnings: diagnostics,
        };
        tracing::debug!(
            workflow = %workflow.name,
            nodes = workflow.nodes.len(),
            routes = workflow.routes.len(),
            warnings = workflow.warnings.len(),
            "workflow compiled"
        );
        Ok(workflow)
    }

    fn analyze(&self, ir: &WorkflowIr) -> Analysis {
        let mut diagnostics = schema_diagnostics(ir);
        diagnostics.extend(batch_diagnostics(ir));
        if !diagnostics.is_empty() {
            return Analysis {
                diagnostics,
                params: BTreeMap::new(),
            };
        }

        let dag = WorkflowDag::build(ir);
        if let Some(cycle) = cycle_diagnostic(&dag) {
            return Analysis {
                diagnostics: vec![cycle],
                params: BTreeMap::new(),
            };
        }

        let mut interfaces: BTreeMap<String, NodeInterface> = BTreeMap::new();
        for def in &ir.nodes {
            match self.registry.lookup(&def.node_type) {
                Some(entry) => {
                    interfaces.insert(def.id.clone(), entry.interface.clone());
                }
                None => diagnostics.push(
                    Diagnostic::error(
                        DiagnosticKind::UnknownNodeType,
                        format!("unknown node type '{}'", def.node_type),
                    )
                    .at_node(&def.id)
                    .with_suggestions(self.similar_types(&def.node_type)),
                ),
            }
        }

        let params: BTreeMap<String, CompiledParams> = ir
            .nodes
            .iter()
            .map(|def| {
                (
                    def.id.clone(),
                    CompiledParams::compile(&def.id, &def.params, self.config.template_resolution_mode),
                )
            })
            .collect();

        let validator = ReferenceValidator {
            ir,
            dag: &dag,
            interfaces: &interfaces,
            extra_roots: &self.extra_roots,
        };
        diagnostics.extend(validator.validate(&params));

        if let Some(start) = ir.start_node_id() {
            let reachable = dag.reachable_from(start);
            for def in ir.nodes.iter().filter(|d| !reachable.contains(&d.id)) {
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::UnreachableNode,
                        format!("node is not reachable from start node '{start}'"),
                    )
                    .at_node(&def.id),
                );
            }
        }

        Analysis { diagnostics, params }
    }

    fn build_chain(&self, def: &NodeDefinition, params: CompiledParams) -> Result<Box<dyn Executable>, Diagnostic> {
        let config_error = |message: String| {
            Diagnostic::error(DiagnosticKind::Schema, message).at_node(&def.id)
        };
        let entry = self
            .registry
            .lookup(&def.node_type)
            .ok_or_else(|| config_error(format!("unknown node type '{}'", def.node_type)))?;
        let node = (entry.factory)(def).map_err(|e| config_error(e.to_string()))?;

        let runner = NodeRunner::new(&def.id, node)
            .with_policy(RetryPolicy::resolve(def.retry.as_ref(), &self.config))
            .with_fallback(def.fallback.clone());
        let templated: Box<dyn Executable> = Box::new(TemplatedNode::new(params, runner));
        let mut chain: Box<dyn Executable> = Box::new(NamespacedNode::new(&def.id, templated));

        if let Some(batch) = &def.batch {
            let items = Template::parse(&batch.items)
                .whole_reference()
                .cloned()
                .ok_or_else(|| config_error(format!("batch items '{}' is not a single reference", batch.items)))?;
            let concurrency = batch
                .parallel
                .then(|| batch.max_concurrent.unwrap_or(self.config.batch_max_concurrent));
            let settings = BatchSettings {
                items,
                alias: batch.alias.clone(),
                error_handling: batch.error_handling,
                concurrency,
            };
            chain = Box::new(BatchNode::new(&def.id, settings, chain));
        }

        Ok(Box::new(InstrumentedNode::new(&def.id, &def.node_type, chain)))
    }

    /// Registered types that look like a misspelling of `wanted`.
    fn similar_types(&self, wanted: &str) -> Vec<String> {
        let wanted = wanted.to_lowercase();
        self.registry
            .node_types()
            .into_iter()
            .filter(|known| {
                let known = known.to_lowercase();
                known.contains(&wanted)
                    || wanted.contains(&known)
                    || common_prefix(&known, &wanted) >= 3
            })
            .take(MAX_SUGGESTIONS)
            .collect()
    }
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
