//! Compiled parameter templates and the template layer.
//!
//! Params are parsed into a [`ParamTemplate`] tree once at compile time.
//! Each attempt renders the tree against the (namespaced) store.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use weft_types::config::ResolutionMode;
use weft_types::diagnostic::{Diagnostic, DiagnosticKind};

use super::node::{Executable, NodeError, NodeRunner, ParamSource, Params, ResolvedParams};
use super::store::{Lookup, Store};
use super::template::{Template, TemplateError};

/// A param value with its templates pre-parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamTemplate {
    /// A value containing no references.
    Literal(Value),
    Template(Template),
    Array(Vec<ParamTemplate>),
    Object(Vec<(String, ParamTemplate)>),
}

impl ParamTemplate {
    pub fn compile(value: &Value) -> Self {
        match value {
            Value::String(text) => {
                let template = Template::parse(text);
                if template.has_references() {
                    ParamTemplate::Template(template)
                } else {
                    ParamTemplate::Literal(value.clone())
                }
            }
            Value::Array(items) => {
                let compiled: Vec<_> = items.iter().map(Self::compile).collect();
                if compiled.iter().all(|c| matches!(c, ParamTemplate::Literal(_))) {
                    ParamTemplate::Literal(value.clone())
                } else {
                    ParamTemplate::Array(compiled)
                }
            }
            Value::Object(fields) => {
                let compiled: Vec<_> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::compile(v)))
                    .collect();
                if compiled.iter().all(|(_, c)| matches!(c, ParamTemplate::Literal(_))) {
                    ParamTemplate::Literal(value.clone())
                } else {
                    ParamTemplate::Object(compiled)
                }
            }
            other => ParamTemplate::Literal(other.clone()),
        }
    }

    /// Every template in the tree, keyed by dotted param path.
    pub fn templates<'t>(&'t self, path: &str, out: &mut Vec<(String, &'t Template)>) {
        match self {
            ParamTemplate::Literal(_) => {}
            ParamTemplate::Template(template) => out.push((path.to_string(), template)),
            ParamTemplate::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.templates(&format!("{path}[{i}]"), out);
                }
            }
            ParamTemplate::Object(fields) => {
                for (key, field) in fields {
                    item_path(path, key, |p| field.templates(p, out));
                }
            }
        }
    }

    /// Render against a context. Unresolved interpolations are collected in
    /// `unresolved` when `lenient` is set.
    pub fn render<C: Lookup + ?Sized>(
        &self,
        context: &C,
        lenient: bool,
        unresolved: &mut Vec<String>,
    ) -> Result<Value, TemplateError> {
        match self {
            ParamTemplate::Literal(value) => Ok(value.clone()),
            ParamTemplate::Template(template) => {
                let rendered = template.render(context, lenient)?;
                unresolved.extend(rendered.unresolved);
                Ok(rendered.value)
            }
            ParamTemplate::Array(items) => items
                .iter()
                .map(|item| item.render(context, lenient, unresolved))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            ParamTemplate::Object(fields) => {
                let mut map = Map::new();
                for (key, field) in fields {
                    map.insert(key.clone(), field.render(context, lenient, unresolved)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

fn item_path<R>(parent: &str, key: &str, f: impl FnOnce(&str) -> R) -> R {
    if parent.is_empty() {
        f(key)
    } else {
        f(&format!("{parent}.{key}"))
    }
}

// ---------------------------------------------------------------------------
// Compiled params
// ---------------------------------------------------------------------------

/// A node's params, compiled once.
#[derive(Debug, Clone)]
pub struct CompiledParams {
    node_id: String,
    params: Vec<(String, ParamTemplate)>,
    mode: ResolutionMode,
}

impl CompiledParams {
    pub fn compile(node_id: impl Into<String>, params: &Map<String, Value>, mode: ResolutionMode) -> Self {
        Self {
            node_id: node_id.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.clone(), ParamTemplate::compile(v)))
                .collect(),
            mode,
        }
    }

    /// Every template with its dotted param path.
    pub fn templates(&self) -> Vec<(String, &Template)> {
        let mut out = Vec::new();
        for (name, param) in &self.params {
            param.templates(name, &mut out);
        }
        out
    }

    /// The template of a param whose whole value is a single template.
    pub fn top_level(&self, name: &str) -> Option<&Template> {
        self.params.iter().find_map(|(k, p)| match p {
            ParamTemplate::Template(t) if k == name => Some(t),
            _ => None,
        })
    }
}

impl ParamSource for CompiledParams {
    fn resolve(&self, store: &dyn Store) -> Result<ResolvedParams, NodeError> {
        let lenient = self.mode == ResolutionMode::Permissive;
        let mut resolved = ResolvedParams::default();
        for (name, param) in &self.params {
            let mut unresolved = Vec::new();
            let value = param
                .render(store, lenient, &mut unresolved)
                .map_err(|source| NodeError::Template {
                    param: name.clone(),
                    source,
                })?;
            resolved.warnings.extend(unresolved.into_iter().map(|reference| {
                Diagnostic::warning(
                    DiagnosticKind::UnresolvedReference,
                    format!("unresolved reference '${{{reference}}}' left as text"),
                )
                .at_node(&self.node_id)
                .at_param(name)
            }));
            resolved.params.insert(name.clone(), value);
        }
        Ok(resolved)
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// Innermost composed layer: renders params and hands off to the runner.
pub struct TemplatedNode {
    params: CompiledParams,
    runner: NodeRunner,
}

impl TemplatedNode {
    pub fn new(params: CompiledParams, runner: NodeRunner) -> Self {
        Self { params, runner }
    }
}

impl Executable for TemplatedNode {
    fn run<'a>(&'a self, store: &'a mut dyn Store) -> BoxFuture<'a, Result<String, NodeError>> {
        Box::pin(self.runner.run(store, &self.params))
    }
}
