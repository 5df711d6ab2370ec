//! Compile-time validation of template references.
//!
//! For every reference in every node's params (and batch `items`):
//!
//! 1. the root must name an upstream node, a declared input, the node's own
//!    batch alias, a reserved key, or a caller-supplied extra root;
//! 2. a referenced node must run before the referencing node;
//! 3. when the referenced node declares outputs, the path must exist in
//!    their declared structure;
//! 4. a top-level param with a declared type is type checked against the
//!    inferred type of its template.
//!
//! Paths that cannot be followed statically are not type checked.

use std::collections::{BTreeMap, BTreeSet};

use weft_types::diagnostic::{Diagnostic, DiagnosticKind};
use weft_types::interface::{NodeInterface, TypeDescriptor};
use weft_types::workflow::{NodeDefinition, WorkflowIr};

use super::dag::WorkflowDag;
use super::params::CompiledParams;
use super::store::is_reserved_key;
use super::template::{Template, TemplatePath};
use super::typecheck::{
    MAX_SUGGESTIONS, RootBinding, find_path_miss, infer_type, is_compatible, matching_paths,
    node_outputs,
};

/// Everything reference validation needs to know about the graph.
pub struct ReferenceValidator<'a> {
    pub ir: &'a WorkflowIr,
    pub dag: &'a WorkflowDag,
    /// Interfaces of nodes whose type is registered, keyed by node id.
    pub interfaces: &'a BTreeMap<String, NodeInterface>,
    pub extra_roots: &'a BTreeSet<String>,
}

impl<'a> ReferenceValidator<'a> {
    /// Validate every node. `params` holds each node's compiled params.
    pub fn validate(&self, params: &BTreeMap<String, CompiledParams>) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for node in &self.ir.nodes {
            self.check_required_params(node, &mut out);
            self.check_batch_items(node, &mut out);
            if let Some(compiled) = params.get(&node.id) {
                self.check_params(node, compiled, &mut out);
            }
        }
        out
    }

    fn check_required_params(&self, node: &NodeDefinition, out: &mut Vec<Diagnostic>) {
        let Some(interface) = self.interfaces.get(&node.id) else {
            return;
        };
        for (name, spec) in &interface.params {
            if spec.required && !node.params.contains_key(name) {
                out.push(
                    Diagnostic::error(
                        DiagnosticKind::Schema,
                        format!("missing required param '{name}'"),
                    )
                    .at_node(&node.id)
                    .at_param(name),
                );
            }
        }
    }

    fn check_batch_items(&self, node: &NodeDefinition, out: &mut Vec<Diagnostic>) {
        let Some(batch) = &node.batch else {
            return;
        };
        let template = Template::parse(&batch.items);
        let Some(path) = template.whole_reference() else {
            return;
        };
        let Some(binding) = self.bind(node, path, "batch.items", false, out) else {
            return;
        };
        if let Some(ty) = infer_type(path, &binding) {
            if !ty.is_list_like() {
                out.push(
                    Diagnostic::error(
                        DiagnosticKind::TypeMismatch,
                        format!("batch items '{}' produces {ty}, expected a list", batch.items),
                    )
                    .at_node(&node.id)
                    .at_param("batch.items")
                    .with_suggestions(self.suggest(&binding, path, &TypeDescriptor::LIST)),
                );
            }
        }
    }

    fn check_params(&self, node: &NodeDefinition, compiled: &CompiledParams, out: &mut Vec<Diagnostic>) {
        for (param, template) in compiled.templates() {
            let bindings: Vec<_> = template
                .references()
                .map(|path| self.bind(node, path, &param, true, out))
                .collect();
            if bindings.iter().any(Option::is_none) {
                continue;
            }
            if compiled.top_level(&param).is_none() {
                continue;
            }
            let Some(expected) = self.expected_type(node, &param) else {
                continue;
            };

            let (inferred, binding) = match template.whole_reference() {
                Some(path) => match bindings.into_iter().flatten().next() {
                    Some(binding) => (infer_type(path, &binding), Some((path, binding))),
                    None => continue,
                },
                None => (Some(TypeDescriptor::STR), None),
            };
            let Some(inferred) = inferred else {
                continue;
            };
            if inferred.is_any() || is_compatible(&inferred, &expected) {
                continue;
            }

            let suggestions = binding
                .map(|(path, binding)| self.suggest(&binding, path, &expected))
                .unwrap_or_default();
            out.push(
                Diagnostic::error(
                    DiagnosticKind::TypeMismatch,
                    format!(
                        "'{}' produces {inferred} but param '{param}' expects {expected}",
                        template.source()
                    ),
                )
                .at_node(&node.id)
                .at_param(&param)
                .with_suggestions(suggestions),
            );
        }
    }

    /// Declared type of a top-level param; `None` when undeclared, `any`, or unparseable.
    fn expected_type(&self, node: &NodeDefinition, param: &str) -> Option<TypeDescriptor> {
        let spec = self.interfaces.get(&node.id)?.params.get(param)?;
        let ty: TypeDescriptor = spec.param_type.parse().ok()?;
        (!ty.is_any()).then_some(ty)
    }

    fn suggest(&self, binding: &RootBinding<'_>, path: &TemplatePath, expected: &TypeDescriptor) -> Vec<String> {
        match binding {
            RootBinding::Node { interface, batched } => {
                matching_paths(path.root(), interface, *batched, expected)
            }
            _ => Vec::new(),
        }
    }

    /// Resolve a reference root. Reports and returns `None` when invalid.
    fn bind(
        &self,
        node: &NodeDefinition,
        path: &TemplatePath,
        param: &str,
        alias_in_scope: bool,
        out: &mut Vec<Diagnostic>,
    ) -> Option<RootBinding<'a>> {
        let root = path.root();
        let diag = |kind, message: String| {
            Diagnostic::error(kind, message).at_node(&node.id).at_param(param)
        };

        if alias_in_scope && node.batch.as_ref().is_some_and(|b| b.alias == root) {
            return Some(RootBinding::BatchItem);
        }
        if is_reserved_key(root) || self.extra_roots.contains(root) {
            return Some(RootBinding::Dynamic);
        }
        if let Some(input) = self.ir.inputs.get(root) {
            let ty = input.input_type.as_deref().and_then(|t| t.parse().ok());
            return Some(RootBinding::Input(ty));
        }
        let Some(target) = self.ir.node(root) else {
            out.push(
                diag(
                    DiagnosticKind::UnknownReference,
                    format!("'${{{path}}}' does not name a node, input, or batch alias"),
                )
                .with_suggestions(self.available_roots(node, alias_in_scope)),
            );
            return None;
        };

        if root == node.id {
            out.push(diag(
                DiagnosticKind::ReferenceOrder,
                format!("'${{{path}}}' references the node's own outputs"),
            ));
            return None;
        }
        if !self.dag.is_upstream(root, &node.id) {
            out.push(
                diag(
                    DiagnosticKind::ReferenceOrder,
                    format!("'${{{path}}}' references node '{root}', which does not run before '{}'", node.id),
                )
                .with_suggestions(self.available_roots(node, alias_in_scope)),
            );
            return None;
        }

        let Some(interface) = self.interfaces.get(root) else {
            return Some(RootBinding::Dynamic);
        };
        let batched = target.batch.is_some();
        let outputs = node_outputs(interface, batched);
        if let Some(miss) = find_path_miss(path, &outputs) {
            let message = if miss.parent == root {
                format!("node '{root}' has no output '{}'", miss.segment)
            } else {
                format!("'${{{path}}}' does not exist: '{}' has no '{}'", miss.parent, miss.segment)
            };
            out.push(
                diag(DiagnosticKind::UnknownReference, message).with_suggestions(miss.suggestions),
            );
            return None;
        }
        Some(RootBinding::Node { interface, batched })
    }

    /// Names a template at this node may legitimately start with.
    fn available_roots(&self, node: &NodeDefinition, alias_in_scope: bool) -> Vec<String> {
        let mut roots: Vec<String> = Vec::new();
        if alias_in_scope {
            if let Some(batch) = &node.batch {
                roots.push(batch.alias.clone());
            }
        }
        roots.extend(self.ir.inputs.keys().cloned());
        roots.extend(self.dag.upstream_of(&node.id));
        roots
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|root| format!("${{{root}}}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use weft_types::config::ResolutionMode;
    use weft_types::workflow::{BatchConfig, EdgeDefinition, WorkflowInput};

    use super::*;
    use crate::workflow::testing::search_interface;
    use weft_types::interface::FieldSpec;

    struct Fixture {
        ir: WorkflowIr,
        interfaces: BTreeMap<String, NodeInterface>,
    }

    impl Fixture {
        fn run(&self) -> Vec<Diagnostic> {
            let dag = WorkflowDag::build(&self.ir);
            let extra = BTreeSet::from(["env".to_string()]);
            let params = self
                .ir
                .nodes
                .iter()
                .map(|n| {
                    (
                        n.id.clone(),
                        CompiledParams::compile(&n.id, &n.params, ResolutionMode::Strict),
                    )
                })
                .collect();
            ReferenceValidator {
                ir: &self.ir,
                dag: &dag,
                interfaces: &self.interfaces,
                extra_roots: &extra,
            }
            .validate(&params)
        }
    }

    fn summarize_interface() -> NodeInterface {
        NodeInterface::default()
            .with_param("text", "str")
            .with_param("limit", "float")
            .with_param("tags", "list")
            .with_output("summary", FieldSpec::of("str"))
    }

    /// search -> summarize, with the given summarize params.
    fn pipeline(summarize: NodeDefinition) -> Fixture {
        let mut ir = WorkflowIr::new(
            vec![
                NodeDefinition::new("search", "search").with_param("query", json!("${topic}")),
                summarize,
            ],
            vec![EdgeDefinition::new("search", "sum")],
        );
        ir.inputs.insert(
            "topic".into(),
            WorkflowInput {
                input_type: Some("str".into()),
                required: true,
                default: None,
                description: None,
            },
        );
        Fixture {
            ir,
            interfaces: BTreeMap::from([
                ("search".to_string(), search_interface()),
                ("sum".to_string(), summarize_interface()),
            ]),
        }
    }

    #[test]
    fn test_valid_references_pass() {
        let fixture = pipeline(
            NodeDefinition::new("sum", "summarize")
                .with_param("text", json!("${search.hits[0].title}"))
                .with_param("limit", json!("${search.meta.total}"))
                .with_param("tags", json!("${search.hits}"))
                .with_param("note", json!("by ${env.user}: ${search.meta.engine}")),
        );
        assert_eq!(fixture.run(), vec![]);
    }

    #[test]
    fn test_unknown_root_reported_with_roots() {
        let fixture = pipeline(NodeDefinition::new("sum", "summarize").with_param("text", json!("${serch.hits}")));
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnknownReference);
        assert_eq!(diags[0].param.as_deref(), Some("text"));
        assert_eq!(diags[0].suggestions, vec!["${topic}", "${search}"]);
    }

    #[test]
    fn test_unknown_output_key_lists_outputs() {
        let fixture = pipeline(NodeDefinition::new("sum", "summarize").with_param("text", json!("${search.body}")));
        let diags = fixture.run();
        assert_eq!(diags[0].kind, DiagnosticKind::UnknownReference);
        assert_eq!(diags[0].suggestions, vec!["${search.hits}", "${search.meta}"]);
    }

    #[test]
    fn test_downstream_and_self_references_rejected() {
        let mut fixture = pipeline(
            NodeDefinition::new("sum", "summarize").with_param("text", json!("${sum.summary}")),
        );
        fixture.ir.nodes[0]
            .params
            .insert("query".into(), json!("${sum.summary}"));
        let diags = fixture.run();
        let kinds: Vec<_> = diags.iter().map(|d| (d.node_id.clone().unwrap(), d.kind)).collect();
        assert!(kinds.contains(&("search".to_string(), DiagnosticKind::ReferenceOrder)));
        assert!(kinds.contains(&("sum".to_string(), DiagnosticKind::ReferenceOrder)));
    }

    #[test]
    fn test_type_mismatch_with_suggestions() {
        let fixture = pipeline(NodeDefinition::new("sum", "summarize").with_param("text", json!("${search.meta}")));
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        let diag = &diags[0];
        assert_eq!(diag.kind, DiagnosticKind::TypeMismatch);
        assert!(diag.message.contains("produces dict"));
        assert!(diag.message.contains("expects str"));
        assert_eq!(
            diag.suggestions,
            vec!["${search.hits[0].title}", "${search.meta.engine}"]
        );
    }

    #[test]
    fn test_interpolation_infers_str() {
        let fixture = pipeline(
            NodeDefinition::new("sum", "summarize").with_param("tags", json!("tags: ${search.hits}")),
        );
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::TypeMismatch);
        assert!(diags[0].suggestions.is_empty());
    }

    #[test]
    fn test_numeric_widening_and_narrowing() {
        let fixture = pipeline(
            NodeDefinition::new("sum", "summarize").with_param("limit", json!("${search.hits[0].score}")),
        );
        assert!(fixture.run().is_empty());

        let mut fixture = pipeline(
            NodeDefinition::new("sum", "summarize").with_param("limit", json!("${search.meta.total}")),
        );
        fixture
            .interfaces
            .get_mut("sum")
            .unwrap()
            .params
            .get_mut("limit")
            .unwrap()
            .param_type = "int".into();
        let meta = fixture.interfaces.get_mut("search").unwrap().outputs.get_mut("meta").unwrap();
        meta.structure.get_mut("total").unwrap().field_type = "float".into();
        let diags = fixture.run();
        assert_eq!(diags[0].kind, DiagnosticKind::TypeMismatch);
    }

    #[test]
    fn test_deep_unknown_path_lists_siblings() {
        let fixture = pipeline(
            NodeDefinition::new("sum", "summarize").with_param("text", json!("${search.meta.enginee}")),
        );
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnknownReference);
        assert!(diags[0].message.contains("'search.meta' has no 'enginee'"));
        assert_eq!(
            diags[0].suggestions,
            vec!["${search.meta.engine}", "${search.meta.total}"]
        );

        let fixture = pipeline(
            NodeDefinition::new("sum", "summarize").with_param("text", json!("${search.hits[0].missing.deep}")),
        );
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnknownReference);
        assert_eq!(
            diags[0].suggestions,
            vec!["${search.hits[0].score}", "${search.hits[0].title}"]
        );
    }

    #[test]
    fn test_dynamic_boundaries_skip_path_check() {
        let mut fixture = pipeline(
            NodeDefinition::new("sum", "summarize")
                .with_param("note", json!("${search.raw.anything[3].deep}"))
                .with_param("text", json!("${search.meta.engine.decoded}")),
        );
        fixture
            .interfaces
            .get_mut("search")
            .unwrap()
            .outputs
            .insert("raw".into(), FieldSpec::of("any"));
        assert!(fixture.run().is_empty());
    }

    #[test]
    fn test_batch_alias_and_items() {
        let mut fixture = pipeline(
            NodeDefinition::new("sum", "summarize")
                .with_param("text", json!("${hit.title}"))
                .with_batch({
                    let mut b = BatchConfig::over("${search.hits}");
                    b.alias = "hit".into();
                    b
                }),
        );
        assert!(fixture.run().is_empty());

        fixture.ir.nodes[1].batch = Some(BatchConfig::over("${search.meta}"));
        fixture.ir.nodes[1].params.insert("text".into(), json!("${item.title}"));
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].param.as_deref(), Some("batch.items"));
        assert_eq!(diags[0].suggestions, vec!["${search.hits}"]);
    }

    #[test]
    fn test_batched_node_outputs_are_aggregate() {
        let mut fixture = pipeline(NodeDefinition::new("sum", "summarize").with_param("limit", json!("${search.count}")));
        fixture.ir.nodes[0].batch = Some(BatchConfig::over("${topic}"));
        // `topic` is a str input, so the search batch itself is flagged.
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].node_id.as_deref(), Some("search"));

        fixture.ir.nodes[1]
            .params
            .insert("text".into(), json!("${search.results[0].meta.engine}"));
        fixture.ir.nodes[1].params.insert("limit".into(), json!("${search.hits}"));
        let diags = fixture.run();
        assert!(diags.iter().any(|d| d.node_id.as_deref() == Some("sum")
            && d.kind == DiagnosticKind::UnknownReference
            && d.suggestions.contains(&"${search.results}".to_string())));
    }

    #[test]
    fn test_missing_required_param() {
        let mut fixture = pipeline(NodeDefinition::new("sum", "summarize"));
        fixture
            .interfaces
            .get_mut("sum")
            .unwrap()
            .params
            .get_mut("text")
            .unwrap()
            .required = true;
        let diags = fixture.run();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "missing required param 'text'");
    }
}
