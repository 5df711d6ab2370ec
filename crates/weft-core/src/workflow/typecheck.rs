//! Static type compatibility for template references.
//!
//! Inference walks declared interface metadata, never runtime values. When a
//! path cannot be followed through the metadata the result is `None` and the
//! caller skips the check. A path that crosses an `any` boundary infers `any`.

use std::collections::BTreeMap;

use serde_json::Value;
use weft_types::interface::{BaseType, FieldSpec, NodeInterface, TypeDescriptor};

use super::template::{PathSegment, TemplatePath};

/// Maximum number of suggested alternative paths per diagnostic.
pub const MAX_SUGGESTIONS: usize = 5;

// ---------------------------------------------------------------------------
// Compatibility
// ---------------------------------------------------------------------------

/// Whether a value of type `source` may be passed where `target` is expected.
///
/// `any` on either side is compatible. A union source needs every member to
/// be compatible; a union target needs one matching member. Numbers widen
/// `int -> number -> float`, never the reverse.
pub fn is_compatible(source: &TypeDescriptor, target: &TypeDescriptor) -> bool {
    use TypeDescriptor::*;

    match (source, target) {
        (Any, _) | (_, Any) => true,
        (Union(members), _) => members.iter().all(|m| is_compatible(m, target)),
        (_, Union(members)) => members.iter().any(|m| is_compatible(source, m)),
        (Base(s), Base(t)) => base_compatible(*s, *t),
        (ListOf(_), Base(BaseType::List)) | (Base(BaseType::List), ListOf(_)) => true,
        (ListOf(s), ListOf(t)) => base_compatible(*s, *t),
        _ => false,
    }
}

fn base_compatible(source: BaseType, target: BaseType) -> bool {
    use BaseType::*;

    source == target
        || matches!(
            (source, target),
            (Int, Number) | (Int, Float) | (Number, Float)
        )
}

/// Type of a concrete JSON value.
pub fn type_of_value(value: &Value) -> TypeDescriptor {
    match value {
        Value::Null => TypeDescriptor::Any,
        Value::Bool(_) => TypeDescriptor::Base(BaseType::Bool),
        Value::Number(n) if n.is_i64() || n.is_u64() => TypeDescriptor::INT,
        Value::Number(_) => TypeDescriptor::Base(BaseType::Float),
        Value::String(_) => TypeDescriptor::STR,
        Value::Array(_) => TypeDescriptor::LIST,
        Value::Object(_) => TypeDescriptor::DICT,
    }
}

/// Short type name of a concrete value, for error messages.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        other => type_of_value(other).to_string(),
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// What a reference root name is bound to at a given node.
#[derive(Debug, Clone)]
pub enum RootBinding<'a> {
    /// Another node's namespace. `batched` nodes expose the aggregate shape.
    Node {
        interface: &'a NodeInterface,
        batched: bool,
    },
    /// A declared workflow input, with its declared type when present.
    Input(Option<TypeDescriptor>),
    /// The current batch item.
    BatchItem,
    /// A caller-supplied extra root or reserved key; dynamically typed.
    Dynamic,
}

/// Infer the type a reference will produce.
pub fn infer_type(path: &TemplatePath, binding: &RootBinding<'_>) -> Option<TypeDescriptor> {
    match binding {
        RootBinding::BatchItem | RootBinding::Dynamic => Some(TypeDescriptor::Any),
        RootBinding::Input(None) => Some(TypeDescriptor::Any),
        RootBinding::Input(Some(ty)) => walk(ty.clone(), &BTreeMap::new(), path.segments()),
        RootBinding::Node { interface, batched } => {
            let outputs = node_outputs(interface, *batched);
            walk(TypeDescriptor::DICT, &outputs, path.segments())
        }
    }
}

/// Declared output fields of a node as seen by downstream references.
///
/// Batched nodes write an aggregate whose `results` elements carry the
/// node's own outputs.
pub fn node_outputs(interface: &NodeInterface, batched: bool) -> BTreeMap<String, FieldSpec> {
    if !batched {
        return interface.outputs.clone();
    }
    let mut results = FieldSpec::of("list[dict]");
    results.structure = interface.outputs.clone();
    let errors = FieldSpec::of("list[dict]")
        .with_field("index", FieldSpec::of("int"))
        .with_field("item", FieldSpec::of("any"))
        .with_field("error", FieldSpec::of("str"));

    BTreeMap::from([
        ("results".to_string(), results),
        ("count".to_string(), FieldSpec::of("int")),
        ("success_count".to_string(), FieldSpec::of("int")),
        ("error_count".to_string(), FieldSpec::of("int")),
        ("errors".to_string(), errors),
    ])
}

fn walk(
    ty: TypeDescriptor,
    structure: &BTreeMap<String, FieldSpec>,
    rest: &[PathSegment],
) -> Option<TypeDescriptor> {
    let Some((first, tail)) = rest.split_first() else {
        return Some(ty);
    };
    if ty.is_any() {
        return Some(TypeDescriptor::Any);
    }

    match first {
        PathSegment::Field(name) => {
            if ty.is_dict_like() {
                // An object without declared structure is dynamically typed.
                if structure.is_empty() {
                    return Some(TypeDescriptor::Any);
                }
                let field = structure.get(name)?;
                let field_ty = field.field_type.parse().ok()?;
                walk(field_ty, &field.structure, tail)
            } else if ty.is_str_like() {
                // Encoded payloads are parsed at run time.
                Some(TypeDescriptor::Any)
            } else {
                None
            }
        }
        PathSegment::Index(_) => match ty {
            TypeDescriptor::ListOf(element) => {
                walk(TypeDescriptor::Base(element), structure, tail)
            }
            TypeDescriptor::Base(BaseType::List) if structure.is_empty() => {
                Some(TypeDescriptor::Any)
            }
            TypeDescriptor::Base(BaseType::List) => walk(TypeDescriptor::DICT, structure, tail),
            TypeDescriptor::Base(BaseType::Str) => Some(TypeDescriptor::Any),
            TypeDescriptor::Union(_) if ty.is_list_like() || ty.is_str_like() => {
                Some(TypeDescriptor::Any)
            }
            _ => None,
        },
    }
}

/// A reference that leaves the declared output structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMiss {
    /// The part of the path that exists, e.g. `search.meta`.
    pub parent: String,
    /// The first segment that does not, e.g. `enginee` or `[0]`.
    pub segment: String,
    /// Sibling fields at the point of the miss, as references.
    pub suggestions: Vec<String>,
}

/// Walk `path` through a node's declared `outputs` and report the first
/// segment that cannot exist.
///
/// Stops without a miss at `any`, at `str` (decoded at run time) and at
/// objects or lists whose structure is not declared.
pub fn find_path_miss(path: &TemplatePath, outputs: &BTreeMap<String, FieldSpec>) -> Option<PathMiss> {
    let mut parent = path.root().to_string();
    let mut ty = TypeDescriptor::DICT;
    let mut structure = outputs;

    for segment in path.segments() {
        if ty.is_any() || ty.is_str_like() {
            return None;
        }
        match segment {
            PathSegment::Field(name) => {
                if !ty.is_dict_like() {
                    return Some(PathMiss {
                        parent,
                        segment: name.clone(),
                        suggestions: Vec::new(),
                    });
                }
                if structure.is_empty() {
                    return None;
                }
                let Some(field) = structure.get(name) else {
                    let suggestions = structure
                        .keys()
                        .take(MAX_SUGGESTIONS)
                        .map(|key| format!("${{{parent}.{key}}}"))
                        .collect();
                    return Some(PathMiss {
                        parent,
                        segment: name.clone(),
                        suggestions,
                    });
                };
                ty = field.field_type.parse().ok()?;
                structure = &field.structure;
                parent = format!("{parent}.{name}");
            }
            PathSegment::Index(i) => {
                ty = match &ty {
                    TypeDescriptor::ListOf(element) => TypeDescriptor::Base(*element),
                    TypeDescriptor::Base(BaseType::List) if structure.is_empty() => return None,
                    TypeDescriptor::Base(BaseType::List) => TypeDescriptor::DICT,
                    other if other.is_list_like() => return None,
                    _ => {
                        return Some(PathMiss {
                            parent,
                            segment: format!("[{i}]"),
                            suggestions: Vec::new(),
                        });
                    }
                };
                parent = format!("{parent}[{i}]");
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

/// Up to [`MAX_SUGGESTIONS`] concrete references into `node_id`'s declared
/// outputs whose type is compatible with `expected`.
///
/// Paths through list fields use index `0`. Fields declared `any` are never
/// suggested since they are not known to match.
pub fn matching_paths(
    node_id: &str,
    interface: &NodeInterface,
    batched: bool,
    expected: &TypeDescriptor,
) -> Vec<String> {
    let mut found = Vec::new();
    let prefix = if batched {
        format!("{node_id}.results[0]")
    } else {
        node_id.to_string()
    };
    collect_matches(&prefix, &interface.outputs, expected, &mut found);
    found
}

fn collect_matches(
    prefix: &str,
    fields: &BTreeMap<String, FieldSpec>,
    expected: &TypeDescriptor,
    found: &mut Vec<String>,
) {
    for (name, field) in fields {
        if found.len() >= MAX_SUGGESTIONS {
            return;
        }
        let path = format!("{prefix}.{name}");
        let Ok(ty) = field.field_type.parse::<TypeDescriptor>() else {
            continue;
        };
        if !ty.is_any() && is_compatible(&ty, expected) {
            found.push(format!("${{{path}}}"));
        }
        if !field.structure.is_empty() {
            let child_prefix = if ty.is_list_like() {
                format!("{path}[0]")
            } else {
                path
            };
            collect_matches(&child_prefix, &field.structure, expected, found);
        }
    }
}
