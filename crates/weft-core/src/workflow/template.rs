//! `${...}` template references.
//!
//! A template is a string that may contain references such as
//! `${fetch.body.items[0].title}`. A string that is exactly one reference
//! resolves to the referenced value with its type preserved; a reference
//! embedded in surrounding text is stringified and concatenated.
//!
//! Paths are parsed once into [`TemplatePath`] segments. While walking a path,
//! a string value followed by further segments is parsed as JSON when it looks
//! like an object or array, so nested fields of encoded payloads are
//! reachable without an explicit parsing node.

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use super::store::Lookup;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unresolved reference '${{{reference}}}' in template '{template}'")]
    Unresolved { reference: String, template: String },
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed reference path: a root name followed by field/index segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplatePath {
    root: String,
    segments: Vec<PathSegment>,
}

impl TemplatePath {
    /// Parse `a.b[2].c`. Returns `None` when the text is not a valid path.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let (root, root_indices) = parse_part(parts.next()?)?;
        let mut segments: Vec<PathSegment> =
            root_indices.into_iter().map(PathSegment::Index).collect();
        for part in parts {
            let (name, indices) = parse_part(part)?;
            segments.push(PathSegment::Field(name));
            segments.extend(indices.into_iter().map(PathSegment::Index));
        }
        Some(Self { root, segments })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Segments after the root.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Resolve against a context. `None` means unresolved.
    pub fn resolve<'c, C: Lookup + ?Sized>(&self, context: &'c C) -> Option<Cow<'c, Value>> {
        let root = context.lookup(&self.root)?;
        walk(root, &self.segments)
    }
}

impl fmt::Display for TemplatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// Parse one dotted part: `ident` followed by zero or more `[digits]`.
fn parse_part(part: &str) -> Option<(String, Vec<usize>)> {
    let name_end = part.find('[').unwrap_or(part.len());
    let name = &part[..name_end];
    if !is_identifier(name) {
        return None;
    }

    let mut indices = Vec::new();
    let mut rest = &part[name_end..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        let digits = &inner[..close];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        indices.push(digits.parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((name.to_string(), indices))
}

/// `[A-Za-z_][A-Za-z0-9_-]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn walk<'c>(mut current: Cow<'c, Value>, segments: &[PathSegment]) -> Option<Cow<'c, Value>> {
    for segment in segments {
        if let Value::String(text) = current.as_ref() {
            current = Cow::Owned(parse_structured(text)?);
        }
        current = step(current, segment)?;
    }
    Some(current)
}

fn step<'c>(current: Cow<'c, Value>, segment: &PathSegment) -> Option<Cow<'c, Value>> {
    match current {
        Cow::Borrowed(value) => match (value, segment) {
            (Value::Object(map), PathSegment::Field(name)) => map.get(name).map(Cow::Borrowed),
            (Value::Array(items), PathSegment::Index(i)) => items.get(*i).map(Cow::Borrowed),
            _ => None,
        },
        Cow::Owned(value) => match (value, segment) {
            (Value::Object(mut map), PathSegment::Field(name)) => map.remove(name).map(Cow::Owned),
            (Value::Array(mut items), PathSegment::Index(i)) if *i < items.len() => {
                Some(Cow::Owned(items.swap_remove(*i)))
            }
            _ => None,
        },
    }
}

/// Parse text that encodes an object or array. Anything else is `None`.
fn parse_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    Reference {
        path: TemplatePath,
        /// Original `${...}` text, kept for permissive rendering and errors.
        source: String,
    },
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    pieces: Vec<Piece>,
}

/// Outcome of a non-raising resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: Value,
    pub resolved: bool,
}

/// Result of rendering a template in a given resolution mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub value: Value,
    /// References left as literal text (permissive mode only).
    pub unresolved: Vec<String>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let Some(close) = after.find('}') else {
                break;
            };
            let Some(path) = TemplatePath::parse(after[..close].trim()) else {
                // Only the `$` is literal; a later reference may start inside.
                literal.push_str(&rest[..start + 1]);
                rest = &rest[start + 1..];
                continue;
            };
            literal.push_str(&rest[..start]);
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Reference {
                path,
                source: rest[start..start + 2 + close + 1].to_string(),
            });
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Self {
            source: source.to_string(),
            pieces,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn has_references(&self) -> bool {
        self.references().next().is_some()
    }

    /// The path when the whole template is exactly one reference.
    pub fn whole_reference(&self) -> Option<&TemplatePath> {
        match self.pieces.as_slice() {
            [Piece::Reference { path, .. }] => Some(path),
            _ => None,
        }
    }

    pub fn references(&self) -> impl Iterator<Item = &TemplatePath> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Reference { path, .. } => Some(path),
            Piece::Literal(_) => None,
        })
    }

    /// Resolve without raising.
    ///
    /// Unresolved whole-value templates return the source text; unresolved
    /// interpolations keep the literal `${...}` text in place.
    pub fn resolve<C: Lookup + ?Sized>(&self, context: &C) -> Resolution {
        if let Some(path) = self.whole_reference() {
            return match path.resolve(context) {
                Some(value) => Resolution {
                    value: value.into_owned(),
                    resolved: true,
                },
                None => Resolution {
                    value: Value::String(self.source.clone()),
                    resolved: false,
                },
            };
        }
        if !self.has_references() {
            return Resolution {
                value: Value::String(self.source.clone()),
                resolved: true,
            };
        }

        let mut out = String::with_capacity(self.source.len());
        let mut resolved = true;
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Reference { path, source } => match path.resolve(context) {
                    Some(value) => push_stringified(&mut out, &value),
                    None => {
                        resolved = false;
                        out.push_str(source);
                    }
                },
            }
        }
        Resolution {
            value: Value::String(out),
            resolved,
        }
    }

    /// Resolve, raising on unresolved references.
    ///
    /// With `lenient` set, unresolved references inside interpolation stay as
    /// literal text and are reported in [`Rendered::unresolved`]. A whole-value
    /// reference always raises.
    pub fn render<C: Lookup + ?Sized>(
        &self,
        context: &C,
        lenient: bool,
    ) -> Result<Rendered, TemplateError> {
        let resolution = self.resolve(context);
        if resolution.resolved {
            return Ok(Rendered {
                value: resolution.value,
                unresolved: Vec::new(),
            });
        }

        let missing: Vec<String> = self
            .references()
            .filter(|path| path.resolve(context).is_none())
            .map(|path| path.to_string())
            .collect();
        if self.whole_reference().is_some() || !lenient {
            return Err(TemplateError::Unresolved {
                reference: missing.into_iter().next().unwrap_or_default(),
                template: self.source.clone(),
            });
        }
        Ok(Rendered {
            value: resolution.value,
            unresolved: missing,
        })
    }
}

/// Resolve a template string against a context without raising.
pub fn resolve<C: Lookup + ?Sized>(template: &str, context: &C) -> Resolution {
    Template::parse(template).resolve(context)
}

/// Interpolation form of a value.
pub fn value_to_string(value: &Value) -> String {
    let mut out = String::new();
    push_stringified(&mut out, value);
    out
}

fn push_stringified(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_path_parse_fields_and_indices() {
        let path = TemplatePath::parse("a.b[2].c").unwrap();
        assert_eq!(path.root(), "a");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Field("b".into()),
                PathSegment::Index(2),
                PathSegment::Field("c".into()),
            ]
        );
        assert_eq!(path.to_string(), "a.b[2].c");

        let path = TemplatePath::parse("name[0][1]").unwrap();
        assert_eq!(path.segments(), &[PathSegment::Index(0), PathSegment::Index(1)]);
    }

    #[test]
    fn test_path_parse_rejects_invalid() {
        for raw in ["", "1abc", "a..b", "a[x]", "a[]", "a[1", "a b", "a.", "a[1]b"] {
            assert!(TemplatePath::parse(raw).is_none(), "{raw} should not parse");
        }
        assert!(TemplatePath::parse("node-1.out_put").is_some());
    }

    #[test]
    fn test_no_reference_returns_unchanged() {
        let r = resolve("plain text", &ctx(json!({})));
        assert_eq!(r, Resolution { value: json!("plain text"), resolved: true });
    }

    #[test]
    fn test_whole_reference_preserves_type() {
        let c = ctx(json!({"fetch": {"items": [1, 2, 3], "ok": true}}));
        assert_eq!(resolve("${fetch.items}", &c).value, json!([1, 2, 3]));
        assert_eq!(resolve("${ fetch.ok }", &c).value, json!(true));
        assert_eq!(resolve("${fetch.items[1]}", &c).value, json!(2));
    }

    #[test]
    fn test_interpolation_stringifies() {
        let c = ctx(json!({
            "n": {"count": 3, "flag": false, "none": null, "obj": {"a": 1}, "name": "x"}
        }));
        let r = resolve(
            "count=${n.count} flag=${n.flag} none=[${n.none}] obj=${n.obj} name=${n.name}",
            &c,
        );
        assert!(r.resolved);
        assert_eq!(
            r.value,
            json!(r#"count=3 flag=false none=[] obj={"a":1} name=x"#)
        );
    }

    #[test]
    fn test_auto_parse_encoded_json() {
        let c = ctx(json!({"tool": {"stdout": "{\"data\": {\"ids\": [7, 8]}}"}}));
        assert_eq!(resolve("${tool.stdout.data.ids[1]}", &c).value, json!(8));
        assert_eq!(resolve("${tool.stdout.data}", &c).value, json!({"ids": [7, 8]}));
    }

    #[test]
    fn test_auto_parse_nested_encodings() {
        let inner = json!({"deep": 42}).to_string();
        let outer = json!({"payload": inner}).to_string();
        let c = ctx(json!({"a": {"b": outer}}));
        assert_eq!(resolve("${a.b.payload.deep}", &c).value, json!(42));
    }

    #[test]
    fn test_auto_parse_failures_are_unresolved() {
        let c = ctx(json!({"a": {"text": "not json", "obj": "{\"x\": 1}"}}));
        assert!(!resolve("${a.text.x}", &c).resolved);
        assert!(!resolve("${a.obj.missing}", &c).resolved);
    }

    #[test]
    fn test_missing_and_type_mismatched_paths_unresolved() {
        let c = ctx(json!({"a": {"list": [1], "n": 5}}));
        assert!(!resolve("${missing}", &c).resolved);
        assert!(!resolve("${a.list[3]}", &c).resolved);
        assert!(!resolve("${a.n.x}", &c).resolved);
        assert!(!resolve("${a.n[0]}", &c).resolved);
        assert!(!resolve("${a.list.x}", &c).resolved);

        let r = resolve("${missing}", &c);
        assert_eq!(r.value, json!("${missing}"));
        let r = resolve("hi ${missing}!", &c);
        assert_eq!(r.value, json!("hi ${missing}!"));
    }

    #[test]
    fn test_invalid_reference_syntax_is_literal() {
        let c = ctx(json!({"a": 1}));
        let template = Template::parse("cost: ${1.5} and ${a}");
        assert_eq!(template.references().count(), 1);
        assert_eq!(template.resolve(&c).value, json!("cost: ${1.5} and 1"));

        let template = Template::parse("unterminated ${a");
        assert!(!template.has_references());
    }

    #[test]
    fn test_stray_opener_does_not_hide_later_reference() {
        let c = ctx(json!({"x": {"v": 7}}));
        let template = Template::parse("cost ${ and ${x.v}");
        assert_eq!(template.references().count(), 1);
        assert_eq!(template.resolve(&c), Resolution { value: json!("cost ${ and 7"), resolved: true });

        let err = Template::parse("cost ${ and ${x.w}").render(&c, false).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                reference: "x.w".into(),
                template: "cost ${ and ${x.w}".into(),
            }
        );

        let template = Template::parse("$${x.v}");
        assert_eq!(template.resolve(&c).value, json!("$7"));
    }

    #[test]
    fn test_render_strict_raises_on_any_unresolved() {
        let c = ctx(json!({"a": 1}));
        let err = Template::parse("x ${a} ${b.c}").render(&c, false).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                reference: "b.c".into(),
                template: "x ${a} ${b.c}".into(),
            }
        );
    }

    #[test]
    fn test_render_lenient_keeps_literal_for_interpolation_only() {
        let c = ctx(json!({"a": 1}));
        let rendered = Template::parse("x ${a} ${b}").render(&c, true).unwrap();
        assert_eq!(rendered.value, json!("x 1 ${b}"));
        assert_eq!(rendered.unresolved, vec!["b".to_string()]);

        assert!(Template::parse("${b}").render(&c, true).is_err());
    }

    #[test]
    fn test_whole_reference_detection() {
        assert!(Template::parse("${a.b}").whole_reference().is_some());
        assert!(Template::parse(" ${a.b}").whole_reference().is_none());
        assert!(Template::parse("${a}${b}").whole_reference().is_none());
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!(null)), "");
        assert_eq!(value_to_string(&json!(1.5)), "1.5");
        assert_eq!(value_to_string(&json!([1, "a"])), r#"[1,"a"]"#);
    }
}
