//! Node interface metadata and type descriptors.
//!
//! A `NodeInterface` is what the registry knows about a node type: which
//! params it accepts and which outputs it writes, each annotated with a type
//! string. Type strings parse into `TypeDescriptor`s, which the compiler's
//! type checker compares.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Interface metadata
// ---------------------------------------------------------------------------

/// Declared interface of a node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInterface {
    #[serde(default)]
    pub description: String,
    /// Accepted params keyed by name.
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
    /// Outputs written into the node's namespace, keyed by name.
    #[serde(default)]
    pub outputs: BTreeMap<String, FieldSpec>,
}

impl NodeInterface {
    /// Builder-style param declaration.
    pub fn with_param(mut self, name: impl Into<String>, param_type: impl Into<String>) -> Self {
        self.params.insert(
            name.into(),
            ParamSpec {
                param_type: param_type.into(),
                required: false,
                description: None,
            },
        );
        self
    }

    /// Builder-style output declaration.
    pub fn with_output(mut self, name: impl Into<String>, field: FieldSpec) -> Self {
        self.outputs.insert(name.into(), field);
        self
    }
}

/// Declared parameter of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default = "any_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared output field, possibly with nested structure.
///
/// For `dict` types `structure` lists the object's fields; for list types it
/// lists the fields of each element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", default = "any_type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub structure: BTreeMap<String, FieldSpec>,
}

fn any_type() -> String {
    "any".to_string()
}

impl FieldSpec {
    /// A leaf field of the given type.
    pub fn of(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            description: None,
            structure: BTreeMap::new(),
        }
    }

    /// Builder-style nested field declaration.
    pub fn with_field(mut self, name: impl Into<String>, field: FieldSpec) -> Self {
        self.structure.insert(name.into(), field);
        self
    }
}

// ---------------------------------------------------------------------------
// Type descriptors
// ---------------------------------------------------------------------------

/// Base types of the type vocabulary. Aliases normalize to one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    Str,
    Int,
    Number,
    Float,
    Bool,
    Dict,
    List,
}

impl BaseType {
    /// Canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Str => "str",
            BaseType::Int => "int",
            BaseType::Number => "number",
            BaseType::Float => "float",
            BaseType::Bool => "bool",
            BaseType::Dict => "dict",
            BaseType::List => "list",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "str" | "string" => BaseType::Str,
            "int" | "integer" => BaseType::Int,
            "number" => BaseType::Number,
            "float" => BaseType::Float,
            "bool" | "boolean" => BaseType::Bool,
            "dict" | "object" => BaseType::Dict,
            "list" | "array" => BaseType::List,
            _ => return None,
        })
    }
}

/// A parsed type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// Dynamically typed; compatible with everything.
    Any,
    Base(BaseType),
    /// List with a declared element type, e.g. `list[dict]`.
    ListOf(BaseType),
    /// Union of two or more non-union members, e.g. `dict|str`.
    Union(Vec<TypeDescriptor>),
}

/// Failure to parse a type string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("empty type string")]
    Empty,

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("invalid list element type in '{0}'")]
    InvalidElement(String),
}

impl TypeDescriptor {
    pub const STR: TypeDescriptor = TypeDescriptor::Base(BaseType::Str);
    pub const INT: TypeDescriptor = TypeDescriptor::Base(BaseType::Int);
    pub const DICT: TypeDescriptor = TypeDescriptor::Base(BaseType::Dict);
    pub const LIST: TypeDescriptor = TypeDescriptor::Base(BaseType::List);

    /// Whether this is `any`.
    pub fn is_any(&self) -> bool {
        matches!(self, TypeDescriptor::Any)
    }

    /// Whether a value of this type is (or may be) a list.
    pub fn is_list_like(&self) -> bool {
        match self {
            TypeDescriptor::Any | TypeDescriptor::ListOf(_) => true,
            TypeDescriptor::Base(b) => *b == BaseType::List,
            TypeDescriptor::Union(members) => members.iter().any(|m| m.is_list_like()),
        }
    }

    /// Whether a value of this type may be an object.
    pub fn is_dict_like(&self) -> bool {
        match self {
            TypeDescriptor::Any => true,
            TypeDescriptor::Base(b) => *b == BaseType::Dict,
            TypeDescriptor::ListOf(_) => false,
            TypeDescriptor::Union(members) => members.iter().any(|m| m.is_dict_like()),
        }
    }

    /// Whether a value of this type may be a string.
    pub fn is_str_like(&self) -> bool {
        match self {
            TypeDescriptor::Any => true,
            TypeDescriptor::Base(b) => *b == BaseType::Str,
            TypeDescriptor::ListOf(_) => false,
            TypeDescriptor::Union(members) => members.iter().any(|m| m.is_str_like()),
        }
    }

    fn parse_member(raw: &str) -> Result<Self, TypeParseError> {
        let name = raw.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(TypeParseError::Empty);
        }
        if name == "any" {
            return Ok(TypeDescriptor::Any);
        }
        if let Some(inner) = name.strip_suffix(']') {
            let (head, element) = inner
                .split_once('[')
                .ok_or_else(|| TypeParseError::InvalidElement(raw.to_string()))?;
            if BaseType::from_name(head.trim()) != Some(BaseType::List) {
                return Err(TypeParseError::InvalidElement(raw.to_string()));
            }
            let element = element.trim();
            if element == "any" {
                return Ok(TypeDescriptor::Base(BaseType::List));
            }
            return BaseType::from_name(element)
                .map(TypeDescriptor::ListOf)
                .ok_or_else(|| TypeParseError::InvalidElement(raw.to_string()));
        }
        BaseType::from_name(&name)
            .map(TypeDescriptor::Base)
            .ok_or(TypeParseError::UnknownType(raw.trim().to_string()))
    }
}

impl FromStr for TypeDescriptor {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(TypeParseError::Empty);
        }
        let mut members = Vec::new();
        for part in s.split('|') {
            let member = Self::parse_member(part)?;
            // `any` absorbs the rest of the union.
            if member.is_any() {
                return Ok(TypeDescriptor::Any);
            }
            if !members.contains(&member) {
                members.push(member);
            }
        }
        if members.len() == 1 {
            Ok(members.remove(0))
        } else {
            Ok(TypeDescriptor::Union(members))
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Any => write!(f, "any"),
            TypeDescriptor::Base(b) => write!(f, "{}", b.as_str()),
            TypeDescriptor::ListOf(b) => write!(f, "list[{}]", b.as_str()),
            TypeDescriptor::Union(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
        }
    }
}
