//! The static property tree: the fundamental node of every schema and
//! runtime message, plus the parameter map that bundles header/body/params.

use std::collections::HashMap;

use crate::error::Expr;

/// The closed set of scalar types a `Property` may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    Bytes,
}

/// Runtime value stored in the reference store and carried as property
/// defaults.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Message(HashMap<String, Value>),
    Repeated(Vec<Value>),
    Null,
}

/// Ordering/occurrence label for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Required,
    Optional,
    Repeated,
}

impl Label {
    pub fn parse(raw: &str) -> Option<Label> {
        match raw {
            "required" => Some(Label::Required),
            "optional" => Some(Label::Optional),
            "repeated" => Some(Label::Repeated),
            _ => None,
        }
    }
}

/// A named enumeration, as declared in the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: HashMap<String, i32>,
}

/// The one-of shape of a property, expressed as a sum type rather than four
/// nullable fields (see REDESIGN FLAGS / design note on tagged unions) — the
/// crate has no external parser to support the nullable-field convenience,
/// so the discriminated representation is used directly end to end.
#[derive(Debug, Clone)]
pub enum Template {
    Scalar(ScalarType),
    Message(Vec<Property>),
    Repeated(Box<Template>),
    Enum(EnumDescriptor),
}

impl Template {
    /// Children reachable for path resolution: the message fields of a
    /// `Message` template, or of a `Repeated` template whose element is a
    /// `Message` (a repeated group of messages). Scalars, enums, and
    /// repeated scalars have no children.
    pub fn children(&self) -> Option<&[Property]> {
        match self {
            Template::Message(children) => Some(children),
            Template::Repeated(inner) => inner.children(),
            Template::Scalar(_) | Template::Enum(_) => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Property>> {
        match self {
            Template::Message(children) => Some(children),
            Template::Repeated(inner) => inner.children_mut(),
            Template::Scalar(_) | Template::Enum(_) => None,
        }
    }
}

/// A statically-declared pointer `(resource, path)` to another property.
/// `property` is bound during the Definer pass; a reference whose
/// `property` is still `None` after a successful manifest load never
/// happens — load fails first.
#[derive(Debug, Clone)]
pub struct PropertyReference {
    pub resource: String,
    pub path: String,
    pub property: Option<ResolvedReference>,
}

impl PropertyReference {
    pub fn new(resource: impl Into<String>, path: impl Into<String>) -> Self {
        PropertyReference {
            resource: resource.into(),
            path: path.into(),
            property: None,
        }
    }
}

impl std::fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource, self.path)
    }
}

/// A snapshot of the referent bound onto a `PropertyReference` once
/// resolved. Rust ownership makes aliasing a mutable pointer across two
/// independent `ParameterMap` trees impractical; the snapshot carries
/// everything a caller needs (the resolved `path` for the reference-
/// bijection invariant, plus the type info copied onto the referring
/// property) without unsafe aliasing.
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub name: String,
    pub path: String,
    pub template: Template,
    pub label: Label,
    pub default: Option<Value>,
}

/// The fundamental node of every schema/runtime tree.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    /// Dot-delimited path from this property's root parameter map.
    pub path: String,
    /// Ordering hint used when serializing a message back out.
    pub position: u32,
    pub template: Template,
    pub label: Label,
    pub default: Option<Value>,
    pub reference: Option<PropertyReference>,
    pub expr: Option<Expr>,
}

impl Property {
    pub fn new(name: impl Into<String>, path: impl Into<String>, template: Template) -> Self {
        Property {
            name: name.into(),
            path: path.into(),
            position: 0,
            template,
            label: Label::Optional,
            default: None,
            reference: None,
            expr: None,
        }
    }

    pub fn with_reference(mut self, reference: PropertyReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    /// Applies a resolved reference's type info onto this property, per the
    /// Manifest Definer's binding invariant: if `reference` is non-null, the
    /// property's `Type`/`Label`/`Default` are overwritten to match the
    /// referent.
    pub fn bind_resolved(&mut self, resolved: ResolvedReference) {
        self.template = resolved.template.clone();
        self.label = resolved.label;
        self.default = resolved.default.clone();
        if let Some(reference) = self.reference.as_mut() {
            reference.property = Some(resolved);
        }
    }
}

/// Flat map of string to property: header lookups are exact-key only, no
/// dot-traversal.
pub type Header = HashMap<String, Property>;

/// The typed message bundle carrying the body, header, named references,
/// and the synthetic stack of intermediate properties.
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    /// Name of the schema object this map was instantiated from, empty for
    /// ad hoc maps (e.g. a call's response before `DefineCall` runs).
    pub schema: String,
    pub header: Header,
    pub property: Option<Property>,
    pub params: HashMap<String, PropertyReference>,
    pub stack: HashMap<String, Property>,
}

impl ParameterMap {
    pub fn new() -> Self {
        ParameterMap::default()
    }
}
