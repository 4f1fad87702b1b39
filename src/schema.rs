// Strongly-typed encoding schema. Built by `lower` from an `.avsc` document,
// read-only afterwards and shared by the encoder and the decoder.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::CodecError;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Record(Arc<RecordSchema>),
    Array(Box<SchemaNode>),
    Union(Vec<SchemaNode>),      // declared order is resolution order
    Enum(Arc<EnumSchema>),
    Scalar(ScalarSchema),
    Ref(String),                 // full name of a named record/enum
    Unsupported(String),         // map, fixed, ...
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub namespace: Option<String>,
    pub fields: Vec<Field>,      // stable, declared order
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: SchemaNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: String,
    pub namespace: Option<String>,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSchema {
    pub kind: ScalarKind,
    pub logical: Option<LogicalType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Null,
    String,
    Bytes,
    Int,
    Long,
    Float,
    Double,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalType {
    Decimal { precision: u32, scale: u32 },
    /// Days since 1970-01-01.
    Date,
    /// Carries epoch *seconds*, whatever the name suggests.
    TimeMicros,
    TimestampMillis,
    TimestampMicros,
    Other(String),
}

impl ScalarKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "null" => ScalarKind::Null,
            "string" => ScalarKind::String,
            "bytes" => ScalarKind::Bytes,
            "int" => ScalarKind::Int,
            "long" => ScalarKind::Long,
            "float" => ScalarKind::Float,
            "double" => ScalarKind::Double,
            "boolean" => ScalarKind::Boolean,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Null => "null",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Int => "int",
            ScalarKind::Long => "long",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Boolean => "boolean",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::Long)
    }
}

impl LogicalType {
    pub fn from_parts(name: &str, precision: Option<u32>, scale: Option<u32>) -> Self {
        match name {
            "decimal" => LogicalType::Decimal {
                precision: precision.unwrap_or(0),
                scale: scale.unwrap_or(0),
            },
            "date" => LogicalType::Date,
            "time-micros" => LogicalType::TimeMicros,
            "timestamp-millis" => LogicalType::TimestampMillis,
            "timestamp-micros" => LogicalType::TimestampMicros,
            other => LogicalType::Other(other.to_string()),
        }
    }
}

impl ScalarSchema {
    pub fn plain(kind: ScalarKind) -> Self {
        Self { kind, logical: None }
    }

    pub fn with_logical(kind: ScalarKind, logical: LogicalType) -> Self {
        Self { kind, logical: Some(logical) }
    }
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn full_name(&self) -> String {
        full_name(self.namespace.as_deref(), &self.name)
    }
}

impl EnumSchema {
    pub fn full_name(&self) -> String {
        full_name(self.namespace.as_deref(), &self.name)
    }
}

pub(crate) fn full_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !name.contains('.') => format!("{ns}.{name}"),
        _ => name.to_string(),
    }
}

impl SchemaNode {
    /// Short human label used in mismatch messages.
    pub fn describe(&self) -> String {
        match self {
            SchemaNode::Record(r) => format!("record {}", r.name),
            SchemaNode::Array(_) => "array".to_string(),
            SchemaNode::Union(alts) => format!("union of {}", alts.len()),
            SchemaNode::Enum(e) => format!("enum {}", e.name),
            SchemaNode::Scalar(s) => match &s.logical {
                Some(l) => format!("{} ({l:?})", s.kind.name()),
                None => s.kind.name().to_string(),
            },
            SchemaNode::Ref(name) => format!("ref {name}"),
            SchemaNode::Unsupported(kind) => kind.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SchemaNode::Scalar(ScalarSchema { kind: ScalarKind::Null, .. }))
    }
}

// ------------------------------- Model ------------------------------------ //

/// Root record plus the registry of named types it (transitively) references.
#[derive(Debug, Clone)]
pub struct SchemaModel {
    root: SchemaNode,
    named: IndexMap<String, SchemaNode>,
}

impl SchemaModel {
    pub fn new(root: SchemaNode, named: IndexMap<String, SchemaNode>) -> Self {
        Self { root, named }
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    pub fn root_record(&self) -> Result<&Arc<RecordSchema>, CodecError> {
        match self.resolve(&self.root)? {
            SchemaNode::Record(r) => Ok(r),
            other => Err(CodecError::UnsupportedSchema(format!(
                "schema root must be a record, found {}",
                other.describe()
            ))),
        }
    }

    pub fn named_types(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.named.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn lookup(&self, name: &str) -> Option<&SchemaNode> {
        if let Some(node) = self.named.get(name) {
            return Some(node);
        }
        // fall back to matching the unqualified name in any namespace
        let bare = name.rsplit('.').next().unwrap_or(name);
        self.named
            .iter()
            .find(|(full, _)| full.rsplit('.').next() == Some(bare))
            .map(|(_, node)| node)
    }

    /// Follow `Ref` nodes until a concrete node is reached.
    pub fn resolve<'a>(&'a self, mut node: &'a SchemaNode) -> Result<&'a SchemaNode, CodecError> {
        // a ref chain longer than the registry is a cycle
        for _ in 0..=self.named.len() {
            match node {
                SchemaNode::Ref(name) => {
                    node = self.lookup(name).ok_or_else(|| {
                        CodecError::UnsupportedSchema(format!("unknown named type `{name}`"))
                    })?;
                }
                _ => return Ok(node),
            }
        }
        Err(CodecError::UnsupportedSchema("cyclic named type reference".into()))
    }

    /// True when the node is a union with a `null` alternative.
    pub fn is_nullable(&self, node: &SchemaNode) -> bool {
        match self.resolve(node) {
            Ok(SchemaNode::Union(alts)) => alts.iter().any(SchemaNode::is_null),
            Ok(n) => n.is_null(),
            Err(_) => false,
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_cycle() -> SchemaModel {
        let ext = SchemaNode::Record(Arc::new(RecordSchema {
            name: "Extension".into(),
            namespace: Some("bio.fhir".into()),
            fields: vec![
                Field { name: "url".into(), schema: SchemaNode::Scalar(ScalarSchema::plain(ScalarKind::String)) },
                Field {
                    name: "extension".into(),
                    schema: SchemaNode::Union(vec![
                        SchemaNode::Scalar(ScalarSchema::plain(ScalarKind::Null)),
                        SchemaNode::Array(Box::new(SchemaNode::Ref("bio.fhir.Extension".into()))),
                    ]),
                },
            ],
        }));
        let mut named = IndexMap::new();
        named.insert("bio.fhir.Extension".to_string(), ext.clone());
        SchemaModel::new(ext, named)
    }

    #[test]
    fn resolve_follows_refs_by_full_and_bare_name() {
        let model = model_with_cycle();
        let full = SchemaNode::Ref("bio.fhir.Extension".into());
        let bare = SchemaNode::Ref("Extension".into());
        assert!(matches!(model.resolve(&full), Ok(SchemaNode::Record(r)) if r.name == "Extension"));
        assert!(matches!(model.resolve(&bare), Ok(SchemaNode::Record(_))));
    }

    #[test]
    fn unknown_ref_is_unsupported_schema() {
        let model = model_with_cycle();
        let err = model.resolve(&SchemaNode::Ref("Nope".into())).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedSchema(_)));
    }

    #[test]
    fn nullable_detection() {
        let model = model_with_cycle();
        let rec = model.root_record().unwrap();
        assert!(model.is_nullable(&rec.field("extension").unwrap().schema));
        assert!(!model.is_nullable(&rec.field("url").unwrap().schema));
    }

    #[test]
    fn full_name_keeps_dotted_names() {
        assert_eq!(full_name(Some("a.b"), "C"), "a.b.C");
        assert_eq!(full_name(Some("a.b"), "x.C"), "x.C");
        assert_eq!(full_name(None, "C"), "C");
    }
}
