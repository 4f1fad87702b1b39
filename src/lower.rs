//! Lower an `.avsc` JSON document into a [`SchemaModel`].
//!
//! Named records and enums are registered by full name the first time they
//! are defined; any later mention of the name (including recursive ones,
//! FHIR's `Extension.extension` being the usual suspect) becomes a
//! [`SchemaNode::Ref`]. Every reference is checked once lowering finishes.
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::schema::{
    full_name, EnumSchema, Field, LogicalType, RecordSchema, ScalarKind, ScalarSchema,
    SchemaModel, SchemaNode,
};

pub fn lower_schema(doc: &Value) -> Result<SchemaModel, SchemaError> {
    let mut lw = Lowering::default();
    let root = lw.lower(doc, None, "")?;

    for (name, at) in &lw.refs {
        let bare = name.rsplit('.').next().unwrap_or(name);
        let known = lw.named.contains_key(name)
            || lw.named.keys().any(|k| k.rsplit('.').next() == Some(bare));
        if !known {
            tracing::debug!(%name, %at, "dangling named type reference");
            return Err(SchemaError::UnknownType(name.clone()));
        }
    }

    let model = SchemaModel::new(root, lw.named);
    if let Err(err) = model.root_record() {
        return Err(SchemaError::RootNotRecord(err.to_string()));
    }
    Ok(model)
}

pub fn lower_schema_str(src: &str) -> Result<SchemaModel, SchemaError> {
    let doc: Value = serde_json::from_str(src).map_err(|e| SchemaError::Syntax {
        path: format!("line {} column {}", e.line(), e.column()),
        message: e.to_string(),
    })?;
    lower_schema(&doc)
}

pub fn lower_schema_path(path: &Path) -> Result<SchemaModel, SchemaError> {
    let src = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    lower_schema_str(&src)
}

impl SchemaModel {
    pub fn from_avsc_str(src: &str) -> Result<Self, SchemaError> {
        lower_schema_str(src)
    }

    pub fn from_avsc_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        lower_schema_path(path.as_ref())
    }
}

// ------------------------------ Lowering ---------------------------------- //

#[derive(Default)]
struct Lowering {
    named: IndexMap<String, SchemaNode>,
    refs: Vec<(String, String)>, // (full name, JSON path where referenced)
}

impl Lowering {
    fn lower(&mut self, v: &Value, ns: Option<&str>, at: &str) -> Result<SchemaNode, SchemaError> {
        match v {
            Value::String(name) => Ok(self.lower_name(name, ns, at)),
            Value::Array(alts) => {
                let alts = alts
                    .iter()
                    .enumerate()
                    .map(|(i, alt)| self.lower(alt, ns, &format!("{at}/{i}")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SchemaNode::Union(alts))
            }
            Value::Object(obj) => self.lower_complex(obj, ns, at),
            other => Err(syntax(at, format!("expected a schema, found `{other}`"))),
        }
    }

    fn lower_name(&mut self, name: &str, ns: Option<&str>, at: &str) -> SchemaNode {
        if let Some(kind) = ScalarKind::from_name(name) {
            return SchemaNode::Scalar(ScalarSchema::plain(kind));
        }
        let full = full_name(ns, name);
        self.refs.push((full.clone(), at.to_string()));
        SchemaNode::Ref(full)
    }

    fn lower_complex(&mut self, obj: &Map<String, Value>, ns: Option<&str>, at: &str) -> Result<SchemaNode, SchemaError> {
        let kind = obj.get("type").ok_or_else(|| syntax(at, "missing `type`"))?;
        let kind = match kind {
            Value::String(kind) => kind.as_str(),
            nested => return self.lower(nested, ns, &format!("{at}/type")),
        };

        match kind {
            "record" | "error" => self.lower_record(obj, ns, at),
            "enum" => self.lower_enum(obj, ns, at),
            "array" => {
                let items = obj.get("items").ok_or_else(|| invalid("array", "missing `items`"))?;
                let element = self.lower(items, ns, &format!("{at}/items"))?;
                Ok(SchemaNode::Array(Box::new(element)))
            }
            "map" | "fixed" => {
                if let Some(name) = obj.get("name").and_then(Value::as_str) {
                    let full = full_name(namespace_of(obj, ns), name);
                    self.register(full, SchemaNode::Unsupported(kind.to_string()))?;
                }
                Ok(SchemaNode::Unsupported(kind.to_string()))
            }
            name => match ScalarKind::from_name(name) {
                Some(scalar) => {
                    let logical = obj.get("logicalType").and_then(Value::as_str).map(|lt| {
                        LogicalType::from_parts(lt, get_u32(obj, "precision"), get_u32(obj, "scale"))
                    });
                    Ok(SchemaNode::Scalar(ScalarSchema { kind: scalar, logical }))
                }
                None => Ok(self.lower_name(name, ns, at)),
            },
        }
    }

    fn lower_record(&mut self, obj: &Map<String, Value>, ns: Option<&str>, at: &str) -> Result<SchemaNode, SchemaError> {
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("record", format!("missing `name` at {at}")))?;
        let namespace = namespace_of(obj, ns).map(str::to_string);
        let (name, namespace) = split_name(name, namespace);

        let raw_fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("record", format!("`{name}` has no `fields` array")))?;

        let mut fields = Vec::with_capacity(raw_fields.len());
        for (i, raw) in raw_fields.iter().enumerate() {
            let field_at = format!("{at}/fields/{i}");
            let field_name = raw
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| syntax(&field_at, "field without `name`"))?;
            let ty = raw
                .get("type")
                .ok_or_else(|| syntax(&field_at, format!("field `{field_name}` without `type`")))?;
            let schema = self.lower(ty, namespace.as_deref(), &format!("{field_at}/type"))?;
            fields.push(Field { name: field_name.to_string(), schema });
        }

        let record = Arc::new(RecordSchema { name, namespace, fields });
        let node = SchemaNode::Record(record.clone());
        self.register(record.full_name(), node.clone())?;
        Ok(node)
    }

    fn lower_enum(&mut self, obj: &Map<String, Value>, ns: Option<&str>, at: &str) -> Result<SchemaNode, SchemaError> {
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("enum", format!("missing `name` at {at}")))?;
        let namespace = namespace_of(obj, ns).map(str::to_string);
        let (name, namespace) = split_name(name, namespace);
        let symbols = obj
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("enum", format!("`{name}` has no `symbols`")))?
            .iter()
            .map(|s| {
                s.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid("enum", format!("`{name}` has a non-string symbol")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let schema = Arc::new(EnumSchema { name, namespace, symbols });
        let node = SchemaNode::Enum(schema.clone());
        self.register(schema.full_name(), node.clone())?;
        Ok(node)
    }

    fn register(&mut self, full: String, node: SchemaNode) -> Result<(), SchemaError> {
        if self.named.contains_key(&full) {
            return Err(SchemaError::Redefined(full));
        }
        self.named.insert(full, node);
        Ok(())
    }
}

// ------------------------------- Helpers ---------------------------------- //

fn namespace_of<'a>(obj: &'a Map<String, Value>, inherited: Option<&'a str>) -> Option<&'a str> {
    obj.get("namespace").and_then(Value::as_str).or(inherited)
}

/// `a.b.Name` carries its own namespace.
fn split_name(name: &str, namespace: Option<String>) -> (String, Option<String>) {
    match name.rsplit_once('.') {
        Some((ns, short)) => (short.to_string(), Some(ns.to_string())),
        None => (name.to_string(), namespace),
    }
}

fn get_u32(obj: &Map<String, Value>, key: &str) -> Option<u32> {
    obj.get(key).and_then(Value::as_u64).and_then(|n| u32::try_from(n).ok())
}

fn syntax(at: &str, message: impl Into<String>) -> SchemaError {
    let path = if at.is_empty() { "/".to_string() } else { at.to_string() };
    SchemaError::Syntax { path, message: message.into() }
}

fn invalid(kind: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Invalid { kind: kind.to_string(), message: message.into() }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lowers_records_unions_and_logical_types() {
        let doc = json!({
            "type": "record", "name": "Patient", "namespace": "bio.fhir",
            "fields": [
                {"name": "resourceType", "type": "string"},
                {"name": "active", "type": ["null", "boolean"]},
                {"name": "birthDate", "type": ["null", {"type": "int", "logicalType": "date"}]},
                {"name": "weight", "type": {"type": "bytes", "logicalType": "decimal", "precision": 18, "scale": 0}},
                {"name": "gender", "type": {"type": "enum", "name": "gender", "symbols": ["male", "female"]}}
            ]
        });
        let model = lower_schema(&doc).unwrap();
        let rec = model.root_record().unwrap();
        assert_eq!(rec.full_name(), "bio.fhir.Patient");
        assert_eq!(rec.fields.len(), 5);

        match &rec.field("birthDate").unwrap().schema {
            SchemaNode::Union(alts) => {
                assert!(alts[0].is_null());
                assert_eq!(alts[1], SchemaNode::Scalar(ScalarSchema::with_logical(ScalarKind::Int, LogicalType::Date)));
            }
            other => panic!("expected union, got {other:?}"),
        }
        assert_eq!(
            rec.field("weight").unwrap().schema,
            SchemaNode::Scalar(ScalarSchema::with_logical(
                ScalarKind::Bytes,
                LogicalType::Decimal { precision: 18, scale: 0 }
            ))
        );
        assert!(model.lookup("bio.fhir.gender").is_some());
    }

    #[test]
    fn recursive_reference_becomes_ref() {
        let doc = json!({
            "type": "record", "name": "Extension",
            "fields": [
                {"name": "url", "type": "string"},
                {"name": "extension", "type": ["null", {"type": "array", "items": "Extension"}]}
            ]
        });
        let model = lower_schema(&doc).unwrap();
        let rec = model.root_record().unwrap();
        let SchemaNode::Union(alts) = &rec.field("extension").unwrap().schema else { panic!() };
        let SchemaNode::Array(item) = &alts[1] else { panic!() };
        assert_eq!(**item, SchemaNode::Ref("Extension".into()));
        assert!(matches!(model.resolve(item), Ok(SchemaNode::Record(_))));
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let doc = json!({"type": "record", "name": "A", "fields": [{"name": "b", "type": "B"}]});
        assert!(matches!(lower_schema(&doc), Err(SchemaError::UnknownType(n)) if n == "B"));
    }

    #[test]
    fn non_record_root_is_rejected() {
        assert!(matches!(lower_schema(&json!("string")), Err(SchemaError::RootNotRecord(_))));
    }

    #[test]
    fn map_is_lowered_as_unsupported() {
        let doc = json!({"type": "record", "name": "A", "fields": [
            {"name": "m", "type": {"type": "map", "values": "string"}}
        ]});
        let model = lower_schema(&doc).unwrap();
        let rec = model.root_record().unwrap();
        assert_eq!(rec.field("m").unwrap().schema, SchemaNode::Unsupported("map".into()));
    }

    #[test]
    fn syntax_errors_carry_location() {
        let err = lower_schema_str("{\"type\": \"record\", ").unwrap_err();
        assert!(matches!(err, SchemaError::Syntax { .. }));
        let err = lower_schema(&json!({"type": "record", "name": "A", "fields": [{"type": "int"}]})).unwrap_err();
        match err {
            SchemaError::Syntax { path, .. } => assert_eq!(path, "/fields/0"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
