//! Encoded record values, and their JSON form.
//!
//! An [`EncodedRecord`] is what the encoder produces and the decoder reads:
//! plain data conforming to one record schema. The JSON mapping here is the
//! crate's only storage format for it; binary container framing is left to
//! whatever Avro library sits downstream.
use std::fmt;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde_json::{Map, Number, Value};

use crate::error::CodecError;
use crate::scalar::DECIMAL_RE;
use crate::schema::{LogicalType, ScalarKind, ScalarSchema, SchemaModel, SchemaNode};
use crate::union::UnionResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedValue {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(OrderedFloat<f32>),
    Double(OrderedFloat<f64>),
    Bytes(Vec<u8>),
    String(String),
    Decimal(DecimalText),
    Enum(String),
    Array(Vec<EncodedValue>),
    Record(EncodedRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub name: String,
    pub fields: IndexMap<String, EncodedValue>,
}

/// A decimal kept as the exact text it was read from, so `4.1200` never
/// comes back as `4.12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecimalText(String);

impl DecimalText {
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        if DECIMAL_RE.is_match(text) {
            Ok(DecimalText(text.to_string()))
        } else {
            Err(CodecError::shape(format!("`{text}` is not a decimal")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits after the decimal point, exponent ignored.
    pub fn scale(&self) -> usize {
        let mantissa = self.0.split(['e', 'E']).next().unwrap_or("");
        mantissa.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
    }
}

impl fmt::Display for DecimalText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl EncodedRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: IndexMap::new() }
    }

    pub fn get(&self, field: &str) -> Option<&EncodedValue> {
        self.fields.get(field)
    }
}

impl EncodedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, EncodedValue::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EncodedValue::Null => "null",
            EncodedValue::Boolean(_) => "boolean",
            EncodedValue::Int(_) => "int",
            EncodedValue::Long(_) => "long",
            EncodedValue::Float(_) => "float",
            EncodedValue::Double(_) => "double",
            EncodedValue::Bytes(_) => "bytes",
            EncodedValue::String(_) => "string",
            EncodedValue::Decimal(_) => "decimal",
            EncodedValue::Enum(_) => "enum",
            EncodedValue::Array(_) => "array",
            EncodedValue::Record(_) => "record",
        }
    }

    pub fn as_record(&self) -> Option<&EncodedRecord> {
        match self {
            EncodedValue::Record(r) => Some(r),
            _ => None,
        }
    }

    // ------------------------------ to JSON ------------------------------- //

    /// Untagged JSON: unions are written as the bare value of the chosen
    /// alternative and resolved again on the way back in.
    ///
    /// Fails rather than substituting a value: non-finite floats have no JSON
    /// number, and bytes are carried as text so they must be UTF-8.
    pub fn to_json(&self) -> Result<Value, CodecError> {
        Ok(match self {
            EncodedValue::Null => Value::Null,
            EncodedValue::Boolean(b) => Value::Bool(*b),
            EncodedValue::Int(n) => Value::from(*n),
            EncodedValue::Long(n) => Value::from(*n),
            EncodedValue::Float(x) => finite_number(f64::from(x.0))?,
            EncodedValue::Double(x) => finite_number(x.0)?,
            EncodedValue::Bytes(b) => match String::from_utf8(b.clone()) {
                Ok(text) => Value::String(text),
                Err(_) => return Err(CodecError::shape("bytes value is not valid UTF-8 text")),
            },
            EncodedValue::String(s) | EncodedValue::Enum(s) => Value::String(s.clone()),
            EncodedValue::Decimal(d) => Value::String(d.as_str().to_string()),
            EncodedValue::Array(xs) => Value::Array(xs.iter().map(EncodedValue::to_json).collect::<Result<_, _>>()?),
            EncodedValue::Record(r) => r.to_json()?,
        })
    }

    // ----------------------------- from JSON ------------------------------ //

    /// Read a JSON value back under `node`, trying union alternatives in
    /// declared order exactly like the codec does.
    pub fn from_json(model: &SchemaModel, node: &SchemaNode, json: &Value) -> Result<Self, CodecError> {
        match model.resolve(node)? {
            SchemaNode::Record(rec) => {
                let obj = json
                    .as_object()
                    .ok_or_else(|| mismatch(&format!("record {}", rec.name), json))?;
                if let Some(extra) = obj.keys().find(|k| rec.field(k).is_none()) {
                    return Err(CodecError::shape(format!("record {} has no field `{extra}`", rec.name)));
                }
                let mut out = EncodedRecord::new(rec.name.clone());
                for field in &rec.fields {
                    let value = obj.get(&field.name).unwrap_or(&Value::Null);
                    out.fields.insert(field.name.clone(), Self::from_json(model, &field.schema, value)?);
                }
                Ok(EncodedValue::Record(out))
            }
            SchemaNode::Array(element) => {
                let xs = json.as_array().ok_or_else(|| mismatch("array", json))?;
                xs.iter()
                    .map(|x| Self::from_json(model, element, x))
                    .collect::<Result<Vec<_>, _>>()
                    .map(EncodedValue::Array)
            }
            SchemaNode::Union(alts) => UnionResolver::new(alts)
                .consume(|alt| Self::from_json(model, alt, json))
                .map(|(_, v)| v),
            SchemaNode::Enum(e) => {
                let sym = json.as_str().ok_or_else(|| mismatch(&format!("enum {}", e.name), json))?;
                if e.symbols.iter().any(|s| s == sym) {
                    Ok(EncodedValue::Enum(sym.to_string()))
                } else {
                    Err(CodecError::EnumMismatch { value: sym.to_string(), symbols: e.symbols.clone() })
                }
            }
            SchemaNode::Scalar(scalar) => scalar_from_json(scalar, json),
            SchemaNode::Ref(name) => Err(CodecError::UnsupportedSchema(format!("unresolved ref `{name}`"))),
            SchemaNode::Unsupported(kind) => Err(CodecError::UnsupportedSchema(kind.clone())),
        }
    }
}

impl EncodedRecord {
    pub fn to_json(&self) -> Result<Value, CodecError> {
        let mut map = Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.to_json()?);
        }
        Ok(Value::Object(map))
    }

    /// Read a whole record under the model's root schema.
    pub fn from_json(model: &SchemaModel, json: &Value) -> Result<Self, CodecError> {
        match EncodedValue::from_json(model, model.root(), json)? {
            EncodedValue::Record(r) => Ok(r),
            other => Err(CodecError::shape(format!("expected a record, found {}", other.kind_name()))),
        }
    }
}

fn scalar_from_json(scalar: &ScalarSchema, json: &Value) -> Result<EncodedValue, CodecError> {
    if let Some(LogicalType::Decimal { .. }) = scalar.logical {
        return match json {
            Value::String(s) => DecimalText::parse(s).map(EncodedValue::Decimal),
            // arbitrary_precision keeps the source digits
            Value::Number(n) => DecimalText::parse(&n.to_string()).map(EncodedValue::Decimal),
            other => Err(mismatch("decimal", other)),
        };
    }
    let kind = scalar.kind;
    let out = match (kind, json) {
        (ScalarKind::Null, Value::Null) => Some(EncodedValue::Null),
        (ScalarKind::Boolean, Value::Bool(b)) => Some(EncodedValue::Boolean(*b)),
        (ScalarKind::Int, Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()).map(EncodedValue::Int),
        (ScalarKind::Long, Value::Number(n)) => n.as_i64().map(EncodedValue::Long),
        (ScalarKind::Float, Value::Number(n)) => n
            .as_f64()
            .map(|x| x as f32)
            .filter(|x| x.is_finite())
            .map(|x| EncodedValue::Float(OrderedFloat(x))),
        (ScalarKind::Double, Value::Number(n)) => n
            .as_f64()
            .filter(|x| x.is_finite())
            .map(|x| EncodedValue::Double(OrderedFloat(x))),
        (ScalarKind::String, Value::String(s)) => Some(EncodedValue::String(s.clone())),
        (ScalarKind::Bytes, Value::String(s)) => Some(EncodedValue::Bytes(s.as_bytes().to_vec())),
        _ => None,
    };
    out.ok_or_else(|| mismatch(kind.name(), json))
}

fn finite_number(x: f64) -> Result<Value, CodecError> {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| CodecError::shape(format!("{x} has no JSON number form")))
}

fn mismatch(expected: &str, found: &Value) -> CodecError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    CodecError::shape(format!("expected {expected}, found JSON {found}"))
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model() -> SchemaModel {
        SchemaModel::from_avsc_str(
            r#"{
                "type": "record", "name": "Observation",
                "fields": [
                    {"name": "resourceType", "type": "string"},
                    {"name": "status", "type": {"type": "enum", "name": "status", "symbols": ["final", "amended"]}},
                    {"name": "value", "type": ["null", {"type": "bytes", "logicalType": "decimal", "precision": 18, "scale": 0}, "string"]},
                    {"name": "tags", "type": ["null", {"type": "array", "items": "string"}]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn decimal_text_keeps_trailing_zeros_and_reports_scale() {
        let d = DecimalText::parse("4.1200").unwrap();
        assert_eq!(d.as_str(), "4.1200");
        assert_eq!(d.scale(), 4);
        assert_eq!(DecimalText::parse("-3e10").unwrap().scale(), 0);
        assert!(DecimalText::parse("4.").is_err());
        assert!(DecimalText::parse("abc").is_err());
    }

    #[test]
    fn json_reads_back_through_unions() {
        let model = model();
        let json: Value = serde_json::from_str(
            r#"{"resourceType": "Observation", "status": "final", "value": 4.1200, "tags": ["a", "b"]}"#,
        )
        .unwrap();
        let rec = EncodedRecord::from_json(&model, &json).unwrap();
        assert_eq!(rec.name, "Observation");
        assert_eq!(rec.get("value"), Some(&EncodedValue::Decimal(DecimalText::parse("4.1200").unwrap())));
        assert_eq!(rec.get("status"), Some(&EncodedValue::Enum("final".into())));
        let back = rec.to_json().unwrap();
        assert_eq!(back["value"], json!("4.1200"));
        assert_eq!(back["tags"], json!(["a", "b"]));
    }

    #[test]
    fn missing_fields_read_as_null_and_unknown_fields_are_rejected() {
        let model = model();
        let rec = EncodedRecord::from_json(&model, &json!({"resourceType": "Observation", "status": "amended"})).unwrap();
        assert_eq!(rec.get("tags"), Some(&EncodedValue::Null));

        let err = EncodedRecord::from_json(&model, &json!({"status": "final", "bogus": 1})).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn unknown_enum_symbol_is_fatal() {
        let model = model();
        let err = EncodedRecord::from_json(&model, &json!({"resourceType": "Observation", "status": "draft"})).unwrap_err();
        assert!(matches!(err, CodecError::EnumMismatch { .. }));
    }

    #[test]
    fn non_finite_floats_and_non_utf8_bytes_fail_to_render() {
        let infinite = EncodedValue::Double(OrderedFloat(f64::INFINITY));
        assert!(matches!(infinite.to_json(), Err(CodecError::ShapeMismatch(_))));
        let nan = EncodedValue::Float(OrderedFloat(f32::NAN));
        assert!(nan.to_json().is_err());

        let bytes = EncodedValue::Bytes(vec![0x66, 0x6f, 0xff]);
        assert!(matches!(bytes.to_json(), Err(CodecError::ShapeMismatch(_))));
        assert_eq!(EncodedValue::Bytes(b"abc".to_vec()).to_json().unwrap(), json!("abc"));
    }

    #[test]
    fn out_of_range_doubles_do_not_read_back() {
        let scalar = ScalarSchema { kind: ScalarKind::Double, logical: None };
        let huge: Value = serde_json::from_str("1e400").unwrap();
        assert!(scalar_from_json(&scalar, &huge).is_err());
        let fine: Value = serde_json::from_str("2.5").unwrap();
        assert_eq!(scalar_from_json(&scalar, &fine).unwrap(), EncodedValue::Double(OrderedFloat(2.5)));
    }
}
