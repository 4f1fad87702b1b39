//! Live object → encoded record.
//!
//! The walk is driven by the schema: every node kind consumes a list of live
//! values (a field may be repeatable, so even singular fields arrive as a
//! one-element list) and produces one encoded value.
use crate::config::CodecOptions;
use crate::error::{CodecError, ConversionError};
use crate::live::LiveObject;
use crate::path::{same_property, uncapitalize, PathCursor};
use crate::scalar::ScalarTranscoder;
use crate::schema::{RecordSchema, ScalarKind, SchemaModel, SchemaNode};
use crate::union::UnionResolver;
use crate::value::{EncodedRecord, EncodedValue};

pub struct Encoder<'m> {
    model: &'m SchemaModel,
    scalars: ScalarTranscoder,
    options: CodecOptions,
}

impl<'m> Encoder<'m> {
    pub fn new(model: &'m SchemaModel, options: &CodecOptions) -> Self {
        Self {
            model,
            scalars: ScalarTranscoder::new(options),
            options: options.clone(),
        }
    }

    /// Encode a whole resource against the model's root record.
    pub fn encode_resource<L: LiveObject>(&self, live: L) -> Result<EncodedRecord, ConversionError> {
        let _span = tracing::debug_span!("encode_resource", resource = live.type_name().unwrap_or("?")).entered();
        match self.encode(self.model.root(), std::slice::from_ref(&live))? {
            EncodedValue::Record(record) => Ok(record),
            other => Err(ConversionError::new(
                "",
                CodecError::UnsupportedSchema(format!("root encoded as {}", other.kind_name())),
            )),
        }
    }

    /// Encode `values` against an arbitrary schema node.
    pub fn encode<L: LiveObject>(&self, node: &SchemaNode, values: &[L]) -> Result<EncodedValue, ConversionError> {
        let mut path = PathCursor::new();
        self.encode_node(node, values, &mut path)
            .map_err(|err| ConversionError::new(path.absolute_path(), err))
    }

    fn encode_node<L: LiveObject>(&self, node: &SchemaNode, values: &[L], path: &mut PathCursor) -> Result<EncodedValue, CodecError> {
        match self.model.resolve(node)? {
            SchemaNode::Record(rec) => self.encode_record(rec, values, path),
            SchemaNode::Array(element) => values
                .iter()
                .map(|v| self.encode_node(element, std::slice::from_ref(v), path))
                .collect::<Result<Vec<_>, _>>()
                .map(EncodedValue::Array),
            SchemaNode::Union(alts) => self.encode_union(alts, values, path),
            SchemaNode::Enum(e) => {
                let text = single_primitive(values, &format!("enum {}", e.name))?;
                if e.symbols.iter().any(|s| s == text) {
                    Ok(EncodedValue::Enum(text.to_string()))
                } else {
                    Err(CodecError::EnumMismatch { value: text.to_string(), symbols: e.symbols.clone() })
                }
            }
            SchemaNode::Scalar(s) if s.kind == ScalarKind::Null => match values {
                [] => Ok(EncodedValue::Null),
                _ => Err(CodecError::shape("value present where null was expected")),
            },
            SchemaNode::Scalar(s) => {
                let text = single_primitive(values, s.kind.name())?;
                self.scalars.encode(text, s)
            }
            SchemaNode::Unsupported(kind) => Err(CodecError::UnsupportedSchema(kind.clone())),
            SchemaNode::Ref(name) => Err(CodecError::UnsupportedSchema(format!("unresolved ref `{name}`"))),
        }
    }

    fn encode_record<L: LiveObject>(&self, rec: &RecordSchema, values: &[L], path: &mut PathCursor) -> Result<EncodedValue, CodecError> {
        let live = match values {
            [one] if !one.is_primitive() => one,
            [_] => return Err(CodecError::shape(format!("primitive where record {} was expected", rec.name))),
            [] => return Err(CodecError::shape(format!("no value for record {}", rec.name))),
            many => {
                return Err(CodecError::shape(format!(
                    "{} values where a single record {} was expected",
                    many.len(),
                    rec.name
                )));
            }
        };

        if let Some(type_name) = live.type_name() {
            if !type_name.eq_ignore_ascii_case(&rec.name) {
                return Err(CodecError::shape(format!("{type_name} where record {} was expected", rec.name)));
            }
        }
        if self.options.strict_properties {
            for prop in live.property_names() {
                if !rec.fields.iter().any(|f| same_property(&f.name, &prop)) {
                    return Err(CodecError::shape(format!("record {} has no field for `{prop}`", rec.name)));
                }
            }
        }

        let mut out = EncodedRecord::new(rec.name.clone());
        for field in &rec.fields {
            if field.name == self.options.discriminator {
                out.fields.insert(field.name.clone(), self.discriminator(&field.schema, rec)?);
                continue;
            }
            path.push(field.name.clone());
            let values = live
                .property(&uncapitalize(&field.name))
                .ok_or_else(|| CodecError::PropertyResolution(path.absolute_path()))?;
            let encoded = self.encode_node(&field.schema, &values, path)?;
            path.pop();
            out.fields.insert(field.name.clone(), encoded);
        }
        Ok(EncodedValue::Record(out))
    }

    fn discriminator(&self, node: &SchemaNode, rec: &RecordSchema) -> Result<EncodedValue, CodecError> {
        Ok(match self.model.resolve(node)? {
            SchemaNode::Enum(_) => EncodedValue::Enum(rec.name.clone()),
            _ => EncodedValue::String(rec.name.clone()),
        })
    }

    fn encode_union<L: LiveObject>(&self, alts: &[SchemaNode], values: &[L], path: &mut PathCursor) -> Result<EncodedValue, CodecError> {
        if values.is_empty() {
            return Ok(EncodedValue::Null);
        }
        let cp = path.checkpoint();
        let chosen = UnionResolver::new(alts).produce(|alt| {
            path.restore(cp);
            match self.encode_node(alt, values, path)? {
                EncodedValue::Null => Ok(None),
                encoded => Ok(Some(encoded)),
            }
        })?;
        path.restore(cp);
        match chosen {
            Some((_, encoded)) => Ok(encoded),
            None => {
                tracing::warn!(
                    path = %path.absolute_path(),
                    values = values.len(),
                    "no union alternative fits; value dropped"
                );
                Ok(EncodedValue::Null)
            }
        }
    }
}

fn single_primitive<'v, L: LiveObject>(values: &'v [L], expected: &str) -> Result<&'v str, CodecError> {
    match values {
        [one] => one
            .primitive_value()
            .ok_or_else(|| CodecError::shape(format!("complex value where {expected} was expected"))),
        [] => Err(CodecError::shape(format!("no value for {expected}"))),
        many => Err(CodecError::shape(format!(
            "{} values where a single {expected} was expected",
            many.len()
        ))),
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::ResourceTree;
    use serde_json::{json, Value};

    fn model() -> SchemaModel {
        SchemaModel::from_avsc_str(
            r#"{
                "type": "record", "name": "Patient",
                "fields": [
                    {"name": "resourceType", "type": "string"},
                    {"name": "active", "type": ["null", "boolean"]},
                    {"name": "gender", "type": ["null", {"type": "enum", "name": "gender", "symbols": ["male", "female", "other", "unknown"]}]},
                    {"name": "birthDate", "type": ["null", {"type": "int", "logicalType": "date"}]},
                    {"name": "name", "type": ["null", {"type": "array", "items": {
                        "type": "record", "name": "HumanName",
                        "fields": [
                            {"name": "family", "type": ["null", "string"]},
                            {"name": "given", "type": ["null", {"type": "array", "items": "string"}]}
                        ]
                    }}]},
                    {"name": "deceased", "type": ["null", "boolean", {"type": "long", "logicalType": "time-micros"}]}
                ]
            }"#,
        )
        .unwrap()
    }

    fn tree(json: Value) -> ResourceTree {
        ResourceTree::from_json(&json).unwrap()
    }

    #[test]
    fn encodes_records_arrays_enums_and_dates() {
        let model = model();
        let enc = Encoder::new(&model, &CodecOptions::default());
        let t = tree(json!({
            "resourceType": "Patient",
            "active": true,
            "gender": "male",
            "birthDate": "1990-05-17",
            "name": [{"family": "Simpson", "given": ["H", "Homer", "Bart"]}]
        }));
        let rec = enc.encode_resource(t.root_ref()).unwrap();
        assert_eq!(rec.name, "Patient");
        assert_eq!(rec.get("resourceType"), Some(&EncodedValue::String("Patient".into())));
        assert_eq!(rec.get("active"), Some(&EncodedValue::Boolean(true)));
        assert_eq!(rec.get("gender"), Some(&EncodedValue::Enum("male".into())));
        assert_eq!(rec.get("birthDate"), Some(&EncodedValue::Int(7441)));
        assert_eq!(rec.get("deceased"), Some(&EncodedValue::Null));

        let names = match rec.get("name") {
            Some(EncodedValue::Array(xs)) => xs,
            other => panic!("expected array, got {other:?}"),
        };
        assert_eq!(names.len(), 1);
        let given = names[0].as_record().unwrap().get("given").unwrap();
        assert_eq!(
            given,
            &EncodedValue::Array(vec![
                EncodedValue::String("H".into()),
                EncodedValue::String("Homer".into()),
                EncodedValue::String("Bart".into()),
            ])
        );
    }

    #[test]
    fn union_picks_the_first_alternative_that_fits() {
        let model = model();
        let enc = Encoder::new(&model, &CodecOptions::default());
        // not a boolean, so the second non-null alternative wins
        let t = tree(json!({"resourceType": "Patient", "deceased": "2015-02-07T13:28:17-05:00"}));
        let rec = enc.encode_resource(t.root_ref()).unwrap();
        assert_eq!(rec.get("deceased"), Some(&EncodedValue::Long(1423333697)));

        let t = tree(json!({"resourceType": "Patient", "deceased": false}));
        let rec = enc.encode_resource(t.root_ref()).unwrap();
        assert_eq!(rec.get("deceased"), Some(&EncodedValue::Boolean(false)));
    }

    #[test]
    fn enum_mismatch_aborts_even_inside_a_union() {
        let model = model();
        let enc = Encoder::new(&model, &CodecOptions::default());
        let t = tree(json!({"resourceType": "Patient", "gender": "robot"}));
        let err = enc.encode_resource(t.root_ref()).unwrap_err();
        assert!(matches!(err.kind(), CodecError::EnumMismatch { .. }));
        assert_eq!(err.path, "gender");
    }

    #[test]
    fn unmapped_properties_are_ignored() {
        let model = model();
        let enc = Encoder::new(&model, &CodecOptions::default());
        let t = tree(json!({"resourceType": "Patient", "photo": "x"}));
        assert!(enc.encode_resource(t.root_ref()).is_ok());

        // one stray property does not cost the whole array
        let t = tree(json!({"resourceType": "Patient", "name": [{"family": "S", "suffix": ["Jr"]}, {"family": "T"}]}));
        let rec = enc.encode_resource(t.root_ref()).unwrap();
        match rec.get("name") {
            Some(EncodedValue::Array(names)) => assert_eq!(names.len(), 2),
            other => panic!("expected both names, got {other:?}"),
        }
    }

    #[test]
    fn strict_properties_reject_unmapped_ones() {
        let model = model();
        let options = CodecOptions { strict_properties: true, ..CodecOptions::default() };
        let enc = Encoder::new(&model, &options);
        let t = tree(json!({"resourceType": "Patient", "photo": "x"}));
        let err = enc.encode_resource(t.root_ref()).unwrap_err();
        assert!(err.kind().is_retryable());
        assert_eq!(err.path, "");

        // below an optional field the mismatch only empties that field
        let t = tree(json!({"resourceType": "Patient", "active": true, "name": [{"family": "S", "suffix": ["Jr"]}]}));
        let rec = enc.encode_resource(t.root_ref()).unwrap();
        assert_eq!(rec.get("name"), Some(&EncodedValue::Null));
        assert_eq!(rec.get("active"), Some(&EncodedValue::Boolean(true)));
    }

    #[test]
    fn wrong_resource_type_is_rejected() {
        let model = model();
        let enc = Encoder::new(&model, &CodecOptions::default());
        let t = tree(json!({"resourceType": "Observation"}));
        let err = enc.encode_resource(t.root_ref()).unwrap_err();
        assert_eq!(err.path, "");
        assert!(err.kind().is_retryable());
    }

    #[test]
    fn required_scalar_without_value_fails() {
        let model = SchemaModel::from_avsc_str(
            r#"{"type": "record", "name": "Patient", "fields": [{"name": "id", "type": "string"}]}"#,
        )
        .unwrap();
        let enc = Encoder::new(&model, &CodecOptions::default());
        let t = tree(json!({"resourceType": "Patient"}));
        let err = enc.encode_resource(t.root_ref()).unwrap_err();
        assert_eq!(err.path, "id");
    }
}
