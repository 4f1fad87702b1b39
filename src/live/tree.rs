//! Arena-backed resource tree built from FHIR JSON.
//!
//! Each property remembers whether it was repeatable (a JSON array) so the
//! tree serializes back to the same JSON shape it was read from.
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use super::{LiveObject, LiveTree, Primitive, PrimitiveKind};
use crate::error::CodecError;
use crate::path::same_property;

const RESOURCE_TYPE: &str = "resourceType";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
enum NodeData {
    Object {
        type_name: Option<String>,
        props: IndexMap<String, Property>,
    },
    Primitive(Primitive),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Property {
    repeated: bool,
    values: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTree {
    nodes: Vec<NodeData>,
}

impl ResourceTree {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![NodeData::Object { type_name: Some(type_name.into()), props: IndexMap::new() }],
        }
    }

    pub fn type_name(&self) -> &str {
        match &self.nodes[0] {
            NodeData::Object { type_name: Some(name), .. } => name,
            _ => "",
        }
    }

    pub fn root_ref(&self) -> NodeRef<'_> {
        self.get(NodeId(0))
    }

    pub fn get(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    /// Number of values held by the property at a dotted path, following the
    /// first instance of every intermediate segment.
    pub fn count(&self, path: &str) -> usize {
        let mut node = self.root_ref();
        let segments: Vec<&str> = path.split('.').collect();
        for (i, seg) in segments.iter().enumerate() {
            let Some(values) = node.property(seg) else { return 0 };
            if i + 1 == segments.len() {
                return values.len();
            }
            match values.first() {
                Some(next) => node = *next,
                None => return 0,
            }
        }
        0
    }

    // ------------------------------ JSON in ------------------------------- //

    pub fn from_json(json: &Value) -> Result<Self, CodecError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CodecError::shape("a resource must be a JSON object"))?;
        let type_name = obj
            .get(RESOURCE_TYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::PropertyResolution(RESOURCE_TYPE.to_string()))?;
        let mut tree = ResourceTree::new(type_name);
        let root = tree.root();
        tree.fill_object(root, obj)?;
        Ok(tree)
    }

    fn fill_object(&mut self, id: NodeId, obj: &Map<String, Value>) -> Result<(), CodecError> {
        for (key, value) in obj {
            if key == RESOURCE_TYPE {
                continue;
            }
            let (repeated, items): (bool, Vec<&Value>) = match value {
                Value::Null => continue,
                Value::Array(xs) => (true, xs.iter().filter(|x| !x.is_null()).collect()),
                single => (false, vec![single]),
            };
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(self.node_from_json(key, item)?);
            }
            if let NodeData::Object { props, .. } = &mut self.nodes[id.0] {
                props.insert(key.clone(), Property { repeated, values });
            }
        }
        Ok(())
    }

    fn node_from_json(&mut self, key: &str, value: &Value) -> Result<NodeId, CodecError> {
        let data = match value {
            Value::Object(obj) => {
                let type_name = obj.get(RESOURCE_TYPE).and_then(Value::as_str).map(str::to_string);
                let id = self.alloc(NodeData::Object { type_name, props: IndexMap::new() });
                self.fill_object(id, obj)?;
                return Ok(id);
            }
            Value::String(s) => Primitive::text(s.clone()),
            Value::Number(n) => Primitive::number(n.to_string()),
            Value::Bool(b) => Primitive::boolean(*b),
            Value::Array(_) | Value::Null => {
                return Err(CodecError::shape(format!("property `{key}` holds a nested array")));
            }
        };
        Ok(self.alloc(NodeData::Primitive(data)))
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(data);
        NodeId(self.nodes.len() - 1)
    }

    // ------------------------------ JSON out ------------------------------ //

    /// Fails only when a number primitive carries text that is not a JSON
    /// number.
    pub fn to_json(&self) -> Result<Value, CodecError> {
        let mut out = Map::new();
        out.insert(RESOURCE_TYPE.to_string(), Value::String(self.type_name().to_string()));
        if let Value::Object(props) = self.node_to_json(NodeId(0))? {
            out.extend(props);
        }
        Ok(Value::Object(out))
    }

    fn node_to_json(&self, id: NodeId) -> Result<Value, CodecError> {
        match &self.nodes[id.0] {
            NodeData::Primitive(p) => primitive_to_json(p),
            NodeData::Object { type_name, props } => {
                let mut out = Map::new();
                if id.0 != 0 {
                    if let Some(name) = type_name {
                        out.insert(RESOURCE_TYPE.to_string(), Value::String(name.clone()));
                    }
                }
                for (key, prop) in props {
                    if prop.values.is_empty() {
                        continue;
                    }
                    let value = if prop.repeated {
                        Value::Array(prop.values.iter().map(|v| self.node_to_json(*v)).collect::<Result<_, _>>()?)
                    } else {
                        self.node_to_json(prop.values[0])?
                    };
                    out.insert(key.clone(), value);
                }
                Ok(Value::Object(out))
            }
        }
    }

    // ------------------------------ Mutation ------------------------------ //

    /// Walk all but the last segment of `path` from `at`, creating singular
    /// objects where nothing exists yet.
    fn parent_for<'p>(&mut self, at: NodeId, path: &'p str) -> Result<(NodeId, &'p str), CodecError> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().filter(|s| !s.is_empty()).ok_or_else(|| {
            CodecError::PropertyResolution(format!("empty path under {at:?}"))
        })?;

        let mut node = at;
        for seg in segments {
            node = self.object_child(node, seg, path)?;
        }
        Ok((node, last))
    }

    /// Last object held by property `seg` of `node`, or a new singular one.
    fn object_child(&mut self, node: NodeId, seg: &str, path: &str) -> Result<NodeId, CodecError> {
        let existing = self.prop_mut(node, seg)?.values.last().copied();
        match existing {
            Some(child) if matches!(self.nodes[child.0], NodeData::Object { .. }) => Ok(child),
            Some(_) => Err(CodecError::PropertyResolution(path.to_string())),
            None => {
                let child = self.alloc(NodeData::Object { type_name: None, props: IndexMap::new() });
                self.prop_mut(node, seg)?.values.push(child);
                Ok(child)
            }
        }
    }

    /// Property `name` of object `id`, matched case-folded, created if absent.
    fn prop_mut(&mut self, id: NodeId, name: &str) -> Result<&mut Property, CodecError> {
        match &mut self.nodes[id.0] {
            NodeData::Object { props, .. } => {
                let key = props
                    .keys()
                    .find(|k| same_property(k, name))
                    .cloned()
                    .unwrap_or_else(|| name.to_string());
                Ok(props.entry(key).or_default())
            }
            NodeData::Primitive(_) => Err(CodecError::PropertyResolution(format!(
                "`{name}` below a primitive value"
            ))),
        }
    }
}

fn primitive_to_json(p: &Primitive) -> Result<Value, CodecError> {
    Ok(match p.kind {
        PrimitiveKind::Text => Value::String(p.text.clone()),
        PrimitiveKind::Boolean => Value::Bool(p.text == "true"),
        PrimitiveKind::Number => serde_json::from_str::<Number>(&p.text)
            .map(Value::Number)
            .map_err(|_| CodecError::shape(format!("`{}` is not a JSON number", p.text)))?,
    })
}

impl LiveTree for ResourceTree {
    type Node = NodeId;

    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn append_element(&mut self, at: NodeId, path: &str) -> Result<NodeId, CodecError> {
        let (parent, last) = self.parent_for(at, path)?;
        let child = self.alloc(NodeData::Object { type_name: None, props: IndexMap::new() });
        let prop = self.prop_mut(parent, last)?;
        prop.repeated = true;
        prop.values.push(child);
        Ok(child)
    }

    fn set_scalar(&mut self, at: NodeId, path: &str, value: Primitive) -> Result<(), CodecError> {
        let (parent, last) = self.parent_for(at, path)?;
        let leaf = self.alloc(NodeData::Primitive(value));
        self.prop_mut(parent, last)?.values = vec![leaf];
        Ok(())
    }

    fn append_scalar(&mut self, at: NodeId, path: &str, value: Primitive) -> Result<(), CodecError> {
        let (parent, last) = self.parent_for(at, path)?;
        let leaf = self.alloc(NodeData::Primitive(value));
        let prop = self.prop_mut(parent, last)?;
        prop.repeated = true;
        prop.values.push(leaf);
        Ok(())
    }

    fn set_type_name(&mut self, at: NodeId, path: &str, name: &str) -> Result<(), CodecError> {
        let node = if path.is_empty() {
            at
        } else {
            let (parent, last) = self.parent_for(at, path)?;
            self.object_child(parent, last, path)?
        };
        match &mut self.nodes[node.0] {
            NodeData::Object { type_name, .. } => {
                *type_name = Some(name.to_string());
                Ok(())
            }
            NodeData::Primitive(_) => Err(CodecError::PropertyResolution(format!(
                "type name `{name}` for a primitive value"
            ))),
        }
    }
}

// ------------------------------ Read view --------------------------------- //

#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a ResourceTree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn data(&self) -> &'a NodeData {
        &self.tree.nodes[self.id.0]
    }
}

impl<'a> LiveObject for NodeRef<'a> {
    fn type_name(&self) -> Option<&str> {
        match self.data() {
            NodeData::Object { type_name, .. } => type_name.as_deref(),
            NodeData::Primitive(_) => None,
        }
    }

    fn property(&self, name: &str) -> Option<Vec<Self>> {
        match self.data() {
            NodeData::Object { props, .. } => {
                let values = props
                    .iter()
                    .find(|(k, _)| same_property(k, name))
                    .map(|(_, p)| p.values.iter().map(|id| self.tree.get(*id)).collect())
                    .unwrap_or_default();
                Some(values)
            }
            NodeData::Primitive(_) => None,
        }
    }

    fn property_names(&self) -> Vec<String> {
        match self.data() {
            NodeData::Object { props, .. } => props
                .iter()
                .filter(|(_, p)| !p.values.is_empty())
                .map(|(k, _)| k.clone())
                .collect(),
            NodeData::Primitive(_) => Vec::new(),
        }
    }

    fn is_primitive(&self) -> bool {
        matches!(self.data(), NodeData::Primitive(_))
    }

    fn primitive_value(&self) -> Option<&str> {
        match self.data() {
            NodeData::Primitive(p) => Some(&p.text),
            NodeData::Object { .. } => None,
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_shape_survives_a_pass_through_the_tree() {
        let src: Value = serde_json::from_str(
            r#"{
                "resourceType": "Patient",
                "active": true,
                "name": [{"family": "Simpson", "given": ["H", "Homer"]}],
                "birthDate": "1990-05-17",
                "weight": 4.1200,
                "managingOrganization": {"reference": "Organization/1"}
            }"#,
        )
        .unwrap();
        let tree = ResourceTree::from_json(&src).unwrap();
        assert_eq!(tree.type_name(), "Patient");
        assert_eq!(tree.count("name"), 1);
        assert_eq!(tree.count("name.given"), 2);
        let back = tree.to_json().unwrap();
        assert_eq!(back, src);
        assert_eq!(back["weight"].to_string(), "4.1200");
    }

    #[test]
    fn property_lookup_is_case_folded() {
        let tree = ResourceTree::from_json(&json!({"resourceType": "Patient", "multipleBirthBoolean": true})).unwrap();
        let root = tree.root_ref();
        let values = root.property("MultipleBirthBoolean").unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].primitive_value(), Some("true"));
        assert_eq!(root.property("gender").unwrap().len(), 0);
        assert_eq!(root.property_names(), vec!["multipleBirthBoolean".to_string()]);
    }

    #[test]
    fn path_writes_create_intermediates_and_reuse_last_instance() {
        let mut tree = ResourceTree::new("Patient");
        let root = tree.root();
        let first = tree.append_element(root, "name").unwrap();
        tree.set_scalar(first, "family", Primitive::text("Simpson")).unwrap();
        tree.append_scalar(first, "given", Primitive::text("Homer")).unwrap();
        let second = tree.append_element(root, "name").unwrap();
        tree.set_scalar(second, "period.start", Primitive::text("2020-01-01")).unwrap();
        tree.set_scalar(root, "identifier.value", Primitive::text("123")).unwrap();
        tree.set_scalar(root, "identifier.system", Primitive::text("urn:sys")).unwrap();

        assert_eq!(
            tree.to_json().unwrap(),
            json!({
                "resourceType": "Patient",
                "name": [
                    {"family": "Simpson", "given": ["Homer"]},
                    {"period": {"start": "2020-01-01"}}
                ],
                "identifier": {"value": "123", "system": "urn:sys"}
            })
        );
    }

    #[test]
    fn writing_below_a_primitive_fails() {
        let mut tree = ResourceTree::new("Patient");
        let root = tree.root();
        tree.set_scalar(root, "gender", Primitive::text("male")).unwrap();
        let err = tree.set_scalar(root, "gender.code", Primitive::text("x")).unwrap_err();
        assert!(matches!(err, CodecError::PropertyResolution(_)));
        assert!(tree.set_scalar(root, "", Primitive::text("x")).is_err());
    }

    #[test]
    fn type_names_render_on_nested_objects() {
        let mut tree = ResourceTree::new("Bundle");
        let root = tree.root();
        let entry = tree.append_element(root, "entry").unwrap();
        tree.set_type_name(entry, "resource", "Patient").unwrap();
        tree.set_scalar(entry, "resource.id", Primitive::text("a")).unwrap();
        let contained = tree.append_element(root, "contained").unwrap();
        tree.set_type_name(contained, "", "Patient").unwrap();

        assert_eq!(
            tree.to_json().unwrap(),
            json!({
                "resourceType": "Bundle",
                "entry": [{"resource": {"resourceType": "Patient", "id": "a"}}],
                "contained": [{"resourceType": "Patient"}]
            })
        );
        tree.set_scalar(root, "id", Primitive::text("b")).unwrap();
        assert!(tree.set_type_name(root, "id", "Patient").is_err());
    }

    #[test]
    fn malformed_number_text_fails_to_render() {
        let mut tree = ResourceTree::new("Patient");
        let root = tree.root();
        tree.set_scalar(root, "weight", Primitive::number("inf")).unwrap();
        assert!(matches!(tree.to_json(), Err(CodecError::ShapeMismatch(_))));
    }
}
