//! Encoded record → live object.
//!
//! The walk stages every mutation in a [`WritePlan`] instead of touching the
//! target. Union trial marks the plan before each alternative and truncates
//! back to the mark when the alternative is rejected. The plan is replayed
//! onto the target only once the whole walk has succeeded, so a failed call
//! leaves the target exactly as it was.
//!
//! Containers (array elements of record type) are addressed symbolically by
//! [`Slot`]. The container index maps the dotted path of the innermost open
//! array element to its slot; every write is issued relative to the longest
//! indexed prefix of the current path.
use indexmap::IndexMap;

use crate::config::CodecOptions;
use crate::error::{CodecError, ConversionError};
use crate::live::{LiveTree, Primitive, ResourceTree};
use crate::path::{Checkpoint, PathCursor};
use crate::scalar::ScalarTranscoder;
use crate::schema::{RecordSchema, ScalarKind, SchemaModel, SchemaNode};
use crate::union::UnionResolver;
use crate::value::{EncodedRecord, EncodedValue};

pub struct Decoder<'m> {
    model: &'m SchemaModel,
    scalars: ScalarTranscoder,
    options: CodecOptions,
}

impl<'m> Decoder<'m> {
    pub fn new(model: &'m SchemaModel, options: &CodecOptions) -> Self {
        Self {
            model,
            scalars: ScalarTranscoder::new(options),
            options: options.clone(),
        }
    }

    /// Decode `value` under `node` into `target`. Nothing is written unless
    /// the whole value decodes.
    pub fn decode<'s, T: LiveTree>(&'s self, node: &'s SchemaNode, value: &EncodedValue, target: &mut T) -> Result<(), ConversionError> {
        let mut walk = self.walk();
        walk.node(node, value).map_err(|err| walk.located(err))?;
        walk.finish(target)
    }

    /// Decode a whole record into a fresh resource named after it.
    pub fn decode_resource(&self, record: &EncodedRecord) -> Result<ResourceTree, ConversionError> {
        let _span = tracing::debug_span!("decode_resource", resource = %record.name).entered();
        let root = self.model.root_record().map_err(|err| ConversionError::new("", err))?;
        if root.name != record.name {
            return Err(ConversionError::new(
                "",
                CodecError::shape(format!("record {} where {} was expected", record.name, root.name)),
            ));
        }
        let mut walk = self.walk();
        walk.record(root, record).map_err(|err| walk.located(err))?;
        let mut tree = ResourceTree::new(record.name.clone());
        walk.finish(&mut tree)?;
        Ok(tree)
    }

    fn walk(&self) -> Walk<'_> {
        Walk {
            model: self.model,
            scalars: &self.scalars,
            discriminator: &self.options.discriminator,
            path: PathCursor::new(),
            plan: WritePlan::new(),
            containers: IndexMap::new(),
        }
    }
}

// ------------------------------ Write plan -------------------------------- //

/// Symbolic handle of a container created by the plan; slot 0 is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot(usize);

const ROOT: Slot = Slot(0);

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteOp {
    AppendElement { at: Slot, path: String, slot: Slot },
    SetScalar { at: Slot, path: String, value: Primitive },
    AppendScalar { at: Slot, path: String, value: Primitive },
    SetType { at: Slot, path: String, name: String },
}

#[derive(Debug)]
struct WritePlan {
    ops: Vec<WriteOp>,
    slots: usize,
}

impl WritePlan {
    fn new() -> Self {
        Self { ops: Vec::new(), slots: 1 }
    }

    fn allocate(&mut self) -> Slot {
        let slot = Slot(self.slots);
        self.slots += 1;
        slot
    }

    fn replay<T: LiveTree>(self, tree: &mut T) -> Result<(), ConversionError> {
        let mut nodes: Vec<Option<T::Node>> = vec![None; self.slots];
        nodes[ROOT.0] = Some(tree.root());
        let count = self.ops.len();
        for op in self.ops {
            match op {
                WriteOp::AppendElement { at, path, slot } => {
                    let parent = slot_node(&nodes, at, &path)?;
                    let node = tree
                        .append_element(parent, &path)
                        .map_err(|err| ConversionError::new(path.as_str(), err))?;
                    nodes[slot.0] = Some(node);
                }
                WriteOp::SetScalar { at, path, value } => {
                    let parent = slot_node(&nodes, at, &path)?;
                    tree.set_scalar(parent, &path, value)
                        .map_err(|err| ConversionError::new(path.as_str(), err))?;
                }
                WriteOp::AppendScalar { at, path, value } => {
                    let parent = slot_node(&nodes, at, &path)?;
                    tree.append_scalar(parent, &path, value)
                        .map_err(|err| ConversionError::new(path.as_str(), err))?;
                }
                WriteOp::SetType { at, path, name } => {
                    let parent = slot_node(&nodes, at, &path)?;
                    tree.set_type_name(parent, &path, &name)
                        .map_err(|err| ConversionError::new(path.as_str(), err))?;
                }
            }
        }
        tracing::debug!(ops = count, "write plan committed");
        Ok(())
    }
}

fn slot_node<N: Copy>(nodes: &[Option<N>], slot: Slot, path: &str) -> Result<N, ConversionError> {
    nodes.get(slot.0).copied().flatten().ok_or_else(|| {
        ConversionError::new(
            path,
            CodecError::PropertyResolution(format!("container for `{path}` was never created")),
        )
    })
}

// --------------------------------- Walk ----------------------------------- //

/// Everything a union attempt may change, captured before the attempt.
struct Mark {
    ops: usize,
    slots: usize,
    path: Checkpoint,
    containers: IndexMap<String, Slot>,
}

struct Walk<'s> {
    model: &'s SchemaModel,
    scalars: &'s ScalarTranscoder,
    discriminator: &'s str,
    path: PathCursor,
    plan: WritePlan,
    containers: IndexMap<String, Slot>,
}

impl<'s> Walk<'s> {
    fn node(&mut self, node: &'s SchemaNode, value: &EncodedValue) -> Result<(), CodecError> {
        let model = self.model;
        match model.resolve(node)? {
            SchemaNode::Record(rec) => {
                let record = expect_record(value, rec)?;
                self.record(rec, record)
            }
            SchemaNode::Array(element) => {
                let items = match value {
                    EncodedValue::Array(items) => items,
                    other => return Err(unexpected("array", other)),
                };
                for item in items {
                    self.element(element, item)?;
                }
                Ok(())
            }
            SchemaNode::Union(alts) => self.union(alts, value, Self::node),
            leaf => {
                if let Some(primitive) = self.leaf(leaf, value)? {
                    let (at, path) = self.target();
                    self.plan.ops.push(WriteOp::SetScalar { at, path, value: primitive });
                }
                Ok(())
            }
        }
    }

    /// One item of an array: record items open a new container, everything
    /// else appends to the repeatable property at the current path.
    fn element(&mut self, element: &'s SchemaNode, value: &EncodedValue) -> Result<(), CodecError> {
        let model = self.model;
        match model.resolve(element)? {
            SchemaNode::Record(rec) => {
                let record = expect_record(value, rec)?;
                let (at, path) = self.target();
                let slot = self.plan.allocate();
                self.plan.ops.push(WriteOp::AppendElement { at, path, slot });
                self.register(slot);
                self.record(rec, record)
            }
            SchemaNode::Union(alts) => self.union(alts, value, Self::element),
            SchemaNode::Array(_) => Err(CodecError::UnsupportedSchema("array directly inside an array".into())),
            leaf => {
                if let Some(primitive) = self.leaf(leaf, value)? {
                    let (at, path) = self.target();
                    self.plan.ops.push(WriteOp::AppendScalar { at, path, value: primitive });
                }
                Ok(())
            }
        }
    }

    fn record(&mut self, rec: &'s RecordSchema, value: &EncodedRecord) -> Result<(), CodecError> {
        if let Some(unknown) = value.fields.keys().find(|k| rec.field(k).is_none()) {
            return Err(CodecError::shape(format!("record {} has no field `{unknown}`", rec.name)));
        }
        // the root's type belongs to the target; nested resources carry their own
        if rec.field(self.discriminator).is_some() && !self.path.is_empty() {
            let (at, path) = match self.containers.get(&self.path.absolute_path()) {
                Some(slot) => (*slot, String::new()),
                None => self.target(),
            };
            self.plan.ops.push(WriteOp::SetType { at, path, name: rec.name.clone() });
        }
        let null = EncodedValue::Null;
        for field in &rec.fields {
            if field.name == self.discriminator {
                continue;
            }
            let value = value.fields.get(&field.name).unwrap_or(&null);
            self.path.push(field.name.as_str());
            self.node(&field.schema, value)?;
            self.path.pop();
        }
        Ok(())
    }

    fn union<F>(&mut self, alts: &'s [SchemaNode], value: &EncodedValue, mut step: F) -> Result<(), CodecError>
    where
        F: FnMut(&mut Self, &'s SchemaNode, &EncodedValue) -> Result<(), CodecError>,
    {
        let mark = self.mark();
        let result = UnionResolver::new(alts).consume(|alt| {
            self.rollback(&mark);
            step(self, alt, value)
        });
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.is_retryable() {
                    self.rollback(&mark);
                }
                Err(err)
            }
        }
    }

    fn leaf(&self, node: &SchemaNode, value: &EncodedValue) -> Result<Option<Primitive>, CodecError> {
        match node {
            SchemaNode::Enum(e) => {
                let symbol = match value {
                    EncodedValue::Enum(s) | EncodedValue::String(s) => s,
                    other => return Err(unexpected(&format!("enum {}", e.name), other)),
                };
                if e.symbols.contains(symbol) {
                    Ok(Some(Primitive::text(symbol.clone())))
                } else {
                    Err(CodecError::EnumMismatch { value: symbol.clone(), symbols: e.symbols.clone() })
                }
            }
            SchemaNode::Scalar(s) if s.kind == ScalarKind::Null => match value {
                EncodedValue::Null => Ok(None),
                other => Err(unexpected("null", other)),
            },
            SchemaNode::Scalar(s) => self.scalars.decode(value, s).map(Some),
            SchemaNode::Unsupported(kind) => Err(CodecError::UnsupportedSchema(kind.clone())),
            other => Err(CodecError::UnsupportedSchema(format!("{} as a leaf", other.describe()))),
        }
    }

    // --------------------------- Container index -------------------------- //

    /// Slot and relative path for a write at the current path.
    fn target(&self) -> (Slot, String) {
        let full = self.path.absolute_path();
        for depth in (1..self.path.depth()).rev() {
            let Some(prefix) = self.path.navigate(depth) else { continue };
            if let Some(slot) = self.containers.get(&prefix) {
                return (*slot, full[prefix.len() + 1..].to_string());
            }
        }
        (ROOT, full)
    }

    /// Make `slot` the open container at the current path. Containers below
    /// it belonged to the previous sibling and are closed.
    fn register(&mut self, slot: Slot) {
        let key = self.path.absolute_path();
        let nested = format!("{key}.");
        self.containers.retain(|k, _| !k.starts_with(&nested));
        self.containers.insert(key, slot);
    }

    fn mark(&self) -> Mark {
        Mark {
            ops: self.plan.ops.len(),
            slots: self.plan.slots,
            path: self.path.checkpoint(),
            containers: self.containers.clone(),
        }
    }

    fn rollback(&mut self, mark: &Mark) {
        self.plan.ops.truncate(mark.ops);
        self.plan.slots = mark.slots;
        self.path.restore(mark.path);
        self.containers.clone_from(&mark.containers);
    }

    fn located(&self, err: CodecError) -> ConversionError {
        ConversionError::new(self.path.absolute_path(), err)
    }

    fn finish<T: LiveTree>(self, target: &mut T) -> Result<(), ConversionError> {
        debug_assert!(self.path.is_empty(), "unbalanced path cursor: {:?}", self.path.segments());
        self.plan.replay(target)
    }
}

fn expect_record<'v>(value: &'v EncodedValue, rec: &RecordSchema) -> Result<&'v EncodedRecord, CodecError> {
    match value {
        EncodedValue::Record(r) if r.name == rec.name => Ok(r),
        EncodedValue::Record(r) => Err(CodecError::shape(format!("record {} where {} was expected", r.name, rec.name))),
        other => Err(unexpected(&format!("record {}", rec.name), other)),
    }
}

fn unexpected(expected: &str, found: &EncodedValue) -> CodecError {
    CodecError::shape(format!("expected {expected}, found {}", found.kind_name()))
}

// ------------------------------- Tests ------------------------------------ //
