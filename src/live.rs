//! Capability interface of the live object model.
//!
//! The codec never sees concrete resource types. Reading goes through
//! [`LiveObject`], writing through [`LiveTree`]. [`tree::ResourceTree`] is the
//! JSON-backed implementation used by the CLI and the tests.
pub mod tree;

use crate::error::CodecError;

pub use tree::{NodeId, NodeRef, ResourceTree};

/// Read side: one node of a live resource.
pub trait LiveObject: Sized {
    /// Concrete type name, when the model knows it (always for the root).
    fn type_name(&self) -> Option<&str>;

    /// Values of the property matching `name` (first character case-folded),
    /// in order. `None` when the object has no such property at all, which is
    /// different from a known property holding zero values.
    fn property(&self, name: &str) -> Option<Vec<Self>>;

    /// Names of the properties currently holding at least one value.
    fn property_names(&self) -> Vec<String>;

    fn is_primitive(&self) -> bool;

    fn primitive_value(&self) -> Option<&str>;
}

/// Write side, addressed by node handle plus a relative dotted path. The
/// intermediate segments of a path are created on demand; when a segment
/// already holds instances the last one is used.
pub trait LiveTree {
    type Node: Copy + std::fmt::Debug;

    fn root(&self) -> Self::Node;

    /// Create a new repeatable object instance at `path` under `at`.
    fn append_element(&mut self, at: Self::Node, path: &str) -> Result<Self::Node, CodecError>;

    /// Set the single primitive at `path` under `at`.
    fn set_scalar(&mut self, at: Self::Node, path: &str, value: Primitive) -> Result<(), CodecError>;

    /// Append one more primitive to the repeatable property at `path`.
    fn append_scalar(&mut self, at: Self::Node, path: &str, value: Primitive) -> Result<(), CodecError>;

    /// Name the concrete type of the object at `path` under `at`; an empty
    /// path names `at` itself.
    fn set_type_name(&mut self, at: Self::Node, path: &str, name: &str) -> Result<(), CodecError>;
}

/// A leaf value as text, plus the JSON flavour it should be rendered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Primitive {
    pub text: String,
    pub kind: PrimitiveKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Text,
    Number,
    Boolean,
}

impl Primitive {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), kind: PrimitiveKind::Text }
    }

    pub fn number(text: impl Into<String>) -> Self {
        Self { text: text.into(), kind: PrimitiveKind::Number }
    }

    pub fn boolean(b: bool) -> Self {
        Self { text: b.to_string(), kind: PrimitiveKind::Boolean }
    }
}
