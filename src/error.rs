//! Error kinds for schema loading and the codec.
//!
//! Only [`CodecError::ShapeMismatch`] is ever recovered locally (by union
//! resolution). Everything else aborts the current encode/decode call and
//! reaches the caller wrapped in a [`ConversionError`].
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The value does not fit the schema node currently being tried.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("value `{value}` is not one of the symbols {symbols:?}")]
    EnumMismatch { value: String, symbols: Vec<String> },
    #[error("unsupported schema: {0}")]
    UnsupportedSchema(String),
    #[error("cannot resolve property `{0}`")]
    PropertyResolution(String),
}

impl CodecError {
    pub fn shape(msg: impl Into<String>) -> Self {
        CodecError::ShapeMismatch(msg.into())
    }

    /// Whether union resolution may move on to the next alternative.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CodecError::ShapeMismatch(_))
    }
}

/// A failed top-level conversion, located at the dotted field path where it
/// was raised (empty for the record root).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conversion failed at `{path}`: {source}")]
pub struct ConversionError {
    pub path: String,
    #[source]
    pub source: CodecError,
}

impl ConversionError {
    pub fn new(path: impl Into<String>, source: CodecError) -> Self {
        Self { path: path.into(), source }
    }

    pub fn kind(&self) -> &CodecError {
        &self.source
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Malformed `.avsc` JSON, with the JSON path of the offending node.
    #[error("at JSON path {path} → {message}")]
    Syntax { path: String, message: String },
    #[error("invalid {kind} schema: {message}")]
    Invalid { kind: String, message: String },
    #[error("unknown named type `{0}`")]
    UnknownType(String),
    #[error("named type `{0}` is defined twice")]
    Redefined(String),
    #[error("schema root must be a record, found {0}")]
    RootNotRecord(String),
}
